//! C2 section addressing, and the external collaborator interfaces from
//! spec §6 that this core consumes but never implements: `Module`, `Index`,
//! `MemoryReader`, `RegisterState`.

use crate::error::{Error, Result};

/// Identifies one ELF section. Not every module has every section; absence
/// is valid and must be checked by callers (spec §3, "Section reference").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SectionId {
    DebugInfo,
    DebugTypes,
    DebugAbbrev,
    DebugStr,
    DebugLineStr,
    DebugStrOffsets,
    DebugLine,
    DebugAddr,
    DebugLoc,
    DebugLocLists,
    DebugRngLists,
    DebugFrame,
    EhFrame,
    EhFrameHdr,
    Text,
    Got,
}

/// The bytes of one section plus the address it is mapped at, as handed
/// back by [`Module::section`].
#[derive(Debug, Clone, Copy)]
pub struct SectionRef<'d> {
    pub bytes: &'d [u8],
    pub base_address: u64,
}

impl<'d> SectionRef<'d> {
    pub fn contains_address(&self, addr: u64) -> bool {
        let end = self.base_address + self.bytes.len() as u64;
        addr >= self.base_address && addr < end
    }

    /// End-of-section pointers are legal in DWARF (spec §4.2); this also
    /// matches `addr == end`.
    pub fn contains_or_ends_at(&self, addr: u64) -> bool {
        let end = self.base_address + self.bytes.len() as u64;
        addr >= self.base_address && addr <= end
    }
}

/// Word size, byte order and the CFI default row for one target platform.
/// Supplied per-module (spec §6: "provides `platform`").
pub trait Platform {
    fn address_size(&self) -> u8;
    fn is_little_endian(&self) -> bool;
    /// Mask that clears any bits above `address_size`, applied after every
    /// expression-evaluator arithmetic op (spec §4.4 `PUSH_MASK`).
    fn address_mask(&self) -> u64 {
        let bits = self.address_size() as u32 * 8;
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }
    /// The highest DWARF register number this platform defines a rule for
    /// by default; used to size a freshly-initialized CFI row.
    fn max_register(&self) -> u32;
    /// Whether `regno` is swapped relative to the module's native byte
    /// order when read out of register/memory bytes (spec's `bswap?`).
    fn bswap(&self) -> bool {
        false
    }
}

/// Bytes, size and load address of one module's sections, plus its target
/// platform description. Implemented by the embedder; this core only
/// consumes it.
pub trait Module {
    fn name(&self) -> &str;
    fn section(&self, id: SectionId) -> Option<SectionRef<'_>>;
    fn platform(&self) -> &dyn Platform;

    /// Locates the section containing `ptr`, or whose end equals `ptr`
    /// (spec §4.2). Used only for error reporting and pointer-encoding
    /// base resolution, never on the hot path.
    fn locate_section(&self, ptr: u64) -> Option<SectionId> {
        const ALL: &[SectionId] = &[
            SectionId::DebugInfo,
            SectionId::DebugTypes,
            SectionId::DebugAbbrev,
            SectionId::DebugStr,
            SectionId::DebugLineStr,
            SectionId::DebugStrOffsets,
            SectionId::DebugLine,
            SectionId::DebugAddr,
            SectionId::DebugLoc,
            SectionId::DebugLocLists,
            SectionId::DebugRngLists,
            SectionId::DebugFrame,
            SectionId::EhFrame,
            SectionId::EhFrameHdr,
            SectionId::Text,
            SectionId::Got,
        ];
        ALL.iter()
            .copied()
            .find(|&id| matches!(self.section(id), Some(s) if s.contains_or_ends_at(ptr)))
    }
}

/// The base address an EH-frame pointer encoding resolves against
/// (spec §4.2).
#[derive(Debug, Clone, Copy)]
pub enum BaseKind {
    /// `section_base + offset_within_section`, i.e. the absolute address of
    /// the field being decoded itself.
    PcRel { field_address: u64 },
    /// The `.text` section's load address.
    TextRel,
    /// The `.got` section's load address.
    DataRel,
    /// The enclosing FDE's `initial_location`.
    FuncRel { initial_location: u64 },
    /// Rounds the current position up to the platform's address size.
    Aligned { field_address: u64, address_size: u8 },
}

impl BaseKind {
    pub fn resolve(self, module: &dyn Module) -> Result<u64> {
        match self {
            BaseKind::PcRel { field_address } => Ok(field_address),
            BaseKind::TextRel => module
                .section(SectionId::Text)
                .map(|s| s.base_address)
                .ok_or(Error::NotFound),
            BaseKind::DataRel => module
                .section(SectionId::Got)
                .map(|s| s.base_address)
                .ok_or(Error::NotFound),
            BaseKind::FuncRel { initial_location } => Ok(initial_location),
            BaseKind::Aligned {
                field_address,
                address_size,
            } => {
                let size = address_size as u64;
                Ok((field_address + size - 1) & !(size - 1))
            }
        }
    }
}

/// Maps `(name, tag)` to candidate DIE references, and a declaration DIE to
/// its definition. Spec §1 calls this out explicitly as an external
/// collaborator ("A DWARF name index... referenced abstractly as `Index`").
pub trait Index {
    /// A DIE address opaque to the index: the pair an embedder needs to
    /// relocate a DIE (which module, which byte offset into
    /// `debug_info`/`debug_types`).
    fn iter_matches(&self, namespace: &[&str], name: &str, tags: &[crate::consts::DwTag]) -> Vec<DieAddress>;
    fn find_definition(&self, decl: DieAddress) -> Option<DieAddress>;
}

/// A module-qualified, CU-relative DIE address, stable across the
/// constructor's lifetime (spec §3, "DIE").
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct DieAddress {
    pub module: u32,
    pub offset: usize,
}

/// `read(address, len, physical?) -> bytes`, per spec §6.
pub trait MemoryReader {
    fn read(&self, address: u64, len: usize, physical: bool) -> Result<Vec<u8>>;
}

/// Read-only register snapshot consulted during expression evaluation
/// (spec §3, "Register state").
pub trait RegisterState {
    fn has(&self, regno: u32) -> bool;
    fn get(&self, regno: u32) -> Option<u64>;
    fn pc(&self) -> Option<u64>;
    fn cfa(&self) -> Option<u64>;
    fn interrupted(&self) -> bool {
        false
    }
}
