//! Hand-encoded DWARF fixtures and fake collaborator implementations
//! (`FakeModule`/`FakeIndex`/`FakeMemory`/`FakeRegisters`) used by the
//! end-to-end scenario tests (spec §8).

use std::cell::RefCell;
use std::collections::HashMap;

use dwarf_core::consts::DwTag;
use dwarf_core::module::{DieAddress, Index, MemoryReader, Platform, RegisterState, SectionId, SectionRef};

pub fn uleb(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if v == 0 {
            break;
        }
    }
    out
}

pub fn sleb(mut v: i64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let mut byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if !done {
            byte |= 0x80;
        }
        out.push(byte);
        if done {
            break;
        }
    }
    out
}

fn cstr(s: &str) -> Vec<u8> {
    let mut out = s.as_bytes().to_vec();
    out.push(0);
    out
}

/// Offsets of the DIEs this fixture builds, CU-relative (== absolute, since
/// the fixture has exactly one unit starting at offset 0).
pub struct FixtureDies {
    pub cu: usize,
    pub int_type: usize,
    pub color_enum: usize,
    pub enumerator_green: usize,
    pub variable_g: usize,
}

pub const VARIABLE_G_ADDRESS: u64 = 0x2000;

/// Builds one DWARF4, 64-bit-address, little-endian compilation unit:
///
/// ```text
/// compile_unit
///   base_type "int" (signed, 4 bytes)
///   enumeration_type "Color" -> int
///     enumerator "RED" = 0
///     enumerator "GREEN" = 1
///     enumerator "BLUE" = 2
///   variable "g" -> int, DW_OP_addr(0x2000)
/// ```
///
/// matching spec §8 scenario 1 (enumerator lookup) and exercising
/// `find_object` under the `variable` flag too.
pub fn build_fixture() -> (Vec<u8>, Vec<u8>, FixtureDies) {
    let abbrev = build_abbrev();

    let mut info = Vec::new();
    // Placeholder unit_length, patched at the end.
    info.extend_from_slice(&[0u8; 4]);
    info.extend_from_slice(&4u16.to_le_bytes()); // version
    info.extend_from_slice(&0u32.to_le_bytes()); // abbrev_offset
    info.push(8); // address_size

    let cu = info.len();
    info.extend(uleb(1)); // abbrev code 1: compile_unit

    let int_type = info.len();
    info.extend(uleb(2)); // abbrev code 2: base_type
    info.extend(cstr("int"));
    info.push(0x05); // DW_ATE_signed
    info.push(4); // byte_size

    let color_enum = info.len();
    info.extend(uleb(3)); // abbrev code 3: enumeration_type
    info.extend(cstr("Color"));
    info.extend((int_type as u32).to_le_bytes()); // DW_AT_type, ref4 (unit-relative; unit starts at offset 0)
    info.push(4); // byte_size

    let enumerator_red = info.len();
    info.extend(uleb(4));
    info.extend(cstr("RED"));
    info.extend(sleb(0));
    let _ = enumerator_red;

    let enumerator_green = info.len();
    info.extend(uleb(4));
    info.extend(cstr("GREEN"));
    info.extend(sleb(1));

    let enumerator_blue = info.len();
    info.extend(uleb(4));
    info.extend(cstr("BLUE"));
    info.extend(sleb(2));
    let _ = enumerator_blue;

    info.push(0); // null: ends Color's children

    let variable_g = info.len();
    info.extend(uleb(5)); // abbrev code 5: variable
    info.extend(cstr("g"));
    info.extend((int_type as u32).to_le_bytes()); // DW_AT_type
    let loc_expr = {
        let mut e = vec![0x03u8]; // DW_OP_addr
        e.extend(VARIABLE_G_ADDRESS.to_le_bytes());
        e
    };
    info.extend(uleb(loc_expr.len() as u64));
    info.extend(loc_expr);

    info.push(0); // null: ends compile_unit's children

    let unit_length = (info.len() - 4) as u32;
    info[0..4].copy_from_slice(&unit_length.to_le_bytes());

    (
        info,
        abbrev,
        FixtureDies {
            cu,
            int_type,
            color_enum,
            enumerator_green,
            variable_g,
        },
    )
}

fn build_abbrev() -> Vec<u8> {
    let mut a = Vec::new();

    // 1: compile_unit, has children, no attributes.
    a.extend(uleb(1));
    a.extend(uleb(0x11));
    a.push(1);
    a.extend(uleb(0));
    a.extend(uleb(0));

    // 2: base_type, no children: name(string), encoding(data1), byte_size(data1)
    a.extend(uleb(2));
    a.extend(uleb(0x24));
    a.push(0);
    a.extend(uleb(0x03));
    a.extend(uleb(0x08));
    a.extend(uleb(0x3e));
    a.extend(uleb(0x0b));
    a.extend(uleb(0x0b));
    a.extend(uleb(0x0b));
    a.extend(uleb(0));
    a.extend(uleb(0));

    // 3: enumeration_type, has children: name(string), type(ref4), byte_size(data1)
    a.extend(uleb(3));
    a.extend(uleb(0x04));
    a.push(1);
    a.extend(uleb(0x03));
    a.extend(uleb(0x08));
    a.extend(uleb(0x49));
    a.extend(uleb(0x13));
    a.extend(uleb(0x0b));
    a.extend(uleb(0x0b));
    a.extend(uleb(0));
    a.extend(uleb(0));

    // 4: enumerator, no children: name(string), const_value(sdata)
    a.extend(uleb(4));
    a.extend(uleb(0x28));
    a.push(0);
    a.extend(uleb(0x03));
    a.extend(uleb(0x08));
    a.extend(uleb(0x1c));
    a.extend(uleb(0x0d));
    a.extend(uleb(0));
    a.extend(uleb(0));

    // 5: variable, no children: name(string), type(ref4), location(exprloc)
    a.extend(uleb(5));
    a.extend(uleb(0x34));
    a.push(0);
    a.extend(uleb(0x03));
    a.extend(uleb(0x08));
    a.extend(uleb(0x49));
    a.extend(uleb(0x13));
    a.extend(uleb(0x02));
    a.extend(uleb(0x18));
    a.extend(uleb(0));
    a.extend(uleb(0));

    a.push(0); // table terminator
    a
}

pub struct FakePlatform {
    pub address_size: u8,
    pub little_endian: bool,
}

impl Platform for FakePlatform {
    fn address_size(&self) -> u8 {
        self.address_size
    }
    fn is_little_endian(&self) -> bool {
        self.little_endian
    }
    fn max_register(&self) -> u32 {
        32
    }
}

pub struct FakeModule {
    pub debug_info: Vec<u8>,
    pub debug_abbrev: Vec<u8>,
    pub platform: FakePlatform,
}

impl dwarf_core::module::Module for FakeModule {
    fn name(&self) -> &str {
        "fixture"
    }

    fn section(&self, id: SectionId) -> Option<SectionRef<'_>> {
        match id {
            SectionId::DebugInfo => Some(SectionRef {
                bytes: &self.debug_info,
                base_address: 0,
            }),
            SectionId::DebugAbbrev => Some(SectionRef {
                bytes: &self.debug_abbrev,
                base_address: 0,
            }),
            _ => None,
        }
    }

    fn platform(&self) -> &dyn Platform {
        &self.platform
    }
}

/// An `Index` whose name table is supplied directly by the test, rather than
/// scanned out of the DIE tree: the production embedder's name index is
/// outside this crate's scope (spec §1), so this fixture stands in as a
/// minimal conforming implementation.
pub struct FakeIndex {
    entries: Vec<(Vec<String>, String, DwTag, DieAddress)>,
}

impl FakeIndex {
    pub fn new() -> Self {
        FakeIndex { entries: Vec::new() }
    }

    pub fn with(mut self, namespace: &[&str], name: &str, tag: DwTag, offset: usize) -> Self {
        self.entries.push((
            namespace.iter().map(|s| s.to_string()).collect(),
            name.to_string(),
            tag,
            DieAddress { module: 0, offset },
        ));
        self
    }
}

impl Index for FakeIndex {
    fn iter_matches(&self, namespace: &[&str], name: &str, tags: &[DwTag]) -> Vec<DieAddress> {
        self.entries
            .iter()
            .filter(|(ns, n, tag, _)| ns.iter().map(|s| s.as_str()).eq(namespace.iter().copied()) && n == name && tags.contains(tag))
            .map(|(_, _, _, addr)| *addr)
            .collect()
    }

    fn find_definition(&self, _decl: DieAddress) -> Option<DieAddress> {
        None
    }
}

#[derive(Default)]
pub struct FakeMemory {
    data: RefCell<HashMap<u64, Vec<u8>>>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: u64, bytes: &[u8]) {
        self.data.borrow_mut().insert(address, bytes.to_vec());
    }
}

impl MemoryReader for FakeMemory {
    fn read(&self, address: u64, len: usize, _physical: bool) -> dwarf_core::Result<Vec<u8>> {
        let data = self.data.borrow();
        for (&base, bytes) in data.iter() {
            if address >= base && address + len as u64 <= base + bytes.len() as u64 {
                let start = (address - base) as usize;
                return Ok(bytes[start..start + len].to_vec());
            }
        }
        Err(dwarf_core::Error::NotFound)
    }
}

#[derive(Default)]
pub struct FakeRegisters {
    pub values: HashMap<u32, u64>,
    pub pc: Option<u64>,
    pub cfa: Option<u64>,
}

impl RegisterState for FakeRegisters {
    fn has(&self, regno: u32) -> bool {
        self.values.contains_key(&regno)
    }
    fn get(&self, regno: u32) -> Option<u64> {
        self.values.get(&regno).copied()
    }
    fn pc(&self) -> Option<u64> {
        self.pc
    }
    fn cfa(&self) -> Option<u64> {
        self.cfa
    }
}
