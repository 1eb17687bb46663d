//! The handful of operations this core exposes to its embedder (spec §6):
//! `find_type`, `find_object`, `object_from_dwarf`, `find_dwarf_cfi`,
//! `find_dwarf_scopes`, `find_die_ancestors`. Everything else in the crate
//! (C1-C9) is plumbing these five functions wire together against one
//! module's `Dwarf` and the caller's `Index`.
//!
//! Grounded in the teacher's top-level `unwind::trace`/`trace_from_ucontext`
//! (`src/lib.rs`): a thin orchestration layer over the lower modules that
//! does no parsing of its own, just sequencing.

use smallvec::SmallVec;

use crate::cfi::{CfiLookup, CfiEngine};
use crate::consts::*;
use crate::die::{AttributeValue, Die, Dwarf};
use crate::error::{Error, Result};
use crate::expr::{resolve_frame_base, Context};
use crate::module::{DieAddress, Index, MemoryReader, Module, RegisterState};
use crate::object::{object_from_die_location, Object, ObjectLocation};
use crate::types::{size_of_qualified, QualifiedType, TypeConstructor};

/// Which kind of type-tagged DIEs `find_type` should consider (spec §6:
/// `find_type(kind, name, name_len, filename?)`).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TypeSearchKind {
    Struct,
    Union,
    Class,
    Enum,
    Typedef,
    BaseType,
    /// Any of the above; used when the caller has no more specific tag hint.
    Any,
}

impl TypeSearchKind {
    fn tags(self) -> &'static [crate::consts::DwTag] {
        match self {
            TypeSearchKind::Struct => &[DW_TAG_STRUCTURE_TYPE],
            TypeSearchKind::Union => &[DW_TAG_UNION_TYPE],
            TypeSearchKind::Class => &[DW_TAG_CLASS_TYPE],
            TypeSearchKind::Enum => &[DW_TAG_ENUMERATION_TYPE],
            TypeSearchKind::Typedef => &[DW_TAG_TYPEDEF],
            TypeSearchKind::BaseType => &[DW_TAG_BASE_TYPE],
            TypeSearchKind::Any => &[
                DW_TAG_STRUCTURE_TYPE,
                DW_TAG_UNION_TYPE,
                DW_TAG_CLASS_TYPE,
                DW_TAG_ENUMERATION_TYPE,
                DW_TAG_TYPEDEF,
                DW_TAG_BASE_TYPE,
            ],
        }
    }
}

/// Which kind of named object `find_object` should consider (spec §6:
/// `flags{constant|function|variable}`).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct ObjectFlags {
    pub constant: bool,
    pub function: bool,
    pub variable: bool,
}

impl ObjectFlags {
    pub const ALL: ObjectFlags = ObjectFlags {
        constant: true,
        function: true,
        variable: true,
    };

    fn tags(self) -> SmallVec<[crate::consts::DwTag; 3]> {
        let mut tags = SmallVec::new();
        if self.constant {
            tags.push(DW_TAG_ENUMERATOR);
        }
        if self.function {
            tags.push(DW_TAG_SUBPROGRAM);
        }
        if self.variable {
            tags.push(DW_TAG_VARIABLE);
        }
        tags
    }
}

/// Splits a possibly fully-qualified `a::b::c` name into its namespace
/// segments and leaf. A leading `::` selects the global namespace (spec §6:
/// "leading `::` selects the global namespace").
fn split_qualified_name(name: &str) -> (Vec<&str>, &str) {
    let name = name.strip_prefix("::").unwrap_or(name);
    let mut parts: Vec<&str> = name.split("::").collect();
    let leaf = parts.pop().unwrap_or(name);
    (parts, leaf)
}

/// Owns the per-module state (`Dwarf`, type constructor) needed to answer
/// the spec §6 queries against one module. One instance per module, per
/// spec §5's "create independent type-constructor ... instances per module".
pub struct Session<'a, 'd> {
    pub dwarf: &'a Dwarf<'d>,
    pub module: &'a dyn Module,
    pub index: &'a dyn Index,
    pub module_id: u32,
    pub types: TypeConstructor<'a, 'd>,
}

impl<'a, 'd> Session<'a, 'd> {
    pub fn new(dwarf: &'a Dwarf<'d>, module: &'a dyn Module, index: &'a dyn Index, module_id: u32) -> Self {
        Session {
            dwarf,
            module,
            index,
            module_id,
            types: TypeConstructor::new(dwarf, module, index, module_id),
        }
    }

    fn die_for(&self, addr: DieAddress) -> Option<Die> {
        // `addr` is only meaningful for this session's own module; the
        // `Index` is free to hand back addresses from other modules (spec
        // §6's `find_definition` crosses module boundaries), but `find_type`
        // /`find_object` only resolve candidates local to this session.
        if addr.module != self.module_id {
            return None;
        }
        self.dwarf
            .unit_at_offset(crate::module::SectionId::DebugInfo, addr.offset)
            .or_else(|| self.dwarf.unit_at_offset(crate::module::SectionId::DebugTypes, addr.offset))
            .map(|unit| Die { unit, offset: addr.offset })
    }

    /// spec §6: `find_type(kind, name, name_len, filename?) -> qualified_type | not_found`.
    ///
    /// `filename` is accepted for interface parity but not applied as a
    /// filter: disambiguating by declaration file needs a `.debug_line`
    /// file-name table, which is outside the component set this core
    /// implements (§1's ELF/section-loading exclusion) — see `DESIGN.md`.
    pub fn find_type(&self, kind: TypeSearchKind, name: &str, _filename: Option<&str>) -> Result<QualifiedType> {
        let (namespace, leaf) = split_qualified_name(name);
        let candidates = self.index.iter_matches(&namespace, leaf, kind.tags());
        for addr in candidates {
            if let Some(die) = self.die_for(addr) {
                let (qt, _) = self.types.type_from_dwarf(die, true)?;
                return Ok(qt);
            }
        }
        Err(Error::NotFound)
    }

    /// spec §6: `find_object(name, filename?, flags) -> object | not_found`.
    pub fn find_object(&self, name: &str, _filename: Option<&str>, flags: ObjectFlags, regs: Option<&'a dyn RegisterState>, memory: Option<&'a dyn MemoryReader>) -> Result<Object> {
        let (namespace, leaf) = split_qualified_name(name);
        let tags = flags.tags();
        let candidates = self.index.iter_matches(&namespace, leaf, &tags);
        for addr in candidates {
            let die = match self.die_for(addr) {
                Some(d) => d,
                None => continue,
            };
            let tag = self.dwarf.tag(die)?;
            if tag == DW_TAG_ENUMERATOR {
                return self.object_from_enumerator(die);
            }
            let (ty, _) = self.types.type_from_dwarf_attr(die, DW_AT_TYPE, true)?;
            let ancestors = self.dwarf.ancestors_of(die)?;
            let function_die = enclosing_subprogram(self.dwarf, &ancestors)?;
            let ctx = self.expression_context(function_die, regs, memory)?;
            return object_from_die_location(&ctx, die, ty, None, 0, false);
        }
        Err(Error::NotFound)
    }

    /// An enumerator matched under the `constant` flag has no `DW_AT_location`
    /// of its own: its value is its enclosing enum's compatible integer type,
    /// holding the constant (spec §8 scenario 1).
    fn object_from_enumerator(&self, die: Die) -> Result<Object> {
        let ancestors = self.dwarf.ancestors_of(die)?;
        let enum_die = *ancestors
            .iter()
            .rev()
            .nth(1)
            .ok_or_else(|| Error::other("DW_TAG_enumerator has no enclosing enumeration_type"))?;
        let (enum_ty, _) = self.types.type_from_dwarf(enum_die, false)?;
        let underlying = match &enum_ty.ty.kind {
            crate::types::TypeKind::Enum(e) => e.underlying.clone(),
            _ => return Err(Error::other("enumerator's ancestor did not construct to an enum type")),
        };
        let value = self
            .dwarf
            .attr(die, DW_AT_CONST_VALUE)?
            .and_then(|v| v.as_sdata())
            .ok_or_else(|| Error::other("DW_TAG_enumerator missing DW_AT_const_value"))?;
        let size = size_of_qualified(&underlying).unwrap_or(8) as usize;
        let little_endian = self.module.platform().is_little_endian();
        let mut bytes = if little_endian {
            value.to_le_bytes().to_vec()
        } else {
            value.to_be_bytes().to_vec()
        };
        if little_endian {
            bytes.truncate(size.min(8));
        } else {
            let start = bytes.len().saturating_sub(size.min(8));
            bytes = bytes[start..].to_vec();
        }
        Ok(Object {
            ty: underlying,
            bit_size: size as u64 * 8,
            location: ObjectLocation::Value(bytes),
        })
    }

    fn expression_context(&self, function_die: Option<Die>, regs: Option<&'a dyn RegisterState>, memory: Option<&'a dyn MemoryReader>) -> Result<Context<'a, 'd>> {
        let pc = regs.and_then(|r| r.pc());
        let frame_base = match function_die {
            Some(f) => resolve_frame_base(
                &Context {
                    dwarf: self.dwarf,
                    module: self.module,
                    address_size: self.module.platform().address_size(),
                    cu_unit: f.unit,
                    function_die: Some(f),
                    registers: regs,
                    memory,
                    frame_base: None,
                    cfa: regs.and_then(|r| r.cfa()),
                },
                f,
                pc,
            )
            .ok(),
            None => None,
        };
        Ok(Context {
            dwarf: self.dwarf,
            module: self.module,
            address_size: self.module.platform().address_size(),
            cu_unit: function_die.map(|f| f.unit).unwrap_or(0),
            function_die,
            registers: regs,
            memory,
            frame_base,
            cfa: regs.and_then(|r| r.cfa()),
        })
    }

    /// spec §6: `object_from_dwarf(die, type_die?, subprogram_die?, regs?) -> object`.
    pub fn object_from_dwarf(&self, die: Die, type_die: Option<Die>, subprogram_die: Option<Die>, regs: Option<&'a dyn RegisterState>, memory: Option<&'a dyn MemoryReader>) -> Result<Object> {
        let ty = match type_die {
            Some(d) => self.types.type_from_dwarf(d, true)?.0,
            None => self.types.type_from_dwarf_attr(die, DW_AT_TYPE, true)?.0,
        };
        let ctx = self.expression_context(subprogram_die, regs, memory)?;
        object_from_die_location(&ctx, die, ty, None, 0, false)
    }

    /// spec §6: `find_dwarf_scopes(module, pc) -> (bias, dies[])`.
    ///
    /// `bias` is always `0`: this core has no notion of a process-relative
    /// load bias distinct from the addresses `Module::section` already
    /// reports (see `DESIGN.md`, "find_dwarf_scopes bias").
    pub fn find_dwarf_scopes(&self, pc: u64) -> Result<(u64, SmallVec<[Die; 8]>)> {
        let mut scopes: SmallVec<[Die; 8]> = SmallVec::new();
        for unit_idx in 0..self.dwarf.units.len() {
            if self.dwarf.unit(unit_idx).is_type_unit {
                continue;
            }
            let cu = self.dwarf.unit_root(unit_idx);
            self.collect_scopes(cu, pc, &mut scopes)?;
        }
        Ok((0, scopes))
    }

    fn collect_scopes(&self, die: Die, pc: u64, out: &mut SmallVec<[Die; 8]>) -> Result<()> {
        let tag = self.dwarf.tag(die)?;
        let is_scope = tag == DW_TAG_COMPILE_UNIT || tag == DW_TAG_SUBPROGRAM || tag == DW_TAG_LEXICAL_BLOCK;
        if is_scope {
            if tag == DW_TAG_COMPILE_UNIT || self.range_contains(die, pc)? {
                out.push(die);
                for child in self.dwarf.children(die) {
                    if matches!(self.dwarf.tag(child), Ok(t) if t == DW_TAG_SUBPROGRAM || t == DW_TAG_LEXICAL_BLOCK) {
                        self.collect_scopes(child, pc, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether `[DW_AT_low_pc, DW_AT_high_pc)` covers `pc`; DIEs using
    /// `DW_AT_ranges` instead report no coverage (§1: no ranges parser in
    /// this component set).
    fn range_contains(&self, die: Die, pc: u64) -> Result<bool> {
        let low = match self.dwarf.attr(die, DW_AT_LOW_PC)?.and_then(|v| v.as_udata()) {
            Some(v) => v,
            None => return Ok(false),
        };
        let high = match self.dwarf.attr(die, DW_AT_HIGH_PC)? {
            Some(AttributeValue::Addr(v)) => v,
            Some(v) => low + v.as_udata().unwrap_or(0),
            None => return Ok(false),
        };
        Ok(pc >= low && pc < high)
    }

    /// spec §6: `find_die_ancestors(die) -> dies[]`.
    pub fn find_die_ancestors(&self, die: Die) -> Result<SmallVec<[Die; 8]>> {
        self.dwarf.ancestors_of(die)
    }
}

/// Finds the nearest `DW_TAG_subprogram` ancestor, innermost first, used to
/// resolve `DW_AT_frame_base`/`fbreg` for a variable's location expression.
fn enclosing_subprogram(dwarf: &Dwarf<'_>, ancestors: &[Die]) -> Result<Option<Die>> {
    for &d in ancestors.iter().rev() {
        if dwarf.tag(d)? == DW_TAG_SUBPROGRAM {
            return Ok(Some(d));
        }
    }
    Ok(None)
}

/// spec §6: `find_dwarf_cfi(module, unbiased_pc) -> (cfi_row, signal_frame?, return_address_regno) | not_found`.
///
/// A thin re-export of [`crate::cfi::find_dwarf_cfi`] kept at this level so
/// callers that only need CFI (not types) can use one entry point alongside
/// `Session`'s methods without reaching into `cfi` directly.
pub fn find_dwarf_cfi<'d>(module: &'d dyn Module, unbiased_pc: u64) -> Result<CfiLookup> {
    crate::cfi::find_dwarf_cfi(module, unbiased_pc)
}

/// Builds and caches a [`CfiEngine`] for repeated lookups against the same
/// module; prefer this over [`find_dwarf_cfi`] when unwinding more than one
/// frame.
pub fn cfi_engine(module: &dyn Module) -> Result<CfiEngine<'_>> {
    CfiEngine::new(module)
}
