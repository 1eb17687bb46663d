//! C3: DIE cursor and the DWARF info/abbreviation parsing it rides on.
//!
//! A [`Die`] is deliberately a thin handle — a compilation-unit index plus a
//! byte offset — rather than a materialized tree node (spec §3: "A
//! compilation-unit-scoped pointer ... into `debug_info` or `debug_types`").
//! All the actual parsing (tag, attributes, children) happens on demand
//! through [`Dwarf`], so a `Die` is `Copy`, hashable, and cheap to stash in
//! a memoization map.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::buffer::{Buffer, Endian};
use crate::consts::*;
use crate::error::{Error, Result};
use crate::module::{Module, SectionId};

const DW_UT_TYPE: u8 = 0x02;
const DW_UT_SPLIT_TYPE: u8 = 0x06;

/// A handle to one Debugging Information Entry: which compilation unit it
/// lives in, and its byte offset (of the abbreviation-code byte) within
/// that unit's section.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Die {
    pub unit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
struct AttrSpec {
    attr: DwAt,
    form: DwForm,
    implicit_const: i64,
}

#[derive(Debug, Clone)]
struct AbbrevDecl {
    tag: DwTag,
    has_children: bool,
    attrs: SmallVec<[AttrSpec; 10]>,
}

#[derive(Debug, Default)]
struct AbbrevTable {
    decls: HashMap<u64, AbbrevDecl>,
}

impl AbbrevTable {
    fn parse(mut buf: Buffer<'_>) -> Result<Self> {
        let mut decls = HashMap::new();
        loop {
            if buf.is_empty() {
                break;
            }
            let code = buf.uleb128()?;
            if code == 0 {
                break;
            }
            let tag = DwTag(buf.uleb128()?);
            let has_children = buf.u8()? != 0;
            let mut attrs = SmallVec::new();
            loop {
                let attr = buf.uleb128()?;
                let form = buf.uleb128()?;
                if form == DW_FORM_IMPLICIT_CONST.0 {
                    let implicit_const = buf.sleb128()?;
                    if attr == 0 {
                        break;
                    }
                    attrs.push(AttrSpec {
                        attr: DwAt(attr),
                        form: DwForm(form),
                        implicit_const,
                    });
                } else {
                    if attr == 0 && form == 0 {
                        break;
                    }
                    attrs.push(AttrSpec {
                        attr: DwAt(attr),
                        form: DwForm(form),
                        implicit_const: 0,
                    });
                }
            }
            decls.insert(code, AbbrevDecl { tag, has_children, attrs });
        }
        Ok(AbbrevTable { decls })
    }
}

/// One compilation or type unit's header fields (spec §3, "CU").
pub struct Unit {
    pub section: SectionId,
    /// Offset of the unit header (the `unit_length` field) within its section.
    pub offset: usize,
    /// Offset of the first DIE (right after the header).
    pub first_die_offset: usize,
    /// Offset one past the unit's last byte.
    pub end_offset: usize,
    pub version: u16,
    pub address_size: u8,
    pub offset_size: u8,
    pub is_type_unit: bool,
    pub type_signature: u64,
    pub type_die_offset: usize,
    abbrevs: AbbrevTable,
    language: Cell<Option<u64>>,
    str_offsets_base: Cell<Option<u64>>,
    addr_base: Cell<Option<u64>>,
    loclists_base: Cell<Option<u64>>,
}

struct DieHeader {
    tag: DwTag,
    has_children: bool,
    /// Offset right after this DIE's attribute values: the first child
    /// (if `has_children`) or the next sibling/null terminator otherwise.
    next_offset: usize,
}

/// All parsed compilation/type units of one module, plus the raw section
/// bytes needed to resolve attribute values (spec §3 data model, and C3's
/// "pre-order walk across all compilation units").
pub struct Dwarf<'d> {
    pub(crate) module_name: Arc<str>,
    pub(crate) endian: Endian,
    debug_info: &'d [u8],
    debug_types: &'d [u8],
    debug_abbrev: &'d [u8],
    debug_str: &'d [u8],
    debug_line_str: &'d [u8],
    debug_str_offsets: &'d [u8],
    debug_addr: &'d [u8],
    debug_loc: &'d [u8],
    debug_loclists: &'d [u8],
    pub units: Vec<Unit>,
    first_type_unit: Option<usize>,
    signatures: HashMap<u64, usize>,
}

fn section_bytes<'d>(module: &'d dyn Module, id: SectionId) -> &'d [u8] {
    module.section(id).map(|s| s.bytes).unwrap_or(&[])
}

impl<'d> Dwarf<'d> {
    /// Parses every unit header in `.debug_info` then `.debug_types`
    /// (C3: "traversing `.debug_info` fully then `.debug_types`").
    pub fn from_module(module: &'d dyn Module) -> Result<Self> {
        let endian = if module.platform().is_little_endian() {
            Endian::Little
        } else {
            Endian::Big
        };
        let module_name: Arc<str> = Arc::from(module.name());
        let mut dwarf = Dwarf {
            module_name: module_name.clone(),
            endian,
            debug_info: section_bytes(module, SectionId::DebugInfo),
            debug_types: section_bytes(module, SectionId::DebugTypes),
            debug_abbrev: section_bytes(module, SectionId::DebugAbbrev),
            debug_str: section_bytes(module, SectionId::DebugStr),
            debug_line_str: section_bytes(module, SectionId::DebugLineStr),
            debug_str_offsets: section_bytes(module, SectionId::DebugStrOffsets),
            debug_addr: section_bytes(module, SectionId::DebugAddr),
            debug_loc: section_bytes(module, SectionId::DebugLoc),
            debug_loclists: section_bytes(module, SectionId::DebugLocLists),
            units: Vec::new(),
            first_type_unit: None,
            signatures: HashMap::new(),
        };
        dwarf.parse_units(SectionId::DebugInfo, dwarf.debug_info)?;
        if !dwarf.debug_types.is_empty() {
            dwarf.first_type_unit = Some(dwarf.units.len());
            dwarf.parse_units(SectionId::DebugTypes, dwarf.debug_types)?;
        }
        for (idx, unit) in dwarf.units.iter().enumerate() {
            if unit.is_type_unit {
                dwarf.signatures.insert(unit.type_signature, idx);
            }
        }
        Ok(dwarf)
    }

    pub(crate) fn section_buffer(&self, section: SectionId) -> Buffer<'d> {
        let bytes = match section {
            SectionId::DebugInfo => self.debug_info,
            SectionId::DebugTypes => self.debug_types,
            SectionId::DebugAbbrev => self.debug_abbrev,
            SectionId::DebugStr => self.debug_str,
            SectionId::DebugLineStr => self.debug_line_str,
            SectionId::DebugStrOffsets => self.debug_str_offsets,
            SectionId::DebugAddr => self.debug_addr,
            SectionId::DebugLoc => self.debug_loc,
            SectionId::DebugLocLists => self.debug_loclists,
            _ => &[],
        };
        Buffer::new(bytes, section, self.module_name.clone(), self.endian, 0)
    }

    fn parse_units(&mut self, section: SectionId, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            let unit = self.parse_unit_header(section, offset)?;
            offset = unit.end_offset;
            self.units.push(unit);
        }
        Ok(())
    }

    fn parse_unit_header(&self, section: SectionId, offset: usize) -> Result<Unit> {
        let mut buf = self.section_buffer(section).with_pos(offset);
        let mut unit_length = buf.u32()? as u64;
        let mut offset_size = 4u8;
        if unit_length == 0xffff_ffff {
            unit_length = buf.u64()?;
            offset_size = 8;
        }
        let end_offset = buf.pos() + unit_length as usize;
        let version = buf.u16()?;

        let (unit_type, address_size, abbrev_offset, is_type_unit, type_signature, type_die_offset);
        if version >= 5 {
            unit_type = buf.u8()?;
            address_size = buf.u8()?;
            abbrev_offset = read_offset(&mut buf, offset_size)?;
            is_type_unit = unit_type == DW_UT_TYPE || unit_type == DW_UT_SPLIT_TYPE;
            if is_type_unit {
                type_signature = buf.u64()?;
                type_die_offset = offset + read_offset(&mut buf, offset_size)? as usize;
            } else {
                type_signature = 0;
                type_die_offset = 0;
            }
        } else if section == SectionId::DebugTypes {
            abbrev_offset = read_offset(&mut buf, offset_size)?;
            address_size = buf.u8()?;
            is_type_unit = true;
            type_signature = buf.u64()?;
            type_die_offset = offset + read_offset(&mut buf, offset_size)? as usize;
        } else {
            abbrev_offset = read_offset(&mut buf, offset_size)?;
            address_size = buf.u8()?;
            is_type_unit = false;
            type_signature = 0;
            type_die_offset = 0;
        }

        let abbrevs = AbbrevTable::parse(self.section_buffer(SectionId::DebugAbbrev).with_pos(abbrev_offset as usize))?;

        Ok(Unit {
            section,
            offset,
            first_die_offset: buf.pos(),
            end_offset,
            version,
            address_size,
            offset_size,
            is_type_unit,
            type_signature,
            type_die_offset,
            abbrevs,
            language: Cell::new(None),
            str_offsets_base: Cell::new(None),
            addr_base: Cell::new(None),
            loclists_base: Cell::new(None),
        })
    }

    pub fn unit(&self, idx: usize) -> &Unit {
        &self.units[idx]
    }

    pub fn unit_root(&self, idx: usize) -> Die {
        Die {
            unit: idx,
            offset: self.units[idx].first_die_offset,
        }
    }

    pub fn unit_by_signature(&self, signature: u64) -> Option<usize> {
        self.signatures.get(&signature).copied()
    }

    /// Wraps a byte slice taken from some other decoded location (an
    /// expression block, a location-list entry) in a `Buffer` carrying this
    /// module's endianness, tagged with `section` for error messages.
    pub fn make_buffer(&self, section: SectionId, bytes: &'d [u8]) -> Buffer<'d> {
        Buffer::new(bytes, section, self.module_name.clone(), self.endian, 0)
    }

    fn die_buffer(&self, unit_idx: usize, offset: usize) -> Buffer<'d> {
        let unit = &self.units[unit_idx];
        self.section_buffer(unit.section).with_pos(offset)
    }

    /// Parses the abbreviation-code, tag and attribute bytes of the DIE at
    /// `die.offset`, returning `None` if it is a null (end-of-children)
    /// entry.
    fn die_header(&self, die: Die) -> Result<Option<DieHeader>> {
        let unit = &self.units[die.unit];
        let mut buf = self.die_buffer(die.unit, die.offset);
        let code = buf.uleb128()?;
        if code == 0 {
            return Ok(None);
        }
        let decl = unit
            .abbrevs
            .decls
            .get(&code)
            .ok_or_else(|| Error::other(format!("unknown abbreviation code {code}")))?;
        for spec in &decl.attrs {
            skip_form_value(&mut buf, spec.form, unit)?;
        }
        Ok(Some(DieHeader {
            tag: decl.tag,
            has_children: decl.has_children,
            next_offset: buf.pos(),
        }))
    }

    pub fn tag(&self, die: Die) -> Result<DwTag> {
        Ok(self.die_header(die)?.ok_or(Error::NotFound)?.tag)
    }

    pub fn has_children(&self, die: Die) -> Result<bool> {
        Ok(self.die_header(die)?.ok_or(Error::NotFound)?.has_children)
    }

    /// Finds and decodes one attribute of `die`, if present.
    pub fn attr(&self, die: Die, at: DwAt) -> Result<Option<AttributeValue<'d>>> {
        let unit = &self.units[die.unit];
        let mut buf = self.die_buffer(die.unit, die.offset);
        let code = buf.uleb128()?;
        if code == 0 {
            return Ok(None);
        }
        let decl = unit
            .abbrevs
            .decls
            .get(&code)
            .ok_or_else(|| Error::other(format!("unknown abbreviation code {code}")))?;
        for spec in &decl.attrs {
            if spec.attr == at {
                return Ok(Some(self.decode_form_value(&mut buf, spec, unit, die)?));
            }
            skip_form_value(&mut buf, spec.form, unit)?;
        }
        Ok(None)
    }

    pub fn children(&self, die: Die) -> DieChildren<'_, 'd> {
        DieChildren {
            dwarf: self,
            unit: die.unit,
            next: None,
            started: false,
            parent: die,
        }
    }

    /// The language of the compilation unit owning `die` (`DW_AT_language`
    /// on the CU root), read once and cached (spec §4.6 step 4).
    pub fn language(&self, unit_idx: usize) -> Result<Option<u64>> {
        let unit = &self.units[unit_idx];
        if let Some(lang) = unit.language.get() {
            return Ok(Some(lang));
        }
        let root = self.unit_root(unit_idx);
        let lang = match self.attr(root, DW_AT_LANGUAGE)? {
            Some(AttributeValue::Udata(v)) => Some(v),
            _ => None,
        };
        if let Some(v) = lang {
            unit.language.set(Some(v));
        }
        Ok(lang)
    }

    fn str_offsets_base(&self, unit_idx: usize) -> Result<u64> {
        let unit = &self.units[unit_idx];
        if let Some(v) = unit.str_offsets_base.get() {
            return Ok(v);
        }
        let root = self.unit_root(unit_idx);
        let v = match self.attr(root, DW_AT_STR_OFFSETS_BASE)? {
            Some(AttributeValue::SecOffset(v)) => v,
            // DWARF5 headers place a fixed 8-byte preamble before the array.
            _ => 8,
        };
        unit.str_offsets_base.set(Some(v));
        Ok(v)
    }

    fn addr_base(&self, unit_idx: usize) -> Result<u64> {
        let unit = &self.units[unit_idx];
        if let Some(v) = unit.addr_base.get() {
            return Ok(v);
        }
        let root = self.unit_root(unit_idx);
        let v = match self.attr(root, DW_AT_ADDR_BASE)? {
            Some(AttributeValue::SecOffset(v)) => v,
            _ => 8,
        };
        unit.addr_base.set(Some(v));
        Ok(v)
    }

    pub fn loclists_base(&self, unit_idx: usize) -> Result<u64> {
        let unit = &self.units[unit_idx];
        if let Some(v) = unit.loclists_base.get() {
            return Ok(v);
        }
        let root = self.unit_root(unit_idx);
        let v = match self.attr(root, DW_AT_LOCLISTS_BASE)? {
            Some(AttributeValue::SecOffset(v)) => v,
            _ => 0,
        };
        unit.loclists_base.set(Some(v));
        Ok(v)
    }

    pub fn address_at_index(&self, unit_idx: usize, index: u64) -> Result<u64> {
        let base = self.addr_base(unit_idx)?;
        let unit = &self.units[unit_idx];
        let mut buf = self.section_buffer(SectionId::DebugAddr);
        let pos = base as usize + index as usize * unit.address_size as usize;
        buf.seek(pos);
        buf.uint(unit.address_size)
    }

    fn string_at_index(&self, unit_idx: usize, index: u64) -> Result<&'d [u8]> {
        let base = self.str_offsets_base(unit_idx)?;
        let unit = &self.units[unit_idx];
        let width = unit.offset_size as usize;
        let mut buf = self.section_buffer(SectionId::DebugStrOffsets);
        buf.seek(base as usize + index as usize * width);
        let str_offset = read_offset(&mut buf, unit.offset_size)?;
        let mut sbuf = self.section_buffer(SectionId::DebugStr);
        sbuf.seek(str_offset as usize);
        sbuf.c_str()
    }

    fn decode_form_value(&self, buf: &mut Buffer<'d>, spec: &AttrSpec, unit: &Unit, die: Die) -> Result<AttributeValue<'d>> {
        use AttributeValue::*;
        Ok(match spec.form {
            DW_FORM_ADDR => Addr(buf.uint(unit.address_size)?),
            DW_FORM_BLOCK1 => {
                let len = buf.u8()? as usize;
                Block(buf.block(len)?)
            }
            DW_FORM_BLOCK2 => {
                let len = buf.u16()? as usize;
                Block(buf.block(len)?)
            }
            DW_FORM_BLOCK4 => {
                let len = buf.u32()? as usize;
                Block(buf.block(len)?)
            }
            DW_FORM_BLOCK | DW_FORM_EXPRLOC => {
                let len = buf.uleb128()? as usize;
                if spec.form == DW_FORM_EXPRLOC {
                    Exprloc(buf.block(len)?)
                } else {
                    Block(buf.block(len)?)
                }
            }
            DW_FORM_DATA1 => Udata(buf.u8()? as u64),
            DW_FORM_DATA2 => Udata(buf.u16()? as u64),
            DW_FORM_DATA4 => Udata(buf.u32()? as u64),
            DW_FORM_DATA8 => Udata(buf.u64()?),
            DW_FORM_DATA16 => Block(buf.block(16)?),
            DW_FORM_STRING => String(buf.c_str()?),
            DW_FORM_FLAG => Flag(buf.u8()? != 0),
            DW_FORM_FLAG_PRESENT => Flag(true),
            DW_FORM_SDATA => Sdata(buf.sleb128()?),
            DW_FORM_UDATA => Udata(buf.uleb128()?),
            DW_FORM_STRP => {
                let off = read_offset(buf, unit.offset_size)?;
                let mut sbuf = self.section_buffer(SectionId::DebugStr);
                sbuf.seek(off as usize);
                String(sbuf.c_str()?)
            }
            DW_FORM_LINE_STRP => {
                let off = read_offset(buf, unit.offset_size)?;
                let mut sbuf = self.section_buffer(SectionId::DebugLineStr);
                sbuf.seek(off as usize);
                String(sbuf.c_str()?)
            }
            DW_FORM_STRX => String(self.string_at_index(die.unit, buf.uleb128()?)?),
            DW_FORM_STRX1 => String(self.string_at_index(die.unit, buf.u8()? as u64)?),
            DW_FORM_STRX2 => String(self.string_at_index(die.unit, buf.u16()? as u64)?),
            DW_FORM_STRX3 => String(self.string_at_index(die.unit, buf.uint(3)?)?),
            DW_FORM_STRX4 => String(self.string_at_index(die.unit, buf.u32()? as u64)?),
            DW_FORM_ADDRX => Addr(self.address_at_index(die.unit, buf.uleb128()?)?),
            DW_FORM_ADDRX1 => Addr(self.address_at_index(die.unit, buf.u8()? as u64)?),
            DW_FORM_ADDRX2 => Addr(self.address_at_index(die.unit, buf.u16()? as u64)?),
            DW_FORM_ADDRX3 => Addr(self.address_at_index(die.unit, buf.uint(3)?)?),
            DW_FORM_ADDRX4 => Addr(self.address_at_index(die.unit, buf.u32()? as u64)?),
            DW_FORM_REF1 => Ref(Die {
                unit: die.unit,
                offset: unit.offset + buf.u8()? as usize,
            }),
            DW_FORM_REF2 => Ref(Die {
                unit: die.unit,
                offset: unit.offset + buf.u16()? as usize,
            }),
            DW_FORM_REF4 => Ref(Die {
                unit: die.unit,
                offset: unit.offset + buf.u32()? as usize,
            }),
            DW_FORM_REF8 => Ref(Die {
                unit: die.unit,
                offset: unit.offset + buf.u64()? as usize,
            }),
            DW_FORM_REF_UDATA => Ref(Die {
                unit: die.unit,
                offset: unit.offset + buf.uleb128()? as usize,
            }),
            DW_FORM_REF_ADDR => {
                let off = read_offset(buf, unit.offset_size)? as usize;
                match self.unit_containing_offset(unit.section, off) {
                    Some(u) => Ref(Die { unit: u, offset: off }),
                    None => return Err(Error::other("DW_FORM_ref_addr outside any known unit")),
                }
            }
            DW_FORM_REF_SIG8 => Signature(buf.u64()?),
            DW_FORM_SEC_OFFSET => SecOffset(read_offset(buf, unit.offset_size)?),
            DW_FORM_LOCLISTX => LocListsIndex(buf.uleb128()?),
            DW_FORM_RNGLISTX => Udata(buf.uleb128()?),
            DW_FORM_IMPLICIT_CONST => Sdata(spec.implicit_const),
            other => return Err(Error::other(format!("unsupported attribute form {:#x}", other.0))),
        })
    }

    /// Finds which unit in `section` contains byte `offset`, used to turn an
    /// absolute `ref_addr`/declaration-resolution offset back into a [`Die`].
    pub fn unit_at_offset(&self, section: SectionId, offset: usize) -> Option<usize> {
        self.unit_containing_offset(section, offset)
    }

    fn unit_containing_offset(&self, section: SectionId, offset: usize) -> Option<usize> {
        self.units
            .iter()
            .enumerate()
            .find(|(_, u)| u.section == section && offset >= u.offset && offset < u.end_offset)
            .map(|(i, _)| i)
    }

    fn peek_header(&self, unit: usize, offset: usize) -> Result<Option<DieHeader>> {
        self.die_header(Die { unit, offset })
    }

    fn sibling_offset(&self, die: Die) -> Result<Option<usize>> {
        match self.attr(die, DW_AT_SIBLING)? {
            Some(AttributeValue::Ref(d)) if d.unit == die.unit => Ok(Some(d.offset)),
            Some(AttributeValue::SecOffset(off)) => Ok(Some(off as usize)),
            _ => Ok(None),
        }
    }

    /// Scans past a subtree starting at its first child, counting nested
    /// null terminators, and returns the offset right after the enclosing
    /// null (C3: "otherwise by scanning children until a null terminator is
    /// crossed").
    fn scan_subtree_end(&self, unit: usize, mut offset: usize) -> Result<usize> {
        let mut depth = 0i64;
        loop {
            match self.peek_header(unit, offset)? {
                None => {
                    offset += 1;
                    if depth == 0 {
                        return Ok(offset);
                    }
                    depth -= 1;
                }
                Some(hdr) => {
                    offset = hdr.next_offset;
                    if hdr.has_children {
                        depth += 1;
                    }
                }
            }
        }
    }

    fn end_of_subtree(&self, die: Die, hdr: &DieHeader) -> Result<usize> {
        if !hdr.has_children {
            return Ok(hdr.next_offset);
        }
        match self.sibling_offset(die)? {
            Some(off) => Ok(off),
            None => self.scan_subtree_end(die.unit, hdr.next_offset),
        }
    }

    /// Reconstructs the ancestor chain (CU DIE first, `target` last) for a
    /// DIE known only by address (spec C3, "Ancestor reconstruction").
    pub fn ancestors_of(&self, target: Die) -> Result<SmallVec<[Die; 8]>> {
        let mut chain: SmallVec<[Die; 8]> = SmallVec::new();
        let mut node = self.unit_root(target.unit);
        loop {
            chain.push(node);
            if node == target {
                return Ok(chain);
            }
            let hdr = self.peek_header(node.unit, node.offset)?.ok_or(Error::NotFound)?;
            if !hdr.has_children {
                return Err(Error::NotFound);
            }
            let mut child_offset = hdr.next_offset;
            loop {
                let child = Die {
                    unit: node.unit,
                    offset: child_offset,
                };
                let child_hdr = match self.peek_header(node.unit, child_offset)? {
                    Some(h) => h,
                    None => return Err(Error::NotFound),
                };
                if child == target {
                    node = child;
                    break;
                }
                let end = self.end_of_subtree(child, &child_hdr)?;
                if target.offset >= child_offset && target.offset < end {
                    node = child;
                    break;
                }
                child_offset = end;
            }
        }
    }
}

fn read_offset(buf: &mut Buffer<'_>, offset_size: u8) -> Result<u64> {
    if offset_size == 8 {
        buf.u64()
    } else {
        Ok(buf.u32()? as u64)
    }
}

fn skip_form_value(buf: &mut Buffer<'_>, form: DwForm, unit: &Unit) -> Result<()> {
    match form {
        DW_FORM_ADDR => buf.skip(unit.address_size as usize)?,
        DW_FORM_BLOCK1 => {
            let len = buf.u8()? as usize;
            buf.skip(len)?;
        }
        DW_FORM_BLOCK2 => {
            let len = buf.u16()? as usize;
            buf.skip(len)?;
        }
        DW_FORM_BLOCK4 => {
            let len = buf.u32()? as usize;
            buf.skip(len)?;
        }
        DW_FORM_BLOCK | DW_FORM_EXPRLOC => {
            let len = buf.uleb128()? as usize;
            buf.skip(len)?;
        }
        DW_FORM_DATA1 | DW_FORM_FLAG | DW_FORM_STRX1 | DW_FORM_ADDRX1 => buf.skip(1)?,
        DW_FORM_DATA2 | DW_FORM_STRX2 | DW_FORM_ADDRX2 => buf.skip(2)?,
        DW_FORM_STRX3 | DW_FORM_ADDRX3 => buf.skip(3)?,
        DW_FORM_DATA4 | DW_FORM_STRX4 | DW_FORM_ADDRX4 | DW_FORM_REF4 => buf.skip(4)?,
        DW_FORM_DATA8 | DW_FORM_REF8 | DW_FORM_REF_SIG8 => buf.skip(8)?,
        DW_FORM_DATA16 => buf.skip(16)?,
        DW_FORM_STRING => {
            buf.c_str()?;
        }
        DW_FORM_FLAG_PRESENT | DW_FORM_IMPLICIT_CONST => {}
        DW_FORM_SDATA => {
            buf.sleb128()?;
        }
        DW_FORM_UDATA | DW_FORM_STRX | DW_FORM_ADDRX | DW_FORM_LOCLISTX | DW_FORM_RNGLISTX => {
            buf.uleb128()?;
        }
        DW_FORM_STRP | DW_FORM_LINE_STRP | DW_FORM_SEC_OFFSET | DW_FORM_REF_ADDR => {
            read_offset(buf, unit.offset_size)?;
        }
        DW_FORM_REF1 => buf.skip(1)?,
        DW_FORM_REF2 => buf.skip(2)?,
        DW_FORM_REF_UDATA => {
            buf.uleb128()?;
        }
        other => return Err(Error::other(format!("unsupported attribute form {:#x}", other.0))),
    }
    Ok(())
}

/// A decoded attribute value, with strings/blocks borrowed straight out of
/// the owning section's bytes.
#[derive(Debug, Clone, Copy)]
pub enum AttributeValue<'d> {
    Addr(u64),
    Udata(u64),
    Sdata(i64),
    Block(&'d [u8]),
    Exprloc(&'d [u8]),
    String(&'d [u8]),
    Flag(bool),
    SecOffset(u64),
    Ref(Die),
    Signature(u64),
    /// A `DW_FORM_loclistx` index, resolved against `DW_AT_loclists_base`
    /// rather than being a direct section offset.
    LocListsIndex(u64),
}

impl<'d> AttributeValue<'d> {
    pub fn as_udata(&self) -> Option<u64> {
        match *self {
            AttributeValue::Udata(v) => Some(v),
            AttributeValue::Sdata(v) if v >= 0 => Some(v as u64),
            AttributeValue::Addr(v) => Some(v),
            AttributeValue::SecOffset(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_sdata(&self) -> Option<i64> {
        match *self {
            AttributeValue::Sdata(v) => Some(v),
            AttributeValue::Udata(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            AttributeValue::Flag(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<Die> {
        match *self {
            AttributeValue::Ref(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&'d [u8]> {
        match *self {
            AttributeValue::Block(b) | AttributeValue::Exprloc(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'d str> {
        match *self {
            AttributeValue::String(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

/// Pre-order DIE walker across every unit in a [`Dwarf`] (C3).
pub struct DieCursor<'a, 'd> {
    dwarf: &'a Dwarf<'d>,
    stack: SmallVec<[Die; 16]>,
    current: Option<Die>,
}

impl<'a, 'd> DieCursor<'a, 'd> {
    pub fn new(dwarf: &'a Dwarf<'d>) -> Self {
        let current = if dwarf.units.is_empty() {
            None
        } else {
            Some(dwarf.unit_root(0))
        };
        DieCursor {
            dwarf,
            stack: SmallVec::new(),
            current,
        }
    }

    pub fn current(&self) -> Option<Die> {
        self.current
    }

    /// Depth of `current` below its owning CU root; `0` is the CU DIE
    /// itself. Used by callers implementing bounded subtree traversal
    /// (spec C3: "stopping when the stack pops back to it").
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn next_unit_root(&self, unit: usize) -> Option<Die> {
        let next = unit + 1;
        if next < self.dwarf.units.len() {
            Some(self.dwarf.unit_root(next))
        } else {
            None
        }
    }

    fn advance_from(&mut self, unit: usize, mut offset: usize) -> Result<Option<Die>> {
        loop {
            match self.dwarf.peek_header(unit, offset)? {
                None => {
                    offset += 1;
                    match self.stack.pop() {
                        Some(_) => continue,
                        None => return Ok(self.next_unit_root(unit)),
                    }
                }
                Some(_) => return Ok(Some(Die { unit, offset })),
            }
        }
    }

    /// Descends into `current`'s children if it has any; otherwise behaves
    /// like [`Self::step_over`].
    pub fn step_in(&mut self) -> Result<Option<Die>> {
        let cur = match self.current {
            Some(d) => d,
            None => return Ok(None),
        };
        let hdr = self.dwarf.peek_header(cur.unit, cur.offset)?.ok_or(Error::NotFound)?;
        if !hdr.has_children {
            return self.step_over();
        }
        self.stack.push(cur);
        self.current = self.advance_from(cur.unit, hdr.next_offset)?;
        Ok(self.current)
    }

    /// Skips `current`'s subtree entirely and moves to its next sibling
    /// (or the nearest ancestor's next sibling, or the next unit).
    pub fn step_over(&mut self) -> Result<Option<Die>> {
        let cur = match self.current {
            Some(d) => d,
            None => return Ok(None),
        };
        let hdr = self.dwarf.peek_header(cur.unit, cur.offset)?.ok_or(Error::NotFound)?;
        let skip_to = self.dwarf.end_of_subtree(cur, &hdr)?;
        self.current = self.advance_from(cur.unit, skip_to)?;
        Ok(self.current)
    }
}

/// Iterates the immediate children of one DIE.
pub struct DieChildren<'a, 'd> {
    dwarf: &'a Dwarf<'d>,
    unit: usize,
    next: Option<usize>,
    started: bool,
    parent: Die,
}

impl<'a, 'd> Iterator for DieChildren<'a, 'd> {
    type Item = Die;

    fn next(&mut self) -> Option<Die> {
        let offset = if !self.started {
            self.started = true;
            let hdr = self.dwarf.peek_header(self.parent.unit, self.parent.offset).ok()??;
            if !hdr.has_children {
                return None;
            }
            hdr.next_offset
        } else {
            self.next?
        };
        let hdr = self.dwarf.peek_header(self.unit, offset).ok()??;
        let this = Die { unit: self.unit, offset };
        let end = self.dwarf.end_of_subtree(this, &hdr).ok()?;
        self.next = Some(end);
        Some(this)
    }
}
