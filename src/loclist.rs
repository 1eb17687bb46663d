//! C5: resolves a `DW_AT_location`-shaped attribute to the expression bytes
//! covering one program counter, across all three DWARF location shapes.

use crate::consts::*;
use crate::die::{AttributeValue, Die, Dwarf};
use crate::error::{Error, Result};
use crate::module::SectionId;

/// Reads `attr` off `die` and resolves it to the DWARF expression bytes
/// applicable at `pc` (spec §4.5). Returns `Ok(None)` when the attribute is
/// absent, or when `pc` is unknown and the attribute is a location list
/// (an empty expression, which callers report as absent).
pub fn resolve_location_bytes<'d>(dwarf: &Dwarf<'d>, die: Die, attr: crate::consts::DwAt, pc: Option<u64>) -> Result<Option<&'d [u8]>> {
    let value = match dwarf.attr(die, attr)? {
        Some(v) => v,
        None => return Ok(None),
    };
    match value {
        AttributeValue::Block(b) | AttributeValue::Exprloc(b) => Ok(Some(b)),
        AttributeValue::SecOffset(off) => {
            let pc = match pc {
                Some(p) => p,
                None => return Ok(None),
            };
            let unit = dwarf.unit(die.unit);
            if unit.version >= 5 {
                parse_loclists_v5(dwarf, die.unit, off as usize, pc)
            } else {
                parse_loc_v4(dwarf, die.unit, off as usize, pc)
            }
        }
        AttributeValue::LocListsIndex(idx) => {
            let pc = match pc {
                Some(p) => p,
                None => return Ok(None),
            };
            let offset = loclistx_offset(dwarf, die.unit, idx)?;
            parse_loclists_v5(dwarf, die.unit, offset, pc)
        }
        _ => Err(Error::other("DW_AT_location has an unsupported attribute form")),
    }
}

fn loclistx_offset(dwarf: &Dwarf<'_>, unit_idx: usize, index: u64) -> Result<usize> {
    let unit = dwarf.unit(unit_idx);
    let base = dwarf.loclists_base(unit_idx)?;
    let mut buf = dwarf.section_buffer(SectionId::DebugLocLists);
    buf.seek(base as usize + index as usize * unit.offset_size as usize);
    let off = if unit.offset_size == 8 { buf.u64()? } else { buf.u32()? as u64 };
    Ok(off as usize)
}

fn low_pc_base(dwarf: &Dwarf<'_>, unit_idx: usize) -> Result<u64> {
    let root = dwarf.unit_root(unit_idx);
    Ok(dwarf.attr(root, DW_AT_LOW_PC)?.and_then(|v| v.as_udata()).unwrap_or(0))
}

fn parse_loc_v4<'d>(dwarf: &Dwarf<'d>, unit_idx: usize, offset: usize, pc: u64) -> Result<Option<&'d [u8]>> {
    let unit = dwarf.unit(unit_idx);
    let mut buf = dwarf.section_buffer(SectionId::DebugLoc).with_pos(offset);
    let addr_size = unit.address_size;
    let max_addr = if addr_size >= 8 { u64::MAX } else { (1u64 << (addr_size as u32 * 8)) - 1 };
    let mut base = low_pc_base(dwarf, unit_idx)?;
    loop {
        let start = buf.uint(addr_size)?;
        let end = buf.uint(addr_size)?;
        if start == 0 && end == 0 {
            return Ok(None);
        }
        if start == max_addr {
            base = end;
            continue;
        }
        let size = buf.u16()? as usize;
        let bytes = buf.block(size)?;
        let (lo, hi) = (base.wrapping_add(start), base.wrapping_add(end));
        if pc >= lo && pc < hi {
            return Ok(Some(bytes));
        }
    }
}

fn read_expr<'d>(buf: &mut crate::buffer::Buffer<'d>) -> Result<&'d [u8]> {
    let len = buf.uleb128()? as usize;
    buf.block(len)
}

fn parse_loclists_v5<'d>(dwarf: &Dwarf<'d>, unit_idx: usize, offset: usize, pc: u64) -> Result<Option<&'d [u8]>> {
    let unit = dwarf.unit(unit_idx);
    let addr_size = unit.address_size;
    let mut buf = dwarf.section_buffer(SectionId::DebugLocLists).with_pos(offset);
    let mut base = low_pc_base(dwarf, unit_idx)?;
    let mut ranged_match: Option<&'d [u8]> = None;
    let mut default_match: Option<&'d [u8]> = None;

    loop {
        let kind = buf.u8()?;
        let (start, end, bytes) = match kind {
            DW_LLE_END_OF_LIST => break,
            DW_LLE_BASE_ADDRESSX => {
                let idx = buf.uleb128()?;
                base = dwarf.address_at_index(unit_idx, idx)?;
                continue;
            }
            DW_LLE_BASE_ADDRESS => {
                base = buf.uint(addr_size)?;
                continue;
            }
            DW_LLE_STARTX_ENDX => {
                let si = buf.uleb128()?;
                let ei = buf.uleb128()?;
                let start = dwarf.address_at_index(unit_idx, si)?;
                let end = dwarf.address_at_index(unit_idx, ei)?;
                let bytes = read_expr(&mut buf)?;
                (start, end, bytes)
            }
            DW_LLE_STARTX_LENGTH => {
                let si = buf.uleb128()?;
                let len = buf.uleb128()?;
                let start = dwarf.address_at_index(unit_idx, si)?;
                let bytes = read_expr(&mut buf)?;
                (start, start.wrapping_add(len), bytes)
            }
            DW_LLE_OFFSET_PAIR => {
                let so = buf.uleb128()?;
                let eo = buf.uleb128()?;
                let bytes = read_expr(&mut buf)?;
                (base.wrapping_add(so), base.wrapping_add(eo), bytes)
            }
            DW_LLE_DEFAULT_LOCATION => {
                default_match = Some(read_expr(&mut buf)?);
                continue;
            }
            DW_LLE_START_END => {
                let start = buf.uint(addr_size)?;
                let end = buf.uint(addr_size)?;
                let bytes = read_expr(&mut buf)?;
                (start, end, bytes)
            }
            DW_LLE_START_LENGTH => {
                let start = buf.uint(addr_size)?;
                let len = buf.uleb128()?;
                let bytes = read_expr(&mut buf)?;
                (start, start.wrapping_add(len), bytes)
            }
            other => return Err(Error::other(format!("unsupported .debug_loclists entry kind {other:#x}"))),
        };
        if ranged_match.is_none() && pc >= start && pc < end {
            ranged_match = Some(bytes);
        }
    }
    Ok(ranged_match.or(default_match))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, Platform, SectionRef};

    fn uleb(mut v: u64) -> Vec<u8> {
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

    struct FixturePlatform;

    impl Platform for FixturePlatform {
        fn address_size(&self) -> u8 {
            8
        }
        fn is_little_endian(&self) -> bool {
            true
        }
        fn max_register(&self) -> u32 {
            32
        }
    }

    struct FixtureModule {
        debug_info: Vec<u8>,
        debug_abbrev: Vec<u8>,
        debug_loc: Vec<u8>,
        platform: FixturePlatform,
    }

    impl Module for FixtureModule {
        fn name(&self) -> &str {
            "fixture"
        }
        fn section(&self, id: SectionId) -> Option<SectionRef<'_>> {
            let bytes = match id {
                SectionId::DebugInfo => &self.debug_info,
                SectionId::DebugAbbrev => &self.debug_abbrev,
                SectionId::DebugLoc => &self.debug_loc,
                _ => return None,
            };
            Some(SectionRef { bytes, base_address: 0 })
        }
        fn platform(&self) -> &dyn Platform {
            &self.platform
        }
    }

    /// spec §8 scenario 3: a DWARF4 `.debug_loc` list with base 0, entries
    /// `(0x1000,0x1100,[reg0])` and `(0x1100,0x1200,[reg1])`.
    fn build_fixture() -> (FixtureModule, usize) {
        let mut abbrev = Vec::new();
        abbrev.extend(uleb(1));
        abbrev.extend(uleb(0x11)); // compile_unit
        abbrev.push(1); // has children
        abbrev.extend(uleb(0));
        abbrev.extend(uleb(0));

        abbrev.extend(uleb(2));
        abbrev.extend(uleb(DW_TAG_VARIABLE.0));
        abbrev.push(0);
        abbrev.extend(uleb(DW_AT_LOCATION.0));
        abbrev.extend(uleb(DW_FORM_SEC_OFFSET.0));
        abbrev.extend(uleb(0));
        abbrev.extend(uleb(0));
        abbrev.push(0);

        let mut info = vec![0u8; 4];
        info.extend_from_slice(&4u16.to_le_bytes()); // version 4
        info.extend_from_slice(&0u32.to_le_bytes()); // abbrev_offset
        info.push(8); // address_size
        info.extend(uleb(1)); // compile_unit
        let variable_offset = info.len();
        info.extend(uleb(2));
        info.extend_from_slice(&0u32.to_le_bytes()); // DW_AT_location: .debug_loc offset 0
        info.push(0); // end cu children
        let unit_length = (info.len() - 4) as u32;
        info[0..4].copy_from_slice(&unit_length.to_le_bytes());

        let mut debug_loc = Vec::new();
        debug_loc.extend_from_slice(&0x1000u64.to_le_bytes());
        debug_loc.extend_from_slice(&0x1100u64.to_le_bytes());
        debug_loc.extend_from_slice(&1u16.to_le_bytes());
        debug_loc.push(DW_OP_REG0);
        debug_loc.extend_from_slice(&0x1100u64.to_le_bytes());
        debug_loc.extend_from_slice(&0x1200u64.to_le_bytes());
        debug_loc.extend_from_slice(&1u16.to_le_bytes());
        debug_loc.push(DW_OP_REG0 + 1);
        debug_loc.extend_from_slice(&0u64.to_le_bytes());
        debug_loc.extend_from_slice(&0u64.to_le_bytes());

        (
            FixtureModule {
                debug_info: info,
                debug_abbrev: abbrev,
                debug_loc,
                platform: FixturePlatform,
            },
            variable_offset,
        )
    }

    #[test]
    fn dwarf4_location_list_selects_the_entry_covering_pc() {
        let (module, variable_offset) = build_fixture();
        let dwarf = Dwarf::from_module(&module).unwrap();
        let die = Die {
            unit: 0,
            offset: variable_offset,
        };

        let bytes = resolve_location_bytes(&dwarf, die, DW_AT_LOCATION, Some(0x1150)).unwrap();
        assert_eq!(bytes, Some(&[DW_OP_REG0 + 1][..]));
    }

    #[test]
    fn dwarf4_location_list_reports_absent_past_the_last_entry() {
        let (module, variable_offset) = build_fixture();
        let dwarf = Dwarf::from_module(&module).unwrap();
        let die = Die {
            unit: 0,
            offset: variable_offset,
        };

        let bytes = resolve_location_bytes(&dwarf, die, DW_AT_LOCATION, Some(0x1200)).unwrap();
        assert_eq!(bytes, None);
    }
}
