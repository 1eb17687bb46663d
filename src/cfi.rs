//! C8: parses Call Frame Information from `.debug_frame` and `.eh_frame` and
//! executes CFI opcodes to produce an unwind rule row for one PC.
//!
//! Generalized from the teacher's `dwarf::cfi`/`dwarf::instruction` (CIE/FDE
//! decode plus opcode interpreter), but reading through the bounds-checked
//! [`Buffer`] instead of raw process memory, covering both CFI sections
//! instead of `.eh_frame` alone, and replacing the teacher's intrusive
//! raw-pointer `RememberStack` (built to avoid allocation on a live,
//! signal-handler-reachable unwind path) with a plain `Vec` snapshot stack,
//! since this core's CFI engine is not constrained to run inside a signal
//! handler.

use std::collections::HashMap;

use crate::buffer::{Buffer, Endian};
use crate::cfi_expr;
use crate::consts::*;
use crate::die::Dwarf;
use crate::error::{Error, Result};
use crate::module::{BaseKind, MemoryReader, Module, RegisterState, SectionId};

/// The CFA's rule, one per row (spec §3, "CFI row").
#[derive(Debug, Clone)]
pub enum CfaRule {
    Undefined,
    RegisterOffset { register: u32, offset: i64 },
    Expression(Vec<u8>),
}

/// One register's rule within a row (spec §3, "CFI row" rule variants,
/// minus the CFA-only `dwarf_expression`/`register+offset` forms those
/// names describe — spelled out here as their concrete DWARF opcodes).
#[derive(Debug, Clone)]
pub enum RegisterRule {
    Undefined,
    SameValue,
    /// `DW_CFA_register`: this register's value is in register `_0`.
    Register(u32),
    /// `DW_CFA_offset`/`offset_extended[_sf]`: saved at `CFA + offset`.
    AtCfaOffset(i64),
    /// `DW_CFA_val_offset[_sf]`: this register's value *is* `CFA + offset`.
    CfaOffset(i64),
    /// `DW_CFA_expression`: saved at the address the expression evaluates to.
    AtExpression(Vec<u8>),
    /// `DW_CFA_val_expression`: this register's value is what the expression
    /// evaluates to.
    ValExpression(Vec<u8>),
}

/// An immutable (by convention — nothing prevents mutation, but callers
/// should treat a returned row as read-only) mapping of register rules plus
/// the CFA rule (spec §3, "CFI row").
#[derive(Debug, Clone)]
pub struct CfiRow {
    pub cfa: CfaRule,
    pub registers: HashMap<u32, RegisterRule>,
}

impl CfiRow {
    fn undefined() -> Self {
        CfiRow {
            cfa: CfaRule::Undefined,
            registers: HashMap::new(),
        }
    }

    pub fn register(&self, regno: u32) -> &RegisterRule {
        self.registers.get(&regno).unwrap_or(&RegisterRule::Undefined)
    }

    /// Resolves the CFA rule to a concrete address (spec §4.9).
    /// `register+offset` reads `registers` directly; `expression` runs the
    /// CFI expression evaluator (C9) with `push_cfa = false`, since there is
    /// no CFA yet to push while computing the CFA itself.
    pub fn resolve_cfa(&self, dwarf: &Dwarf<'_>, module: &dyn Module, registers: &dyn RegisterState, memory: Option<&dyn MemoryReader>) -> Result<u64> {
        match &self.cfa {
            CfaRule::Undefined => Err(Error::NotFound),
            CfaRule::RegisterOffset { register, offset } => {
                let base = registers.get(*register).ok_or(Error::NotFound)?;
                Ok((base as i64).wrapping_add(*offset) as u64)
            }
            CfaRule::Expression(expr) => {
                let ctx = cfi_expr::context(dwarf, module, registers, memory, None);
                cfi_expr::dwarf_expression(dwarf, &ctx, expr, None, false)
            }
        }
    }

    /// Resolves one register's rule to a concrete value, given the frame's
    /// already-resolved CFA (spec §4.9). `at_cfa_offset`/`at_expression`
    /// read `memory` at the computed address; `cfa_offset`/`val_expression`
    /// yield a value directly; `undefined`/`same_value` are left for the
    /// caller to interpret, since this core has no opinion on what "same" or
    /// "not recovered" should mean to an unwinder.
    pub fn resolve_register(
        &self,
        regno: u32,
        dwarf: &Dwarf<'_>,
        module: &dyn Module,
        registers: &dyn RegisterState,
        memory: Option<&dyn MemoryReader>,
        cfa: Option<u64>,
    ) -> Result<ResolvedRegister> {
        match self.register(regno) {
            RegisterRule::Undefined => Ok(ResolvedRegister::Undefined),
            RegisterRule::SameValue => Ok(ResolvedRegister::SameValue),
            RegisterRule::Register(r) => Ok(ResolvedRegister::Value(registers.get(*r).ok_or(Error::NotFound)?)),
            RegisterRule::AtCfaOffset(offset) => {
                let cfa = cfa.ok_or(Error::NotFound)?;
                let address = (cfa as i64).wrapping_add(*offset) as u64;
                let memory = memory.ok_or(Error::NotFound)?;
                let value = cfi_expr::read_target_address(module, memory, address, module.platform().address_size())?;
                Ok(ResolvedRegister::Value(value))
            }
            RegisterRule::CfaOffset(offset) => {
                let cfa = cfa.ok_or(Error::NotFound)?;
                Ok(ResolvedRegister::Value((cfa as i64).wrapping_add(*offset) as u64))
            }
            RegisterRule::AtExpression(expr) => {
                let ctx = cfi_expr::context(dwarf, module, registers, memory, cfa);
                Ok(ResolvedRegister::Value(cfi_expr::at_dwarf_expression(dwarf, &ctx, expr, cfa)?))
            }
            RegisterRule::ValExpression(expr) => {
                let ctx = cfi_expr::context(dwarf, module, registers, memory, cfa);
                Ok(ResolvedRegister::Value(cfi_expr::dwarf_expression(dwarf, &ctx, expr, cfa, true)?))
            }
        }
    }
}

/// A CFI register rule resolved against concrete registers/memory, the
/// result of [`CfiRow::resolve_register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedRegister {
    Undefined,
    SameValue,
    Value(u64),
}

struct Cie<'d> {
    is_eh: bool,
    version: u8,
    address_size: u8,
    code_alignment_factor: u64,
    data_alignment_factor: i64,
    return_address_register: u64,
    fde_pointer_encoding: u8,
    fdes_have_augmentation_data: bool,
    signal_frame: bool,
    initial_instructions: &'d [u8],
}

struct Fde<'d> {
    cie: usize,
    is_eh: bool,
    initial_location: u64,
    address_range: u64,
    instructions: &'d [u8],
}

/// Result of a successful frame lookup (spec §6, `find_dwarf_cfi`).
pub struct CfiLookup {
    pub row: CfiRow,
    pub signal_frame: bool,
    pub return_address_register: u64,
}

/// Owns one module's parsed CIEs and sorted, deduplicated FDE list. Callers
/// wanting to parallelize across modules create one instance per module
/// (spec §5), mirroring [`crate::types::TypeConstructor`]'s per-module
/// ownership.
pub struct CfiEngine<'d> {
    cies: Vec<Cie<'d>>,
    fdes: Vec<Fde<'d>>,
}

fn skip_encoded_value(buf: &mut Buffer<'_>, encoding: u8, address_size: u8) -> Result<()> {
    if encoding == DW_EH_PE_OMIT {
        return Ok(());
    }
    match encoding & 0x0f {
        DW_EH_PE_PTR => {
            buf.uint(address_size)?;
        }
        DW_EH_PE_ULEB128 => {
            buf.uleb128()?;
        }
        DW_EH_PE_UDATA2 => {
            buf.u16()?;
        }
        DW_EH_PE_UDATA4 => {
            buf.u32()?;
        }
        DW_EH_PE_UDATA8 => {
            buf.u64()?;
        }
        DW_EH_PE_SLEB128 => {
            buf.sleb128()?;
        }
        DW_EH_PE_SDATA2 => {
            buf.i16()?;
        }
        DW_EH_PE_SDATA4 => {
            buf.i32()?;
        }
        DW_EH_PE_SDATA8 => {
            buf.i64()?;
        }
        other => return Err(Error::other(format!("unsupported pointer value format {other:#x}"))),
    }
    Ok(())
}

/// Decodes one pointer encoded per `DW_EH_PE_*` (spec §4.2 base kinds).
/// `funcrel_initial_location` must be supplied when decoding fields that may
/// use the `funcrel` base (FDE augmentation data); it is `None` while
/// decoding the FDE header itself.
fn decode_encoded_pointer(buf: &mut Buffer<'_>, module: &dyn Module, encoding: u8, address_size: u8, funcrel_initial_location: Option<u64>) -> Result<u64> {
    if encoding == DW_EH_PE_OMIT {
        return Err(Error::other("expected an encoded pointer but the encoding is DW_EH_PE_omit"));
    }
    if encoding & DW_EH_PE_INDIRECT != 0 {
        return Err(Error::other("indirect pointer encodings are unsupported"));
    }
    let application = encoding & 0xf0;
    if application == DW_EH_PE_ALIGNED {
        let field_address = buf.absolute_pos();
        let aligned = BaseKind::Aligned {
            field_address,
            address_size,
        }
        .resolve(module)?;
        buf.skip((aligned - field_address) as usize)?;
    }
    let field_address = buf.absolute_pos();
    let raw = match encoding & 0x0f {
        DW_EH_PE_PTR => buf.uint(address_size)?,
        DW_EH_PE_ULEB128 => buf.uleb128()?,
        DW_EH_PE_UDATA2 => buf.u16()? as u64,
        DW_EH_PE_UDATA4 => buf.u32()? as u64,
        DW_EH_PE_UDATA8 => buf.u64()?,
        DW_EH_PE_SLEB128 => buf.sleb128()? as u64,
        DW_EH_PE_SDATA2 => buf.i16()? as i64 as u64,
        DW_EH_PE_SDATA4 => buf.i32()? as i64 as u64,
        DW_EH_PE_SDATA8 => buf.i64()? as u64,
        other => return Err(Error::other(format!("unsupported pointer value format {other:#x}"))),
    };
    Ok(match application {
        DW_EH_PE_ABSPTR | DW_EH_PE_ALIGNED => raw,
        DW_EH_PE_PCREL => BaseKind::PcRel { field_address }.resolve(module)?.wrapping_add(raw),
        DW_EH_PE_TEXTREL => BaseKind::TextRel.resolve(module)?.wrapping_add(raw),
        DW_EH_PE_DATAREL => BaseKind::DataRel.resolve(module)?.wrapping_add(raw),
        DW_EH_PE_FUNCREL => {
            let initial_location = funcrel_initial_location.ok_or_else(|| Error::other("funcrel pointer encoding used outside an FDE"))?;
            BaseKind::FuncRel { initial_location }.resolve(module)?.wrapping_add(raw)
        }
        other => return Err(Error::other(format!("unsupported pointer base application {other:#x}"))),
    })
}

fn parse_cie<'d>(buf: &mut Buffer<'d>, content_end: usize, is_eh: bool, module: &dyn Module, platform_address_size: u8) -> Result<Cie<'d>> {
    let version = buf.u8()?;
    if version == 2 || version == 0 || version > 4 {
        return Err(Error::other(format!("unsupported CIE version {version}")));
    }
    let aug_str = buf.c_str()?;
    let (address_size, _segment_selector_size) = if version >= 4 && !is_eh {
        (buf.u8()?, buf.u8()?)
    } else {
        (platform_address_size, 0)
    };
    let code_alignment_factor = buf.uleb128()?;
    let data_alignment_factor = buf.sleb128()?;
    let return_address_register = if version == 1 { buf.u8()? as u64 } else { buf.uleb128()? };

    let mut fde_pointer_encoding = DW_EH_PE_ABSPTR | DW_EH_PE_PTR;
    let mut signal_frame = false;
    let fdes_have_augmentation_data = aug_str.first() == Some(&b'z');

    if fdes_have_augmentation_data {
        let aug_len = buf.uleb128()?;
        let aug_data_end = buf.pos() + aug_len as usize;
        for &c in &aug_str[1..] {
            match c {
                b'z' => {}
                b'L' => {
                    buf.u8()?;
                }
                b'P' => {
                    let enc = buf.u8()?;
                    skip_encoded_value(buf, enc, address_size)?;
                }
                b'R' => {
                    fde_pointer_encoding = buf.u8()?;
                }
                b'S' => {
                    signal_frame = true;
                }
                other => return Err(Error::other(format!("unsupported CIE augmentation character {:?}", other as char))),
            }
        }
        buf.seek(aug_data_end);
    } else if !aug_str.is_empty() {
        return Err(Error::other("unsupported CIE augmentation string (expected it to start with 'z' or be empty)"));
    }

    let initial_instructions = buf.block(content_end - buf.pos())?;
    Ok(Cie {
        is_eh,
        version,
        address_size,
        code_alignment_factor,
        data_alignment_factor,
        return_address_register,
        fde_pointer_encoding,
        fdes_have_augmentation_data,
        signal_frame,
        initial_instructions,
    })
}

fn parse_fde<'d>(buf: &mut Buffer<'d>, content_end: usize, cie_idx: usize, cie: &Cie<'d>, is_eh: bool, module: &dyn Module) -> Result<Fde<'d>> {
    let initial_location = decode_encoded_pointer(buf, module, cie.fde_pointer_encoding, cie.address_size, None)?;
    let address_range = decode_encoded_pointer(buf, module, cie.fde_pointer_encoding & 0x0f, cie.address_size, None)?;
    if cie.fdes_have_augmentation_data {
        let aug_len = buf.uleb128()?;
        buf.skip(aug_len as usize)?;
    }
    let instructions = buf.block(content_end - buf.pos())?;
    Ok(Fde {
        cie: cie_idx,
        is_eh,
        initial_location,
        address_range,
        instructions,
    })
}

fn parse_section<'d>(module: &'d dyn Module, section_id: SectionId, is_eh: bool, cies: &mut Vec<Cie<'d>>, fdes: &mut Vec<Fde<'d>>) -> Result<()> {
    let section = match module.section(section_id) {
        Some(s) => s,
        None => return Ok(()),
    };
    if section.bytes.is_empty() {
        return Ok(());
    }
    let endian = if module.platform().is_little_endian() { Endian::Little } else { Endian::Big };
    let module_name: std::sync::Arc<str> = std::sync::Arc::from(module.name());
    let platform_address_size = module.platform().address_size();

    let mut cie_at_offset: HashMap<usize, usize> = HashMap::new();
    let mut offset = 0usize;
    while offset < section.bytes.len() {
        let mut buf = Buffer::new(section.bytes, section_id, module_name.clone(), endian, section.base_address).with_pos(offset);
        let mut length = buf.u32()? as u64;
        let mut offset_size = 4u8;
        if length == 0xffff_ffff {
            length = buf.u64()?;
            offset_size = 8;
        }
        if length == 0 {
            break;
        }
        let content_start = buf.pos();
        let content_end = content_start + length as usize;
        let id_field_pos = buf.pos();
        let id = buf.dwarf_offset(offset_size)?;

        let is_cie = if is_eh {
            id == 0
        } else {
            (offset_size == 4 && id == 0xffff_ffff) || (offset_size == 8 && id == 0xffff_ffff_ffff_ffff)
        };

        if is_cie {
            let cie = parse_cie(&mut buf, content_end, is_eh, module, platform_address_size)?;
            cie_at_offset.insert(offset, cies.len());
            cies.push(cie);
        } else {
            let cie_offset = if is_eh {
                (id_field_pos as u64).checked_sub(id).ok_or_else(|| Error::other("eh_frame FDE cie_pointer underflows the section"))? as usize
            } else {
                id as usize
            };
            let cie_idx = *cie_at_offset
                .get(&cie_offset)
                .ok_or_else(|| Error::other("FDE references a CIE offset this core has not parsed"))?;
            let fde = parse_fde(&mut buf, content_end, cie_idx, &cies[cie_idx], is_eh, module)?;
            fdes.push(fde);
        }
        offset = content_end;
    }
    Ok(())
}

fn advance_pc(current_pc: u64, delta: u64, code_alignment_factor: u64) -> Result<u64> {
    let d = delta.checked_mul(code_alignment_factor).ok_or(Error::Overflow("code_alignment_factor"))?;
    current_pc.checked_add(d).ok_or(Error::Overflow("CFI pc advance"))
}

fn scaled(factor: i64, data_alignment_factor: i64) -> Result<i64> {
    factor.checked_mul(data_alignment_factor).ok_or(Error::Overflow("data_alignment_factor"))
}

fn restore_register(regno: u32, row: &mut CfiRow, initial_row: &CfiRow) {
    match initial_row.registers.get(&regno) {
        Some(rule) => {
            row.registers.insert(regno, rule.clone());
        }
        None => {
            row.registers.remove(&regno);
        }
    }
}

/// Executes one instruction stream (CIE initial instructions, or an FDE's).
/// `initial_row` is `None` while running a CIE's own initial instructions
/// (where advance and restore opcodes are illegal); otherwise it is the row
/// snapshot taken right after the CIE pass, used by `restore[_extended]`.
///
/// Returns `true` if execution stopped early because an advance opcode
/// would have pushed `current_pc` past `target_pc` — the caller's `row` is
/// the answer as of just before that advance.
fn run_instructions(buf: &[u8], cie: &Cie<'_>, row: &mut CfiRow, initial_row: Option<&CfiRow>, current_pc: &mut u64, target_pc: u64, remember_stack: &mut Vec<CfiRow>) -> Result<bool> {
    let mut pos = 0usize;
    let is_advance_legal = initial_row.is_some();
    while pos < buf.len() {
        let opcode = buf[pos];
        pos += 1;
        let high = opcode & DW_CFA_HIGH_MASK;
        let low = (opcode & DW_CFA_OPERAND_MASK) as u32;

        macro_rules! uleb {
            () => {{
                let (v, n) = read_uleb128(buf, pos)?;
                pos += n;
                v
            }};
        }
        macro_rules! sleb {
            () => {{
                let (v, n) = read_sleb128(buf, pos)?;
                pos += n;
                v
            }};
        }
        macro_rules! advance_or_stop {
            ($delta:expr) => {{
                if !is_advance_legal {
                    return Err(Error::other("advance-location opcode in CIE initial instructions"));
                }
                let new_pc = advance_pc(*current_pc, $delta, cie.code_alignment_factor)?;
                if new_pc > target_pc {
                    return Ok(true);
                }
                *current_pc = new_pc;
            }};
        }

        if high == DW_CFA_ADVANCE_LOC {
            advance_or_stop!(low as u64);
            continue;
        }
        if high == DW_CFA_OFFSET {
            let n = uleb!();
            row.registers.insert(low, RegisterRule::AtCfaOffset(scaled(n as i64, cie.data_alignment_factor)?));
            continue;
        }
        if high == DW_CFA_RESTORE {
            let initial = initial_row.ok_or_else(|| Error::other("restore opcode in CIE initial instructions"))?;
            restore_register(low, row, initial);
            continue;
        }

        match opcode {
            DW_CFA_NOP => {}
            DW_CFA_SET_LOC => {
                if !is_advance_legal {
                    return Err(Error::other("set_loc opcode in CIE initial instructions"));
                }
                if pos + cie.address_size as usize > buf.len() {
                    return Err(Error::other("truncated DW_CFA_set_loc operand"));
                }
                let mut v = 0u64;
                for i in 0..cie.address_size as usize {
                    v |= (buf[pos + i] as u64) << (8 * i);
                }
                pos += cie.address_size as usize;
                if v > target_pc {
                    return Ok(true);
                }
                *current_pc = v;
            }
            DW_CFA_ADVANCE_LOC1 => {
                let d = *buf.get(pos).ok_or_else(|| Error::other("truncated advance_loc1"))? as u64;
                pos += 1;
                advance_or_stop!(d);
            }
            DW_CFA_ADVANCE_LOC2 => {
                let bytes = buf.get(pos..pos + 2).ok_or_else(|| Error::other("truncated advance_loc2"))?;
                let d = u16::from_le_bytes([bytes[0], bytes[1]]) as u64;
                pos += 2;
                advance_or_stop!(d);
            }
            DW_CFA_ADVANCE_LOC4 => {
                let bytes = buf.get(pos..pos + 4).ok_or_else(|| Error::other("truncated advance_loc4"))?;
                let d = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
                pos += 4;
                advance_or_stop!(d);
            }
            DW_CFA_OFFSET_EXTENDED => {
                let r = uleb!() as u32;
                let n = uleb!() as i64;
                row.registers.insert(r, RegisterRule::AtCfaOffset(scaled(n, cie.data_alignment_factor)?));
            }
            DW_CFA_RESTORE_EXTENDED => {
                let r = uleb!() as u32;
                let initial = initial_row.ok_or_else(|| Error::other("restore_extended opcode in CIE initial instructions"))?;
                restore_register(r, row, initial);
            }
            DW_CFA_UNDEFINED => {
                let r = uleb!() as u32;
                row.registers.insert(r, RegisterRule::Undefined);
            }
            DW_CFA_SAME_VALUE => {
                let r = uleb!() as u32;
                row.registers.insert(r, RegisterRule::SameValue);
            }
            DW_CFA_REGISTER => {
                let r1 = uleb!() as u32;
                let r2 = uleb!() as u32;
                row.registers.insert(r1, RegisterRule::Register(r2));
            }
            DW_CFA_REMEMBER_STATE => {
                remember_stack.push(row.clone());
            }
            DW_CFA_RESTORE_STATE => {
                *row = remember_stack.pop().ok_or_else(|| Error::other("restore_state with an empty state stack"))?;
            }
            DW_CFA_DEF_CFA => {
                let r = uleb!() as u32;
                let off = uleb!() as i64;
                row.cfa = CfaRule::RegisterOffset { register: r, offset: off };
            }
            DW_CFA_DEF_CFA_REGISTER => {
                let r = uleb!() as u32;
                match &mut row.cfa {
                    CfaRule::RegisterOffset { register, .. } => *register = r,
                    _ => return Err(Error::other("def_cfa_register without a prior register+offset CFA rule")),
                }
            }
            DW_CFA_DEF_CFA_OFFSET => {
                let off = uleb!() as i64;
                match &mut row.cfa {
                    CfaRule::RegisterOffset { offset, .. } => *offset = off,
                    _ => return Err(Error::other("def_cfa_offset without a prior register+offset CFA rule")),
                }
            }
            DW_CFA_DEF_CFA_EXPRESSION => {
                let len = uleb!() as usize;
                let block = buf.get(pos..pos + len).ok_or_else(|| Error::other("truncated def_cfa_expression block"))?;
                pos += len;
                row.cfa = CfaRule::Expression(block.to_vec());
            }
            DW_CFA_EXPRESSION => {
                let r = uleb!() as u32;
                let len = uleb!() as usize;
                let block = buf.get(pos..pos + len).ok_or_else(|| Error::other("truncated expression block"))?;
                pos += len;
                row.registers.insert(r, RegisterRule::AtExpression(block.to_vec()));
            }
            DW_CFA_OFFSET_EXTENDED_SF => {
                let r = uleb!() as u32;
                let off = sleb!();
                row.registers.insert(r, RegisterRule::AtCfaOffset(scaled(off, cie.data_alignment_factor)?));
            }
            DW_CFA_DEF_CFA_SF => {
                let r = uleb!() as u32;
                let off = sleb!();
                row.cfa = CfaRule::RegisterOffset {
                    register: r,
                    offset: scaled(off, cie.data_alignment_factor)?,
                };
            }
            DW_CFA_DEF_CFA_OFFSET_SF => {
                let off = sleb!();
                let scaled_off = scaled(off, cie.data_alignment_factor)?;
                match &mut row.cfa {
                    CfaRule::RegisterOffset { offset, .. } => *offset = scaled_off,
                    _ => return Err(Error::other("def_cfa_offset_sf without a prior register+offset CFA rule")),
                }
            }
            DW_CFA_VAL_OFFSET => {
                let r = uleb!() as u32;
                let off = uleb!() as i64;
                row.registers.insert(r, RegisterRule::CfaOffset(scaled(off, cie.data_alignment_factor)?));
            }
            DW_CFA_VAL_OFFSET_SF => {
                let r = uleb!() as u32;
                let off = sleb!();
                row.registers.insert(r, RegisterRule::CfaOffset(scaled(off, cie.data_alignment_factor)?));
            }
            DW_CFA_VAL_EXPRESSION => {
                let r = uleb!() as u32;
                let len = uleb!() as usize;
                let block = buf.get(pos..pos + len).ok_or_else(|| Error::other("truncated val_expression block"))?;
                pos += len;
                row.registers.insert(r, RegisterRule::ValExpression(block.to_vec()));
            }
            DW_CFA_GNU_ARGS_SIZE => {
                uleb!();
            }
            other => return Err(Error::other(format!("unsupported CFI opcode {other:#x}"))),
        }
    }
    Ok(false)
}

fn read_uleb128(buf: &[u8], mut pos: usize) -> Result<(u64, usize)> {
    let start = pos;
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(pos).ok_or_else(|| Error::other("truncated ULEB128 in CFI instruction stream"))?;
        pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((result, pos - start))
}

fn read_sleb128(buf: &[u8], mut pos: usize) -> Result<(i64, usize)> {
    let start = pos;
    let mut result = 0i64;
    let mut shift = 0u32;
    let mut byte;
    loop {
        byte = *buf.get(pos).ok_or_else(|| Error::other("truncated SLEB128 in CFI instruction stream"))?;
        pos += 1;
        result |= ((byte & 0x7f) as i64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if shift < 64 && byte & 0x40 != 0 {
        result |= -1i64 << shift;
    }
    Ok((result, pos - start))
}

impl<'d> CfiEngine<'d> {
    /// Parses every CIE/FDE in `.debug_frame` then `.eh_frame`, sorts and
    /// deduplicates the combined FDE list (spec §4.8, §3 invariant). One
    /// instance should be built and reused per module.
    pub fn new(module: &'d dyn Module) -> Result<Self> {
        let mut cies = Vec::new();
        let mut fdes = Vec::new();
        parse_section(module, SectionId::DebugFrame, false, &mut cies, &mut fdes)?;
        parse_section(module, SectionId::EhFrame, true, &mut cies, &mut fdes)?;

        fdes.sort_by_key(|f| (f.initial_location, f.is_eh));
        fdes.dedup_by_key(|f| f.initial_location);

        Ok(CfiEngine { cies, fdes })
    }

    fn find_fde(&self, unbiased_pc: u64) -> Option<&Fde<'d>> {
        let idx = self
            .fdes
            .binary_search_by(|fde| {
                if unbiased_pc < fde.initial_location {
                    std::cmp::Ordering::Greater
                } else if unbiased_pc >= fde.initial_location.wrapping_add(fde.address_range) {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()?;
        Some(&self.fdes[idx])
    }

    /// Builds the CFI row applicable at `unbiased_pc` (spec §4.8).
    pub fn lookup(&self, unbiased_pc: u64) -> Result<CfiLookup> {
        let fde = self.find_fde(unbiased_pc).ok_or(Error::NotFound)?;
        let cie = &self.cies[fde.cie];

        let mut remember_stack = Vec::new();
        let mut initial_row = CfiRow::undefined();
        let mut dummy_pc = 0u64;
        run_instructions(cie.initial_instructions, cie, &mut initial_row, None, &mut dummy_pc, u64::MAX, &mut remember_stack)?;

        let mut row = initial_row.clone();
        let mut current_pc = fde.initial_location;
        run_instructions(fde.instructions, cie, &mut row, Some(&initial_row), &mut current_pc, unbiased_pc, &mut remember_stack)?;

        Ok(CfiLookup {
            row,
            signal_frame: cie.signal_frame,
            return_address_register: cie.return_address_register,
        })
    }
}

/// Convenience one-shot lookup for callers that do not need to reuse a
/// [`CfiEngine`] across multiple PCs in the same module.
pub fn find_dwarf_cfi<'d>(module: &'d dyn Module, unbiased_pc: u64) -> Result<CfiLookup> {
    CfiEngine::new(module)?.lookup(unbiased_pc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::SectionRef;
    use std::cell::RefCell;

    struct TestPlatform;

    impl crate::module::Platform for TestPlatform {
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

    struct TestModule {
        platform: TestPlatform,
    }

    impl Module for TestModule {
        fn name(&self) -> &str {
            "test"
        }
        fn section(&self, _id: SectionId) -> Option<SectionRef<'_>> {
            None
        }
        fn platform(&self) -> &dyn crate::module::Platform {
            &self.platform
        }
    }

    #[derive(Default)]
    struct TestRegisters {
        values: HashMap<u32, u64>,
    }

    impl RegisterState for TestRegisters {
        fn has(&self, regno: u32) -> bool {
            self.values.contains_key(&regno)
        }
        fn get(&self, regno: u32) -> Option<u64> {
            self.values.get(&regno).copied()
        }
        fn pc(&self) -> Option<u64> {
            None
        }
        fn cfa(&self) -> Option<u64> {
            None
        }
    }

    #[derive(Default)]
    struct TestMemory {
        data: RefCell<HashMap<u64, Vec<u8>>>,
    }

    impl TestMemory {
        fn set(&self, address: u64, bytes: &[u8]) {
            self.data.borrow_mut().insert(address, bytes.to_vec());
        }
    }

    impl MemoryReader for TestMemory {
        fn read(&self, address: u64, len: usize, _physical: bool) -> Result<Vec<u8>> {
            let data = self.data.borrow();
            for (&base, bytes) in data.iter() {
                if address >= base && address + len as u64 <= base + bytes.len() as u64 {
                    let start = (address - base) as usize;
                    return Ok(bytes[start..start + len].to_vec());
                }
            }
            Err(Error::NotFound)
        }
    }

    #[test]
    fn resolve_cfa_register_offset_reads_registers() {
        let module = TestModule { platform: TestPlatform };
        let dwarf = Dwarf::from_module(&module).unwrap();
        let mut values = HashMap::new();
        values.insert(7, 0x1000u64);
        let registers = TestRegisters { values };
        let row = CfiRow {
            cfa: CfaRule::RegisterOffset { register: 7, offset: 16 },
            registers: HashMap::new(),
        };

        assert_eq!(row.resolve_cfa(&dwarf, &module, &registers, None).unwrap(), 0x1010);
    }

    #[test]
    fn resolve_cfa_expression_runs_through_the_cfi_expression_evaluator() {
        let module = TestModule { platform: TestPlatform };
        let dwarf = Dwarf::from_module(&module).unwrap();
        let registers = TestRegisters::default();
        let row = CfiRow {
            cfa: CfaRule::Expression(vec![DW_OP_CONST1U, 42]),
            registers: HashMap::new(),
        };

        assert_eq!(row.resolve_cfa(&dwarf, &module, &registers, None).unwrap(), 42);
    }

    #[test]
    fn resolve_register_at_cfa_offset_reads_the_saved_value_from_memory() {
        let module = TestModule { platform: TestPlatform };
        let dwarf = Dwarf::from_module(&module).unwrap();
        let registers = TestRegisters::default();
        let memory = TestMemory::default();
        let cfa = 0x2000u64;
        memory.set(cfa - 8, &0xdead_beefu64.to_le_bytes());

        let mut row = CfiRow::undefined();
        row.registers.insert(6, RegisterRule::AtCfaOffset(-8));

        let resolved = row.resolve_register(6, &dwarf, &module, &registers, Some(&memory), Some(cfa)).unwrap();
        assert_eq!(resolved, ResolvedRegister::Value(0xdead_beef));
    }

    #[test]
    fn resolve_register_at_expression_reads_memory_at_the_computed_address() {
        let module = TestModule { platform: TestPlatform };
        let dwarf = Dwarf::from_module(&module).unwrap();
        let registers = TestRegisters::default();
        let memory = TestMemory::default();
        memory.set(0x2000, &0xdead_beefu64.to_le_bytes());

        // const2u 0x2000: pushes the address to read the register's saved value from.
        let mut row = CfiRow::undefined();
        row.registers.insert(16, RegisterRule::AtExpression(vec![DW_OP_CONST2U, 0x00, 0x20]));

        let resolved = row
            .resolve_register(16, &dwarf, &module, &registers, Some(&memory), Some(0x1234))
            .unwrap();
        assert_eq!(resolved, ResolvedRegister::Value(0xdead_beef));
    }

    #[test]
    fn resolve_register_val_expression_yields_the_expression_result_directly() {
        let module = TestModule { platform: TestPlatform };
        let dwarf = Dwarf::from_module(&module).unwrap();
        let registers = TestRegisters::default();

        let mut row = CfiRow::undefined();
        row.registers.insert(3, RegisterRule::ValExpression(vec![DW_OP_CONST1U, 7]));

        let resolved = row.resolve_register(3, &dwarf, &module, &registers, None, Some(0x1234)).unwrap();
        assert_eq!(resolved, ResolvedRegister::Value(7));
    }

    #[test]
    fn resolve_register_undefined_and_same_value_are_not_resolved_to_a_value() {
        let module = TestModule { platform: TestPlatform };
        let dwarf = Dwarf::from_module(&module).unwrap();
        let registers = TestRegisters::default();

        let mut row = CfiRow::undefined();
        row.registers.insert(9, RegisterRule::SameValue);

        assert_eq!(
            row.resolve_register(9, &dwarf, &module, &registers, None, None).unwrap(),
            ResolvedRegister::SameValue
        );
        assert_eq!(
            row.resolve_register(99, &dwarf, &module, &registers, None, None).unwrap(),
            ResolvedRegister::Undefined
        );
    }

    fn uleb(v: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let mut v = v;
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

    fn make_cie(code_af: u64, data_af: i64) -> Cie<'static> {
        Cie {
            is_eh: false,
            version: 3,
            address_size: 8,
            code_alignment_factor: code_af,
            data_alignment_factor: data_af,
            return_address_register: 16,
            fde_pointer_encoding: DW_EH_PE_ABSPTR,
            fdes_have_augmentation_data: false,
            signal_frame: false,
            initial_instructions: &[],
        }
    }

    #[test]
    fn cfi_row_worked_example() {
        // def_cfa(r7, 8); offset(r16, -8)
        let mut initial_instrs = vec![DW_CFA_DEF_CFA];
        initial_instrs.extend(uleb(7));
        initial_instrs.extend(uleb(8));
        initial_instrs.push(DW_CFA_OFFSET | 16);
        initial_instrs.extend(uleb(1)); // factor 1 * data_alignment_factor(-8) = -8

        // advance_loc(4); def_cfa_offset(16)
        let fde_instrs = vec![DW_CFA_ADVANCE_LOC | 4, DW_CFA_DEF_CFA_OFFSET, 16];

        let mut cie = make_cie(1, -8);
        cie.initial_instructions = Box::leak(initial_instrs.into_boxed_slice());

        let mut remember = Vec::new();
        let mut initial_row = CfiRow::undefined();
        let mut dummy = 0u64;
        run_instructions(cie.initial_instructions, &cie, &mut initial_row, None, &mut dummy, u64::MAX, &mut remember).unwrap();

        match initial_row.cfa {
            CfaRule::RegisterOffset { register: 7, offset: 8 } => {}
            _ => panic!("unexpected CFA rule after initial instructions"),
        }
        match initial_row.register(16) {
            RegisterRule::AtCfaOffset(-8) => {}
            other => panic!("unexpected r16 rule: {other:?}"),
        }

        // target_pc = initial_location + 3: before the advance_loc(4) takes effect.
        let mut row = initial_row.clone();
        let mut pc = 1000u64;
        let stopped = run_instructions(&fde_instrs, &cie, &mut row, Some(&initial_row), &mut pc, 1003, &mut remember).unwrap();
        assert!(stopped);
        match row.cfa {
            CfaRule::RegisterOffset { register: 7, offset: 8 } => {}
            _ => panic!("CFA should be unchanged before the advance"),
        }

        // target_pc = initial_location + 10: past the advance, def_cfa_offset(16) applies.
        let mut row2 = initial_row.clone();
        let mut pc2 = 1000u64;
        let stopped2 = run_instructions(&fde_instrs, &cie, &mut row2, Some(&initial_row), &mut pc2, 1010, &mut remember).unwrap();
        assert!(!stopped2);
        match row2.cfa {
            CfaRule::RegisterOffset { register: 7, offset: 16 } => {}
            _ => panic!("CFA offset should have advanced to 16"),
        }
        match row2.register(16) {
            RegisterRule::AtCfaOffset(-8) => {}
            other => panic!("unexpected r16 rule: {other:?}"),
        }
    }

    #[test]
    fn remember_and_restore_state_round_trip() {
        let cie = make_cie(1, -4);
        let mut instrs = vec![DW_CFA_DEF_CFA];
        instrs.extend(uleb(7));
        instrs.extend(uleb(8));
        instrs.push(DW_CFA_REMEMBER_STATE);
        instrs.push(DW_CFA_DEF_CFA_OFFSET);
        instrs.push(32);
        instrs.push(DW_CFA_RESTORE_STATE);

        let mut remember = Vec::new();
        let mut row = CfiRow::undefined();
        let mut pc = 0u64;
        run_instructions(&instrs, &cie, &mut row, Some(&CfiRow::undefined()), &mut pc, u64::MAX, &mut remember).unwrap();
        match row.cfa {
            CfaRule::RegisterOffset { register: 7, offset: 8 } => {}
            _ => panic!("restore_state should have reverted the offset bump"),
        }
    }

    /// `CfiEngine::new`'s sort_by_key/dedup_by_key pair (spec §4.8, §8: "for every
    /// FDE list after sort+dedup, entries are non-decreasing by `initial_location`
    /// and no two share one") pulled out as plain data so proptest can throw
    /// arbitrary `(initial_location, is_eh)` pairs at it without needing a real
    /// `.debug_frame` byte stream.
    fn sort_and_dedup(mut locations: Vec<(u64, bool)>) -> Vec<(u64, bool)> {
        let mut fdes: Vec<Fde<'static>> = locations
            .drain(..)
            .map(|(initial_location, is_eh)| Fde {
                cie: 0,
                is_eh,
                initial_location,
                address_range: 0,
                instructions: &[],
            })
            .collect();
        fdes.sort_by_key(|f| (f.initial_location, f.is_eh));
        fdes.dedup_by_key(|f| f.initial_location);
        fdes.into_iter().map(|f| (f.initial_location, f.is_eh)).collect()
    }

    proptest::proptest! {
        #[test]
        fn fde_list_is_sorted_and_deduped_after_sort_and_dedup(locations in proptest::collection::vec((0u64..64, proptest::bool::ANY), 0..64)) {
            let result = sort_and_dedup(locations.clone());

            for pair in result.windows(2) {
                proptest::prop_assert!(pair[0].0 < pair[1].0, "adjacent entries must be strictly increasing by initial_location");
            }

            let mut distinct_locations: Vec<u64> = locations.iter().map(|(loc, _)| *loc).collect();
            distinct_locations.sort_unstable();
            distinct_locations.dedup();
            proptest::prop_assert_eq!(result.len(), distinct_locations.len());
        }
    }
}
