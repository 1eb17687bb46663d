//! C9: the thin adapter CFI register rules use to run a `DW_CFA_expression`/
//! `val_expression`/`def_cfa_expression` operand through C4's evaluator.
//! Reached from outside this module through `CfiRow::resolve_cfa` and
//! `CfiRow::resolve_register` (`cfi.rs`), which build the context below and
//! dispatch to these functions for the `Expression`/`AtExpression`/
//! `ValExpression` rule variants.
//!
//! Grounded in the teacher's `dwarf::expression::evaluate(expression,
//! registers, initial_stack)` / `dwarf::instruction` pairing: a CIE's own
//! `def_cfa_expression` runs with `initial_stack = 0` (no CFA exists yet to
//! push), while every register rule's expression runs with the frame's CFA
//! pre-pushed (`initial_stack = cfa`) per `RegisterSavedWhere::AtExpression`
//! / `IsExpression`'s call sites.

use crate::die::Dwarf;
use crate::error::{Error, Result};
use crate::expr::{Context, Evaluator, LocationOp, Step};
use crate::module::{MemoryReader, Module, RegisterState, SectionId};

/// Builds the expression context a CFI register/CFA rule's expression runs
/// under: no enclosing compilation unit, subprogram or frame base, since a
/// CFI expression is evaluated purely against the target's memory and
/// registers, never a DIE (spec §4.9).
pub(crate) fn context<'a, 'd>(
    dwarf: &'a Dwarf<'d>,
    module: &'a dyn Module,
    registers: &'a dyn RegisterState,
    memory: Option<&'a dyn MemoryReader>,
    cfa: Option<u64>,
) -> Context<'a, 'd> {
    Context {
        dwarf,
        module,
        address_size: module.platform().address_size(),
        cu_unit: 0,
        function_die: None,
        registers: Some(registers),
        memory,
        frame_base: None,
        cfa,
    }
}

/// Reads `address_size` bytes at `address` and assembles them into a `u64`
/// per the module's endianness. Shared by `at_dwarf_expression` and by
/// `CfiRow::resolve_register`'s `at_cfa_offset` case, which reads a saved
/// register the same way without running an expression first.
pub(crate) fn read_target_address(module: &dyn Module, memory: &dyn MemoryReader, address: u64, address_size: u8) -> Result<u64> {
    let bytes = memory.read(address, address_size as usize, false)?;
    if bytes.len() != address_size as usize {
        return Err(Error::other("short memory read resolving a CFI register value"));
    }
    let mut buf = [0u8; 8];
    if module.platform().is_little_endian() {
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    } else {
        buf[8 - bytes.len()..].copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(buf))
    }
}

/// Evaluates `expr`, pushing `cfa` as the initial stack value first when
/// `push_cfa` is set (spec §4.9). Location-description opcodes
/// (`reg*`, `implicit_value`, `stack_value`, `piece`, `bit_piece`) are
/// illegal in a CFI expression and are reported as errors rather than
/// handed back to the caller, since there is no piece-by-piece object to
/// assemble here — only a single scalar result.
fn run(dwarf: &Dwarf<'_>, ctx: &Context<'_, '_>, expr: &[u8], cfa: Option<u64>, push_cfa: bool) -> Result<u64> {
    let buf = dwarf.make_buffer(SectionId::DebugInfo, expr);
    let mut eval = Evaluator::new(ctx, buf);
    if push_cfa {
        let cfa = cfa.ok_or(Error::NotFound)?;
        eval = eval.with_initial_stack(cfa);
    }
    loop {
        match eval.run()? {
            Step::Done(Some(v)) => return Ok(v),
            Step::Done(None) => return Err(Error::other("CFI expression left an empty stack")),
            Step::Location(LocationOp::Register(_)) => {
                return Err(Error::other("location-description opcode (reg*) is illegal in a CFI expression"))
            }
            Step::Location(LocationOp::ImplicitValue(_)) => {
                return Err(Error::other("location-description opcode (implicit_value) is illegal in a CFI expression"))
            }
            Step::Location(LocationOp::StackValue) => {
                return Err(Error::other("location-description opcode (stack_value) is illegal in a CFI expression"))
            }
            Step::Location(LocationOp::Piece { .. }) => return Err(Error::other("piece opcode is illegal in a CFI expression")),
            Step::Location(LocationOp::BitPiece { .. }) => return Err(Error::other("bit_piece opcode is illegal in a CFI expression")),
        }
    }
}

/// `DW_CFA_def_cfa_expression` / `DW_CFA_val_expression`: the expression's
/// result *is* the value (the CFA itself, or a register's value). Runs
/// with `push_cfa = false` for the CFA's own rule, `true` for a register's
/// `val_expression` rule.
pub fn dwarf_expression(dwarf: &Dwarf<'_>, ctx: &Context<'_, '_>, expr: &[u8], cfa: Option<u64>, push_cfa: bool) -> Result<u64> {
    run(dwarf, ctx, expr, cfa, push_cfa)
}

/// `DW_CFA_expression`: the expression's result is an address; the
/// register's actual value is read from memory there. Always runs with
/// `push_cfa = true` (a plain register rule's expression, never the CFA's
/// own — the CFA has no `at_dwarf_expression` form).
pub fn at_dwarf_expression(dwarf: &Dwarf<'_>, ctx: &Context<'_, '_>, expr: &[u8], cfa: Option<u64>) -> Result<u64> {
    let address = run(dwarf, ctx, expr, cfa, true)?;
    let reader = ctx.memory.ok_or(Error::NotFound)?;
    read_target_address(ctx.module, reader, address, ctx.address_size)
}
