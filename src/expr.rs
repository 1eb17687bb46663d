//! C4: the DWARF expression stack machine.
//!
//! Generalized from the teacher's opcode-by-opcode `evaluate()`, but reading
//! from a bounds-checked [`Buffer`] instead of raw process memory, and
//! stopping (rather than panicking on `unimplemented!()`) at opcodes this
//! core hands to its callers.

use smallvec::SmallVec;

use crate::buffer::Buffer;
use crate::consts::*;
use crate::die::Die;
use crate::error::{Error, Result};
use crate::module::{MemoryReader, Module, RegisterState};

/// The maximum number of opcodes one evaluation may execute (spec §3:
/// "Expression evaluation terminates").
const MAX_OPS: u32 = 10_000;

/// Everything one expression evaluation is carried out against (spec §3,
/// "Expression context").
pub struct Context<'a, 'd> {
    pub dwarf: &'a crate::die::Dwarf<'d>,
    pub module: &'a dyn Module,
    pub address_size: u8,
    pub cu_unit: usize,
    pub function_die: Option<Die>,
    pub registers: Option<&'a dyn RegisterState>,
    pub memory: Option<&'a dyn MemoryReader>,
    /// Resolved by the caller via [`resolve_frame_base`] before constructing
    /// an `Evaluator`, only if the expression is expected to need `fbreg`.
    pub frame_base: Option<u64>,
    /// CFA of the current frame, consulted by `call_frame_cfa`.
    pub cfa: Option<u64>,
}

impl<'a, 'd> Context<'a, 'd> {
    fn address_mask(&self) -> u64 {
        let bits = self.address_size as u32 * 8;
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }
}

/// A location-description opcode the evaluator stopped at without
/// finishing, for the caller (C5/C7) to interpret (spec §4.4: "the
/// evaluator to stop ... the caller handles them").
#[derive(Debug, Clone)]
pub enum LocationOp<'d> {
    Register(u32),
    ImplicitValue(&'d [u8]),
    StackValue,
    Piece { size_bytes: u64 },
    BitPiece { size_bits: u64, offset_bits: u64 },
}

/// Result of one call to [`Evaluator::run`].
#[derive(Debug, Clone)]
pub enum Step<'d> {
    /// The expression ran to completion; carries the final top-of-stack
    /// value, or `None` if the stack was left empty.
    Done(Option<u64>),
    Location(LocationOp<'d>),
}

/// Resumable stack-machine evaluator over one expression's bytes.
pub struct Evaluator<'a, 'd> {
    ctx: &'a Context<'a, 'd>,
    buf: Buffer<'d>,
    end: usize,
    stack: SmallVec<[u64; 16]>,
    ops_left: u32,
}

impl<'a, 'd> Evaluator<'a, 'd> {
    pub fn new(ctx: &'a Context<'a, 'd>, expr: Buffer<'d>) -> Self {
        let end = expr.pos() + expr.remaining().len();
        Evaluator {
            ctx,
            buf: expr,
            end,
            stack: SmallVec::new(),
            ops_left: MAX_OPS,
        }
    }

    pub fn with_initial_stack(mut self, value: u64) -> Self {
        self.stack.push(value);
        self
    }

    fn push(&mut self, v: u64) {
        self.stack.push(v & self.ctx.address_mask());
    }

    fn push_raw(&mut self, v: u64) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<u64> {
        self.stack.pop().ok_or_else(|| Error::other("expression stack underflow"))
    }

    fn top(&self) -> Result<u64> {
        self.stack.last().copied().ok_or_else(|| Error::other("expression stack underflow"))
    }

    /// Non-erroring peek at the top of the stack, for callers (C7) that
    /// interpret a "bare" memory piece (no preceding `reg*`/`implicit_value`
    /// /`stack_value`) as an address left on the stack.
    pub fn peek_top(&self) -> Option<u64> {
        self.stack.last().copied()
    }

    fn top_mut(&mut self) -> Result<&mut u64> {
        self.stack.last_mut().ok_or_else(|| Error::other("expression stack underflow"))
    }

    fn nth(&self, n: usize) -> Result<u64> {
        let len = self.stack.len();
        if n >= len {
            return Err(Error::other("expression stack underflow"));
        }
        Ok(self.stack[len - 1 - n])
    }

    fn read_memory(&self, address: u64, size: usize) -> Result<u64> {
        let reader = self.ctx.memory.ok_or(Error::NotFound)?;
        let bytes = reader.read(address, size, false)?;
        if bytes.len() != size {
            return Err(Error::other("short memory read"));
        }
        let mut buf = [0u8; 8];
        if self.ctx.module.platform().is_little_endian() {
            buf[..size].copy_from_slice(&bytes);
            Ok(u64::from_le_bytes(buf))
        } else {
            buf[8 - size..].copy_from_slice(&bytes);
            Ok(u64::from_be_bytes(buf))
        }
    }

    fn register(&self, regno: u32) -> Result<u64> {
        let regs = self.ctx.registers.ok_or(Error::NotFound)?;
        regs.get(regno).ok_or(Error::NotFound)
    }

    /// Runs opcodes until the expression is exhausted or a location
    /// description opcode is reached; callers that need to resume a
    /// multi-piece composite location call this again afterward.
    pub fn run(&mut self) -> Result<Step<'d>> {
        loop {
            if self.buf.pos() >= self.end {
                return Ok(Step::Done(self.stack.last().copied()));
            }
            if self.ops_left == 0 {
                return Err(Error::other("expression exceeded the 10000-op budget"));
            }
            self.ops_left -= 1;

            let opcode = self.buf.u8()?;
            match opcode {
                DW_OP_ADDR => {
                    let v = self.buf.uint(self.ctx.address_size)?;
                    self.push(v);
                }
                DW_OP_ADDRX => {
                    let idx = self.buf.uleb128()?;
                    let v = self.ctx.dwarf.address_at_index(self.ctx.cu_unit, idx)?;
                    self.push(v);
                }
                DW_OP_CONSTX => {
                    let idx = self.buf.uleb128()?;
                    let v = self.ctx.dwarf.address_at_index(self.ctx.cu_unit, idx)?;
                    self.push(v);
                }
                DW_OP_CONST1U => {
                    let v = self.buf.u8()? as u64;
                    self.push(v);
                }
                DW_OP_CONST1S => {
                    let v = self.buf.i8()? as i64 as u64;
                    self.push(v);
                }
                DW_OP_CONST2U => {
                    let v = self.buf.u16()? as u64;
                    self.push(v);
                }
                DW_OP_CONST2S => {
                    let v = self.buf.i16()? as i64 as u64;
                    self.push(v);
                }
                DW_OP_CONST4U => {
                    let v = self.buf.u32()? as u64;
                    self.push(v);
                }
                DW_OP_CONST4S => {
                    let v = self.buf.i32()? as i64 as u64;
                    self.push(v);
                }
                DW_OP_CONST8U => {
                    let v = self.buf.u64()?;
                    self.push(v);
                }
                DW_OP_CONST8S => {
                    let v = self.buf.i64()? as u64;
                    self.push(v);
                }
                DW_OP_CONSTU => {
                    let v = self.buf.uleb128()?;
                    self.push(v);
                }
                DW_OP_CONSTS => {
                    let v = self.buf.sleb128()? as u64;
                    self.push(v);
                }
                DW_OP_DUP => {
                    let v = self.top()?;
                    self.push_raw(v);
                }
                DW_OP_DROP => {
                    self.pop()?;
                }
                DW_OP_OVER => {
                    let v = self.nth(1)?;
                    self.push_raw(v);
                }
                DW_OP_PICK => {
                    let n = self.buf.u8()? as usize;
                    let v = self.nth(n)?;
                    self.push_raw(v);
                }
                DW_OP_SWAP => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(Error::other("expression stack underflow"));
                    }
                    self.stack.swap(len - 1, len - 2);
                }
                DW_OP_ROT => {
                    let len = self.stack.len();
                    if len < 3 {
                        return Err(Error::other("expression stack underflow"));
                    }
                    self.stack.swap(len - 1, len - 2);
                    self.stack.swap(len - 2, len - 3);
                }
                DW_OP_DEREF => {
                    let addr = self.pop()?;
                    let v = self.read_memory(addr, self.ctx.address_size as usize)?;
                    self.push(v);
                }
                DW_OP_DEREF_SIZE => {
                    let size = self.buf.u8()? as usize;
                    if size == 0 || size > 8 {
                        return Err(Error::other("invalid deref_size"));
                    }
                    let addr = self.pop()?;
                    let v = self.read_memory(addr, size)?;
                    self.push(v);
                }
                DW_OP_ABS => {
                    let v = *self.top_mut()? as i64;
                    *self.top_mut()? = v.unsigned_abs();
                }
                DW_OP_AND => {
                    let b = self.pop()?;
                    *self.top_mut()? &= b;
                }
                DW_OP_DIV => {
                    let b = self.pop()? as i64;
                    if b == 0 {
                        return Err(Error::other("division by zero in expression"));
                    }
                    let a = *self.top_mut()? as i64;
                    *self.top_mut()? = (a / b) as u64 & self.ctx.address_mask();
                }
                DW_OP_MINUS => {
                    let b = self.pop()?;
                    let v = self.top_mut()?;
                    *v = v.wrapping_sub(b) & self.ctx.address_mask();
                }
                DW_OP_MOD => {
                    let b = self.pop()? as i64;
                    if b == 0 {
                        return Err(Error::other("modulo by zero in expression"));
                    }
                    let a = *self.top_mut()? as i64;
                    *self.top_mut()? = (a % b) as u64 & self.ctx.address_mask();
                }
                DW_OP_MUL => {
                    let b = self.pop()?;
                    let v = self.top_mut()?;
                    *v = v.wrapping_mul(b) & self.ctx.address_mask();
                }
                DW_OP_NEG => {
                    let v = self.top_mut()?;
                    *v = (0u64.wrapping_sub(*v)) & self.ctx.address_mask();
                }
                DW_OP_NOT => {
                    let v = self.top_mut()?;
                    *v = (!*v) & self.ctx.address_mask();
                }
                DW_OP_OR => {
                    let b = self.pop()?;
                    *self.top_mut()? |= b;
                }
                DW_OP_PLUS => {
                    let b = self.pop()?;
                    let v = self.top_mut()?;
                    *v = v.wrapping_add(b) & self.ctx.address_mask();
                }
                DW_OP_PLUS_UCONST => {
                    let b = self.buf.uleb128()?;
                    let v = self.top_mut()?;
                    *v = v.wrapping_add(b) & self.ctx.address_mask();
                }
                0x24 /* DW_OP_shl */ => {
                    let n = self.pop()?;
                    let bits = self.ctx.address_size as u32 * 8;
                    let v = self.top_mut()?;
                    *v = if n as u32 >= bits { 0 } else { v.wrapping_shl(n as u32) } & self.ctx.address_mask();
                }
                0x25 /* DW_OP_shr */ => {
                    let n = self.pop()?;
                    let bits = self.ctx.address_size as u32 * 8;
                    let v = self.top_mut()?;
                    *v = if n as u32 >= bits { 0 } else { v.wrapping_shr(n as u32) };
                }
                0x26 /* DW_OP_shra */ => {
                    let n = self.pop()?;
                    let bits = self.ctx.address_size as u32 * 8;
                    let s = self.top()? as i64;
                    let shifted = if n as u32 >= bits {
                        if s < 0 { -1i64 } else { 0 }
                    } else {
                        s.wrapping_shr(n as u32)
                    };
                    *self.top_mut()? = shifted as u64 & self.ctx.address_mask();
                }
                0x27 /* DW_OP_xor */ => {
                    let b = self.pop()?;
                    *self.top_mut()? ^= b;
                }
                DW_OP_SKIP => {
                    let delta = self.buf.i16()? as i64;
                    self.jump(delta)?;
                }
                DW_OP_BRA => {
                    let delta = self.buf.i16()? as i64;
                    let cond = self.pop()?;
                    if cond != 0 {
                        self.jump(delta)?;
                    }
                }
                DW_OP_EQ => self.relational(|a, b| a == b)?,
                DW_OP_GE => self.relational(|a, b| a >= b)?,
                DW_OP_GT => self.relational(|a, b| a > b)?,
                DW_OP_LE => self.relational(|a, b| a <= b)?,
                DW_OP_LT => self.relational(|a, b| a < b)?,
                DW_OP_NE => self.relational(|a, b| a != b)?,
                DW_OP_LIT0..=DW_OP_LIT31 => {
                    self.push((opcode - DW_OP_LIT0) as u64);
                }
                DW_OP_REG0..=DW_OP_REG31 => {
                    return Ok(Step::Location(LocationOp::Register((opcode - DW_OP_REG0) as u32)));
                }
                DW_OP_REGX => {
                    let reg = self.buf.uleb128()? as u32;
                    return Ok(Step::Location(LocationOp::Register(reg)));
                }
                DW_OP_BREG0..=DW_OP_BREG31 => {
                    let regno = (opcode - DW_OP_BREG0) as u32;
                    let off = self.buf.sleb128()?;
                    let base = self.register(regno)? as i64;
                    self.push(base.wrapping_add(off) as u64);
                }
                DW_OP_BREGX => {
                    let regno = self.buf.uleb128()? as u32;
                    let off = self.buf.sleb128()?;
                    let base = self.register(regno)? as i64;
                    self.push(base.wrapping_add(off) as u64);
                }
                DW_OP_FBREG => {
                    let off = self.buf.sleb128()?;
                    let base = self.ctx.frame_base.ok_or(Error::NotFound)?;
                    self.push((base as i64).wrapping_add(off) as u64);
                }
                DW_OP_CALL_FRAME_CFA => {
                    let cfa = self.ctx.cfa.ok_or(Error::NotFound)?;
                    self.push(cfa);
                }
                DW_OP_NOP => {}
                DW_OP_IMPLICIT_VALUE => {
                    let len = self.buf.uleb128()? as usize;
                    let bytes = self.buf.block(len)?;
                    return Ok(Step::Location(LocationOp::ImplicitValue(bytes)));
                }
                DW_OP_STACK_VALUE => {
                    return Ok(Step::Location(LocationOp::StackValue));
                }
                DW_OP_PIECE => {
                    let size_bytes = self.buf.uleb128()?;
                    return Ok(Step::Location(LocationOp::Piece { size_bytes }));
                }
                DW_OP_BIT_PIECE => {
                    let size_bits = self.buf.uleb128()?;
                    let offset_bits = self.buf.uleb128()?;
                    return Ok(Step::Location(LocationOp::BitPiece { size_bits, offset_bits }));
                }
                other => return Err(Error::other(format!("unsupported DWARF expression opcode {other:#x}"))),
            }
        }
    }

    fn relational(&mut self, f: impl FnOnce(i64, i64) -> bool) -> Result<()> {
        let b = self.pop()? as i64;
        let a = self.top()? as i64;
        *self.top_mut()? = f(a, b) as u64;
        Ok(())
    }

    fn jump(&mut self, delta: i64) -> Result<()> {
        let base = self.buf.pos() as i64;
        let target = base + delta;
        if target < 0 || target as usize > self.end {
            return Err(Error::other("expression skip/bra target out of bounds"));
        }
        self.buf.seek(target as usize);
        Ok(())
    }
}

/// Resolves the frame base of `function_die` at `pc` (spec §4.4.1).
///
/// A direct-expression `DW_AT_frame_base` is evaluated as-is. A location-list
/// form is first resolved to the expression bytes covering `pc` via C5. A
/// single trailing register opcode yields that register's value directly;
/// any other trailing bytes after a register opcode are an error.
pub fn resolve_frame_base(ctx: &Context<'_, '_>, function_die: Die, pc: Option<u64>) -> Result<u64> {
    let bytes = crate::loclist::resolve_location_bytes(ctx.dwarf, function_die, DW_AT_FRAME_BASE, pc)?
        .ok_or(Error::NotFound)?;
    let buf = ctx.dwarf.make_buffer(crate::module::SectionId::DebugInfo, bytes);
    let mut eval = Evaluator::new(ctx, buf);
    match eval.run()? {
        Step::Done(Some(v)) => Ok(v),
        Step::Done(None) => Err(Error::NotFound),
        Step::Location(LocationOp::Register(regno)) => {
            if eval.buf.pos() != eval.end {
                return Err(Error::other("trailing bytes after register frame base"));
            }
            eval.register(regno)
        }
        Step::Location(_) => Err(Error::other("unsupported frame base location form")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::die::Dwarf;
    use crate::module::{Module, Platform, SectionId as ModSectionId, SectionRef};

    struct NoSections;

    impl Platform for NoSections {
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

    impl Module for NoSections {
        fn name(&self) -> &str {
            "proptest-fixture"
        }
        fn section(&self, _id: ModSectionId) -> Option<SectionRef<'_>> {
            None
        }
        fn platform(&self) -> &dyn Platform {
            self
        }
    }

    /// Runs `count` copies of the cheapest possible opcode (`DW_OP_lit0`, a
    /// single byte that just pushes a constant) and reports whether the
    /// evaluator finished within the op budget (spec §3, "Expression
    /// evaluation terminates", and §8's 10,000-op property).
    fn runs_within_budget(count: usize) -> bool {
        let module = NoSections;
        let dwarf = Dwarf::from_module(&module).unwrap();
        let ctx = Context {
            dwarf: &dwarf,
            module: &module,
            address_size: 8,
            cu_unit: 0,
            function_die: None,
            registers: None,
            memory: None,
            frame_base: None,
            cfa: None,
        };
        let bytes = vec![DW_OP_LIT0; count];
        let buf = dwarf.make_buffer(ModSectionId::DebugInfo, &bytes);
        let mut eval = Evaluator::new(&ctx, buf);
        eval.run().is_ok()
    }

    #[test]
    fn exactly_max_ops_succeeds_one_more_fails() {
        assert!(runs_within_budget(MAX_OPS as usize));
        assert!(!runs_within_budget(MAX_OPS as usize + 1));
    }

    proptest::proptest! {
        #[test]
        fn op_budget_is_never_exceeded(count in 0usize..20_000) {
            let within_budget = count <= MAX_OPS as usize;
            proptest::prop_assert_eq!(runs_within_budget(count), within_budget);
        }
    }
}
