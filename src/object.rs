//! C7: stitches a location expression and a type together into an object
//! description, reading memory only where the composition truly requires it.
//!
//! Generalized from the teacher's per-register `RegisterLocation` model
//! (`dwarf/instruction.rs`) applied to whole objects instead of single
//! registers: a composite location is a sequence of pieces, each either a
//! register, an implicit value, a stack value, or a memory span, assembled
//! into one contiguous description where possible.

use crate::consts::DW_AT_LOCATION;
use crate::die::Die;
use crate::error::{Error, Result};
use crate::expr::{Context, Evaluator, LocationOp, Step};
use crate::module::SectionId;
use crate::types::{size_of_qualified, QualifiedType};

/// Where an object's bytes ultimately come from.
pub enum ObjectLocation {
    /// The description could not be represented (partial coverage,
    /// non-contiguous memory mixed with register/implicit sources, or an
    /// opcode this core does not materialize, e.g. `implicit_pointer`).
    Absent,
    /// A single contiguous memory span, already load-bias-adjusted.
    Memory { address: u64 },
    /// Bytes materialized from one or more non-memory or non-contiguous
    /// pieces (one read per memory piece, assembled LSB-first).
    Value(Vec<u8>),
}

pub struct Object {
    pub ty: QualifiedType,
    pub bit_size: u64,
    pub location: ObjectLocation,
}

enum PieceSource {
    Memory(u64),
    Register(u32),
    Bytes(Vec<u8>),
}

struct RawPiece {
    source: PieceSource,
    size_bits: u64,
    bit_offset: u64,
}

/// Materializes `expr` against `ty`, per spec §4.7.
///
/// `explicit_bit_size` overrides `size_of(ty) * 8` for bit-field members.
/// `must_have_value` is set by callers resolving a `DW_TAG_template_value_parameter`,
/// which has no legal absent state; everything else reports absence instead
/// of erroring on a partial or unrepresentable description.
pub fn materialize<'a, 'd>(
    ctx: &Context<'a, 'd>,
    ty: QualifiedType,
    expr: &'d [u8],
    explicit_bit_size: Option<u64>,
    load_bias: u64,
    must_have_value: bool,
) -> Result<Object> {
    let total_bits = explicit_bit_size.or_else(|| size_of_qualified(&ty).map(|n| n * 8)).unwrap_or(0);
    let buf = ctx.dwarf.make_buffer(SectionId::DebugInfo, expr);
    let mut eval = Evaluator::new(ctx, buf);

    let mut pieces: Vec<RawPiece> = Vec::new();
    let mut pending: Option<PieceSource> = None;
    let mut next_bit_offset: u64 = 0;

    loop {
        match eval.run()? {
            Step::Done(top) => {
                if pieces.is_empty() && pending.is_none() {
                    return Ok(match top {
                        Some(addr) => memory_object(ctx, ty, total_bits, addr, load_bias),
                        None => absent_object(ty, total_bits),
                    });
                }
                if let Some(source) = pending.take() {
                    pieces.push(RawPiece {
                        source,
                        size_bits: total_bits.saturating_sub(next_bit_offset),
                        bit_offset: next_bit_offset,
                    });
                }
                break;
            }
            Step::Location(LocationOp::Register(r)) => {
                pending = Some(PieceSource::Register(r));
            }
            Step::Location(LocationOp::ImplicitValue(bytes)) => {
                pending = Some(PieceSource::Bytes(bytes.to_vec()));
            }
            Step::Location(LocationOp::StackValue) => {
                let v = eval.peek_top().ok_or_else(|| Error::other("DW_OP_stack_value with an empty stack"))?;
                pending = Some(PieceSource::Bytes(v.to_le_bytes().to_vec()));
            }
            Step::Location(LocationOp::Piece { size_bytes }) => {
                let source = pending.take().unwrap_or(PieceSource::Memory(eval.peek_top().ok_or(Error::NotFound)?));
                let size_bits = size_bytes * 8;
                pieces.push(RawPiece {
                    source,
                    size_bits,
                    bit_offset: next_bit_offset,
                });
                next_bit_offset += size_bits;
            }
            Step::Location(LocationOp::BitPiece { size_bits, offset_bits }) => {
                let source = pending.take().unwrap_or(PieceSource::Memory(eval.peek_top().ok_or(Error::NotFound)?));
                pieces.push(RawPiece {
                    source,
                    size_bits,
                    bit_offset: offset_bits,
                });
                next_bit_offset = offset_bits + size_bits;
            }
        }
    }

    build_object(ctx, ty, total_bits, pieces, load_bias, must_have_value)
}

fn memory_object(ctx: &Context<'_, '_>, ty: QualifiedType, bit_size: u64, address: u64, load_bias: u64) -> Object {
    let biased = if ctx.module.locate_section(address).is_some() { address.wrapping_add(load_bias) } else { address };
    Object {
        ty,
        bit_size,
        location: ObjectLocation::Memory { address: biased },
    }
}

fn absent_object(ty: QualifiedType, bit_size: u64) -> Object {
    Object {
        ty,
        bit_size,
        location: ObjectLocation::Absent,
    }
}

fn is_contiguous_memory(pieces: &[RawPiece]) -> Option<u64> {
    let mut base = None;
    let mut expected_addr = 0u64;
    let mut expected_bit_offset = 0u64;
    for p in pieces {
        let addr = match p.source {
            PieceSource::Memory(a) => a,
            _ => return None,
        };
        if p.size_bits % 8 != 0 || p.bit_offset % 8 != 0 {
            return None;
        }
        match base {
            None => {
                base = Some(addr);
                expected_addr = addr;
                expected_bit_offset = p.bit_offset;
            }
            Some(_) => {
                if addr != expected_addr || p.bit_offset != expected_bit_offset {
                    return None;
                }
            }
        }
        expected_addr = expected_addr.wrapping_add(p.size_bits / 8);
        expected_bit_offset += p.size_bits;
    }
    base
}

fn bit_copy(dst: &mut [u8], dst_bit_offset: u64, src: &[u8], n_bits: u64) {
    for i in 0..n_bits {
        let s_byte = (i / 8) as usize;
        let s_shift = (i % 8) as u32;
        if s_byte >= src.len() {
            break;
        }
        let bit = (src[s_byte] >> s_shift) & 1;
        let d_bit = dst_bit_offset + i;
        let d_byte = (d_bit / 8) as usize;
        let d_shift = (d_bit % 8) as u32;
        if d_byte >= dst.len() {
            continue;
        }
        if bit != 0 {
            dst[d_byte] |= 1 << d_shift;
        } else {
            dst[d_byte] &= !(1 << d_shift);
        }
    }
}

fn build_object(
    ctx: &Context<'_, '_>,
    ty: QualifiedType,
    total_bits: u64,
    pieces: Vec<RawPiece>,
    load_bias: u64,
    must_have_value: bool,
) -> Result<Object> {
    if pieces.is_empty() {
        return if must_have_value {
            Err(Error::other("template_value_parameter has no value"))
        } else {
            Ok(absent_object(ty, total_bits))
        };
    }

    if let Some(base) = is_contiguous_memory(&pieces) {
        let covered: u64 = pieces.iter().map(|p| p.size_bits).sum();
        if covered >= total_bits {
            return Ok(memory_object(ctx, ty, total_bits, base, load_bias));
        }
    }

    let total_bytes = ((total_bits + 7) / 8) as usize;
    let mut dst = vec![0u8; total_bytes];
    let mut covered = vec![false; total_bits as usize];

    for p in &pieces {
        let bytes = match &p.source {
            PieceSource::Memory(addr) => {
                let reader = ctx.memory.ok_or(Error::NotFound)?;
                if p.bit_offset % 8 != 0 {
                    return Err(Error::other("unsupported non-byte-aligned memory bit_piece"));
                }
                let byte_addr = addr.wrapping_add(p.bit_offset / 8);
                let len = ((p.size_bits + 7) / 8) as usize;
                reader.read(byte_addr, len, false)?
            }
            PieceSource::Register(r) => {
                let regs = ctx.registers.ok_or(Error::NotFound)?;
                let v = regs.get(*r).ok_or(Error::NotFound)?;
                v.to_le_bytes().to_vec()
            }
            PieceSource::Bytes(b) => b.clone(),
        };
        let end = (p.bit_offset + p.size_bits).min(total_bits);
        if end <= p.bit_offset {
            continue;
        }
        bit_copy(&mut dst, p.bit_offset, &bytes, end - p.bit_offset);
        for i in p.bit_offset..end {
            covered[i as usize] = true;
        }
    }

    if covered.iter().any(|&c| !c) {
        return if must_have_value {
            Err(Error::other("template_value_parameter's location leaves bits unfilled"))
        } else {
            Ok(absent_object(ty, total_bits))
        };
    }

    Ok(Object {
        ty,
        bit_size: total_bits,
        location: ObjectLocation::Value(dst),
    })
}

/// Convenience entry reading `DW_AT_location` (or `attr`, for callers that
/// use a differently-named attribute) off `die` and materializing against
/// `ty`, resolving a location list against `ctx.registers.pc()` when needed.
pub fn object_from_die_location<'a, 'd>(
    ctx: &Context<'a, 'd>,
    die: Die,
    ty: QualifiedType,
    explicit_bit_size: Option<u64>,
    load_bias: u64,
    must_have_value: bool,
) -> Result<Object> {
    let pc = ctx.registers.and_then(|r| r.pc());
    match crate::loclist::resolve_location_bytes(ctx.dwarf, die, DW_AT_LOCATION, pc)? {
        Some(bytes) => materialize(ctx, ty, bytes, explicit_bit_size, load_bias, must_have_value),
        None => {
            if must_have_value {
                Err(Error::other("template_value_parameter has no DW_AT_location"))
            } else {
                Ok(absent_object(ty, explicit_bit_size.or_else(|| size_of_qualified(&ty).map(|n| n * 8)).unwrap_or(0)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_memory_pieces_merge() {
        let pieces = vec![
            RawPiece {
                source: PieceSource::Memory(0x1000),
                size_bits: 32,
                bit_offset: 0,
            },
            RawPiece {
                source: PieceSource::Memory(0x1004),
                size_bits: 32,
                bit_offset: 32,
            },
        ];
        assert_eq!(is_contiguous_memory(&pieces), Some(0x1000));
    }

    #[test]
    fn non_contiguous_memory_pieces_do_not_merge() {
        let pieces = vec![
            RawPiece {
                source: PieceSource::Memory(0x1000),
                size_bits: 32,
                bit_offset: 0,
            },
            RawPiece {
                source: PieceSource::Memory(0x2000),
                size_bits: 32,
                bit_offset: 32,
            },
        ];
        assert_eq!(is_contiguous_memory(&pieces), None);
    }

    #[test]
    fn bit_copy_extracts_low_byte() {
        let mut dst = [0u8; 2];
        bit_copy(&mut dst, 0, &[0xab, 0xcd], 8);
        assert_eq!(dst, [0xab, 0x00]);
    }

    #[test]
    fn bit_copy_handles_unaligned_destination_offset() {
        let mut dst = [0u8; 2];
        bit_copy(&mut dst, 4, &[0x0f], 4);
        assert_eq!(dst[0], 0xf0);
    }
}
