//! Operand parsing and the wire-format encoders (§4.2 operand syntax, §6
//! binary formats). Every `encode_*` function here writes exactly the bytes
//! its `cpu::dispatch::decode_*` counterpart expects — see `opcode.rs` for
//! the shared layouts both sides agree on.

#[cfg(test)]
#[path = "./operand_test.rs"]
mod operand_test;

use crate::assembler::error::{AssembleError, AssembleErrorKind};
use crate::assembler::lexer::{self, ExprContext};
use crate::cpu::registers;
use crate::expr::{Expr, Op};
use crate::object_file::{Hole, ObjectFile, SegmentKind};
use crate::opcode;

/// A parsed `[r1*mult + r2 + disp]` memory operand (§4.2 addressing). Any
/// subset of the three components may be absent.
#[derive(Clone, Debug)]
pub struct MemRef {
    pub r1: Option<(u8, u8)>,
    pub mult: u64,
    pub r2: Option<(u8, u8)>,
    pub disp: Option<Expr>,
}

#[derive(Clone, Debug)]
pub enum Operand {
    Reg(u8, u8, bool),
    Vreg(u8, usize),
    Mem(MemRef),
    Imm(Expr),
}

impl Operand {
    pub fn as_mem(&self) -> Option<&MemRef> {
        match self {
            Operand::Mem(m) => Some(m),
            _ => None,
        }
    }
}

fn vpu_reg_lookup(name: &str) -> Option<(u8, usize)> {
    let up = name.to_ascii_uppercase();
    let (prefix, size) = if let Some(rest) = up.strip_prefix("ZMM") {
        (rest, 64)
    } else if let Some(rest) = up.strip_prefix("YMM") {
        (rest, 32)
    } else if let Some(rest) = up.strip_prefix("XMM") {
        (rest, 16)
    } else {
        return None;
    };
    let idx: u8 = prefix.parse().ok()?;
    if idx as usize >= registers::VPU_COUNT {
        return None;
    }
    Some((idx, size))
}

/// `sizecode` for a size-override keyword (`BYTE`/`WORD`/.../`ZMMWORD`),
/// optionally followed by `PTR`. Returns `(sizecode, rest-of-text)`.
pub(crate) fn strip_size_hint(text: &str) -> (Option<u8>, &str) {
    let trimmed = text.trim_start();
    let (head, rest) = match trimmed.find(char::is_whitespace) {
        Some(i) => (&trimmed[..i], trimmed[i..].trim_start()),
        None => (trimmed, ""),
    };
    let sz = match head.to_ascii_uppercase().as_str() {
        "BYTE" => Some(0u8),
        "WORD" => Some(1u8),
        "DWORD" => Some(2u8),
        "QWORD" => Some(3u8),
        "XMMWORD" => Some(4u8),
        "YMMWORD" => Some(5u8),
        "ZMMWORD" => Some(6u8),
        _ => None,
    };
    match sz {
        Some(s) => {
            let rest = rest.strip_prefix("PTR").or_else(|| rest.strip_prefix("ptr")).map(str::trim_start).unwrap_or(rest);
            (Some(s), rest)
        }
        None => (None, trimmed),
    }
}

/// Splits a bracketed address body into signed top-level terms: `a+b-c`
/// becomes `[(false,"a"), (false,"b"), (true,"c")]`. Only `()`-nesting is
/// honored; the grammar here is intentionally narrower than the general
/// expression grammar (§4.2 addressing is `r1*mult + r2 + disp`, not an
/// arbitrary sum).
fn split_signed_terms(s: &str) -> Vec<(bool, String)> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut cur = String::new();
    let mut neg = false;
    for c in s.chars() {
        match c {
            '(' => {
                depth += 1;
                cur.push(c);
            }
            ')' => {
                depth -= 1;
                cur.push(c);
            }
            '+' if depth == 0 => {
                if !cur.trim().is_empty() {
                    out.push((neg, cur.trim().to_string()));
                }
                cur = String::new();
                neg = false;
            }
            '-' if depth == 0 => {
                if !cur.trim().is_empty() {
                    out.push((neg, cur.trim().to_string()));
                    cur = String::new();
                    neg = false;
                }
                neg = !neg;
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push((neg, cur.trim().to_string()));
    }
    out
}

pub(crate) fn parse_mem_body(
    body: &str,
    ctx: &ExprContext,
    obj: &mut ObjectFile,
    line: u32,
) -> Result<MemRef, AssembleError> {
    let mut r1 = None;
    let mut r2 = None;
    let mut mult = 1u64;
    let mut disp_terms: Vec<Expr> = Vec::new();

    for (neg, term) in split_signed_terms(body) {
        let mul_parts = lexer::split_top_level(&term, '*');
        if mul_parts.len() == 2 {
            if neg {
                return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "address register terms cannot be negated"));
            }
            let (reg_part, mult_part) = if registers::lookup_gpr_name(mul_parts[0].trim()).is_some() {
                (mul_parts[0].trim(), mul_parts[1].trim())
            } else {
                (mul_parts[1].trim(), mul_parts[0].trim())
            };
            let (idx, sz, high) = registers::lookup_gpr_name(reg_part)
                .ok_or_else(|| AssembleError::new(AssembleErrorKind::ArgError, line, format!("`{}` is not a register", reg_part)))?;
            if high {
                return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "high-byte registers cannot address memory"));
            }
            let m: u64 = mult_part
                .parse()
                .map_err(|_| AssembleError::new(AssembleErrorKind::ArgError, line, format!("`{}` is not a valid scale", mult_part)))?;
            if ![1, 2, 4, 8].contains(&m) {
                return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "address scale must be 1, 2, 4, or 8"));
            }
            if r1.is_some() {
                return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "address has more than one scaled register"));
            }
            r1 = Some((idx, sz));
            mult = m;
            continue;
        }

        if let Some((idx, sz, high)) = registers::lookup_gpr_name(term.trim()) {
            if neg {
                return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "address register terms cannot be negated"));
            }
            if high {
                return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "high-byte registers cannot address memory"));
            }
            if r1.is_none() {
                r1 = Some((idx, sz));
            } else if r2.is_none() {
                r2 = Some((idx, sz));
            } else {
                return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "address has more than two registers"));
            }
            continue;
        }

        let mut e = lexer::parse_expr(term.trim(), ctx, obj, line)?;
        if neg {
            e = Expr::unary(Op::Neg, e);
        }
        disp_terms.push(e);
    }

    if let (Some((_, s1)), Some((_, s2))) = (r1, r2) {
        if s1 != s2 {
            return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "address registers must share a size"));
        }
    }

    let disp = if disp_terms.is_empty() { None } else { Some(Expr::chain_addition(disp_terms)) };
    Ok(MemRef { r1, mult, r2, disp })
}

/// Parses one textual operand (§4.2: register, `[mem]`, vector register, or
/// an immediate expression, any of which may carry a leading size keyword).
pub fn parse_operand(
    text: &str,
    ctx: &ExprContext,
    obj: &mut ObjectFile,
    line: u32,
) -> Result<(Operand, Option<u8>), AssembleError> {
    let (hint, rest) = strip_size_hint(text);
    let rest = rest.trim();
    if rest.starts_with('[') && rest.ends_with(']') {
        let body = &rest[1..rest.len() - 1];
        let mem = parse_mem_body(body, ctx, obj, line)?;
        return Ok((Operand::Mem(mem), hint));
    }
    if let Some((idx, sz, high)) = registers::lookup_gpr_name(rest) {
        return Ok((Operand::Reg(idx, sz, high), hint));
    }
    if let Some((idx, size)) = vpu_reg_lookup(rest) {
        return Ok((Operand::Vreg(idx, size), hint));
    }
    let expr = lexer::parse_expr(rest, ctx, obj, line)?;
    Ok((Operand::Imm(expr), hint))
}

/// Resolves the effective operand width: a register dictates its own size,
/// a bare immediate falls back to `default`, and memory requires an
/// explicit size keyword (`MissingSize`, §7).
pub fn resolve_sizecode(op: &Operand, hint: Option<u8>, default: u8, line: u32) -> Result<u8, AssembleError> {
    match op {
        Operand::Reg(_, sz, _) => Ok(*sz),
        Operand::Vreg(_, bytes) => Ok(match bytes {
            16 => 4,
            32 => 5,
            _ => 6,
        }),
        Operand::Mem(_) => hint.ok_or_else(|| AssembleError::new(AssembleErrorKind::MissingSize, line, "memory operand needs an explicit size (BYTE/WORD/DWORD/QWORD)")),
        Operand::Imm(_) => Ok(hint.unwrap_or(default)),
    }
}

pub(crate) fn push_hole(obj: &mut ObjectFile, kind: SegmentKind, expr: Expr, size: u8, line: u32) {
    let address = obj.segment(kind).len() as u64;
    obj.segment_mut(kind).resize(obj.segment(kind).len() + size as usize, 0);
    obj.add_hole(kind, Hole { address, size, line, expr });
}

/// Appends an address-format operand (`decode_address`): header byte,
/// optional register-pack byte, optional 8-byte displacement hole.
pub fn encode_address(obj: &mut ObjectFile, kind: SegmentKind, mem: &MemRef, line: u32) -> Result<(), AssembleError> {
    let has_r1 = mem.r1.is_some();
    let has_r2 = mem.r2.is_some();
    let sizecode = mem.r1.or(mem.r2).map(|(_, sz)| sz).unwrap_or(3);
    let has_imm = mem.disp.is_some();
    let mult_code = opcode::address_fmt::code_from_mult(mem.mult);
    let b1 = opcode::address_fmt::pack_byte1(has_imm, mult_code, sizecode, has_r1, has_r2);
    obj.segment_mut(kind).push(b1);
    if has_r1 || has_r2 {
        let r1 = mem.r1.map(|(i, _)| i).unwrap_or(0);
        let r2 = mem.r2.map(|(i, _)| i).unwrap_or(0);
        obj.segment_mut(kind).push(opcode::address_fmt::pack_regs(r1, r2));
    }
    if has_imm {
        push_hole(obj, kind, mem.disp.clone().unwrap(), 8, line);
    } else if !has_r1 && !has_r2 {
        return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "empty memory operand `[]`"));
    }
    Ok(())
}

/// Appends a binary-format instruction body (`decode_binary`): dest header
/// (+ address bytes if memory), then a source mode byte (+ register index,
/// immediate, or address bytes).
pub fn encode_binary(
    obj: &mut ObjectFile,
    kind: SegmentKind,
    dest: &Operand,
    src: &Operand,
    sizecode: u8,
    line: u32,
) -> Result<(), AssembleError> {
    match dest {
        Operand::Mem(mem) => {
            let b1 = opcode::binary_fmt::pack_byte1(0, sizecode, false, true);
            obj.segment_mut(kind).push(b1);
            encode_address(obj, kind, mem, line)?;
        }
        Operand::Reg(idx, _, high) => {
            let b1 = opcode::binary_fmt::pack_byte1(*idx, sizecode, *high, false);
            obj.segment_mut(kind).push(b1);
        }
        Operand::Imm(_) | Operand::Vreg(..) => {
            return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "destination operand must be a register or memory"))
        }
    }

    match src {
        Operand::Reg(idx, _, high) => {
            let mode = if *high { opcode::binary_fmt::MODE_HIGH_REG } else { opcode::binary_fmt::MODE_REG };
            obj.segment_mut(kind).push(opcode::binary_fmt::pack_byte2(mode, *idx));
        }
        Operand::Imm(e) => {
            obj.segment_mut(kind).push(opcode::binary_fmt::pack_byte2(opcode::binary_fmt::MODE_IMM, 0));
            push_hole(obj, kind, e.clone(), 1 << sizecode, line);
        }
        Operand::Mem(mem) => {
            obj.segment_mut(kind).push(opcode::binary_fmt::pack_byte2(opcode::binary_fmt::MODE_MEM, 0));
            encode_address(obj, kind, mem, line)?;
        }
        Operand::Vreg(..) => return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "vector registers aren't valid here")),
    }
    Ok(())
}

/// Appends a unary-format body (`decode_unary`): header byte (+ address).
pub fn encode_unary(obj: &mut ObjectFile, kind: SegmentKind, loc: &Operand, sizecode: u8, line: u32) -> Result<(), AssembleError> {
    match loc {
        Operand::Mem(mem) => {
            obj.segment_mut(kind).push(opcode::unary_fmt::pack_byte1(0, sizecode, false, true));
            encode_address(obj, kind, mem, line)
        }
        Operand::Reg(idx, _, high) => {
            obj.segment_mut(kind).push(opcode::unary_fmt::pack_byte1(*idx, sizecode, *high, false));
            Ok(())
        }
        _ => Err(AssembleError::new(AssembleErrorKind::ArgError, line, "operand must be a register or memory")),
    }
}

pub enum ShiftCount {
    Cl,
    Imm(u8),
}

/// Appends a shift-format body (`decode_shift`): header byte (+ address),
/// then the CL-flag/count byte.
pub fn encode_shift(
    obj: &mut ObjectFile,
    kind: SegmentKind,
    loc: &Operand,
    sizecode: u8,
    count: ShiftCount,
    line: u32,
) -> Result<(), AssembleError> {
    encode_unary(obj, kind, loc, sizecode, line)?;
    let b2 = match count {
        ShiftCount::Cl => opcode::shift_fmt::pack_byte2(true, 0),
        ShiftCount::Imm(c) => opcode::shift_fmt::pack_byte2(false, c),
    };
    obj.segment_mut(kind).push(b2);
    Ok(())
}

/// Appends an imm-rm-format body (`decode_imm_rm_value`/`_loc`): header byte
/// (+ register index is implicit in the byte, or an immediate/address).
pub fn encode_imm_rm(obj: &mut ObjectFile, kind: SegmentKind, op: &Operand, sizecode: u8, line: u32) -> Result<(), AssembleError> {
    match op {
        Operand::Reg(idx, _, high) => {
            let mode = if *high { opcode::imm_rm_fmt::MODE_HIGH_REG } else { opcode::imm_rm_fmt::MODE_REG };
            obj.segment_mut(kind).push(opcode::imm_rm_fmt::pack_byte1(*idx, sizecode, mode));
        }
        Operand::Imm(e) => {
            obj.segment_mut(kind).push(opcode::imm_rm_fmt::pack_byte1(0, sizecode, opcode::imm_rm_fmt::MODE_IMM));
            push_hole(obj, kind, e.clone(), 1 << sizecode, line);
        }
        Operand::Mem(mem) => {
            obj.segment_mut(kind).push(opcode::imm_rm_fmt::pack_byte1(0, sizecode, opcode::imm_rm_fmt::MODE_MEM));
            encode_address(obj, kind, mem, line)?;
        }
        Operand::Vreg(..) => return Err(AssembleError::new(AssembleErrorKind::ArgError, line, "vector registers aren't valid here")),
    }
    Ok(())
}
