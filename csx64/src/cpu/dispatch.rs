//! Instruction decode and execution (§4.2 instruction set, §4.5 execution
//! semantics, §6 syscall ABI). Every handler here reads operand bytes
//! through the shared layouts in `crate::opcode` so the assembler's encoder
//! and this decoder can never disagree about what a byte means.

#[cfg(test)]
#[path = "./dispatch_test.rs"]
mod dispatch_test;

use crate::cpu::flags::{self, Condition, FLAG_AF, FLAG_OF};
use crate::cpu::registers::{self, sign_extend, sizecode_bytes, truncate, RAX, RCX, RDI, RSI};
use crate::cpu::{Cpu, RuntimeError};
use crate::opcode::{self, fpu_ops, vpu_ops, Opcode, RepKind};
use crate::syscall::{open_flags, HostFile, SeekMode, SyscallCode};

/// Where a decoded operand lives: a GPR partition, or a memory address at a
/// given width.
#[derive(Clone, Copy, Debug)]
enum Loc {
    Reg(u8, u8, bool),
    Mem(u64, u8),
}

#[derive(Clone, Copy)]
enum Alu {
    Add,
    Adc,
    Sub,
    Sbb,
    Cmp,
    And,
    Or,
    Xor,
    Test,
}

#[derive(Clone, Copy)]
enum Unary {
    Inc,
    Dec,
    Not,
    Neg,
}

#[derive(Clone, Copy)]
enum Shift {
    Shl,
    Shr,
    Sar,
    Rol,
    Ror,
}

fn mask_for(sizecode: u8) -> u64 {
    truncate(u64::MAX, sizecode)
}

impl Cpu {
    fn read_loc(&self, loc: Loc) -> Result<u64, RuntimeError> {
        match loc {
            Loc::Reg(r, sz, h) => Ok(self.gpr.get(r, sz, h)),
            Loc::Mem(addr, sz) => self.memory.get(addr, sz),
        }
    }

    fn write_loc(&mut self, loc: Loc, val: u64) -> Result<(), RuntimeError> {
        match loc {
            Loc::Reg(r, sz, h) => {
                self.gpr.set(r, sz, h, val);
                Ok(())
            }
            Loc::Mem(addr, sz) => self.memory.set(addr, sz, val),
        }
    }

    /// Decodes a memory operand's address (§4.2 addressing: optional
    /// `r1*mult + r2 + imm`, any subset present per the header byte).
    fn decode_address(&mut self) -> Result<u64, RuntimeError> {
        let b1 = self.fetch_code_u8()?;
        let (has_imm, mult_code, sz, has_r1, has_r2) = opcode::address_fmt::unpack_byte1(b1);
        let (mut r1, mut r2) = (0u8, 0u8);
        if has_r1 || has_r2 {
            let rb = self.fetch_code_u8()?;
            let (a, b) = opcode::address_fmt::unpack_regs(rb);
            r1 = a;
            r2 = b;
        }
        let mut addr = 0u64;
        if has_r1 {
            let mult = opcode::address_fmt::mult_from_code(mult_code);
            addr = addr.wrapping_add(self.gpr.get(r1, sz, false).wrapping_mul(mult));
        }
        if has_r2 {
            addr = addr.wrapping_add(self.gpr.get(r2, sz, false));
        }
        if has_imm {
            let disp = self.fetch_code_value(3)?;
            addr = addr.wrapping_add(disp);
        }
        Ok(addr)
    }

    fn decode_binary(&mut self) -> Result<(u8, Loc, u64), RuntimeError> {
        let b1 = self.fetch_code_u8()?;
        let (dest_reg, sz, dest_high, has_mem) = opcode::binary_fmt::unpack_byte1(b1);
        let dest_loc = if has_mem {
            Loc::Mem(self.decode_address()?, sz)
        } else {
            Loc::Reg(dest_reg, sz, dest_high)
        };
        let b2 = self.fetch_code_u8()?;
        let (mode, src) = opcode::binary_fmt::unpack_byte2(b2);
        let src_val = match mode {
            opcode::binary_fmt::MODE_REG => self.gpr.get(src, sz, false),
            opcode::binary_fmt::MODE_HIGH_REG => self.gpr.get(src, 0, true),
            opcode::binary_fmt::MODE_IMM => self.fetch_code_value(sz)?,
            opcode::binary_fmt::MODE_MEM => {
                let addr = self.decode_address()?;
                self.memory.get(addr, sz)?
            }
            _ => return Err(RuntimeError::UnknownOp),
        };
        Ok((sz, dest_loc, src_val))
    }

    fn decode_unary(&mut self) -> Result<(u8, Loc), RuntimeError> {
        let b1 = self.fetch_code_u8()?;
        let (reg, sz, high, has_mem) = opcode::unary_fmt::unpack_byte1(b1);
        let loc = if has_mem { Loc::Mem(self.decode_address()?, sz) } else { Loc::Reg(reg, sz, high) };
        Ok((sz, loc))
    }

    fn decode_shift(&mut self) -> Result<(u8, Loc, u8), RuntimeError> {
        let b1 = self.fetch_code_u8()?;
        let (reg, sz, high, has_mem) = opcode::shift_fmt::unpack_byte1(b1);
        let loc = if has_mem { Loc::Mem(self.decode_address()?, sz) } else { Loc::Reg(reg, sz, high) };
        let b2 = self.fetch_code_u8()?;
        let (cl_flag, count_field) = opcode::shift_fmt::unpack_byte2(b2);
        let count = if cl_flag { (self.gpr.get(RCX, 0, false) & 0x3F) as u8 } else { count_field };
        Ok((sz, loc, count))
    }

    fn decode_imm_rm_value(&mut self) -> Result<(u8, u64), RuntimeError> {
        let b1 = self.fetch_code_u8()?;
        let (reg, sz, mode) = opcode::imm_rm_fmt::unpack_byte1(b1);
        let val = match mode {
            opcode::imm_rm_fmt::MODE_REG => self.gpr.get(reg, sz, false),
            opcode::imm_rm_fmt::MODE_HIGH_REG => self.gpr.get(reg, 0, true),
            opcode::imm_rm_fmt::MODE_IMM => self.fetch_code_value(sz)?,
            opcode::imm_rm_fmt::MODE_MEM => {
                let addr = self.decode_address()?;
                self.memory.get(addr, sz)?
            }
            _ => return Err(RuntimeError::UnknownOp),
        };
        Ok((sz, val))
    }

    fn decode_imm_rm_loc(&mut self) -> Result<(u8, Loc), RuntimeError> {
        let b1 = self.fetch_code_u8()?;
        let (reg, sz, mode) = opcode::imm_rm_fmt::unpack_byte1(b1);
        let loc = match mode {
            opcode::imm_rm_fmt::MODE_REG => Loc::Reg(reg, sz, false),
            opcode::imm_rm_fmt::MODE_HIGH_REG => Loc::Reg(reg, 0, true),
            opcode::imm_rm_fmt::MODE_MEM => Loc::Mem(self.decode_address()?, sz),
            _ => return Err(RuntimeError::UnknownOp),
        };
        Ok((sz, loc))
    }

    // ---- ALU family (§4.2 binary format, §4.5 flag semantics) ----

    fn alu_add(&mut self, a: u64, b: u64, sz: u8, carry_in: bool) -> u64 {
        let width = 8 * sizecode_bytes(sz) as u32;
        let mask = mask_for(sz);
        let cin = if carry_in && self.rflags.cf() { 1u128 } else { 0 };
        let ua = (a & mask) as u128;
        let ub = (b & mask) as u128;
        let sum = ua + ub + cin;
        let result = (sum as u64) & mask;
        let cf = sum > mask as u128;
        let af = ((a & 0xF) + (b & 0xF) + cin as u64) > 0xF;
        let sign_bit = 1u64 << (width - 1);
        let of = ((!(a ^ b)) & (a ^ result) & sign_bit) != 0;
        self.rflags.set_cf(cf);
        self.rflags.set_af(af);
        self.rflags.set_of(of);
        self.rflags.update_pf(result);
        self.rflags.update_zf_sf(result, sz);
        result
    }

    fn alu_sub(&mut self, a: u64, b: u64, sz: u8, borrow_in: bool) -> u64 {
        let width = 8 * sizecode_bytes(sz) as u32;
        let mask = mask_for(sz);
        let bin = if borrow_in && self.rflags.cf() { 1i128 } else { 0 };
        let ua = (a & mask) as i128;
        let ub = (b & mask) as i128;
        let diff = ua - ub - bin;
        let result = (diff as u64) & mask;
        let cf = diff < 0;
        let af = (((a & 0xF) as i64) - ((b & 0xF) as i64) - bin as i64) < 0;
        let sign_bit = 1u64 << (width - 1);
        let of = ((a ^ b) & (a ^ result) & sign_bit) != 0;
        self.rflags.set_cf(cf);
        self.rflags.set_af(af);
        self.rflags.set_of(of);
        self.rflags.update_pf(result);
        self.rflags.update_zf_sf(result, sz);
        result
    }

    fn alu_bit(&mut self, a: u64, b: u64, sz: u8, f: impl Fn(u64, u64) -> u64) -> u64 {
        let mask = mask_for(sz);
        let result = f(a, b) & mask;
        self.rflags.set_cf(false);
        self.rflags.set_of(false);
        self.rflags.update_pf(result);
        self.rflags.update_zf_sf(result, sz);
        self.randomize_flags(FLAG_AF);
        result
    }

    fn exec_alu(&mut self, op: Alu) -> Result<(), RuntimeError> {
        let (sz, dest, src_val) = self.decode_binary()?;
        let dest_val = self.read_loc(dest)?;
        let (result, writes_back) = match op {
            Alu::Add => (self.alu_add(dest_val, src_val, sz, false), true),
            Alu::Adc => (self.alu_add(dest_val, src_val, sz, true), true),
            Alu::Sub => (self.alu_sub(dest_val, src_val, sz, false), true),
            Alu::Cmp => (self.alu_sub(dest_val, src_val, sz, false), false),
            Alu::Sbb => (self.alu_sub(dest_val, src_val, sz, true), true),
            Alu::And => (self.alu_bit(dest_val, src_val, sz, |a, b| a & b), true),
            Alu::Test => (self.alu_bit(dest_val, src_val, sz, |a, b| a & b), false),
            Alu::Or => (self.alu_bit(dest_val, src_val, sz, |a, b| a | b), true),
            Alu::Xor => (self.alu_bit(dest_val, src_val, sz, |a, b| a ^ b), true),
        };
        if writes_back {
            self.write_loc(dest, result)?;
        }
        Ok(())
    }

    fn exec_mov(&mut self) -> Result<(), RuntimeError> {
        let (_, dest, src_val) = self.decode_binary()?;
        self.write_loc(dest, src_val)
    }

    fn exec_mul_div(&mut self, op: Opcode) -> Result<(), RuntimeError> {
        let (sz, src_val) = self.decode_imm_rm_value()?;
        let width = 8 * sizecode_bytes(sz) as u32;
        let a = self.gpr.get(RAX, sz, false);
        match op {
            Opcode::MulU => {
                let product = (a as u128) * (src_val as u128);
                let low = (product as u64) & mask_for(sz);
                let high = (product >> width) as u64 & mask_for(sz);
                self.gpr.set(RAX, sz, false, low);
                self.gpr.set(RCX, sz, false, high);
                let overflows = high != 0;
                self.rflags.set_cf(overflows);
                self.rflags.set_of(overflows);
                self.randomize_flags(flags::FLAG_PF | FLAG_AF | flags::FLAG_ZF | flags::FLAG_SF);
                Ok(())
            }
            Opcode::MulS => {
                let sa = sign_extend(a, sz) as i64 as i128;
                let sb = sign_extend(src_val, sz) as i64 as i128;
                let product = sa * sb;
                let low = (product as u64) & mask_for(sz);
                let high = ((product >> width) as u64) & mask_for(sz);
                self.gpr.set(RAX, sz, false, low);
                self.gpr.set(RCX, sz, false, high);
                let sign_bit = 1u64 << (width - 1);
                let sign_extended_low = if low & sign_bit != 0 { high == mask_for(sz) } else { high == 0 };
                let overflows = !sign_extended_low;
                self.rflags.set_cf(overflows);
                self.rflags.set_of(overflows);
                self.randomize_flags(flags::FLAG_PF | FLAG_AF | flags::FLAG_ZF | flags::FLAG_SF);
                Ok(())
            }
            Opcode::DivU => {
                if src_val & mask_for(sz) == 0 {
                    return Err(RuntimeError::ArithmeticError);
                }
                let dividend = ((self.gpr.get(RCX, sz, false) as u128) << width) | a as u128;
                let divisor = (src_val & mask_for(sz)) as u128;
                let quotient = dividend / divisor;
                let remainder = dividend % divisor;
                if quotient > mask_for(sz) as u128 {
                    return Err(RuntimeError::ArithmeticError);
                }
                self.gpr.set(RAX, sz, false, quotient as u64);
                self.gpr.set(RCX, sz, false, remainder as u64);
                self.randomize_flags(
                    flags::FLAG_CF | flags::FLAG_PF | FLAG_AF | flags::FLAG_ZF | flags::FLAG_SF | FLAG_OF,
                );
                Ok(())
            }
            Opcode::DivS => {
                if src_val & mask_for(sz) == 0 {
                    return Err(RuntimeError::ArithmeticError);
                }
                let dividend = (((self.gpr.get(RCX, sz, false) as u128) << width) | a as u128) as i128;
                let divisor = sign_extend(src_val, sz) as i64 as i128;
                let quotient = dividend / divisor;
                let remainder = dividend % divisor;
                let qmin = -(1i128 << (width - 1));
                let qmax = (1i128 << (width - 1)) - 1;
                if quotient < qmin || quotient > qmax {
                    return Err(RuntimeError::ArithmeticError);
                }
                self.gpr.set(RAX, sz, false, (quotient as u64) & mask_for(sz));
                self.gpr.set(RCX, sz, false, (remainder as u64) & mask_for(sz));
                self.randomize_flags(
                    flags::FLAG_CF | flags::FLAG_PF | FLAG_AF | flags::FLAG_ZF | flags::FLAG_SF | FLAG_OF,
                );
                Ok(())
            }
            _ => unreachable!("exec_mul_div called with non-mul/div opcode"),
        }
    }

    // ---- unary / shift families ----

    fn alu_inc_dec(&mut self, val: u64, sz: u8, inc: bool) -> u64 {
        let saved_cf = self.rflags.cf();
        let result = if inc { self.alu_add(val, 1, sz, false) } else { self.alu_sub(val, 1, sz, false) };
        self.rflags.set_cf(saved_cf);
        result
    }

    fn exec_unary(&mut self, op: Unary) -> Result<(), RuntimeError> {
        let (sz, loc) = self.decode_unary()?;
        let val = self.read_loc(loc)?;
        let result = match op {
            Unary::Inc => self.alu_inc_dec(val, sz, true),
            Unary::Dec => self.alu_inc_dec(val, sz, false),
            Unary::Not => (!val) & mask_for(sz),
            Unary::Neg => self.alu_sub(0, val, sz, false),
        };
        self.write_loc(loc, result)
    }

    fn exec_shift(&mut self, op: Shift) -> Result<(), RuntimeError> {
        let (sz, loc, count) = self.decode_shift()?;
        let val = self.read_loc(loc)? & mask_for(sz);
        let width = 8 * sizecode_bytes(sz) as u32;
        let c = count as u32;
        if c == 0 {
            return Ok(());
        }

        let (result, cf) = match op {
            Shift::Shl => {
                if c >= width {
                    (0, c == width && (val & 1) != 0)
                } else {
                    ((val << c) & mask_for(sz), (val >> (width - c)) & 1 != 0)
                }
            }
            Shift::Shr => {
                if c >= width {
                    (0, c == width && (val >> (width - 1)) & 1 != 0)
                } else {
                    (val >> c, (val >> (c - 1)) & 1 != 0)
                }
            }
            Shift::Sar => {
                let sval = sign_extend(val, sz) as i64;
                if c >= width {
                    let r = if sval < 0 { mask_for(sz) } else { 0 };
                    (r, sval < 0)
                } else {
                    (((sval >> c) as u64) & mask_for(sz), (val >> (c - 1)) & 1 != 0)
                }
            }
            Shift::Rol => {
                let cm = (c % width) as u32;
                let r = if cm == 0 { val } else { ((val << cm) | (val >> (width - cm))) & mask_for(sz) };
                (r, r & 1 != 0)
            }
            Shift::Ror => {
                let cm = c % width;
                let r = if cm == 0 { val } else { ((val >> cm) | (val << (width - cm))) & mask_for(sz) };
                (r, (r >> (width - 1)) & 1 != 0)
            }
        };

        self.rflags.set_cf(cf);
        if c == 1 {
            let of = match op {
                Shift::Shl => ((result >> (width - 1)) & 1) != ((val >> (width - 1)) & 1),
                Shift::Shr => (val >> (width - 1)) & 1 != 0,
                Shift::Sar => false,
                Shift::Rol => ((result >> (width - 1)) & 1) != (result & 1),
                Shift::Ror => ((result >> (width - 1)) & 1) != ((result >> (width - 2)) & 1),
            };
            self.rflags.set_of(of);
        } else {
            self.randomize_flags(FLAG_OF);
        }
        match op {
            Shift::Shl | Shift::Shr | Shift::Sar => {
                self.rflags.update_pf(result);
                self.rflags.update_zf_sf(result, sz);
                self.randomize_flags(FLAG_AF);
            }
            Shift::Rol | Shift::Ror => {}
        }
        self.write_loc(loc, result)
    }

    // ---- stack / control flow ----

    fn exec_push(&mut self) -> Result<(), RuntimeError> {
        let (_, val) = self.decode_imm_rm_value()?;
        self.push_stack(val, 8)
    }

    fn exec_pop(&mut self) -> Result<(), RuntimeError> {
        let (sz, loc) = self.decode_imm_rm_loc()?;
        let val = self.pop_stack(8)?;
        self.write_loc(loc, truncate(val, sz))
    }

    fn exec_jmp(&mut self) -> Result<(), RuntimeError> {
        let (_, target) = self.decode_imm_rm_value()?;
        self.rip = target;
        Ok(())
    }

    fn exec_call(&mut self) -> Result<(), RuntimeError> {
        let (_, target) = self.decode_imm_rm_value()?;
        let ret_addr = self.rip;
        self.push_stack(ret_addr, 8)?;
        self.rip = target;
        Ok(())
    }

    fn exec_ret(&mut self) -> Result<(), RuntimeError> {
        let target = self.pop_stack(8)?;
        self.rip = target;
        Ok(())
    }

    fn exec_lea(&mut self) -> Result<(), RuntimeError> {
        let b1 = self.fetch_code_u8()?;
        let (dest_reg, sz, dest_high, _) = opcode::binary_fmt::unpack_byte1(b1);
        let addr = self.decode_address()?;
        self.gpr.set(dest_reg, sz, dest_high, addr);
        Ok(())
    }

    // ---- conditionals (§4.2, including the *CXZ pseudo-condition) ----

    fn evaluate_condition(&mut self) -> Result<bool, RuntimeError> {
        let cond_byte = self.fetch_code_u8()?;
        if cond_byte == 18 {
            return Ok(self.gpr.get(RCX, 3, false) == 0);
        }
        Condition::from_code(cond_byte).map(|c| c.evaluate(self.rflags)).ok_or(RuntimeError::UnknownOp)
    }

    fn exec_jcc(&mut self) -> bool {
        let taken = match self.evaluate_condition() {
            Ok(t) => t,
            Err(e) => {
                self.terminate(e);
                return false;
            }
        };
        let target = match self.decode_imm_rm_value() {
            Ok((_, v)) => v,
            Err(e) => {
                self.terminate(e);
                return false;
            }
        };
        if taken {
            self.rip = target;
        }
        true
    }

    fn exec_setcc(&mut self) -> Result<(), RuntimeError> {
        let taken = self.evaluate_condition()?;
        let (_, loc) = self.decode_imm_rm_loc()?;
        self.write_loc(loc, taken as u64)
    }

    fn exec_cmovcc(&mut self) -> Result<(), RuntimeError> {
        let taken = self.evaluate_condition()?;
        let (_, dest, src_val) = self.decode_binary()?;
        if taken {
            self.write_loc(dest, src_val)?;
        }
        Ok(())
    }

    // ---- string family (§4.2, REP/REPE/REPNE + OTRF) ----

    fn string_op_once(&mut self, op: Opcode, sz: u8, dir: i64) -> Result<bool, RuntimeError> {
        let width = sizecode_bytes(sz) as u8;
        match op {
            Opcode::Movs => {
                let src = self.gpr.raw(RSI);
                let dst = self.gpr.raw(RDI);
                let v = self.memory.get(src, width)?;
                self.memory.set(dst, width, v)?;
                self.gpr.set_raw(RSI, (src as i64 + dir) as u64);
                self.gpr.set_raw(RDI, (dst as i64 + dir) as u64);
                Ok(true)
            }
            Opcode::Lods => {
                let src = self.gpr.raw(RSI);
                let v = self.memory.get(src, width)?;
                self.gpr.set(RAX, sz, false, v);
                self.gpr.set_raw(RSI, (src as i64 + dir) as u64);
                Ok(true)
            }
            Opcode::Stos => {
                let dst = self.gpr.raw(RDI);
                let v = self.gpr.get(RAX, sz, false);
                self.memory.set(dst, width, v)?;
                self.gpr.set_raw(RDI, (dst as i64 + dir) as u64);
                Ok(true)
            }
            Opcode::Cmps => {
                let src = self.gpr.raw(RSI);
                let dst = self.gpr.raw(RDI);
                let a = self.memory.get(src, width)?;
                let b = self.memory.get(dst, width)?;
                self.alu_sub(a, b, sz, false);
                self.gpr.set_raw(RSI, (src as i64 + dir) as u64);
                self.gpr.set_raw(RDI, (dst as i64 + dir) as u64);
                Ok(self.rflags.zf())
            }
            Opcode::Scas => {
                let dst = self.gpr.raw(RDI);
                let a = self.gpr.get(RAX, sz, false);
                let b = self.memory.get(dst, width)?;
                self.alu_sub(a, b, sz, false);
                self.gpr.set_raw(RDI, (dst as i64 + dir) as u64);
                Ok(self.rflags.zf())
            }
            _ => unreachable!("string_op_once called with non-string opcode"),
        }
    }

    fn exec_string_op(&mut self, op: Opcode) -> bool {
        let ext = match self.fetch_code_u8() {
            Ok(b) => b,
            Err(e) => {
                self.terminate(e);
                return false;
            }
        };
        let sz = ext & 0x3;
        let rep = RepKind::from_code((ext >> 2) & 0x3);
        let width = sizecode_bytes(sz) as i64;
        let dir = if self.rflags.df() { -width } else { width };

        if rep == RepKind::None {
            return match self.string_op_once(op, sz, dir) {
                Ok(_) => true,
                Err(e) => {
                    self.terminate(e);
                    false
                }
            };
        }

        if !self.rflags.otrf() {
            // One iteration per tick: run a single step and rewind RIP by
            // the instruction's length (opcode + extension byte) if more
            // remain, so the next tick refetches and repeats it.
            if self.gpr.raw(RCX) == 0 {
                return true;
            }
            let zf = match self.string_op_once(op, sz, dir) {
                Ok(z) => z,
                Err(e) => {
                    self.terminate(e);
                    return false;
                }
            };
            self.gpr.set_raw(RCX, self.gpr.raw(RCX) - 1);
            let keep_going = self.gpr.raw(RCX) != 0
                && match rep {
                    RepKind::Repe => zf,
                    RepKind::Repne => !zf,
                    _ => true,
                };
            if keep_going {
                self.rip = self.rip.wrapping_sub(2);
            }
            true
        } else {
            loop {
                if self.gpr.raw(RCX) == 0 {
                    break;
                }
                let zf = match self.string_op_once(op, sz, dir) {
                    Ok(z) => z,
                    Err(e) => {
                        self.terminate(e);
                        return false;
                    }
                };
                self.gpr.set_raw(RCX, self.gpr.raw(RCX) - 1);
                let stop = match rep {
                    RepKind::Repe => !zf,
                    RepKind::Repne => zf,
                    _ => false,
                };
                if stop || self.gpr.raw(RCX) == 0 {
                    break;
                }
            }
            true
        }
    }

    // ---- FPU family (§4.2 x87 instructions, §4.5 stack discipline) ----

    fn decode_fpu_operand(&mut self) -> Result<f64, RuntimeError> {
        use crate::opcode::fpu_operand::*;
        let kind = self.fetch_code_u8()?;
        match kind {
            TOP => self.fpu.st(0),
            ST => {
                let i = self.fetch_code_u8()?;
                self.fpu.st(i)
            }
            MEM_F32 => {
                let addr = self.decode_address()?;
                let bits = self.memory.get(addr, 4)? as u32;
                Ok(f32::from_bits(bits) as f64)
            }
            MEM_F64 => {
                let addr = self.decode_address()?;
                Ok(f64::from_bits(self.memory.get(addr, 8)?))
            }
            MEM_I16 => {
                let addr = self.decode_address()?;
                Ok(self.memory.get(addr, 2)? as u16 as i16 as f64)
            }
            MEM_I32 => {
                let addr = self.decode_address()?;
                Ok(self.memory.get(addr, 4)? as u32 as i32 as f64)
            }
            MEM_I64 => {
                let addr = self.decode_address()?;
                Ok(self.memory.get(addr, 8)? as i64 as f64)
            }
            _ => Err(RuntimeError::UnknownOp),
        }
    }

    fn store_fpu_operand(&mut self, val: f64) -> Result<(), RuntimeError> {
        use crate::opcode::fpu_operand::*;
        let kind = self.fetch_code_u8()?;
        match kind {
            TOP => self.fpu.write_st(0, val),
            ST => {
                let i = self.fetch_code_u8()?;
                self.fpu.write_st(i, val)
            }
            MEM_F32 => {
                let addr = self.decode_address()?;
                self.memory.set(addr, 4, (val as f32).to_bits() as u64)
            }
            MEM_F64 => {
                let addr = self.decode_address()?;
                self.memory.set(addr, 8, val.to_bits())
            }
            MEM_I16 => {
                let addr = self.decode_address()?;
                self.memory.set(addr, 2, (val as i64 as i16 as u16) as u64)
            }
            MEM_I32 => {
                let addr = self.decode_address()?;
                self.memory.set(addr, 4, (val as i64 as i32 as u32) as u64)
            }
            MEM_I64 => {
                let addr = self.decode_address()?;
                self.memory.set(addr, 8, val as i64 as u64)
            }
            _ => Err(RuntimeError::UnknownOp),
        }
    }

    fn fpu_binop(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.decode_fpu_operand()?;
        let a = self.fpu.st(0)?;
        self.fpu.write_st(0, f(a, b))
    }

    fn fpu_compare(&mut self, pops: u8, unordered_faults: bool) -> Result<(), RuntimeError> {
        let b = self.decode_fpu_operand()?;
        let a = self.fpu.st(0)?;
        if a.is_nan() || b.is_nan() {
            if unordered_faults {
                return Err(RuntimeError::FPUError);
            }
            self.rflags.set_zf(true);
            self.rflags.set_pf(true);
            self.rflags.set_cf(true);
        } else if a > b {
            self.rflags.set_zf(false);
            self.rflags.set_pf(false);
            self.rflags.set_cf(false);
        } else if a < b {
            self.rflags.set_zf(false);
            self.rflags.set_pf(false);
            self.rflags.set_cf(true);
        } else {
            self.rflags.set_zf(true);
            self.rflags.set_pf(false);
            self.rflags.set_cf(false);
        }
        for _ in 0..pops {
            self.fpu.pop()?;
        }
        Ok(())
    }

    fn fpu_save(&mut self) -> Result<(), RuntimeError> {
        let addr = self.decode_address()?;
        self.memory.set(addr, 2, self.fpu.control_word() as u64)?;
        self.memory.set(addr + 2, 2, self.fpu.status_word() as u64)?;
        self.memory.set(addr + 4, 2, self.fpu.tag_word() as u64)?;
        for i in 0..8u64 {
            let v = self.fpu.st(i as u8).unwrap_or(0.0);
            self.memory.set(addr + 6 + i * 8, 8, v.to_bits())?;
        }
        Ok(())
    }

    fn fpu_restore(&mut self) -> Result<(), RuntimeError> {
        let addr = self.decode_address()?;
        self.fpu.set_control_word(self.memory.get(addr, 2)? as u16);
        self.fpu.set_status_word(self.memory.get(addr + 2, 2)? as u16);
        self.fpu.set_tag_word(self.memory.get(addr + 4, 2)? as u16);
        for i in 0..8u64 {
            let bits = self.memory.get(addr + 6 + i * 8, 8)?;
            self.fpu.write_st(i as u8, f64::from_bits(bits))?;
        }
        Ok(())
    }

    fn fpu_save_env(&mut self) -> Result<(), RuntimeError> {
        let addr = self.decode_address()?;
        self.memory.set(addr, 2, self.fpu.control_word() as u64)?;
        self.memory.set(addr + 2, 2, self.fpu.status_word() as u64)?;
        self.memory.set(addr + 4, 2, self.fpu.tag_word() as u64)
    }

    fn fpu_restore_env(&mut self) -> Result<(), RuntimeError> {
        let addr = self.decode_address()?;
        self.fpu.set_control_word(self.memory.get(addr, 2)? as u16);
        self.fpu.set_status_word(self.memory.get(addr + 2, 2)? as u16);
        self.fpu.set_tag_word(self.memory.get(addr + 4, 2)? as u16);
        Ok(())
    }

    fn exec_fpu_sub(&mut self, sub: u8) -> Result<(), RuntimeError> {
        match sub {
            fpu_ops::FLD => {
                let v = self.decode_fpu_operand()?;
                self.fpu.push(v)
            }
            fpu_ops::FST => {
                let v = self.fpu.st(0)?;
                self.store_fpu_operand(v)
            }
            fpu_ops::FSTP => {
                let v = self.fpu.pop()?;
                self.store_fpu_operand(v)
            }
            fpu_ops::FADD => self.fpu_binop(|a, b| a + b),
            fpu_ops::FSUB => self.fpu_binop(|a, b| a - b),
            fpu_ops::FSUBR => self.fpu_binop(|a, b| b - a),
            fpu_ops::FMUL => self.fpu_binop(|a, b| a * b),
            fpu_ops::FDIV => self.fpu_binop(|a, b| a / b),
            fpu_ops::FDIVR => self.fpu_binop(|a, b| b / a),
            fpu_ops::FCOM => self.fpu_compare(0, false),
            fpu_ops::FCOMP => self.fpu_compare(1, false),
            fpu_ops::FCOMPP => self.fpu_compare(2, false),
            fpu_ops::FUCOM => self.fpu_compare(0, true),
            fpu_ops::FUCOMP => self.fpu_compare(1, true),
            fpu_ops::FUCOMPP => self.fpu_compare(2, true),
            fpu_ops::FMOVCC => {
                let cond_byte = self.fetch_code_u8()?;
                let cond = Condition::from_code(cond_byte).ok_or(RuntimeError::UnknownOp)?;
                let v = self.decode_fpu_operand()?;
                if cond.evaluate(self.rflags) {
                    self.fpu.write_st(0, v)?;
                }
                Ok(())
            }
            fpu_ops::FINIT => {
                self.fpu.finit();
                Ok(())
            }
            fpu_ops::FCLEX => {
                self.fpu.fclex();
                Ok(())
            }
            fpu_ops::FINCSTP => {
                self.fpu.increment_top();
                Ok(())
            }
            fpu_ops::FDECSTP => {
                self.fpu.decrement_top();
                Ok(())
            }
            fpu_ops::FFREE => {
                let i = self.fetch_code_u8()?;
                self.fpu.free(i);
                Ok(())
            }
            fpu_ops::FXAM => {
                if self.fpu.is_empty(0) {
                    self.rflags.set_cf(true);
                    self.rflags.set_pf(true);
                    self.rflags.set_zf(true);
                } else {
                    let v = self.fpu.st(0)?;
                    self.rflags.set_cf(v.is_sign_negative());
                    self.rflags.set_pf(v.is_nan());
                    self.rflags.set_zf(v == 0.0);
                }
                Ok(())
            }
            fpu_ops::FTST => self.fpu_compare_with_zero(),
            fpu_ops::F2XM1 => {
                let a = self.fpu.st(0)?;
                self.fpu.write_st(0, 2f64.powf(a) - 1.0)
            }
            fpu_ops::FABS => {
                let a = self.fpu.st(0)?;
                self.fpu.write_st(0, a.abs())
            }
            fpu_ops::FCHS => {
                let a = self.fpu.st(0)?;
                self.fpu.write_st(0, -a)
            }
            fpu_ops::FPREM => {
                let a = self.fpu.st(0)?;
                let b = self.fpu.st(1)?;
                self.fpu.write_st(0, a - b * (a / b).trunc())
            }
            fpu_ops::FPREM1 => {
                let a = self.fpu.st(0)?;
                let b = self.fpu.st(1)?;
                let q = self.fpu.round(a / b);
                self.fpu.write_st(0, a - b * q)
            }
            fpu_ops::FRNDINT => {
                let a = self.fpu.st(0)?;
                let r = self.fpu.round(a);
                self.fpu.write_st(0, r)
            }
            fpu_ops::FSQRT => {
                let a = self.fpu.st(0)?;
                self.fpu.write_st(0, a.sqrt())
            }
            fpu_ops::FYL2X => {
                let y = self.fpu.st(1)?;
                let x = self.fpu.st(0)?;
                self.fpu.pop()?;
                self.fpu.write_st(0, y * x.ln() / std::f64::consts::LN_2)
            }
            fpu_ops::FYL2XP1 => {
                let y = self.fpu.st(1)?;
                let x = self.fpu.st(0)?;
                self.fpu.pop()?;
                self.fpu.write_st(0, y * (x + 1.0).ln() / std::f64::consts::LN_2)
            }
            fpu_ops::FXTRACT => {
                let a = self.fpu.st(0)?;
                let exp = if a == 0.0 { 0.0 } else { a.abs().log2().floor() };
                let mant = if a == 0.0 { 0.0 } else { a / 2f64.powf(exp) };
                self.fpu.write_st(0, exp)?;
                self.fpu.push(mant)
            }
            fpu_ops::FSCALE => {
                let st0 = self.fpu.st(0)?;
                let st1 = self.fpu.st(1)?;
                self.fpu.write_st(0, st0 * 2f64.powf(st1.trunc()))
            }
            fpu_ops::FSIN => {
                let a = self.fpu.st(0)?;
                self.fpu.write_st(0, a.sin())
            }
            fpu_ops::FCOS => {
                let a = self.fpu.st(0)?;
                self.fpu.write_st(0, a.cos())
            }
            fpu_ops::FSINCOS => {
                let a = self.fpu.st(0)?;
                let (s, c) = (a.sin(), a.cos());
                self.fpu.write_st(0, s)?;
                self.fpu.push(c)
            }
            fpu_ops::FPTAN => {
                let a = self.fpu.st(0)?;
                self.fpu.write_st(0, a.tan())?;
                self.fpu.push(1.0)
            }
            fpu_ops::FPATAN => {
                let y = self.fpu.st(1)?;
                let x = self.fpu.st(0)?;
                self.fpu.pop()?;
                self.fpu.write_st(0, y.atan2(x))
            }
            fpu_ops::FSTSW => {
                let dest_kind = self.fetch_code_u8()?;
                match dest_kind {
                    0 => {
                        let sw = self.fpu.status_word();
                        self.gpr.set(RAX, 1, false, sw as u64);
                        Ok(())
                    }
                    1 => {
                        let addr = self.decode_address()?;
                        self.memory.set(addr, 2, self.fpu.status_word() as u64)
                    }
                    _ => Err(RuntimeError::UnknownOp),
                }
            }
            fpu_ops::FSTCW => {
                let addr = self.decode_address()?;
                self.memory.set(addr, 2, self.fpu.control_word() as u64)
            }
            fpu_ops::FLDCW => {
                let addr = self.decode_address()?;
                let v = self.memory.get(addr, 2)? as u16;
                self.fpu.set_control_word(v);
                Ok(())
            }
            fpu_ops::FNSAVE => self.fpu_save(),
            fpu_ops::FRSTOR => self.fpu_restore(),
            fpu_ops::FNSTENV => self.fpu_save_env(),
            fpu_ops::FLDENV => self.fpu_restore_env(),
            _ => Err(RuntimeError::NotImplemented),
        }
    }

    fn fpu_compare_with_zero(&mut self) -> Result<(), RuntimeError> {
        let a = self.fpu.st(0)?;
        if a.is_nan() {
            self.rflags.set_zf(true);
            self.rflags.set_pf(true);
            self.rflags.set_cf(true);
        } else if a > 0.0 {
            self.rflags.set_zf(false);
            self.rflags.set_pf(false);
            self.rflags.set_cf(false);
        } else if a < 0.0 {
            self.rflags.set_zf(false);
            self.rflags.set_pf(false);
            self.rflags.set_cf(true);
        } else {
            self.rflags.set_zf(true);
            self.rflags.set_pf(false);
            self.rflags.set_cf(false);
        }
        Ok(())
    }

    fn exec_fpu(&mut self) -> bool {
        let sub = match self.fetch_code_u8() {
            Ok(b) => b,
            Err(e) => {
                self.terminate(e);
                return false;
            }
        };
        match self.exec_fpu_sub(sub) {
            Ok(()) => true,
            Err(e) => {
                self.terminate(e);
                false
            }
        }
    }

    // ---- VPU family (§4.2 vector instructions) ----

    fn vpu_compute(&self, sub: u8, elem_size: usize, dest: u64, src: u64) -> Result<u64, RuntimeError> {
        let sizecode = match elem_size {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3,
        };
        match sub {
            vpu_ops::ADD_F | vpu_ops::SUB_F | vpu_ops::MUL_F | vpu_ops::DIV_F | vpu_ops::MIN_F
            | vpu_ops::MAX_F | vpu_ops::SQRT_F | vpu_ops::RSQRT_F => {
                let (a, b) = if elem_size == 4 {
                    (f32::from_bits(dest as u32) as f64, f32::from_bits(src as u32) as f64)
                } else {
                    (f64::from_bits(dest), f64::from_bits(src))
                };
                let r = match sub {
                    vpu_ops::ADD_F => a + b,
                    vpu_ops::SUB_F => a - b,
                    vpu_ops::MUL_F => a * b,
                    vpu_ops::DIV_F => a / b,
                    vpu_ops::MIN_F => a.min(b),
                    vpu_ops::MAX_F => a.max(b),
                    vpu_ops::SQRT_F => b.sqrt(),
                    vpu_ops::RSQRT_F => 1.0 / b.sqrt(),
                    _ => unreachable!(),
                };
                Ok(if elem_size == 4 { (r as f32).to_bits() as u64 } else { r.to_bits() })
            }
            vpu_ops::ADD_I | vpu_ops::SUB_I | vpu_ops::MUL_I | vpu_ops::MIN_I | vpu_ops::MAX_I
            | vpu_ops::AVG_U => {
                let a = sign_extend(dest, sizecode) as i64;
                let b = sign_extend(src, sizecode) as i64;
                let r = match sub {
                    vpu_ops::ADD_I => a.wrapping_add(b),
                    vpu_ops::SUB_I => a.wrapping_sub(b),
                    vpu_ops::MUL_I => a.wrapping_mul(b),
                    vpu_ops::MIN_I => a.min(b),
                    vpu_ops::MAX_I => a.max(b),
                    vpu_ops::AVG_U => (((dest & mask_for(sizecode)) + (src & mask_for(sizecode)) + 1) / 2) as i64,
                    _ => unreachable!(),
                };
                Ok((r as u64) & mask_for(sizecode))
            }
            vpu_ops::AND => Ok(dest & src),
            vpu_ops::OR => Ok(dest | src),
            vpu_ops::XOR => Ok(dest ^ src),
            vpu_ops::MOV => Ok(src),
            vpu_ops::CVT_I2F => {
                let i = sign_extend(src, sizecode) as i64;
                Ok(if elem_size == 4 { (i as f32).to_bits() as u64 } else { (i as f64).to_bits() })
            }
            vpu_ops::CVT_F2I => {
                let f = if elem_size == 4 { f32::from_bits(src as u32) as f64 } else { f64::from_bits(src) };
                Ok((f.trunc() as i64 as u64) & mask_for(sizecode))
            }
            _ => Err(RuntimeError::NotImplemented),
        }
    }

    fn exec_vpu_sub(&mut self, sub: u8) -> Result<(), RuntimeError> {
        let shape_byte = self.fetch_code_u8()?;
        let (elem_size, vec_size, masked, zeromask, scalar, aligned) = opcode::vpu_shape::unpack(shape_byte);
        let dest = self.fetch_code_u8()?;
        let predicate = if sub == vpu_ops::CMP_F { self.fetch_code_u8()? } else { 0 };
        let src_is_mem = self.fetch_code_u8()? != 0;
        let mem_addr = if src_is_mem { Some(self.decode_address()?) } else { None };
        let src = if src_is_mem { 0 } else { self.fetch_code_u8()? };
        if aligned {
            if let Some(addr) = mem_addr {
                if addr % vec_size as u64 != 0 {
                    return Err(RuntimeError::AlignmentViolation);
                }
            }
        }
        let mask_reg = if masked { Some(self.fetch_code_u8()?) } else { None };

        let lanes = if scalar { 1 } else { vec_size / elem_size };
        let elem_width = elem_size as u8;
        for lane in 0..lanes {
            let mask_bit = match mask_reg {
                Some(mr) => (self.gpr.raw(mr) >> lane) & 1 != 0,
                None => true,
            };
            if !mask_bit {
                if zeromask {
                    self.vpu.set_lane(dest, elem_size, lane, 0);
                }
                continue;
            }
            let src_val = if let Some(addr) = mem_addr {
                self.memory.get(addr + (lane * elem_size) as u64, elem_width)?
            } else {
                self.vpu.lane(src, elem_size, lane)
            };
            let dest_val = self.vpu.lane(dest, elem_size, lane);
            if sub == vpu_ops::CMP_F {
                let (a, b) = if elem_size == 4 {
                    (f32::from_bits(dest_val as u32) as f64, f32::from_bits(src_val as u32) as f64)
                } else {
                    (f64::from_bits(dest_val), f64::from_bits(src_val))
                };
                let hit = vcmp_predicate(predicate, a, b);
                self.vpu.set_lane(dest, elem_size, lane, if hit { mask_for(3) } else { 0 } & mask_for_bytes(elem_size));
            } else {
                let result = self.vpu_compute(sub, elem_size, dest_val, src_val)?;
                self.vpu.set_lane(dest, elem_size, lane, result);
            }
        }
        Ok(())
    }

    fn exec_vpu(&mut self) -> bool {
        let sub = match self.fetch_code_u8() {
            Ok(b) => b,
            Err(e) => {
                self.terminate(e);
                return false;
            }
        };
        match self.exec_vpu_sub(sub) {
            Ok(()) => true,
            Err(e) => {
                self.terminate(e);
                false
            }
        }
    }

    // ---- syscalls (§4.5, §6) ----

    fn read_cstr(&self, addr: u64) -> Result<String, RuntimeError> {
        let mut bytes = Vec::new();
        let mut pos = addr;
        loop {
            let b = self.memory.get(pos, 1)? as u8;
            if b == 0 {
                break;
            }
            bytes.push(b);
            pos += 1;
            if bytes.len() > 4096 {
                return Err(RuntimeError::OutOfBounds);
            }
        }
        String::from_utf8(bytes).map_err(|_| RuntimeError::UndefinedBehavior)
    }

    fn do_read(&mut self) -> bool {
        let fd = self.gpr.raw(registers::RBX);
        let buf_addr = self.gpr.raw(RCX);
        let cap = self.gpr.raw(registers::RDX) as usize;
        let interactive = match self.fds.get(fd) {
            Some(f) => f.is_interactive(),
            None => {
                self.gpr.set_raw(RAX, u64::MAX);
                return true;
            }
        };
        let mut buf = vec![0u8; cap];
        let result = match self.fds.get_mut(fd) {
            Some(f) => f.read(&mut buf, cap),
            None => {
                self.gpr.set_raw(RAX, u64::MAX);
                return true;
            }
        };
        match result {
            Ok(0) if interactive => {
                self.suspended_read = true;
                self.rip = self.rip.wrapping_sub(1);
                true
            }
            Ok(n) => {
                if self.memory.set_bytes(buf_addr, &buf[..n]).is_err() {
                    self.terminate(RuntimeError::OutOfBounds);
                    return false;
                }
                self.gpr.set_raw(RAX, n as u64);
                true
            }
            Err(_) => {
                self.gpr.set_raw(RAX, u64::MAX);
                true
            }
        }
    }

    fn do_write(&mut self) -> bool {
        let fd = self.gpr.raw(registers::RBX);
        let buf_addr = self.gpr.raw(RCX);
        let len = self.gpr.raw(registers::RDX) as u64;
        let bytes = match self.memory.get_bytes(buf_addr, len) {
            Ok(b) => b.to_vec(),
            Err(e) => {
                self.terminate(e);
                return false;
            }
        };
        match self.fds.get_mut(fd) {
            Some(f) => match f.write(&bytes, bytes.len()) {
                Ok(n) => {
                    self.gpr.set_raw(RAX, n as u64);
                    true
                }
                Err(_) => {
                    self.gpr.set_raw(RAX, u64::MAX);
                    true
                }
            },
            None => {
                self.gpr.set_raw(RAX, u64::MAX);
                true
            }
        }
    }

    fn do_open(&mut self) -> bool {
        let path_addr = self.gpr.raw(registers::RBX);
        let flags_val = self.gpr.raw(RCX);
        let path = match self.read_cstr(path_addr) {
            Ok(p) => p,
            Err(e) => {
                self.terminate(e);
                return false;
            }
        };
        let full = self.cwd.join(path);
        let mut opts = std::fs::OpenOptions::new();
        opts.read(flags_val & open_flags::READ != 0);
        opts.write(flags_val & open_flags::WRITE != 0);
        opts.create(flags_val & open_flags::CREATE != 0);
        opts.truncate(flags_val & open_flags::TRUNC != 0);
        opts.append(flags_val & open_flags::APPEND != 0);
        match opts.open(&full) {
            Ok(file) => {
                let fd_obj: Box<dyn crate::syscall::FileDescriptor> = Box::new(HostFile::new(file));
                match self.fds.install(fd_obj) {
                    Some(fd) => self.gpr.set_raw(RAX, fd),
                    None => self.gpr.set_raw(RAX, u64::MAX),
                }
            }
            Err(_) => self.gpr.set_raw(RAX, u64::MAX),
        }
        true
    }

    fn do_close(&mut self) -> bool {
        let fd = self.gpr.raw(registers::RBX);
        self.gpr.set_raw(RAX, if self.fds.close(fd) { 0 } else { u64::MAX });
        true
    }

    fn do_lseek(&mut self) -> bool {
        let fd = self.gpr.raw(registers::RBX);
        let offset = self.gpr.raw(RCX) as i64;
        let origin = match SeekMode::from_u64(self.gpr.raw(registers::RDX)) {
            Some(o) => o,
            None => {
                self.gpr.set_raw(RAX, u64::MAX);
                return true;
            }
        };
        match self.fds.get_mut(fd) {
            Some(f) if f.can_seek() => match f.seek(offset, origin) {
                Ok(pos) => self.gpr.set_raw(RAX, pos),
                Err(_) => self.gpr.set_raw(RAX, u64::MAX),
            },
            _ => self.gpr.set_raw(RAX, u64::MAX),
        }
        true
    }

    fn do_brk(&mut self) -> bool {
        let requested = self.gpr.raw(registers::RBX);
        match self.memory.brk(requested) {
            Some(v) => self.gpr.set_raw(RAX, v),
            None => self.gpr.set_raw(RAX, u64::MAX),
        }
        true
    }

    fn do_fsop(&mut self, code: SyscallCode) -> bool {
        let ok = (|| -> Result<bool, RuntimeError> {
            Ok(match code {
                SyscallCode::Rename => {
                    let old = self.read_cstr(self.gpr.raw(registers::RBX))?;
                    let new = self.read_cstr(self.gpr.raw(RCX))?;
                    std::fs::rename(self.cwd.join(old), self.cwd.join(new)).is_ok()
                }
                SyscallCode::Unlink => {
                    let path = self.read_cstr(self.gpr.raw(registers::RBX))?;
                    std::fs::remove_file(self.cwd.join(path)).is_ok()
                }
                SyscallCode::Mkdir => {
                    let path = self.read_cstr(self.gpr.raw(registers::RBX))?;
                    std::fs::create_dir(self.cwd.join(path)).is_ok()
                }
                SyscallCode::Rmdir => {
                    let path = self.read_cstr(self.gpr.raw(registers::RBX))?;
                    std::fs::remove_dir(self.cwd.join(path)).is_ok()
                }
                _ => unreachable!("do_fsop called with a non-filesystem syscall"),
            })
        })();
        match ok {
            Ok(result) => {
                self.gpr.set_raw(RAX, if result { 0 } else { u64::MAX });
                true
            }
            Err(e) => {
                self.terminate(e);
                false
            }
        }
    }

    fn exec_syscall(&mut self) -> bool {
        let rax = self.gpr.raw(RAX);
        let code = match SyscallCode::from_u64(rax) {
            Some(c) => c,
            None => {
                self.terminate(RuntimeError::UnhandledSyscall);
                return false;
            }
        };
        if code.mutates_filesystem() && !self.rflags.fsf() {
            self.terminate(RuntimeError::FSDisabled);
            return false;
        }
        match code {
            SyscallCode::Exit => {
                let ret = self.gpr.raw(registers::RBX) as i64;
                self.exit(ret);
                false
            }
            SyscallCode::Read => self.do_read(),
            SyscallCode::Write => self.do_write(),
            SyscallCode::Open => self.do_open(),
            SyscallCode::Close => self.do_close(),
            SyscallCode::Lseek => self.do_lseek(),
            SyscallCode::Brk => self.do_brk(),
            SyscallCode::Rename | SyscallCode::Unlink | SyscallCode::Mkdir | SyscallCode::Rmdir => {
                self.do_fsop(code)
            }
        }
    }

    /// Top-level dispatch: decodes and executes one instruction, returning
    /// `false` if the CPU stopped running as a result (halt, fault, exit, or
    /// a suspended blocking read).
    pub(crate) fn dispatch(&mut self, opcode_byte: u8) -> bool {
        let op = match Opcode::from_byte(opcode_byte) {
            Some(o) => o,
            None => {
                self.terminate(RuntimeError::UnknownOp);
                return false;
            }
        };
        let result: Result<(), RuntimeError> = match op {
            Opcode::Nop => Ok(()),
            Opcode::Hlt => {
                self.terminate(RuntimeError::Abort);
                return false;
            }
            Opcode::Syscall => return self.exec_syscall(),
            Opcode::Mov => self.exec_mov(),
            Opcode::Add => self.exec_alu(Alu::Add),
            Opcode::Sub => self.exec_alu(Alu::Sub),
            Opcode::Adc => self.exec_alu(Alu::Adc),
            Opcode::Sbb => self.exec_alu(Alu::Sbb),
            Opcode::Cmp => self.exec_alu(Alu::Cmp),
            Opcode::And => self.exec_alu(Alu::And),
            Opcode::Or => self.exec_alu(Alu::Or),
            Opcode::Xor => self.exec_alu(Alu::Xor),
            Opcode::Test => self.exec_alu(Alu::Test),
            Opcode::MulS | Opcode::MulU | Opcode::DivS | Opcode::DivU => self.exec_mul_div(op),
            Opcode::Inc => self.exec_unary(Unary::Inc),
            Opcode::Dec => self.exec_unary(Unary::Dec),
            Opcode::Not => self.exec_unary(Unary::Not),
            Opcode::Neg => self.exec_unary(Unary::Neg),
            Opcode::Shl => self.exec_shift(Shift::Shl),
            Opcode::Shr => self.exec_shift(Shift::Shr),
            Opcode::Sar => self.exec_shift(Shift::Sar),
            Opcode::Rol => self.exec_shift(Shift::Rol),
            Opcode::Ror => self.exec_shift(Shift::Ror),
            Opcode::Push => self.exec_push(),
            Opcode::Pop => self.exec_pop(),
            Opcode::Jmp => self.exec_jmp(),
            Opcode::Call => self.exec_call(),
            Opcode::Lea => self.exec_lea(),
            Opcode::Ret => self.exec_ret(),
            Opcode::Jcc => return self.exec_jcc(),
            Opcode::Setcc => self.exec_setcc(),
            Opcode::Cmovcc => self.exec_cmovcc(),
            Opcode::Movs | Opcode::Cmps | Opcode::Lods | Opcode::Stos | Opcode::Scas => {
                return self.exec_string_op(op)
            }
            Opcode::Fpu => return self.exec_fpu(),
            Opcode::Vpu => return self.exec_vpu(),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.terminate(e);
                false
            }
        }
    }
}

fn mask_for_bytes(elem_size: usize) -> u64 {
    match elem_size {
        1 => 0xFF,
        2 => 0xFFFF,
        4 => 0xFFFF_FFFF,
        _ => u64::MAX,
    }
}

/// The 32 VCMP predicates (Intel's `CMPPS`/`CMPPD` immediate encoding).
/// Ordered/unordered variants that differ only in signaling-NaN behavior
/// (`_OS` vs `_OQ`, `_US` vs `_UQ`) collapse to the same boolean here: this
/// emulator doesn't model FP exception signaling, only comparison results.
fn vcmp_predicate(pred: u8, a: f64, b: f64) -> bool {
    let unordered = a.is_nan() || b.is_nan();
    match pred & 0x1f {
        0 | 8 | 16 | 24 => !unordered && a == b,
        1 | 17 => !unordered && a < b,
        2 | 18 => !unordered && a <= b,
        3 | 19 => unordered,
        4 | 20 => unordered || a != b,
        5 | 21 => unordered || !(a < b),
        6 | 22 => unordered || !(a <= b),
        7 | 23 => !unordered,
        9 | 25 => unordered || !(a >= b),
        10 | 26 => unordered || !(a > b),
        11 | 27 => false,
        12 | 28 => !unordered && a != b,
        13 | 29 => !unordered && a >= b,
        14 | 30 => !unordered && a > b,
        15 | 31 => true,
        _ => unreachable!(),
    }
}
