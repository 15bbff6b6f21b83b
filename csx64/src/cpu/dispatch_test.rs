use super::*;
use crate::cpu::memory::Memory;
use crate::cpu::registers::{RBX, RDX, RSP};

/// Builds a CPU with `code` as its text segment, 128 bytes of scratch memory
/// after it (writable, counted as "stack" too), and RSP parked at the very
/// top so pushes have room to grow downward.
fn test_cpu(code: &[u8]) -> Cpu {
    let mut cpu = Cpu::deterministic();
    let barrier = code.len() as u64;
    let mut data = code.to_vec();
    data.resize(code.len() + 128, 0);
    let total = data.len() as u64;
    cpu.memory = Memory::new(data, barrier, barrier, barrier);
    cpu.gpr.set_raw(RSP, total);
    cpu.running = true;
    cpu.rip = 0;
    cpu
}

fn addr_imm_only(buf: &mut Vec<u8>, addr: u64) {
    buf.push(opcode::address_fmt::pack_byte1(true, 0, 0, false, false));
    buf.extend_from_slice(&addr.to_le_bytes());
}

#[test]
fn mov_add_computes_sum_and_clears_zf() {
    let mut code = Vec::new();
    code.push(Opcode::Mov.as_byte());
    code.push(opcode::binary_fmt::pack_byte1(RAX, 3, false, false));
    code.push(opcode::binary_fmt::pack_byte2(opcode::binary_fmt::MODE_IMM, 0));
    code.extend_from_slice(&10u64.to_le_bytes());

    code.push(Opcode::Add.as_byte());
    code.push(opcode::binary_fmt::pack_byte1(RAX, 3, false, false));
    code.push(opcode::binary_fmt::pack_byte2(opcode::binary_fmt::MODE_IMM, 0));
    code.extend_from_slice(&5u64.to_le_bytes());

    code.push(Opcode::Hlt.as_byte());

    let mut cpu = test_cpu(&code);
    let dispatched = cpu.tick(3);
    assert_eq!(dispatched, 3);
    assert_eq!(cpu.gpr.raw(RAX), 15);
    assert!(!cpu.rflags.zf());
    assert!(!cpu.running());
    assert_eq!(cpu.error(), RuntimeError::Abort);
}

#[test]
fn sub_into_zero_sets_zf_and_clears_cf() {
    let mut code = Vec::new();
    code.push(Opcode::Sub.as_byte());
    code.push(opcode::binary_fmt::pack_byte1(RAX, 3, false, false));
    code.push(opcode::binary_fmt::pack_byte2(opcode::binary_fmt::MODE_IMM, 0));
    code.extend_from_slice(&7u64.to_le_bytes());

    let mut cpu = test_cpu(&code);
    cpu.gpr.set_raw(RAX, 7);
    cpu.tick(1);
    assert_eq!(cpu.gpr.raw(RAX), 0);
    assert!(cpu.rflags.zf());
    assert!(!cpu.rflags.cf());
}

#[test]
fn jcc_taken_overwrites_rip() {
    let mut code = Vec::new();
    code.push(Opcode::Jcc.as_byte());
    code.push(Condition::Z.code());
    code.push(opcode::imm_rm_fmt::pack_byte1(0, 3, opcode::imm_rm_fmt::MODE_IMM));
    code.extend_from_slice(&100u64.to_le_bytes());

    let mut cpu = test_cpu(&code);
    cpu.rflags.set_zf(true);
    cpu.tick(1);
    assert_eq!(cpu.rip(), 100);
}

#[test]
fn jcc_not_taken_falls_through() {
    let mut code = Vec::new();
    code.push(Opcode::Jcc.as_byte());
    code.push(Condition::Z.code());
    code.push(opcode::imm_rm_fmt::pack_byte1(0, 3, opcode::imm_rm_fmt::MODE_IMM));
    code.extend_from_slice(&100u64.to_le_bytes());
    let len = code.len() as u64;

    let mut cpu = test_cpu(&code);
    cpu.rflags.set_zf(false);
    cpu.tick(1);
    assert_eq!(cpu.rip(), len);
}

#[test]
fn push_pop_use_fixed_eight_byte_slots_regardless_of_operand_size() {
    let mut code = Vec::new();
    code.push(Opcode::Push.as_byte());
    code.push(opcode::imm_rm_fmt::pack_byte1(0, 0, opcode::imm_rm_fmt::MODE_IMM));
    code.push(0x7Fu8);

    code.push(Opcode::Pop.as_byte());
    code.push(opcode::imm_rm_fmt::pack_byte1(RBX, 3, opcode::imm_rm_fmt::MODE_REG));

    code.push(Opcode::Hlt.as_byte());

    let mut cpu = test_cpu(&code);
    let rsp_before = cpu.gpr.raw(RSP);
    cpu.tick(2);
    assert_eq!(cpu.gpr.raw(RSP), rsp_before);
    assert_eq!(cpu.gpr.raw(RBX), 0x7F);
}

#[test]
fn syscall_exit_stops_cpu_with_guest_return_value() {
    let mut code = Vec::new();
    code.push(Opcode::Syscall.as_byte());
    code.push(Opcode::Hlt.as_byte());

    let mut cpu = test_cpu(&code);
    cpu.gpr.set_raw(RAX, 0); // SyscallCode::Exit
    cpu.gpr.set_raw(RBX, 42);

    let dispatched = cpu.tick(5);
    assert_eq!(dispatched, 1);
    assert!(!cpu.running());
    assert_eq!(cpu.return_value(), 42);
    assert_eq!(cpu.error(), RuntimeError::None);
}

#[test]
fn movsb_rep_with_otrf_copies_whole_block_in_one_tick() {
    let mut code = Vec::new();
    code.push(Opcode::Movs.as_byte());
    code.push((RepKind::Rep.code() << 2) | 0);
    code.push(Opcode::Hlt.as_byte());

    let mut cpu = test_cpu(&code);
    cpu.rflags.set_otrf(true);
    let src = code.len() as u64 + 16;
    let dst = code.len() as u64 + 32;
    cpu.memory.set_bytes(src, b"hello").unwrap();
    cpu.gpr.set_raw(RSI, src);
    cpu.gpr.set_raw(RDI, dst);
    cpu.gpr.set_raw(RCX, 5);

    cpu.tick(1);

    assert_eq!(cpu.memory.get_bytes(dst, 5).unwrap(), b"hello");
    assert_eq!(cpu.gpr.raw(RCX), 0);
}

#[test]
fn movsb_rep_without_otrf_runs_one_iteration_per_tick() {
    let mut code = Vec::new();
    code.push(Opcode::Movs.as_byte());
    code.push((RepKind::Rep.code() << 2) | 0);
    code.push(Opcode::Hlt.as_byte());

    let mut cpu = test_cpu(&code);
    let src = code.len() as u64 + 16;
    let dst = code.len() as u64 + 32;
    cpu.memory.set_bytes(src, b"ab").unwrap();
    cpu.gpr.set_raw(RSI, src);
    cpu.gpr.set_raw(RDI, dst);
    cpu.gpr.set_raw(RCX, 2);

    cpu.tick(1);
    assert_eq!(cpu.gpr.raw(RCX), 1);
    assert_eq!(cpu.rip(), 0);

    cpu.tick(1);
    assert_eq!(cpu.gpr.raw(RCX), 0);
    assert_eq!(cpu.rip(), 2);

    assert_eq!(cpu.memory.get_bytes(dst, 2).unwrap(), b"ab");
}

#[test]
fn fpu_fld_fadd_fstp_round_trip_through_memory() {
    let a_off = 64u64;
    let b_off = 80u64;
    let out_off = 96u64;

    let mut code = Vec::new();
    code.push(Opcode::Fpu.as_byte());
    code.push(fpu_ops::FLD);
    code.push(opcode::fpu_operand::MEM_F64);
    addr_imm_only(&mut code, a_off);

    code.push(Opcode::Fpu.as_byte());
    code.push(fpu_ops::FADD);
    code.push(opcode::fpu_operand::MEM_F64);
    addr_imm_only(&mut code, b_off);

    code.push(Opcode::Fpu.as_byte());
    code.push(fpu_ops::FSTP);
    code.push(opcode::fpu_operand::MEM_F64);
    addr_imm_only(&mut code, out_off);

    code.push(Opcode::Hlt.as_byte());

    let mut cpu = test_cpu(&code);
    cpu.memory.set_bytes(a_off, &3.5f64.to_le_bytes()).unwrap();
    cpu.memory.set_bytes(b_off, &1.5f64.to_le_bytes()).unwrap();

    cpu.tick(4);

    let result = f64::from_bits(cpu.memory.get(out_off, 8).unwrap());
    assert_eq!(result, 5.0);
    assert!(cpu.fpu.is_empty(0));
}

#[test]
fn vpu_add_i_combines_matching_lanes() {
    let mut code = Vec::new();
    code.push(Opcode::Vpu.as_byte());
    code.push(vpu_ops::ADD_I);
    code.push(opcode::vpu_shape::pack(2, 0, false, false, true, false));
    code.push(0); // dest reg
    code.push(0); // src_is_mem = false
    code.push(1); // src reg
    code.push(Opcode::Hlt.as_byte());

    let mut cpu = test_cpu(&code);
    cpu.vpu.set_lane(0, 4, 0, 7);
    cpu.vpu.set_lane(1, 4, 0, 35);

    cpu.tick(1);

    assert_eq!(cpu.vpu.lane(0, 4, 0), 42);
}

#[test]
fn vpu_cmp_f_eq_predicate_produces_all_ones_mask_on_equality() {
    let mut code = Vec::new();
    code.push(Opcode::Vpu.as_byte());
    code.push(vpu_ops::CMP_F);
    code.push(opcode::vpu_shape::pack(2, 0, false, false, true, false));
    code.push(0); // dest reg
    code.push(0); // predicate 0 = EQ_OQ
    code.push(0); // src_is_mem = false
    code.push(1); // src reg

    let mut cpu = test_cpu(&code);
    cpu.vpu.set_lane(0, 4, 0, (1.0f32).to_bits() as u64);
    cpu.vpu.set_lane(1, 4, 0, (1.0f32).to_bits() as u64);

    cpu.tick(1);

    assert_eq!(cpu.vpu.lane(0, 4, 0), 0xFFFF_FFFF);
}

#[test]
fn vpu_cmp_f_lt_predicate_is_false_when_dest_is_not_less() {
    let mut code = Vec::new();
    code.push(Opcode::Vpu.as_byte());
    code.push(vpu_ops::CMP_F);
    code.push(opcode::vpu_shape::pack(2, 0, false, false, true, false));
    code.push(0); // dest reg
    code.push(1); // predicate 1 = LT_OS
    code.push(0); // src_is_mem = false
    code.push(1); // src reg

    let mut cpu = test_cpu(&code);
    cpu.vpu.set_lane(0, 4, 0, (2.0f32).to_bits() as u64);
    cpu.vpu.set_lane(1, 4, 0, (1.0f32).to_bits() as u64);

    cpu.tick(1);

    assert_eq!(cpu.vpu.lane(0, 4, 0), 0);
}

#[test]
fn vpu_cmp_f_unord_predicate_detects_nan() {
    let mut code = Vec::new();
    code.push(Opcode::Vpu.as_byte());
    code.push(vpu_ops::CMP_F);
    code.push(opcode::vpu_shape::pack(2, 0, false, false, true, false));
    code.push(0); // dest reg
    code.push(3); // predicate 3 = UNORD_Q
    code.push(0); // src_is_mem = false
    code.push(1); // src reg

    let mut cpu = test_cpu(&code);
    cpu.vpu.set_lane(0, 4, 0, f32::NAN.to_bits() as u64);
    cpu.vpu.set_lane(1, 4, 0, (1.0f32).to_bits() as u64);

    cpu.tick(1);

    assert_eq!(cpu.vpu.lane(0, 4, 0), 0xFFFF_FFFF);
}
