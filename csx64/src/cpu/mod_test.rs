use super::*;
use crate::opcode::Opcode;

fn hlt_exe() -> Executable {
    Executable::new(vec![Opcode::Hlt.as_byte()], vec![], vec![], 0)
}

#[test]
fn initialize_sets_running_and_lays_out_argv() {
    let mut cpu = Cpu::deterministic();
    let exe = hlt_exe();
    cpu.initialize(&exe, &["prog".to_string(), "arg1".to_string()], 256);
    assert!(cpu.running());
    assert_eq!(cpu.rip(), 0);
    assert_eq!(cpu.gpr().raw(RDI), 2);
    assert!(cpu.gpr().raw(RSI) > 0);
}

#[test]
fn tick_runs_hlt_and_stops() {
    let mut cpu = Cpu::deterministic();
    let exe = hlt_exe();
    cpu.initialize(&exe, &[], 256);
    let n = cpu.tick(10);
    assert_eq!(n, 1);
    assert!(!cpu.running());
    assert_eq!(cpu.error(), RuntimeError::Abort);
}

#[test]
fn terminate_is_idempotent_and_closes_fds() {
    let mut cpu = Cpu::deterministic();
    cpu.initialize(&hlt_exe(), &[], 256);
    cpu.terminate(RuntimeError::OutOfBounds);
    assert_eq!(cpu.error(), RuntimeError::OutOfBounds);
    assert!(!cpu.running());
    cpu.terminate(RuntimeError::Abort);
    assert_eq!(cpu.error(), RuntimeError::OutOfBounds);
}

#[test]
fn exit_sets_return_value_without_touching_error() {
    let mut cpu = Cpu::deterministic();
    cpu.initialize(&hlt_exe(), &[], 256);
    cpu.exit(7);
    assert!(!cpu.running());
    assert_eq!(cpu.return_value(), 7);
    assert_eq!(cpu.error(), RuntimeError::None);
}

#[test]
fn push_pop_stack_round_trips() {
    let mut cpu = Cpu::deterministic();
    cpu.initialize(&hlt_exe(), &[], 256);
    let rsp_before = cpu.gpr().raw(RSP);
    cpu.push_stack(0xDEAD_BEEF, 8).unwrap();
    assert_eq!(cpu.gpr().raw(RSP), rsp_before - 8);
    assert_eq!(cpu.pop_stack(8).unwrap(), 0xDEAD_BEEF);
    assert_eq!(cpu.gpr().raw(RSP), rsp_before);
}

#[test]
fn push_below_stack_barrier_overflows() {
    let mut cpu = Cpu::deterministic();
    cpu.memory = Memory::new(vec![0u8; 64], 0, 0, 32);
    cpu.gpr.set_raw(RSP, 36);
    assert_eq!(cpu.push_stack(1, 8), Err(RuntimeError::StackOverflow));
    cpu.gpr.set_raw(RSP, 40);
    assert!(cpu.push_stack(1, 8).is_ok());
}

#[test]
fn resume_suspended_read_clears_flag() {
    let mut cpu = Cpu::deterministic();
    cpu.initialize(&hlt_exe(), &[], 256);
    cpu.suspended_read = true;
    cpu.resume_suspended_read();
    assert!(!cpu.suspended_read());
}
