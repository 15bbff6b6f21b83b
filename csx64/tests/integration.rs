//! End-to-end assemble -> link -> execute coverage, one test per scenario
//! the design notes call out as a minimum bar for the pipeline as a whole.

use csx64::assembler;
use csx64::cpu::{registers, Cpu, RuntimeError};
use csx64::linker;
use csx64::object_file::{ObjectFile, SegmentKind};

fn asm(src: &str) -> ObjectFile {
    let mut obj = ObjectFile::new();
    assembler::assemble(src.as_bytes(), &mut obj, None).expect("assembly should succeed");
    obj
}

const START_STUB: &str = "EXTERN _start\n\tcall _start\n\tmov rbx, rax\n\tmov rax, 0\n\tsyscall\n";

fn run(objects: Vec<(&str, ObjectFile)>) -> Cpu {
    let objects: Vec<(String, ObjectFile)> =
        objects.into_iter().map(|(n, o)| (n.to_string(), o)).collect();
    let exe = linker::link(objects, "main").expect("link should succeed");
    let mut cpu = Cpu::deterministic();
    cpu.initialize(&exe, &["prog".to_string()], 4096);
    while cpu.running() {
        cpu.tick(1000);
        if cpu.suspended_read() {
            break;
        }
    }
    cpu
}

#[test]
fn hlt_without_exiting_aborts() {
    let start = asm(START_STUB);
    let main = asm("GLOBAL main\nmain:\n\tmov rax, 5\n\thlt\n");
    let cpu = run(vec![("start.o", start), ("main.o", main)]);
    assert!(!cpu.running());
    assert_eq!(cpu.error(), RuntimeError::Abort);
}

#[test]
fn exit_syscall_sets_the_return_value() {
    let start = asm(START_STUB);
    let main = asm("GLOBAL main\nmain:\n\tmov rax, 0\n\tmov rbx, 42\n\tsyscall\n");
    let cpu = run(vec![("start.o", start), ("main.o", main)]);
    assert_eq!(cpu.error(), RuntimeError::None);
    assert_eq!(cpu.return_value(), 42);
}

#[test]
fn returning_from_main_falls_through_to_the_stub_exit() {
    // `main` never calls `syscall` itself; the stub's own `mov rax, 0 /
    // syscall` after the `call` is what actually ends the program, with
    // RBX carrying `main`'s RAX return value (the stub's `mov rbx, rax`).
    let start = asm(START_STUB);
    let main = asm("GLOBAL main\nmain:\n\tmov rax, 7\n\tret\n");
    let cpu = run(vec![("start.o", start), ("main.o", main)]);
    assert_eq!(cpu.error(), RuntimeError::None);
    assert_eq!(cpu.return_value(), 7);
}

#[test]
fn times_directive_repeats_a_data_byte() {
    let obj = asm("SEGMENT .rodata\nTIMES 4 DB 0xAA\n");
    assert_eq!(obj.segment(SegmentKind::RoData), &[0xAA, 0xAA, 0xAA, 0xAA]);
}

#[test]
fn self_ptrdiff_reduces_to_zero() {
    let obj = asm("SEGMENT .rodata\nDB $ - $\n");
    assert_eq!(obj.segment(SegmentKind::RoData), &[0]);
}

#[test]
fn cross_object_global_value_reaches_a_register() {
    let start = asm(START_STUB);
    let def = asm("GLOBAL the_answer\nthe_answer: EQU 7\n");
    let main = asm(
        "GLOBAL main\nEXTERN the_answer\nmain:\n\tmov rax, the_answer\n\tmov rbx, rax\n\tmov rax, 0\n\tsyscall\n",
    );
    let cpu = run(vec![("start.o", start), ("def.o", def), ("main.o", main)]);
    assert_eq!(cpu.error(), RuntimeError::None);
    assert_eq!(cpu.return_value(), 7);
}

#[test]
fn duplicate_string_literal_in_one_object_is_interned_once() {
    let obj = asm(
        "GLOBAL a\nGLOBAL b\nSEGMENT .rodata\na: DQ $str(\"hello\")\nb: DQ $str(\"hello\")\n",
    );
    assert_eq!(obj.literal_stats().interned, 1);
    assert_eq!(obj.literal_stats().reused, 1);
}

#[test]
fn register_state_is_randomized_but_deterministic_under_the_fixed_seed() {
    let start = asm(START_STUB);
    let main = asm("GLOBAL main\nmain:\n\tmov rax, 0\n\tmov rbx, 0\n\tsyscall\n");
    let cpu_a = run(vec![("start.o", start.clone()), ("main.o", main.clone())]);
    let cpu_b = run(vec![("start.o", start), ("main.o", main)]);
    assert_eq!(cpu_a.gpr().raw(registers::RCX), cpu_b.gpr().raw(registers::RCX));
}
