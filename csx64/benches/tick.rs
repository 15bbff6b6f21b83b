#[macro_use]
extern crate criterion;

extern crate csx64;

use criterion::Criterion;

use csx64::assembler;
use csx64::cpu::Cpu;
use csx64::linker;
use csx64::object_file::ObjectFile;

fn counting_loop_exe() -> csx64::executable::Executable {
    let mut start = ObjectFile::new();
    assembler::assemble(
        "EXTERN _start\n\tcall _start\n\tmov rbx, rax\n\tmov rax, 0\n\tsyscall\n".as_bytes(),
        &mut start,
        None,
    )
    .expect("stub should assemble");

    let mut main = ObjectFile::new();
    assembler::assemble(
        "GLOBAL main\nmain:\n\tmov rcx, 0xffff\nloop_top:\n\tdec rcx\n\tjnz loop_top\n\tmov rax, 0\n\tret\n".as_bytes(),
        &mut main,
        None,
    )
    .expect("loop body should assemble");

    linker::link(
        vec![("start.o".to_string(), start), ("main.o".to_string(), main)],
        "main",
    )
    .expect("link should succeed")
}

fn tick_counting_loop(c: &mut Criterion) {
    let exe = counting_loop_exe();
    c.bench_function("tick a decrement/jnz loop to completion", |b| {
        b.iter(|| {
            let mut cpu = Cpu::deterministic();
            cpu.initialize(&exe, &["prog".to_string()], 4096);
            while cpu.running() {
                cpu.tick(1_000_000);
            }
        })
    });
}

criterion_group!(benches, tick_counting_loop);
criterion_main!(benches);
