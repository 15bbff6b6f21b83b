//! `csx64`: the assemble/link/run driver (§6, §A). A thin shell over the
//! `csx64` library — no opcode, expression, or linking logic lives here,
//! matching how `disassembler-main.rs` is just argument parsing plus calls
//! into `dustbox`.

extern crate clap;
extern crate csx64;

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::process;
use std::time::Instant;

use clap::{App, Arg};

use csx64::assembler;
use csx64::cpu::{Cpu, RuntimeError, DEFAULT_STACK_SIZE};
use csx64::executable::Executable;
use csx64::linker::{self, LinkError};
use csx64::object_file::ObjectFile;

mod terminal;
use terminal::{TerminalInput, TerminalOutput};

/// The canonical entry stub assembled in-memory for script/multi-script
/// mode: calls the renamed entry point, then exits with its return value
/// so a `main` that falls through `ret` behaves like a normal process
/// exit (§8 scenario 1, 4).
const START_STUB_SRC: &str = "EXTERN _start\n\tcall _start\n\tmov rbx, rax\n\tmov rax, 0\n\tsyscall\n";

/// Toolchain (non-guest) failures exit in the 100-199 range (§6).
const EXIT_ASSEMBLE_ERROR: i32 = 100;
const EXIT_LINK_ERROR: i32 = 101;
const EXIT_IO_ERROR: i32 = 102;
const EXIT_FORMAT_ERROR: i32 = 103;
const EXIT_USAGE_ERROR: i32 = 104;

/// A CPU runtime fault (as opposed to a clean guest `exit`) reports this
/// negative sentinel (§6).
const EXIT_CPU_FAULT: i32 = -1;

fn main() {
    let matches = App::new("csx64")
        .version("0.1")
        .about("Assembles, links, and runs CSX64 virtual-machine images")
        .arg(
            Arg::with_name("INPUT")
                .help("Source files (script mode), object files (-l), or an executable image (-x)")
                .required(true)
                .multiple(true),
        )
        .arg(Arg::with_name("assemble").short("c").long("assemble").help("Assemble each INPUT to an object file, do not link or run"))
        .arg(Arg::with_name("link").short("k").long("link").help("Link INPUTs (already-assembled object files) to an executable, do not run"))
        .arg(Arg::with_name("execute").short("x").long("execute").help("Run a single, already-linked executable image directly"))
        .arg(Arg::with_name("output").short("o").long("output").takes_value(true).help("Output path (object, executable, or unused in run modes)"))
        .arg(Arg::with_name("entry").long("entry").takes_value(true).default_value("main").help("Entry point symbol name"))
        .arg(Arg::with_name("stdlib-root").long("stdlib-root").takes_value(true).help("Directory containing a prebuilt start.o to use instead of the builtin entry stub"))
        .arg(Arg::with_name("fs").long("fs").help("Enable filesystem-mutating syscalls (sets FSF)"))
        .arg(Arg::with_name("time").long("time").help("Report elapsed wall-clock execution time on stderr"))
        .arg(Arg::with_name("dump").long("dump").help("Print a JSON summary of each assembled/linked artifact to stdout instead of running it"))
        .arg(Arg::with_name("args").multiple(true).last(true).help("Arguments forwarded to the guest program's argv"))
        .get_matches();

    let inputs: Vec<&str> = matches.values_of("INPUT").unwrap().collect();
    let entry_point = matches.value_of("entry").unwrap();
    let guest_args: Vec<String> = matches.values_of("args").map(|v| v.map(str::to_string).collect()).unwrap_or_default();

    let code = if matches.is_present("execute") {
        run_bare_executable(inputs, &matches, guest_args)
    } else if matches.is_present("assemble") {
        run_assemble_only(inputs, &matches)
    } else if matches.is_present("link") {
        run_link_only(inputs, entry_point, &matches)
    } else {
        run_script(inputs, entry_point, &matches, guest_args)
    };

    process::exit(code);
}

fn read_file(path: &str) -> io::Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

fn assemble_file(path: &str) -> Result<ObjectFile, i32> {
    let bytes = match read_file(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("csx64: cannot read `{}`: {}", path, e);
            return Err(EXIT_IO_ERROR);
        }
    };
    let mut obj = ObjectFile::new();
    if let Err(e) = assembler::assemble(&bytes[..], &mut obj, None) {
        eprintln!("csx64: {}: {}", path, e);
        return Err(EXIT_ASSEMBLE_ERROR);
    }
    Ok(obj)
}

fn run_assemble_only(inputs: Vec<&str>, matches: &clap::ArgMatches) -> i32 {
    if inputs.len() > 1 && matches.value_of("output").is_some() {
        eprintln!("csx64: --output requires a single input in assemble-only mode");
        return EXIT_USAGE_ERROR;
    }
    for path in &inputs {
        let obj = match assemble_file(path) {
            Ok(o) => o,
            Err(code) => return code,
        };
        if matches.is_present("dump") {
            if let Err(code) = dump_object(path, &obj) {
                return code;
            }
            continue;
        }
        let out_path = matches.value_of("output").map(str::to_string).unwrap_or_else(|| default_object_path(path));
        if let Err(e) = write_to_path(&out_path, |w| obj.write_to(w)) {
            eprintln!("csx64: cannot write `{}`: {}", out_path, e);
            return EXIT_IO_ERROR;
        }
    }
    0
}

fn dump_object(path: &str, obj: &ObjectFile) -> Result<(), i32> {
    match obj.dump_json() {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            eprintln!("csx64: {}: failed to serialize object dump: {}", path, e);
            Err(EXIT_FORMAT_ERROR)
        }
    }
}

fn dump_executable(path: &str, exe: &Executable) -> Result<(), i32> {
    match exe.dump_json() {
        Ok(json) => {
            println!("{}", json);
            Ok(())
        }
        Err(e) => {
            eprintln!("csx64: {}: failed to serialize executable dump: {}", path, e);
            Err(EXIT_FORMAT_ERROR)
        }
    }
}

fn run_link_only(inputs: Vec<&str>, entry_point: &str, matches: &clap::ArgMatches) -> i32 {
    let mut objects = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let bytes = match read_file(path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("csx64: cannot read `{}`: {}", path, e);
                return EXIT_IO_ERROR;
            }
        };
        match ObjectFile::read_from(&mut &bytes[..]) {
            Ok(obj) => objects.push((path.to_string(), obj)),
            Err(e) => {
                eprintln!("csx64: {}: not a valid object file: {}", path, e);
                return EXIT_FORMAT_ERROR;
            }
        }
    }
    let exe = match linker::link(objects, entry_point) {
        Ok(exe) => exe,
        Err(e) => return report_link_error(&e),
    };
    let out_path = matches.value_of("output").unwrap_or("a.out");
    if matches.is_present("dump") {
        return match dump_executable(out_path, &exe) {
            Ok(()) => 0,
            Err(code) => code,
        };
    }
    if let Err(e) = write_to_path(out_path, |w| exe.write_to(w)) {
        eprintln!("csx64: cannot write `{}`: {}", out_path, e);
        return EXIT_IO_ERROR;
    }
    0
}

fn run_script(inputs: Vec<&str>, entry_point: &str, matches: &clap::ArgMatches, guest_args: Vec<String>) -> i32 {
    let stub = match load_start_stub(matches.value_of("stdlib-root")) {
        Ok(o) => o,
        Err(code) => return code,
    };
    let mut objects = vec![("<builtin _start stub>".to_string(), stub)];
    for path in &inputs {
        match assemble_file(path) {
            Ok(obj) => objects.push((path.to_string(), obj)),
            Err(code) => return code,
        }
    }

    let exe = match linker::link(objects, entry_point) {
        Ok(exe) => exe,
        Err(e) => return report_link_error(&e),
    };

    if matches.is_present("dump") {
        return match dump_executable(inputs[0], &exe) {
            Ok(()) => 0,
            Err(code) => code,
        };
    }

    let mut argv = Vec::with_capacity(1 + guest_args.len());
    argv.push(inputs[0].to_string());
    argv.extend(guest_args);
    run_executable(&exe, argv, matches)
}

fn run_bare_executable(inputs: Vec<&str>, matches: &clap::ArgMatches, guest_args: Vec<String>) -> i32 {
    if inputs.len() != 1 {
        eprintln!("csx64: -x/--execute takes exactly one INPUT");
        return EXIT_USAGE_ERROR;
    }
    let bytes = match read_file(inputs[0]) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("csx64: cannot read `{}`: {}", inputs[0], e);
            return EXIT_IO_ERROR;
        }
    };
    let exe = match Executable::read_from(&mut &bytes[..]) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("csx64: {}: not a valid executable: {}", inputs[0], e);
            return EXIT_FORMAT_ERROR;
        }
    };
    if matches.is_present("dump") {
        return match dump_executable(inputs[0], &exe) {
            Ok(()) => 0,
            Err(code) => code,
        };
    }
    let mut argv = Vec::with_capacity(1 + guest_args.len());
    argv.push(inputs[0].to_string());
    argv.extend(guest_args);
    run_executable(&exe, argv, matches)
}

fn run_executable(exe: &Executable, argv: Vec<String>, matches: &clap::ArgMatches) -> i32 {
    let mut cpu = Cpu::new();
    cpu.initialize(exe, &argv, DEFAULT_STACK_SIZE);
    if matches.is_present("fs") {
        cpu.set_fsf(true);
    }

    // Tie standard streams to fd 0/1/2 before the tick loop, matching
    // `RunConsole`'s wiring in the original driver.
    cpu.fds_mut().install_at(0, Box::new(TerminalInput::new()));
    cpu.fds_mut().install_at(1, Box::new(TerminalOutput::stdout()));
    cpu.fds_mut().install_at(2, Box::new(TerminalOutput::stderr()));

    let start = Instant::now();
    while cpu.running() {
        cpu.tick(1_000_000);
        if cpu.suspended_read() {
            // Stdin is wired non-interactively (§ terminal adapters), so a
            // guest can never actually suspend on it; this guards against a
            // future interactive descriptor leaving the loop spinning.
            break;
        }
    }
    if matches.is_present("time") {
        eprintln!("csx64: elapsed {:?}", start.elapsed());
    }

    match cpu.error() {
        RuntimeError::None => cpu.return_value() as i32,
        err => {
            eprintln!("csx64: runtime error: {}", err);
            EXIT_CPU_FAULT
        }
    }
}

fn load_start_stub(stdlib_root: Option<&str>) -> Result<ObjectFile, i32> {
    if let Some(root) = stdlib_root {
        let path = format!("{}/start.o", root);
        let bytes = match read_file(&path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("csx64: cannot read stdlib start stub `{}`: {}", path, e);
                return Err(EXIT_IO_ERROR);
            }
        };
        return ObjectFile::read_from(&mut &bytes[..]).map_err(|e| {
            eprintln!("csx64: {}: not a valid object file: {}", path, e);
            EXIT_FORMAT_ERROR
        });
    }
    let mut obj = ObjectFile::new();
    assembler::assemble(START_STUB_SRC.as_bytes(), &mut obj, None).map_err(|e| {
        eprintln!("csx64: internal error assembling builtin start stub: {}", e);
        EXIT_ASSEMBLE_ERROR
    })?;
    Ok(obj)
}

fn report_link_error(e: &LinkError) -> i32 {
    eprintln!("csx64: link error: {}", e);
    EXIT_LINK_ERROR
}

fn default_object_path(source_path: &str) -> String {
    match source_path.rfind('.') {
        Some(i) => format!("{}.o", &source_path[..i]),
        None => format!("{}.o", source_path),
    }
}

fn write_to_path(path: &str, f: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>) -> io::Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    f(&mut w)?;
    w.flush()
}
