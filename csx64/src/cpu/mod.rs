//! The instruction execution engine (§3 `CPU state`, §4.5, §5).
//!
//! `Cpu` owns its register files, FPU/VPU banks, flags, barrier-checked
//! memory, file-descriptor table and PRNG for its entire lifetime (§5). The
//! only entry points a driver needs are `initialize`, `tick`,
//! `resume_suspended_read`, and the error/return-value getters; `terminate`
//! and `exit` are called internally by instruction handlers.

pub mod dispatch;
pub mod flags;
pub mod fpu;
pub mod memory;
pub mod registers;

#[cfg(test)]
#[path = "./mod_test.rs"]
mod mod_test;

use rand::{RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;

use crate::executable::Executable;
use crate::syscall::FdTable;
use flags::RFlags;
use fpu::Fpu;
use memory::Memory;
use registers::{GprFile, VpuFile, RBP, RDI, RSI, RSP};

/// Runtime errors the CPU can set on itself (§7). Never thrown as a Rust
/// panic/exception — always surfaced through `Cpu::error()` after
/// `terminate`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RuntimeError {
    #[default]
    None,
    OutOfBounds,
    UnhandledSyscall,
    UndefinedBehavior,
    ArithmeticError,
    Abort,
    IOFailure,
    FSDisabled,
    AccessViolation,
    InsufficientFDs,
    FDNotInUse,
    NotImplemented,
    StackOverflow,
    FPUStackOverflow,
    FPUStackUnderflow,
    FPUError,
    FPUAccessViolation,
    AlignmentViolation,
    UnknownOp,
    FilePermissions,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Default stack size reserved on top of an executable's own image when no
/// explicit size is requested by a driver.
pub const DEFAULT_STACK_SIZE: u64 = 2 * 1024 * 1024;

pub struct Cpu {
    pub(crate) gpr: GprFile,
    pub(crate) rflags: RFlags,
    pub(crate) rip: u64,
    pub(crate) fpu: Fpu,
    pub(crate) vpu: VpuFile,
    pub(crate) mxcsr: u32,
    pub(crate) fds: FdTable,
    pub(crate) memory: Memory,
    pub(crate) rng: XorShiftRng,
    /// Working directory rename/unlink/mkdir/rmdir/open resolve relative
    /// paths against (§C.3 supplement: captured once, not re-queried per
    /// syscall).
    pub(crate) cwd: std::path::PathBuf,

    running: bool,
    suspended_read: bool,
    error: RuntimeError,
    return_value: i64,
}

impl Cpu {
    /// An uninitialized CPU (§3 lifecycle: "created uninitialized").
    pub fn new() -> Self {
        Cpu {
            gpr: GprFile::new(),
            rflags: RFlags::new(),
            rip: 0,
            fpu: Fpu::new(),
            vpu: VpuFile::new(),
            mxcsr: 0x1F80,
            fds: FdTable::new(crate::syscall::DEFAULT_FD_COUNT),
            memory: Memory::new(Vec::new(), 0, 0, 0),
            rng: XorShiftRng::from_seed([0x5A; 16]),
            cwd: std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from(".")),
            running: false,
            suspended_read: false,
            error: RuntimeError::None,
            return_value: 0,
        }
    }

    /// Deterministic variant used by tests (§B ambient-stack note): seeds
    /// the PRNG from a fixed value and is otherwise identical.
    pub fn deterministic() -> Self {
        let mut cpu = Self::new();
        cpu.rng = XorShiftRng::from_seed([0x42; 16]);
        cpu
    }

    /// Allocates memory sized `exe.total_size() + stack_size`, copies
    /// text/rodata/data, zero-fills bss and the stack, sets the three
    /// barriers, randomizes general-purpose and vector registers, calls
    /// FINIT, sets RFLAGS to 2, lays out argv on the stack per §4.5, and
    /// marks the CPU running.
    pub fn initialize(&mut self, exe: &Executable, argv: &[String], stack_size: u64) {
        let total = exe.total_size() + stack_size;
        let mut data = Vec::with_capacity(total as usize);
        data.extend_from_slice(exe.content());
        data.resize(total as usize, 0);

        let executable_barrier = exe.text_seglen();
        let readonly_barrier = exe.text_seglen() + exe.rodata_seglen();
        let stack_barrier = exe.total_size();

        self.memory = Memory::new(data, executable_barrier, readonly_barrier, stack_barrier);

        self.gpr = GprFile::new();
        for r in 0..registers::GPR_COUNT as u8 {
            self.gpr.set_raw(r, self.rng.next_u64());
        }
        self.vpu = VpuFile::new();
        for r in 0..registers::VPU_COUNT as u8 {
            self.rng.fill_bytes(self.vpu.bytes_mut(r));
        }

        self.fpu.finit();
        self.rflags = RFlags::new();
        self.rip = 0;
        self.error = RuntimeError::None;
        self.return_value = 0;
        self.suspended_read = false;

        // Lay out argv at the top of memory: each string (NUL-terminated),
        // then a null-terminated pointer array just below them.
        let mut cursor = total;
        let mut ptrs = Vec::with_capacity(argv.len() + 1);
        for arg in argv {
            let bytes_len = arg.len() as u64 + 1;
            cursor -= bytes_len;
            let mut bytes = arg.as_bytes().to_vec();
            bytes.push(0);
            self.memory.set_bytes(cursor, &bytes).expect("argv string fits below stack_barrier");
            ptrs.push(cursor);
        }
        ptrs.push(0);

        let ptr_table_size = (ptrs.len() as u64) * 8;
        cursor -= ptr_table_size;
        cursor &= !7u64; // keep pointer table 8-byte aligned
        let argv_ptr = cursor;
        for (i, p) in ptrs.iter().enumerate() {
            self.memory.set(argv_ptr + i as u64 * 8, 8, *p).expect("argv pointer table fits below stack_barrier");
        }

        self.gpr.set_raw(RDI, argv.len() as u64);
        self.gpr.set_raw(RSI, argv_ptr);
        self.gpr.set_raw(RSP, argv_ptr);

        // Push argv pointer then argc so either calling convention works.
        self.push_stack(argv_ptr, 8).expect("initial stack has room for argv/argc");
        self.push_stack(argv.len() as u64, 8).expect("initial stack has room for argv/argc");
        self.gpr.set_raw(RBP, self.gpr.raw(RSP));

        self.running = true;
    }

    pub fn running(&self) -> bool {
        self.running
    }

    pub fn suspended_read(&self) -> bool {
        self.suspended_read
    }

    pub fn error(&self) -> RuntimeError {
        self.error
    }

    pub fn return_value(&self) -> i64 {
        self.return_value
    }

    pub fn rip(&self) -> u64 {
        self.rip
    }

    pub fn gpr(&self) -> &GprFile {
        &self.gpr
    }

    pub fn rflags(&self) -> RFlags {
        self.rflags
    }

    /// Sets FSF (filesystem-enable), the nonstandard bit gating the
    /// filesystem-mutating syscalls (§4.5, §6). Exposed so a driver can
    /// honor a `--fs` flag after `initialize` resets RFLAGS to 2.
    pub fn set_fsf(&mut self, v: bool) {
        self.rflags.set_fsf(v);
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn fpu(&self) -> &Fpu {
        &self.fpu
    }

    pub fn vpu(&self) -> &VpuFile {
        &self.vpu
    }

    pub fn fds_mut(&mut self) -> &mut FdTable {
        &mut self.fds
    }

    /// Overrides the directory `rename`/`unlink`/`mkdir`/`rmdir`/`open`
    /// resolve relative paths against; defaults to the host process's
    /// working directory at `Cpu::new()` time.
    pub fn set_cwd(&mut self, cwd: std::path::PathBuf) {
        self.cwd = cwd;
    }

    /// Idempotent: sets the runtime error and stops execution, then closes
    /// every open file descriptor.
    pub fn terminate(&mut self, err: RuntimeError) {
        if !self.running {
            return;
        }
        self.error = err;
        self.running = false;
        self.fds.close_all();
    }

    /// Idempotent: sets the return value and stops execution, then closes
    /// every open file descriptor. Distinct from `terminate` in that
    /// `error` stays `None` — this is the guest calling `exit`, not a
    /// fault.
    pub fn exit(&mut self, ret: i64) {
        if !self.running {
            return;
        }
        self.return_value = ret;
        self.running = false;
        self.fds.close_all();
    }

    /// Clears the suspended-read flag so the next `tick` retries the
    /// syscall whose RIP was rewound.
    pub fn resume_suspended_read(&mut self) {
        self.suspended_read = false;
    }

    /// Executes up to `n` instructions, stopping early if the CPU halts,
    /// faults, or suspends on a blocked read. Returns the number of
    /// instructions actually dispatched.
    pub fn tick(&mut self, n: u64) -> u64 {
        let mut dispatched = 0;
        for _ in 0..n {
            if !self.running || self.suspended_read {
                break;
            }
            if self.rip >= self.memory.executable_barrier() {
                self.terminate(RuntimeError::AccessViolation);
                break;
            }
            let opcode_byte = match self.memory.fetch_byte(self.rip) {
                Ok(b) => b,
                Err(e) => {
                    self.terminate(e);
                    break;
                }
            };
            self.rip += 1;
            dispatched += 1;
            if !self.dispatch(opcode_byte) {
                break;
            }
        }
        dispatched
    }

    pub(crate) fn fetch_code_u8(&mut self) -> Result<u8, RuntimeError> {
        let v = self.memory.fetch_byte(self.rip)?;
        self.rip += 1;
        Ok(v)
    }

    pub(crate) fn fetch_code_value(&mut self, sizecode: u8) -> Result<u64, RuntimeError> {
        let size = registers::sizecode_bytes(sizecode) as u8;
        let v = self.memory.get(self.rip, size)?;
        self.rip += size as u64;
        Ok(v)
    }

    /// Stack push: decrement RSP, verify the barrier, then write.
    pub fn push_stack(&mut self, val: u64, size: u8) -> Result<(), RuntimeError> {
        let new_rsp = self.gpr.raw(RSP).wrapping_sub(size as u64);
        if new_rsp < self.memory.stack_barrier() {
            return Err(RuntimeError::StackOverflow);
        }
        self.memory.set(new_rsp, size, val)?;
        self.gpr.set_raw(RSP, new_rsp);
        Ok(())
    }

    /// Stack pop: verify the barrier, read, then increment RSP.
    pub fn pop_stack(&mut self, size: u8) -> Result<u64, RuntimeError> {
        let rsp = self.gpr.raw(RSP);
        if rsp < self.memory.stack_barrier() {
            return Err(RuntimeError::StackOverflow);
        }
        let val = self.memory.get(rsp, size)?;
        self.gpr.set_raw(RSP, rsp.wrapping_add(size as u64));
        Ok(val)
    }

    /// XORs pseudorandom bits into exactly the flag positions a real CPU
    /// leaves undefined for the instruction that just ran (§4.5, §9).
    pub(crate) fn randomize_flags(&mut self, mask: u64) {
        let bits = self.rng.next_u64() & mask;
        self.rflags.0 ^= bits;
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}
