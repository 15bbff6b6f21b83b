//! Stdio adapters seeded at fd 0/1/2 before a guest program runs (§6, §C.4).
//! Grounded on `driver.cpp`'s `RunConsole`, which ties `std::cin`/`std::cout`/
//! `std::cerr` to the computer via `TerminalInputFileWrapper`/
//! `TerminalOutputFileWrapper` before the tick loop, marking all three
//! non-interactive since the driver doesn't control the underlying stream.

use std::io::{self, Read, Write};

use csx64::syscall::{FdError, FileDescriptor, SeekMode};

pub struct TerminalInput {
    stdin: io::Stdin,
}

impl TerminalInput {
    pub fn new() -> Self {
        TerminalInput { stdin: io::stdin() }
    }
}

impl FileDescriptor for TerminalInput {
    fn is_interactive(&self) -> bool {
        false
    }
    fn can_read(&self) -> bool {
        true
    }
    fn can_write(&self) -> bool {
        false
    }
    fn can_seek(&self) -> bool {
        false
    }

    fn read(&mut self, buf: &mut [u8], cap: usize) -> Result<usize, FdError> {
        self.stdin.lock().read(&mut buf[..cap]).map_err(|e| FdError::Io(e.to_string()))
    }

    fn write(&mut self, _buf: &[u8], _len: usize) -> Result<usize, FdError> {
        Err(FdError::NotWritable)
    }

    fn seek(&mut self, _offset: i64, _origin: SeekMode) -> Result<u64, FdError> {
        Err(FdError::NotSeekable)
    }
}

/// Backs both fd 1 (stdout) and fd 2 (stderr): which stream it writes to is
/// fixed at construction, matching the original's one-wrapper-per-stream
/// shape rather than a single adapter that multiplexes on the fd number.
pub struct TerminalOutput {
    target: TerminalTarget,
}

enum TerminalTarget {
    Stdout(io::Stdout),
    Stderr(io::Stderr),
}

impl TerminalOutput {
    pub fn stdout() -> Self {
        TerminalOutput { target: TerminalTarget::Stdout(io::stdout()) }
    }

    pub fn stderr() -> Self {
        TerminalOutput { target: TerminalTarget::Stderr(io::stderr()) }
    }
}

impl FileDescriptor for TerminalOutput {
    fn is_interactive(&self) -> bool {
        false
    }
    fn can_read(&self) -> bool {
        false
    }
    fn can_write(&self) -> bool {
        true
    }
    fn can_seek(&self) -> bool {
        false
    }

    fn read(&mut self, _buf: &mut [u8], _cap: usize) -> Result<usize, FdError> {
        Err(FdError::NotReadable)
    }

    fn write(&mut self, buf: &[u8], len: usize) -> Result<usize, FdError> {
        let slice = &buf[..len];
        let result = match &mut self.target {
            TerminalTarget::Stdout(s) => s.lock().write(slice),
            TerminalTarget::Stderr(s) => s.lock().write(slice),
        };
        result.map_err(|e| FdError::Io(e.to_string()))
    }

    fn seek(&mut self, _offset: i64, _origin: SeekMode) -> Result<u64, FdError> {
        Err(FdError::NotSeekable)
    }
}
