//! Thin translation of guest syscalls to host file operations (§4.5
//! syscalls, §6 guest syscall ABI, §C.4 path-resolution supplement).
//!
//! `FileDescriptor` is the abstract contract the CLI's terminal/file
//! adapters implement; everything in this module is collaborator-facing
//! only (§1 excludes the concrete adapters from the core).

#[cfg(test)]
#[path = "./syscall_test.rs"]
mod syscall_test;

use std::fmt;

/// Syscall numbers selected by RAX (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallCode {
    Exit,
    Read,
    Write,
    Open,
    Close,
    Lseek,
    Brk,
    Rename,
    Unlink,
    Mkdir,
    Rmdir,
}

impl SyscallCode {
    pub fn from_u64(v: u64) -> Option<SyscallCode> {
        Some(match v {
            0 => SyscallCode::Exit,
            1 => SyscallCode::Read,
            2 => SyscallCode::Write,
            3 => SyscallCode::Open,
            4 => SyscallCode::Close,
            5 => SyscallCode::Lseek,
            6 => SyscallCode::Brk,
            7 => SyscallCode::Rename,
            8 => SyscallCode::Unlink,
            9 => SyscallCode::Mkdir,
            10 => SyscallCode::Rmdir,
            _ => return None,
        })
    }

    /// A syscall that mutates the host filesystem and is therefore gated
    /// behind FSF (§4.5, §6).
    pub fn mutates_filesystem(self) -> bool {
        matches!(
            self,
            SyscallCode::Open
                | SyscallCode::Rename
                | SyscallCode::Unlink
                | SyscallCode::Mkdir
                | SyscallCode::Rmdir
        )
    }
}

/// `open`-flag bits (§6).
pub mod open_flags {
    pub const READ: u64 = 1;
    pub const WRITE: u64 = 2;
    pub const CREATE: u64 = 4;
    pub const TEMP: u64 = 8;
    pub const TRUNC: u64 = 16;
    pub const APPEND: u64 = 32;
}

/// `lseek` origins (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeekMode {
    Set,
    Cur,
    End,
}

impl SeekMode {
    pub fn from_u64(v: u64) -> Option<SeekMode> {
        Some(match v {
            0 => SeekMode::Set,
            1 => SeekMode::Cur,
            2 => SeekMode::End,
            _ => return None,
        })
    }
}

/// Raised by a `FileDescriptor` implementation when the guest asks for an
/// operation the descriptor didn't declare support for (§6 file-descriptor
/// wrapper contract). The CPU translates this into `RuntimeError::IOFailure`
/// or `RuntimeError::FilePermissions`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FdError {
    NotReadable,
    NotWritable,
    NotSeekable,
    Io(String),
}

impl fmt::Display for FdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FdError::NotReadable => write!(f, "descriptor does not support reading"),
            FdError::NotWritable => write!(f, "descriptor does not support writing"),
            FdError::NotSeekable => write!(f, "descriptor does not support seeking"),
            FdError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for FdError {}

/// The abstract read/write/seek contract a host file-descriptor adapter
/// exposes to the syscall layer (§1, §6). Implementations live outside the
/// core (terminal, on-disk file); the CPU only ever talks to this trait.
pub trait FileDescriptor {
    fn is_interactive(&self) -> bool;
    fn can_read(&self) -> bool;
    fn can_write(&self) -> bool;
    fn can_seek(&self) -> bool;

    /// Reads up to `cap` bytes into `buf[..cap]`, returning the count
    /// actually read. `Ok(0)` from an interactive descriptor means "no data
    /// yet" (triggers `suspended_read`), not EOF.
    fn read(&mut self, buf: &mut [u8], cap: usize) -> Result<usize, FdError>;
    fn write(&mut self, buf: &[u8], len: usize) -> Result<usize, FdError>;
    fn seek(&mut self, offset: i64, origin: SeekMode) -> Result<u64, FdError>;
}

/// A host-backed disk file, installed by the `open` syscall handler. Unlike
/// the terminal adapters the CLI seeds at fd 0/1/2, this one lives inside
/// the core because opening a plain file is "thin translation", not a
/// collaborator-supplied policy (§1, §C.3).
pub struct HostFile {
    file: std::fs::File,
}

impl HostFile {
    pub fn new(file: std::fs::File) -> Self {
        HostFile { file }
    }
}

impl FileDescriptor for HostFile {
    fn is_interactive(&self) -> bool {
        false
    }
    fn can_read(&self) -> bool {
        true
    }
    fn can_write(&self) -> bool {
        true
    }
    fn can_seek(&self) -> bool {
        true
    }

    fn read(&mut self, buf: &mut [u8], cap: usize) -> Result<usize, FdError> {
        use std::io::Read;
        self.file.read(&mut buf[..cap]).map_err(|e| FdError::Io(e.to_string()))
    }

    fn write(&mut self, buf: &[u8], len: usize) -> Result<usize, FdError> {
        use std::io::Write;
        self.file.write(&buf[..len]).map_err(|e| FdError::Io(e.to_string()))
    }

    fn seek(&mut self, offset: i64, origin: SeekMode) -> Result<u64, FdError> {
        use std::io::Seek;
        let pos = match origin {
            SeekMode::Set => std::io::SeekFrom::Start(offset.max(0) as u64),
            SeekMode::Cur => std::io::SeekFrom::Current(offset),
            SeekMode::End => std::io::SeekFrom::End(offset),
        };
        self.file.seek(pos).map_err(|e| FdError::Io(e.to_string()))
    }
}

/// Default table size (§3 `CPU state`).
pub const DEFAULT_FD_COUNT: usize = 16;

/// A fixed-size table of file descriptors, indexed by guest fd number.
pub struct FdTable {
    slots: Vec<Option<Box<dyn FileDescriptor>>>,
}

impl FdTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        FdTable { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, fd: u64) -> Option<&(dyn FileDescriptor + 'static)> {
        self.slots.get(fd as usize)?.as_deref()
    }

    pub fn get_mut(&mut self, fd: u64) -> Option<&mut (dyn FileDescriptor + 'static)> {
        self.slots.get_mut(fd as usize)?.as_deref_mut()
    }

    /// Installs `file` into the first free slot, returning its fd number,
    /// or `None` if the table is full (maps to `InsufficientFDs`).
    pub fn install(&mut self, file: Box<dyn FileDescriptor>) -> Option<u64> {
        let slot = self.slots.iter().position(|s| s.is_none())?;
        self.slots[slot] = Some(file);
        Some(slot as u64)
    }

    /// Installs `file` at a specific slot (used to seed stdin/stdout/stderr
    /// at fixed descriptor numbers 0/1/2).
    pub fn install_at(&mut self, fd: u64, file: Box<dyn FileDescriptor>) {
        let idx = fd as usize;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.slots[idx] = Some(file);
    }

    /// Closes and frees `fd`'s slot. Returns false if the slot was already
    /// free (maps to `FDNotInUse`).
    pub fn close(&mut self, fd: u64) -> bool {
        match self.slots.get_mut(fd as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Closes every open descriptor (called from `terminate`/`exit`).
    pub fn close_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}
