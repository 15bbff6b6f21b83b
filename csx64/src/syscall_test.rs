use super::*;

struct MemFile {
    data: Vec<u8>,
    pos: usize,
}

impl FileDescriptor for MemFile {
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
        let n = cap.min(self.data.len().saturating_sub(self.pos));
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
    fn write(&mut self, buf: &[u8], len: usize) -> Result<usize, FdError> {
        self.data.extend_from_slice(&buf[..len]);
        Ok(len)
    }
    fn seek(&mut self, offset: i64, origin: SeekMode) -> Result<u64, FdError> {
        let base = match origin {
            SeekMode::Set => 0,
            SeekMode::Cur => self.pos as i64,
            SeekMode::End => self.data.len() as i64,
        };
        self.pos = (base + offset).max(0) as usize;
        Ok(self.pos as u64)
    }
}

#[test]
fn syscall_codes_round_trip() {
    for n in 0..=10u64 {
        assert!(SyscallCode::from_u64(n).is_some());
    }
    assert_eq!(SyscallCode::from_u64(11), None);
}

#[test]
fn mutating_syscalls_are_flagged() {
    assert!(SyscallCode::Open.mutates_filesystem());
    assert!(SyscallCode::Mkdir.mutates_filesystem());
    assert!(!SyscallCode::Read.mutates_filesystem());
    assert!(!SyscallCode::Exit.mutates_filesystem());
}

#[test]
fn fd_table_install_close_and_exhaustion() {
    let mut table = FdTable::new(2);
    let a = table.install(Box::new(MemFile { data: vec![], pos: 0 })).unwrap();
    let b = table.install(Box::new(MemFile { data: vec![], pos: 0 })).unwrap();
    assert_ne!(a, b);
    assert!(table.install(Box::new(MemFile { data: vec![], pos: 0 })).is_none());
    assert!(table.close(a));
    assert!(!table.close(a));
    assert!(table.install(Box::new(MemFile { data: vec![], pos: 0 })).is_some());
}

#[test]
fn installed_descriptor_reads_and_writes() {
    let mut table = FdTable::new(DEFAULT_FD_COUNT);
    let fd = table.install(Box::new(MemFile { data: b"hi".to_vec(), pos: 0 })).unwrap();
    let mut buf = [0u8; 8];
    let n = table.get_mut(fd).unwrap().read(&mut buf, 8).unwrap();
    assert_eq!(&buf[..n], b"hi");
}
