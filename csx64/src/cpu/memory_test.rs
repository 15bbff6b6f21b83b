use super::*;

fn mem() -> Memory {
    // executable ends at 4, read-only ends at 8, stack starts at 16.
    Memory::new(vec![0u8; 32], 4, 8, 16)
}

#[test]
fn get_set_round_trip_within_bounds() {
    let mut m = mem();
    m.set(16, 8, 0x1122_3344_5566_7788).unwrap();
    assert_eq!(m.get(16, 8).unwrap(), 0x1122_3344_5566_7788);
}

#[test]
fn get_out_of_bounds_fails() {
    let m = mem();
    assert_eq!(m.get(30, 8), Err(RuntimeError::OutOfBounds));
    assert_eq!(m.get(u64::MAX, 8), Err(RuntimeError::OutOfBounds));
}

#[test]
fn write_below_readonly_barrier_is_access_violation() {
    let mut m = mem();
    assert_eq!(m.set(4, 1, 1), Err(RuntimeError::AccessViolation));
    assert!(m.set(8, 1, 1).is_ok());
}

#[test]
fn fetch_at_or_past_executable_barrier_fails() {
    let m = mem();
    assert!(m.fetch_byte(3).is_ok());
    assert_eq!(m.fetch_byte(4), Err(RuntimeError::AccessViolation));
}

#[test]
fn brk_clamps_to_min_and_max() {
    let mut m = mem();
    m.set_max_size(40);
    assert_eq!(m.brk(0), Some(32));
    assert_eq!(m.brk(40), Some(0));
    assert_eq!(m.size(), 40);
    assert_eq!(m.brk(41), None);
    assert_eq!(m.brk(10), None); // below min_size
}
