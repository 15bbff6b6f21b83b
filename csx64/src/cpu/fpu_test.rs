use super::*;

#[test]
fn push_pop_round_trips() {
    let mut f = Fpu::new();
    f.push(1.5).unwrap();
    f.push(2.5).unwrap();
    assert_eq!(f.pop().unwrap(), 2.5);
    assert_eq!(f.pop().unwrap(), 1.5);
}

#[test]
fn push_into_occupied_register_overflows() {
    let mut f = Fpu::new();
    for i in 0..8 {
        f.push(i as f64).unwrap();
    }
    assert_eq!(f.push(99.0), Err(RuntimeError::FPUStackOverflow));
}

#[test]
fn pop_empty_underflows() {
    let mut f = Fpu::new();
    assert_eq!(f.pop(), Err(RuntimeError::FPUStackUnderflow));
}

#[test]
fn top_wraps_modulo_eight() {
    let mut f = Fpu::new();
    for _ in 0..10 {
        f.increment_top();
    }
    assert!(f.top() < 8);
}

#[test]
fn finit_resets_tags_and_control() {
    let mut f = Fpu::new();
    f.push(1.0).unwrap();
    f.finit();
    assert!(f.is_empty(0));
    assert_eq!(f.control_word(), 0x037F);
}

#[test]
fn rounding_mode_round_trips() {
    let mut f = Fpu::new();
    f.set_rounding_mode(RoundingMode::Truncate);
    assert_eq!(f.rounding_mode(), RoundingMode::Truncate);
    assert_eq!(f.round(2.9), 2.0);
    f.set_rounding_mode(RoundingMode::Up);
    assert_eq!(f.round(2.1), 3.0);
}
