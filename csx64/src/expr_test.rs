use super::*;
use std::collections::HashMap;

fn syms() -> SymbolTable {
    HashMap::new()
}

#[test]
fn literal_decimal() {
    assert_eq!(parse_numeric_literal("42"), Some(Value::Int(42)));
    assert_eq!(parse_numeric_literal("1_000"), Some(Value::Int(1000)));
    assert_eq!(parse_numeric_literal("007"), None);
    assert_eq!(parse_numeric_literal("0"), Some(Value::Int(0)));
}

#[test]
fn literal_radix_prefixes() {
    assert_eq!(parse_numeric_literal("0xFF"), Some(Value::Int(255)));
    assert_eq!(parse_numeric_literal("0o17"), Some(Value::Int(15)));
    assert_eq!(parse_numeric_literal("0b1010"), Some(Value::Int(10)));
}

#[test]
fn literal_float_fallback() {
    assert_eq!(parse_numeric_literal("3.5"), Some(Value::Float(3.5)));
}

#[test]
fn char_constant_little_endian_pack() {
    assert_eq!(parse_char_constant("`AB`"), Some(Value::Int('A' as i64 | ('B' as i64) << 8)));
    assert_eq!(parse_char_constant("`\\n`"), Some(Value::Int(10)));
}

#[test]
fn evaluate_simple_arithmetic() {
    let mut e = Expr::binary(Op::Add, Expr::int(2), Expr::int(3));
    assert_eq!(e.evaluate(&mut syms()), EvalResult::Evaluated(Value::Int(5)));
}

#[test]
fn evaluate_memoizes_in_place() {
    let mut e = Expr::binary(Op::Add, Expr::int(2), Expr::int(3));
    e.evaluate(&mut syms());
    assert_eq!(e, Expr::int(5));
}

#[test]
fn evaluate_twice_is_stable_and_symbol_free() {
    let mut e = Expr::binary(Op::Add, Expr::token("x"), Expr::int(1));
    let mut s = syms();
    s.insert("x".to_string(), Expr::int(41));
    assert_eq!(e.evaluate(&mut s), EvalResult::Evaluated(Value::Int(42)));
    // second call must not need `x` in the table at all
    let mut empty = syms();
    assert_eq!(e.evaluate(&mut empty), EvalResult::Evaluated(Value::Int(42)));
}

#[test]
fn evaluate_incomplete_on_missing_symbol() {
    let mut e = Expr::token("undefined_symbol");
    assert_eq!(e.evaluate(&mut syms()), EvalResult::Incomplete);
}

#[test]
fn evaluate_invalid_on_division_by_zero() {
    let mut e = Expr::binary(Op::DivS, Expr::int(1), Expr::int(0));
    assert!(matches!(e.evaluate(&mut syms()), EvalResult::Invalid(_)));
}

#[test]
fn evaluate_detects_cycles() {
    let mut s = syms();
    s.insert("a".to_string(), Expr::token("b"));
    s.insert("b".to_string(), Expr::token("a"));
    let mut e = Expr::token("a");
    assert!(matches!(e.evaluate(&mut s), EvalResult::Invalid(_)));
}

#[test]
fn unsigned_operators_reject_float_operands() {
    let mut e = Expr::binary(Op::DivU, Expr::float(1.0), Expr::int(2));
    assert!(matches!(e.evaluate(&mut syms()), EvalResult::Invalid(_)));
}

#[test]
fn mixed_int_float_promotes_to_double() {
    let mut e = Expr::binary(Op::Add, Expr::int(1), Expr::float(0.5));
    assert_eq!(e.evaluate(&mut syms()), EvalResult::Evaluated(Value::Float(1.5)));
}

#[test]
fn shift_saturates_at_64() {
    let mut e = Expr::binary(Op::Shl, Expr::int(1), Expr::int(64));
    assert_eq!(e.evaluate(&mut syms()), EvalResult::Evaluated(Value::Int(0)));

    let mut e = Expr::binary(Op::Sar, Expr::int(-1), Expr::int(100));
    assert_eq!(e.evaluate(&mut syms()), EvalResult::Evaluated(Value::Int(-1)));
}

#[test]
fn ternary_short_circuits_untaken_branch() {
    // the false branch divides by zero, but must never be evaluated
    let mut e = Expr::ternary(Expr::int(1), Expr::int(7), Expr::binary(Op::DivS, Expr::int(1), Expr::int(0)));
    assert_eq!(e.evaluate(&mut syms()), EvalResult::Evaluated(Value::Int(7)));
}

#[test]
fn ptrdiff_reduction_cancels_shared_segment_base() {
    // (#t + 10) - (#t + 4) => 10 - 4
    let e = Expr::binary(
        Op::Sub,
        Expr::binary(Op::Add, Expr::token("#t"), Expr::int(10)),
        Expr::binary(Op::Add, Expr::token("#t"), Expr::int(4)),
    );
    let mut reduced = e.ptrdiff_reduce();
    assert_eq!(reduced.evaluate(&mut syms()), EvalResult::Evaluated(Value::Int(6)));
}

#[test]
fn expr_round_trips_through_serialization() {
    let e = Expr::ternary(
        Expr::binary(Op::Eq, Expr::token("foo"), Expr::int(1)),
        Expr::float(2.5),
        Expr::unary(Op::Neg, Expr::int(9)),
    );
    let mut buf = Vec::new();
    e.write_to(&mut buf).unwrap();
    let back = Expr::read_from(&mut &buf[..]).unwrap();
    assert_eq!(e, back);
}
