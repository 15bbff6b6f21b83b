use super::*;
use crate::expr::SymbolTable;
use crate::object_file::ObjectFile;

fn ctx(addr: u64) -> ExprContext<'static> {
    ExprContext { current_addr: addr, segment_origin: "#t", times_index: 0 }
}

#[test]
fn split_top_level_respects_brackets_and_quotes() {
    let parts = split_top_level("[rax+1], \"a,b\", 3", ',');
    assert_eq!(parts, vec!["[rax+1]", "\"a,b\"", "3"]);
}

#[test]
fn split_top_level_empty_input_yields_no_parts() {
    assert!(split_top_level("", ',').is_empty());
}

#[test]
fn parses_simple_arithmetic_with_precedence() {
    let mut obj = ObjectFile::new();
    let c = ctx(0);
    let mut e = parse_expr("1+2*3", &c, &mut obj, 1).unwrap();
    let mut syms = SymbolTable::new();
    assert_eq!(e.evaluate_critical_int(&mut syms).unwrap(), 7);
}

#[test]
fn parses_ternary_and_comparisons() {
    let mut obj = ObjectFile::new();
    let c = ctx(0);
    let mut e = parse_expr("1<2?10:20", &c, &mut obj, 1).unwrap();
    let mut syms = SymbolTable::new();
    assert_eq!(e.evaluate_critical_int(&mut syms).unwrap(), 10);
}

#[test]
fn keyword_operators_parse_as_infix() {
    let mut obj = ObjectFile::new();
    let c = ctx(0);
    let mut e = parse_expr("10 shl 2", &c, &mut obj, 1).unwrap();
    let mut syms = SymbolTable::new();
    assert_eq!(e.evaluate_critical_int(&mut syms).unwrap(), 40);
}

#[test]
fn dollar_expands_to_segment_origin_plus_offset() {
    let mut obj = ObjectFile::new();
    let c = ctx(0x20);
    let mut e = parse_expr("$", &c, &mut obj, 1).unwrap();
    let mut syms = SymbolTable::new();
    syms.insert("#t".to_string(), crate::expr::Expr::int(0x1000));
    assert_eq!(e.evaluate_critical_int(&mut syms).unwrap(), 0x1020);
}

#[test]
fn dollar_dollar_expands_to_bare_segment_origin() {
    let mut obj = ObjectFile::new();
    let c = ctx(0x20);
    let mut e = parse_expr("$$", &c, &mut obj, 1).unwrap();
    let mut syms = SymbolTable::new();
    syms.insert("#t".to_string(), crate::expr::Expr::int(0x1000));
    assert_eq!(e.evaluate_critical_int(&mut syms).unwrap(), 0x1000);
}

#[test]
fn dollar_i_expands_to_times_index() {
    let mut obj = ObjectFile::new();
    let c = ExprContext { current_addr: 0, segment_origin: "#t", times_index: 5 };
    let mut e = parse_expr("$I", &c, &mut obj, 1).unwrap();
    let mut syms = SymbolTable::new();
    assert_eq!(e.evaluate_critical_int(&mut syms).unwrap(), 5);
}

#[test]
fn str_literal_interns_nul_terminated_bytes() {
    let mut obj = ObjectFile::new();
    let c = ctx(0);
    let _ = parse_expr(r#"$str("hi")"#, &c, &mut obj, 1).unwrap();
    assert_eq!(obj.literals().get(0), &[b'h', b'i', 0]);
}

#[test]
fn bin_literal_does_not_append_a_nul() {
    let mut obj = ObjectFile::new();
    let c = ctx(0);
    let _ = parse_expr(r#"$bin("hi")"#, &c, &mut obj, 1).unwrap();
    assert_eq!(obj.literals().get(0), &[b'h', b'i']);
}

#[test]
fn unescapes_common_c_escapes() {
    assert_eq!(unescape_c_string(r"a\nb\t\0"), vec![b'a', b'\n', b'b', b'\t', 0]);
}

#[test]
fn parse_critical_int_rejects_unresolved_symbol() {
    let mut obj = ObjectFile::new();
    let c = ctx(0);
    assert!(parse_critical_int("undefined_label", &c, &mut obj, 1).is_err());
}

#[test]
fn tokenize_rejects_unterminated_string() {
    let mut obj = ObjectFile::new();
    let c = ctx(0);
    assert!(parse_expr("$str(\"unterminated", &c, &mut obj, 1).is_err());
}
