use super::*;
use crate::expr::Expr;

#[test]
fn round_trips_through_serialization() {
    let mut o = ObjectFile::new();
    o.add_global("main");
    o.add_external("printf");
    o.bind_symbol("main", Expr::int(0x1000));
    o.set_alignment(SegmentKind::Text, 16);
    o.segment_mut(SegmentKind::Text).extend_from_slice(&[0x90, 0x90]);
    o.add_hole(SegmentKind::Text, Hole { address: 4, size: 8, line: 12, expr: Expr::token("undefined") });
    o.add_bss(64);
    o.intern_literal(b"hello");

    let mut buf = Vec::new();
    o.write_to(&mut buf).unwrap();
    let back = ObjectFile::read_from(&mut &buf[..]).unwrap();

    assert_eq!(back.globals(), o.globals());
    assert_eq!(back.externals(), o.externals());
    assert_eq!(back.segment(SegmentKind::Text), o.segment(SegmentKind::Text));
    assert_eq!(back.alignment(SegmentKind::Text), 16);
    assert_eq!(back.bss_length(), 64);
    assert_eq!(back.holes(SegmentKind::Text).len(), 1);
}

#[test]
fn rejects_non_power_of_two_alignment_on_load() {
    let mut o = ObjectFile::new();
    o.set_alignment(SegmentKind::Text, 3);
    let mut buf = Vec::new();
    o.write_to(&mut buf).unwrap();
    assert!(ObjectFile::read_from(&mut &buf[..]).is_err());
}

#[test]
fn resolve_internal_patches_holes_once_symbol_known() {
    let mut o = ObjectFile::new();
    o.bind_symbol("len", Expr::int(7));
    o.segment_mut(SegmentKind::Data).extend_from_slice(&[0u8; 8]);
    o.add_hole(SegmentKind::Data, Hole { address: 0, size: 8, line: 1, expr: Expr::token("len") });
    o.resolve_internal();
    assert!(o.holes(SegmentKind::Data).is_empty());
    assert_eq!(&o.segment(SegmentKind::Data)[0..8], &7u64.to_le_bytes());
}

#[test]
fn compact_symbols_drops_unreferenced_non_globals() {
    let mut o = ObjectFile::new();
    o.add_global("keep");
    o.bind_symbol("keep", Expr::int(1));
    o.bind_symbol("drop_me", Expr::int(2));
    o.compact_symbols();
    assert!(o.symbols().contains_key("keep"));
    assert!(!o.symbols().contains_key("drop_me"));
    assert_eq!(o.symbols().len(), 1);
}

#[test]
fn compact_symbols_renames_surviving_non_globals_to_short_form() {
    let mut o = ObjectFile::new();
    o.add_global("keep");
    o.bind_symbol("keep", Expr::int(1));
    o.bind_symbol("referenced", Expr::int(2));
    o.segment_mut(SegmentKind::Text).extend_from_slice(&[0u8; 8]);
    o.add_hole(SegmentKind::Text, Hole { address: 0, size: 8, line: 1, expr: Expr::token("referenced") });

    o.compact_symbols();

    assert!(o.symbols().contains_key("keep"));
    assert!(!o.symbols().contains_key("referenced"));
    assert!(o.symbols().contains_key("^0"));
    assert_eq!(o.holes(SegmentKind::Text)[0].expr, Expr::token("^0"));
}
