use super::*;
use crate::assembler::lexer::ExprContext;
use crate::object_file::ObjectFile;
use crate::opcode::{address_fmt, binary_fmt};

fn ctx() -> ExprContext<'static> {
    ExprContext { current_addr: 0, segment_origin: "#t", times_index: 0 }
}

#[test]
fn strip_size_hint_recognizes_all_widths_and_optional_ptr() {
    assert_eq!(strip_size_hint("DWORD PTR [rax]"), (Some(2), "[rax]"));
    assert_eq!(strip_size_hint("qword [rax]"), (Some(3), "[rax]"));
    assert_eq!(strip_size_hint("rax"), (None, "rax"));
}

#[test]
fn parses_bare_register_operand() {
    let mut obj = ObjectFile::new();
    let (op, hint) = parse_operand("rax", &ctx(), &mut obj, 1).unwrap();
    assert!(hint.is_none());
    match op {
        Operand::Reg(idx, sz, high) => {
            assert_eq!(sz, 3);
            assert!(!high);
            assert_eq!(idx, 0);
        }
        _ => panic!("expected a register operand"),
    }
}

#[test]
fn parses_vector_register_operand_by_width() {
    let mut obj = ObjectFile::new();
    let (op, _) = parse_operand("ymm3", &ctx(), &mut obj, 1).unwrap();
    match op {
        Operand::Vreg(idx, bytes) => {
            assert_eq!(idx, 3);
            assert_eq!(bytes, 32);
        }
        _ => panic!("expected a vector register operand"),
    }
}

#[test]
fn parses_scaled_indexed_memory_operand() {
    let mut obj = ObjectFile::new();
    let (op, hint) = parse_operand("QWORD [rax*4+rbx+8]", &ctx(), &mut obj, 1).unwrap();
    assert_eq!(hint, Some(3));
    let mem = op.as_mem().unwrap();
    assert_eq!(mem.mult, 4);
    assert!(mem.r1.is_some());
    assert!(mem.r2.is_some());
    assert!(mem.disp.is_some());
}

#[test]
fn rejects_high_byte_register_in_address() {
    let mut obj = ObjectFile::new();
    assert!(parse_operand("[ah]", &ctx(), &mut obj, 1).is_err());
}

#[test]
fn rejects_mismatched_address_register_scale() {
    let mut obj = ObjectFile::new();
    assert!(parse_operand("[rax+3]", &ctx(), &mut obj, 1).is_ok());
    assert!(parse_operand("[rax*3]", &ctx(), &mut obj, 1).is_err());
}

#[test]
fn resolve_sizecode_requires_explicit_hint_for_memory() {
    let mut obj = ObjectFile::new();
    let (mem_op, hint) = parse_operand("[rax]", &ctx(), &mut obj, 1).unwrap();
    assert!(resolve_sizecode(&mem_op, hint, 3, 1).is_err());
    let (mem_op, hint) = parse_operand("DWORD [rax]", &ctx(), &mut obj, 1).unwrap();
    assert_eq!(resolve_sizecode(&mem_op, hint, 3, 1).unwrap(), 2);
}

#[test]
fn resolve_sizecode_falls_back_to_default_for_bare_immediate() {
    let mut obj = ObjectFile::new();
    let (op, hint) = parse_operand("5", &ctx(), &mut obj, 1).unwrap();
    assert_eq!(resolve_sizecode(&op, hint, 2, 1).unwrap(), 2);
}

#[test]
fn encode_address_rejects_empty_brackets() {
    let mut obj = ObjectFile::new();
    let mem = MemRef { r1: None, mult: 1, r2: None, disp: None };
    assert!(encode_address(&mut obj, SegmentKind::Text, &mem, 1).is_err());
}

#[test]
fn encode_address_writes_header_and_register_pack() {
    let mut obj = ObjectFile::new();
    let mem = MemRef { r1: Some((0, 3)), mult: 1, r2: None, disp: None };
    encode_address(&mut obj, SegmentKind::Text, &mem, 1).unwrap();
    let bytes = obj.segment(SegmentKind::Text);
    assert_eq!(bytes.len(), 2);
    let (has_imm, _mult, sizecode, has_r1, has_r2) = address_fmt::unpack_byte1(bytes[0]);
    assert!(!has_imm);
    assert!(has_r1);
    assert!(!has_r2);
    assert_eq!(sizecode, 3);
}

#[test]
fn encode_binary_reg_to_reg_writes_two_header_bytes_only() {
    let mut obj = ObjectFile::new();
    let dest = Operand::Reg(0, 3, false);
    let src = Operand::Reg(1, 3, false);
    encode_binary(&mut obj, SegmentKind::Text, &dest, &src, 3, 1).unwrap();
    let bytes = obj.segment(SegmentKind::Text);
    assert_eq!(bytes.len(), 2);
    let (idx, sizecode, high, dest_mem) = binary_fmt::unpack_byte1(bytes[0]);
    assert_eq!(idx, 0);
    assert_eq!(sizecode, 3);
    assert!(!high);
    assert!(!dest_mem);
}

#[test]
fn encode_binary_imm_source_pushes_a_hole() {
    let mut obj = ObjectFile::new();
    let dest = Operand::Reg(0, 2, false);
    let src = Operand::Imm(crate::expr::Expr::int(5));
    encode_binary(&mut obj, SegmentKind::Text, &dest, &src, 2, 1).unwrap();
    assert_eq!(obj.holes(SegmentKind::Text).len(), 1);
    assert_eq!(obj.holes(SegmentKind::Text)[0].size, 4);
}

#[test]
fn encode_binary_rejects_immediate_destination() {
    let mut obj = ObjectFile::new();
    let dest = Operand::Imm(crate::expr::Expr::int(1));
    let src = Operand::Reg(0, 3, false);
    assert!(encode_binary(&mut obj, SegmentKind::Text, &dest, &src, 3, 1).is_err());
}

#[test]
fn encode_shift_appends_cl_flag_byte() {
    let mut obj = ObjectFile::new();
    let loc = Operand::Reg(0, 3, false);
    encode_shift(&mut obj, SegmentKind::Text, &loc, 3, ShiftCount::Cl, 1).unwrap();
    let bytes = obj.segment(SegmentKind::Text);
    assert_eq!(bytes.len(), 2);
}

#[test]
fn encode_imm_rm_memory_operand_encodes_address() {
    let mut obj = ObjectFile::new();
    let (mem_op, _) = parse_operand("QWORD [rax]", &ctx(), &mut obj, 1).unwrap();
    encode_imm_rm(&mut obj, SegmentKind::Text, &mem_op, 3, 1).unwrap();
    assert_eq!(obj.segment(SegmentKind::Text).len(), 1 + 2);
}
