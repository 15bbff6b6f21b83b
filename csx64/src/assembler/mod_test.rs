use super::*;
use crate::object_file::ObjectFile;

fn assemble_ok(src: &str) -> ObjectFile {
    let mut obj = ObjectFile::new();
    assemble(src.as_bytes(), &mut obj, None).expect("assembly should succeed");
    obj
}

fn assemble_err(src: &str) -> AssembleError {
    let mut obj = ObjectFile::new();
    assemble(src.as_bytes(), &mut obj, None).expect_err("assembly should fail")
}

#[test]
fn empty_source_is_an_error() {
    let err = assemble_err("; just a comment\n");
    assert_eq!(err.kind, AssembleErrorKind::EmptyFile);
}

#[test]
fn global_label_and_mov_immediate_assemble() {
    let obj = assemble_ok("GLOBAL main\nmain:\n\tmov rax, 5\n\tret\n");
    assert!(obj.globals().contains(&"main".to_string()));
    assert!(!obj.segment(SegmentKind::Text).is_empty());
}

#[test]
fn local_labels_mangle_against_the_last_global_label() {
    let obj = assemble_ok(
        "GLOBAL foo\nfoo:\n\tjmp .loop\n.loop:\n\tmov rax, 1\n\tjmp .loop\n",
    );
    assert!(obj.symbols().contains_key("foo.loop"));
}

#[test]
fn redefining_a_label_is_an_error() {
    let err = assemble_err("a:\n\tmov rax, 1\na:\n\tmov rax, 2\n");
    assert_eq!(err.kind, AssembleErrorKind::SymbolRedefinition);
}

#[test]
fn reserved_names_cannot_be_used_as_labels() {
    let err = assemble_err("$:\n\tmov rax, 1\n");
    assert_eq!(err.kind, AssembleErrorKind::InvalidLabel);
}

#[test]
fn times_repeats_an_instruction() {
    let obj = assemble_ok("TIMES 3 mov rax, 1\n");
    let n = obj.segment(SegmentKind::Text).len();
    assert_eq!(n % 3, 0);
    assert!(n > 0);
}

#[test]
fn if_directive_skips_instruction_when_condition_is_false() {
    let with_if = assemble_ok("IF 0 mov rax, 1\nmov rbx, 2\n");
    let without = assemble_ok("mov rbx, 2\n");
    assert_eq!(with_if.segment(SegmentKind::Text), without.segment(SegmentKind::Text));
}

#[test]
fn db_emits_raw_bytes_and_strings() {
    let obj = assemble_ok("SEGMENT .rodata\nDB \"hi\", 0\n");
    assert_eq!(obj.segment(SegmentKind::RoData), &[b'h', b'i', 0]);
}

#[test]
fn resb_grows_bss_without_touching_data_segment() {
    let obj = assemble_ok("SEGMENT .bss\nRESB 16\n");
    assert_eq!(obj.bss_length(), 16);
}

#[test]
fn align_directive_rejects_non_power_of_two() {
    let err = assemble_err("ALIGN 3\nmov rax, 1\n");
    assert_eq!(err.kind, AssembleErrorKind::ArgError);
}

#[test]
fn extern_symbol_is_resolvable_without_being_defined_locally() {
    let obj = assemble_ok("EXTERN printf\nmov rax, printf\n");
    assert!(obj.externals().contains(&"printf".to_string()));
}

#[test]
fn unknown_symbol_reference_fails_verification() {
    let err = assemble_err("mov rax, nonexistent_symbol\n");
    assert_eq!(err.kind, AssembleErrorKind::UnknownSymbol);
}

#[test]
fn static_assert_failure_is_reported() {
    let err = assemble_err("STATIC_ASSERT 1 == 2\n");
    assert_eq!(err.kind, AssembleErrorKind::Assertion);
}

#[test]
fn conditional_jump_mnemonic_encodes_a_condition_byte() {
    let obj = assemble_ok("target:\n\tjz target\n");
    assert!(!obj.segment(SegmentKind::Text).is_empty());
}

#[test]
fn jcxz_pseudo_condition_is_accepted() {
    let obj = assemble_ok("target:\n\tjcxz target\n");
    assert!(!obj.segment(SegmentKind::Text).is_empty());
}

#[test]
fn shift_with_cl_register_assembles() {
    let obj = assemble_ok("mov rax, 1\nshl rax, cl\n");
    assert!(!obj.segment(SegmentKind::Text).is_empty());
}

#[test]
fn lea_requires_register_destination_and_memory_source() {
    let err = assemble_err("lea [rax], [rbx]\n");
    assert_eq!(err.kind, AssembleErrorKind::ArgError);
}

#[test]
fn fpu_fld_top_of_stack_assembles() {
    let obj = assemble_ok("fld st(0)\n");
    assert!(!obj.segment(SegmentKind::Text).is_empty());
}

#[test]
fn fpu_memory_operand_requires_a_size_hint() {
    let err = assemble_err("fld [rax]\n");
    assert_eq!(err.kind, AssembleErrorKind::MissingSize);
}

#[test]
fn vpu_packed_add_with_mask_register_assembles() {
    let obj = assemble_ok("vaddps ymm0, ymm1 {k1}\n");
    assert!(!obj.segment(SegmentKind::Text).is_empty());
}

#[test]
fn vcmp_requires_a_predicate_operand() {
    let err = assemble_err("vcmpps ymm0, ymm1\n");
    assert_eq!(err.kind, AssembleErrorKind::ArgCount);
}

#[test]
fn vcmp_rejects_an_out_of_range_predicate() {
    let err = assemble_err("vcmpps ymm0, ymm1, 32\n");
    assert_eq!(err.kind, AssembleErrorKind::ArgError);
}

#[test]
fn vcmp_with_predicate_assembles() {
    let obj = assemble_ok("vcmpps ymm0, ymm1, 1\n");
    assert!(!obj.segment(SegmentKind::Text).is_empty());
}

#[test]
fn segment_cannot_be_declared_twice() {
    let err = assemble_err("SEGMENT .text\nSEGMENT .text\nmov rax, 1\n");
    assert_eq!(err.kind, AssembleErrorKind::FormatError);
}
