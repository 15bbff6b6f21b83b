use super::*;
use crate::assembler;
use crate::object_file::ObjectFile;

fn asm(src: &str) -> ObjectFile {
    let mut obj = ObjectFile::new();
    assembler::assemble(src.as_bytes(), &mut obj, None).expect("assembly should succeed");
    obj
}

#[test]
fn missing_start_external_is_an_error() {
    let start = asm("GLOBAL main\nmain:\n\tmov rax, 1\n\tret\n");
    let err = link(vec![("start.o".to_string(), start)], "main").unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::FormatError);
}

#[test]
fn undefined_external_is_a_missing_symbol_error() {
    let start = asm("EXTERN _start\n\tcall _start\n\thlt\n");
    let err = link(vec![("start.o".to_string(), start)], "main").unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::MissingSymbol);
}

#[test]
fn duplicate_globals_are_a_redefinition_error() {
    let start = asm("EXTERN _start\n\tcall _start\n\thlt\n");
    let a = asm("GLOBAL main\nmain:\n\tmov rax, 1\n\tret\n");
    let b = asm("GLOBAL main\nmain:\n\tmov rax, 2\n\tret\n");
    let err = link(
        vec![("start.o".to_string(), start), ("a.o".to_string(), a), ("b.o".to_string(), b)],
        "main",
    )
    .unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::SymbolRedefinition);
}

#[test]
fn cross_file_global_and_extern_resolve_to_the_defining_objects_value() {
    let start = asm("EXTERN _start\n\tcall _start\n\thlt\n");
    let def = asm("GLOBAL the_answer\nthe_answer: EQU 7\n");
    let usr = asm("GLOBAL main\nEXTERN the_answer\nSEGMENT .rodata\nmain: DQ the_answer\n");

    let exe = link(
        vec![
            ("start.o".to_string(), start),
            ("def.o".to_string(), def),
            ("usr.o".to_string(), usr),
        ],
        "main",
    )
    .expect("link should succeed");

    // `usr.o`'s rodata is the only rodata contributor, so its `main` DQ
    // hole lands at the start of the merged rodata segment.
    let rodata_start = exe.text_seglen() as usize;
    let bytes = &exe.content()[rodata_start..rodata_start + 8];
    assert_eq!(u64::from_le_bytes(bytes.try_into().unwrap()), 7);
}

#[test]
fn unreachable_objects_are_not_linked_in() {
    let start = asm("EXTERN _start\n\tcall _start\n\thlt\n");
    let used = asm("GLOBAL main\nmain:\n\tmov rax, 1\n\tret\n");
    let unused = asm("GLOBAL dead_code\ndead_code:\n\tmov rax, 99\n\tret\n");

    let exe = link(
        vec![
            ("start.o".to_string(), start),
            ("used.o".to_string(), used),
            ("unused.o".to_string(), unused),
        ],
        "main",
    )
    .expect("link should succeed");

    // Only the stub's and `used.o`'s text bytes should be present;
    // `unused.o` is never reached from `_start` and contributes nothing.
    let used_only = link(
        vec![
            ("start.o".to_string(), asm("EXTERN _start\n\tcall _start\n\thlt\n")),
            ("used.o".to_string(), asm("GLOBAL main\nmain:\n\tmov rax, 1\n\tret\n")),
        ],
        "main",
    )
    .expect("link should succeed");
    assert_eq!(exe.text_seglen(), used_only.text_seglen());
}

#[test]
fn duplicate_string_literals_across_objects_are_merged_to_one_copy() {
    let start = asm("EXTERN _start\n\tcall _start\n\thlt\n");
    let a = asm("GLOBAL str_a\nSEGMENT .rodata\nstr_a: DQ $str(\"hello\")\n");
    let b = asm("GLOBAL str_b\nSEGMENT .rodata\nstr_b: DQ $str(\"hello\")\n");

    let exe = link(
        vec![("start.o".to_string(), start), ("a.o".to_string(), a), ("b.o".to_string(), b)],
        "main",
    )
    .expect("link should succeed");

    // "hello\0" is six bytes; if the linker deduplicated the literal, the
    // rodata segment holds exactly one copy plus the two 8-byte holes.
    let rodata_len = exe.rodata_seglen() as usize;
    assert_eq!(rodata_len, 6 + 8 + 8);
}

#[test]
fn empty_object_list_is_rejected() {
    let err = link(vec![], "main").unwrap_err();
    assert_eq!(err.kind, LinkErrorKind::EmptyResult);
}
