//! Source text to `ObjectFile` (§4.2). Owns the line-processing loop,
//! label/directive recognition, and the opcode-string routing table; the
//! byte-level grunt work lives in `lexer` and `operand`.

pub mod error;
pub mod lexer;
pub mod operand;

#[cfg(test)]
#[path = "./mod_test.rs"]
mod mod_test;

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

use crate::cpu::flags::Condition;
use crate::cpu::registers;
use crate::expr::{Expr, Op};
use crate::object_file::{ObjectFile, SegmentKind};
use crate::opcode::{self, fpu_ops, vpu_ops, Opcode, RepKind};

use error::{AssembleError, AssembleErrorKind};
use lexer::ExprContext;
use operand::{Operand, ShiftCount};

/// Reserved words that can never be used as a label (segment macros,
/// directive mnemonics and the ignore-listed `__heap__`, §4.2).
const RESERVED_NAMES: &[&str] = &[
    "__heap__", "$", "$$", "$I", "$str", "$bin",
];

/// Assembler cursor state threaded through the line-processing loop (§4.2).
struct Assembler<'o> {
    obj: &'o mut ObjectFile,
    segment: SegmentKind,
    emitted_segments: [bool; 3],
    emitted_bss: bool,
    last_non_local_label: String,
    predefines: HashMap<String, Expr>,
    line: u32,
}

/// Assembles `source` into `obj` (§4.2 public contract). `predefines`
/// seeds the symbol table with caller-supplied constants before the first
/// line is read. On error the object file is left dirty and must not be
/// linked or serialized.
pub fn assemble<R: Read>(
    source: R,
    obj: &mut ObjectFile,
    predefines: Option<HashMap<String, Expr>>,
) -> Result<(), AssembleError> {
    obj.mark_dirty();
    let mut reader = BufReader::new(source);
    let mut first_line = true;
    let mut any_line = false;

    let mut asm = Assembler {
        obj,
        segment: SegmentKind::Text,
        emitted_segments: [false; 3],
        emitted_bss: false,
        last_non_local_label: String::new(),
        predefines: predefines.unwrap_or_default(),
        line: 0,
    };

    for (name, expr) in asm.predefines.clone() {
        asm.obj.bind_symbol(name, expr);
    }

    let mut raw_line = String::new();
    loop {
        raw_line.clear();
        let n = reader.read_line(&mut raw_line).map_err(|e| {
            AssembleError::new(AssembleErrorKind::FormatError, asm.line + 1, format!("I/O error reading source: {}", e))
        })?;
        if n == 0 {
            break;
        }
        asm.line += 1;

        let mut text: &str = raw_line.trim_end_matches(['\n', '\r']);
        if first_line && text.starts_with("#!") {
            first_line = false;
            continue;
        }
        first_line = false;

        if let Some(idx) = find_comment(text) {
            text = &text[..idx];
        }
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        any_line = true;
        asm.process_line(text)?;
    }

    if !any_line {
        return Err(AssembleError::new(AssembleErrorKind::EmptyFile, asm.line, "source file contains no instructions"));
    }

    asm.obj.resolve_internal();
    asm.obj.compact_symbols();
    verify_resolvable(asm.obj)?;

    asm.obj.mark_clean();
    Ok(())
}

/// Finds the first top-level `;` (not inside a string/char literal).
fn find_comment(s: &str) -> Option<usize> {
    let mut in_quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '"' | '`' => in_quote = Some(c),
                ';' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn is_valid_label_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '.'
}

fn is_valid_label_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

impl<'o> Assembler<'o> {
    fn err(&self, kind: AssembleErrorKind, msg: impl Into<String>) -> AssembleError {
        AssembleError::new(kind, self.line, msg)
    }

    fn ctx<'a>(&'a self, addr: u64) -> ExprContext<'a> {
        ExprContext { current_addr: addr, segment_origin: segment_origin_symbol(self.segment), times_index: 0 }
    }

    fn current_offset(&self) -> u64 {
        self.obj.segment(self.segment).len() as u64
    }

    fn mangle_label(&self, raw: &str) -> Result<String, AssembleError> {
        if raw.starts_with('.') {
            if self.last_non_local_label.is_empty() {
                return Err(self.err(AssembleErrorKind::InvalidLabel, "local label used before any non-local label was defined"));
            }
            Ok(format!("{}{}", self.last_non_local_label, raw))
        } else {
            Ok(raw.to_string())
        }
    }

    fn validate_label_name(&self, raw: &str) -> Result<(), AssembleError> {
        let body = raw.strip_prefix('.').unwrap_or(raw);
        if body.is_empty() || !is_valid_label_start(body.chars().next().unwrap()) || !body.chars().all(is_valid_label_char) {
            return Err(self.err(AssembleErrorKind::InvalidLabel, format!("`{}` is not a valid label name", raw)));
        }
        if RESERVED_NAMES.contains(&raw) || registers::lookup_gpr_name(raw).is_some() {
            return Err(self.err(AssembleErrorKind::InvalidLabel, format!("`{}` is a reserved name", raw)));
        }
        Ok(())
    }

    fn define_label(&mut self, mangled: &str) -> Result<(), AssembleError> {
        if self.obj.symbols().contains_key(mangled) {
            return Err(self.err(AssembleErrorKind::SymbolRedefinition, format!("label `{}` is already defined", mangled)));
        }
        if self.obj.externals().contains(mangled) {
            return Err(self.err(AssembleErrorKind::SymbolRedefinition, format!("label `{}` shadows an extern", mangled)));
        }
        Ok(())
    }

    /// Splits a line into an optional label, optional TIMES/IF prefix
    /// expression text, the uppercased opcode, and its raw argument text
    /// (§4.2 line-processing loop, steps 1-3).
    fn process_line(&mut self, text: &str) -> Result<(), AssembleError> {
        let mut rest = text;

        // (1) optional label.
        let mut label: Option<String> = None;
        if let Some(colon) = find_label_colon(rest) {
            let raw = rest[..colon].trim();
            self.validate_label_name(raw)?;
            let mangled = self.mangle_label(raw)?;
            label = Some(mangled);
            rest = rest[colon + 1..].trim();
            if rest.is_empty() {
                // A bare label-only line still binds at the current offset.
                self.bind_and_commit_label(label.take().unwrap(), false)?;
                return Ok(());
            }
        }

        // Split opcode token from argument text.
        let (mnemonic_raw, arg_text) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim_start()),
            None => (rest, ""),
        };
        let mnemonic = mnemonic_raw.to_ascii_uppercase();

        if mnemonic == "EQU" {
            let label = label.ok_or_else(|| self.err(AssembleErrorKind::UsageError, "EQU requires a label"))?;
            self.define_label(&label)?;
            let ctx = self.ctx(self.current_offset());
            let expr = lexer::parse_expr(arg_text, &ctx, self.obj, self.line)?;
            self.obj.bind_symbol(label.clone(), expr);
            if !label.starts_with('.') {
                self.last_non_local_label = label;
            }
            return Ok(());
        }

        if let Some(label) = label {
            self.bind_and_commit_label(label, true)?;
        }

        // (2) TIMES / IF prefix.
        let (times_count, mnemonic, arg_text) = if mnemonic == "TIMES" {
            let (count_text, rest2) = split_first_token(arg_text);
            let ctx = self.ctx(self.current_offset());
            let n = lexer::parse_critical_int(count_text, &ctx, self.obj, self.line)?;
            if n < 0 {
                return Err(self.err(AssembleErrorKind::ArgError, "TIMES count must not be negative"));
            }
            let (m2, a2) = split_first_token(rest2);
            (n as u64, m2.to_ascii_uppercase(), a2)
        } else if mnemonic == "IF" {
            let (cond_text, rest2) = split_first_token(arg_text);
            let ctx = self.ctx(self.current_offset());
            let n = lexer::parse_critical_int(cond_text, &ctx, self.obj, self.line)?;
            let (m2, a2) = split_first_token(rest2);
            (if n != 0 { 1 } else { 0 }, m2.to_ascii_uppercase(), a2)
        } else {
            (1, mnemonic, arg_text)
        };

        for i in 0..times_count {
            self.dispatch_mnemonic(&mnemonic, arg_text, i as i64)?;
        }
        Ok(())
    }

    fn bind_and_commit_label(&mut self, label: String, check_reserved: bool) -> Result<(), AssembleError> {
        let _ = check_reserved;
        self.define_label(&label)?;
        let offset = self.current_offset();
        let expr = Expr::binary(Op::Add, Expr::token(segment_origin_symbol(self.segment).to_string()), Expr::int(offset as i64));
        self.obj.bind_symbol(label.clone(), expr);
        if !label.starts_with('.') {
            self.last_non_local_label = label;
        }
        Ok(())
    }

    fn args(&self, arg_text: &str) -> Vec<String> {
        lexer::split_top_level(arg_text, ',').into_iter().filter(|s| !s.is_empty()).collect()
    }

    fn ctx_times<'a>(&'a self, times_index: i64) -> ExprContext<'a> {
        ExprContext {
            current_addr: self.current_offset(),
            segment_origin: segment_origin_symbol(self.segment),
            times_index,
        }
    }

    fn dispatch_mnemonic(&mut self, mnemonic: &str, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        // REP family and LOCK are pseudo-instructions: peel the prefix,
        // validate the underlying mnemonic, and recurse (§4.2 prefix
        // handling).
        if let Some(rep) = rep_kind_for(mnemonic) {
            let (inner_raw, inner_args) = split_first_token(arg_text);
            let inner = inner_raw.to_ascii_uppercase();
            if !STRING_OPS.contains(&inner.as_str()) {
                return Err(self.err(AssembleErrorKind::UsageError, format!("{} cannot prefix `{}`", mnemonic, inner)));
            }
            return self.encode_string_op(&inner, inner_args, rep, times_index);
        }
        if mnemonic == "LOCK" {
            let (inner_raw, inner_args) = split_first_token(arg_text);
            let inner = inner_raw.to_ascii_uppercase();
            if !LOCKABLE_OPS.contains(&inner.as_str()) {
                return Err(self.err(AssembleErrorKind::UsageError, format!("LOCK cannot prefix `{}`", inner)));
            }
            return self.dispatch_mnemonic(&inner, inner_args, times_index);
        }

        if STRING_OPS.contains(&mnemonic) {
            return self.encode_string_op(mnemonic, arg_text, RepKind::None, times_index);
        }

        match mnemonic {
            "GLOBAL" => self.directive_global(arg_text),
            "EXTERN" => self.directive_extern(arg_text),
            "SEGMENT" | "SECTION" => self.directive_segment(arg_text),
            "ALIGN" => self.directive_align(arg_text, times_index),
            "ALIGNB" => self.directive_alignb(arg_text, 1),
            "ALIGNW" => self.directive_alignb(arg_text, 2),
            "ALIGND" => self.directive_alignb(arg_text, 4),
            "ALIGNQ" => self.directive_alignb(arg_text, 8),
            "ALIGNX" => self.directive_alignb(arg_text, 16),
            "ALIGNY" => self.directive_alignb(arg_text, 32),
            "ALIGNZ" => self.directive_alignb(arg_text, 64),
            "DB" => self.directive_data(arg_text, 1, times_index),
            "DW" => self.directive_data(arg_text, 2, times_index),
            "DD" => self.directive_data(arg_text, 4, times_index),
            "DQ" => self.directive_data(arg_text, 8, times_index),
            "DX" => self.directive_data(arg_text, 16, times_index),
            "DY" => self.directive_data(arg_text, 32, times_index),
            "DZ" => self.directive_data(arg_text, 64, times_index),
            "RESB" => self.directive_reserve(arg_text, 1),
            "RESW" => self.directive_reserve(arg_text, 2),
            "RESD" => self.directive_reserve(arg_text, 4),
            "RESQ" => self.directive_reserve(arg_text, 8),
            "RESX" => self.directive_reserve(arg_text, 16),
            "RESY" => self.directive_reserve(arg_text, 32),
            "RESZ" => self.directive_reserve(arg_text, 64),
            "STATIC_ASSERT" => self.directive_static_assert(arg_text, times_index),
            "INCBIN" => self.directive_incbin(arg_text),
            "NOP" => self.emit(&[Opcode::Nop.as_byte()]),
            "HLT" => self.emit(&[Opcode::Hlt.as_byte()]),
            "SYSCALL" => self.emit(&[Opcode::Syscall.as_byte()]),
            "RET" => self.emit(&[Opcode::Ret.as_byte()]),
            "MOV" => self.encode_binary_op(Opcode::Mov, arg_text, times_index),
            "ADD" => self.encode_binary_op(Opcode::Add, arg_text, times_index),
            "SUB" => self.encode_binary_op(Opcode::Sub, arg_text, times_index),
            "ADC" => self.encode_binary_op(Opcode::Adc, arg_text, times_index),
            "SBB" => self.encode_binary_op(Opcode::Sbb, arg_text, times_index),
            "CMP" => self.encode_binary_op(Opcode::Cmp, arg_text, times_index),
            "AND" => self.encode_binary_op(Opcode::And, arg_text, times_index),
            "OR" => self.encode_binary_op(Opcode::Or, arg_text, times_index),
            "XOR" => self.encode_binary_op(Opcode::Xor, arg_text, times_index),
            "TEST" => self.encode_binary_op(Opcode::Test, arg_text, times_index),
            "MUL" => self.encode_mul_div(Opcode::MulU, arg_text, times_index),
            "IMUL" => self.encode_mul_div(Opcode::MulS, arg_text, times_index),
            "DIV" => self.encode_mul_div(Opcode::DivU, arg_text, times_index),
            "IDIV" => self.encode_mul_div(Opcode::DivS, arg_text, times_index),
            "INC" => self.encode_unary_op(Opcode::Inc, arg_text, times_index),
            "DEC" => self.encode_unary_op(Opcode::Dec, arg_text, times_index),
            "NOT" => self.encode_unary_op(Opcode::Not, arg_text, times_index),
            "NEG" => self.encode_unary_op(Opcode::Neg, arg_text, times_index),
            "SHL" => self.encode_shift_op(Opcode::Shl, arg_text, times_index),
            "SHR" => self.encode_shift_op(Opcode::Shr, arg_text, times_index),
            "SAR" => self.encode_shift_op(Opcode::Sar, arg_text, times_index),
            "ROL" => self.encode_shift_op(Opcode::Rol, arg_text, times_index),
            "ROR" => self.encode_shift_op(Opcode::Ror, arg_text, times_index),
            "PUSH" => self.encode_imm_rm_op(Opcode::Push, arg_text, times_index),
            "POP" => self.encode_imm_rm_op(Opcode::Pop, arg_text, times_index),
            "JMP" => self.encode_imm_rm_op(Opcode::Jmp, arg_text, times_index),
            "CALL" => self.encode_imm_rm_op(Opcode::Call, arg_text, times_index),
            "LEA" => self.encode_lea(arg_text, times_index),
            other => {
                if let Some(cond) = condition_from_jcc(other) {
                    self.encode_jcc(cond, arg_text, times_index)
                } else if let Some(cond) = condition_from_setcc(other) {
                    self.encode_setcc(cond, arg_text, times_index)
                } else if let Some(cond) = condition_from_cmovcc(other) {
                    self.encode_cmovcc(cond, arg_text, times_index)
                } else if let Some(sub) = fpu_sub_for(other) {
                    self.encode_fpu_op(other, sub, arg_text, times_index)
                } else if let Some(sub) = vpu_sub_for(other) {
                    self.encode_vpu_op(other, sub, arg_text, times_index)
                } else {
                    Err(self.err(AssembleErrorKind::UnknownOp, format!("unrecognized mnemonic `{}`", other)))
                }
            }
        }
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<(), AssembleError> {
        self.obj.segment_mut(self.segment).extend_from_slice(bytes);
        Ok(())
    }

    // ---- directives ----

    fn directive_global(&mut self, arg_text: &str) -> Result<(), AssembleError> {
        for name in self.args(arg_text) {
            self.obj.add_global(name);
        }
        Ok(())
    }

    fn directive_extern(&mut self, arg_text: &str) -> Result<(), AssembleError> {
        for name in self.args(arg_text) {
            self.obj.add_external(name.clone());
            if !self.obj.symbols().contains_key(&name) {
                self.obj.bind_symbol(name.clone(), Expr::token(name));
            }
        }
        Ok(())
    }

    fn directive_segment(&mut self, arg_text: &str) -> Result<(), AssembleError> {
        let name = arg_text.trim().to_ascii_lowercase();
        let kind = match name.as_str() {
            ".text" => SegmentKind::Text,
            ".rodata" => SegmentKind::RoData,
            ".data" => SegmentKind::Data,
            ".bss" => {
                if self.emitted_bss {
                    return Err(self.err(AssembleErrorKind::FormatError, "segment .bss declared more than once"));
                }
                self.emitted_bss = true;
                self.segment = SegmentKind::Data; // bss has no byte stream; RES* appends length only
                return Ok(());
            }
            other => return Err(self.err(AssembleErrorKind::FormatError, format!("unknown segment `{}`", other))),
        };
        if self.emitted_segments[kind.index()] {
            return Err(self.err(AssembleErrorKind::FormatError, format!("segment {} declared more than once", name)));
        }
        self.emitted_segments[kind.index()] = true;
        self.segment = kind;
        Ok(())
    }

    fn directive_align(&mut self, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let ctx = self.ctx_times(times_index);
        let n = lexer::parse_critical_int(arg_text.trim(), &ctx, self.obj, self.line)?;
        if n <= 0 || (n as u64).count_ones() != 1 {
            return Err(self.err(AssembleErrorKind::ArgError, "ALIGN requires a power-of-two argument"));
        }
        self.pad_to_align(n as u32)
    }

    fn pad_to_align(&mut self, align: u32) -> Result<(), AssembleError> {
        let cur = self.current_offset();
        let rem = cur % align as u64;
        if rem != 0 {
            let pad = align as u64 - rem;
            self.obj.segment_mut(self.segment).resize(self.obj.segment(self.segment).len() + pad as usize, 0);
        }
        self.obj.set_alignment(self.segment, self.obj.alignment(self.segment).max(align));
        Ok(())
    }

    fn directive_alignb(&mut self, arg_text: &str, width: u32) -> Result<(), AssembleError> {
        let _ = arg_text;
        if self.in_bss() {
            let rem = self.obj.bss_length() % width as u64;
            if rem != 0 {
                self.obj.add_bss(width as u64 - rem);
            }
            self.obj.set_bss_alignment(self.obj.bss_alignment().max(width));
            Ok(())
        } else {
            self.pad_to_align(width)
        }
    }

    /// Once `.bss` has been declared, every subsequent directive operates on
    /// it: `directive_segment` rejects any later `SEGMENT .data/.text/.rodata`
    /// as a redeclaration, so there is no path back out (§4.2 segment order).
    fn in_bss(&self) -> bool {
        self.emitted_bss
    }

    fn directive_data(&mut self, arg_text: &str, width: u8, times_index: i64) -> Result<(), AssembleError> {
        if self.in_bss() {
            return Err(self.err(AssembleErrorKind::UsageError, "cannot emit initialized data inside .bss"));
        }
        for item in self.args(arg_text) {
            let item = item.trim();
            if item.starts_with('"') && item.ends_with('"') && item.len() >= 2 {
                let bytes = lexer::unescape_c_string(&item[1..item.len() - 1]);
                for b in &bytes {
                    self.obj.segment_mut(self.segment).push(*b);
                }
                let pad = width as usize - (bytes.len() % width as usize);
                if pad != width as usize {
                    self.obj.segment_mut(self.segment).resize(self.obj.segment(self.segment).len() + pad, 0);
                }
                continue;
            }
            let ctx = self.ctx_times(times_index);
            let expr = lexer::parse_expr(item, &ctx, self.obj, self.line)?;
            operand::push_hole(self.obj, self.segment, expr, width, self.line);
        }
        Ok(())
    }

    fn directive_reserve(&mut self, arg_text: &str, width: u8) -> Result<(), AssembleError> {
        if !self.emitted_bss {
            return Err(self.err(AssembleErrorKind::UsageError, "RES* directives are only valid in .bss"));
        }
        let ctx = self.ctx_times(0);
        let n = lexer::parse_critical_int(arg_text.trim(), &ctx, self.obj, self.line)?;
        if n < 0 {
            return Err(self.err(AssembleErrorKind::ArgError, "reserve count must not be negative"));
        }
        self.obj.add_bss(n as u64 * width as u64);
        Ok(())
    }

    fn directive_static_assert(&mut self, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let ctx = self.ctx_times(times_index);
        let n = lexer::parse_critical_int(arg_text.trim(), &ctx, self.obj, self.line)?;
        if n == 0 {
            return Err(self.err(AssembleErrorKind::Assertion, format!("static assertion failed: `{}`", arg_text.trim())));
        }
        Ok(())
    }

    fn directive_incbin(&mut self, arg_text: &str) -> Result<(), AssembleError> {
        let parts = self.args(arg_text);
        if parts.is_empty() {
            return Err(self.err(AssembleErrorKind::ArgCount, "INCBIN requires a file path"));
        }
        let path = parts[0].trim().trim_matches('"');
        let bytes = std::fs::read(path).map_err(|e| {
            self.err(AssembleErrorKind::Failure, format!("failed to read `{}`: {}", path, e))
        })?;
        let offset = if parts.len() > 1 { parts[1].trim().parse::<usize>().unwrap_or(0) } else { 0 };
        let length = if parts.len() > 2 {
            parts[2].trim().parse::<usize>().unwrap_or(bytes.len().saturating_sub(offset))
        } else {
            bytes.len().saturating_sub(offset)
        };
        let end = (offset + length).min(bytes.len());
        let slice = if offset <= bytes.len() { &bytes[offset..end] } else { &[] };
        self.obj.segment_mut(self.segment).extend_from_slice(slice);
        Ok(())
    }

    // ---- operand parsing helpers ----

    fn parse_two_operands(&mut self, arg_text: &str, times_index: i64) -> Result<((Operand, Option<u8>), (Operand, Option<u8>)), AssembleError> {
        let parts = self.args(arg_text);
        if parts.len() != 2 {
            return Err(self.err(AssembleErrorKind::ArgCount, "expected exactly 2 operands"));
        }
        let ctx = self.ctx_times(times_index);
        let dest = operand::parse_operand(&parts[0], &ctx, self.obj, self.line)?;
        let src = operand::parse_operand(&parts[1], &ctx, self.obj, self.line)?;
        Ok((dest, src))
    }

    fn parse_one_operand(&mut self, arg_text: &str, times_index: i64) -> Result<(Operand, Option<u8>), AssembleError> {
        let parts = self.args(arg_text);
        if parts.len() != 1 {
            return Err(self.err(AssembleErrorKind::ArgCount, "expected exactly 1 operand"));
        }
        let ctx = self.ctx_times(times_index);
        operand::parse_operand(&parts[0], &ctx, self.obj, self.line)
    }

    fn encode_binary_op(&mut self, op: Opcode, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let ((dest, dhint), (src, shint)) = self.parse_two_operands(arg_text, times_index)?;
        let sz = operand::resolve_sizecode(&dest, dhint, 3, self.line)?;
        if let Operand::Mem(_) = src {
            if shint.is_some() && shint != Some(sz) {
                return Err(self.err(AssembleErrorKind::ArgError, "mismatched operand sizes"));
            }
        }
        self.emit(&[op.as_byte()])?;
        operand::encode_binary(self.obj, self.segment, &dest, &src, sz, self.line)
    }

    fn encode_mul_div(&mut self, op: Opcode, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let (src, hint) = self.parse_one_operand(arg_text, times_index)?;
        let sz = operand::resolve_sizecode(&src, hint, 3, self.line)?;
        self.emit(&[op.as_byte()])?;
        operand::encode_imm_rm(self.obj, self.segment, &src, sz, self.line)
    }

    fn encode_unary_op(&mut self, op: Opcode, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let (loc, hint) = self.parse_one_operand(arg_text, times_index)?;
        let sz = operand::resolve_sizecode(&loc, hint, 3, self.line)?;
        self.emit(&[op.as_byte()])?;
        operand::encode_unary(self.obj, self.segment, &loc, sz, self.line)
    }

    fn encode_shift_op(&mut self, op: Opcode, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let ((dest, dhint), (src, _)) = self.parse_two_operands(arg_text, times_index)?;
        let sz = operand::resolve_sizecode(&dest, dhint, 3, self.line)?;
        let count = match &src {
            Operand::Reg(idx, 0, false) if *idx == registers::RCX => ShiftCount::Cl,
            Operand::Imm(e) => {
                let v = e
                    .cached_value()
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| self.err(AssembleErrorKind::ArgError, "shift count must be an immediate constant"))?;
                ShiftCount::Imm(v as u8)
            }
            _ => return Err(self.err(AssembleErrorKind::ArgError, "shift count must be CL or an immediate")),
        };
        self.emit(&[op.as_byte()])?;
        operand::encode_shift(self.obj, self.segment, &dest, sz, count, self.line)
    }

    fn encode_imm_rm_op(&mut self, op: Opcode, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let (loc, hint) = self.parse_one_operand(arg_text, times_index)?;
        let default_sz = if op == Opcode::Jmp || op == Opcode::Call { 3 } else { 3 };
        let sz = operand::resolve_sizecode(&loc, hint, default_sz, self.line)?;
        self.emit(&[op.as_byte()])?;
        operand::encode_imm_rm(self.obj, self.segment, &loc, sz, self.line)
    }

    fn encode_lea(&mut self, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let ((dest, _), (src, _)) = self.parse_two_operands(arg_text, times_index)?;
        let (idx, sz, high) = match dest {
            Operand::Reg(idx, sz, high) => (idx, sz, high),
            _ => return Err(self.err(AssembleErrorKind::ArgError, "LEA destination must be a register")),
        };
        let mem = src.as_mem().ok_or_else(|| self.err(AssembleErrorKind::ArgError, "LEA source must be a memory operand"))?.clone();
        self.emit(&[Opcode::Lea.as_byte(), opcode::binary_fmt::pack_byte1(idx, sz, high, false)])?;
        operand::encode_address(self.obj, self.segment, &mem, self.line)
    }

    fn encode_jcc(&mut self, cond: Option<Condition>, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let (loc, hint) = self.parse_one_operand(arg_text, times_index)?;
        let sz = operand::resolve_sizecode(&loc, hint, 3, self.line)?;
        self.emit(&[Opcode::Jcc.as_byte(), cond_byte(cond)])?;
        operand::encode_imm_rm(self.obj, self.segment, &loc, sz, self.line)
    }

    fn encode_setcc(&mut self, cond: Option<Condition>, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let (loc, hint) = self.parse_one_operand(arg_text, times_index)?;
        let sz = operand::resolve_sizecode(&loc, hint, 0, self.line)?;
        self.emit(&[Opcode::Setcc.as_byte(), cond_byte(cond)])?;
        operand::encode_imm_rm(self.obj, self.segment, &loc, sz, self.line)
    }

    fn encode_cmovcc(&mut self, cond: Option<Condition>, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let ((dest, dhint), (src, _)) = self.parse_two_operands(arg_text, times_index)?;
        let sz = operand::resolve_sizecode(&dest, dhint, 3, self.line)?;
        self.emit(&[Opcode::Cmovcc.as_byte(), cond_byte(cond)])?;
        operand::encode_binary(self.obj, self.segment, &dest, &src, sz, self.line)
    }

    // ---- string ops ----

    fn encode_string_op(&mut self, mnemonic: &str, arg_text: &str, rep: RepKind, times_index: i64) -> Result<(), AssembleError> {
        let _ = times_index;
        let op = match mnemonic {
            "MOVS" => Opcode::Movs,
            "CMPS" => Opcode::Cmps,
            "LODS" => Opcode::Lods,
            "STOS" => Opcode::Stos,
            "SCAS" => Opcode::Scas,
            _ => unreachable!("caller already filtered to STRING_OPS"),
        };
        // size defaults to QWORD unless a size hint appears as a bare
        // keyword argument, e.g. `STOS BYTE`.
        let sz = match arg_text.trim() {
            "" => 3,
            other => operand::strip_size_hint(other).0.unwrap_or(3),
        };
        let ext = (sz & 0x3) | ((rep.code() & 0x3) << 2);
        self.emit(&[op.as_byte(), ext])
    }

    // ---- FPU ----

    fn encode_fpu_op(&mut self, mnemonic: &str, sub: u8, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        self.emit(&[Opcode::Fpu.as_byte(), sub])?;
        match sub {
            fpu_ops::FLD | fpu_ops::FST | fpu_ops::FSTP => self.encode_fpu_operand(arg_text, times_index),
            fpu_ops::FADD | fpu_ops::FSUB | fpu_ops::FSUBR | fpu_ops::FMUL | fpu_ops::FDIV | fpu_ops::FDIVR => {
                self.encode_fpu_operand(arg_text, times_index)
            }
            fpu_ops::FCOM | fpu_ops::FUCOM => self.encode_fpu_compare_operand(mnemonic, arg_text, times_index),
            fpu_ops::FCOMP | fpu_ops::FUCOMP => self.encode_fpu_compare_operand(mnemonic, arg_text, times_index),
            fpu_ops::FCOMPP | fpu_ops::FUCOMPP => Ok(()),
            fpu_ops::FMOVCC => {
                let cond = condition_from_fmovcc(mnemonic);
                self.obj.segment_mut(self.segment).push(cond_byte(cond));
                self.encode_fpu_operand(arg_text, times_index)
            }
            fpu_ops::FFREE => {
                let parts = self.args(arg_text);
                let i = parse_st_index(parts.get(0).map(String::as_str).unwrap_or("0"), self.line)?;
                self.obj.segment_mut(self.segment).push(i);
                Ok(())
            }
            fpu_ops::FSTSW => {
                let parts = self.args(arg_text);
                if parts.is_empty() {
                    return Err(self.err(AssembleErrorKind::ArgCount, "FSTSW requires a destination"));
                }
                if parts[0].trim().eq_ignore_ascii_case("AX") {
                    self.obj.segment_mut(self.segment).push(0);
                    Ok(())
                } else {
                    self.obj.segment_mut(self.segment).push(1);
                    let ctx = self.ctx_times(times_index);
                    let (operand, _) = operand::parse_operand(&parts[0], &ctx, self.obj, self.line)?;
                    let mem = operand.as_mem().ok_or_else(|| self.err(AssembleErrorKind::ArgError, "FSTSW destination must be AX or memory"))?.clone();
                    operand::encode_address(self.obj, self.segment, &mem, self.line)
                }
            }
            fpu_ops::FSTCW | fpu_ops::FLDCW | fpu_ops::FNSAVE | fpu_ops::FRSTOR | fpu_ops::FNSTENV | fpu_ops::FLDENV => {
                let (loc, _) = self.parse_one_operand(arg_text, times_index)?;
                let mem = loc.as_mem().ok_or_else(|| self.err(AssembleErrorKind::ArgError, "expected a memory operand"))?.clone();
                operand::encode_address(self.obj, self.segment, &mem, self.line)
            }
            _ => Ok(()), // niladic: FINIT, FCLEX, FINCSTP, FDECSTP, FXAM, FTST, trig/transcendental family
        }
    }

    fn encode_fpu_compare_operand(&mut self, mnemonic: &str, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let _ = mnemonic;
        self.encode_fpu_operand(arg_text, times_index)
    }

    /// Encodes the fpu-operand-kind byte (§opcode::fpu_operand) plus
    /// whatever follows it: nothing for TOP, an ST index, or a memory
    /// address. A leading `INT` keyword selects the integer memory kinds
    /// (`MEM_I16`/`MEM_I32`/`MEM_I64`) over the default float kinds, since
    /// x87 loads/stores the same widths as either.
    fn encode_fpu_operand(&mut self, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let text = arg_text.trim();
        if text.is_empty() {
            self.obj.segment_mut(self.segment).push(opcode::fpu_operand::TOP);
            return Ok(());
        }
        if let Some(idx) = parse_st_operand(text) {
            self.obj.segment_mut(self.segment).push(opcode::fpu_operand::ST);
            self.obj.segment_mut(self.segment).push(idx);
            return Ok(());
        }
        let (hint, rest) = operand::strip_size_hint(text);
        let is_int = rest.trim_start().to_ascii_uppercase().starts_with("INT");
        let rest = if is_int { rest.trim_start()[3..].trim_start() } else { rest };
        let ctx = self.ctx_times(times_index);
        let (parsed, _) = operand::parse_operand(rest, &ctx, self.obj, self.line)?;
        let mem = parsed.as_mem().ok_or_else(|| self.err(AssembleErrorKind::ArgError, "expected ST(i) or a memory operand"))?.clone();
        let kind = match (hint, is_int) {
            (Some(1), true) => opcode::fpu_operand::MEM_I16,
            (Some(2), true) => opcode::fpu_operand::MEM_I32,
            (Some(3), true) => opcode::fpu_operand::MEM_I64,
            (Some(2), false) => opcode::fpu_operand::MEM_F32,
            (Some(3), false) => opcode::fpu_operand::MEM_F64,
            (Some(0), _) => return Err(self.err(AssembleErrorKind::MissingSize, "x87 memory operand cannot be BYTE")),
            (None, _) => return Err(self.err(AssembleErrorKind::MissingSize, "x87 memory operand needs an explicit size")),
            _ => return Err(self.err(AssembleErrorKind::MissingSize, "unsupported x87 operand size")),
        };
        self.obj.segment_mut(self.segment).push(kind);
        operand::encode_address(self.obj, self.segment, &mem, self.line)
    }

    // ---- VPU ----

    fn encode_vpu_op(&mut self, mnemonic: &str, sub: u8, arg_text: &str, times_index: i64) -> Result<(), AssembleError> {
        let parts = self.args(arg_text);
        if parts.len() < 2 {
            return Err(self.err(AssembleErrorKind::ArgCount, "vector instructions need at least a destination and source"));
        }
        let ctx = self.ctx_times(times_index);
        let (dest_op, _) = operand::parse_operand(&parts[0], &ctx, self.obj, self.line)?;
        let (dest_idx, dest_bytes) = match dest_op {
            Operand::Vreg(idx, bytes) => (idx, bytes),
            _ => return Err(self.err(AssembleErrorKind::ArgError, "vector instruction destination must be a vector register")),
        };

        let mut mask_reg: Option<u8> = None;
        let mut zeromask = false;
        let mut aligned = false;
        let mut src_text = parts[1].clone();
        if let Some(brace) = src_text.find('{') {
            let (before, after) = src_text.split_at(brace);
            let inner = after.trim_start_matches('{');
            let inner = inner.trim_end_matches('}');
            if let Some((idx, _, _)) = registers::lookup_gpr_name(inner.trim_start_matches('k').trim()) {
                mask_reg = Some(idx);
            } else if let Ok(idx) = inner.trim().trim_start_matches('k').parse::<u8>() {
                mask_reg = Some(idx);
            }
            src_text = before.trim().to_string();
        }
        let mut predicate: u8 = 0;
        if sub == vpu_ops::CMP_F {
            let pred_text = parts.get(2).ok_or_else(|| {
                self.err(AssembleErrorKind::ArgCount, "vcmp requires a predicate immediate operand (0..=31)")
            })?;
            let ctx = self.ctx_times(times_index);
            let n = lexer::parse_critical_int(pred_text.trim(), &ctx, self.obj, self.line)?;
            if !(0..=31).contains(&n) {
                return Err(self.err(AssembleErrorKind::ArgError, "vcmp predicate must be in 0..=31"));
            }
            predicate = n as u8;
            if parts.len() > 3 && parts[3].trim().eq_ignore_ascii_case("z") {
                zeromask = true;
            }
        } else if parts.len() > 2 && parts[2].trim().eq_ignore_ascii_case("z") {
            zeromask = true;
        }
        let (hint, src_rest) = operand::strip_size_hint(&src_text);
        let _ = hint;
        if src_rest.trim_start().to_ascii_uppercase().starts_with("ALIGNED") {
            aligned = true;
        }

        let elem_size = elem_size_from_mnemonic(mnemonic);
        let elem_code = match elem_size {
            1 => 0u8,
            2 => 1,
            4 => 2,
            _ => 3,
        };

        let (src_op, _) = operand::parse_operand(src_rest.trim(), &ctx, self.obj, self.line)?;
        let (src_is_mem, src_idx) = match &src_op {
            Operand::Vreg(idx, _) => (false, *idx),
            Operand::Mem(_) => (true, 0u8),
            _ => return Err(self.err(AssembleErrorKind::ArgError, "vector instruction source must be a vector register or memory")),
        };

        let scalar = dest_bytes == 16 && matches!(sub, vpu_ops::ADD_F | vpu_ops::SUB_F | vpu_ops::MUL_F | vpu_ops::DIV_F | vpu_ops::SQRT_F | vpu_ops::RSQRT_F) && src_rest.to_ascii_uppercase().contains("SCALAR");

        let vec_code = match dest_bytes {
            16 => 0u8,
            32 => 1,
            _ => 2,
        };
        let shape = opcode::vpu_shape::pack(elem_code, vec_code, mask_reg.is_some(), zeromask, scalar, aligned);

        self.emit(&[Opcode::Vpu.as_byte(), sub, shape, dest_idx])?;
        if sub == vpu_ops::CMP_F {
            self.obj.segment_mut(self.segment).push(predicate);
        }
        self.obj.segment_mut(self.segment).push(src_is_mem as u8);
        if src_is_mem {
            let mem = src_op.as_mem().unwrap().clone();
            operand::encode_address(self.obj, self.segment, &mem, self.line)?;
        } else {
            self.obj.segment_mut(self.segment).push(src_idx);
        }
        if let Some(mr) = mask_reg {
            self.obj.segment_mut(self.segment).push(mr);
        }
        Ok(())
    }
}

/// Lane width in bytes implied by a VPU mnemonic's suffix. Scalar/packed
/// float suffixes (SS/SD/PS/PD) take priority since PD would otherwise
/// fall through to the bare-D integer case; after that, B/W/D/Q name
/// integer lane widths (PADDB, PMULW, PMINSD, PSUBQ, ...). Bitwise and
/// move ops carry a suffix too (ANDPS, MOVAPD, MOVDQA) but don't care
/// about lane width at the byte level, so the same table covers them.
fn elem_size_from_mnemonic(mnemonic: &str) -> usize {
    let m = mnemonic.to_ascii_uppercase();
    if m.ends_with("SS") {
        4
    } else if m.ends_with("SD") {
        8
    } else if m.ends_with("PS") {
        4
    } else if m.ends_with("PD") {
        8
    } else if m.ends_with("DQA") || m.ends_with("DQU") || m.ends_with("DQ") {
        4
    } else if m.ends_with('B') {
        1
    } else if m.ends_with('W') {
        2
    } else if m.ends_with('D') {
        4
    } else if m.ends_with('Q') {
        8
    } else {
        4
    }
}

fn parse_st_index(text: &str, line: u32) -> Result<u8, AssembleError> {
    parse_st_operand(text.trim())
        .ok_or_else(|| AssembleError::new(AssembleErrorKind::ArgError, line, format!("`{}` is not a valid ST(i) index", text)))
}

/// Parses `ST`, `ST(0)`, or a bare integer as an FPU stack index.
fn parse_st_operand(text: &str) -> Option<u8> {
    let up = text.trim();
    if up.eq_ignore_ascii_case("ST") {
        return Some(0);
    }
    let up_up = up.to_ascii_uppercase();
    if let Some(rest) = up_up.strip_prefix("ST(").and_then(|s| s.strip_suffix(')')) {
        return rest.trim().parse::<u8>().ok();
    }
    up.parse::<u8>().ok()
}

fn cond_byte(cond: Option<Condition>) -> u8 {
    match cond {
        Some(c) => c.code(),
        None => 18, // *CXZ pseudo-condition
    }
}

fn condition_from_jcc(mnemonic: &str) -> Option<Option<Condition>> {
    let suffix = mnemonic.strip_prefix('J')?;
    condition_from_suffix(suffix)
}

fn condition_from_setcc(mnemonic: &str) -> Option<Option<Condition>> {
    let suffix = mnemonic.strip_prefix("SET")?;
    condition_from_suffix(suffix)
}

fn condition_from_cmovcc(mnemonic: &str) -> Option<Option<Condition>> {
    let suffix = mnemonic.strip_prefix("CMOV")?;
    condition_from_suffix(suffix)
}

fn condition_from_fmovcc(mnemonic: &str) -> Option<Condition> {
    let suffix = mnemonic.strip_prefix("FMOV")?;
    Condition::ALL.iter().find(|c| c.mnemonic_suffix() == suffix).copied()
}

fn condition_from_suffix(suffix: &str) -> Option<Option<Condition>> {
    if suffix == "CXZ" {
        return Some(None);
    }
    Condition::ALL.iter().find(|c| c.mnemonic_suffix() == suffix).map(|c| Some(*c))
}

const STRING_OPS: &[&str] = &["MOVS", "CMPS", "LODS", "STOS", "SCAS"];

/// Memory-RMW instructions the LOCK prefix accepts (§4.2).
const LOCKABLE_OPS: &[&str] = &[
    "ADD", "SUB", "ADC", "SBB", "AND", "OR", "XOR", "NOT", "NEG", "INC", "DEC",
    "XCHG", "CMPXCHG",
];

fn rep_kind_for(mnemonic: &str) -> Option<RepKind> {
    match mnemonic {
        "REP" => Some(RepKind::Rep),
        "REPE" | "REPZ" => Some(RepKind::Repe),
        "REPNE" | "REPNZ" => Some(RepKind::Repne),
        _ => None,
    }
}

fn fpu_sub_for(mnemonic: &str) -> Option<u8> {
    if !mnemonic.starts_with('F') {
        return None;
    }
    if mnemonic.starts_with("FMOV") && mnemonic != "FMOV" {
        return Some(fpu_ops::FMOVCC);
    }
    Some(match mnemonic {
        "FLD" => fpu_ops::FLD,
        "FST" => fpu_ops::FST,
        "FSTP" => fpu_ops::FSTP,
        "FADD" => fpu_ops::FADD,
        "FSUB" => fpu_ops::FSUB,
        "FSUBR" => fpu_ops::FSUBR,
        "FMUL" => fpu_ops::FMUL,
        "FDIV" => fpu_ops::FDIV,
        "FDIVR" => fpu_ops::FDIVR,
        "FCOM" => fpu_ops::FCOM,
        "FCOMP" => fpu_ops::FCOMP,
        "FCOMPP" => fpu_ops::FCOMPP,
        "FUCOM" => fpu_ops::FUCOM,
        "FUCOMP" => fpu_ops::FUCOMP,
        "FUCOMPP" => fpu_ops::FUCOMPP,
        "FINIT" => fpu_ops::FINIT,
        "FCLEX" => fpu_ops::FCLEX,
        "FINCSTP" => fpu_ops::FINCSTP,
        "FDECSTP" => fpu_ops::FDECSTP,
        "FFREE" => fpu_ops::FFREE,
        "FXAM" => fpu_ops::FXAM,
        "FTST" => fpu_ops::FTST,
        "F2XM1" => fpu_ops::F2XM1,
        "FABS" => fpu_ops::FABS,
        "FCHS" => fpu_ops::FCHS,
        "FPREM" => fpu_ops::FPREM,
        "FPREM1" => fpu_ops::FPREM1,
        "FRNDINT" => fpu_ops::FRNDINT,
        "FSQRT" => fpu_ops::FSQRT,
        "FYL2X" => fpu_ops::FYL2X,
        "FYL2XP1" => fpu_ops::FYL2XP1,
        "FXTRACT" => fpu_ops::FXTRACT,
        "FSCALE" => fpu_ops::FSCALE,
        "FSIN" => fpu_ops::FSIN,
        "FCOS" => fpu_ops::FCOS,
        "FSINCOS" => fpu_ops::FSINCOS,
        "FPTAN" => fpu_ops::FPTAN,
        "FPATAN" => fpu_ops::FPATAN,
        "FSTSW" => fpu_ops::FSTSW,
        "FSTCW" => fpu_ops::FSTCW,
        "FLDCW" => fpu_ops::FLDCW,
        "FNSAVE" | "FSAVE" => fpu_ops::FNSAVE,
        "FRSTOR" => fpu_ops::FRSTOR,
        "FNSTENV" | "FSTENV" => fpu_ops::FNSTENV,
        "FLDENV" => fpu_ops::FLDENV,
        _ => return None,
    })
}

const VPU_MNEMONICS: &[(&str, u8)] = &[
    ("VADDPS", vpu_ops::ADD_F), ("VADDPD", vpu_ops::ADD_F), ("VADDSS", vpu_ops::ADD_F), ("VADDSD", vpu_ops::ADD_F),
    ("VSUBPS", vpu_ops::SUB_F), ("VSUBPD", vpu_ops::SUB_F), ("VSUBSS", vpu_ops::SUB_F), ("VSUBSD", vpu_ops::SUB_F),
    ("VMULPS", vpu_ops::MUL_F), ("VMULPD", vpu_ops::MUL_F), ("VMULSS", vpu_ops::MUL_F), ("VMULSD", vpu_ops::MUL_F),
    ("VDIVPS", vpu_ops::DIV_F), ("VDIVPD", vpu_ops::DIV_F), ("VDIVSS", vpu_ops::DIV_F), ("VDIVSD", vpu_ops::DIV_F),
    ("VMINPS", vpu_ops::MIN_F), ("VMINPD", vpu_ops::MIN_F),
    ("VMAXPS", vpu_ops::MAX_F), ("VMAXPD", vpu_ops::MAX_F),
    ("VSQRTPS", vpu_ops::SQRT_F), ("VSQRTPD", vpu_ops::SQRT_F), ("VSQRTSS", vpu_ops::SQRT_F), ("VSQRTSD", vpu_ops::SQRT_F),
    ("VRSQRTPS", vpu_ops::RSQRT_F), ("VRSQRTSS", vpu_ops::RSQRT_F),
    ("VPADDB", vpu_ops::ADD_I), ("VPADDW", vpu_ops::ADD_I), ("VPADDD", vpu_ops::ADD_I), ("VPADDQ", vpu_ops::ADD_I),
    ("VPSUBB", vpu_ops::SUB_I), ("VPSUBW", vpu_ops::SUB_I), ("VPSUBD", vpu_ops::SUB_I), ("VPSUBQ", vpu_ops::SUB_I),
    ("VPMULLW", vpu_ops::MUL_I), ("VPMULLD", vpu_ops::MUL_I),
    ("VPMINSB", vpu_ops::MIN_I), ("VPMINSW", vpu_ops::MIN_I), ("VPMINSD", vpu_ops::MIN_I),
    ("VPMAXSB", vpu_ops::MAX_I), ("VPMAXSW", vpu_ops::MAX_I), ("VPMAXSD", vpu_ops::MAX_I),
    ("VPAVGB", vpu_ops::AVG_U), ("VPAVGW", vpu_ops::AVG_U),
    ("VMOVAPS", vpu_ops::MOV), ("VMOVUPS", vpu_ops::MOV), ("VMOVAPD", vpu_ops::MOV), ("VMOVUPD", vpu_ops::MOV),
    ("VMOVDQA", vpu_ops::MOV), ("VMOVDQU", vpu_ops::MOV),
    ("VCMPPS", vpu_ops::CMP_F), ("VCMPPD", vpu_ops::CMP_F), ("VCMPSS", vpu_ops::CMP_F), ("VCMPSD", vpu_ops::CMP_F),
    ("VCVTDQ2PS", vpu_ops::CVT_I2F), ("VCVTDQ2PD", vpu_ops::CVT_I2F),
    ("VCVTPS2DQ", vpu_ops::CVT_F2I), ("VCVTPD2DQ", vpu_ops::CVT_F2I), ("VCVTTPS2DQ", vpu_ops::CVT_F2I),
    ("VPAND", vpu_ops::AND), ("VANDPS", vpu_ops::AND), ("VANDPD", vpu_ops::AND),
    ("VPOR", vpu_ops::OR), ("VORPS", vpu_ops::OR), ("VORPD", vpu_ops::OR),
    ("VPXOR", vpu_ops::XOR), ("VXORPS", vpu_ops::XOR), ("VXORPD", vpu_ops::XOR),
];

fn vpu_sub_for(mnemonic: &str) -> Option<u8> {
    VPU_MNEMONICS.iter().find(|(name, _)| *name == mnemonic).map(|(_, sub)| *sub)
}

fn segment_origin_symbol(kind: SegmentKind) -> &'static str {
    match kind {
        SegmentKind::Text => "#t",
        SegmentKind::RoData => "#r",
        SegmentKind::Data => "#d",
    }
}

fn find_label_colon(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match in_quote {
            Some(q) => {
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '"' | '`' => in_quote = Some(c),
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                ':' if depth == 0 => return Some(i),
                ' ' | '\t' if depth == 0 => return None,
                _ => {}
            },
        }
    }
    None
}

fn split_first_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// Post-pass step 5: every remaining expression must reference only
/// resolvable names — file symbols, externals, segment macros, binary
/// literal prefixes, or `__heap__` (§4.2).
fn verify_resolvable(obj: &ObjectFile) -> Result<(), AssembleError> {
    let mut refs = Vec::new();
    for kind in SegmentKind::ALL {
        for hole in obj.holes(kind) {
            hole.expr.referenced_tokens(&mut refs);
        }
    }
    for e in obj.symbols().values() {
        e.referenced_tokens(&mut refs);
    }
    for name in refs {
        let known = obj.symbols().contains_key(&name)
            || obj.externals().contains(&name)
            || crate::expr::SEGMENT_BASE_NAMES.contains(&name.as_str())
            || name.starts_with('^')
            || name.starts_with("__bin_lit_");
        if !known {
            return Err(AssembleError::new(
                AssembleErrorKind::UnknownSymbol,
                0,
                format!("unresolved symbol `{}`", name),
            ));
        }
    }
    Ok(())
}
