//! Line splitting and expression-text parsing (§4.2 line-processing loop,
//! §4.1 expression grammar surface). Keeps the character-level grunt work
//! out of `mod.rs` and `operand.rs`, the way `dustbox`'s own instruction
//! decoder keeps its byte-stream cursor separate from opcode dispatch.

#[cfg(test)]
#[path = "./lexer_test.rs"]
mod lexer_test;

use crate::assembler::error::{AssembleError, AssembleErrorKind};
use crate::expr::{Expr, Op};
use crate::object_file::ObjectFile;

/// Splits `s` on top-level occurrences of `sep`, honoring `()`, `[]`, `""`
/// and backtick-quoted nesting so a comma inside `[rax+1]` or a quoted
/// string doesn't split an operand list in two.
pub fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_quote: Option<char> = None;
    let mut cur = String::new();
    for c in s.chars() {
        match in_quote {
            Some(q) => {
                cur.push(c);
                if c == q {
                    in_quote = None;
                }
            }
            None => match c {
                '"' | '`' => {
                    in_quote = Some(c);
                    cur.push(c);
                }
                '(' | '[' => {
                    depth += 1;
                    cur.push(c);
                }
                ')' | ']' => {
                    depth -= 1;
                    cur.push(c);
                }
                _ if c == sep && depth == 0 => {
                    out.push(cur.trim().to_string());
                    cur = String::new();
                }
                _ => cur.push(c),
            },
        }
    }
    if !cur.trim().is_empty() || !out.is_empty() {
        out.push(cur.trim().to_string());
    }
    out
}

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Num(String),
    Ident(String),
    Str(String),
    Punct(&'static str),
}

/// Keyword infix operators that read as ordinary identifiers lexically but
/// act as binary operators in the expression grammar (unsigned arithmetic,
/// unsigned comparisons, shifts) so the tokenizer stays uniform.
fn keyword_op(ident: &str) -> Option<(Op, u8)> {
    Some(match ident {
        "shl" => (Op::Shl, 9),
        "shr" => (Op::Shr, 9),
        "sar" => (Op::Sar, 9),
        "mulu" => (Op::MulU, 11),
        "divu" => (Op::DivU, 11),
        "modu" => (Op::ModU, 11),
        "ltu" => (Op::LtU, 8),
        "leu" => (Op::LeU, 8),
        "gtu" => (Op::GtU, 8),
        "geu" => (Op::GeU, 8),
        _ => return None,
    })
}

fn tokenize(s: &str, line: u32) -> Result<Vec<Token>, AssembleError> {
    let mut out = Vec::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '"' {
            let mut j = i + 1;
            let mut buf = String::new();
            while j < chars.len() && chars[j] != '"' {
                if chars[j] == '\\' && j + 1 < chars.len() {
                    buf.push(chars[j]);
                    buf.push(chars[j + 1]);
                    j += 2;
                } else {
                    buf.push(chars[j]);
                    j += 1;
                }
            }
            if j >= chars.len() {
                return Err(AssembleError::new(AssembleErrorKind::FormatError, line, "unterminated string literal"));
            }
            out.push(Token::Str(buf));
            i = j + 1;
            continue;
        }
        if c == '`' {
            let mut j = i + 1;
            while j < chars.len() && chars[j] != '`' {
                if chars[j] == '\\' && j + 1 < chars.len() {
                    j += 2;
                } else {
                    j += 1;
                }
            }
            if j >= chars.len() {
                return Err(AssembleError::new(AssembleErrorKind::FormatError, line, "unterminated char constant"));
            }
            out.push(Token::Num(chars[i..=j].iter().collect()));
            i = j + 1;
            continue;
        }
        if c.is_ascii_digit() {
            let mut j = i;
            while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_' || chars[j] == '.') {
                j += 1;
            }
            out.push(Token::Num(chars[i..j].iter().collect()));
            i = j;
            continue;
        }
        if c.is_alphabetic() || c == '_' || c == '.' || c == '#' || c == '$' {
            let mut j = i + 1;
            while j < chars.len()
                && (chars[j].is_alphanumeric() || chars[j] == '_' || chars[j] == '.' || chars[j] == '#')
            {
                j += 1;
            }
            out.push(Token::Ident(chars[i..j].iter().collect()));
            i = j;
            continue;
        }
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let punct2 = ["<=", ">=", "==", "!=", "&&", "||"];
        if let Some(p) = punct2.iter().find(|p| **p == two) {
            out.push(Token::Punct(p));
            i += 2;
            continue;
        }
        let one = match c {
            '+' => "+",
            '-' => "-",
            '*' => "*",
            '/' => "/",
            '%' => "%",
            '&' => "&",
            '|' => "|",
            '^' => "^",
            '~' => "~",
            '!' => "!",
            '<' => "<",
            '>' => ">",
            '(' => "(",
            ')' => ")",
            ',' => ",",
            '?' => "?",
            ':' => ":",
            _ => {
                return Err(AssembleError::new(
                    AssembleErrorKind::FormatError,
                    line,
                    format!("unexpected character `{}` in expression", c),
                ))
            }
        };
        out.push(Token::Punct(one));
        i += 1;
    }
    Ok(out)
}

/// Context substituted for the special address tokens `$`, `$$`, `$I`
/// while parsing an expression at the point it's encountered in the source
/// (§4.2 "special macros inside expressions").
pub struct ExprContext<'a> {
    pub current_addr: u64,
    pub segment_origin: &'a str,
    pub times_index: i64,
}

struct Parser<'a, 'o> {
    toks: Vec<Token>,
    pos: usize,
    line: u32,
    ctx: &'a ExprContext<'a>,
    obj: &'o mut ObjectFile,
}

const UNARY_FUNCS: &[(&str, Op)] = &[
    ("int", Op::ToInt),
    ("float", Op::ToFloat),
    ("floor", Op::Floor),
    ("ceil", Op::Ceil),
    ("round", Op::Round),
    ("trunc", Op::Trunc),
    ("repr32", Op::Repr32),
    ("repr64", Op::Repr64),
    ("float32", Op::Float32),
    ("float64", Op::Float64),
    ("prec32", Op::Prec32),
    ("prec64", Op::Prec64),
];

impl<'a, 'o> Parser<'a, 'o> {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), AssembleError> {
        match self.bump() {
            Some(Token::Punct(q)) if q == p => Ok(()),
            other => Err(AssembleError::new(
                AssembleErrorKind::FormatError,
                self.line,
                format!("expected `{}`, found {:?}", p, other),
            )),
        }
    }

    fn err(&self, msg: impl Into<String>) -> AssembleError {
        AssembleError::new(AssembleErrorKind::FormatError, self.line, msg)
    }

    fn parse(&mut self) -> Result<Expr, AssembleError> {
        let e = self.parse_ternary()?;
        if self.pos != self.toks.len() {
            return Err(self.err("trailing tokens in expression"));
        }
        Ok(e)
    }

    fn parse_ternary(&mut self) -> Result<Expr, AssembleError> {
        let cond = self.parse_binary(2)?;
        if let Some(Token::Punct("?")) = self.peek() {
            self.bump();
            let a = self.parse_ternary()?;
            self.expect_punct(":")?;
            let b = self.parse_ternary()?;
            return Ok(Expr::ternary(cond, a, b));
        }
        Ok(cond)
    }

    /// Precedence-climbing over the binary tiers. `min_prec` is the lowest
    /// tier this call is allowed to consume (2 = `||`, down through 11 =
    /// `* / % mulu divu modu`).
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, AssembleError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let (op, prec) = match self.peek_op() {
                Some(v) => v,
                None => break,
            };
            if prec < min_prec {
                break;
            }
            self.bump();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn peek_op(&self) -> Option<(Op, u8)> {
        match self.peek()? {
            Token::Punct("||") => Some((Op::LogOr, 2)),
            Token::Punct("&&") => Some((Op::LogAnd, 3)),
            Token::Punct("|") => Some((Op::BitOr, 4)),
            Token::Punct("^") => Some((Op::BitXor, 5)),
            Token::Punct("&") => Some((Op::BitAnd, 6)),
            Token::Punct("==") => Some((Op::Eq, 7)),
            Token::Punct("!=") => Some((Op::Neq, 7)),
            Token::Punct("<") => Some((Op::LtS, 8)),
            Token::Punct("<=") => Some((Op::LeS, 8)),
            Token::Punct(">") => Some((Op::GtS, 8)),
            Token::Punct(">=") => Some((Op::GeS, 8)),
            Token::Punct("+") => Some((Op::Add, 10)),
            Token::Punct("-") => Some((Op::Sub, 10)),
            Token::Punct("*") => Some((Op::MulS, 11)),
            Token::Punct("/") => Some((Op::DivS, 11)),
            Token::Punct("%") => Some((Op::ModS, 11)),
            Token::Ident(id) => keyword_op(id),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, AssembleError> {
        match self.peek() {
            Some(Token::Punct("-")) => {
                self.bump();
                Ok(Expr::unary(Op::Neg, self.parse_unary()?))
            }
            Some(Token::Punct("~")) => {
                self.bump();
                Ok(Expr::unary(Op::BitNot, self.parse_unary()?))
            }
            Some(Token::Punct("!")) => {
                self.bump();
                Ok(Expr::unary(Op::LogNot, self.parse_unary()?))
            }
            Some(Token::Punct("+")) => {
                self.bump();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, AssembleError> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(Expr::token(n)),
            Some(Token::Punct("(")) => {
                let e = self.parse_ternary()?;
                self.expect_punct(")")?;
                Ok(e)
            }
            Some(Token::Ident(id)) => self.parse_ident(&id),
            other => Err(self.err(format!("expected an expression term, found {:?}", other))),
        }
    }

    fn parse_ident(&mut self, id: &str) -> Result<Expr, AssembleError> {
        if let Some((op, _)) = UNARY_FUNCS.iter().find(|(name, _)| *name == id).map(|(_, op)| (*op, ())) {
            self.expect_punct("(")?;
            let arg = self.parse_ternary()?;
            self.expect_punct(")")?;
            return Ok(Expr::unary(op, arg));
        }
        match id {
            // `$` is the current write cursor, expressed relative to this
            // object's own (pre-link) segment origin so two `$` values in
            // the same segment still ptrdiff-reduce to a plain offset
            // before the linker ever runs (§4.1).
            "$" => Ok(Expr::binary(
                Op::Add,
                Expr::token(self.ctx.segment_origin.to_string()),
                Expr::int(self.ctx.current_addr as i64),
            )),
            "$$" => Ok(Expr::token(self.ctx.segment_origin.to_string())),
            "$I" => Ok(Expr::int(self.ctx.times_index)),
            "$str" => self.parse_literal_ctor(true),
            "$bin" => self.parse_literal_ctor(false),
            _ => Ok(Expr::token(id.to_string())),
        }
    }

    /// `$str("...")` interns a NUL-terminated C string; `$bin("...")`
    /// interns the raw bytes without a trailing NUL (§4.2).
    fn parse_literal_ctor(&mut self, nul_terminate: bool) -> Result<Expr, AssembleError> {
        self.expect_punct("(")?;
        let bytes = match self.bump() {
            Some(Token::Str(s)) => unescape_c_string(&s),
            other => return Err(self.err(format!("expected a quoted string argument, found {:?}", other))),
        };
        self.expect_punct(")")?;
        let mut bytes = bytes;
        if nul_terminate {
            bytes.push(0);
        }
        let handle = self.obj.intern_literal(&bytes);
        Ok(Expr::token(format!("__bin_lit_{:x}", handle)))
    }
}

/// Unescapes C-style backslash escapes inside a `"..."` literal.
pub fn unescape_c_string(s: &str) -> Vec<u8> {
    let mut out = Vec::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push(b'\n'),
                Some('t') => out.push(b'\t'),
                Some('r') => out.push(b'\r'),
                Some('0') => out.push(0),
                Some('\\') => out.push(b'\\'),
                Some('"') => out.push(b'"'),
                Some('\'') => out.push(b'\''),
                Some(other) => {
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
                None => {}
            }
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    out
}

/// Parses `text` into an `Expr`, substituting `$`/`$$`/`$I` per `ctx` and
/// interning any `$str`/`$bin` literal constructors into `obj`.
pub fn parse_expr(text: &str, ctx: &ExprContext, obj: &mut ObjectFile, line: u32) -> Result<Expr, AssembleError> {
    let toks = tokenize(text, line)?;
    if toks.is_empty() {
        return Err(AssembleError::new(AssembleErrorKind::FormatError, line, "empty expression"));
    }
    let mut parser = Parser { toks, pos: 0, line, ctx, obj };
    parser.parse()
}

/// Parses `text` and requires it evaluate immediately to an integer,
/// without consulting any symbol table (the TIMES/IF/ALIGN "critical
/// expression" contract, §4.2/GLOSSARY) — used before any label in the
/// expression could possibly be defined yet.
pub fn parse_critical_int(text: &str, ctx: &ExprContext, obj: &mut ObjectFile, line: u32) -> Result<i64, AssembleError> {
    let mut e = parse_expr(text, ctx, obj, line)?;
    let mut empty = crate::expr::SymbolTable::new();
    e.evaluate_critical_int(&mut empty).map_err(|m| AssembleError::new(AssembleErrorKind::ArgError, line, m))
}
