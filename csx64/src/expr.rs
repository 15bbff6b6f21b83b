//! Expression trees: lazy evaluation, memoization, symbol resolution.
//!
//! Mirrors the decoder/encoder split in `cpu`: this module owns the data
//! type and evaluation rules, while `assembler` and `linker` drive it with
//! their own symbol tables.

#[cfg(test)]
#[path = "./expr_test.rs"]
mod expr_test;

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};

/// Segment-origin symbol names subject to the ptrdiff reduction (§4.1).
pub const SEGMENT_BASE_NAMES: [&str; 9] = [
    "#t", "#r", "#d", "#b", "#T", "#R", "#D", "#B", "__heap__",
];

/// A symbol table mapping names to (possibly unevaluated) expressions.
/// Shared by `ObjectFile` and the linker's per-object local tables.
pub type SymbolTable = HashMap<String, Expr>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(v),
            Value::Float(_) => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Value::Float(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Add, Sub,
    MulS, MulU,
    DivS, DivU,
    ModS, ModU,
    Shl, Shr, Sar,
    LtS, LtU, LeS, LeU, GtS, GtU, GeS, GeU, Eq, Neq,
    BitAnd, BitOr, BitXor, BitNot,
    LogAnd, LogOr, LogNot,
    Ternary, Pair,
    Neg,
    ToInt, ToFloat, Floor, Ceil, Round, Trunc,
    Repr32, Repr64, Float32, Float64, Prec32, Prec64,
}

impl Op {
    /// true if this operator takes exactly one operand (the left child).
    pub fn is_unary(self) -> bool {
        matches!(
            self,
            Op::BitNot | Op::LogNot | Op::Neg | Op::ToInt | Op::ToFloat | Op::Floor | Op::Ceil
                | Op::Round | Op::Trunc | Op::Repr32 | Op::Repr64 | Op::Float32 | Op::Float64
                | Op::Prec32 | Op::Prec64
        )
    }

    fn code(self) -> u8 {
        use Op::*;
        match self {
            Add => 1, Sub => 2, MulS => 3, MulU => 4, DivS => 5, DivU => 6, ModS => 7, ModU => 8,
            Shl => 9, Shr => 10, Sar => 11,
            LtS => 12, LtU => 13, LeS => 14, LeU => 15, GtS => 16, GtU => 17, GeS => 18, GeU => 19,
            Eq => 20, Neq => 21,
            BitAnd => 22, BitOr => 23, BitXor => 24, BitNot => 25,
            LogAnd => 26, LogOr => 27, LogNot => 28,
            Ternary => 29, Pair => 30,
            Neg => 31,
            ToInt => 32, ToFloat => 33, Floor => 34, Ceil => 35, Round => 36, Trunc => 37,
            Repr32 => 38, Repr64 => 39, Float32 => 40, Float64 => 41, Prec32 => 42, Prec64 => 43,
        }
    }

    fn from_code(c: u8) -> Option<Op> {
        use Op::*;
        Some(match c {
            1 => Add, 2 => Sub, 3 => MulS, 4 => MulU, 5 => DivS, 6 => DivU, 7 => ModS, 8 => ModU,
            9 => Shl, 10 => Shr, 11 => Sar,
            12 => LtS, 13 => LtU, 14 => LeS, 15 => LeU, 16 => GtS, 17 => GtU, 18 => GeS, 19 => GeU,
            20 => Eq, 21 => Neq,
            22 => BitAnd, 23 => BitOr, 24 => BitXor, 25 => BitNot,
            26 => LogAnd, 27 => LogOr, 28 => LogNot,
            29 => Ternary, 30 => Pair,
            31 => Neg,
            32 => ToInt, 33 => ToFloat, 34 => Floor, 35 => Ceil, 36 => Round, 37 => Trunc,
            38 => Repr32, 39 => Repr64, 40 => Float32, 41 => Float64, 42 => Prec32, 43 => Prec64,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Leaf {
    Token(String),
    Value(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Leaf(LeafNode),
    Unary(Op, Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeafNode(Leaf);

impl Expr {
    pub fn token(name: impl Into<String>) -> Expr {
        Expr::Leaf(LeafNode(Leaf::Token(name.into())))
    }

    pub fn int(v: i64) -> Expr {
        Expr::Leaf(LeafNode(Leaf::Value(Value::Int(v))))
    }

    pub fn float(v: f64) -> Expr {
        Expr::Leaf(LeafNode(Leaf::Value(Value::Float(v))))
    }

    pub fn unary(op: Op, a: Expr) -> Expr {
        Expr::Unary(op, Box::new(a))
    }

    pub fn binary(op: Op, a: Expr, b: Expr) -> Expr {
        Expr::Binary(op, Box::new(a), Box::new(b))
    }

    pub fn ternary(cond: Expr, if_true: Expr, if_false: Expr) -> Expr {
        Expr::binary(Op::Ternary, cond, Expr::binary(Op::Pair, if_true, if_false))
    }

    /// cached value, if this node has already collapsed to a leaf value.
    pub fn cached_value(&self) -> Option<Value> {
        match self {
            Expr::Leaf(LeafNode(Leaf::Value(v))) => Some(*v),
            _ => None,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.cached_value().is_some()
    }

    /// Renames every occurrence of the unresolved token `from` to `to`.
    pub fn rename_token(&mut self, from: &str, to: &str) {
        match self {
            Expr::Leaf(LeafNode(Leaf::Token(t))) => {
                if t == from {
                    *t = to.to_string();
                }
            }
            Expr::Leaf(LeafNode(Leaf::Value(_))) => {}
            Expr::Unary(_, a) => a.rename_token(from, to),
            Expr::Binary(_, a, b) => {
                a.rename_token(from, to);
                b.rename_token(from, to);
            }
        }
    }

    /// Every token name this expression still references (unresolved leaves).
    pub fn referenced_tokens(&self, out: &mut Vec<String>) {
        match self {
            Expr::Leaf(LeafNode(Leaf::Token(t))) => out.push(t.clone()),
            Expr::Leaf(LeafNode(Leaf::Value(_))) => {}
            Expr::Unary(_, a) => a.referenced_tokens(out),
            Expr::Binary(_, a, b) => {
                a.referenced_tokens(out);
                b.referenced_tokens(out);
            }
        }
    }

    /// Evaluate against `symbols`, memoizing this node (and any symbol it
    /// pulls in) in place on success. Matches the spec's evaluated /
    /// incomplete / invalid trichotomy.
    pub fn evaluate(&mut self, symbols: &mut SymbolTable) -> EvalResult {
        let mut visiting = Vec::new();
        self.eval_rec(symbols, &mut visiting)
    }

    /// Evaluate and require an immediate, fully-resolved integer result
    /// (the "critical expression" contract used by TIMES/IF/ALIGN/etc).
    pub fn evaluate_critical_int(&mut self, symbols: &mut SymbolTable) -> Result<i64, String> {
        match self.evaluate(symbols) {
            EvalResult::Evaluated(Value::Int(v)) => Ok(v),
            EvalResult::Evaluated(Value::Float(_)) => {
                Err("critical expression must be an integer".to_string())
            }
            EvalResult::Incomplete => Err("expression is not immediately computable".to_string()),
            EvalResult::Invalid(msg) => Err(msg),
        }
    }

    fn eval_rec(&mut self, symbols: &mut SymbolTable, visiting: &mut Vec<String>) -> EvalResult {
        match self {
            Expr::Leaf(LeafNode(Leaf::Value(v))) => EvalResult::Evaluated(*v),
            Expr::Leaf(LeafNode(Leaf::Token(tok))) => {
                if let Some(v) = parse_numeric_literal(tok) {
                    *self = Expr::Leaf(LeafNode(Leaf::Value(v)));
                    return EvalResult::Evaluated(v);
                }
                if let Some(v) = parse_char_constant(tok) {
                    *self = Expr::Leaf(LeafNode(Leaf::Value(v)));
                    return EvalResult::Evaluated(v);
                }
                if visiting.iter().any(|t| t == tok) {
                    return EvalResult::Invalid(format!("cyclic dependency on symbol `{}`", tok));
                }
                let name = tok.clone();
                match symbols.remove(&name) {
                    None => EvalResult::Incomplete,
                    Some(mut def) => {
                        visiting.push(name.clone());
                        let r = def.eval_rec(symbols, visiting);
                        visiting.pop();
                        match r {
                            EvalResult::Evaluated(v) => {
                                symbols.insert(name, Expr::Leaf(LeafNode(Leaf::Value(v))));
                                *self = Expr::Leaf(LeafNode(Leaf::Value(v)));
                                EvalResult::Evaluated(v)
                            }
                            other => {
                                symbols.insert(name, def);
                                other
                            }
                        }
                    }
                }
            }
            Expr::Unary(op, a) => {
                let ra = a.eval_rec(symbols, visiting);
                match ra {
                    EvalResult::Evaluated(va) => match apply_unary(*op, va) {
                        Ok(v) => {
                            *self = Expr::Leaf(LeafNode(Leaf::Value(v)));
                            EvalResult::Evaluated(v)
                        }
                        Err(msg) => EvalResult::Invalid(msg),
                    },
                    other => other,
                }
            }
            Expr::Binary(Op::Ternary, cond, pair) => {
                let rc = cond.eval_rec(symbols, visiting);
                let c = match rc {
                    EvalResult::Evaluated(Value::Int(c)) => c,
                    EvalResult::Evaluated(Value::Float(_)) => {
                        return EvalResult::Invalid("ternary condition must be an integer".into())
                    }
                    other => return other,
                };
                let (a, b) = match pair.as_mut() {
                    Expr::Binary(Op::Pair, a, b) => (a, b),
                    _ => unreachable!("ternary right child is always a Pair node"),
                };
                let chosen = if c != 0 { a.as_mut() } else { b.as_mut() };
                let r = chosen.eval_rec(symbols, visiting);
                if let EvalResult::Evaluated(v) = r {
                    *self = Expr::Leaf(LeafNode(Leaf::Value(v)));
                }
                r
            }
            Expr::Binary(op, a, b) => {
                let ra = a.eval_rec(symbols, visiting);
                let rb = b.eval_rec(symbols, visiting);
                match (ra, rb) {
                    (EvalResult::Invalid(m), _) | (_, EvalResult::Invalid(m)) => {
                        EvalResult::Invalid(m)
                    }
                    (EvalResult::Evaluated(va), EvalResult::Evaluated(vb)) => {
                        match apply_binary(*op, va, vb) {
                            Ok(v) => {
                                *self = Expr::Leaf(LeafNode(Leaf::Value(v)));
                                EvalResult::Evaluated(v)
                            }
                            Err(msg) => EvalResult::Invalid(msg),
                        }
                    }
                    _ => EvalResult::Incomplete,
                }
            }
        }
    }

    /// Splits an additive expression into (adds, subs) leaf lists, as used
    /// by the ptrdiff reduction. `negate` flips the sign of everything
    /// found while recursing (used for the right side of a Sub / inside a
    /// unary Neg).
    pub fn populate_add_sub(&self, adds: &mut Vec<Expr>, subs: &mut Vec<Expr>) {
        self.populate_add_sub_signed(adds, subs, false);
    }

    fn populate_add_sub_signed(&self, adds: &mut Vec<Expr>, subs: &mut Vec<Expr>, negate: bool) {
        match self {
            Expr::Binary(Op::Add, a, b) => {
                a.populate_add_sub_signed(adds, subs, negate);
                b.populate_add_sub_signed(adds, subs, negate);
            }
            Expr::Binary(Op::Sub, a, b) => {
                a.populate_add_sub_signed(adds, subs, negate);
                b.populate_add_sub_signed(adds, subs, !negate);
            }
            Expr::Unary(Op::Neg, a) => a.populate_add_sub_signed(adds, subs, !negate),
            other => {
                if negate {
                    subs.push(other.clone());
                } else {
                    adds.push(other.clone());
                }
            }
        }
    }

    /// Rebuilds a left-associative Add chain from a list of terms.
    pub fn chain_addition(mut terms: Vec<Expr>) -> Expr {
        if terms.is_empty() {
            return Expr::int(0);
        }
        let mut acc = terms.remove(0);
        for term in terms {
            acc = Expr::binary(Op::Add, acc, term);
        }
        acc
    }

    /// The ptrdiff reduction (§4.1): rewrites
    /// `base + off_a - (base + off_b)` into `off_a - off_b` for any
    /// segment-origin symbol in `SEGMENT_BASE_NAMES` appearing once on each
    /// side, so the difference is computable before link time.
    pub fn ptrdiff_reduce(&self) -> Expr {
        let mut adds = Vec::new();
        let mut subs = Vec::new();
        self.populate_add_sub(&mut adds, &mut subs);

        loop {
            let hit = adds.iter().enumerate().find_map(|(ai, a)| {
                let name = match a {
                    Expr::Leaf(LeafNode(Leaf::Token(t))) if is_segment_base(t) => t.as_str(),
                    _ => return None,
                };
                subs.iter()
                    .position(|s| matches!(s, Expr::Leaf(LeafNode(Leaf::Token(t))) if t == name))
                    .map(|si| (ai, si))
            });
            match hit {
                Some((ai, si)) => {
                    adds.remove(ai);
                    subs.remove(si);
                }
                None => break,
            }
        }

        let pos = Expr::chain_addition(adds);
        if subs.is_empty() {
            pos
        } else {
            Expr::binary(Op::Sub, pos, Expr::chain_addition(subs))
        }
    }

    // --- serialization (§6: one tag byte + recursive children) ---

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Expr::Leaf(LeafNode(Leaf::Token(tok))) => {
                w.write_all(&[0b001])?;
                let bytes = tok.as_bytes();
                w.write_all(&(bytes.len() as u16).to_le_bytes())?;
                w.write_all(bytes)
            }
            Expr::Leaf(LeafNode(Leaf::Value(Value::Int(v)))) => {
                w.write_all(&[0b000])?;
                w.write_all(&(*v as u64).to_le_bytes())
            }
            Expr::Leaf(LeafNode(Leaf::Value(Value::Float(v)))) => {
                w.write_all(&[0b010])?;
                w.write_all(&v.to_bits().to_le_bytes())
            }
            Expr::Unary(op, a) => {
                w.write_all(&[0b100])?;
                w.write_all(&[op.code()])?;
                a.write_to(w)
            }
            Expr::Binary(op, a, b) => {
                w.write_all(&[0b100 | 0b1000])?;
                w.write_all(&[op.code()])?;
                a.write_to(w)?;
                b.write_to(w)
            }
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Expr> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)?;
        let tag = tag[0];
        if tag & 0b100 == 0 {
            if tag & 0b001 != 0 {
                let mut len = [0u8; 2];
                r.read_exact(&mut len)?;
                let len = u16::from_le_bytes(len) as usize;
                let mut buf = vec![0u8; len];
                r.read_exact(&mut buf)?;
                let s = String::from_utf8(buf)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Expr::token(s))
            } else if tag & 0b010 != 0 {
                let mut buf = [0u8; 8];
                r.read_exact(&mut buf)?;
                Ok(Expr::float(f64::from_bits(u64::from_le_bytes(buf))))
            } else {
                let mut buf = [0u8; 8];
                r.read_exact(&mut buf)?;
                Ok(Expr::int(u64::from_le_bytes(buf) as i64))
            }
        } else {
            let mut opcode = [0u8; 1];
            r.read_exact(&mut opcode)?;
            let op = Op::from_code(opcode[0])
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad expr opcode"))?;
            let left = Expr::read_from(r)?;
            if tag & 0b1000 != 0 {
                let right = Expr::read_from(r)?;
                Ok(Expr::binary(op, left, right))
            } else {
                Ok(Expr::unary(op, left))
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Leaf(LeafNode(Leaf::Token(t))) => write!(f, "{}", t),
            Expr::Leaf(LeafNode(Leaf::Value(Value::Int(v)))) => write!(f, "{}", v),
            Expr::Leaf(LeafNode(Leaf::Value(Value::Float(v)))) => write!(f, "{}", v),
            Expr::Unary(op, a) => write!(f, "({:?} {})", op, a),
            Expr::Binary(op, a, b) => write!(f, "({} {:?} {})", a, op, b),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum EvalResult {
    Evaluated(Value),
    Incomplete,
    Invalid(String),
}

fn is_segment_base(tok: &str) -> bool {
    SEGMENT_BASE_NAMES.iter().any(|s| *s == tok)
}

fn truncate_to_u64(v: i64) -> u64 {
    v as u64
}

fn apply_unary(op: Op, a: Value) -> Result<Value, String> {
    use Op::*;
    match op {
        BitNot => match a {
            Value::Int(v) => Ok(Value::Int(!v)),
            Value::Float(_) => Err("bitwise NOT requires an integer operand".into()),
        },
        LogNot => match a {
            Value::Int(v) => Ok(Value::Int((v == 0) as i64)),
            Value::Float(_) => Err("logical NOT requires an integer operand".into()),
        },
        Neg => match a {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Float(v) => Ok(Value::Float(-v)),
        },
        ToInt => Ok(Value::Int(match a {
            Value::Int(v) => v,
            Value::Float(v) => v as i64,
        })),
        ToFloat => Ok(Value::Float(a.as_f64())),
        Floor => Ok(Value::Float(a.as_f64().floor())),
        Ceil => Ok(Value::Float(a.as_f64().ceil())),
        Round => Ok(Value::Float(a.as_f64().round())),
        Trunc => Ok(Value::Float(a.as_f64().trunc())),
        Repr32 => match a {
            Value::Float(v) => Ok(Value::Int((v as f32).to_bits() as i64)),
            Value::Int(_) => Err("repr32 requires a float operand".into()),
        },
        Repr64 => match a {
            Value::Float(v) => Ok(Value::Int(v.to_bits() as i64)),
            Value::Int(_) => Err("repr64 requires a float operand".into()),
        },
        Float32 => match a {
            Value::Int(v) => Ok(Value::Float(f32::from_bits(v as u32) as f64)),
            Value::Float(_) => Err("float32 requires an integer bit pattern".into()),
        },
        Float64 => match a {
            Value::Int(v) => Ok(Value::Float(f64::from_bits(v as u64))),
            Value::Float(_) => Err("float64 requires an integer bit pattern".into()),
        },
        Prec32 => Ok(Value::Float(a.as_f64() as f32 as f64)),
        Prec64 => Ok(Value::Float(a.as_f64())),
        _ => unreachable!("{:?} is not a unary operator", op),
    }
}

fn apply_binary(op: Op, a: Value, b: Value) -> Result<Value, String> {
    use Op::*;
    match op {
        Add | Sub | MulS | DivS | ModS if a.is_float() || b.is_float() => {
            let (x, y) = (a.as_f64(), b.as_f64());
            Ok(Value::Float(match op {
                Add => x + y,
                Sub => x - y,
                MulS => x * y,
                DivS => {
                    if y == 0.0 {
                        return Err("division by zero".into());
                    }
                    x / y
                }
                ModS => {
                    if y == 0.0 {
                        return Err("division by zero".into());
                    }
                    x % y
                }
                _ => unreachable!(),
            }))
        }
        Add => Ok(Value::Int(a.as_i64().unwrap().wrapping_add(b.as_i64().unwrap()))),
        Sub => Ok(Value::Int(a.as_i64().unwrap().wrapping_sub(b.as_i64().unwrap()))),
        MulS => Ok(Value::Int(a.as_i64().unwrap().wrapping_mul(b.as_i64().unwrap()))),
        MulU => require_ints(a, b, "unsigned multiply", |x, y| {
            Ok(Value::Int((truncate_to_u64(x).wrapping_mul(truncate_to_u64(y))) as i64))
        }),
        DivS => require_ints(a, b, "signed divide", |x, y| {
            if y == 0 {
                return Err("division by zero".into());
            }
            Ok(Value::Int(x.wrapping_div(y)))
        }),
        DivU => require_ints(a, b, "unsigned divide", |x, y| {
            let y = truncate_to_u64(y);
            if y == 0 {
                return Err("division by zero".into());
            }
            Ok(Value::Int((truncate_to_u64(x) / y) as i64))
        }),
        ModS => require_ints(a, b, "signed modulo", |x, y| {
            if y == 0 {
                return Err("division by zero".into());
            }
            Ok(Value::Int(x.wrapping_rem(y)))
        }),
        ModU => require_ints(a, b, "unsigned modulo", |x, y| {
            let y = truncate_to_u64(y);
            if y == 0 {
                return Err("division by zero".into());
            }
            Ok(Value::Int((truncate_to_u64(x) % y) as i64))
        }),
        Shl => require_ints(a, b, "shift left", |x, y| {
            Ok(Value::Int(if y >= 64 || y < 0 { 0 } else { ((x as u64) << y) as i64 }))
        }),
        Shr => require_ints(a, b, "logical shift right", |x, y| {
            Ok(Value::Int(if y >= 64 || y < 0 { 0 } else { ((x as u64) >> y) as i64 }))
        }),
        Sar => require_ints(a, b, "arithmetic shift right", |x, y| {
            Ok(Value::Int(if y >= 64 || y < 0 {
                if x < 0 { -1 } else { 0 }
            } else {
                x >> y
            }))
        }),
        LtS | LeS | GtS | GeS | Eq | Neq if a.is_float() || b.is_float() => {
            let (x, y) = (a.as_f64(), b.as_f64());
            Ok(Value::Int(match op {
                LtS => x < y,
                LeS => x <= y,
                GtS => x > y,
                GeS => x >= y,
                Eq => x == y,
                Neq => x != y,
                _ => unreachable!(),
            } as i64))
        }
        LtS => Ok(Value::Int((a.as_i64().unwrap() < b.as_i64().unwrap()) as i64)),
        LeS => Ok(Value::Int((a.as_i64().unwrap() <= b.as_i64().unwrap()) as i64)),
        GtS => Ok(Value::Int((a.as_i64().unwrap() > b.as_i64().unwrap()) as i64)),
        GeS => Ok(Value::Int((a.as_i64().unwrap() >= b.as_i64().unwrap()) as i64)),
        Eq => Ok(Value::Int((a.as_i64().unwrap() == b.as_i64().unwrap()) as i64)),
        Neq => Ok(Value::Int((a.as_i64().unwrap() != b.as_i64().unwrap()) as i64)),
        LtU => require_ints(a, b, "unsigned compare", |x, y| {
            Ok(Value::Int((truncate_to_u64(x) < truncate_to_u64(y)) as i64))
        }),
        LeU => require_ints(a, b, "unsigned compare", |x, y| {
            Ok(Value::Int((truncate_to_u64(x) <= truncate_to_u64(y)) as i64))
        }),
        GtU => require_ints(a, b, "unsigned compare", |x, y| {
            Ok(Value::Int((truncate_to_u64(x) > truncate_to_u64(y)) as i64))
        }),
        GeU => require_ints(a, b, "unsigned compare", |x, y| {
            Ok(Value::Int((truncate_to_u64(x) >= truncate_to_u64(y)) as i64))
        }),
        BitAnd => require_ints(a, b, "bitwise AND", |x, y| Ok(Value::Int(x & y))),
        BitOr => require_ints(a, b, "bitwise OR", |x, y| Ok(Value::Int(x | y))),
        BitXor => require_ints(a, b, "bitwise XOR", |x, y| Ok(Value::Int(x ^ y))),
        LogAnd => require_ints(a, b, "logical AND", |x, y| {
            Ok(Value::Int((x != 0 && y != 0) as i64))
        }),
        LogOr => require_ints(a, b, "logical OR", |x, y| {
            Ok(Value::Int((x != 0 || y != 0) as i64))
        }),
        Pair => unreachable!("Pair is only evaluated through its owning Ternary"),
        Ternary => unreachable!("Ternary has dedicated evaluation logic"),
        _ => unreachable!("{:?} is not a binary operator", op),
    }
}

fn require_ints(
    a: Value,
    b: Value,
    what: &str,
    f: impl FnOnce(i64, i64) -> Result<Value, String>,
) -> Result<Value, String> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => f(x, y),
        _ => Err(format!("{} does not accept float operands", what)),
    }
}

/// Parses a numeric literal token: decimal, `0x`/`0o`/`0b` prefixes,
/// underscores ignored, leading-zero decimals rejected, falling back to a
/// double parse.
fn parse_numeric_literal(tok: &str) -> Option<Value> {
    let (neg, rest) = match tok.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, tok),
    };
    if rest.is_empty() {
        return None;
    }
    let cleaned: String = rest.chars().filter(|&c| c != '_').collect();

    let parsed_int = if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = cleaned.strip_prefix("0o").or_else(|| cleaned.strip_prefix("0O")) {
        u64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = cleaned.strip_prefix("0b").or_else(|| cleaned.strip_prefix("0B")) {
        u64::from_str_radix(bin, 2).ok()
    } else if cleaned == "0" {
        Some(0)
    } else if cleaned.starts_with('0') && cleaned.chars().all(|c| c.is_ascii_digit()) {
        None // leading-zero decimals are rejected
    } else if cleaned.chars().all(|c| c.is_ascii_digit()) && !cleaned.is_empty() {
        cleaned.parse::<u64>().ok()
    } else {
        None
    };

    if let Some(v) = parsed_int {
        let v = v as i64;
        return Some(Value::Int(if neg { v.wrapping_neg() } else { v }));
    }

    cleaned.parse::<f64>().ok().map(|v| Value::Float(if neg { -v } else { v }))
}

/// Parses a backtick-quoted character constant with C-style escapes into a
/// little-endian packed integer of 1-8 bytes.
fn parse_char_constant(tok: &str) -> Option<Value> {
    if tok.len() < 2 || !tok.starts_with('`') || !tok.ends_with('`') {
        return None;
    }
    let inner = &tok[1..tok.len() - 1];
    let mut bytes = Vec::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            let esc = chars.next()?;
            bytes.push(match esc {
                'n' => b'\n',
                't' => b'\t',
                'r' => b'\r',
                '0' => 0,
                '\\' => b'\\',
                '`' => b'`',
                '\'' => b'\'',
                '"' => b'"',
                other => other as u8,
            });
        } else {
            let mut buf = [0u8; 4];
            let s = c.encode_utf8(&mut buf);
            bytes.extend_from_slice(s.as_bytes());
        }
    }
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let mut v: u64 = 0;
    for (i, b) in bytes.iter().enumerate() {
        v |= (*b as u64) << (8 * i);
    }
    Some(Value::Int(v as i64))
}
