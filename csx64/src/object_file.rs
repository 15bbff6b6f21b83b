//! Per-translation-unit artifact produced by the assembler and consumed by
//! the linker (§3 `ObjectFile`, §6 object file format).

#[cfg(test)]
#[path = "./object_file_test.rs"]
mod object_file_test;

use std::collections::HashSet;
use std::io::{self, Read, Write};

use crate::binary_literal::BinaryLiteralCollection;
use crate::expr::{Expr, SymbolTable};

pub const OBJECT_MAGIC: &[u8; 8] = b"CSX64obj";
pub const OBJECT_VERSION: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    RoData,
    Data,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 3] = [SegmentKind::Text, SegmentKind::RoData, SegmentKind::Data];

    pub fn index(self) -> usize {
        match self {
            SegmentKind::Text => 0,
            SegmentKind::RoData => 1,
            SegmentKind::Data => 2,
        }
    }
}

/// A deferred write into a segment, patched once its expression evaluates.
#[derive(Clone, Debug, PartialEq)]
pub struct Hole {
    pub address: u64,
    pub size: u8,
    pub line: u32,
    pub expr: Expr,
}

#[derive(Clone, Debug, Default)]
pub struct LiteralStats {
    pub interned: usize,
    pub reused: usize,
}

/// Shallow `--dump` view of an `ObjectFile` (§B); see `dump_json`.
#[derive(Serialize)]
struct ObjectFileSummary {
    globals: Vec<String>,
    externals: Vec<String>,
    symbol_count: usize,
    text_len: usize,
    rodata_len: usize,
    data_len: usize,
    bss_length: u64,
    /// Hole counts in `SegmentKind::ALL` order (text, rodata, data).
    holes: [usize; 3],
    literals_interned: usize,
    literals_reused: usize,
}

#[derive(Clone, Debug)]
pub struct ObjectFile {
    globals: HashSet<String>,
    externals: HashSet<String>,
    symbols: SymbolTable,

    segments: [Vec<u8>; 3],
    alignment: [u32; 4], // text, rodata, data, bss
    bss_length: u64,
    holes: [Vec<Hole>; 3],

    literals: BinaryLiteralCollection,
    literal_stats: LiteralStats,

    dirty: bool,
}

impl Default for ObjectFile {
    fn default() -> Self {
        ObjectFile {
            globals: HashSet::new(),
            externals: HashSet::new(),
            symbols: SymbolTable::new(),
            segments: [Vec::new(), Vec::new(), Vec::new()],
            alignment: [1, 1, 1, 1],
            bss_length: 0,
            holes: [Vec::new(), Vec::new(), Vec::new()],
            literals: BinaryLiteralCollection::new(),
            literal_stats: LiteralStats::default(),
            dirty: false,
        }
    }
}

impl ObjectFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn globals(&self) -> &HashSet<String> {
        &self.globals
    }

    pub fn externals(&self) -> &HashSet<String> {
        &self.externals
    }

    pub fn add_global(&mut self, name: impl Into<String>) {
        self.globals.insert(name.into());
    }

    pub fn add_external(&mut self, name: impl Into<String>) {
        self.externals.insert(name.into());
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn bind_symbol(&mut self, name: impl Into<String>, expr: Expr) {
        self.symbols.insert(name.into(), expr);
    }

    pub fn segment(&self, kind: SegmentKind) -> &Vec<u8> {
        &self.segments[kind.index()]
    }

    pub fn segment_mut(&mut self, kind: SegmentKind) -> &mut Vec<u8> {
        &mut self.segments[kind.index()]
    }

    pub fn holes(&self, kind: SegmentKind) -> &Vec<Hole> {
        &self.holes[kind.index()]
    }

    pub fn holes_mut(&mut self, kind: SegmentKind) -> &mut Vec<Hole> {
        &mut self.holes[kind.index()]
    }

    pub fn add_hole(&mut self, kind: SegmentKind, hole: Hole) {
        self.holes[kind.index()].push(hole);
    }

    /// Renames an external reference everywhere it's used (holes and
    /// symbol expressions) and in the external-name set itself. Used by
    /// the linker to retarget the `_start` file's `extern _start` onto the
    /// caller-chosen entry-point name (§4.3 step 0).
    pub fn rename_external(&mut self, old: &str, new: &str) {
        if self.externals.remove(old) {
            self.externals.insert(new.to_string());
        }
        for kind in SegmentKind::ALL {
            for hole in self.holes[kind.index()].iter_mut() {
                hole.expr.rename_token(old, new);
            }
        }
        for e in self.symbols.values_mut() {
            e.rename_token(old, new);
        }
    }

    pub fn alignment(&self, kind: SegmentKind) -> u32 {
        self.alignment[kind.index()]
    }

    pub fn set_alignment(&mut self, kind: SegmentKind, align: u32) {
        self.alignment[kind.index()] = align;
    }

    pub fn bss_alignment(&self) -> u32 {
        self.alignment[3]
    }

    pub fn set_bss_alignment(&mut self, align: u32) {
        self.alignment[3] = align;
    }

    pub fn bss_length(&self) -> u64 {
        self.bss_length
    }

    pub fn add_bss(&mut self, len: u64) {
        self.bss_length += len;
    }

    pub fn literals(&self) -> &BinaryLiteralCollection {
        &self.literals
    }

    pub fn literals_mut(&mut self) -> &mut BinaryLiteralCollection {
        &mut self.literals
    }

    pub fn intern_literal(&mut self, bytes: &[u8]) -> usize {
        let (handle, reused) = self.literals.add(bytes);
        if reused {
            self.literal_stats.reused += 1;
        } else {
            self.literal_stats.interned += 1;
        }
        handle
    }

    pub fn literal_stats(&self) -> &LiteralStats {
        &self.literal_stats
    }

    /// Pretty-printed JSON summary for `--dump` (§B): a shallow view over
    /// symbol/segment/literal counts rather than the full `Expr` tree, which
    /// carries no stable public shape worth committing to a wire format.
    pub fn dump_json(&self) -> serde_json::Result<String> {
        let summary = ObjectFileSummary {
            globals: {
                let mut v: Vec<String> = self.globals.iter().cloned().collect();
                v.sort();
                v
            },
            externals: {
                let mut v: Vec<String> = self.externals.iter().cloned().collect();
                v.sort();
                v
            },
            symbol_count: self.symbols.len(),
            text_len: self.segments[SegmentKind::Text.index()].len(),
            rodata_len: self.segments[SegmentKind::RoData.index()].len(),
            data_len: self.segments[SegmentKind::Data.index()].len(),
            bss_length: self.bss_length,
            holes: [
                self.holes[SegmentKind::Text.index()].len(),
                self.holes[SegmentKind::RoData.index()].len(),
                self.holes[SegmentKind::Data.index()].len(),
            ],
            literals_interned: self.literal_stats.interned,
            literals_reused: self.literal_stats.reused,
        };
        serde_json::to_string_pretty(&summary)
    }

    /// Collapses every resolvable symbol in place (§4.2 post-pass step 1)
    /// and patches any hole whose expression is now computable (step 2).
    pub fn resolve_internal(&mut self) {
        let names: Vec<String> = self.symbols.keys().cloned().collect();
        for name in names {
            if let Some(mut e) = self.symbols.remove(&name) {
                e.evaluate(&mut self.symbols);
                self.symbols.insert(name, e);
            }
        }

        for kind in SegmentKind::ALL {
            let idx = kind.index();
            let mut remaining = Vec::new();
            for mut hole in self.holes[idx].drain(..) {
                match hole.expr.evaluate(&mut self.symbols) {
                    crate::expr::EvalResult::Evaluated(v) => {
                        patch_value(&mut self.segments[idx], hole.address as usize, hole.size, v);
                    }
                    _ => remaining.push(hole),
                }
            }
            self.holes[idx] = remaining;
        }
    }

    /// Drops non-exported symbols that are fully evaluated and have no
    /// remaining external references (§4.2 post-pass step 3), then renames
    /// the survivors to short identifiers to shrink the object file (step
    /// 4).
    pub fn compact_symbols(&mut self) {
        let mut referenced: HashSet<String> = HashSet::new();
        for kind in SegmentKind::ALL {
            for hole in self.holes[kind.index()].iter() {
                let mut toks = Vec::new();
                hole.expr.referenced_tokens(&mut toks);
                referenced.extend(toks);
            }
        }
        for e in self.symbols.values() {
            let mut toks = Vec::new();
            e.referenced_tokens(&mut toks);
            referenced.extend(toks);
        }

        let droppable: Vec<String> = self
            .symbols
            .iter()
            .filter(|(name, e)| {
                !self.globals.contains(*name) && e.is_evaluated() && !referenced.contains(*name)
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in droppable {
            self.symbols.remove(&name);
        }

        let renamable: Vec<String> = self
            .symbols
            .keys()
            .filter(|name| !self.globals.contains(*name))
            .cloned()
            .collect();
        for (i, name) in renamable.into_iter().enumerate() {
            let short = format!("^{:x}", i);
            if let Some(e) = self.symbols.remove(&name) {
                self.symbols.insert(short.clone(), e);
            }
            for kind in SegmentKind::ALL {
                for hole in self.holes[kind.index()].iter_mut() {
                    hole.expr.rename_token(&name, &short);
                }
            }
            for e in self.symbols.values_mut() {
                e.rename_token(&name, &short);
            }
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(OBJECT_MAGIC)?;
        w.write_all(&OBJECT_VERSION.to_le_bytes())?;

        write_string_list(w, self.globals.iter())?;
        write_string_list(w, self.externals.iter())?;

        w.write_all(&(self.symbols.len() as u64).to_le_bytes())?;
        for (name, expr) in &self.symbols {
            write_string(w, name)?;
            expr.write_to(w)?;
        }

        for a in &self.alignment {
            w.write_all(&a.to_le_bytes())?;
        }

        for kind in SegmentKind::ALL {
            let holes = &self.holes[kind.index()];
            w.write_all(&(holes.len() as u64).to_le_bytes())?;
            for h in holes {
                w.write_all(&h.address.to_le_bytes())?;
                w.write_all(&[h.size])?;
                w.write_all(&h.line.to_le_bytes())?;
                h.expr.write_to(w)?;
            }
        }

        for kind in SegmentKind::ALL {
            let seg = &self.segments[kind.index()];
            w.write_all(&(seg.len() as u64).to_le_bytes())?;
            w.write_all(seg)?;
        }

        w.write_all(&self.bss_length.to_le_bytes())?;
        self.literals.write_to(w)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != OBJECT_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad object file magic"));
        }
        let mut buf8 = [0u8; 8];
        r.read_exact(&mut buf8)?;
        let version = u64::from_le_bytes(buf8);
        if version != OBJECT_VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported object file version"));
        }

        let globals: HashSet<String> = read_string_list(r)?.into_iter().collect();
        let externals: HashSet<String> = read_string_list(r)?.into_iter().collect();

        r.read_exact(&mut buf8)?;
        let sym_count = u64::from_le_bytes(buf8);
        let mut symbols = SymbolTable::new();
        for _ in 0..sym_count {
            let name = read_string(r)?;
            let expr = Expr::read_from(r)?;
            symbols.insert(name, expr);
        }

        let mut alignment = [0u32; 4];
        for a in alignment.iter_mut() {
            let mut buf4 = [0u8; 4];
            r.read_exact(&mut buf4)?;
            *a = u32::from_le_bytes(buf4);
            if !a.is_power_of_two() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "segment alignment must be a power of two"));
            }
        }

        let mut holes: [Vec<Hole>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for slot in holes.iter_mut() {
            r.read_exact(&mut buf8)?;
            let count = u64::from_le_bytes(buf8);
            for _ in 0..count {
                r.read_exact(&mut buf8)?;
                let address = u64::from_le_bytes(buf8);
                let mut size = [0u8; 1];
                r.read_exact(&mut size)?;
                let mut line = [0u8; 4];
                r.read_exact(&mut line)?;
                let expr = Expr::read_from(r)?;
                slot.push(Hole { address, size: size[0], line: u32::from_le_bytes(line), expr });
            }
        }

        let mut segments: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for seg in segments.iter_mut() {
            r.read_exact(&mut buf8)?;
            let len = u64::from_le_bytes(buf8) as usize;
            let mut bytes = vec![0u8; len];
            r.read_exact(&mut bytes)?;
            *seg = bytes;
        }

        r.read_exact(&mut buf8)?;
        let bss_length = u64::from_le_bytes(buf8);

        let literals = BinaryLiteralCollection::read_from(r)?;

        Ok(ObjectFile {
            globals,
            externals,
            symbols,
            segments,
            alignment,
            bss_length,
            holes,
            literals,
            literal_stats: LiteralStats::default(),
            dirty: false,
        })
    }
}

/// Writes `v` (truncated/reinterpreted to `size` bytes) at `addr` in `seg`,
/// growing the segment with zero bytes if necessary. Shared between
/// `ObjectFile::resolve_internal` (pre-link hole patching) and the linker's
/// final hole-patching pass over merged segment bytes.
pub(crate) fn patch_value(seg: &mut Vec<u8>, addr: usize, size: u8, v: crate::expr::Value) {
    if seg.len() < addr + size as usize {
        seg.resize(addr + size as usize, 0);
    }
    let bytes: [u8; 8] = match v {
        crate::expr::Value::Int(i) => (i as u64).to_le_bytes(),
        crate::expr::Value::Float(f) => {
            if size == 4 {
                let b = (f as f32).to_bits();
                let mut out = [0u8; 8];
                out[..4].copy_from_slice(&b.to_le_bytes());
                out
            } else {
                f.to_bits().to_le_bytes()
            }
        }
    };
    seg[addr..addr + size as usize].copy_from_slice(&bytes[..size as usize]);
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u16).to_le_bytes())?;
    w.write_all(bytes)
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let mut len = [0u8; 2];
    r.read_exact(&mut len)?;
    let len = u16::from_le_bytes(len) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_string_list<'a, W: Write>(w: &mut W, items: impl Iterator<Item = &'a String>) -> io::Result<()> {
    let items: Vec<&String> = items.collect();
    w.write_all(&(items.len() as u64).to_le_bytes())?;
    for s in items {
        write_string(w, s)?;
    }
    Ok(())
}

fn read_string_list<R: Read>(r: &mut R) -> io::Result<Vec<String>> {
    let mut buf8 = [0u8; 8];
    r.read_exact(&mut buf8)?;
    let count = u64::from_le_bytes(buf8);
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(read_string(r)?);
    }
    Ok(out)
}
