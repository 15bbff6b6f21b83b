//! Merges `ObjectFile`s into an `Executable` (§4.3).
//!
//! Mirrors the assembler's two-pass shape: a first pass walks the
//! externals graph from the `_start` file to decide which objects are
//! actually reachable and lays out their segment bytes back to back; a
//! second pass injects the per-object segment-origin macros, resolves
//! globals and externals, and patches every hole directly into the merged
//! segment buffers.

#[cfg(test)]
#[path = "./linker_test.rs"]
mod linker_test;

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use crate::binary_literal::BinaryLiteralCollection;
use crate::executable::Executable;
use crate::expr::{Expr, SymbolTable, Value};
use crate::object_file::{patch_value, ObjectFile, SegmentKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkErrorKind {
    EmptyResult,
    SymbolRedefinition,
    MissingSymbol,
    FormatError,
}

/// Linker error channel (§7): prefixed with the owning object's filename
/// where one is known, matching `AssembleError`'s hand-written `Display`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkError {
    pub kind: LinkErrorKind,
    pub message: String,
}

impl LinkError {
    fn new(kind: LinkErrorKind, file: &str, msg: impl Into<String>) -> Self {
        LinkError { kind, message: format!("{}: {}", file, msg.into()) }
    }

    fn bare(kind: LinkErrorKind, msg: impl Into<String>) -> Self {
        LinkError { kind, message: msg.into() }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LinkError {}

/// Bookkeeping accumulated for one object across the merge pass: where its
/// segment bytes landed in the merged image, and how its local literal
/// handles map onto the merged `BinaryLiteralCollection`'s handles.
#[derive(Default)]
struct ObjectLayout {
    included: bool,
    base: [u64; 4], // text, rodata, data, bss
    literal_map: Vec<usize>,
}

/// Merges `objects` (each paired with a filename used for diagnostics) into
/// a single `Executable` (§4.3 public contract). `objects[0]` is the
/// `_start` file and must declare `extern _start`; the linker renames that
/// external to `entry_point` before anything else runs.
pub fn link(
    mut objects: Vec<(String, ObjectFile)>,
    entry_point: &str,
) -> Result<Executable, LinkError> {
    if objects.is_empty() {
        return Err(LinkError::bare(LinkErrorKind::EmptyResult, "no object files to link"));
    }

    for (_, obj) in objects.iter_mut() {
        obj.mark_dirty();
    }

    {
        let (start_name, start_obj) = &mut objects[0];
        if !start_obj.externals().contains("_start") {
            return Err(LinkError::new(
                LinkErrorKind::FormatError,
                start_name,
                "first object must declare `extern _start`",
            ));
        }
        start_obj.rename_external("_start", entry_point);
    }

    // Step 1: global symbol table (name -> defining object index).
    let mut global_owner: HashMap<String, usize> = HashMap::new();
    for (i, (name, obj)) in objects.iter().enumerate() {
        for g in obj.globals() {
            if let Some(&prev) = global_owner.get(g) {
                return Err(LinkError::new(
                    LinkErrorKind::SymbolRedefinition,
                    name,
                    format!("global `{}` is already defined in `{}`", g, objects[prev].0),
                ));
            }
            global_owner.insert(g.clone(), i);
        }
    }

    // Steps 2-4: BFS from the `_start` file, laying out segment bytes and
    // merging binary literals for every reachable object.
    let mut layout: Vec<ObjectLayout> = (0..objects.len()).map(|_| ObjectLayout::default()).collect();
    let mut merged_segments: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut merged_bss: u64 = 0;
    let mut merged_literals = BinaryLiteralCollection::new();

    let mut queued: HashSet<usize> = HashSet::new();
    let mut queue: VecDeque<usize> = VecDeque::new();
    queue.push_back(0);
    queued.insert(0);

    while let Some(idx) = queue.pop_front() {
        if layout[idx].included {
            continue;
        }
        layout[idx].included = true;

        for kind in SegmentKind::ALL {
            let align = objects[idx].1.alignment(kind) as u64;
            pad_to_alignment(&mut merged_segments[kind.index()], align);
            layout[idx].base[kind.index()] = merged_segments[kind.index()].len() as u64;
            merged_segments[kind.index()].extend_from_slice(objects[idx].1.segment(kind));
        }
        let bss_align = objects[idx].1.bss_alignment() as u64;
        merged_bss = align_up(merged_bss, bss_align);
        layout[idx].base[3] = merged_bss;
        merged_bss += objects[idx].1.bss_length();

        layout[idx].literal_map = merged_literals.merge(objects[idx].1.literals());

        let externals: Vec<String> = objects[idx].1.externals().iter().cloned().collect();
        for ext in externals {
            let owner = *global_owner.get(&ext).ok_or_else(|| {
                LinkError::new(
                    LinkErrorKind::MissingSymbol,
                    &objects[idx].0,
                    format!("undefined reference to `{}`", ext),
                )
            })?;
            if !layout[owner].included && queued.insert(owner) {
                queue.push_back(owner);
            }
        }
    }

    // Step 5: append the merged literal table to rodata, recording each
    // top-level's byte offset within the rodata segment.
    let mut literal_offsets: Vec<u64> = Vec::with_capacity(merged_literals.top_level().len());
    {
        let rodata = &mut merged_segments[SegmentKind::RoData.index()];
        for top in merged_literals.top_level() {
            literal_offsets.push(rodata.len() as u64);
            rodata.extend_from_slice(top);
        }
    }

    let text_len = merged_segments[SegmentKind::Text.index()].len() as u64;
    let rodata_len = merged_segments[SegmentKind::RoData.index()].len() as u64;
    let mut data_len = merged_segments[SegmentKind::Data.index()].len() as u64;

    // Step 6: pad the final image to a 16-byte boundary for stack use.
    let content_len = text_len + rodata_len + data_len;
    let pad = (16 - (content_len % 16)) % 16;
    if pad != 0 {
        merged_segments[SegmentKind::Data.index()].extend(std::iter::repeat(0u8).take(pad as usize));
        data_len += pad;
    }

    let seg_origin = [0u64, text_len, text_len + rodata_len, text_len + rodata_len + data_len];
    let heap = seg_origin[3] + merged_bss;

    // Step 7: inject segment-origin macros and literal symbols, then
    // evaluate every global purely against the defining object's own
    // (now-augmented) local symbol table.
    for (i, (name, obj)) in objects.iter_mut().enumerate() {
        if !layout[i].included {
            continue;
        }
        let l = &layout[i];
        obj.bind_symbol("#T", Expr::int(seg_origin[0] as i64));
        obj.bind_symbol("#R", Expr::int(seg_origin[1] as i64));
        obj.bind_symbol("#D", Expr::int(seg_origin[2] as i64));
        obj.bind_symbol("#B", Expr::int(seg_origin[3] as i64));
        obj.bind_symbol("#t", Expr::int((seg_origin[0] + l.base[0]) as i64));
        obj.bind_symbol("#r", Expr::int((seg_origin[1] + l.base[1]) as i64));
        obj.bind_symbol("#d", Expr::int((seg_origin[2] + l.base[2]) as i64));
        obj.bind_symbol("#b", Expr::int((seg_origin[3] + l.base[3]) as i64));
        obj.bind_symbol("__heap__", Expr::int(heap as i64));

        for (local_handle, &global_handle) in l.literal_map.iter().enumerate() {
            let gref = merged_literals.refs()[global_handle];
            let addr = seg_origin[1] + literal_offsets[gref.top_level_index] + gref.start as u64;
            obj.bind_symbol(format!("__bin_lit_{:x}", local_handle), Expr::int(addr as i64));
        }

        let globals: Vec<String> = obj.globals().iter().cloned().collect();
        for g in globals {
            let mut e = obj.symbols_mut().remove(&g).ok_or_else(|| {
                LinkError::new(LinkErrorKind::MissingSymbol, name, format!("global `{}` has no definition", g))
            })?;
            let mut local = obj.symbols().clone();
            let result = e.evaluate(&mut local);
            *obj.symbols_mut() = local;
            match result {
                crate::expr::EvalResult::Evaluated(_) => {
                    obj.symbols_mut().insert(g, e);
                }
                crate::expr::EvalResult::Incomplete => {
                    return Err(LinkError::new(
                        LinkErrorKind::MissingSymbol,
                        name,
                        format!("global `{}` cannot be resolved within its own object file", g),
                    ));
                }
                crate::expr::EvalResult::Invalid(msg) => {
                    return Err(LinkError::new(LinkErrorKind::FormatError, name, format!("global `{}`: {}", g, msg)));
                }
            }
        }
    }

    // Step 8: pull every external's now-evaluated value from its defining
    // object into this object's own local symbol table.
    for i in 0..objects.len() {
        if !layout[i].included {
            continue;
        }
        let externals: Vec<String> = objects[i].1.externals().iter().cloned().collect();
        for ext in externals {
            let owner = global_owner[&ext];
            let value = objects[owner]
                .1
                .symbols()
                .get(&ext)
                .and_then(|e| e.cached_value())
                .ok_or_else(|| {
                    LinkError::new(
                        LinkErrorKind::MissingSymbol,
                        &objects[i].0,
                        format!("undefined reference to `{}`", ext),
                    )
                })?;
            let literal = match value {
                Value::Int(v) => Expr::int(v),
                Value::Float(v) => Expr::float(v),
            };
            objects[i].1.bind_symbol(ext, literal);
        }
    }

    // Step 9: patch every hole directly into the merged segment bytes.
    for i in 0..objects.len() {
        if !layout[i].included {
            continue;
        }
        let base = layout[i].base;
        let (name, obj) = &mut objects[i];
        for kind in SegmentKind::ALL {
            let seg_idx = kind.index();
            let mut symbols: SymbolTable = obj.symbols().clone();
            let holes = std::mem::take(obj.holes_mut(kind));
            let mut remaining = Vec::new();
            for mut hole in holes {
                match hole.expr.evaluate(&mut symbols) {
                    crate::expr::EvalResult::Evaluated(v) => {
                        let addr = hole.address + base[seg_idx];
                        patch_value(&mut merged_segments[seg_idx], addr as usize, hole.size, v);
                    }
                    crate::expr::EvalResult::Incomplete => {
                        remaining.push(hole.line);
                    }
                    crate::expr::EvalResult::Invalid(msg) => {
                        return Err(LinkError::new(
                            LinkErrorKind::FormatError,
                            name,
                            format!("line {}: {}", hole.line, msg),
                        ));
                    }
                }
            }
            *obj.symbols_mut() = symbols;
            if let Some(line) = remaining.into_iter().next() {
                return Err(LinkError::new(
                    LinkErrorKind::MissingSymbol,
                    name,
                    format!("line {}: unresolved symbol after linking", line),
                ));
            }
        }
    }

    // Step 10.
    let [text, rodata, data] = merged_segments;
    Ok(Executable::new(text, rodata, data, merged_bss))
}

fn align_up(v: u64, align: u64) -> u64 {
    if align <= 1 {
        return v;
    }
    (v + align - 1) & !(align - 1)
}

fn pad_to_alignment(buf: &mut Vec<u8>, align: u64) {
    let target = align_up(buf.len() as u64, align);
    if target as usize > buf.len() {
        buf.resize(target as usize, 0);
    }
}
