//! Interning and deduplication of byte-string literals (§4.4).
//!
//! Two parallel arrays: `top_level` holds the full byte vectors actually
//! stored, `refs` holds substring windows into them. Insertion prefers
//! reuse over growth: a literal that's a substring of something already
//! interned never grows the collection; a literal that a smaller entry is
//! a substring of absorbs that entry.

#[cfg(test)]
#[path = "./binary_literal_test.rs"]
mod binary_literal_test;

use std::io::{self, Read, Write};

/// A reference into `BinaryLiteralCollection::top_level`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LiteralRef {
    pub top_level_index: usize,
    pub start: usize,
    pub length: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BinaryLiteralCollection {
    top_level: Vec<Vec<u8>>,
    refs: Vec<LiteralRef>,
}

impl BinaryLiteralCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top_level(&self) -> &[Vec<u8>] {
        &self.top_level
    }

    pub fn refs(&self) -> &[LiteralRef] {
        &self.refs
    }

    pub fn get(&self, handle: usize) -> &[u8] {
        let r = &self.refs[handle];
        &self.top_level[r.top_level_index][r.start..r.start + r.length]
    }

    /// Interns `bytes`, returning a stable handle (index into `refs`) that
    /// resolves back to the same byte content for the lifetime of the
    /// collection. Returns `(handle, reused)` where `reused` is true if no
    /// new top-level entry was appended (used for `literal_stats`).
    pub fn add(&mut self, bytes: &[u8]) -> (usize, bool) {
        // (1) an existing top-level already contains `bytes`.
        for (i, top) in self.top_level.iter().enumerate() {
            if let Some(start) = find_subslice(top, bytes) {
                return (self.push_ref(LiteralRef { top_level_index: i, start, length: bytes.len() }), true);
            }
        }

        // (2) `bytes` contains some existing top-level entirely: replace it
        // and repoint every ref that pointed into it, then collapse any
        // other top-levels now contained within the replacement.
        if let Some(i) = self.top_level.iter().position(|top| find_subslice(bytes, top).is_some()) {
            let offset = find_subslice(bytes, &self.top_level[i]).unwrap();
            self.top_level[i] = bytes.to_vec();
            for r in self.refs.iter_mut() {
                if r.top_level_index == i {
                    r.start += offset;
                }
            }
            self.collapse_contained_from(i);
            return (self.push_ref(LiteralRef { top_level_index: i, start: 0, length: bytes.len() }), true);
        }

        // (3) append as a brand new top-level.
        let i = self.top_level.len();
        self.top_level.push(bytes.to_vec());
        (self.push_ref(LiteralRef { top_level_index: i, start: 0, length: bytes.len() }), false)
    }

    /// After replacing `top_level[replaced]`, scan the remaining top-levels
    /// for any now fully contained in it and collapse them by swap-and-pop,
    /// repointing their refs into `replaced`. Restarts the scan after every
    /// removal since a swap-and-pop can move an unexamined entry.
    fn collapse_contained_from(&mut self, mut replaced: usize) {
        'outer: loop {
            for i in 0..self.top_level.len() {
                if i == replaced {
                    continue;
                }
                if let Some(offset) = find_subslice(&self.top_level[replaced], &self.top_level[i]) {
                    let last = self.top_level.len() - 1;
                    self.top_level.swap(i, last);
                    self.top_level.pop();

                    for r in self.refs.iter_mut() {
                        if r.top_level_index == i {
                            r.top_level_index = replaced;
                            r.start += offset;
                        } else if r.top_level_index == last {
                            r.top_level_index = i;
                        }
                    }
                    if replaced == last {
                        replaced = i;
                    }
                    continue 'outer;
                }
            }
            break;
        }
    }

    /// Collapses a duplicate ref (identical content to one already
    /// interned) by linear scan before insertion, per §4.4.
    fn push_ref(&mut self, candidate: LiteralRef) -> usize {
        if let Some(pos) = self.refs.iter().position(|r| *r == candidate) {
            return pos;
        }
        self.refs.push(candidate);
        self.refs.len() - 1
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&(self.top_level.len() as u64).to_le_bytes())?;
        for top in &self.top_level {
            w.write_all(&(top.len() as u64).to_le_bytes())?;
            w.write_all(top)?;
        }
        w.write_all(&(self.refs.len() as u64).to_le_bytes())?;
        for r in &self.refs {
            w.write_all(&(r.top_level_index as u64).to_le_bytes())?;
            w.write_all(&(r.start as u64).to_le_bytes())?;
            w.write_all(&(r.length as u64).to_le_bytes())?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        const MAX_ENTRIES: u64 = 16 * 1024 * 1024;
        let mut buf8 = [0u8; 8];

        r.read_exact(&mut buf8)?;
        let top_count = u64::from_le_bytes(buf8);
        if top_count > MAX_ENTRIES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized literal table"));
        }
        let mut top_level = Vec::with_capacity(top_count as usize);
        for _ in 0..top_count {
            r.read_exact(&mut buf8)?;
            let len = u64::from_le_bytes(buf8);
            if len > MAX_ENTRIES {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized literal"));
            }
            let mut bytes = vec![0u8; len as usize];
            r.read_exact(&mut bytes)?;
            top_level.push(bytes);
        }

        r.read_exact(&mut buf8)?;
        let ref_count = u64::from_le_bytes(buf8);
        if ref_count > MAX_ENTRIES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "oversized literal ref table"));
        }
        let mut refs = Vec::with_capacity(ref_count as usize);
        for _ in 0..ref_count {
            r.read_exact(&mut buf8)?;
            let top_level_index = u64::from_le_bytes(buf8) as usize;
            r.read_exact(&mut buf8)?;
            let start = u64::from_le_bytes(buf8) as usize;
            r.read_exact(&mut buf8)?;
            let length = u64::from_le_bytes(buf8) as usize;
            if top_level_index >= top_level.len() || start + length > top_level[top_level_index].len() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "literal ref out of bounds"));
            }
            refs.push(LiteralRef { top_level_index, start, length });
        }

        Ok(BinaryLiteralCollection { top_level, refs })
    }

    /// Merges `other` into `self`, returning a map from `other`'s handles to
    /// the corresponding handle in `self` (used by the linker, §4.3 step 3).
    pub fn merge(&mut self, other: &BinaryLiteralCollection) -> Vec<usize> {
        let mut map = Vec::with_capacity(other.refs.len());
        for r in &other.refs {
            let bytes = &other.top_level[r.top_level_index][r.start..r.start + r.length];
            let (handle, _) = self.add(bytes);
            map.push(handle);
        }
        map
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
