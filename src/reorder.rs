//! Receiver-side reorder buffer.
//!
//! Segments that arrive ahead of the next expected byte wait here until the
//! gap in front of them is filled.  The buffer is a sorted interval list:
//! each entry covers the half-open range `[start, end)`, entries never
//! overlap, and they are ordered by `start` in wrap-around order.  Callers
//! only insert ranges lying ahead of the next expected byte (less than 2^31
//! away), which keeps that ordering total.

use crate::seq::{seq_add, seq_before, seq_before_eq, seq_cmp, seq_distance};

/// Out-of-order payload waiting for the bytes in front of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
    pub start: u32,
    pub end: u32,
    pub payload: Vec<u8>,
}

/// Outcome of [`ReorderBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The whole range was stored.
    Buffered,
    /// Part of the range was already buffered; only the new bytes were
    /// stored, possibly as several entries.
    Trimmed,
    /// Every byte of the range is already buffered; nothing stored.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct ReorderBuffer {
    entries: Vec<Pending>,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert `payload` starting at `start`, keeping the list sorted and
    /// overlap-free.  Bytes already covered by buffered entries are cut
    /// away and each remaining gap is stored as its own entry.
    pub fn insert(&mut self, start: u32, payload: Vec<u8>) -> Insert {
        let end = seq_add(start, payload.len() as u32);
        // Entries are disjoint, so their ends are sorted too.
        let mut idx = self.entries.partition_point(|p| seq_before_eq(p.end, start));

        let mut gaps = Vec::new();
        let mut cursor = start;
        while seq_before(cursor, end) {
            match self.entries.get(idx) {
                Some(p) if seq_before(p.start, end) => {
                    if seq_before(cursor, p.start) {
                        gaps.push((cursor, p.start));
                    }
                    if seq_before(cursor, p.end) {
                        cursor = p.end;
                    }
                    idx += 1;
                }
                _ => {
                    gaps.push((cursor, end));
                    break;
                }
            }
        }

        match gaps.as_slice() {
            [] => return Insert::Duplicate,
            [(s, e)] if *s == start && *e == end => {
                let at = self.position(start);
                self.entries.insert(at, Pending { start, end, payload });
                return Insert::Buffered;
            }
            _ => {}
        }
        for (s, e) in gaps {
            let from = seq_distance(start, s) as usize;
            let to = seq_distance(start, e) as usize;
            let at = self.position(s);
            self.entries.insert(
                at,
                Pending {
                    start: s,
                    end: e,
                    payload: payload[from..to].to_vec(),
                },
            );
        }
        Insert::Trimmed
    }

    fn position(&self, start: u32) -> usize {
        self.entries.partition_point(|p| seq_before(p.start, start))
    }

    /// Remove and return the lowest entry that continues the stream at
    /// `seq`.  Entries already covered by `seq` are discarded; one that
    /// straddles it comes back with its covered prefix cut off.
    pub fn pop_ready(&mut self, seq: u32) -> Option<Pending> {
        while let Some(first) = self.entries.first() {
            if seq_before(seq, first.start) {
                return None;
            }
            let mut p = self.entries.remove(0);
            if !seq_before(seq, p.end) {
                continue;
            }
            p.payload.drain(..seq_distance(p.start, seq) as usize);
            p.start = seq;
            return Some(p);
        }
        None
    }

    /// Lowest buffered range, if any.
    pub fn lowest(&self) -> Option<(u32, u32)> {
        self.entries.first().map(|p| (p.start, p.end))
    }

    /// Buffered ranges in ascending order.
    pub fn ranges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.entries.iter().map(|p| (p.start, p.end))
    }

    /// Debug check of the sorted / non-overlapping invariant.
    pub fn is_well_formed(&self) -> bool {
        self.entries.windows(2).all(|w| {
            seq_cmp(w[0].start, w[1].start).is_lt() && !seq_before(w[1].start, w[0].end)
        })
    }
}
