//-
// Copyright (c) 2026, Mailstead developers
//
// This file is part of Mailstead.
//
// Mailstead is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailstead is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailstead. If not, see <http://www.gnu.org/licenses/>.

//! A sorted mapping from message sequence numbers to fixed-size records.
//!
//! Index transactions accumulate per-message updates keyed by sequence
//! number. Updates almost always arrive in ascending order, so lookup
//! first checks against the last element before falling back to binary
//! search, and appending to the end is the O(1) common case.

use byteorder::{ByteOrder, LittleEndian};

/// An ordered container of `(seq, record)` entries with a record size
/// fixed at construction.
///
/// Sequence keys are strictly ascending and unique. Records are stored
/// inline after their 4-byte key, padded up to a multiple of 4 so every
/// key stays 4-byte aligned.
#[derive(Clone, Debug)]
pub struct SeqRecordArray {
    record_size: usize,
    padded_size: usize,
    data: Vec<u8>,
}

impl SeqRecordArray {
    pub fn new(record_size: usize) -> Self {
        SeqRecordArray {
            record_size,
            padded_size: (record_size + 3) & !3,
            data: Vec::new(),
        }
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    fn stride(&self) -> usize {
        4 + self.padded_size
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.stride()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn seq_at(&self, ix: usize) -> u32 {
        LittleEndian::read_u32(&self.data[ix * self.stride()..])
    }

    fn record_at(&self, ix: usize) -> &[u8] {
        let start = ix * self.stride() + 4;
        &self.data[start..start + self.record_size]
    }

    /// Find `seq`, returning whether it is present and the index at which
    /// it is (or would be inserted to keep the array sorted).
    pub fn lookup(&self, seq: u32) -> (bool, usize) {
        let count = self.len();
        // Fast path: the array is usually appended to
        if count > 0 {
            let last = self.seq_at(count - 1);
            if seq > last {
                return (false, count);
            }
            if seq == last {
                return (true, count - 1);
            }
        }

        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.seq_at(mid) < seq {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < count && self.seq_at(lo) == seq, lo)
    }

    /// Insert `record` at `seq`, or overwrite the record already there.
    ///
    /// Returns whether the key was already present. If it was and `old`
    /// is given, the previous record is copied into `old` before being
    /// overwritten so the caller can diff against it.
    ///
    /// `record` (and `old`) must be exactly the record size this array
    /// was constructed with; a mismatch is a programming error.
    pub fn upsert(
        &mut self,
        seq: u32,
        record: &[u8],
        old: Option<&mut [u8]>,
    ) -> bool {
        assert_eq!(
            self.record_size,
            record.len(),
            "record size conflicts with array stride"
        );

        let (found, ix) = self.lookup(seq);
        if found {
            let start = ix * self.stride() + 4;
            if let Some(old) = old {
                assert_eq!(self.record_size, old.len());
                old.copy_from_slice(
                    &self.data[start..start + self.record_size],
                );
            }
            self.data[start..start + self.record_size]
                .copy_from_slice(record);
            return true;
        }

        let mut elem = Vec::with_capacity(self.stride());
        let mut key = [0u8; 4];
        LittleEndian::write_u32(&mut key, seq);
        elem.extend_from_slice(&key);
        elem.extend_from_slice(record);
        elem.resize(self.stride(), 0);

        let at = ix * self.stride();
        self.data.splice(at..at, elem);
        false
    }

    pub fn get(&self, seq: u32) -> Option<&[u8]> {
        let (found, ix) = self.lookup(seq);
        if found {
            Some(self.record_at(ix))
        } else {
            None
        }
    }

    /// Iterate entries in ascending sequence order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        (0..self.len()).map(move |ix| (self.seq_at(ix), self.record_at(ix)))
    }
}
