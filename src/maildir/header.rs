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

//! The Maildir extension record stored in the index header.
//!
//! Holds the directory mtimes and check times that drive the dirty-time
//! heuristic. All-zero (including the empty blob of a fresh index) means
//! the mailbox has never been synced, which forces the first-sync full
//! scan.

use byteorder::{ByteOrder, LittleEndian};

/// Name of the index extension this header is stored under.
pub const EXT_NAME: &str = "maildir";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaildirIndexHeader {
    /// When `new/` was last checked against its recorded mtime.
    pub new_check_time: u32,
    pub new_mtime: u32,
    pub new_mtime_nsecs: u32,
    /// When `cur/` was last checked against its recorded mtime.
    pub cur_check_time: u32,
    pub cur_mtime: u32,
    pub cur_mtime_nsecs: u32,
}

impl MaildirIndexHeader {
    pub fn is_never_synced(&self) -> bool {
        MaildirIndexHeader::default() == *self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 24];
        LittleEndian::write_u32(&mut buf[0..], self.new_check_time);
        LittleEndian::write_u32(&mut buf[4..], self.new_mtime);
        LittleEndian::write_u32(&mut buf[8..], self.new_mtime_nsecs);
        LittleEndian::write_u32(&mut buf[12..], self.cur_check_time);
        LittleEndian::write_u32(&mut buf[16..], self.cur_mtime);
        LittleEndian::write_u32(&mut buf[20..], self.cur_mtime_nsecs);
        buf
    }

    /// Decode the stored blob, zero-filling fields a shorter, older
    /// format did not carry.
    pub fn decode(blob: &[u8]) -> Self {
        let mut padded = [0u8; 24];
        let n = blob.len().min(24);
        padded[..n].copy_from_slice(&blob[..n]);

        MaildirIndexHeader {
            new_check_time: LittleEndian::read_u32(&padded[0..]),
            new_mtime: LittleEndian::read_u32(&padded[4..]),
            new_mtime_nsecs: LittleEndian::read_u32(&padded[8..]),
            cur_check_time: LittleEndian::read_u32(&padded[12..]),
            cur_mtime: LittleEndian::read_u32(&padded[16..]),
            cur_mtime_nsecs: LittleEndian::read_u32(&padded[20..]),
        }
    }
}
