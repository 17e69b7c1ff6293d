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

//! Mailstead is the storage and synchronization core of a Maildir-based
//! mail server.
//!
//! It reconciles a compact binary index and cache file pair against a
//! lock-free, directory-based Maildir while other processes (possibly on
//! other hosts over NFS) concurrently add, rename, and remove message
//! files. The only mutual-exclusion primitive it relies on is an advisory
//! lock file; every invariant must hold even when that lock could not be
//! obtained.
//!
//! The crate is split into two tightly coupled subsystems:
//!
//! - [`index`]: the on-disk binary encodings — the varint/offset codec,
//!   the sequence-to-record array, the message index file, and the
//!   per-field cache file with its no/temp/yes caching decisions.
//! - [`maildir`]: the directory-level logic — filename grammar, the
//!   `cur/` scanner with duplicate repair, the uidlist and its dotlock,
//!   and the sync orchestrator with its mtime-based quick check.

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

pub mod index;
pub mod maildir;
pub mod support;
