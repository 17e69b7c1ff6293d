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

//! Maildir directory synchronization.
//!
//! A Maildir mailbox keeps each message as one file under `new/` or
//! `cur/`, identified by its filename. Delivery agents, other server
//! processes, and even other hosts sharing the directory over NFS all
//! mutate the tree concurrently using nothing but atomic renames; the
//! only advisory lock in the whole design protects the uidlist file, and
//! every invariant must survive without it.
//!
//! This module reconciles that directory reality with the binary index:
//! scanning `cur/`, assigning UIDs to newly appeared files, repairing
//! duplicate filenames, expunging vanished messages, and deciding via
//! cached directory mtimes whether a scan is needed at all.

pub mod filename;
pub mod header;
pub mod scan;
pub mod sync;
pub mod uidlist;
