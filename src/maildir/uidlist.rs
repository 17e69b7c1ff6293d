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

//! The uidlist: the authoritative UID-to-filename mapping.
//!
//! The uidlist is a plain text file, one header line plus one line per
//! message, rewritten atomically as a whole. It is the source of truth
//! for UID assignment; the binary index is merely a cache of it plus the
//! directory state. Its dotlock is the only mutual-exclusion primitive
//! in the whole mailbox, and even that is advisory: a process that
//! cannot obtain it may still read, so every on-disk invariant must hold
//! without it.
//!
//! Rewrites guarantee a strictly growing mtime so other processes can
//! detect changes without comparing content.
//!
//! File format (version 3):
//!
//! ```text
//! 3 V<uidvalidity> N<next-uid>
//! <uid> <filename>
//! ...
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use log::warn;
use nix::libc;
use nix::sys::stat::UtimensatFlags;
use nix::sys::time::TimeSpec;

use crate::maildir::filename::Filename;
use crate::support::clock::Clock;
use crate::support::config::MaildirConfig;
use crate::support::error::Error;
use crate::support::file_ops::{self, IgnoreKinds};

const UIDLIST_VERSION: u32 = 3;

bitflags! {
    pub struct EntryFlags: u8 {
        /// Assigned during the current sync session, not yet persisted.
        const NONSYNCED = 1 << 0;
        /// The file may still be sitting in `new/`.
        const MAYBE_IN_NEW = 1 << 1;
        /// The file was observed mid-rename; re-examine next pass.
        const RACING = 1 << 2;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UidlistEntry {
    pub uid: u32,
    pub filename: String,
    pub flags: EntryFlags,
}

/// The in-memory view of the uidlist file.
pub struct Uidlist {
    path: PathBuf,
    tmp_dir: PathBuf,
    pub uid_validity: u32,
    pub next_uid: u32,
    entries: Vec<UidlistEntry>,
    by_base: HashMap<String, usize>,
    last_mtime: i64,
}

impl Uidlist {
    /// Open the uidlist, treating a missing file as empty. A corrupt
    /// file is discarded with a warning; the directory scan rebuilds it.
    pub fn open(
        path: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
    ) -> Result<Self, Error> {
        let mut this = Uidlist {
            path: path.into(),
            tmp_dir: tmp_dir.into(),
            uid_validity: 0,
            next_uid: 1,
            entries: Vec::new(),
            by_base: HashMap::new(),
            last_mtime: 0,
        };
        this.refresh()?;
        Ok(this)
    }

    /// Re-read the file from disk, replacing the in-memory view.
    pub fn refresh(&mut self) -> Result<(), Error> {
        self.uid_validity = 0;
        self.next_uid = 1;
        self.entries.clear();
        self.by_base.clear();

        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        };
        self.last_mtime = nix::sys::stat::stat(&self.path)?.st_mtime;

        match parse_uidlist(&text) {
            Ok((uid_validity, next_uid, entries)) => {
                self.uid_validity = uid_validity;
                self.next_uid = next_uid;
                for entry in entries {
                    self.push_entry(entry);
                }
            }
            Err(e) => {
                warn!(
                    "{}: discarding corrupt uidlist: {}",
                    self.path.display(),
                    e
                );
            }
        }
        Ok(())
    }

    fn push_entry(&mut self, entry: UidlistEntry) {
        let base = Filename::parse(&entry.filename).base().to_owned();
        self.by_base.insert(base, self.entries.len());
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[UidlistEntry] {
        &self.entries
    }

    pub fn entry_by_base(&self, base: &str) -> Option<&UidlistEntry> {
        self.by_base.get(base).map(|&ix| &self.entries[ix])
    }

    pub fn filename_of_uid(&self, uid: u32) -> Option<&str> {
        self.entries
            .binary_search_by_key(&uid, |e| e.uid)
            .ok()
            .map(|ix| &self.entries[ix].filename[..])
    }

    /// Raise the next-UID counter to at least `next_uid`. Used when the
    /// uidlist file was deleted and is being rebuilt while the index
    /// still remembers how far assignment had progressed.
    pub fn catch_up_next_uid(&mut self, next_uid: u32) {
        self.next_uid = self.next_uid.max(next_uid);
    }

    /// Atomically rewrite the file with the current in-memory state.
    pub fn save(&mut self) -> Result<(), Error> {
        let mut text = String::new();
        let _ = writeln!(
            text,
            "{} V{} N{}",
            UIDLIST_VERSION, self.uid_validity, self.next_uid
        );
        for entry in &self.entries {
            let _ = writeln!(text, "{} {}", entry.uid, entry.filename);
        }

        file_ops::spit(
            &self.tmp_dir,
            &self.path,
            true,
            0o600,
            text.as_bytes(),
        )?;
        file_ops::bump_mtime_past(&self.path, self.last_mtime)?;
        self.last_mtime = nix::sys::stat::stat(&self.path)?.st_mtime;
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".lock");
        self.path.with_file_name(name)
    }

    /// Acquire the uidlist dotlock.
    ///
    /// `Try` returns immediately on contention; `Timeout` polls up to
    /// the configured timeout. `Ok(None)` means the lock was not
    /// obtained; the caller decides whether that degrades the sync or
    /// aborts it. A lock file whose mtime is older than the stale
    /// threshold is presumed abandoned by a dead process and overridden.
    pub fn acquire_lock(
        &self,
        mode: LockMode,
        config: &MaildirConfig,
        clock: &dyn Clock,
    ) -> Result<Option<UidlistLock>, Error> {
        let path = self.lock_path();
        let attempts = match mode {
            LockMode::Try => 1,
            LockMode::Timeout => {
                1 + config.lock_timeout_secs as u64 * 10
            }
        };

        for attempt in 0..attempts {
            if 0 != attempt {
                thread::sleep(Duration::from_millis(100));
            }

            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => {
                    return Ok(Some(UidlistLock { path }));
                }
                Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
                    self.steal_if_stale(&path, config, clock)?;
                }
                Err(e) => {
                    // Quota or permission trouble: degrade rather than
                    // hang the mailbox.
                    warn!(
                        "{}: cannot create lock file: {}",
                        path.display(),
                        e
                    );
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    fn steal_if_stale(
        &self,
        path: &Path,
        config: &MaildirConfig,
        clock: &dyn Clock,
    ) -> Result<(), Error> {
        let mtime = match nix::sys::stat::stat(path) {
            Ok(st) => st.st_mtime,
            // Holder released it between our attempts
            Err(nix::Error::ENOENT) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if clock.now() - mtime > config.lock_stale_secs {
            warn!(
                "{}: overriding stale lock (mtime {})",
                path.display(),
                mtime
            );
            fs::remove_file(path).ignore_not_found()?;
        }
        Ok(())
    }

    pub fn begin_sync(&mut self) -> UidlistSync<'_> {
        UidlistSync {
            seen_bases: HashMap::new(),
            known: Vec::new(),
            new_files: Vec::new(),
            assigned: Vec::new(),
            uidlist: self,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Try,
    Timeout,
}

/// A held uidlist dotlock. Removed on drop.
pub struct UidlistLock {
    path: PathBuf,
}

impl UidlistLock {
    /// Refresh the lock file mtime so other processes do not mistake a
    /// long scan for a dead holder.
    pub fn touch(&self, now: i64) -> Result<(), Error> {
        let ts = TimeSpec::from(libc::timespec {
            tv_sec: now as libc::time_t,
            tv_nsec: 0,
        });
        nix::sys::stat::utimensat(
            None,
            &self.path,
            &ts,
            &ts,
            UtimensatFlags::FollowSymlink,
        )?;
        Ok(())
    }
}

impl Drop for UidlistLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// How a scanned filename relates to the uidlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Base name already mapped to a UID.
    Known(u32),
    /// Never seen before; a UID will be assigned at `finish`.
    New,
    /// The same base name was already fed to this session under another
    /// directory entry. Carries the entry seen first.
    Duplicate { first_seen: String },
}

/// One sync pass's view of the uidlist.
///
/// All changes are staged in the session; the uidlist itself is only
/// touched by `commit`, so dropping the session rolls everything back
/// and a retried pass will assign the very same UIDs.
pub struct UidlistSync<'a> {
    uidlist: &'a mut Uidlist,
    /// base name -> directory entry it was first seen as
    seen_bases: HashMap<String, String>,
    known: Vec<(u32, String)>,
    new_files: Vec<String>,
    assigned: Vec<UidlistEntry>,
}

impl<'a> UidlistSync<'a> {
    /// Classify one directory entry. Every file the scan observes must
    /// pass through here exactly once.
    pub fn next(&mut self, name: &str) -> Classification {
        let base = Filename::parse(name).base().to_owned();
        if let Some(first_seen) = self.seen_bases.get(&base) {
            return Classification::Duplicate {
                first_seen: first_seen.clone(),
            };
        }
        self.seen_bases.insert(base.clone(), name.to_owned());

        if let Some(entry) = self.uidlist.entry_by_base(&base) {
            self.known.push((entry.uid, name.to_owned()));
            Classification::Known(entry.uid)
        } else {
            self.new_files.push(name.to_owned());
            Classification::New
        }
    }

    /// Known files observed this pass, with their current directory
    /// entry names (whose flag letters may differ from the recorded
    /// ones).
    pub fn known_files(&self) -> &[(u32, String)] {
        &self.known
    }

    /// Uidlist entries whose base name was never observed this pass;
    /// their messages have been deleted externally.
    pub fn unseen(&self) -> Vec<UidlistEntry> {
        self.uidlist
            .entries
            .iter()
            .filter(|e| {
                !self
                    .seen_bases
                    .contains_key(Filename::parse(&e.filename).base())
            })
            .cloned()
            .collect()
    }

    /// Assign provisional UIDs to the new files, in sorted filename
    /// order so that concurrent scanners observing the same directory
    /// state reach the same assignment.
    pub fn finish(&mut self) -> &[UidlistEntry] {
        if self.assigned.is_empty() && !self.new_files.is_empty() {
            self.new_files.sort();
            let mut uid = self.uidlist.next_uid;
            for filename in &self.new_files {
                self.assigned.push(UidlistEntry {
                    uid,
                    filename: filename.clone(),
                    flags: EntryFlags::NONSYNCED,
                });
                uid += 1;
            }
        }
        &self.assigned
    }

    /// Apply the staged state: drop expunged UIDs, persist the
    /// provisional assignments, advance the next-UID counter, and
    /// rewrite the file.
    pub fn commit(self, expunged: &[u32]) -> Result<(), Error> {
        let assigned_count = self.assigned.len() as u32;
        let uidlist = self.uidlist;

        let mut entries = std::mem::take(&mut uidlist.entries);
        uidlist.by_base.clear();
        entries.retain(|e| !expunged.contains(&e.uid));

        // Known files may have been renamed by flag changes; record the
        // names they were actually observed under.
        for (uid, name) in &self.known {
            if let Ok(ix) = entries.binary_search_by_key(uid, |e| e.uid)
            {
                if entries[ix].filename != *name {
                    entries[ix].filename = name.clone();
                }
            }
        }
        for mut entry in self.assigned {
            entry.flags.remove(EntryFlags::NONSYNCED);
            entries.push(entry);
        }
        for entry in entries {
            uidlist.push_entry(entry);
        }

        uidlist.next_uid += assigned_count;
        uidlist.save()
    }
}

fn parse_uidlist(
    text: &str,
) -> Result<(u32, u32, Vec<UidlistEntry>), Error> {
    let mut lines = text.lines();
    let header =
        lines.next().ok_or(Error::Corrupt("uidlist header"))?;

    let mut uid_validity = None;
    let mut next_uid = None;
    let mut tokens = header.split(' ');
    let version: u32 = tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or(Error::Corrupt("uidlist version"))?;
    if UIDLIST_VERSION != version {
        return Err(Error::Corrupt("uidlist version"));
    }
    for token in tokens {
        match token.as_bytes().first() {
            Some(b'V') => {
                uid_validity = token[1..].parse().ok();
            }
            Some(b'N') => {
                next_uid = token[1..].parse().ok();
            }
            // Unknown header keys from newer writers are skipped
            _ => {}
        }
    }
    let uid_validity =
        uid_validity.ok_or(Error::Corrupt("uidlist validity"))?;
    let next_uid: u32 =
        next_uid.ok_or(Error::Corrupt("uidlist next-uid"))?;

    let mut entries = Vec::new();
    let mut prev_uid = 0u32;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let space =
            line.find(' ').ok_or(Error::Corrupt("uidlist record"))?;
        let uid: u32 = line[..space]
            .parse()
            .map_err(|_| Error::Corrupt("uidlist record uid"))?;
        if uid <= prev_uid || uid >= next_uid {
            return Err(Error::Corrupt("uidlist record order"));
        }
        prev_uid = uid;
        entries.push(UidlistEntry {
            uid,
            filename: line[space + 1..].to_owned(),
            flags: EntryFlags::empty(),
        });
    }
    Ok((uid_validity, next_uid, entries))
}
