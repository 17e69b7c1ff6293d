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

//! The sync orchestrator.
//!
//! One `sync` call reconciles the index with the directory. The fast
//! path compares the recorded directory mtimes and check times against
//! "now" within the clock-skew window and does nothing at all; the slow
//! path takes the uidlist dotlock, claims `new/` deliveries, scans
//! `cur/`, assigns UIDs, and commits the uidlist rewrite followed by an
//! index transaction.
//!
//! Two situations restart the pass, at most once, as a forced full
//! resync: files the scan observed vanishing before commit (renamed
//! away by another process), and duplicate entries caught mid-rename.
//! The restart reuses the same next-UID counter, so the settled files
//! receive exactly the UIDs the vanished ones would have.
//!
//! Lock acquisition failure does not block the mailbox: the pass
//! degrades to a lock-free read of the last committed state and reports
//! it as partial.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::index::cache::{CacheDecision, CacheFile, DecisionKind};
use crate::index::codec;
use crate::index::file::{IndexFile, MessageFlags, MessageRecord};
use crate::maildir::filename::Filename;
use crate::maildir::header::{MaildirIndexHeader, EXT_NAME};
use crate::maildir::scan;
use crate::maildir::uidlist::{LockMode, Uidlist};
use crate::support::clock::Clock;
use crate::support::config::MaildirConfig;
use crate::support::error::Error;

/// Cache field holding the `S=` size annotation of each message.
const SIZE_FIELD: &str = "size";

/// Region budget handed to a recovery purge of a corrupt cache.
const PURGE_MAX_BYTES: u32 = 1 << 20;

/// Hooks invoked at interesting points of a sync pass.
///
/// Production callers normally use [`NullCallbacks`]; tests substitute
/// counting or fault-injecting implementations.
pub trait SyncCallbacks {
    /// A full directory scan is starting.
    fn scan_started(&mut self) {}
    /// Periodic progress during a long scan.
    fn notify_progress(&mut self) {}
    /// The pass finished reconciling and is about to commit.
    fn pre_commit(&mut self) {}
    /// The uidlist lock could not be acquired; this pass is lock-free
    /// and partial.
    fn degraded(&mut self) {}
}

/// The production no-op callbacks.
pub struct NullCallbacks;
impl SyncCallbacks for NullCallbacks {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The quick check proved nothing changed; no scan was performed.
    NoChanges,
    /// The directory was scanned and the index now reflects it.
    ChangesApplied,
    /// The lock was unavailable; stale but consistent state was kept.
    Partial,
}

/// Retry budget for one `sync` call. A pass can request a restart only
/// while the budget holds an `Initial`; the second pass is always final.
#[derive(Clone, Copy, Debug)]
enum SyncAttempt {
    Initial,
    ForcedRetry,
}

enum PassResult {
    Done(SyncOutcome),
    Retry(&'static str),
}

/// An open Maildir mailbox: the directory pair plus its uidlist, index,
/// and cache files.
pub struct MaildirMailbox<'c> {
    root: PathBuf,
    config: MaildirConfig,
    clock: &'c dyn Clock,
    hostname: String,
    uidlist: Uidlist,
    index: IndexFile,
    cache: CacheFile,
}

impl<'c> MaildirMailbox<'c> {
    /// Open (creating if necessary) the mailbox rooted at `root`.
    pub fn open(
        root: impl Into<PathBuf>,
        config: MaildirConfig,
        clock: &'c dyn Clock,
    ) -> Result<Self, Error> {
        let root = root.into();
        for sub in &["new", "cur", "tmp"] {
            fs::create_dir_all(root.join(sub))?;
        }

        let tmp = root.join("tmp");
        let uidlist =
            Uidlist::open(root.join("mailstead-uidlist"), &tmp)?;
        let index = IndexFile::open(root.join("mailstead.index"), &tmp)?;
        let cache =
            CacheFile::open(root.join("mailstead.index.cache"), &tmp)?;

        Ok(MaildirMailbox {
            root,
            config,
            clock,
            hostname: own_hostname(),
            uidlist,
            index,
            cache,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &IndexFile {
        &self.index
    }

    pub fn uidlist(&self) -> &Uidlist {
        &self.uidlist
    }

    pub fn cache_mut(&mut self) -> &mut CacheFile {
        &mut self.cache
    }

    /// The cached `S=` size of a message, if one was recorded.
    pub fn cached_size(&mut self, uid: u32) -> Result<Option<u32>, Error> {
        let offset = match self.index.record_by_uid(uid) {
            Some((_, record)) => record.cache_offset,
            None => return Ok(None),
        };
        match self.cache.lookup_record(offset)? {
            Some(data) => {
                let mut cursor: &[u8] = &data;
                Ok(Some(codec::unpack_uint(&mut cursor)?))
            }
            None => Ok(None),
        }
    }

    /// Bring the index up to date with the directory.
    pub fn sync(
        &mut self,
        forced: bool,
        callbacks: &mut dyn SyncCallbacks,
    ) -> Result<SyncOutcome, Error> {
        let mut attempt = SyncAttempt::Initial;
        let mut forced = forced;
        loop {
            let is_retry = matches!(attempt, SyncAttempt::ForcedRetry);
            match self.sync_pass(forced, is_retry, callbacks)? {
                PassResult::Done(outcome) => return Ok(outcome),
                PassResult::Retry(why) => match attempt {
                    SyncAttempt::Initial => {
                        info!(
                            "{}: forcing full resync ({})",
                            self.root.display(),
                            why
                        );
                        attempt = SyncAttempt::ForcedRetry;
                        forced = true;
                    }
                    SyncAttempt::ForcedRetry => {
                        // Still racing; the next sync call will settle it.
                        warn!(
                            "{}: directory still changing after forced \
                             resync ({})",
                            self.root.display(),
                            why
                        );
                        return Ok(SyncOutcome::ChangesApplied);
                    }
                },
            }
        }
    }

    fn sync_pass(
        &mut self,
        forced: bool,
        is_retry: bool,
        callbacks: &mut dyn SyncCallbacks,
    ) -> Result<PassResult, Error> {
        self.index.refresh()?;
        self.uidlist.refresh()?;

        let cur = self.root.join("cur");
        let new = self.root.join("new");

        let recorded = MaildirIndexHeader::decode(
            self.index.get_header_ext(EXT_NAME),
        );
        if !forced
            && !self.config.very_dirty_syncs
            && !recorded.is_never_synced()
            && self.dirs_unchanged(&recorded, &new, &cur)
        {
            return Ok(PassResult::Done(SyncOutcome::NoChanges));
        }

        let lock = match self.uidlist.acquire_lock(
            LockMode::Timeout,
            &self.config,
            self.clock,
        )? {
            Some(lock) => lock,
            None if is_retry => return Err(Error::LockTimeout),
            None => {
                warn!(
                    "{}: uidlist lock unavailable; partial lock-free sync",
                    self.root.display()
                );
                callbacks.degraded();
                return Ok(PassResult::Done(SyncOutcome::Partial));
            }
        };

        // Another process may have rewritten the uidlist while we waited.
        self.uidlist.refresh()?;
        self.uidlist.catch_up_next_uid(self.index.header().next_uid);

        let uid_validity = if 0 != self.uidlist.uid_validity {
            self.uidlist.uid_validity
        } else if 0 != self.index.header().uid_validity {
            self.index.header().uid_validity
        } else {
            (self.clock.now() as u32).max(1)
        };
        self.uidlist.uid_validity = uid_validity;

        scan::move_new_to_cur(&new, &cur, &self.config)?;
        let new_st = nix::sys::stat::stat(&new)?;

        // Snapshot what the transaction staging will need before the
        // scan session and the transaction take their borrows.
        let index_validity = self.index.header().uid_validity;
        let index_last_uid =
            self.index.records().last().map(|r| r.uid).unwrap_or(0);

        callbacks.scan_started();
        let mut session = self.uidlist.begin_sync();
        let scan = scan::scan_cur(
            &cur,
            &mut session,
            &self.config,
            self.clock,
            callbacks,
            Some(&lock),
            &self.hostname,
        )?;

        let assigned = session.finish().to_vec();
        let known = session.known_files().to_vec();
        let unseen = session.unseen();

        callbacks.pre_commit();

        // Files that vanished between the scan and here were renamed
        // away by a concurrent actor. Roll everything back and rescan;
        // the untouched next-UID counter makes the retry hand out the
        // very UIDs this pass would have.
        if assigned
            .iter()
            .any(|e| !cur.join(&e.filename).exists())
        {
            return Ok(PassResult::Retry("lost files"));
        }

        let expunged_uids: Vec<u32> =
            unseen.iter().map(|e| e.uid).collect();

        // The uidlist is authoritative and goes first. If the index
        // commit below fails, the next sync re-derives it from here.
        session.commit(&expunged_uids)?;

        // Index records whose UIDs the uidlist no longer vouches for
        // force a rebuild from scratch.
        let mut missing_known: Vec<(u32, String)> = known
            .iter()
            .filter(|(uid, _)| self.index.record_by_uid(*uid).is_none())
            .cloned()
            .collect();
        let rebuild = (index_validity != 0
            && index_validity != uid_validity)
            || missing_known
                .iter()
                .any(|&(uid, _)| uid <= index_last_uid);

        let mut changed = !assigned.is_empty() || !expunged_uids.is_empty();

        let mut appends: Vec<(u32, String)> = Vec::new();
        if rebuild {
            appends.extend(known.iter().cloned());
        } else {
            appends.append(&mut missing_known);
        }
        appends.extend(
            assigned.iter().map(|e| (e.uid, e.filename.clone())),
        );
        appends.sort_by_key(|&(uid, _)| uid);

        // Cache the size annotations of the messages being added.
        let now = self.clock.now();
        let mut cache_offsets: Vec<u32> = Vec::new();
        for (_, name) in &appends {
            cache_offsets.push(self.record_size_annotation(name, now)?);
        }
        self.cache.flush_header_if_dirty()?;

        let mut flag_updates: Vec<(u32, MessageFlags)> = Vec::new();
        if !rebuild {
            for (uid, name) in &known {
                if let Some((seq, record)) =
                    self.index.record_by_uid(*uid)
                {
                    let flags = Filename::parse(name).flags();
                    if flags != record.flags {
                        flag_updates.push((seq, flags));
                    }
                }
            }
        }
        changed = changed || !flag_updates.is_empty() || rebuild;

        let header = MaildirIndexHeader {
            new_check_time: now as u32,
            new_mtime: new_st.st_mtime as u32,
            new_mtime_nsecs: new_st.st_mtime_nsec as u32,
            cur_check_time: now as u32,
            cur_mtime: scan.mtime as u32,
            cur_mtime_nsecs: scan.mtime_nsecs,
        };

        let mut txn = self.index.begin_transaction();
        if rebuild {
            txn.reset(uid_validity);
        } else {
            txn.set_uid_validity(uid_validity);
            for &uid in &expunged_uids {
                txn.expunge_uid(uid);
            }
            for &(seq, flags) in &flag_updates {
                txn.update_flags(seq, flags);
            }
        }
        for ((uid, name), offset) in appends.iter().zip(&cache_offsets) {
            txn.append(MessageRecord {
                uid: *uid,
                flags: Filename::parse(name).flags(),
                cache_offset: *offset,
            });
        }
        txn.set_header_ext(EXT_NAME, header.encode());
        txn.commit()?;

        self.cache.expunge_count(expunged_uids.len() as u32);
        self.cache.flush_header_if_dirty()?;
        drop(lock);

        if scan.racing {
            return Ok(PassResult::Retry("rename race"));
        }
        Ok(PassResult::Done(if changed {
            SyncOutcome::ChangesApplied
        } else {
            SyncOutcome::NoChanges
        }))
    }

    fn dirs_unchanged(
        &self,
        recorded: &MaildirIndexHeader,
        new: &Path,
        cur: &Path,
    ) -> bool {
        let now = self.clock.now();
        let unchanged = |path: &Path, mtime: u32, nsecs: u32, check: u32| {
            match nix::sys::stat::stat(path) {
                Ok(st) => {
                    st.st_mtime == i64::from(mtime)
                        && st.st_mtime_nsec == i64::from(nsecs)
                        && i64::from(check) - st.st_mtime
                            > i64::from(self.config.sync_secs)
                        && now >= i64::from(check)
                }
                Err(_) => false,
            }
        };
        unchanged(
            new,
            recorded.new_mtime,
            recorded.new_mtime_nsecs,
            recorded.new_check_time,
        ) && unchanged(
            cur,
            recorded.cur_mtime,
            recorded.cur_mtime_nsecs,
            recorded.cur_check_time,
        )
    }

    /// Store the `S=` annotation of `name` in the cache, returning the
    /// record offset (0 when there is nothing to cache or the cache is
    /// out of commission).
    fn record_size_annotation(
        &mut self,
        name: &str,
        now: i64,
    ) -> Result<u32, Error> {
        let size = match Filename::parse(name).size() {
            Some(size) if size <= u64::from(u32::MAX) => size as u32,
            _ => return Ok(0),
        };

        if !self.cache.is_usable() {
            // Recovery path: a purge rebuilds the corrupt cache empty.
            self.cache.purge(&[], PURGE_MAX_BYTES, "unusable header")?;
        }

        let ix = self.cache.add_field(
            SIZE_FIELD,
            CacheDecision::of(DecisionKind::Temp),
        )?;
        self.cache.update_decision(
            ix,
            CacheDecision::of(DecisionKind::Temp),
            now as u32,
        );

        let mut data = Vec::with_capacity(5);
        codec::pack_uint(&mut data, size);
        self.cache.append_record(&data)
    }
}

fn own_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::support::clock::{FixedClock, SystemClock};

    fn wall_now() -> i64 {
        SystemClock.now()
    }

    /// Counts scans and optionally injects a fault before commit.
    #[derive(Default)]
    struct TestCallbacks {
        scans: u32,
        degraded: u32,
        on_pre_commit: Option<Box<dyn FnMut()>>,
    }

    impl SyncCallbacks for TestCallbacks {
        fn scan_started(&mut self) {
            self.scans += 1;
        }

        fn degraded(&mut self) {
            self.degraded += 1;
        }

        fn pre_commit(&mut self) {
            if let Some(hook) = self.on_pre_commit.as_mut() {
                hook();
            }
        }
    }

    fn add_cur(root: &Path, name: &str, content: &[u8]) {
        fs::write(root.join("cur").join(name), content).unwrap();
    }

    #[test]
    fn own_hostname_yields_something() {
        assert!(!own_hostname().is_empty());
    }

    #[test]
    fn first_sync_assigns_uids_then_short_circuits() {
        let root = tempfile::TempDir::new().unwrap();
        // Far enough ahead of the file mtimes that the dirty window
        // does not keep forcing scans.
        let clock = FixedClock::at(wall_now() + 100);
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        add_cur(root.path(), "1234.V800.host:2,S=100", b"x");

        let mut cb = TestCallbacks::default();
        assert_eq!(
            SyncOutcome::ChangesApplied,
            mailbox.sync(false, &mut cb).unwrap()
        );
        assert_eq!(1, cb.scans);
        assert_eq!(1, mailbox.index().message_count());

        let (seq, record) = mailbox.index().record_by_uid(1).unwrap();
        assert_eq!(1, seq);
        assert_eq!(MessageFlags::empty(), record.flags);
        assert_eq!(Some(100), mailbox.cached_size(1).unwrap());

        let validity = mailbox.index().header().uid_validity;
        assert_ne!(0, validity);
        assert_eq!(validity, mailbox.uidlist().uid_validity);

        // Nothing changed: the quick check short-circuits, no scan
        assert_eq!(
            SyncOutcome::NoChanges,
            mailbox.sync(false, &mut cb).unwrap()
        );
        assert_eq!(1, cb.scans);
        assert_eq!(1, mailbox.index().message_count());
    }

    #[test]
    fn dirty_window_keeps_scanning_until_mtimes_settle() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now());
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        add_cur(root.path(), "m1.host:2,", b"x");

        let mut cb = TestCallbacks::default();
        mailbox.sync(false, &mut cb).unwrap();
        assert_eq!(1, cb.scans);

        // The recorded check time is within the skew window of the
        // directory mtime, so the directory cannot be trusted yet.
        mailbox.sync(false, &mut cb).unwrap();
        assert_eq!(2, cb.scans);

        // Once a check happens safely past the mtime, syncs settle.
        clock.advance(100);
        mailbox.sync(false, &mut cb).unwrap();
        assert_eq!(3, cb.scans);
        assert_eq!(
            SyncOutcome::NoChanges,
            mailbox.sync(false, &mut cb).unwrap()
        );
        assert_eq!(3, cb.scans);
    }

    #[test]
    fn sub_second_change_defeats_the_short_circuit() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        add_cur(root.path(), "m1.host:2,", b"x");

        let mut cb = TestCallbacks::default();
        mailbox.sync(false, &mut cb).unwrap();
        assert_eq!(1, cb.scans);

        // A delivery whose directory update lands in the very second
        // the header recorded, differing only in the nanosecond part.
        add_cur(root.path(), "m2.host:2,", b"y");
        let recorded = MaildirIndexHeader::decode(
            mailbox.index().get_header_ext(EXT_NAME),
        );
        let nsec = if 0 == recorded.cur_mtime_nsecs {
            1
        } else {
            recorded.cur_mtime_nsecs - 1
        };
        let ts = nix::sys::time::TimeSpec::from(nix::libc::timespec {
            tv_sec: i64::from(recorded.cur_mtime) as nix::libc::time_t,
            tv_nsec: i64::from(nsec) as nix::libc::c_long,
        });
        nix::sys::stat::utimensat(
            None,
            &root.path().join("cur"),
            &ts,
            &ts,
            nix::sys::stat::UtimensatFlags::FollowSymlink,
        )
        .unwrap();

        assert_eq!(
            SyncOutcome::ChangesApplied,
            mailbox.sync(false, &mut cb).unwrap()
        );
        assert_eq!(2, cb.scans);
        assert_eq!(2, mailbox.index().message_count());
    }

    #[test]
    fn very_dirty_syncs_disables_the_short_circuit() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let config = MaildirConfig {
            very_dirty_syncs: true,
            ..MaildirConfig::default()
        };
        let mut mailbox =
            MaildirMailbox::open(root.path(), config, &clock).unwrap();
        add_cur(root.path(), "m1.host:2,", b"x");

        let mut cb = TestCallbacks::default();
        mailbox.sync(false, &mut cb).unwrap();
        clock.advance(100);
        mailbox.sync(false, &mut cb).unwrap();
        assert_eq!(2, cb.scans);
    }

    #[test]
    fn delivery_in_new_is_claimed_into_cur() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        fs::write(root.path().join("new/d1.host"), b"x").unwrap();

        mailbox.sync(false, &mut NullCallbacks).unwrap();
        assert!(root.path().join("cur/d1.host:2,").exists());
        assert_eq!(
            Some("d1.host:2,"),
            mailbox.uidlist().filename_of_uid(1)
        );
    }

    #[test]
    fn flag_rename_updates_index_and_uidlist() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        add_cur(root.path(), "m1.host:2,", b"x");
        mailbox.sync(false, &mut NullCallbacks).unwrap();

        fs::rename(
            root.path().join("cur/m1.host:2,"),
            root.path().join("cur/m1.host:2,RS"),
        )
        .unwrap();
        clock.advance(100);
        // The test clock runs ahead of the real filesystem clock, so
        // surface the rename the way a remote writer would: a directory
        // mtime the recorded header has not seen.
        crate::support::file_ops::bump_mtime_past(
            root.path().join("cur"),
            clock.now(),
        )
        .unwrap();

        assert_eq!(
            SyncOutcome::ChangesApplied,
            mailbox.sync(false, &mut NullCallbacks).unwrap()
        );
        let (_, record) = mailbox.index().record_by_uid(1).unwrap();
        assert_eq!(
            MessageFlags::REPLIED | MessageFlags::SEEN,
            record.flags
        );
        assert_eq!(
            Some("m1.host:2,RS"),
            mailbox.uidlist().filename_of_uid(1)
        );
    }

    #[test]
    fn deleted_file_is_expunged_without_uid_reuse() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        add_cur(root.path(), "m1.host:2,S=5", b"x");
        add_cur(root.path(), "m2.host:2,", b"y");
        mailbox.sync(false, &mut NullCallbacks).unwrap();
        assert_eq!(2, mailbox.index().message_count());

        fs::remove_file(root.path().join("cur/m1.host:2,S=5")).unwrap();
        clock.advance(100);
        crate::support::file_ops::bump_mtime_past(
            root.path().join("cur"),
            clock.now(),
        )
        .unwrap();
        mailbox.sync(false, &mut NullCallbacks).unwrap();

        assert_eq!(1, mailbox.index().message_count());
        assert_eq!(None, mailbox.index().record_by_uid(1));
        assert_eq!(1, mailbox.cache_mut().deleted_record_count());

        // The freed UID is never handed out again
        add_cur(root.path(), "m3.host:2,", b"z");
        clock.advance(100);
        mailbox.sync(false, &mut NullCallbacks).unwrap();
        assert_eq!(
            3,
            mailbox.index().record_by_uid(3).map(|(_, r)| r.uid).unwrap()
        );
    }

    #[test]
    fn lost_file_forces_one_resync_with_the_same_uid() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        add_cur(root.path(), "aaaa.host:2,S=7", b"body");

        // A concurrent actor renames the file after the scan has
        // observed it but before the commit.
        let cur = root.path().join("cur");
        let mut renamed = false;
        let mut cb = TestCallbacks {
            on_pre_commit: Some(Box::new(move || {
                if !renamed {
                    renamed = true;
                    fs::rename(
                        cur.join("aaaa.host:2,S=7"),
                        cur.join("zzzz.host:2,S=7"),
                    )
                    .unwrap();
                }
            })),
            ..TestCallbacks::default()
        };

        assert_eq!(
            SyncOutcome::ChangesApplied,
            mailbox.sync(false, &mut cb).unwrap()
        );
        // Both passes scanned
        assert_eq!(2, cb.scans);

        // The settled file holds the UID the lost one would have taken;
        // nothing was skipped or duplicated.
        assert_eq!(1, mailbox.index().message_count());
        assert_eq!(
            Some("zzzz.host:2,S=7"),
            mailbox.uidlist().filename_of_uid(1)
        );
        assert_eq!(2, mailbox.uidlist().next_uid);
        assert_eq!(Some(7), mailbox.cached_size(1).unwrap());
    }

    #[test]
    fn contended_lock_degrades_to_partial_sync() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let config = MaildirConfig {
            lock_timeout_secs: 0,
            ..MaildirConfig::default()
        };
        let mut mailbox =
            MaildirMailbox::open(root.path(), config, &clock).unwrap();
        add_cur(root.path(), "m1.host:2,", b"x");

        // Another process holds the dotlock, freshly touched
        fs::write(root.path().join("mailstead-uidlist.lock"), b"")
            .unwrap();

        let mut cb = TestCallbacks::default();
        assert_eq!(
            SyncOutcome::Partial,
            mailbox.sync(false, &mut cb).unwrap()
        );
        assert_eq!(1, cb.degraded);
        assert_eq!(0, cb.scans);
        assert_eq!(0, mailbox.index().message_count());

        // Lock released: the next sync catches up fully
        fs::remove_file(root.path().join("mailstead-uidlist.lock"))
            .unwrap();
        assert_eq!(
            SyncOutcome::ChangesApplied,
            mailbox.sync(false, &mut cb).unwrap()
        );
        assert_eq!(1, mailbox.index().message_count());
    }

    #[test]
    fn forced_sync_rescans_despite_clean_mtimes() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        add_cur(root.path(), "m1.host:2,", b"x");

        let mut cb = TestCallbacks::default();
        mailbox.sync(false, &mut cb).unwrap();
        assert_eq!(
            SyncOutcome::NoChanges,
            mailbox.sync(false, &mut cb).unwrap()
        );
        assert_eq!(1, cb.scans);

        mailbox.sync(true, &mut cb).unwrap();
        assert_eq!(2, cb.scans);
    }

    #[test]
    fn lost_index_is_rebuilt_from_the_uidlist() {
        let root = tempfile::TempDir::new().unwrap();
        let clock = FixedClock::at(wall_now() + 100);
        let mut mailbox = MaildirMailbox::open(
            root.path(),
            MaildirConfig::default(),
            &clock,
        )
        .unwrap();
        add_cur(root.path(), "m1.host:2,", b"x");
        add_cur(root.path(), "m2.host:2,S", b"y");
        mailbox.sync(false, &mut NullCallbacks).unwrap();
        let validity = mailbox.index().header().uid_validity;

        fs::remove_file(root.path().join("mailstead.index")).unwrap();
        clock.advance(100);
        mailbox.sync(true, &mut NullCallbacks).unwrap();

        assert_eq!(2, mailbox.index().message_count());
        assert_eq!(validity, mailbox.index().header().uid_validity);
        assert_eq!(
            MessageFlags::SEEN,
            mailbox.index().record_by_uid(2).unwrap().1.flags
        );
    }
}
