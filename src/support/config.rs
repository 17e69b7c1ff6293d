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

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Tunables for Maildir synchronization.
///
/// The defaults match the behaviour of mature Maildir servers and are
/// appropriate for NTP-synchronized hosts. All of these are policy knobs,
/// not correctness requirements; the sync algorithm must stay consistent
/// for any values.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MaildirConfig {
    /// Maximum assumed clock drift, in seconds, between all hosts
    /// accessing the mailbox (e.g. over NFS). A directory whose mtime is
    /// within this window of the last check cannot be trusted to have
    /// been fully observed and will be rescanned once the window passes.
    pub sync_secs: u32,

    /// Treat the mailbox as so heavily shared that the mtime-based
    /// short-circuit is never trusted; every sync scans `cur/`.
    pub very_dirty_syncs: bool,

    /// Emit a warning when a single `cur/` scan takes at least this many
    /// seconds, to surface pathological filesystems.
    pub scan_warn_secs: u32,

    /// A duplicate directory entry that is a hard link of a known file is
    /// only unlinked once its ctime has been stable for this long;
    /// younger duplicates are assumed to be a rename caught mid-flight.
    /// Heuristic only — correctness never depends on this value.
    pub dupe_links_delete_secs: i64,

    /// How long a blocking uidlist lock acquisition may poll before
    /// giving up and degrading to a lock-free partial sync.
    pub lock_timeout_secs: u32,

    /// A uidlist lock file older than this is considered abandoned by a
    /// dead process and is overridden.
    pub lock_stale_secs: i64,

    /// How many times a transient ENOENT on the mailbox directories is
    /// retried before the mailbox is reported as removed.
    pub delete_retry_count: u32,

    /// Refresh the lock file mtime at this interval during long scans so
    /// other processes do not steal a legitimately held lock.
    pub lock_touch_secs: i64,

    /// Invoke the caller's progress callback at this interval during long
    /// scans.
    pub notify_interval_secs: i64,
}

impl Default for MaildirConfig {
    fn default() -> Self {
        MaildirConfig {
            sync_secs: 1,
            very_dirty_syncs: false,
            scan_warn_secs: 60,
            dupe_links_delete_secs: 30,
            lock_timeout_secs: 120,
            lock_stale_secs: 120,
            delete_retry_count: 10,
            lock_touch_secs: 10,
            notify_interval_secs: 10,
        }
    }
}

impl MaildirConfig {
    /// Load the configuration from a TOML file.
    ///
    /// A missing file yields the defaults; a present but malformed file
    /// is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if std::io::ErrorKind::NotFound == e.kind() => {
                return Ok(MaildirConfig::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let root = tempfile::TempDir::new().unwrap();
        let config = MaildirConfig::load(root.path().join("nx.toml")).unwrap();
        assert_eq!(1, config.sync_secs);
        assert!(!config.very_dirty_syncs);
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let root = tempfile::TempDir::new().unwrap();
        let path = root.path().join("maildir.toml");
        fs::write(&path, "sync_secs = 5\nvery_dirty_syncs = true\n").unwrap();

        let config = MaildirConfig::load(&path).unwrap();
        assert_eq!(5, config.sync_secs);
        assert!(config.very_dirty_syncs);
        // untouched default
        assert_eq!(30, config.dupe_links_delete_secs);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let root = tempfile::TempDir::new().unwrap();
        let path = root.path().join("maildir.toml");
        fs::write(&path, "sync_secs = \"not a number\"").unwrap();
        assert!(MaildirConfig::load(&path).is_err());
    }
}
