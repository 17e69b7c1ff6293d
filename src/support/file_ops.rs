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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::libc;
use nix::sys::stat::UtimensatFlags;
use nix::sys::time::TimeSpec;

use crate::support::error::Error;

/// Write `data` into the file at `path`, atomically.
///
/// The file is first staged within `tmp` and moved into place with a
/// rename, so readers either see the old content or the new content in
/// full, never a partial write.
///
/// If `overwrite` is true, this will replace anything already at `path`.
/// If false, the call fails if `path` already exists.
pub fn spit(
    tmp: impl AsRef<Path>,
    path: impl AsRef<Path>,
    overwrite: bool,
    mode: u32,
    data: &[u8],
) -> io::Result<()> {
    let mut tf = tempfile::NamedTempFile::new_in(tmp)?;
    tf.as_file_mut().write_all(data)?;
    chmod(tf.path(), mode)?;
    tf.as_file_mut().sync_all()?;
    if overwrite {
        tf.persist(path)?;
    } else {
        tf.persist_noclobber(path)?;
    }
    Ok(())
}

pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Ensure the mtime of `path` is strictly greater than `min`.
///
/// Readers of the uidlist detect rewrites by watching for a growing mtime
/// (inode numbers can be reused, so they are not sufficient). When a
/// rewrite lands within the same second as the previous one, the mtime
/// must be bumped artificially.
pub fn bump_mtime_past(path: impl AsRef<Path>, min: i64) -> Result<(), Error> {
    let path = path.as_ref();
    let st = nix::sys::stat::stat(path)?;
    if st.st_mtime > min {
        return Ok(());
    }

    let ts = TimeSpec::from(libc::timespec {
        tv_sec: (min + 1) as libc::time_t,
        tv_nsec: 0,
    });
    nix::sys::stat::utimensat(
        None,
        path,
        &ts,
        &ts,
        UtimensatFlags::FollowSymlink,
    )?;
    Ok(())
}

pub trait IgnoreKinds {
    fn ignore_already_exists(self) -> Self;
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_already_exists(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => {
                Ok(R::default())
            }
            Err(e) => Err(e),
        }
    }

    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn spit_is_atomic_replace() {
        let root = tempfile::TempDir::new().unwrap();
        let path = root.path().join("f");

        spit(root.path(), &path, false, 0o600, b"first").unwrap();
        assert_eq!(b"first".to_vec(), fs::read(&path).unwrap());

        // noclobber refuses to replace
        assert!(spit(root.path(), &path, false, 0o600, b"second").is_err());
        assert_eq!(b"first".to_vec(), fs::read(&path).unwrap());

        spit(root.path(), &path, true, 0o600, b"second").unwrap();
        assert_eq!(b"second".to_vec(), fs::read(&path).unwrap());
    }

    #[test]
    fn bump_mtime_moves_forward() {
        let root = tempfile::TempDir::new().unwrap();
        let path = root.path().join("f");
        fs::write(&path, b"x").unwrap();

        let now = nix::sys::stat::stat(&path).unwrap().st_mtime;
        bump_mtime_past(&path, now + 10).unwrap();
        assert_eq!(now + 11, nix::sys::stat::stat(&path).unwrap().st_mtime);

        // Already past the floor, nothing to do
        bump_mtime_past(&path, now).unwrap();
        assert_eq!(now + 11, nix::sys::stat::stat(&path).unwrap().st_mtime);
    }
}
