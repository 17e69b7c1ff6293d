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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The mailbox directory disappeared and stayed gone for longer than
    /// the bounded delete-recreate retry budget allows.
    #[error("Mailbox removed while syncing")]
    MailboxRemoved,
    /// The uidlist dotlock could not be acquired within the timeout and no
    /// lock-free fallback was permitted.
    #[error("Timed out waiting for the uidlist lock")]
    LockTimeout,
    /// The cache file failed verification and is unusable until purged.
    #[error("Cache file is unusable; purge to rebuild")]
    CacheUnusable,
    /// A persisted structure failed validation while being decoded.
    #[error("Corrupt {0}")]
    Corrupt(&'static str),
    /// A caching decision string other than "no", "temp", or "yes" was
    /// supplied. This is a usage error, not a storage error.
    #[error("Invalid cache decision '{0}'")]
    BadDecision(String),
    #[error(transparent)]
    Decode(#[from] crate::index::codec::DecodeError),
    #[error(transparent)]
    ConfigSyntax(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
}
