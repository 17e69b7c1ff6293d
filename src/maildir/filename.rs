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

//! The Maildir filename grammar.
//!
//! A message filename has three parts:
//!
//! ```text
//! <base>[,<letter>=<value>...][:2,<flag letters>[,<letter>=<value>...]]
//! ```
//!
//! The base is the message's identity, generated once at delivery and
//! stable for the message's whole life. Flag letters after `:2,` change
//! as the message is marked seen, replied, and so on. Annotation tokens
//! of the form `<letter>=<value>` (`S=` for on-disk size, `W=` for
//! virtual size, anything else unrecognized) may appear either glued to
//! the base or inside the info suffix; they are preserved verbatim, in
//! order, wherever they came from, so that size-dependent consumers keep
//! working after a file is renamed during duplicate repair.
//!
//! Filenames that do not follow the grammar are still accepted; the
//! whole name becomes the base with no flags. A Maildir must tolerate
//! foreign files rather than choke on them.

use std::fmt::Write as _;

use rand::{rngs::OsRng, Rng};

use crate::index::file::MessageFlags;

/// The parsed form of a Maildir filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filename {
    base: String,
    flags: MessageFlags,
    annotations: Vec<String>,
}

impl Filename {
    /// Parse a directory entry name. Never fails.
    pub fn parse(name: &str) -> Self {
        let (head, info) = match name.find(':') {
            Some(ix) => (&name[..ix], Some(&name[ix + 1..])),
            None => (name, None),
        };

        let mut annotations = Vec::new();
        let mut base = String::new();
        for (ix, segment) in head.split(',').enumerate() {
            if 0 != ix && is_annotation(segment) {
                annotations.push(segment.to_owned());
            } else {
                if 0 != ix {
                    base.push(',');
                }
                base.push_str(segment);
            }
        }

        let mut flags = MessageFlags::empty();
        if let Some(info) = info {
            if let Some(rest) = info.strip_prefix("2,") {
                for segment in rest.split(',') {
                    if is_annotation(segment) {
                        annotations.push(segment.to_owned());
                    } else {
                        flags |= flags_from_letters(segment);
                    }
                }
            }
            // Unknown info versions are ignored; the base still matched.
        }

        Filename {
            base,
            flags,
            annotations,
        }
    }

    /// The stable identity portion, used for uidlist matching.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    /// The `S=` on-disk size annotation, if present and well-formed.
    pub fn size(&self) -> Option<u64> {
        self.annotation_value('S')
    }

    /// The `W=` virtual (CRLF) size annotation.
    pub fn virtual_size(&self) -> Option<u64> {
        self.annotation_value('W')
    }

    fn annotation_value(&self, letter: char) -> Option<u64> {
        self.annotations
            .iter()
            .find(|a| a.starts_with(letter) && a[1..].starts_with('='))
            .and_then(|a| a[2..].parse().ok())
    }

    /// Render the canonical `cur/` form: annotations glued to the base,
    /// then `:2,` and the flag letters in ASCII order.
    pub fn to_cur_name(&self) -> String {
        let mut name = self.base.clone();
        for annotation in &self.annotations {
            name.push(',');
            name.push_str(annotation);
        }
        name.push_str(":2,");
        name.push_str(&flags_to_letters(self.flags));
        name
    }

    /// Build a repair name for a duplicate: a fresh base, this file's
    /// annotations and flags carried over.
    pub fn regenerate(&self, now: i64, hostname: &str) -> Filename {
        Filename {
            base: generate_base(now, hostname),
            flags: self.flags,
            annotations: self.annotations.clone(),
        }
    }
}

fn is_annotation(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some('=')) if letter.is_ascii_alphabetic()
    )
}

fn flags_from_letters(letters: &str) -> MessageFlags {
    let mut flags = MessageFlags::empty();
    for letter in letters.chars() {
        flags |= match letter {
            'P' => MessageFlags::PASSED,
            'R' => MessageFlags::REPLIED,
            'S' => MessageFlags::SEEN,
            'T' => MessageFlags::TRASHED,
            'D' => MessageFlags::DRAFT,
            'F' => MessageFlags::FLAGGED,
            _ => MessageFlags::empty(),
        };
    }
    flags
}

pub fn flags_to_letters(flags: MessageFlags) -> String {
    // Maildir requires ASCII order
    let mut letters = String::new();
    if flags.contains(MessageFlags::DRAFT) {
        letters.push('D');
    }
    if flags.contains(MessageFlags::FLAGGED) {
        letters.push('F');
    }
    if flags.contains(MessageFlags::PASSED) {
        letters.push('P');
    }
    if flags.contains(MessageFlags::REPLIED) {
        letters.push('R');
    }
    if flags.contains(MessageFlags::SEEN) {
        letters.push('S');
    }
    if flags.contains(MessageFlags::TRASHED) {
        letters.push('T');
    }
    letters
}

/// Generate a fresh, unique base name.
///
/// The format is `<secs>.M<usec>P<pid>R<rand>.<host>`: wall time plus
/// enough per-process and random entropy that two deliveries on any pair
/// of cooperating hosts cannot collide.
pub fn generate_base(now: i64, hostname: &str) -> String {
    let mut base = String::with_capacity(48);
    let _ = write!(
        base,
        "{}.M{}P{}R{:x}.{}",
        now,
        OsRng.gen_range(0u32, 1_000_000),
        nix::unistd::getpid(),
        OsRng.gen::<u32>(),
        sanitize_host(hostname),
    );
    base
}

/// Hostnames land inside filenames, so the structural characters must
/// not pass through.
fn sanitize_host(hostname: &str) -> String {
    hostname
        .chars()
        .map(|c| match c {
            '/' | ':' | ',' | '.' => '_',
            c => c,
        })
        .collect()
}
