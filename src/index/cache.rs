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

//! The extensible per-field message cache file.
//!
//! The cache stores, per message, variable-length blobs for a set of
//! independently-decided fields (for example `imap.bodystructure`). Each
//! field carries a caching decision — `no`, `temp`, or `yes`, optionally
//! forced by an administrator — that controls whether the field is worth
//! persisting at all, bounding cache growth for rarely-accessed fields.
//!
//! The file is a reserved header area followed by an append-only record
//! region. Record offsets are relative to the start of the record region
//! and are always multiples of 4 so they can be carried in index records
//! as offset markers (see [`crate::index::codec`]); offset 0 is never
//! allocated and means "no cache entry".
//!
//! Corruption never propagates: a cache that fails verification is marked
//! unusable and every subsequent access reports that state until the
//! cache is purged and rebuilt.

use std::convert::TryFrom;
use std::fmt;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};

use crate::index::codec;
use crate::support::error::Error;
use crate::support::file_ops;

const CACHE_MAGIC: &[u8; 4] = b"MSCH";
const CACHE_VERSION: u32 = 1;
/// Default size of the reserved header area. The area grows in
/// `HEADER_AREA_STEP` increments when the field table outgrows it.
const HEADER_AREA_DEFAULT: u32 = 1024;
const HEADER_AREA_STEP: u32 = 1024;
/// First allocatable record offset; 0 is reserved to mean "absent".
const FIRST_RECORD_OFFSET: u32 = 4;
/// Record offsets must stay encodable as offset markers.
const MAX_RECORD_REGION: u32 = 1 << 30;

/// The caching policy for one field, without the forced modifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DecisionKind {
    /// Never cache this field.
    No,
    /// Cache until the next purge.
    Temp,
    /// Cache permanently.
    Yes,
}

impl FromStr for DecisionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "no" => Ok(DecisionKind::No),
            "temp" => Ok(DecisionKind::Temp),
            "yes" => Ok(DecisionKind::Yes),
            _ => Err(Error::BadDecision(s.to_owned())),
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            DecisionKind::No => "no",
            DecisionKind::Temp => "temp",
            DecisionKind::Yes => "yes",
        })
    }
}

/// A caching decision: the policy kind plus whether an administrator has
/// pinned it against automatic changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheDecision {
    pub kind: DecisionKind,
    pub forced: bool,
}

impl CacheDecision {
    pub fn of(kind: DecisionKind) -> Self {
        CacheDecision {
            kind,
            forced: false,
        }
    }

    pub fn forced(kind: DecisionKind) -> Self {
        CacheDecision { kind, forced: true }
    }

    fn to_byte(self) -> u8 {
        let kind = match self.kind {
            DecisionKind::No => 0,
            DecisionKind::Temp => 1,
            DecisionKind::Yes => 2,
        };
        if self.forced {
            kind | 0x80
        } else {
            kind
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        let kind = match byte & 0x7f {
            0 => DecisionKind::No,
            1 => DecisionKind::Temp,
            2 => DecisionKind::Yes,
            _ => return None,
        };
        Some(CacheDecision {
            kind,
            forced: 0 != byte & 0x80,
        })
    }
}

/// One named, independently-decided cache column.
#[derive(Clone, Debug)]
pub struct CacheField {
    pub name: String,
    pub decision: CacheDecision,
    /// Unix time the field was last read through the cache.
    pub last_used: u32,
}

/// The open cache file.
pub struct CacheFile {
    path: PathBuf,
    tmp_dir: PathBuf,
    file: fs::File,
    area_size: u32,
    unusable: bool,
    header_dirty: bool,
    deleted_record_count: u32,
    /// Bytes allocated in the record region, including the reserved
    /// leading 4 bytes once any record exists.
    used_region_size: u32,
    fields: Vec<CacheField>,
}

impl CacheFile {
    /// Open the cache file, creating a fresh one if it does not exist,
    /// and verify its header.
    ///
    /// Header corruption does not fail the open; the cache comes back
    /// marked unusable so the caller can decide to purge and rebuild.
    pub fn open(
        path: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
    ) -> Result<Self, Error> {
        let path = path.into();
        let tmp_dir = tmp_dir.into();

        if !path.exists() {
            let mut header =
                encode_header(HEADER_AREA_DEFAULT, 0, 0, &[]);
            header.resize(HEADER_AREA_DEFAULT as usize, 0);
            file_ops::spit(&tmp_dir, &path, false, 0o600, &header)?;
        }

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)?;

        let mut this = CacheFile {
            path,
            tmp_dir,
            file,
            area_size: HEADER_AREA_DEFAULT,
            unusable: false,
            header_dirty: false,
            deleted_record_count: 0,
            used_region_size: 0,
            fields: Vec::new(),
        };
        if let Err(e) = this.load_header() {
            warn!(
                "{}: cache header unusable: {}",
                this.path.display(),
                e
            );
            this.unusable = true;
        }
        Ok(this)
    }

    pub fn is_usable(&self) -> bool {
        !self.unusable
    }

    fn require_usable(&self) -> Result<(), Error> {
        if self.unusable {
            Err(Error::CacheUnusable)
        } else {
            Ok(())
        }
    }

    fn load_header(&mut self) -> Result<(), Error> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut prefix = [0u8; 8];
        self.file.read_exact(&mut prefix).map_err(|e| {
            if io::ErrorKind::UnexpectedEof == e.kind() {
                Error::Corrupt("cache header")
            } else {
                e.into()
            }
        })?;

        if CACHE_MAGIC != &prefix[..4] {
            return Err(Error::Corrupt("cache magic"));
        }
        let area_size = LittleEndian::read_u32(&prefix[4..]);
        if area_size < 8 || area_size > 1 << 20 {
            return Err(Error::Corrupt("cache header area size"));
        }

        let mut rest = vec![0u8; area_size as usize - 8];
        self.file.read_exact(&mut rest).map_err(|e| {
            if io::ErrorKind::UnexpectedEof == e.kind() {
                Error::Corrupt("cache header")
            } else {
                e.into()
            }
        })?;

        let mut cursor: &[u8] = &rest;
        if CACHE_VERSION != codec::unpack_uint(&mut cursor)? {
            return Err(Error::Corrupt("cache version"));
        }
        let deleted = codec::unpack_uint(&mut cursor)?;
        let used = codec::unpack_uint(&mut cursor)?;
        let field_count = codec::unpack_uint(&mut cursor)?;

        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let name_len = codec::unpack_uint(&mut cursor)? as usize;
            if cursor.len() < name_len + 1 {
                return Err(Error::Corrupt("cache field table"));
            }
            let name = std::str::from_utf8(&cursor[..name_len])
                .map_err(|_| Error::Corrupt("cache field name"))?
                .to_owned();
            cursor = &cursor[name_len..];
            let decision = CacheDecision::from_byte(cursor[0])
                .ok_or(Error::Corrupt("cache field decision"))?;
            cursor = &cursor[1..];
            let last_used = codec::unpack_uint(&mut cursor)?;
            fields.push(CacheField {
                name,
                decision,
                last_used,
            });
        }

        self.area_size = area_size;
        self.deleted_record_count = deleted;
        self.used_region_size = used;
        self.fields = fields;
        self.header_dirty = false;
        Ok(())
    }

    /// Find a registered field by name.
    ///
    /// Absence is not an error; callers treat an unknown field as "no
    /// cached data".
    pub fn register_field(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, ix: usize) -> &CacheField {
        &self.fields[ix]
    }

    pub fn fields(&self) -> &[CacheField] {
        &self.fields
    }

    /// Register a brand-new field with an initial decision. The header
    /// rewrite is deferred to `flush_header_if_dirty`.
    pub fn add_field(
        &mut self,
        name: &str,
        decision: CacheDecision,
    ) -> Result<usize, Error> {
        self.require_usable()?;
        if let Some(ix) = self.register_field(name) {
            return Ok(ix);
        }
        self.fields.push(CacheField {
            name: name.to_owned(),
            decision,
            last_used: 0,
        });
        self.header_dirty = true;
        Ok(self.fields.len() - 1)
    }

    /// Update a field's decision and last-used time in memory, marking
    /// the header dirty. Decisions only escalate (no → temp → yes)
    /// unless the new decision is forced; a forced decision sticks until
    /// another forced decision replaces it.
    pub fn update_decision(
        &mut self,
        ix: usize,
        new: CacheDecision,
        last_used: u32,
    ) {
        let field = &mut self.fields[ix];
        if last_used > field.last_used {
            field.last_used = last_used;
            self.header_dirty = true;
        }

        if field.decision == new {
            return;
        }
        if field.decision.forced && !new.forced {
            return;
        }
        if new.forced || new.kind > field.decision.kind {
            field.decision = new;
            self.header_dirty = true;
        }
    }

    /// Write the header back to disk if any field update dirtied it.
    ///
    /// Multiple `update_decision`/`add_field` calls batch into this one
    /// write. If the field table no longer fits the reserved area the
    /// whole file is rewritten with a larger area (record offsets are
    /// region-relative, so they survive).
    pub fn flush_header_if_dirty(&mut self) -> Result<(), Error> {
        if !self.header_dirty {
            return Ok(());
        }
        self.require_usable()?;

        let encoded = encode_header(
            self.area_size,
            self.deleted_record_count,
            self.used_region_size,
            &self.fields,
        );
        if encoded.len() as u32 <= self.area_size {
            self.file.seek(SeekFrom::Start(0))?;
            self.file.write_all(&encoded)?;
            self.file.sync_data()?;
            self.header_dirty = false;
            return Ok(());
        }

        // Field table outgrew the reserved area; grow it with a full
        // atomic rewrite.
        let new_area = (encoded.len() as u32 + HEADER_AREA_STEP - 1)
            / HEADER_AREA_STEP
            * HEADER_AREA_STEP;
        let mut region = vec![0u8; self.used_region_size as usize];
        if !region.is_empty() {
            self.file
                .seek(SeekFrom::Start(u64::from(self.area_size)))?;
            self.file.read_exact(&mut region)?;
        }

        let mut contents = encode_header(
            new_area,
            self.deleted_record_count,
            self.used_region_size,
            &self.fields,
        );
        contents.resize(new_area as usize, 0);
        contents.extend_from_slice(&region);
        file_ops::spit(&self.tmp_dir, &self.path, true, 0o600, &contents)?;

        self.file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        self.area_size = new_area;
        self.header_dirty = false;
        Ok(())
    }

    /// Append a per-message cache record, returning its region-relative
    /// offset (a multiple of 4, suitable for an offset marker).
    pub fn append_record(&mut self, data: &[u8]) -> Result<u32, Error> {
        self.require_usable()?;

        let offset = self.used_region_size.max(FIRST_RECORD_OFFSET);

        let mut encoded = Vec::with_capacity(data.len() + 5);
        codec::pack_uint(
            &mut encoded,
            u32::try_from(data.len()).map_err(|_| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "cache record too large",
                ))
            })?,
        );
        encoded.extend_from_slice(data);
        while 0 != encoded.len() % 4 {
            encoded.push(0);
        }

        if u64::from(offset) + encoded.len() as u64
            >= u64::from(MAX_RECORD_REGION)
        {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "cache record region full; purge required",
            )));
        }

        self.file.seek(SeekFrom::Start(
            u64::from(self.area_size) + u64::from(offset),
        ))?;
        self.file.write_all(&encoded)?;

        self.used_region_size = offset + encoded.len() as u32;
        self.header_dirty = true;
        Ok(offset)
    }

    /// Read the record at `offset`, or `None` for the reserved "absent"
    /// offset 0.
    ///
    /// A structurally impossible offset or record marks the cache
    /// unusable — the pointer came from the index, so either file is
    /// corrupt and the pair must be rebuilt.
    pub fn lookup_record(
        &mut self,
        offset: u32,
    ) -> Result<Option<Vec<u8>>, Error> {
        if 0 == offset {
            return Ok(None);
        }
        self.require_usable()?;

        if 0 != offset % 4 || offset >= self.used_region_size {
            self.unusable = true;
            return Err(Error::Corrupt("cache record offset"));
        }

        self.file.seek(SeekFrom::Start(
            u64::from(self.area_size) + u64::from(offset),
        ))?;
        let mut head = [0u8; 5];
        let got = read_up_to(&mut self.file, &mut head)?;
        let mut cursor = &head[..got];
        let len = match codec::unpack_uint(&mut cursor) {
            Ok(len) => len,
            Err(_) => {
                self.unusable = true;
                return Err(Error::Corrupt("cache record length"));
            }
        };

        let header_len = got - cursor.len();
        if u64::from(offset) + header_len as u64 + u64::from(len)
            > u64::from(self.used_region_size)
        {
            self.unusable = true;
            return Err(Error::Corrupt("cache record length"));
        }

        let mut data = vec![0u8; len as usize];
        let from_head = (len as usize).min(cursor.len());
        data[..from_head].copy_from_slice(&cursor[..from_head]);
        if from_head < data.len() {
            self.file.seek(SeekFrom::Start(
                u64::from(self.area_size)
                    + u64::from(offset)
                    + header_len as u64
                    + from_head as u64,
            ))?;
            self.file.read_exact(&mut data[from_head..])?;
        }
        Ok(Some(data))
    }

    /// Note that `n` messages' cache pointers were dropped without a
    /// purge, so the purge heuristics know how much garbage the record
    /// region holds.
    pub fn expunge_count(&mut self, n: u32) {
        if 0 == n {
            return;
        }
        self.deleted_record_count =
            self.deleted_record_count.saturating_add(n);
        self.header_dirty = true;
    }

    pub fn deleted_record_count(&self) -> u32 {
        self.deleted_record_count
    }

    /// Rewrite the cache keeping only the records at `live` offsets,
    /// dropping everything else, and atomically replace the file.
    ///
    /// Records are retained in the given order until `max_bytes` of
    /// region space has been used; the rest are dropped. Returns the
    /// old-to-new offset mapping for the retained records (callers must
    /// rewrite their index pointers from it). Clears the unusable flag:
    /// purging is exactly the recovery path for a corrupt cache.
    pub fn purge(
        &mut self,
        live: &[u32],
        max_bytes: u32,
        reason: &str,
    ) -> Result<Vec<(u32, u32)>, Error> {
        info!(
            "{}: purging cache ({} live records, reason: {})",
            self.path.display(),
            live.len(),
            reason
        );

        // Read the survivors before the rewrite. On a corrupt cache
        // record lookups may fail; such records are simply dropped.
        let mut survivors = Vec::new();
        if !self.unusable {
            for &offset in live {
                match self.lookup_record(offset) {
                    Ok(Some(data)) => survivors.push((offset, data)),
                    Ok(None) => (),
                    Err(_) => {
                        // lookup_record may have tripped the unusable
                        // flag; ignore and keep what we already have.
                        break;
                    }
                }
            }
        }

        let mut region = vec![0u8; FIRST_RECORD_OFFSET as usize];
        let mut remap = Vec::with_capacity(survivors.len());
        for (old_offset, data) in survivors {
            let new_offset = region.len() as u32;
            let mut encoded = Vec::with_capacity(data.len() + 5);
            codec::pack_uint(&mut encoded, data.len() as u32);
            encoded.extend_from_slice(&data);
            while 0 != encoded.len() % 4 {
                encoded.push(0);
            }
            if region.len() + encoded.len() > max_bytes as usize {
                break;
            }
            region.extend_from_slice(&encoded);
            remap.push((old_offset, new_offset));
        }

        let used = if region.len() as u32 > FIRST_RECORD_OFFSET {
            region.len() as u32
        } else {
            0
        };
        let contents = encode_header(
            HEADER_AREA_DEFAULT,
            0,
            used,
            &self.fields,
        );
        let area = (contents.len() as u32)
            .max(HEADER_AREA_DEFAULT)
            .saturating_add(HEADER_AREA_STEP - 1)
            / HEADER_AREA_STEP
            * HEADER_AREA_STEP;
        let mut contents = encode_header(area, 0, used, &self.fields);
        contents.resize(area as usize, 0);
        if 0 != used {
            contents.extend_from_slice(&region);
        }

        file_ops::spit(&self.tmp_dir, &self.path, true, 0o600, &contents)?;
        self.file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        self.area_size = area;
        self.deleted_record_count = 0;
        self.used_region_size = used;
        self.unusable = false;
        self.header_dirty = false;
        Ok(remap)
    }
}

fn read_up_to(file: &mut fs::File, buf: &mut [u8]) -> Result<usize, Error> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if io::ErrorKind::Interrupted == e.kind() => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}

fn encode_header(
    area_size: u32,
    deleted: u32,
    used: u32,
    fields: &[CacheField],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(CACHE_MAGIC);
    let mut area = [0u8; 4];
    LittleEndian::write_u32(&mut area, area_size);
    buf.extend_from_slice(&area);
    codec::pack_uint(&mut buf, CACHE_VERSION);
    codec::pack_uint(&mut buf, deleted);
    codec::pack_uint(&mut buf, used);
    codec::pack_uint(&mut buf, fields.len() as u32);
    for field in fields {
        codec::pack_uint(&mut buf, field.name.len() as u32);
        buf.extend_from_slice(field.name.as_bytes());
        buf.push(field.decision.to_byte());
        codec::pack_uint(&mut buf, field.last_used);
    }
    buf
}
