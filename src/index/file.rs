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

//! The message index file.
//!
//! The index holds one fixed-size record per known message — UID, cached
//! flags, and an offset marker pointing into the cache file — plus a
//! header with the UID validity and next-UID counter, and a set of named
//! extension blobs (the Maildir header with its directory mtimes lives in
//! one of those).
//!
//! All mutation goes through a transaction: changes are staged against
//! the current view and become visible atomically when the whole file is
//! rewritten and renamed into place. Dropping a transaction without
//! committing discards every staged change. Readers never observe a
//! partial write.
//!
//! Sequence numbers are positional: the record at index `i` of the view
//! has sequence number `i + 1`. They are reassigned on every commit;
//! only UIDs are stable across syncs.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::index::codec;
use crate::index::seq_array::SeqRecordArray;
use crate::support::error::Error;
use crate::support::file_ops;

const INDEX_MAGIC: &[u8; 4] = b"MSIX";
const INDEX_VERSION: u32 = 1;

bitflags! {
    /// Message flags, as carried by the Maildir filename info suffix and
    /// cached in index records.
    pub struct MessageFlags: u8 {
        const PASSED = 1 << 0;
        const REPLIED = 1 << 1;
        const SEEN = 1 << 2;
        const TRASHED = 1 << 3;
        const DRAFT = 1 << 4;
        const FLAGGED = 1 << 5;
    }
}

/// One entry per known message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub uid: u32,
    pub flags: MessageFlags,
    /// Region-relative offset of this message's cache record, or 0 for
    /// none. Persisted as an offset marker.
    pub cache_offset: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexHeader {
    /// Changing this value invalidates every UID ever handed out for the
    /// mailbox. 0 means the mailbox has never been synced.
    pub uid_validity: u32,
    /// The next UID that will be assigned. Never decreases while the UID
    /// validity is unchanged.
    pub next_uid: u32,
}

/// The open index file: an in-memory view of the last committed state
/// plus the machinery to stage and commit new transactions.
pub struct IndexFile {
    path: PathBuf,
    tmp_dir: PathBuf,
    header: IndexHeader,
    records: Vec<MessageRecord>,
    exts: BTreeMap<String, Vec<u8>>,
}

impl IndexFile {
    /// Open the index, treating a missing file as an empty, never-synced
    /// index.
    ///
    /// A corrupt index is discarded with a warning and replaced by an
    /// empty view; the next sync rebuilds it from the uidlist and the
    /// directory contents, which are the authoritative store.
    pub fn open(
        path: impl Into<PathBuf>,
        tmp_dir: impl Into<PathBuf>,
    ) -> Result<Self, Error> {
        let mut this = IndexFile {
            path: path.into(),
            tmp_dir: tmp_dir.into(),
            header: IndexHeader::default(),
            records: Vec::new(),
            exts: BTreeMap::new(),
        };
        this.refresh()?;
        Ok(this)
    }

    /// Re-read the file, replacing the in-memory view.
    pub fn refresh(&mut self) -> Result<(), Error> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                self.header = IndexHeader::default();
                self.records.clear();
                self.exts.clear();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match decode_index(&data) {
            Ok((header, records, exts)) => {
                self.header = header;
                self.records = records;
                self.exts = exts;
            }
            Err(e) => {
                warn!(
                    "{}: discarding corrupt index: {}",
                    self.path.display(),
                    e
                );
                self.header = IndexHeader::default();
                self.records.clear();
                self.exts.clear();
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn records(&self) -> &[MessageRecord] {
        &self.records
    }

    pub fn message_count(&self) -> u32 {
        self.records.len() as u32
    }

    /// Look a record up by UID, returning its 1-based sequence number.
    pub fn record_by_uid(&self, uid: u32) -> Option<(u32, &MessageRecord)> {
        self.records
            .binary_search_by_key(&uid, |r| r.uid)
            .ok()
            .map(|ix| (ix as u32 + 1, &self.records[ix]))
    }

    /// Fetch a named extension blob. Returns an empty slice when the
    /// extension has never been written.
    pub fn get_header_ext(&self, name: &str) -> &[u8] {
        self.exts.get(name).map(|v| &v[..]).unwrap_or(&[])
    }

    pub fn begin_transaction(&mut self) -> IndexTransaction<'_> {
        IndexTransaction {
            appends: Vec::new(),
            expunged: BTreeSet::new(),
            flag_updates: SeqRecordArray::new(1),
            cache_updates: SeqRecordArray::new(4),
            ext_updates: BTreeMap::new(),
            new_uid_validity: None,
            reset: false,
            index: self,
        }
    }
}

/// A set of staged index changes.
///
/// Sequence numbers given to `update_flags`/`set_cache_offset` refer to
/// the view the transaction was begun against. Dropping the transaction
/// rolls everything back.
pub struct IndexTransaction<'a> {
    index: &'a mut IndexFile,
    appends: Vec<MessageRecord>,
    expunged: BTreeSet<u32>,
    /// seq -> new flags byte. Flag changes overwhelmingly arrive in
    /// ascending sequence order, which is the array's append fast path.
    flag_updates: SeqRecordArray,
    /// seq -> new cache offset (u32 LE).
    cache_updates: SeqRecordArray,
    ext_updates: BTreeMap<String, Vec<u8>>,
    new_uid_validity: Option<u32>,
    reset: bool,
}

impl<'a> IndexTransaction<'a> {
    /// Stage a new message. Appends must arrive in ascending UID order
    /// and above every existing UID; violating that is a programming
    /// error caught at commit.
    pub fn append(&mut self, record: MessageRecord) {
        self.appends.push(record);
    }

    /// Stage removal of the record with the given UID. Returns whether
    /// such a record exists in the underlying view.
    pub fn expunge_uid(&mut self, uid: u32) -> bool {
        if self.index.record_by_uid(uid).is_some() {
            self.expunged.insert(uid);
            true
        } else {
            false
        }
    }

    pub fn expunged_count(&self) -> u32 {
        self.expunged.len() as u32
    }

    pub fn update_flags(&mut self, seq: u32, flags: MessageFlags) {
        self.flag_updates.upsert(seq, &[flags.bits()], None);
    }

    pub fn set_cache_offset(&mut self, seq: u32, offset: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, offset);
        self.cache_updates.upsert(seq, &buf, None);
    }

    pub fn set_header_ext(&mut self, name: &str, blob: Vec<u8>) {
        self.ext_updates.insert(name.to_owned(), blob);
    }

    pub fn set_uid_validity(&mut self, uid_validity: u32) {
        self.new_uid_validity = Some(uid_validity);
    }

    /// Drop every existing record and start over under a new UID
    /// validity. Used when the uidlist and index disagree about the UID
    /// validity and the index must be rebuilt.
    pub fn reset(&mut self, uid_validity: u32) {
        self.reset = true;
        self.new_uid_validity = Some(uid_validity);
        self.expunged.clear();
        self.flag_updates = SeqRecordArray::new(1);
        self.cache_updates = SeqRecordArray::new(4);
    }

    /// Apply the staged changes and atomically replace the index file.
    pub fn commit(self) -> Result<(), Error> {
        let IndexTransaction {
            index,
            appends,
            expunged,
            flag_updates,
            cache_updates,
            ext_updates,
            new_uid_validity,
            reset,
        } = self;

        let mut records: Vec<MessageRecord> = if reset {
            Vec::new()
        } else {
            index.records.clone()
        };

        for (seq, flags) in flag_updates.iter() {
            let ix = seq as usize - 1;
            if ix < records.len() {
                records[ix].flags =
                    MessageFlags::from_bits_truncate(flags[0]);
            }
        }
        for (seq, offset) in cache_updates.iter() {
            let ix = seq as usize - 1;
            if ix < records.len() {
                records[ix].cache_offset = LittleEndian::read_u32(offset);
            }
        }

        if !expunged.is_empty() {
            records.retain(|r| !expunged.contains(&r.uid));
        }

        let mut last_uid = records.last().map(|r| r.uid).unwrap_or(0);
        for record in &appends {
            assert!(
                record.uid > last_uid,
                "index appends out of order: {} after {}",
                record.uid,
                last_uid
            );
            last_uid = record.uid;
        }
        records.extend(appends.iter().copied());

        let mut header = index.header;
        if let Some(v) = new_uid_validity {
            header.uid_validity = v;
        }
        if reset {
            header.next_uid = 1;
        }
        header.next_uid = header.next_uid.max(last_uid + 1).max(1);

        let mut exts = index.exts.clone();
        for (name, blob) in &ext_updates {
            exts.insert(name.clone(), blob.clone());
        }

        let encoded = encode_index(&header, &records, &exts);
        file_ops::spit(
            &index.tmp_dir,
            &index.path,
            true,
            0o600,
            &encoded,
        )?;

        index.header = header;
        index.records = records;
        index.exts = exts;
        Ok(())
    }
}

fn encode_index(
    header: &IndexHeader,
    records: &[MessageRecord],
    exts: &BTreeMap<String, Vec<u8>>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + records.len() * 12);
    buf.extend_from_slice(INDEX_MAGIC);
    codec::pack_uint(&mut buf, INDEX_VERSION);

    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, header.uid_validity);
    buf.extend_from_slice(&word);
    LittleEndian::write_u32(&mut word, header.next_uid);
    buf.extend_from_slice(&word);

    codec::pack_uint(&mut buf, exts.len() as u32);
    for (name, blob) in exts {
        codec::pack_uint(&mut buf, name.len() as u32);
        buf.extend_from_slice(name.as_bytes());
        codec::pack_uint(&mut buf, blob.len() as u32);
        buf.extend_from_slice(blob);
    }

    codec::pack_uint(&mut buf, records.len() as u32);
    for record in records {
        LittleEndian::write_u32(&mut word, record.uid);
        buf.extend_from_slice(&word);
        buf.push(record.flags.bits());
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&codec::offset_to_marker(
            record.cache_offset,
        ));
    }
    buf
}

type DecodedIndex =
    (IndexHeader, Vec<MessageRecord>, BTreeMap<String, Vec<u8>>);

fn decode_index(data: &[u8]) -> Result<DecodedIndex, Error> {
    let mut cursor = data;

    let magic = take(&mut cursor, 4)?;
    if INDEX_MAGIC != magic {
        return Err(Error::Corrupt("index magic"));
    }
    if INDEX_VERSION != codec::unpack_uint(&mut cursor)? {
        return Err(Error::Corrupt("index version"));
    }

    let uid_validity = LittleEndian::read_u32(take(&mut cursor, 4)?);
    let next_uid = LittleEndian::read_u32(take(&mut cursor, 4)?);

    let ext_count = codec::unpack_uint(&mut cursor)?;
    let mut exts = BTreeMap::new();
    for _ in 0..ext_count {
        let name_len = codec::unpack_uint(&mut cursor)? as usize;
        let name = std::str::from_utf8(take(&mut cursor, name_len)?)
            .map_err(|_| Error::Corrupt("index extension name"))?
            .to_owned();
        let blob_len = codec::unpack_uint(&mut cursor)? as usize;
        let blob = take(&mut cursor, blob_len)?.to_vec();
        exts.insert(name, blob);
    }

    let record_count = codec::unpack_uint(&mut cursor)?;
    let mut records = Vec::with_capacity(record_count.min(65536) as usize);
    let mut prev_uid = 0u32;
    for _ in 0..record_count {
        let raw = take(&mut cursor, 12)?;
        let uid = LittleEndian::read_u32(&raw[..4]);
        if uid <= prev_uid {
            return Err(Error::Corrupt("index record order"));
        }
        prev_uid = uid;
        let flags = MessageFlags::from_bits_truncate(raw[4]);
        let mut marker = [0u8; 4];
        marker.copy_from_slice(&raw[8..]);
        records.push(MessageRecord {
            uid,
            flags,
            cache_offset: codec::marker_to_offset(marker),
        });
    }

    let header = IndexHeader {
        uid_validity,
        next_uid: next_uid.max(prev_uid.saturating_add(1)).max(1),
    };
    Ok((header, records, exts))
}

fn take<'a>(
    cursor: &mut &'a [u8],
    n: usize,
) -> Result<&'a [u8], Error> {
    if cursor.len() < n {
        return Err(Error::Corrupt("index truncated"));
    }
    let (head, tail) = cursor.split_at(n);
    *cursor = tail;
    Ok(head)
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(uid: u32, flags: MessageFlags) -> MessageRecord {
        MessageRecord {
            uid,
            flags,
            cache_offset: 0,
        }
    }

    #[test]
    fn missing_file_is_empty_never_synced() {
        let root = tempfile::TempDir::new().unwrap();
        let index =
            IndexFile::open(root.path().join("index"), root.path())
                .unwrap();
        assert_eq!(0, index.header().uid_validity);
        assert_eq!(0, index.message_count());
        assert!(index.get_header_ext("maildir").is_empty());
    }

    #[test]
    fn commit_round_trips_through_disk() {
        let root = tempfile::TempDir::new().unwrap();
        let path = root.path().join("index");

        {
            let mut index =
                IndexFile::open(&path, root.path()).unwrap();
            let mut txn = index.begin_transaction();
            txn.set_uid_validity(1234);
            txn.append(record(1, MessageFlags::SEEN));
            txn.append(record(5, MessageFlags::empty()));
            txn.set_header_ext("maildir", vec![1, 2, 3]);
            txn.commit().unwrap();
        }

        let index = IndexFile::open(&path, root.path()).unwrap();
        assert_eq!(1234, index.header().uid_validity);
        assert_eq!(6, index.header().next_uid);
        assert_eq!(2, index.message_count());
        assert_eq!(&[1, 2, 3], index.get_header_ext("maildir"));

        let (seq, rec) = index.record_by_uid(5).unwrap();
        assert_eq!(2, seq);
        assert_eq!(MessageFlags::empty(), rec.flags);
        assert_eq!(None, index.record_by_uid(2));
    }

    #[test]
    fn expunge_renumbers_sequences() {
        let root = tempfile::TempDir::new().unwrap();
        let mut index =
            IndexFile::open(root.path().join("index"), root.path())
                .unwrap();

        let mut txn = index.begin_transaction();
        for uid in 1..=4 {
            txn.append(record(uid, MessageFlags::empty()));
        }
        txn.commit().unwrap();

        let mut txn = index.begin_transaction();
        assert!(txn.expunge_uid(2));
        assert!(!txn.expunge_uid(99));
        txn.commit().unwrap();

        assert_eq!(3, index.message_count());
        assert_eq!(1, index.record_by_uid(1).unwrap().0);
        assert_eq!(2, index.record_by_uid(3).unwrap().0);
        assert_eq!(3, index.record_by_uid(4).unwrap().0);
        // next_uid unaffected by expunge; UIDs are never reused
        assert_eq!(5, index.header().next_uid);
    }

    #[test]
    fn rollback_is_the_default() {
        let root = tempfile::TempDir::new().unwrap();
        let mut index =
            IndexFile::open(root.path().join("index"), root.path())
                .unwrap();

        {
            let mut txn = index.begin_transaction();
            txn.append(record(1, MessageFlags::empty()));
            // dropped without commit
        }
        assert_eq!(0, index.message_count());
    }

    #[test]
    fn flag_and_cache_updates_apply_by_sequence() {
        let root = tempfile::TempDir::new().unwrap();
        let mut index =
            IndexFile::open(root.path().join("index"), root.path())
                .unwrap();

        let mut txn = index.begin_transaction();
        txn.append(record(1, MessageFlags::empty()));
        txn.append(record(2, MessageFlags::empty()));
        txn.commit().unwrap();

        let mut txn = index.begin_transaction();
        txn.update_flags(2, MessageFlags::SEEN | MessageFlags::REPLIED);
        txn.set_cache_offset(1, 64);
        txn.commit().unwrap();

        assert_eq!(
            MessageFlags::SEEN | MessageFlags::REPLIED,
            index.record_by_uid(2).unwrap().1.flags
        );
        assert_eq!(64, index.record_by_uid(1).unwrap().1.cache_offset);
    }

    #[test]
    fn corrupt_index_resets_to_empty() {
        let root = tempfile::TempDir::new().unwrap();
        let path = root.path().join("index");

        {
            let mut index =
                IndexFile::open(&path, root.path()).unwrap();
            let mut txn = index.begin_transaction();
            txn.append(record(1, MessageFlags::empty()));
            txn.commit().unwrap();
        }

        fs::write(&path, b"definitely not an index").unwrap();
        let index = IndexFile::open(&path, root.path()).unwrap();
        assert_eq!(0, index.message_count());
        assert_eq!(0, index.header().uid_validity);
    }

    #[test]
    fn decode_tolerates_max_uid_record() {
        let header = IndexHeader {
            uid_validity: 1,
            next_uid: 2,
        };
        let records = vec![record(u32::MAX, MessageFlags::empty())];
        let encoded = encode_index(&header, &records, &BTreeMap::new());

        let (header, records, _) = decode_index(&encoded).unwrap();
        assert_eq!(u32::MAX, records[0].uid);
        // next_uid saturates instead of wrapping past the last UID
        assert_eq!(u32::MAX, header.next_uid);
    }

    #[test]
    fn reset_starts_over_under_new_validity() {
        let root = tempfile::TempDir::new().unwrap();
        let mut index =
            IndexFile::open(root.path().join("index"), root.path())
                .unwrap();

        let mut txn = index.begin_transaction();
        txn.set_uid_validity(1);
        txn.append(record(1, MessageFlags::empty()));
        txn.append(record(2, MessageFlags::empty()));
        txn.commit().unwrap();

        let mut txn = index.begin_transaction();
        txn.reset(777);
        txn.append(record(1, MessageFlags::SEEN));
        txn.commit().unwrap();

        assert_eq!(777, index.header().uid_validity);
        assert_eq!(1, index.message_count());
        assert_eq!(2, index.header().next_uid);
    }
}
