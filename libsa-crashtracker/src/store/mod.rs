// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! On-disk area holding the crash records that have not been reported yet.
//!
//! The store is a directory of segment files. Each armed process instance appends fixed-size
//! record slots to its own segment; the next safe launch reads every other segment in name
//! order (which is creation order), hands the records out, and deletes them one by one by
//! overwriting the slot magic with a tombstone. A segment without live slots is unlinked.
//!
//! If the process crashes again while a drain is in progress, a record that was already handed
//! out but not yet tombstoned is delivered again on the following launch. Delivery is at most
//! once only for drains that run to completion.

mod segment;

pub use segment::{AppendError, SegmentWriter};

use crate::crash_record::{
    clock_ns, decode_record, slot_state, tombstone_magic, CrashRecord, DecodeError, SlotState,
};
use crate::shared::constants::{CRASH_RECORD_SIZE, MAX_RECORD_AGE, MAX_RETAINED_RECORDS};
use segment::{parse_segment_file_name, segment_file_name};
use std::fs::{self, File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Location of one record slot inside the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntryId {
    pub segment: PathBuf,
    pub slot: usize,
}

#[derive(Debug)]
pub struct PendingEntry {
    pub id: EntryId,
    pub record: Result<CrashRecord, DecodeError>,
}

/// Limits on what the store keeps around while records cannot be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_records: usize,
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_records: MAX_RETAINED_RECORDS,
            max_age: MAX_RECORD_AGE,
        }
    }
}

#[derive(Debug)]
pub struct PendingCrashStore {
    dir: PathBuf,
    active_segment: Option<PathBuf>,
}

impl PendingCrashStore {
    /// Opens (and creates if needed) the store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self {
            dir,
            active_segment: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Segment the current process appends to, if any. It is never drained by this process.
    pub fn active_segment(&self) -> Option<&Path> {
        self.active_segment.as_deref()
    }

    /// Creates a fresh segment for this process and opens it for appending.
    /// Called when the handlers are armed, never from a crash handler.
    pub fn create_segment(&mut self) -> Result<SegmentWriter, StoreError> {
        let name = segment_file_name(
            clock_ns(libc::CLOCK_REALTIME),
            std::process::id(),
        );
        let path = self.dir.join(name);
        let file = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        // Make the directory entry itself durable, the segment has to outlive this process.
        if let Err(e) = File::open(&self.dir).and_then(|d| d.sync_all()) {
            debug!(dir = ?self.dir, error = %e, "Unable to sync crash store directory");
        }
        debug!(segment = ?path, "Created crash segment");
        self.active_segment = Some(path.clone());
        Ok(SegmentWriter::new(OwnedFd::from(file), path))
    }

    /// Forgets the active segment once its writer is gone.
    /// A segment nothing was written to is deleted right away.
    pub fn release_segment(&mut self, writer: SegmentWriter) {
        let path = writer.path().to_path_buf();
        drop(writer);
        if self.active_segment.as_deref() == Some(path.as_path()) {
            self.active_segment = None;
        }
        match fs::metadata(&path) {
            Ok(meta) if meta.len() == 0 => {
                if let Err(e) = fs::remove_file(&path) {
                    debug!(segment = ?path, error = %e, "Unable to remove empty crash segment");
                }
            }
            _ => (),
        }
    }

    /// Segments in creation order, excluding the active one.
    fn segments(&self) -> Result<Vec<(u64, PathBuf)>, StoreError> {
        let mut segments = vec![];
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let Some(created) = entry
                .file_name()
                .to_str()
                .and_then(parse_segment_file_name)
            else {
                continue;
            };
            let path = entry.path();
            if self.active_segment.as_deref() == Some(path.as_path()) {
                continue;
            }
            segments.push((created, path));
        }
        segments.sort();
        Ok(segments)
    }

    /// Every stored entry that has not been removed yet, in write order.
    /// Entries that fail validation are returned as errors so the caller can discard them.
    pub fn pending(&self) -> Result<Vec<PendingEntry>, StoreError> {
        let mut pending = vec![];
        for (_, segment) in self.segments()? {
            let bytes = match fs::read(&segment) {
                Ok(bytes) => bytes,
                // Another instance may have drained it in the meantime.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&segment, e)),
            };
            for (slot, chunk) in bytes.chunks(CRASH_RECORD_SIZE).enumerate() {
                if chunk.len() == CRASH_RECORD_SIZE && slot_state(chunk) == SlotState::Tombstone {
                    continue;
                }
                pending.push(PendingEntry {
                    id: EntryId {
                        segment: segment.clone(),
                        slot,
                    },
                    record: decode_record(chunk),
                });
            }
        }
        Ok(pending)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.pending()?.is_empty())
    }

    /// Deletes one entry. Deleting an entry that is already gone is not an error.
    pub fn remove(&self, id: &EntryId) -> Result<(), StoreError> {
        let file = match OpenOptions::new().read(true).write(true).open(&id.segment) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(&id.segment, e)),
        };
        let len = file
            .metadata()
            .map_err(|e| StoreError::io(&id.segment, e))?
            .len();
        let offset = (id.slot * CRASH_RECORD_SIZE) as u64;
        if offset + CRASH_RECORD_SIZE as u64 > len {
            // Torn tail: cut it off.
            file.set_len(offset.min(len))
                .map_err(|e| StoreError::io(&id.segment, e))?;
        } else {
            file.write_all_at(tombstone_magic(), offset)
                .map_err(|e| StoreError::io(&id.segment, e))?;
        }
        file.sync_data()
            .map_err(|e| StoreError::io(&id.segment, e))?;
        drop(file);
        self.unlink_if_dead(&id.segment)
    }

    fn unlink_if_dead(&self, segment: &Path) -> Result<(), StoreError> {
        let bytes = match fs::read(segment) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io(segment, e)),
        };
        let dead = bytes.chunks(CRASH_RECORD_SIZE).all(|chunk| {
            chunk.len() == CRASH_RECORD_SIZE && slot_state(chunk) == SlotState::Tombstone
        });
        if dead {
            remove_segment(segment)?;
        }
        Ok(())
    }

    /// Returns every valid stored record in write order and removes all stored entries.
    /// Invalid entries are discarded.
    pub fn drain_all(&self) -> Result<Vec<CrashRecord>, StoreError> {
        let segments = self.segments()?;
        let records = self
            .pending()?
            .into_iter()
            .filter_map(|entry| match entry.record {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(entry = ?entry.id, error = %e, "Discarding unreadable crash record");
                    None
                }
            })
            .collect();
        for (_, segment) in segments {
            remove_segment(&segment)?;
        }
        Ok(records)
    }

    /// Enforces `policy` and returns how many entries were dropped.
    pub fn prune(&self, policy: &RetentionPolicy) -> Result<usize, StoreError> {
        let now_ns = clock_ns(libc::CLOCK_REALTIME);
        let max_age_ns = policy.max_age.as_nanos().min(u64::MAX as u128) as u64;
        let mut pruned = 0;

        for (created, segment) in self.segments()? {
            let entries = self.pending_in(&segment)?;
            if entries == 0 {
                // Left behind by a process that never crashed.
                remove_segment(&segment)?;
            } else if now_ns.saturating_sub(created) > max_age_ns {
                warn!(segment = ?segment, entries, "Pruning expired crash records");
                remove_segment(&segment)?;
                pruned += entries;
            }
        }

        let pending = self.pending()?;
        if pending.len() > policy.max_records {
            let excess = pending.len() - policy.max_records;
            warn!(excess, "Too many undelivered crash records, pruning the oldest");
            for entry in pending.iter().take(excess) {
                self.remove(&entry.id)?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    fn pending_in(&self, segment: &Path) -> Result<usize, StoreError> {
        let bytes = match fs::read(segment) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(segment, e)),
        };
        Ok(bytes
            .chunks(CRASH_RECORD_SIZE)
            .filter(|chunk| {
                chunk.len() != CRASH_RECORD_SIZE || slot_state(chunk) != SlotState::Tombstone
            })
            .count())
    }
}

fn remove_segment(segment: &Path) -> Result<(), StoreError> {
    match fs::remove_file(segment) {
        Ok(()) => {
            debug!(segment = ?segment, "Removed crash segment");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(segment, e)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crash_record::{
        encode_record, set_schema_version, CaptureTimestamp, Fault, FaultKind, ProcessMetadata,
        RecordBuffer, StackFrame,
    };
    use std::io::Write;

    pub(crate) fn test_record(signo: i32) -> CrashRecord {
        let mut record = CrashRecord::new(
            Fault::FatalSignal {
                signo,
                si_code: 0,
                fault_address: None,
            },
            ProcessMetadata::new("1.0.0", "Linux 6.1", "x86_64", 100),
        );
        record.timestamp = CaptureTimestamp::now();
        record.frames = vec![StackFrame {
            address: 0x1234,
            module_base: Some(0x1000),
        }];
        record
    }

    pub(crate) fn append(writer: &SegmentWriter, record: &CrashRecord) {
        let mut buf: RecordBuffer = [0u8; CRASH_RECORD_SIZE];
        writer.append(encode_record(record, &mut buf)).unwrap();
    }

    /// Simulates a previous process instance: write a segment, then release it.
    pub(crate) fn write_previous_instance(store: &mut PendingCrashStore, records: &[CrashRecord]) {
        let writer = store.create_segment().unwrap();
        for record in records {
            append(&writer, record);
        }
        store.release_segment(writer);
    }

    #[test]
    fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingCrashStore::open(dir.path()).unwrap();
        assert!(store.pending().unwrap().is_empty());
        assert!(store.drain_all().unwrap().is_empty());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_active_segment_is_not_drained() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        append(&writer, &test_record(libc::SIGSEGV));
        assert_eq!(store.active_segment(), Some(writer.path()));
        assert!(store.pending().unwrap().is_empty());

        store.release_segment(writer);
        assert_eq!(store.active_segment(), None);
        assert_eq!(store.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_segment_removed_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        let path = writer.path().to_path_buf();
        assert!(path.exists());
        store.release_segment(writer);
        assert!(!path.exists());
    }

    #[test]
    fn test_drain_all_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        write_previous_instance(&mut store, &[test_record(libc::SIGSEGV)]);
        write_previous_instance(
            &mut store,
            &[test_record(libc::SIGBUS), test_record(libc::SIGABRT)],
        );

        let drained = store.drain_all().unwrap();
        let signals: Vec<_> = drained
            .iter()
            .map(|r| match r.fault {
                Fault::FatalSignal { signo, .. } => signo,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(signals, vec![libc::SIGSEGV, libc::SIGBUS, libc::SIGABRT]);
        assert!(drained.iter().all(|r| r.kind() == FaultKind::FatalSignal));
        assert!(store.is_empty().unwrap());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_remove_tombstones_then_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        write_previous_instance(
            &mut store,
            &[test_record(libc::SIGSEGV), test_record(libc::SIGILL)],
        );
        let pending = store.pending().unwrap();
        assert_eq!(pending.len(), 2);
        let segment = pending[0].id.segment.clone();

        store.remove(&pending[0].id).unwrap();
        let remaining = store.pending().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id.slot, 1);
        assert!(segment.exists());

        store.remove(&remaining[0].id).unwrap();
        assert!(!segment.exists());
        // Removing twice is fine.
        store.remove(&remaining[0].id).unwrap();
    }

    #[test]
    fn test_torn_tail_does_not_corrupt_previous_slots() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        write_previous_instance(&mut store, &[test_record(libc::SIGSEGV)]);
        let segment = store.pending().unwrap()[0].id.segment.clone();
        let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
        file.write_all(b"SACR\x01\x00partial").unwrap();
        drop(file);

        let pending = store.pending().unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending[0].record.is_ok());
        assert!(matches!(
            pending[1].record,
            Err(DecodeError::Truncated(_))
        ));

        store.remove(&pending[1].id).unwrap();
        assert_eq!(
            fs::metadata(&segment).unwrap().len(),
            CRASH_RECORD_SIZE as u64
        );
        assert_eq!(store.drain_all().unwrap().len(), 1);
    }

    #[test]
    fn test_unsupported_version_is_reported_and_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        let mut buf: RecordBuffer = [0u8; CRASH_RECORD_SIZE];
        encode_record(&test_record(libc::SIGSEGV), &mut buf);
        set_schema_version(&mut buf, 99);
        writer.append(&buf).unwrap();
        append(&writer, &test_record(libc::SIGBUS));
        store.release_segment(writer);

        let pending = store.pending().unwrap();
        assert_eq!(
            pending[0].record.as_ref().unwrap_err(),
            &DecodeError::UnsupportedVersion(99)
        );
        assert!(pending[1].record.is_ok());
        assert_eq!(store.drain_all().unwrap().len(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_prune_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let records: Vec<_> = (0..5).map(|_| test_record(libc::SIGSEGV)).collect();
        write_previous_instance(&mut store, &records);
        let policy = RetentionPolicy {
            max_records: 2,
            ..Default::default()
        };
        assert_eq!(store.prune(&policy).unwrap(), 3);
        let pending = store.pending().unwrap();
        assert_eq!(
            pending.iter().map(|e| e.id.slot).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert_eq!(store.prune(&policy).unwrap(), 0);
    }

    #[test]
    fn test_prune_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        write_previous_instance(&mut store, &[test_record(libc::SIGSEGV)]);
        // A segment from 1970 is certainly expired.
        let old = dir.path().join(segment_file_name(1, 1));
        fs::write(&old, [0u8; CRASH_RECORD_SIZE]).unwrap();

        assert_eq!(store.prune(&RetentionPolicy::default()).unwrap(), 1);
        assert!(!old.exists());
        assert_eq!(store.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_prune_removes_empty_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingCrashStore::open(dir.path()).unwrap();
        let empty = dir.path().join(segment_file_name(clock_ns(libc::CLOCK_REALTIME), 1));
        fs::write(&empty, b"").unwrap();
        assert_eq!(store.prune(&RetentionPolicy::default()).unwrap(), 0);
        assert!(!empty.exists());
    }

    #[test]
    fn test_foreign_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = PendingCrashStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("README"), b"not a segment").unwrap();
        assert!(store.pending().unwrap().is_empty());
        store.drain_all().unwrap();
        assert!(dir.path().join("README").exists());
    }
}
