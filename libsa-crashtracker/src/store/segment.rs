// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::crash_record::RecordBuffer;
use crate::shared::constants::{SEGMENT_FILE_EXTENSION, SEGMENT_FILE_PREFIX};
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

// Note that `SegmentWriter::append` only makes use of the following async-signal safe functions.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
// - write
// - fsync

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AppendError {
    #[error("write to the crash segment failed: {0}")]
    Write(errno::Errno),
    #[error("short write to the crash segment: {0} bytes")]
    ShortWrite(usize),
    #[error("fsync of the crash segment failed: {0}")]
    Sync(errno::Errno),
}

/// Open handle on the segment file this process appends its crash records to.
/// It is created when the handlers are armed, so that capturing a crash never has to open a file.
#[derive(Debug)]
pub struct SegmentWriter {
    fd: OwnedFd,
    path: PathBuf,
}

impl SegmentWriter {
    pub(crate) fn new(fd: OwnedFd, path: PathBuf) -> Self {
        Self { fd, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one complete record slot and flushes it to stable storage.
    ///
    /// SIGNAL SAFETY:
    ///     Issues exactly one `write` and one `fsync` on an already-open descriptor.
    ///     There is no retry: a failed or partial write drops the record. A partial slot at the
    ///     end of the segment is ignored by the reader and does not affect earlier slots.
    pub fn append(&self, slot: &RecordBuffer) -> Result<(), AppendError> {
        let fd = self.fd.as_raw_fd();
        // SAFETY: `slot` is a valid buffer of `slot.len()` bytes and `fd` is owned by `self`.
        let written = unsafe { libc::write(fd, slot.as_ptr() as *const libc::c_void, slot.len()) };
        if written < 0 {
            return Err(AppendError::Write(errno::errno()));
        }
        if written as usize != slot.len() {
            return Err(AppendError::ShortWrite(written as usize));
        }
        // SAFETY: `fd` is owned by `self`.
        if unsafe { libc::fsync(fd) } != 0 {
            return Err(AppendError::Sync(errno::errno()));
        }
        Ok(())
    }
}

static SEGMENT_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// `crash-<wall clock ns>-<pid>-<seq>.seg`: sorting names sorts segments in creation order.
pub(crate) fn segment_file_name(wall_clock_ns: u64, pid: u32) -> String {
    let seq = SEGMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{SEGMENT_FILE_PREFIX}{wall_clock_ns:020}-{pid}-{seq}.{SEGMENT_FILE_EXTENSION}")
}

/// Returns the creation time encoded in a segment file name, if `name` is a segment name.
pub(crate) fn parse_segment_file_name(name: &str) -> Option<u64> {
    let stem = name
        .strip_prefix(SEGMENT_FILE_PREFIX)?
        .strip_suffix(SEGMENT_FILE_EXTENSION)?
        .strip_suffix('.')?;
    let mut parts = stem.splitn(3, '-');
    let wall_clock_ns = parts.next()?.parse().ok()?;
    let _pid: u32 = parts.next()?.parse().ok()?;
    let _seq: u32 = parts.next()?.parse().ok()?;
    Some(wall_clock_ns)
}
