// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Constants shared between the in-process collector, the pending-crash store and the loader.
//!
//! None of these are part of the public configuration surface: the host SDK only decides
//! whether crash tracking is enabled.

use std::time::Duration;

/// Size in bytes of one persisted crash record slot.
/// Every record occupies exactly this many bytes on disk so that a torn write at the end of a
/// segment can never corrupt the slots in front of it.
pub const CRASH_RECORD_SIZE: usize = 4096;

/// Version of the on-disk crash record layout written by this build.
pub const CRASH_RECORD_SCHEMA_VERSION: u16 = 1;

/// Magic prefix of a live crash record slot.
pub const CRASH_RECORD_MAGIC: [u8; 4] = *b"SACR";

/// Magic prefix of a slot whose record has been delivered (or discarded).
pub const CRASH_RECORD_TOMBSTONE: [u8; 4] = *b"DEAD";

/// Maximum number of frames captured for one crash.
/// Deeper stacks are truncated, which also bounds the walk on a corrupted stack.
pub const MAX_BACKTRACE_FRAMES: usize = 64;

/// Capacity of the exception name area of a record.
pub const MAX_EXCEPTION_NAME_LEN: usize = 128;

/// Capacity of the exception reason / panic message area of a record.
pub const MAX_EXCEPTION_REASON_LEN: usize = 1024;

/// Capacity of the thread name area of a record.
pub const MAX_THREAD_NAME_LEN: usize = 64;

/// Capacity of each process metadata string (app version, os version, device model).
pub const MAX_METADATA_FIELD_LEN: usize = 128;

/// Stored records older than this are pruned without being reported.
pub const MAX_RECORD_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// At most this many undelivered records are kept on disk; the oldest are pruned first.
pub const MAX_RETAINED_RECORDS: usize = 16;

/// Prefix and extension of the segment files in the pending-crash store.
pub const SEGMENT_FILE_PREFIX: &str = "crash-";
pub const SEGMENT_FILE_EXTENSION: &str = "seg";

/// Name of the directory created under the platform data directory when the host does not
/// provide a storage location.
pub const DEFAULT_STORE_DIR_NAME: &str = "sa-crashtracker";

/// Overrides the pending-crash store location.
pub const STORE_DIR_ENV: &str = "SA_CRASHTRACKER_STORE_DIR";

/// Name of the analytics event produced for every recovered crash.
pub const APP_CRASHED_EVENT: &str = "AppCrashed";
