// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-size binary layout of a crash record slot.
//!
//! Every slot is exactly `CRASH_RECORD_SIZE` bytes, little-endian:
//!
//! ```text
//! 0   magic            [u8; 4]   "SACR" (live) / "DEAD" (tombstone)
//! 4   schema version   u16
//! 6   fault kind       u8
//! 7   flags            u8
//! 8   payload length   u32
//! 12  checksum         u32       FNV-1a over the payload
//! 16  payload          fixed offsets, see the `OFF_*` constants
//! ```
//!
//! The encoder writes into a caller-provided buffer and never allocates, so it can run inside a
//! signal handler. Strings are stored in fixed-capacity areas (u16 length prefix followed by the
//! bytes) and truncated when they do not fit.

use super::{
    CaptureTimestamp, CrashRecord, Fault, FaultKind, ProcessMetadata, StackFrame, ThreadInfo,
};
use crate::shared::constants::{
    CRASH_RECORD_MAGIC, CRASH_RECORD_SCHEMA_VERSION, CRASH_RECORD_SIZE, CRASH_RECORD_TOMBSTONE,
    MAX_BACKTRACE_FRAMES, MAX_EXCEPTION_NAME_LEN, MAX_EXCEPTION_REASON_LEN,
    MAX_METADATA_FIELD_LEN, MAX_THREAD_NAME_LEN,
};
use num_traits::FromPrimitive;
use std::fmt;

pub type RecordBuffer = [u8; CRASH_RECORD_SIZE];

const HEADER_LEN: usize = 16;
const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_KIND: usize = 6;
const OFF_FLAGS: usize = 7;
const OFF_PAYLOAD_LEN: usize = 8;
const OFF_CHECKSUM: usize = 12;

const OFF_MONOTONIC: usize = HEADER_LEN;
const OFF_WALL_CLOCK: usize = OFF_MONOTONIC + 8;
const OFF_INSTALLED_AT: usize = OFF_WALL_CLOCK + 8;
const OFF_THREAD_ID: usize = OFF_INSTALLED_AT + 8;
const OFF_FAULT_ADDRESS: usize = OFF_THREAD_ID + 8;
const OFF_PID: usize = OFF_FAULT_ADDRESS + 8;
const OFF_SIGNO: usize = OFF_PID + 4;
const OFF_SI_CODE: usize = OFF_SIGNO + 4;
const OFF_FRAME_COUNT: usize = OFF_SI_CODE + 4;
// u16 frame count followed by two reserved bytes
const OFF_THREAD_NAME: usize = OFF_FRAME_COUNT + 4;
const OFF_EXCEPTION_NAME: usize = OFF_THREAD_NAME + 2 + MAX_THREAD_NAME_LEN;
const OFF_EXCEPTION_REASON: usize = OFF_EXCEPTION_NAME + 2 + MAX_EXCEPTION_NAME_LEN;
const OFF_APP_VERSION: usize = OFF_EXCEPTION_REASON + 2 + MAX_EXCEPTION_REASON_LEN;
const OFF_OS_VERSION: usize = OFF_APP_VERSION + 2 + MAX_METADATA_FIELD_LEN;
const OFF_DEVICE_MODEL: usize = OFF_OS_VERSION + 2 + MAX_METADATA_FIELD_LEN;
const OFF_FRAMES: usize = OFF_DEVICE_MODEL + 2 + MAX_METADATA_FIELD_LEN;
const FRAME_LEN: usize = 16;
const PAYLOAD_END: usize = OFF_FRAMES + MAX_BACKTRACE_FRAMES * FRAME_LEN;
const PAYLOAD_LEN: u32 = (PAYLOAD_END - HEADER_LEN) as u32;

const _: () = assert!(PAYLOAD_END <= CRASH_RECORD_SIZE);

const FLAG_FRAMES_TRUNCATED: u8 = 1 << 0;
const FLAG_HAS_FAULT_ADDRESS: u8 = 1 << 1;
const FLAG_HAS_THREAD_NAME: u8 = 1 << 2;

#[derive(Clone, Copy)]
struct StrArea {
    offset: usize,
    capacity: usize,
}

const THREAD_NAME: StrArea = StrArea {
    offset: OFF_THREAD_NAME,
    capacity: MAX_THREAD_NAME_LEN,
};
const EXCEPTION_NAME: StrArea = StrArea {
    offset: OFF_EXCEPTION_NAME,
    capacity: MAX_EXCEPTION_NAME_LEN,
};
const EXCEPTION_REASON: StrArea = StrArea {
    offset: OFF_EXCEPTION_REASON,
    capacity: MAX_EXCEPTION_REASON_LEN,
};
const APP_VERSION: StrArea = StrArea {
    offset: OFF_APP_VERSION,
    capacity: MAX_METADATA_FIELD_LEN,
};
const OS_VERSION: StrArea = StrArea {
    offset: OFF_OS_VERSION,
    capacity: MAX_METADATA_FIELD_LEN,
};
const DEVICE_MODEL: StrArea = StrArea {
    offset: OFF_DEVICE_MODEL,
    capacity: MAX_METADATA_FIELD_LEN,
};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Record slot is truncated: {0} bytes")]
    Truncated(usize),
    #[error("Record slot has an unknown magic {0:?}")]
    BadMagic([u8; 4]),
    #[error("Unsupported record schema version {0}")]
    UnsupportedVersion(u16),
    #[error("Unexpected payload length {0}")]
    PayloadLength(u32),
    #[error("Record checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("Unknown fault kind {0}")]
    UnknownFaultKind(u8),
    #[error("Invalid frame count {0}")]
    InvalidFrameCount(u16),
    #[error("String area at offset {offset} claims {len} bytes")]
    InvalidStringLength { offset: usize, len: usize },
}

/// What a slot's magic says about it, before any further validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Live,
    Tombstone,
    Unknown,
}

pub fn slot_state(slot: &[u8]) -> SlotState {
    match slot.get(OFF_MAGIC..OFF_MAGIC + 4) {
        Some(magic) if magic == CRASH_RECORD_MAGIC => SlotState::Live,
        Some(magic) if magic == CRASH_RECORD_TOMBSTONE => SlotState::Tombstone,
        _ => SlotState::Unknown,
    }
}

/// Bytes that turn a live slot into a tombstone when written at offset 0 of the slot.
pub fn tombstone_magic() -> &'static [u8; 4] {
    &CRASH_RECORD_TOMBSTONE
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

const fn fnv1a(mut hash: u32, bytes: &[u8]) -> u32 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    hash
}

/// Covers the version, kind, flags and payload length of the header, then the payload.
fn record_checksum(slot: &[u8]) -> u32 {
    let header = fnv1a(FNV_OFFSET_BASIS, &slot[OFF_VERSION..OFF_CHECKSUM]);
    fnv1a(header, &slot[HEADER_LEN..PAYLOAD_END])
}

/// Longest prefix of `s` that fits in `capacity` bytes without splitting a character.
fn truncate_utf8(s: &str, capacity: usize) -> &str {
    if s.len() <= capacity {
        return s;
    }
    let mut end = capacity;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn put_u16(buf: &mut RecordBuffer, offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut RecordBuffer, offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_i32(buf: &mut RecordBuffer, offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut RecordBuffer, offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn put_bytes(buf: &mut RecordBuffer, area: StrArea, bytes: &[u8]) -> usize {
    let len = bytes.len().min(area.capacity);
    let start = area.offset + 2;
    buf[start..start + len].copy_from_slice(&bytes[..len]);
    put_u16(buf, area.offset, len as u16);
    len
}

fn put_str(buf: &mut RecordBuffer, area: StrArea, s: &str) {
    put_bytes(buf, area, truncate_utf8(s, area.capacity).as_bytes());
}

/// Appends formatted text to a string area of the record, dropping whatever does not fit.
pub struct AreaWriter<'a> {
    buf: &'a mut RecordBuffer,
    area: StrArea,
    len: usize,
}

impl fmt::Write for AreaWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let remaining = self.area.capacity - self.len;
        if remaining == 0 {
            return Ok(());
        }
        let s = truncate_utf8(s, remaining);
        let start = self.area.offset + 2 + self.len;
        self.buf[start..start + s.len()].copy_from_slice(s.as_bytes());
        self.len += s.len();
        put_u16(self.buf, self.area.offset, self.len as u16);
        Ok(())
    }
}

/// Fills a preallocated record buffer field by field.
///
/// SIGNAL SAFETY:
///     No method allocates, locks or performs I/O.
pub struct RecordEncoder<'a> {
    buf: &'a mut RecordBuffer,
    flags: u8,
    frame_count: usize,
    kind: FaultKind,
}

impl<'a> RecordEncoder<'a> {
    pub fn new(buf: &'a mut RecordBuffer, kind: FaultKind) -> Self {
        buf.fill(0);
        Self {
            buf,
            flags: 0,
            frame_count: 0,
            kind,
        }
    }

    pub fn timestamp(&mut self, timestamp: &CaptureTimestamp) {
        put_u64(self.buf, OFF_MONOTONIC, timestamp.monotonic_ns);
        put_u64(self.buf, OFF_WALL_CLOCK, timestamp.wall_clock_ns);
    }

    pub fn installed_at(&mut self, monotonic_ns: u64) {
        put_u64(self.buf, OFF_INSTALLED_AT, monotonic_ns);
    }

    pub fn thread_id(&mut self, id: u64) {
        put_u64(self.buf, OFF_THREAD_ID, id);
    }

    /// Stores a thread name as read from the OS, up to the first nul byte.
    pub fn thread_name(&mut self, name: &[u8]) {
        let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
        if put_bytes(self.buf, THREAD_NAME, &name[..end]) > 0 {
            self.flags |= FLAG_HAS_THREAD_NAME;
        }
    }

    pub fn signal(&mut self, signo: i32, si_code: i32, fault_address: Option<u64>) {
        put_i32(self.buf, OFF_SIGNO, signo);
        put_i32(self.buf, OFF_SI_CODE, si_code);
        if let Some(address) = fault_address {
            put_u64(self.buf, OFF_FAULT_ADDRESS, address);
            self.flags |= FLAG_HAS_FAULT_ADDRESS;
        }
    }

    pub fn exception_name(&mut self, name: &str) {
        put_str(self.buf, EXCEPTION_NAME, name);
    }

    /// Writer for the exception reason; use it with `write!`.
    pub fn exception_reason(&mut self) -> AreaWriter<'_> {
        AreaWriter {
            buf: &mut *self.buf,
            area: EXCEPTION_REASON,
            len: 0,
        }
    }

    pub fn process(&mut self, metadata: &ProcessMetadata) {
        put_u32(self.buf, OFF_PID, metadata.pid);
        put_str(self.buf, APP_VERSION, &metadata.app_version);
        put_str(self.buf, OS_VERSION, &metadata.os_version);
        put_str(self.buf, DEVICE_MODEL, &metadata.device_model);
    }

    /// Returns `false` once the frame area is full; the record is then flagged as truncated.
    pub fn push_frame(&mut self, frame: StackFrame) -> bool {
        if self.frame_count >= MAX_BACKTRACE_FRAMES {
            self.flags |= FLAG_FRAMES_TRUNCATED;
            return false;
        }
        let offset = OFF_FRAMES + self.frame_count * FRAME_LEN;
        put_u64(self.buf, offset, frame.address);
        put_u64(self.buf, offset + 8, frame.module_base.unwrap_or(0));
        self.frame_count += 1;
        true
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Seals the header and returns the complete slot.
    pub fn finish(self) -> &'a RecordBuffer {
        let buf = self.buf;
        put_u16(buf, OFF_FRAME_COUNT, self.frame_count as u16);
        buf[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&CRASH_RECORD_MAGIC);
        put_u16(buf, OFF_VERSION, CRASH_RECORD_SCHEMA_VERSION);
        buf[OFF_KIND] = self.kind as u8;
        buf[OFF_FLAGS] = self.flags;
        put_u32(buf, OFF_PAYLOAD_LEN, PAYLOAD_LEN);
        let checksum = record_checksum(buf);
        put_u32(buf, OFF_CHECKSUM, checksum);
        buf
    }
}

/// Encodes an already-built record, e.g. when re-persisting or in tests.
pub fn encode_record<'a>(record: &CrashRecord, buf: &'a mut RecordBuffer) -> &'a RecordBuffer {
    let mut encoder = RecordEncoder::new(buf, record.kind());
    encoder.timestamp(&record.timestamp);
    encoder.installed_at(record.installed_at_monotonic_ns);
    encoder.thread_id(record.thread.id);
    if let Some(name) = &record.thread.name {
        encoder.thread_name(name.as_bytes());
    }
    match &record.fault {
        Fault::UncaughtException { name, reason } => {
            encoder.exception_name(name);
            let _ = fmt::Write::write_str(&mut encoder.exception_reason(), reason);
        }
        Fault::FatalSignal {
            signo,
            si_code,
            fault_address,
        } => encoder.signal(*signo, *si_code, *fault_address),
    }
    encoder.process(&record.process);
    for frame in &record.frames {
        encoder.push_frame(*frame);
    }
    if record.frames_truncated {
        encoder.flags |= FLAG_FRAMES_TRUNCATED;
    }
    encoder.finish()
}

fn get_u16(slot: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([slot[offset], slot[offset + 1]])
}

fn get_u32(slot: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&slot[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn get_i32(slot: &[u8], offset: usize) -> i32 {
    get_u32(slot, offset) as i32
}

fn get_u64(slot: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&slot[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn get_string(slot: &[u8], area: StrArea) -> Result<String, DecodeError> {
    let len = get_u16(slot, area.offset) as usize;
    if len > area.capacity {
        return Err(DecodeError::InvalidStringLength {
            offset: area.offset,
            len,
        });
    }
    let start = area.offset + 2;
    Ok(String::from_utf8_lossy(&slot[start..start + len]).into_owned())
}

/// Validates and decodes one slot.
/// The schema version is checked before anything else in the payload, so a record written by a
/// future layout is reported as `UnsupportedVersion` rather than as corrupted.
pub fn decode_record(slot: &[u8]) -> Result<CrashRecord, DecodeError> {
    if slot.len() != CRASH_RECORD_SIZE {
        return Err(DecodeError::Truncated(slot.len()));
    }
    if slot_state(slot) != SlotState::Live {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&slot[OFF_MAGIC..OFF_MAGIC + 4]);
        return Err(DecodeError::BadMagic(magic));
    }
    let schema_version = get_u16(slot, OFF_VERSION);
    if schema_version != CRASH_RECORD_SCHEMA_VERSION {
        return Err(DecodeError::UnsupportedVersion(schema_version));
    }
    let payload_len = get_u32(slot, OFF_PAYLOAD_LEN);
    if payload_len != PAYLOAD_LEN {
        return Err(DecodeError::PayloadLength(payload_len));
    }
    let stored = get_u32(slot, OFF_CHECKSUM);
    let computed = record_checksum(slot);
    if stored != computed {
        return Err(DecodeError::ChecksumMismatch { stored, computed });
    }
    let kind = FaultKind::from_u8(slot[OFF_KIND])
        .ok_or(DecodeError::UnknownFaultKind(slot[OFF_KIND]))?;
    let flags = slot[OFF_FLAGS];

    let frame_count = get_u16(slot, OFF_FRAME_COUNT);
    if frame_count as usize > MAX_BACKTRACE_FRAMES {
        return Err(DecodeError::InvalidFrameCount(frame_count));
    }
    let frames = (0..frame_count as usize)
        .map(|i| {
            let offset = OFF_FRAMES + i * FRAME_LEN;
            let module_base = get_u64(slot, offset + 8);
            StackFrame {
                address: get_u64(slot, offset),
                module_base: (module_base != 0).then_some(module_base),
            }
        })
        .collect();

    let fault = match kind {
        FaultKind::UncaughtException => Fault::UncaughtException {
            name: get_string(slot, EXCEPTION_NAME)?,
            reason: get_string(slot, EXCEPTION_REASON)?,
        },
        FaultKind::FatalSignal => Fault::FatalSignal {
            signo: get_i32(slot, OFF_SIGNO),
            si_code: get_i32(slot, OFF_SI_CODE),
            fault_address: (flags & FLAG_HAS_FAULT_ADDRESS != 0)
                .then(|| get_u64(slot, OFF_FAULT_ADDRESS)),
        },
    };

    let thread_name = if flags & FLAG_HAS_THREAD_NAME != 0 {
        Some(get_string(slot, THREAD_NAME)?)
    } else {
        None
    };

    Ok(CrashRecord {
        schema_version,
        timestamp: CaptureTimestamp {
            monotonic_ns: get_u64(slot, OFF_MONOTONIC),
            wall_clock_ns: get_u64(slot, OFF_WALL_CLOCK),
        },
        installed_at_monotonic_ns: get_u64(slot, OFF_INSTALLED_AT),
        fault,
        frames,
        frames_truncated: flags & FLAG_FRAMES_TRUNCATED != 0,
        thread: ThreadInfo {
            id: get_u64(slot, OFF_THREAD_ID),
            name: thread_name,
        },
        process: ProcessMetadata {
            app_version: get_string(slot, APP_VERSION)?,
            os_version: get_string(slot, OS_VERSION)?,
            device_model: get_string(slot, DEVICE_MODEL)?,
            pid: get_u32(slot, OFF_PID),
        },
    })
}

/// Overwrites the schema version of an encoded slot. The checksum is left stale, which is fine
/// since the version is checked first.
#[cfg(test)]
pub(crate) fn set_schema_version(buf: &mut RecordBuffer, version: u16) {
    put_u16(buf, OFF_VERSION, version);
}
