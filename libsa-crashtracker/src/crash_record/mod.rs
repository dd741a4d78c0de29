// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod codec;
mod metadata;
mod sig_info;

pub use codec::*;
pub use metadata::ProcessMetadata;
pub use sig_info::*;

use crate::shared::constants::CRASH_RECORD_SCHEMA_VERSION;
use chrono::{DateTime, Utc};
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromPrimitive, ToPrimitive)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum FaultKind {
    UncaughtException = 1,
    FatalSignal = 2,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::UncaughtException => "uncaught-exception",
            FaultKind::FatalSignal => "fatal-signal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    UncaughtException {
        name: String,
        reason: String,
    },
    FatalSignal {
        signo: i32,
        si_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fault_address: Option<u64>,
    },
}

impl Fault {
    pub fn kind(&self) -> FaultKind {
        match self {
            Fault::UncaughtException { .. } => FaultKind::UncaughtException,
            Fault::FatalSignal { .. } => FaultKind::FatalSignal,
        }
    }
}

/// Both clocks are read with `clock_gettime`, which is async-signal-safe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTimestamp {
    pub monotonic_ns: u64,
    pub wall_clock_ns: u64,
}

impl CaptureTimestamp {
    pub fn now() -> Self {
        Self {
            monotonic_ns: clock_ns(libc::CLOCK_MONOTONIC),
            wall_clock_ns: clock_ns(libc::CLOCK_REALTIME),
        }
    }

    pub fn wall_clock(&self) -> Option<DateTime<Utc>> {
        let secs = (self.wall_clock_ns / 1_000_000_000) as i64;
        let nanos = (self.wall_clock_ns % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos)
    }
}

/// Reads `clock` and returns its value in nanoseconds, or 0 if the clock is unavailable.
pub(crate) fn clock_ns(clock: libc::clockid_t) -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    if unsafe { libc::clock_gettime(clock, &mut ts) } != 0 {
        return 0;
    }
    (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Instruction address of the frame (return address for all but the innermost frame).
    pub address: u64,
    /// Base address of the module owning `address`, when the unwinder knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_base: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A crash as captured in the faulting process and read back on the next launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecord {
    pub schema_version: u16,
    pub timestamp: CaptureTimestamp,
    pub installed_at_monotonic_ns: u64,
    pub fault: Fault,
    pub frames: Vec<StackFrame>,
    pub frames_truncated: bool,
    pub thread: ThreadInfo,
    pub process: ProcessMetadata,
}

impl CrashRecord {
    pub fn new(fault: Fault, process: ProcessMetadata) -> Self {
        Self {
            schema_version: CRASH_RECORD_SCHEMA_VERSION,
            timestamp: CaptureTimestamp::default(),
            installed_at_monotonic_ns: 0,
            fault,
            frames: vec![],
            frames_truncated: false,
            thread: ThreadInfo::default(),
            process,
        }
    }

    pub fn kind(&self) -> FaultKind {
        self.fault.kind()
    }

    /// Time between arming the handlers and the crash, if both clocks were readable.
    pub fn uptime(&self) -> Option<Duration> {
        if self.installed_at_monotonic_ns == 0 || self.timestamp.monotonic_ns == 0 {
            return None;
        }
        self.timestamp
            .monotonic_ns
            .checked_sub(self.installed_at_monotonic_ns)
            .map(Duration::from_nanos)
    }
}
