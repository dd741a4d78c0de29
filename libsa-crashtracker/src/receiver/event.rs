// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::crash_record::{CrashRecord, Fault, SignalNames, StackFrame};
use crate::shared::constants::APP_CRASHED_EVENT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::fmt::Write;
use std::sync::Mutex;

/// Analytics event built from a recovered crash record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveredEvent {
    pub name: String,
    pub time: DateTime<Utc>,
    pub properties: Map<String, Value>,
}

impl RecoveredEvent {
    /// Maps a crash record to an `AppCrashed` event.
    /// The event time is the wall clock time of the crash, or now if it was not readable.
    pub fn from_record(record: &CrashRecord) -> Self {
        let time = record.timestamp.wall_clock().unwrap_or_else(Utc::now);
        let mut properties = Map::new();
        properties.insert("app_crashed_reason".to_string(), json!(crashed_reason(record)));
        properties.insert("crash_kind".to_string(), json!(record.kind().as_str()));
        match &record.fault {
            Fault::UncaughtException { name, reason } => {
                properties.insert("exception_name".to_string(), json!(name));
                properties.insert("exception_reason".to_string(), json!(reason));
            }
            Fault::FatalSignal {
                signo,
                si_code,
                fault_address,
            } => {
                properties.insert("signal_number".to_string(), json!(signo));
                properties.insert(
                    "signal_name".to_string(),
                    json!(SignalNames::from(*signo).as_str()),
                );
                properties.insert("signal_code".to_string(), json!(si_code));
                if let Some(address) = fault_address {
                    properties.insert("fault_address".to_string(), json!(hex(*address)));
                }
            }
        }
        properties.insert("thread_id".to_string(), json!(record.thread.id));
        if let Some(name) = &record.thread.name {
            properties.insert("thread_name".to_string(), json!(name));
        }
        let frames: Vec<Value> = record.frames.iter().map(frame_json).collect();
        properties.insert("stack_frames".to_string(), Value::Array(frames));
        properties.insert("stack_truncated".to_string(), json!(record.frames_truncated));
        properties.insert("app_version".to_string(), json!(record.process.app_version));
        properties.insert("os_version".to_string(), json!(record.process.os_version));
        properties.insert("device_model".to_string(), json!(record.process.device_model));
        properties.insert("process_id".to_string(), json!(record.process.pid));
        if let Some(uptime) = record.uptime() {
            properties.insert("app_uptime_ms".to_string(), json!(uptime.as_millis() as u64));
        }
        properties.insert(
            "crash_id".to_string(),
            json!(crash_id(record).to_string()),
        );
        properties.insert(
            "record_schema_version".to_string(),
            json!(record.schema_version),
        );
        Self {
            name: APP_CRASHED_EVENT.to_string(),
            time,
            properties,
        }
    }
}

/// Stable id of a crash: the same record always maps to the same id, so a record delivered again
/// after an interrupted drain can be deduplicated downstream.
fn crash_id(record: &CrashRecord) -> uuid::Uuid {
    let mut name = [0u8; 28];
    name[..8].copy_from_slice(&record.timestamp.wall_clock_ns.to_le_bytes());
    name[8..16].copy_from_slice(&record.timestamp.monotonic_ns.to_le_bytes());
    name[16..20].copy_from_slice(&record.process.pid.to_le_bytes());
    name[20..].copy_from_slice(&record.thread.id.to_le_bytes());
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, &name)
}

impl From<&CrashRecord> for RecoveredEvent {
    fn from(record: &CrashRecord) -> Self {
        Self::from_record(record)
    }
}

fn hex(value: u64) -> String {
    format!("{value:#018x}")
}

fn frame_json(frame: &StackFrame) -> Value {
    let mut object = Map::new();
    object.insert("address".to_string(), json!(hex(frame.address)));
    if let Some(base) = frame.module_base {
        object.insert("module_base".to_string(), json!(hex(base)));
    }
    Value::Object(object)
}

/// Human readable summary: the fault followed by the raw stack listing.
fn crashed_reason(record: &CrashRecord) -> String {
    let mut reason = String::new();
    // Writing to a String cannot fail.
    let _ = match &record.fault {
        Fault::UncaughtException { name, reason: why } => {
            writeln!(reason, "Exception Name:{name}\nException Reason:{why}")
        }
        Fault::FatalSignal { signo, .. } => writeln!(
            reason,
            "Signal {} was raised.",
            SignalNames::from(*signo).as_str()
        ),
    };
    reason.push_str("Exception Stack:\n");
    for (index, frame) in record.frames.iter().enumerate() {
        let _ = match frame.module_base {
            Some(base) => writeln!(reason, "{index} {} ({})", hex(frame.address), hex(base)),
            None => writeln!(reason, "{index} {}", hex(frame.address)),
        };
    }
    if record.frames_truncated {
        reason.push_str("...\n");
    }
    reason
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("event rejected by the sink: {0}")]
    Rejected(String),
    #[error("event sink unavailable: {0}")]
    Unavailable(String),
}

/// The ingestion pipeline of the host SDK.
///
/// `accept` takes ownership of the event. Returning an error keeps the crash record (and every
/// record after it) on disk for a later launch.
pub trait EventSink: Send + Sync {
    fn accept(&self, event: RecoveredEvent) -> Result<(), IngestError>;
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    fn accept(&self, event: RecoveredEvent) -> Result<(), IngestError> {
        (**self).accept(event)
    }
}

/// Sink that keeps events in memory until the host pulls them with `take_events`.
#[derive(Debug, Default)]
pub struct QueueSink {
    events: Mutex<VecDeque<RecoveredEvent>>,
}

impl QueueSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_events(&self) -> Vec<RecoveredEvent> {
        match self.events.lock() {
            Ok(mut events) => events.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for QueueSink {
    fn accept(&self, event: RecoveredEvent) -> Result<(), IngestError> {
        self.events
            .lock()
            .map_err(|_| IngestError::Unavailable("event queue poisoned".to_string()))?
            .push_back(event);
        Ok(())
    }
}
