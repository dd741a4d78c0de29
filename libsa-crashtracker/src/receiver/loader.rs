// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::event::{EventSink, RecoveredEvent};
use crate::store::{PendingCrashStore, RetentionPolicy, StoreError};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome of one drain of the pending-crash store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    /// Records turned into events and accepted by the sink.
    pub delivered: usize,
    /// Records that could not be read, or were pruned by the retention policy.
    pub discarded: usize,
    /// Records left on disk for a later launch.
    pub retained: usize,
}

/// Turns the crash records left behind by earlier runs into events.
#[derive(Debug, Default)]
pub struct CrashReportLoader {
    retention: RetentionPolicy,
}

impl CrashReportLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self { retention }
    }

    /// Prunes the store, then delivers every pending record to `sink` in write order.
    ///
    /// Unreadable records are discarded. Delivery stops at the first record the sink refuses;
    /// that record and the ones after it stay in the store. Without a sink the store is only
    /// pruned.
    pub fn run(
        &self,
        store: &PendingCrashStore,
        sink: Option<&dyn EventSink>,
    ) -> Result<DrainSummary, StoreError> {
        let mut summary = DrainSummary {
            discarded: store.prune(&self.retention)?,
            ..Default::default()
        };

        let pending = store.pending()?;
        let Some(sink) = sink else {
            summary.retained = pending.len();
            debug!(retained = summary.retained, "No event sink, crash records kept");
            return Ok(summary);
        };

        let mut entries = pending.into_iter();
        for entry in entries.by_ref() {
            let record = match entry.record {
                Ok(record) => record,
                Err(e) => {
                    warn!(entry = ?entry.id, error = %e, "Discarding unreadable crash record");
                    store.remove(&entry.id)?;
                    summary.discarded += 1;
                    continue;
                }
            };
            let event = RecoveredEvent::from_record(&record);
            match sink.accept(event) {
                Ok(()) => {
                    store.remove(&entry.id)?;
                    summary.delivered += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Event sink refused a crash event, retrying on next launch");
                    summary.retained += 1;
                    break;
                }
            }
        }
        summary.retained += entries.count();

        if summary != DrainSummary::default() {
            info!(
                delivered = summary.delivered,
                discarded = summary.discarded,
                retained = summary.retained,
                "Recovered crash reports"
            );
        }
        Ok(summary)
    }
}
