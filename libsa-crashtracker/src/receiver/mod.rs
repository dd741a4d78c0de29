// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs on the launch after a crash: reads the records left in the store and reports them.

mod event;
mod loader;

pub use event::{EventSink, IngestError, QueueSink, RecoveredEvent};
pub use loader::{CrashReportLoader, DrainSummary};
