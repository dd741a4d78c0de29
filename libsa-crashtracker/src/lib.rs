// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Crash and uncaught-panic capture for analytics-instrumented applications.
//!
//! Architecturally, it consists of two parts that never run in the same process instance:
//! 1. The collector installs handlers for the fatal signals and a panic hook. When the program
//!    faults, the handler runs under a constrained environment where many standard operations
//!    are illegal.
//!    https://man7.org/linux/man-pages/man7/signal-safety.7.html
//!    In particular, memory allocation, and synchronization such as mutexes are potentially UB.
//!    The handler therefore only fills a buffer allocated in advance and appends it, with a
//!    single `write`, to a segment file that was opened in advance. It then chains to whatever
//!    handler was installed before, so the process terminates (or not) exactly as it would have
//!    without crash tracking.
//! 2. On the next launch, the receiver reads the records left in the store, turns each of them
//!    into an `AppCrashed` analytics event, hands it to the ingestion pipeline of the host SDK
//!    and deletes it.
//!
//! `ExceptionManager` ties both together behind the module protocol of the host SDK.
//! Crash tracking is off unless `enableTrackAppCrash` is set.
#![cfg(unix)]

#[cfg(feature = "collector")]
pub mod collector;
pub mod crash_record;
#[cfg(all(feature = "collector", feature = "receiver"))]
mod manager;
#[cfg(feature = "receiver")]
pub mod receiver;
mod shared;
pub mod store;

#[cfg(feature = "collector")]
pub use collector::{CaptureArena, HandlerRegistry, InstallError, RegistryError};
pub use crash_record::{
    default_signals, signal_from_signum, CaptureTimestamp, CrashRecord, DecodeError, Fault,
    FaultKind, ProcessMetadata, SignalNames, StackFrame, ThreadInfo,
};
#[cfg(all(feature = "collector", feature = "receiver"))]
pub use manager::{
    ExceptionManager, ExceptionModule, ManagerError, ManagerState, EXCEPTION_MODULE_NAME,
};
#[cfg(feature = "receiver")]
pub use receiver::{
    CrashReportLoader, DrainSummary, EventSink, IngestError, QueueSink, RecoveredEvent,
};
pub use shared::configuration::{
    default_store_dir, ConfigurationError, CrashtrackerConfiguration, ExceptionOptions,
};
pub use shared::constants;
pub use store::{PendingCrashStore, RetentionPolicy, StoreError};
