// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! This crate tests the crash tracker end to end: `crashing_app` arms it and then dies in the
//! way selected by its `CrashMode`, and the tests in `tests/` drain what it left in the store, the
//! way the next launch of a real application would.

use std::fmt;
use std::path::Path;
use std::process;
use std::str::FromStr;

use libsa_crashtracker::{
    CrashReportLoader, DrainSummary, PendingCrashStore, QueueSink, RecoveredEvent,
};

/// Name of the file the `chained` mode's own SIGSEGV handler creates in the output directory.
pub const CHAINED_HANDLER_MARKER: &str = "chained_handler_ran";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashMode {
    /// Exits normally.
    NoCrash,
    /// Dereferences a null pointer.
    Segfault,
    /// Segfaults below a stack deeper than what is recorded.
    DeepSegfault,
    /// Uncaught panic on the main thread.
    Panic,
    /// `std::process::abort`.
    Abort,
    /// Segfaults with a SIGSEGV handler installed before the crash tracker.
    Chained,
    /// Segfaults with crash tracking configured but disabled.
    Disabled,
}

impl CrashMode {
    pub const ALL: [CrashMode; 7] = [
        CrashMode::NoCrash,
        CrashMode::Segfault,
        CrashMode::DeepSegfault,
        CrashMode::Panic,
        CrashMode::Abort,
        CrashMode::Chained,
        CrashMode::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrashMode::NoCrash => "no_crash",
            CrashMode::Segfault => "segfault",
            CrashMode::DeepSegfault => "deep_segfault",
            CrashMode::Panic => "panic",
            CrashMode::Abort => "abort",
            CrashMode::Chained => "chained",
            CrashMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for CrashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrashMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrashMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown mode: {s}"))
    }
}

/// Runs `app` in `mode` against the store in `store_dir` and waits for it to die.
pub fn run_crashing_app(
    app: &str,
    mode: CrashMode,
    store_dir: &Path,
    output_dir: &Path,
) -> anyhow::Result<process::ExitStatus> {
    let status = process::Command::new(app)
        .arg(mode.as_str())
        .arg(store_dir)
        .arg(output_dir)
        .env("RUST_BACKTRACE", "0")
        .stdout(process::Stdio::null())
        .stderr(process::Stdio::null())
        .status()?;
    Ok(status)
}

/// Reports what the crashing runs left behind, as the next launch of the app would.
pub fn drain_store(store_dir: &Path) -> anyhow::Result<(DrainSummary, Vec<RecoveredEvent>)> {
    let store = PendingCrashStore::open(store_dir)?;
    let sink = QueueSink::new();
    let summary = CrashReportLoader::new().run(&store, Some(&sink))?;
    Ok((summary, sink.take_events()))
}
