// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a crash capture is already in progress")]
pub struct CaptureInProgress;

/// Marks a capture as in progress for as long as it is alive.
/// A fault raised while a capture is running (nested or on another thread) cannot take it.
pub(crate) struct AtomGuard<'a> {
    counter: &'a AtomicU64,
}

impl<'a> AtomGuard<'a> {
    pub(crate) fn new(counter: &'a AtomicU64) -> Result<Self, CaptureInProgress> {
        // A CAS from 0 to 1, so that two threads can never both see the counter free.
        counter
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| AtomGuard { counter })
            .map_err(|_| CaptureInProgress)
    }
}

impl Drop for AtomGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
