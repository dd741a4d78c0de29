// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::emitters::{self, capture_signal};
use super::signal_handler_manager::{chain_signal_handler, handlers_armed};
use crate::crash_record::ProcessMetadata;
use libc::{c_void, siginfo_t, ucontext_t};

// Note that this file makes use the following async-signal safe functions in a signal handler.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
// - raise
// - sigaction
// plus whatever `emitters::capture_signal` uses.

pub(crate) extern "C" fn handle_posix_sigaction(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    if handlers_armed() {
        // Capture errors are never reported from here: the record is dropped and the chain runs.
        // SAFETY: the pointers come straight from the kernel.
        let _ = unsafe { capture_signal(signum, sig_info, ucontext as *const ucontext_t) };
    }
    // SAFETY: No preconditions.
    unsafe { chain_signal_handler(signum, sig_info, ucontext) };
}

/// Updates the process metadata copied into crash records.
///
/// PRECONDITIONS:
///     The handlers are installed; otherwise this is a no-op.
/// ATOMICITY:
///     Captures are disarmed for the duration of the swap. A crash in that window is not
///     recorded, but is still chained.
pub(crate) fn update_metadata(metadata: ProcessMetadata) {
    if let Some(mut arena) = emitters::withdraw_arena() {
        arena.set_metadata(metadata);
        emitters::publish_arena(arena);
    }
}
