// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms, non_camel_case_types)]
#[repr(C)]
/// See <https://man7.org/linux/man-pages/man7/signal.7.html>
pub enum SignalNames {
    SIGHUP,
    SIGINT,
    SIGQUIT,
    SIGILL,
    SIGTRAP,
    SIGABRT,
    SIGBUS,
    SIGFPE,
    SIGKILL,
    SIGUSR1,
    SIGSEGV,
    SIGUSR2,
    SIGPIPE,
    SIGALRM,
    SIGTERM,
    SIGSYS,
    UNKNOWN,
}

impl SignalNames {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalNames::SIGHUP => "SIGHUP",
            SignalNames::SIGINT => "SIGINT",
            SignalNames::SIGQUIT => "SIGQUIT",
            SignalNames::SIGILL => "SIGILL",
            SignalNames::SIGTRAP => "SIGTRAP",
            SignalNames::SIGABRT => "SIGABRT",
            SignalNames::SIGBUS => "SIGBUS",
            SignalNames::SIGFPE => "SIGFPE",
            SignalNames::SIGKILL => "SIGKILL",
            SignalNames::SIGUSR1 => "SIGUSR1",
            SignalNames::SIGSEGV => "SIGSEGV",
            SignalNames::SIGUSR2 => "SIGUSR2",
            SignalNames::SIGPIPE => "SIGPIPE",
            SignalNames::SIGALRM => "SIGALRM",
            SignalNames::SIGTERM => "SIGTERM",
            SignalNames::SIGSYS => "SIGSYS",
            SignalNames::UNKNOWN => "UNKNOWN",
        }
    }
}

impl From<libc::c_int> for SignalNames {
    fn from(value: libc::c_int) -> Self {
        match value {
            libc::SIGHUP => SignalNames::SIGHUP,
            libc::SIGINT => SignalNames::SIGINT,
            libc::SIGQUIT => SignalNames::SIGQUIT,
            libc::SIGILL => SignalNames::SIGILL,
            libc::SIGTRAP => SignalNames::SIGTRAP,
            libc::SIGABRT => SignalNames::SIGABRT,
            libc::SIGBUS => SignalNames::SIGBUS,
            libc::SIGFPE => SignalNames::SIGFPE,
            libc::SIGKILL => SignalNames::SIGKILL,
            libc::SIGUSR1 => SignalNames::SIGUSR1,
            libc::SIGSEGV => SignalNames::SIGSEGV,
            libc::SIGUSR2 => SignalNames::SIGUSR2,
            libc::SIGPIPE => SignalNames::SIGPIPE,
            libc::SIGALRM => SignalNames::SIGALRM,
            libc::SIGTERM => SignalNames::SIGTERM,
            libc::SIGSYS => SignalNames::SIGSYS,
            _ => SignalNames::UNKNOWN,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unexpected signal number {0}")]
pub struct UnexpectedSignal(pub libc::c_int);

/// Converts a signum into a Signal.  Can't use the from trait because we don't own either type.
/// Only signals that can meaningfully be caught to observe a crash are accepted.
pub fn signal_from_signum(
    value: libc::c_int,
) -> Result<nix::sys::signal::Signal, UnexpectedSignal> {
    use nix::sys::signal::Signal;
    let rval = match value {
        libc::SIGHUP => Signal::SIGHUP,
        libc::SIGINT => Signal::SIGINT,
        libc::SIGQUIT => Signal::SIGQUIT,
        libc::SIGILL => Signal::SIGILL,
        libc::SIGTRAP => Signal::SIGTRAP,
        libc::SIGABRT => Signal::SIGABRT,
        libc::SIGBUS => Signal::SIGBUS,
        libc::SIGFPE => Signal::SIGFPE,
        libc::SIGUSR1 => Signal::SIGUSR1,
        libc::SIGSEGV => Signal::SIGSEGV,
        libc::SIGUSR2 => Signal::SIGUSR2,
        libc::SIGPIPE => Signal::SIGPIPE,
        libc::SIGALRM => Signal::SIGALRM,
        libc::SIGTERM => Signal::SIGTERM,
        libc::SIGSYS => Signal::SIGSYS,
        _ => return Err(UnexpectedSignal(value)),
    };
    Ok(rval)
}

/// Signals that terminate the process because of a fault in the program.
pub fn default_signals() -> Vec<libc::c_int> {
    vec![
        libc::SIGABRT,
        libc::SIGBUS,
        libc::SIGFPE,
        libc::SIGILL,
        libc::SIGSEGV,
        libc::SIGTRAP,
    ]
}
