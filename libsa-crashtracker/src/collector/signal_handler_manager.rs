// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::crash_handler::{self, handle_posix_sigaction};
use super::emitters::{self, CaptureArena};
use super::panic_hook;
use crate::crash_record::ProcessMetadata;
use crate::shared::configuration::CrashtrackerConfiguration;
use crate::signal_from_signum;
use libc::{
    c_void, mmap, sigaltstack, siginfo_t, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ,
    PROT_WRITE, SIGSTKSZ,
};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler};
use std::ptr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use tracing::{debug, warn};

// Linux seems to have the most, supporting up to 64 inclusive
// https://man7.org/linux/man-pages/man7/signal.7.html
const MAX_SIGNALS: usize = 65;

// Lock-free copy of the chain for the signal handler. Only written by the registry that holds
// `REGISTRY_CLAIMED`, outside of any signal handler.
static mut HANDLERS: [Option<(signal::Signal, SigAction)>; MAX_SIGNALS] = [None; MAX_SIGNALS];
static ARMED: AtomicBool = AtomicBool::new(false);
static REGISTRY_CLAIMED: AtomicBool = AtomicBool::new(false);
static ALT_STACK_CREATED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("crash handlers are already owned by another registry")]
    AlreadyClaimed,
    #[error("signal {0} cannot be monitored")]
    UnsupportedSignal(i32),
}

/// A refused `install`. The arena is handed back so that its segment can be released.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct InstallError {
    #[source]
    pub error: RegistryError,
    pub arena: CaptureArena,
}

/// Owns the crash handlers of the process while they are installed: the previous signal
/// actions, the previous panic hook and the capture arena.
///
/// Only one registry can be installed at a time in a process.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    claimed: bool,
    previous: Vec<(signal::Signal, SigAction)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_installed(&self) -> bool {
        self.claimed
    }

    /// Signals currently routed through the crash handler.
    pub fn monitored_signals(&self) -> Vec<i32> {
        self.previous.iter().map(|(signal, _)| *signal as i32).collect()
    }

    /// Installs the signal handlers and the panic hook and arms `arena` for captures.
    ///
    /// Installing an installed registry is a no-op; `arena` is then handed back. So is
    /// `arena` on error.
    /// A signal the OS refuses is left unmonitored and the remaining ones are still installed.
    ///
    /// ATOMICITY:
    ///     Setting the crash handler itself is not an atomic operation. A signal delivered
    ///     between `sigaction` and the update of the chain table falls back to the default action.
    pub fn install(
        &mut self,
        config: &CrashtrackerConfiguration,
        arena: CaptureArena,
    ) -> Result<Option<CaptureArena>, InstallError> {
        if self.claimed {
            return Ok(Some(arena));
        }
        if let Some(signum) = config
            .signals()
            .iter()
            .find(|signum| **signum <= 0 || **signum >= MAX_SIGNALS as i32)
        {
            return Err(InstallError {
                error: RegistryError::UnsupportedSignal(*signum),
                arena,
            });
        }
        if REGISTRY_CLAIMED
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_err()
        {
            return Err(InstallError {
                error: RegistryError::AlreadyClaimed,
                arena,
            });
        }
        self.claimed = true;

        if config.create_alt_stack() && !ALT_STACK_CREATED.load(SeqCst) {
            // SAFETY: no documented preconditions.
            match unsafe { create_alt_stack() } {
                Ok(()) => ALT_STACK_CREATED.store(true, SeqCst),
                Err(e) => warn!(error = %e, "Unable to create the alternate signal stack"),
            }
        }

        // Captures must find the arena as soon as the first handler is in place.
        if let Some(stale) = emitters::publish_arena(Box::new(arena)) {
            debug!(segment = ?stale.writer().path(), "Replaced a stale capture arena");
        }

        for signum in config.signals() {
            // SAFETY: this registry holds the claim, nothing else mutates the signal actions.
            match unsafe { register_signal_handler(*signum, config.use_alt_stack()) } {
                Ok(Some((signal, old))) => {
                    // SAFETY: only the claim holder writes `HANDLERS`. The handler only copies
                    // entries out.
                    unsafe { HANDLERS[*signum as usize] = Some((signal, old)) };
                    self.previous.push((signal, old));
                }
                Ok(None) => debug!(signum, "Crash handler already installed, skipping"),
                Err(e) => warn!(signum, error = %e, "Unable to monitor signal"),
            }
        }
        ARMED.store(true, SeqCst);
        panic_hook::install();
        debug!(signals = ?self.monitored_signals(), "Crash handlers installed");
        Ok(None)
    }

    /// Restores the previous signal actions and panic hook and disarms captures.
    /// Returns the arena so that its segment can be released. No-op if not installed.
    pub fn uninstall(&mut self) -> Option<CaptureArena> {
        if !self.claimed {
            return None;
        }
        panic_hook::uninstall();
        for (signal, old) in self.previous.drain(..) {
            // SAFETY: restores an action previously returned by `sigaction`.
            if let Err(e) = unsafe { signal::sigaction(signal, &old) } {
                warn!(signal = %signal, error = %e, "Unable to restore previous signal action");
            }
        }
        ARMED.store(false, SeqCst);
        for signum in 0..MAX_SIGNALS {
            // SAFETY: see `install`.
            unsafe { HANDLERS[signum] = None };
        }
        let arena = emitters::withdraw_arena();
        REGISTRY_CLAIMED.store(false, SeqCst);
        self.claimed = false;
        debug!("Crash handlers uninstalled");
        arena.map(|arena| *arena)
    }

    /// Refreshes the process metadata copied into future records.
    pub fn update_metadata(&mut self, metadata: ProcessMetadata) {
        if self.claimed {
            crash_handler::update_metadata(metadata);
        }
    }
}

/// Whether the handlers are fully installed. Captures are skipped while they are not.
pub(crate) fn handlers_armed() -> bool {
    ARMED.load(SeqCst)
}

/// Whether `signum` is currently routed through the crash handler.
pub(crate) fn is_monitored(signum: i32) -> bool {
    if !ARMED.load(SeqCst) || signum <= 0 || signum >= MAX_SIGNALS as i32 {
        return false;
    }
    // SAFETY: the entry is only written by the claim holder.
    unsafe { HANDLERS[signum as usize] }.is_some()
}

impl Drop for HandlerRegistry {
    fn drop(&mut self) {
        if self.claimed {
            warn!("Crash handler registry dropped while installed, uninstalling");
            self.uninstall();
        }
    }
}

/// Once we've handled the signal, chain to the previous handler.
///
/// How we chain depends on what kind of handler we're chaining to.
/// https://www.gnu.org/software/libc/manual/html_node/Signal-Handling.html
/// https://man7.org/linux/man-pages/man2/sigaction.2.html
pub(crate) unsafe fn chain_signal_handler(
    signum: i32,
    sig_info: *mut siginfo_t,
    ucontext: *mut c_void,
) {
    let entry = if signum > 0 && signum < MAX_SIGNALS as i32 {
        // SAFETY: the entry is copied out; it is only written outside of signal handlers.
        unsafe { HANDLERS[signum as usize] }
    } else {
        None
    };
    let Some((signal, sigaction)) = entry else {
        // Crashed while the handlers were being (un)installed: the previous action is unknown.
        // SAFETY: no preconditions.
        unsafe { restore_default_and_raise(signum) };
        return;
    };
    match sigaction.handler() {
        SigHandler::SigDfl => {
            // In the case of a default handler, we want to invoke it so that the core-dump can be
            // generated. Restoring the handler then re-raising the signal accomplishes that.
            // SAFETY: restores an action previously returned by `sigaction`.
            if unsafe { signal::sigaction(signal, &sigaction) }.is_err() {
                // SAFETY: no preconditions.
                unsafe { restore_default_and_raise(signum) };
                return;
            }
            // Signals are only delivered once. A faulting instruction re-raises on return, but a
            // signal sent with `raise`/`kill` has to be sent again.
            // SAFETY: no preconditions.
            unsafe { libc::raise(signum) };
        }
        SigHandler::SigIgn => (),
        SigHandler::Handler(f) => f(signum),
        SigHandler::SigAction(f) => f(signum, sig_info, ucontext),
    }
}

unsafe fn restore_default_and_raise(signum: i32) {
    // SAFETY: `signal` and `raise` are async-signal-safe.
    unsafe {
        libc::signal(signum, libc::SIG_DFL);
        libc::raise(signum);
    }
}

/// Allocates a signal altstack, and puts a guard page at the end.
/// Inspired by https://github.com/rust-lang/rust/pull/69969/files
unsafe fn create_alt_stack() -> anyhow::Result<()> {
    // The greater of 16 pages or SIGSTKSZ: the default SIGSTKSZ (8KB) is too small to walk a
    // stack after a stack overflow.
    let page_size = page_size::get();
    let sigalstack_base_size = std::cmp::max(SIGSTKSZ, 16 * page_size);
    // SAFETY: anonymous private mapping, no file involved.
    let stackp = unsafe {
        mmap(
            ptr::null_mut(),
            sigalstack_base_size + page_size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANON,
            -1,
            0,
        )
    };
    anyhow::ensure!(
        stackp != MAP_FAILED,
        "failed to allocate an alternative stack"
    );
    // SAFETY: the first page belongs to the mapping above.
    let guard_result = unsafe { libc::mprotect(stackp, page_size, PROT_NONE) };
    anyhow::ensure!(
        guard_result == 0,
        "failed to set up alternative stack guard page"
    );
    // SAFETY: the mapping is `page_size` bytes larger than the stack.
    let stackp = unsafe { stackp.add(page_size) };

    let stack = libc::stack_t {
        ss_sp: stackp,
        ss_flags: 0,
        ss_size: sigalstack_base_size,
    };
    // SAFETY: `stack` describes a valid mapping that is never unmapped.
    let rval = unsafe { sigaltstack(&stack, ptr::null_mut()) };
    anyhow::ensure!(rval == 0, "sigaltstack failed {rval}");
    Ok(())
}

/// Points `signum` at the crash handler and returns the action it replaced.
/// Returns `None` (and leaves the signal alone) if the crash handler was already installed.
unsafe fn register_signal_handler(
    signum: i32,
    use_alt_stack: bool,
) -> anyhow::Result<Option<(signal::Signal, SigAction)>> {
    let signal_type = signal_from_signum(signum)?;

    // Runtimes that set up their own altstack expect handlers to run on it; faults caused by a
    // stack overflow can only be handled there.
    let extra_saflags = if use_alt_stack {
        SaFlags::SA_ONSTACK
    } else {
        SaFlags::empty()
    };

    let sig_action = SigAction::new(
        SigHandler::SigAction(handle_posix_sigaction),
        SaFlags::SA_NODEFER | extra_saflags,
        signal::SigSet::empty(),
    );

    // SAFETY: `handle_posix_sigaction` only calls async-signal-safe code.
    let old_handler = unsafe { signal::sigaction(signal_type, &sig_action)? };
    if is_crash_handler(&old_handler) {
        // SAFETY: puts back the action that was just replaced.
        unsafe { signal::sigaction(signal_type, &old_handler)? };
        return Ok(None);
    }
    Ok(Some((signal_type, old_handler)))
}

fn is_crash_handler(action: &SigAction) -> bool {
    type SigActionFn = extern "C" fn(libc::c_int, *mut siginfo_t, *mut c_void);
    match action.handler() {
        SigHandler::SigAction(f) => f as usize == handle_posix_sigaction as SigActionFn as usize,
        _ => false,
    }
}
