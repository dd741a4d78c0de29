// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The panic hook is the uncaught-exception handler of a Rust program.
//!
//! A hook cannot tell whether the unwind will be caught, so only panics that end the process are
//! recorded: a panic on the main thread when unwinding, or any panic when the program is built
//! with `panic = "abort"`. In the abort case the record is staged and persisted by the SIGABRT
//! handler if SIGABRT is monitored, which keeps the failure to a single record. The previous hook
//! always runs afterwards.

use super::emitters::{capture_panic, PanicDisposition};
use super::signal_handler_manager;
use std::panic::{self, PanicHookInfo};
use std::ptr;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering::SeqCst;

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

// Either null or a pointer from `Box::into_raw`.
static PREVIOUS_PANIC_HOOK: AtomicPtr<PanicHook> = AtomicPtr::new(ptr::null_mut());

/// Registers the crash-capturing panic hook, keeping the current one for chaining.
/// Registering twice is a no-op.
pub(crate) fn install() {
    if is_installed() {
        return;
    }
    let old_hook = panic::take_hook();
    let old_hook_ptr = Box::into_raw(Box::new(old_hook));
    PREVIOUS_PANIC_HOOK.store(old_hook_ptr, SeqCst);
    panic::set_hook(Box::new(|panic_info| {
        let disposition = panic_disposition(
            is_main_thread(),
            cfg!(panic = "abort"),
            signal_handler_manager::is_monitored(libc::SIGABRT),
        );
        // Capture errors are dropped: the previous hook always runs.
        let _ = capture_panic(panic_info, disposition);
        call_previous_panic_hook(panic_info);
    }));
}

/// Puts back the hook that was active before `install`.
pub(crate) fn uninstall() {
    let old_hook_ptr = PREVIOUS_PANIC_HOOK.swap(ptr::null_mut(), SeqCst);
    if old_hook_ptr.is_null() {
        return;
    }
    // SAFETY: the pointer can only come from `Box::into_raw` in `install`. The hook closure
    // installed there is replaced below, before anything else can borrow the pointer again.
    let old_hook = unsafe { Box::from_raw(old_hook_ptr) };
    panic::set_hook(*old_hook);
}

pub(crate) fn is_installed() -> bool {
    !PREVIOUS_PANIC_HOOK.load(SeqCst).is_null()
}

fn panic_disposition(
    on_main_thread: bool,
    aborts_on_panic: bool,
    abort_monitored: bool,
) -> PanicDisposition {
    match (aborts_on_panic, abort_monitored, on_main_thread) {
        (true, true, _) => PanicDisposition::StageForAbort,
        (true, false, _) => PanicDisposition::Persist,
        (false, _, true) => PanicDisposition::Persist,
        (false, _, false) => PanicDisposition::Ignore,
    }
}

fn is_main_thread() -> bool {
    std::thread::current().name() == Some("main")
}

fn call_previous_panic_hook(panic_info: &PanicHookInfo<'_>) {
    let old_hook_ptr = PREVIOUS_PANIC_HOOK.load(SeqCst);
    if !old_hook_ptr.is_null() {
        // SAFETY: the pointer comes from `Box::into_raw` in `install`. It is only freed by
        // `uninstall`, which first replaces this hook.
        unsafe {
            let old_hook = &*old_hook_ptr;
            old_hook(panic_info);
        }
    }
}
