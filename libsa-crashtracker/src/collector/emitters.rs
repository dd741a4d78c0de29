// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writes a crash record from inside the faulting context.
//!
//! Everything a capture needs (record buffer, open segment, process metadata) is allocated when
//! the handlers are armed and published through an `AtomicPtr`. The capture itself only fills the
//! buffer and hands it to `SegmentWriter::append`.

use super::atom_guard::{AtomGuard, CaptureInProgress};
use crate::crash_record::{
    CaptureTimestamp, FaultKind, ProcessMetadata, RecordBuffer, RecordEncoder, StackFrame,
};
use crate::shared::constants::{CRASH_RECORD_SIZE, MAX_THREAD_NAME_LEN};
use crate::store::{AppendError, SegmentWriter};
use libc::{siginfo_t, ucontext_t};
use std::fmt::Write;
use std::panic::PanicHookInfo;
use std::ptr;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::atomic::{AtomicPtr, AtomicU64};

// Note that the capture path only makes use of the following async-signal safe functions.
// <https://man7.org/linux/man-pages/man7/signal-safety.7.html>
// - clock_gettime
// - fsync
// - write
// plus the thread id / name lookups below, which are plain syscalls on Linux.

/// Name recorded for uncaught panics.
pub const PANIC_EXCEPTION_NAME: &str = "panic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error(transparent)]
    Busy(#[from] CaptureInProgress),
    #[error("crash capture is not armed")]
    NotArmed,
    #[error("a crash has already been captured since the handlers were armed")]
    AlreadyCaptured,
    #[error("the panic does not end the process")]
    Recoverable,
    #[error("failed to persist crash record: {0}")]
    Append(#[from] AppendError),
}

/// Resources owned by an armed collector.
#[derive(Debug)]
pub struct CaptureArena {
    buffer: Box<RecordBuffer>,
    writer: SegmentWriter,
    metadata: ProcessMetadata,
    installed_at_monotonic_ns: u64,
    // One shot: set by the first fatal capture, never cleared while the arena is published.
    captured: bool,
    // Thread whose panic record is staged in `buffer`, waiting for the SIGABRT that follows it.
    staged_panic_thread: Option<u64>,
}

impl CaptureArena {
    pub fn new(writer: SegmentWriter, metadata: ProcessMetadata) -> Self {
        Self {
            buffer: Box::new([0u8; CRASH_RECORD_SIZE]),
            writer,
            metadata,
            installed_at_monotonic_ns: CaptureTimestamp::now().monotonic_ns,
            captured: false,
            staged_panic_thread: None,
        }
    }

    pub fn writer(&self) -> &SegmentWriter {
        &self.writer
    }

    pub fn metadata(&self) -> &ProcessMetadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: ProcessMetadata) {
        self.metadata = metadata;
    }

    pub fn into_writer(self) -> SegmentWriter {
        self.writer
    }
}

// Always either null or a pointer from `Box::into_raw`.
static ARENA: AtomicPtr<CaptureArena> = AtomicPtr::new(ptr::null_mut());
static CAPTURE_IN_PROGRESS: AtomicU64 = AtomicU64::new(0);

/// Makes `arena` the target of future captures.
/// Returns the previously published arena, if any.
pub(crate) fn publish_arena(arena: Box<CaptureArena>) -> Option<Box<CaptureArena>> {
    let old = ARENA.swap(Box::into_raw(arena), SeqCst);
    reclaim(old)
}

/// Stops captures and gives the arena back to the caller.
///
/// Waits for a capture running on another thread to finish. If it does not finish in time the
/// arena is leaked rather than freed under its feet, and `None` is returned.
pub(crate) fn withdraw_arena() -> Option<Box<CaptureArena>> {
    let old = ARENA.swap(ptr::null_mut(), SeqCst);
    reclaim(old)
}

#[cfg(test)]
pub(crate) fn is_armed() -> bool {
    !ARENA.load(SeqCst).is_null()
}

fn reclaim(old: *mut CaptureArena) -> Option<Box<CaptureArena>> {
    if old.is_null() {
        return None;
    }
    const MAX_WAIT_ROUNDS: usize = 10_000;
    for _ in 0..MAX_WAIT_ROUNDS {
        if CAPTURE_IN_PROGRESS.load(SeqCst) == 0 {
            // SAFETY: the pointer came from `Box::into_raw` and is no longer reachable from
            // `ARENA`; no capture is using it.
            return Some(unsafe { Box::from_raw(old) });
        }
        std::thread::yield_now();
    }
    None
}

/// How a panic reaching the hook is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PanicDisposition {
    /// The panic ends the process by unwinding out of `main`: persist it right away.
    Persist,
    /// The panic aborts the process: keep the record until the SIGABRT handler persists it, so
    /// the failure yields one record.
    StageForAbort,
    /// The panic may be caught or only ends its thread.
    Ignore,
}

/// Persists a record for a fatal signal.
///
/// Only the first fatal capture after arming is persisted. A previous handler that recovers
/// from the fault (or ignores it) would otherwise produce one record per delivery.
///
/// SAFETY:
///     `sig_info` and `ucontext` must be the pointers the kernel passed to the signal handler
///     (`ucontext` may be null).
/// SIGNAL SAFETY:
///     Does not allocate or lock. Every failure drops the record.
pub(crate) unsafe fn capture_signal(
    signum: i32,
    sig_info: *const siginfo_t,
    ucontext: *const ucontext_t,
) -> Result<(), CaptureError> {
    let _guard = AtomGuard::new(&CAPTURE_IN_PROGRESS)?;
    let arena = ARENA.load(SeqCst);
    if arena.is_null() {
        return Err(CaptureError::NotArmed);
    }
    // SAFETY: `reclaim` does not free the arena while the guard is held.
    let arena = unsafe { &mut *arena };
    if arena.captured {
        return Err(CaptureError::AlreadyCaptured);
    }
    arena.captured = true;

    let staged = arena.staged_panic_thread.take();
    if signum == libc::SIGABRT && staged == Some(current_thread_id()) {
        // The abort that ends a panic: the panic record already describes it.
        arena.writer.append(&arena.buffer)?;
        return Ok(());
    }
    let timestamp = CaptureTimestamp::now();

    let (si_code, fault_address) = if sig_info.is_null() {
        (0, None)
    } else {
        // SAFETY: checked for null; the kernel filled it in.
        let si_code = unsafe { (*sig_info).si_code };
        // SIGILL, SIGFPE, SIGSEGV, SIGBUS, and SIGTRAP fill in si_addr with the address of the
        // fault.
        let fault_address = match signum {
            libc::SIGILL | libc::SIGFPE | libc::SIGSEGV | libc::SIGBUS | libc::SIGTRAP => {
                Some(unsafe { (*sig_info).si_addr() as u64 })
            }
            _ => None,
        };
        (si_code, fault_address)
    };

    let mut encoder = RecordEncoder::new(&mut arena.buffer, FaultKind::FatalSignal);
    encoder.timestamp(&timestamp);
    encoder.installed_at(arena.installed_at_monotonic_ns);
    encoder.signal(signum, si_code, fault_address);
    encoder.process(&arena.metadata);
    emit_thread(&mut encoder);
    // SAFETY: forwarded from the caller.
    let fault_ip = unsafe { extract_ip(ucontext) };
    // SAFETY: capture is serialized by the guard.
    unsafe { emit_frames(&mut encoder, fault_ip) };
    arena.writer.append(encoder.finish())?;
    Ok(())
}

/// Records a panic according to `disposition`. Called from the panic hook.
pub(crate) fn capture_panic(
    info: &PanicHookInfo<'_>,
    disposition: PanicDisposition,
) -> Result<(), CaptureError> {
    if disposition == PanicDisposition::Ignore {
        return Err(CaptureError::Recoverable);
    }
    let _guard = AtomGuard::new(&CAPTURE_IN_PROGRESS)?;
    let arena = ARENA.load(SeqCst);
    if arena.is_null() {
        return Err(CaptureError::NotArmed);
    }
    // SAFETY: `reclaim` does not free the arena while the guard is held.
    let arena = unsafe { &mut *arena };
    if arena.captured {
        return Err(CaptureError::AlreadyCaptured);
    }
    let timestamp = CaptureTimestamp::now();

    let mut encoder = RecordEncoder::new(&mut arena.buffer, FaultKind::UncaughtException);
    encoder.timestamp(&timestamp);
    encoder.installed_at(arena.installed_at_monotonic_ns);
    encoder.exception_name(PANIC_EXCEPTION_NAME);
    // The reason area truncates silently, formatting into it cannot fail.
    let _ = write_panic_reason(&mut encoder.exception_reason(), info);
    encoder.process(&arena.metadata);
    emit_thread(&mut encoder);
    // SAFETY: capture is serialized by the guard.
    unsafe { emit_frames(&mut encoder, None) };
    let slot = encoder.finish();
    if disposition == PanicDisposition::StageForAbort {
        arena.staged_panic_thread = Some(current_thread_id());
        return Ok(());
    }
    arena.captured = true;
    arena.writer.append(slot)?;
    Ok(())
}

fn write_panic_reason(w: &mut impl Write, info: &PanicHookInfo<'_>) -> std::fmt::Result {
    let payload = info.payload();
    if let Some(s) = payload.downcast_ref::<&str>() {
        w.write_str(s)?;
    } else if let Some(s) = payload.downcast_ref::<String>() {
        w.write_str(s)?;
    } else {
        w.write_str("Box<dyn Any>")?;
    }
    if let Some(location) = info.location() {
        write!(w, " at {location}")?;
    }
    Ok(())
}

/// Walks the current stack into the record.
///
/// When `fault_ip` is known, the frames in front of it belong to the signal handler and are
/// skipped. If the faulting frame is never found, the whole stack is recorded instead.
///
/// SIGNAL SAFETY:
///     Getting a backtrace on rust is not guaranteed to be signal safe.
///     https://github.com/rust-lang/backtrace-rs/issues/414
///     Only instruction pointers and module bases are collected, symbols are never resolved.
unsafe fn emit_frames(encoder: &mut RecordEncoder<'_>, fault_ip: Option<usize>) {
    let mut ip_found = fault_ip.is_none();
    loop {
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                let ip = frame.ip() as usize;
                if !ip_found && Some(ip) == fault_ip {
                    ip_found = true;
                }
                if !ip_found {
                    return true;
                }
                encoder.push_frame(StackFrame {
                    address: ip as u64,
                    module_base: frame.module_base_address().map(|base| base as u64),
                })
            })
        };
        if ip_found {
            break;
        }
        ip_found = true;
    }
}

fn emit_thread(encoder: &mut RecordEncoder<'_>) {
    encoder.thread_id(current_thread_id());
    let mut name = [0u8; MAX_THREAD_NAME_LEN];
    if read_thread_name(&mut name) {
        encoder.thread_name(&name);
    }
}

#[cfg(target_os = "linux")]
fn current_thread_id() -> u64 {
    // SAFETY: no preconditions.
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(target_os = "macos")]
fn current_thread_id() -> u64 {
    let mut tid = 0u64;
    // SAFETY: `tid` is a valid out pointer.
    unsafe { libc::pthread_threadid_np(libc::pthread_self(), &mut tid) };
    tid
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn current_thread_id() -> u64 {
    // SAFETY: no preconditions.
    unsafe { libc::pthread_self() as u64 }
}

#[cfg(target_os = "linux")]
fn read_thread_name(buf: &mut [u8; MAX_THREAD_NAME_LEN]) -> bool {
    // PR_GET_NAME writes at most 16 bytes, nul included.
    // SAFETY: `buf` is larger than 16 bytes.
    unsafe { libc::prctl(libc::PR_GET_NAME, buf.as_mut_ptr() as libc::c_ulong, 0, 0, 0) == 0 }
}

#[cfg(target_os = "macos")]
fn read_thread_name(buf: &mut [u8; MAX_THREAD_NAME_LEN]) -> bool {
    // SAFETY: `buf` is valid for `buf.len()` bytes.
    unsafe {
        libc::pthread_getname_np(
            libc::pthread_self(),
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
        ) == 0
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn read_thread_name(_buf: &mut [u8; MAX_THREAD_NAME_LEN]) -> bool {
    false
}

/// Instruction pointer at the time of the fault.
///
/// SAFETY:
///     `ucontext` must be null or the context the kernel passed to the signal handler.
unsafe fn extract_ip(ucontext: *const ucontext_t) -> Option<usize> {
    if ucontext.is_null() {
        return None;
    }
    // SAFETY: forwarded from the caller, checked for null.
    unsafe { mcontext_ip(ucontext) }
}

#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
unsafe fn mcontext_ip(ucontext: *const ucontext_t) -> Option<usize> {
    Some(unsafe { (*(*ucontext).uc_mcontext).__ss.__rip } as usize)
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
unsafe fn mcontext_ip(ucontext: *const ucontext_t) -> Option<usize> {
    Some(unsafe { (*(*ucontext).uc_mcontext).__ss.__pc } as usize)
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
unsafe fn mcontext_ip(ucontext: *const ucontext_t) -> Option<usize> {
    Some(unsafe { (*ucontext).uc_mcontext.gregs[libc::REG_RIP as usize] } as usize)
}

#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
unsafe fn mcontext_ip(ucontext: *const ucontext_t) -> Option<usize> {
    Some(unsafe { (*ucontext).uc_mcontext.pc } as usize)
}

#[cfg(not(any(
    all(target_os = "macos", any(target_arch = "x86_64", target_arch = "aarch64")),
    all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")),
)))]
unsafe fn mcontext_ip(_ucontext: *const ucontext_t) -> Option<usize> {
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crash_record::{decode_record, Fault};
    use crate::store::PendingCrashStore;
    use serial_test::serial;

    pub(crate) fn test_metadata() -> ProcessMetadata {
        ProcessMetadata::new("3.1.4", "Linux 6.1", "test-device", std::process::id())
    }

    #[test]
    #[serial]
    fn test_panic_reason_formatting() {
        struct Reason(String);
        impl Write for Reason {
            fn write_str(&mut self, s: &str) -> std::fmt::Result {
                self.0.push_str(s);
                Ok(())
            }
        }

        let hook = std::panic::take_hook();
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        std::panic::set_hook(Box::new(move |info| {
            let mut reason = Reason(String::new());
            write_panic_reason(&mut reason, info).unwrap();
            let _ = tx.lock().unwrap().send(reason.0);
        }));
        let _ = std::panic::catch_unwind(|| panic!("index {} out of range", 7));
        std::panic::set_hook(hook);

        let reason = rx.recv().unwrap();
        assert!(reason.starts_with("index 7 out of range at "), "{reason}");
        assert!(reason.contains("emitters.rs"), "{reason}");
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_capture_without_arena_is_dropped() {
        assert!(withdraw_arena().is_none());
        let rval = unsafe { capture_signal(libc::SIGSEGV, ptr::null(), ptr::null()) };
        assert_eq!(rval, Err(CaptureError::NotArmed));
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_capture_signal_writes_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        assert!(publish_arena(Box::new(CaptureArena::new(writer, test_metadata()))).is_none());
        assert!(is_armed());

        unsafe { capture_signal(libc::SIGBUS, ptr::null(), ptr::null()) }.unwrap();

        let arena = withdraw_arena().unwrap();
        assert!(!is_armed());
        let bytes = std::fs::read(arena.writer().path()).unwrap();
        assert_eq!(bytes.len(), CRASH_RECORD_SIZE);
        let record = decode_record(&bytes).unwrap();
        assert_eq!(
            record.fault,
            Fault::FatalSignal {
                signo: libc::SIGBUS,
                si_code: 0,
                fault_address: None
            }
        );
        assert!(!record.frames.is_empty());
        assert_eq!(record.process, test_metadata());
        assert!(record.uptime().is_some());
        #[cfg(target_os = "linux")]
        assert_eq!(record.thread.id, unsafe { libc::syscall(libc::SYS_gettid) } as u64);
        store.release_segment(arena.into_writer());
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_nested_capture_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        publish_arena(Box::new(CaptureArena::new(writer, test_metadata())));

        {
            let _outer = AtomGuard::new(&CAPTURE_IN_PROGRESS).unwrap();
            let rval = unsafe { capture_signal(libc::SIGSEGV, ptr::null(), ptr::null()) };
            assert_eq!(rval, Err(CaptureError::Busy(CaptureInProgress)));
        }

        let arena = withdraw_arena().unwrap();
        assert_eq!(std::fs::metadata(arena.writer().path()).unwrap().len(), 0);
        store.release_segment(arena.into_writer());
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_second_signal_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        publish_arena(Box::new(CaptureArena::new(writer, test_metadata())));

        unsafe { capture_signal(libc::SIGSEGV, ptr::null(), ptr::null()) }.unwrap();
        for _ in 0..4 {
            let rval = unsafe { capture_signal(libc::SIGSEGV, ptr::null(), ptr::null()) };
            assert_eq!(rval, Err(CaptureError::AlreadyCaptured));
        }
        // Republishing the same arena, as a metadata update does, keeps it one shot.
        let arena = withdraw_arena().unwrap();
        publish_arena(arena);
        let rval = unsafe { capture_signal(libc::SIGBUS, ptr::null(), ptr::null()) };
        assert_eq!(rval, Err(CaptureError::AlreadyCaptured));

        let arena = withdraw_arena().unwrap();
        let bytes = std::fs::read(arena.writer().path()).unwrap();
        assert_eq!(bytes.len(), CRASH_RECORD_SIZE);
        assert!(matches!(
            decode_record(&bytes).unwrap().fault,
            Fault::FatalSignal {
                signo: libc::SIGSEGV,
                ..
            }
        ));
        store.release_segment(arena.into_writer());
    }

    /// Panics inside `catch_unwind` with a hook that captures it as `disposition`.
    fn panic_with_disposition(disposition: PanicDisposition) -> Result<(), CaptureError> {
        let hook = std::panic::take_hook();
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        std::panic::set_hook(Box::new(move |info| {
            let _ = tx.lock().unwrap().send(capture_panic(info, disposition));
        }));
        let _ = std::panic::catch_unwind(|| panic!("worker gave up"));
        std::panic::set_hook(hook);
        rx.recv().unwrap()
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_ignored_panic_leaves_segment_empty_and_abort_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        publish_arena(Box::new(CaptureArena::new(writer, test_metadata())));

        assert_eq!(
            panic_with_disposition(PanicDisposition::Ignore),
            Err(CaptureError::Recoverable)
        );
        assert_eq!(
            std::fs::metadata(store.active_segment().unwrap()).unwrap().len(),
            0
        );

        // A later abort on the same thread is a separate failure.
        unsafe { capture_signal(libc::SIGABRT, ptr::null(), ptr::null()) }.unwrap();

        let arena = withdraw_arena().unwrap();
        let bytes = std::fs::read(arena.writer().path()).unwrap();
        assert_eq!(bytes.len(), CRASH_RECORD_SIZE);
        assert!(matches!(
            decode_record(&bytes).unwrap().fault,
            Fault::FatalSignal {
                signo: libc::SIGABRT,
                ..
            }
        ));
        store.release_segment(arena.into_writer());
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_staged_panic_is_persisted_by_abort() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        publish_arena(Box::new(CaptureArena::new(writer, test_metadata())));

        panic_with_disposition(PanicDisposition::StageForAbort).unwrap();
        assert_eq!(
            std::fs::metadata(store.active_segment().unwrap()).unwrap().len(),
            0
        );
        unsafe { capture_signal(libc::SIGABRT, ptr::null(), ptr::null()) }.unwrap();

        let arena = withdraw_arena().unwrap();
        let bytes = std::fs::read(arena.writer().path()).unwrap();
        assert_eq!(bytes.len(), CRASH_RECORD_SIZE);
        match decode_record(&bytes).unwrap().fault {
            Fault::UncaughtException { name, reason } => {
                assert_eq!(name, PANIC_EXCEPTION_NAME);
                assert!(reason.starts_with("worker gave up at "), "{reason}");
            }
            other => panic!("unexpected fault {other:?}"),
        }
        store.release_segment(arena.into_writer());
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_persisted_panic_is_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        let writer = store.create_segment().unwrap();
        publish_arena(Box::new(CaptureArena::new(writer, test_metadata())));

        panic_with_disposition(PanicDisposition::Persist).unwrap();
        assert_eq!(
            panic_with_disposition(PanicDisposition::Persist),
            Err(CaptureError::AlreadyCaptured)
        );

        let arena = withdraw_arena().unwrap();
        assert_eq!(
            std::fs::metadata(arena.writer().path()).unwrap().len(),
            CRASH_RECORD_SIZE as u64
        );
        store.release_segment(arena.into_writer());
    }

    #[inline(never)]
    fn recurse_and_walk(depth: usize, encoder: &mut RecordEncoder<'_>) {
        if depth == 0 {
            unsafe { emit_frames(encoder, None) };
        } else {
            recurse_and_walk(depth - 1, encoder);
        }
        std::hint::black_box(depth);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_deep_stack_is_truncated() {
        let mut buf: RecordBuffer = [0u8; CRASH_RECORD_SIZE];
        let mut encoder = RecordEncoder::new(&mut buf, FaultKind::FatalSignal);
        recurse_and_walk(200, &mut encoder);
        assert_eq!(encoder.frame_count(), crate::shared::constants::MAX_BACKTRACE_FRAMES);
        let record = decode_record(encoder.finish()).unwrap();
        assert!(record.frames_truncated);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_unknown_fault_ip_records_whole_stack() {
        let mut buf: RecordBuffer = [0u8; CRASH_RECORD_SIZE];
        let mut encoder = RecordEncoder::new(&mut buf, FaultKind::FatalSignal);
        unsafe { emit_frames(&mut encoder, Some(1)) };
        assert!(encoder.frame_count() > 0);
    }
}
