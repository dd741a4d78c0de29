// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    unix::main()
}

#[cfg(unix)]
mod unix {
    use anyhow::Context;
    use bin_tests::{CrashMode, CHAINED_HANDLER_MARKER};
    use libsa_crashtracker::{ExceptionManager, ExceptionOptions};
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet};
    use std::env;
    use std::ffi::CString;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicPtr, Ordering::SeqCst};
    use tracing_subscriber::EnvFilter;

    #[inline(never)]
    unsafe fn fn3() {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            std::arch::asm!("mov eax, [0]", options(nostack));
        }

        #[cfg(target_arch = "aarch64")]
        {
            std::arch::asm!("mov x0, #0", "ldr x1, [x0]", options(nostack));
        }
    }

    #[inline(never)]
    fn fn2() {
        unsafe { fn3() }
    }

    #[inline(never)]
    fn fn1() {
        fn2()
    }

    #[inline(never)]
    fn recurse(depth: usize) {
        if depth == 0 {
            fn1();
        } else {
            recurse(depth - 1);
        }
        std::hint::black_box(depth);
    }

    // Path of the marker file, as a nul-terminated string usable from the signal handler.
    static MARKER_PATH: AtomicPtr<libc::c_char> = AtomicPtr::new(std::ptr::null_mut());

    extern "C" fn chained_handler(signum: i32) {
        let path = MARKER_PATH.load(SeqCst);
        if !path.is_null() {
            unsafe {
                let fd = libc::open(path, libc::O_CREAT | libc::O_WRONLY, 0o644);
                if fd >= 0 {
                    libc::close(fd);
                }
            }
        }
        // Let the fault kill the process when the instruction is retried.
        unsafe {
            libc::signal(signum, libc::SIG_DFL);
        }
    }

    fn install_chained_handler(output_dir: &str) -> anyhow::Result<()> {
        let marker = PathBuf::from(output_dir).join(CHAINED_HANDLER_MARKER);
        let marker = CString::new(marker.into_os_string().into_encoded_bytes())?;
        MARKER_PATH.store(marker.into_raw(), SeqCst);
        let action = SigAction::new(
            SigHandler::Handler(chained_handler),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { signal::sigaction(signal::SIGSEGV, &action) }?;
        Ok(())
    }

    #[inline(never)]
    pub fn main() -> anyhow::Result<()> {
        let mut args = env::args().skip(1);
        let mode: CrashMode = args
            .next()
            .context("Unexpected number of arguments 1")?
            .parse()?;
        let store_dir = args.next().context("Unexpected number of arguments 2")?;
        let output_dir = args.next().context("Unexpected number of arguments 3")?;
        anyhow::ensure!(args.next().is_none(), "unexpected extra arguments");

        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();

        if mode == CrashMode::Chained {
            install_chained_handler(&output_dir)?;
        }

        let options = ExceptionOptions::new(mode != CrashMode::Disabled)
            .with_storage_dir(store_dir)
            .with_app_version("1.0.0-bin-test");
        let manager = ExceptionManager::global();
        manager.configure(options)?;
        manager.start()?;
        anyhow::ensure!(
            manager.is_enabled() == (mode != CrashMode::Disabled),
            "unexpected crash tracking state {:?}",
            manager.state()
        );

        match mode {
            CrashMode::NoCrash => manager.stop(),
            CrashMode::Segfault | CrashMode::Chained | CrashMode::Disabled => fn1(),
            CrashMode::DeepSegfault => recurse(200),
            CrashMode::Panic => panic!("crashing_app panicked on purpose"),
            CrashMode::Abort => std::process::abort(),
        }
        Ok(())
    }
}
