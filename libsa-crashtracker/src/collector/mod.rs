// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process half of the crash tracker: installs the handlers and writes the crash record from
//! the faulting context.

mod atom_guard;
mod crash_handler;
mod emitters;
mod panic_hook;
mod signal_handler_manager;

pub use atom_guard::CaptureInProgress;
pub use emitters::{CaptureArena, CaptureError, PANIC_EXCEPTION_NAME};
pub use signal_handler_manager::{HandlerRegistry, InstallError, RegistryError};
