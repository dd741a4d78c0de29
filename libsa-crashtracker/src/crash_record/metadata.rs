// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

const UNKNOWN: &str = "unknown";

/// Snapshot of the process taken when the crash handlers are armed.
/// It is copied verbatim into every record captured afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMetadata {
    pub app_version: String,
    pub os_version: String,
    pub device_model: String,
    pub pid: u32,
}

impl ProcessMetadata {
    pub fn new(
        app_version: impl Into<String>,
        os_version: impl Into<String>,
        device_model: impl Into<String>,
        pid: u32,
    ) -> Self {
        Self {
            app_version: app_version.into(),
            os_version: os_version.into(),
            device_model: device_model.into(),
            pid,
        }
    }

    /// Collects the metadata of the running process.
    /// Values the host does not provide are looked up on the machine.
    pub fn this_process(app_version: Option<&str>, device_model: Option<&str>) -> Self {
        let info = os_info::get();
        let os_version = format!("{} {}", info.os_type(), info.version());
        let device_model = device_model
            .map(str::to_string)
            .or_else(machine_model)
            .or_else(|| info.architecture().map(str::to_string))
            .unwrap_or_else(|| std::env::consts::ARCH.to_string());
        Self {
            app_version: app_version.unwrap_or(UNKNOWN).to_string(),
            os_version,
            device_model,
            pid: std::process::id(),
        }
    }
}

#[cfg(target_os = "linux")]
fn machine_model() -> Option<String> {
    let model = std::fs::read_to_string("/sys/devices/virtual/dmi/id/product_name").ok()?;
    let model = model.trim();
    (!model.is_empty()).then(|| model.to_string())
}

#[cfg(target_os = "macos")]
fn machine_model() -> Option<String> {
    let mut buf = [0u8; 256];
    let mut len = buf.len();
    // SAFETY: the name is nul-terminated, `buf`/`len` describe a valid writable buffer.
    let rval = unsafe {
        libc::sysctlbyname(
            c"hw.model".as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rval != 0 || len == 0 {
        return None;
    }
    let model = std::ffi::CStr::from_bytes_until_nul(&buf[..len]).ok()?;
    model.to_str().ok().map(str::to_string)
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn machine_model() -> Option<String> {
    None
}
