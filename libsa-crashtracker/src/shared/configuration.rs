// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
use crate::crash_record::ProcessMetadata;
use crate::shared::constants::{DEFAULT_STORE_DIR_NAME, STORE_DIR_ENV};
use crate::{default_signals, signal_from_signum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Malformed exception options: {0}")]
    MalformedOptions(#[from] serde_json::Error),
    #[error("The crash store directory must be an absolute path, got {0:?}")]
    RelativeStoreDir(PathBuf),
    #[error("The crash store location {0:?} exists and is not a directory")]
    StoreDirNotADirectory(PathBuf),
    #[error("{0} must not be empty when provided")]
    EmptyField(&'static str),
    #[error("Signals contained duplicate elements")]
    DuplicateSignals,
    #[error("Unsupported signal number {0}")]
    InvalidSignal(i32),
    #[error("Cannot create an altstack without using it")]
    AltStackNotUsed,
}

/// Options the host SDK passes to the exception module.
///
/// `enable_track_app_crash` is the only switch of the capture itself and is off by default.
/// The remaining fields are context the SDK already owns (where it keeps its files, which
/// version of the app is running) and are optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionOptions {
    #[serde(default)]
    pub enable_track_app_crash: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_model: Option<String>,
}

impl ExceptionOptions {
    pub fn new(enable_track_app_crash: bool) -> Self {
        Self {
            enable_track_app_crash,
            ..Default::default()
        }
    }

    /// Reads the options out of the SDK's JSON configuration object.
    /// Keys belonging to other modules are ignored.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_storage_dir(mut self, storage_dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(storage_dir.into());
        self
    }

    pub fn with_app_version(mut self, app_version: impl Into<String>) -> Self {
        self.app_version = Some(app_version.into());
        self
    }

    pub fn with_device_model(mut self, device_model: impl Into<String>) -> Self {
        self.device_model = Some(device_model.into());
        self
    }
}

/// Validated, internal configuration of the crashtracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashtrackerConfiguration {
    create_alt_stack: bool,
    enabled: bool,
    metadata: ProcessMetadata,
    signals: Vec<i32>,
    store_dir: PathBuf,
    use_alt_stack: bool,
}

impl CrashtrackerConfiguration {
    pub fn new(
        enabled: bool,
        create_alt_stack: bool,
        use_alt_stack: bool,
        mut signals: Vec<i32>,
        store_dir: PathBuf,
        metadata: ProcessMetadata,
    ) -> Result<Self, ConfigurationError> {
        // Requesting to create, but not use, the altstack is considered paradoxical.
        if create_alt_stack && !use_alt_stack {
            return Err(ConfigurationError::AltStackNotUsed);
        }
        if signals.is_empty() {
            signals = default_signals();
        } else {
            let before_len = signals.len();
            signals.sort();
            signals.dedup();
            if before_len != signals.len() {
                return Err(ConfigurationError::DuplicateSignals);
            }
            for signum in &signals {
                signal_from_signum(*signum).map_err(|_| ConfigurationError::InvalidSignal(*signum))?;
            }
        }
        validate_store_dir(&store_dir)?;

        Ok(Self {
            create_alt_stack,
            enabled,
            metadata,
            signals,
            store_dir,
            use_alt_stack,
        })
    }

    /// Builds the configuration used by the exception manager out of the host options.
    pub fn from_options(options: &ExceptionOptions) -> Result<Self, ConfigurationError> {
        if matches!(options.app_version.as_deref(), Some("")) {
            return Err(ConfigurationError::EmptyField("appVersion"));
        }
        if matches!(options.device_model.as_deref(), Some("")) {
            return Err(ConfigurationError::EmptyField("deviceModel"));
        }
        let store_dir = match &options.storage_dir {
            Some(dir) => dir.clone(),
            None => default_store_dir(),
        };
        let metadata = ProcessMetadata::this_process(
            options.app_version.as_deref(),
            options.device_model.as_deref(),
        );
        Self::new(
            options.enable_track_app_crash,
            true,
            true,
            vec![],
            store_dir,
            metadata,
        )
    }

    pub fn create_alt_stack(&self) -> bool {
        self.create_alt_stack
    }

    pub fn use_alt_stack(&self) -> bool {
        self.use_alt_stack
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn metadata(&self) -> &ProcessMetadata {
        &self.metadata
    }

    pub fn signals(&self) -> &Vec<i32> {
        &self.signals
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn set_metadata(&mut self, metadata: ProcessMetadata) {
        self.metadata = metadata;
    }
}

fn validate_store_dir(store_dir: &Path) -> Result<(), ConfigurationError> {
    if !store_dir.is_absolute() {
        return Err(ConfigurationError::RelativeStoreDir(store_dir.to_path_buf()));
    }
    if store_dir.exists() && !store_dir.is_dir() {
        return Err(ConfigurationError::StoreDirNotADirectory(
            store_dir.to_path_buf(),
        ));
    }
    Ok(())
}

/// `$SA_CRASHTRACKER_STORE_DIR`, else the XDG data directory, else the temp directory.
pub fn default_store_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(STORE_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|d| !d.is_empty())
                .map(|home| PathBuf::from(home).join(".local").join("share"))
        })
        .filter(|dir| dir.is_absolute())
        .unwrap_or_else(std::env::temp_dir);
    data_home.join(DEFAULT_STORE_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn metadata() -> ProcessMetadata {
        ProcessMetadata::new("1.2.3", "Linux 6.1", "x86_64", 42)
    }

    #[test]
    fn test_options_default_disabled() {
        let options = ExceptionOptions::default();
        assert!(!options.enable_track_app_crash);
        let options = ExceptionOptions::from_json("{}").unwrap();
        assert!(!options.enable_track_app_crash);
    }

    #[test]
    fn test_options_from_sdk_json() {
        let json = r#"{
            "serverURL": "http://example.com/sa?project=default",
            "maxCacheSize": 10000,
            "enableTrackAppCrash": true,
            "appVersion": "4.5.6"
        }"#;
        let options = ExceptionOptions::from_json(json).unwrap();
        assert!(options.enable_track_app_crash);
        assert_eq!(options.app_version.as_deref(), Some("4.5.6"));
        assert_eq!(options.storage_dir, None);
    }

    #[test]
    fn test_options_malformed_json() {
        let err = ExceptionOptions::from_json(r#"{"enableTrackAppCrash": "yes"}"#).unwrap_err();
        assert!(matches!(err, ConfigurationError::MalformedOptions(_)));
    }

    #[test]
    fn test_config_rejects_relative_store_dir() {
        let options = ExceptionOptions::new(true).with_storage_dir("relative/crashes");
        let err = CrashtrackerConfiguration::from_options(&options).unwrap_err();
        assert!(matches!(err, ConfigurationError::RelativeStoreDir(_)));
    }

    #[test]
    fn test_config_rejects_file_as_store_dir() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let options = ExceptionOptions::new(true).with_storage_dir(file.path());
        let err = CrashtrackerConfiguration::from_options(&options).unwrap_err();
        assert!(matches!(err, ConfigurationError::StoreDirNotADirectory(_)));
    }

    #[test]
    fn test_config_rejects_empty_app_version() {
        let options = ExceptionOptions::new(true).with_app_version("");
        let err = CrashtrackerConfiguration::from_options(&options).unwrap_err();
        assert!(matches!(err, ConfigurationError::EmptyField("appVersion")));
    }

    #[test]
    fn test_config_signals() {
        let dir = tempfile::tempdir().unwrap();
        let config = CrashtrackerConfiguration::new(
            true,
            false,
            false,
            vec![],
            dir.path().to_path_buf(),
            metadata(),
        )
        .unwrap();
        assert_eq!(config.signals(), &default_signals());

        let err = CrashtrackerConfiguration::new(
            true,
            false,
            false,
            vec![libc::SIGSEGV, libc::SIGSEGV],
            dir.path().to_path_buf(),
            metadata(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateSignals));

        let err = CrashtrackerConfiguration::new(
            true,
            false,
            false,
            vec![1000],
            dir.path().to_path_buf(),
            metadata(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSignal(1000)));
    }

    #[test]
    fn test_config_alt_stack_paradox() {
        let dir = tempfile::tempdir().unwrap();
        let err = CrashtrackerConfiguration::new(
            true,
            true,
            false,
            vec![],
            dir.path().to_path_buf(),
            metadata(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::AltStackNotUsed));
    }

    #[test]
    #[serial]
    fn test_default_store_dir_is_absolute() {
        assert!(default_store_dir().is_absolute());
        assert!(default_store_dir().ends_with(DEFAULT_STORE_DIR_NAME));
    }
}
