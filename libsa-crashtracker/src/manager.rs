// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry point used by the host SDK: turns crash tracking on and off and reports the crashes of
//! earlier runs.

use crate::collector::{CaptureArena, HandlerRegistry, RegistryError};
use crate::crash_record::ProcessMetadata;
use crate::receiver::{CrashReportLoader, DrainSummary, EventSink};
use crate::shared::configuration::{
    ConfigurationError, CrashtrackerConfiguration, ExceptionOptions,
};
use crate::store::{PendingCrashStore, StoreError};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info, warn};

pub const EXCEPTION_MODULE_NAME: &str = "Exception";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManagerState {
    Uninitialized,
    Disabled,
    Enabled,
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("invalid crash tracking configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("pending crash store error: {0}")]
    Store(#[from] StoreError),
    #[error("unable to install crash handlers: {0}")]
    Registry(#[from] RegistryError),
    #[error("crash tracking has not been configured")]
    NotConfigured,
}

/// Lifecycle protocol shared by the optional modules of the host SDK.
pub trait ExceptionModule {
    fn module_name(&self) -> &'static str;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool) -> anyhow::Result<()>;
}

struct HandlerState {
    state: ManagerState,
    options: Option<ExceptionOptions>,
    config: Option<CrashtrackerConfiguration>,
    store: Option<PendingCrashStore>,
    registry: HandlerRegistry,
    sink: Option<Arc<dyn EventSink>>,
    startup_drain_done: bool,
}

impl Default for HandlerState {
    fn default() -> Self {
        Self {
            state: ManagerState::Uninitialized,
            options: None,
            config: None,
            store: None,
            registry: HandlerRegistry::new(),
            sink: None,
            startup_drain_done: false,
        }
    }
}

impl HandlerState {
    fn apply(&mut self, options: ExceptionOptions) -> Result<(), ManagerError> {
        let config = match CrashtrackerConfiguration::from_options(&options) {
            Ok(config) => config,
            Err(e) => {
                self.disable();
                self.state = ManagerState::Disabled;
                return Err(e.into());
            }
        };

        let same_dir = self
            .store
            .as_ref()
            .is_some_and(|store| store.dir() == config.store_dir());
        if !same_dir {
            // Records of the current process must land in the new location.
            self.disable();
            self.store = None;
            match PendingCrashStore::open(config.store_dir()) {
                Ok(store) => self.store = Some(store),
                Err(e) => {
                    self.state = ManagerState::Disabled;
                    return Err(e.into());
                }
            }
            self.startup_drain_done = false;
        }

        let enabled = config.enabled();
        self.options = Some(options);
        self.config = Some(config);
        if enabled {
            self.enable()
        } else {
            self.disable();
            self.state = ManagerState::Disabled;
            Ok(())
        }
    }

    fn enable(&mut self) -> Result<(), ManagerError> {
        if self.registry.is_installed() {
            self.state = ManagerState::Enabled;
            return Ok(());
        }
        if !self.startup_drain_done {
            // A failed drain must not prevent capturing the crashes of this run.
            if let Err(e) = self.drain() {
                warn!(error = %e, "Unable to report pending crashes");
            }
        }

        let HandlerState {
            config,
            store,
            registry,
            state,
            ..
        } = self;
        let (Some(config), Some(store)) = (config.as_ref(), store.as_mut()) else {
            return Err(ManagerError::NotConfigured);
        };
        let writer = store.create_segment()?;
        let arena = CaptureArena::new(writer, config.metadata().clone());
        match registry.install(config, arena) {
            Ok(None) => (),
            Ok(Some(unused)) => store.release_segment(unused.into_writer()),
            Err(refused) => {
                store.release_segment(refused.arena.into_writer());
                *state = ManagerState::Disabled;
                return Err(refused.error.into());
            }
        }
        *state = ManagerState::Enabled;
        info!(store = ?store.dir(), "Crash tracking enabled");
        Ok(())
    }

    fn disable(&mut self) {
        if let Some(arena) = self.registry.uninstall() {
            if let Some(store) = self.store.as_mut() {
                store.release_segment(arena.into_writer());
            }
            info!("Crash tracking disabled");
        }
        if self.state == ManagerState::Enabled {
            self.state = ManagerState::Disabled;
        }
    }

    fn drain(&mut self) -> Result<DrainSummary, ManagerError> {
        let store = self.store.as_ref().ok_or(ManagerError::NotConfigured)?;
        let sink = self.sink.as_deref();
        let summary = CrashReportLoader::new().run(store, sink)?;
        if sink.is_some() {
            self.startup_drain_done = true;
        }
        Ok(summary)
    }
}

/// Owns the crash tracking state of the process.
///
/// Every transition is serialized by one lock; the crash handlers themselves never take it.
pub struct ExceptionManager {
    inner: Mutex<HandlerState>,
}

impl Default for ExceptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExceptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionManager")
            .field("state", &self.state())
            .finish()
    }
}

static GLOBAL: OnceLock<ExceptionManager> = OnceLock::new();

impl ExceptionManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HandlerState::default()),
        }
    }

    /// The process-wide manager.
    pub fn global() -> &'static ExceptionManager {
        GLOBAL.get_or_init(ExceptionManager::new)
    }

    fn lock(&self) -> MutexGuard<'_, HandlerState> {
        // A panic while holding the lock cannot leave the handlers half installed: recover.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates `options` and enables or disables crash tracking according to
    /// `enable_track_app_crash`. An invalid configuration leaves crash tracking disabled.
    pub fn configure(&self, options: ExceptionOptions) -> Result<(), ManagerError> {
        debug!(?options, "Configuring crash tracking");
        self.lock().apply(options)
    }

    pub fn set_configuration(&self, options: ExceptionOptions) -> Result<(), ManagerError> {
        self.configure(options)
    }

    pub fn configuration(&self) -> Option<ExceptionOptions> {
        self.lock().options.clone()
    }

    pub fn state(&self) -> ManagerState {
        self.lock().state
    }

    pub fn is_enabled(&self) -> bool {
        self.state() == ManagerState::Enabled
    }

    /// Turns crash tracking on or off. Repeated calls with the same value are no-ops.
    /// Configures the defaults first if the manager was never configured.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), ManagerError> {
        let mut inner = self.lock();
        let options = match inner.options.clone() {
            Some(options) => ExceptionOptions {
                enable_track_app_crash: enabled,
                ..options
            },
            None => ExceptionOptions::new(enabled),
        };
        inner.apply(options)
    }

    /// Arms the handlers if the configuration asks for it.
    pub fn start(&self) -> Result<(), ManagerError> {
        let mut inner = self.lock();
        match &inner.config {
            None => inner.apply(ExceptionOptions::default()),
            Some(config) if config.enabled() => inner.enable(),
            Some(_) => Ok(()),
        }
    }

    /// Disarms the handlers and restores the ones that were installed before.
    pub fn stop(&self) {
        self.lock().disable();
    }

    /// Registers the ingestion pipeline. Pending crashes that could not be reported when crash
    /// tracking was enabled are reported now.
    pub fn set_event_sink(
        &self,
        sink: Arc<dyn EventSink>,
    ) -> Result<Option<DrainSummary>, ManagerError> {
        let mut inner = self.lock();
        inner.sink = Some(sink);
        if inner.state == ManagerState::Enabled && !inner.startup_drain_done {
            return inner.drain().map(Some);
        }
        Ok(None)
    }

    /// Reports the crashes of earlier runs to the registered sink.
    /// Without a sink the store is only pruned.
    pub fn drain_pending(&self) -> Result<DrainSummary, ManagerError> {
        self.lock().drain()
    }

    /// Replaces the process metadata copied into crash records captured from now on.
    pub fn update_metadata(&self, metadata: ProcessMetadata) {
        let mut inner = self.lock();
        if let Some(config) = inner.config.as_mut() {
            config.set_metadata(metadata.clone());
        }
        inner.registry.update_metadata(metadata);
    }
}

impl ExceptionModule for ExceptionManager {
    fn module_name(&self) -> &'static str {
        EXCEPTION_MODULE_NAME
    }

    fn is_enabled(&self) -> bool {
        ExceptionManager::is_enabled(self)
    }

    fn set_enabled(&self, enabled: bool) -> anyhow::Result<()> {
        Ok(ExceptionManager::set_enabled(self, enabled)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::QueueSink;
    use crate::shared::constants::STORE_DIR_ENV;
    use crate::store::tests::{test_record, write_previous_instance};
    use serial_test::serial;

    fn current_handler(signum: i32) -> usize {
        let mut old: libc::sigaction = unsafe { std::mem::zeroed() };
        assert_eq!(
            unsafe { libc::sigaction(signum, std::ptr::null(), &mut old) },
            0
        );
        old.sa_sigaction
    }

    fn options(dir: &std::path::Path, enabled: bool) -> ExceptionOptions {
        ExceptionOptions::new(enabled)
            .with_storage_dir(dir)
            .with_app_version("5.0.0")
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_flag_unset_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let before = current_handler(libc::SIGSEGV);
        let manager = ExceptionManager::new();
        manager.configure(options(dir.path(), false)).unwrap();
        manager.start().unwrap();
        assert_eq!(manager.state(), ManagerState::Disabled);
        assert_eq!(current_handler(libc::SIGSEGV), before);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_enable_disable_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let before = current_handler(libc::SIGSEGV);
        let manager = ExceptionManager::new();
        assert_eq!(manager.state(), ManagerState::Uninitialized);

        manager.configure(options(dir.path(), true)).unwrap();
        assert!(manager.is_enabled());
        assert_ne!(current_handler(libc::SIGSEGV), before);
        manager.set_enabled(true).unwrap();
        assert!(manager.is_enabled());

        manager.set_enabled(false).unwrap();
        assert!(!manager.is_enabled());
        assert_eq!(current_handler(libc::SIGSEGV), before);
        assert!(!manager.configuration().unwrap().enable_track_app_crash);

        manager.set_enabled(true).unwrap();
        manager.stop();
        assert_eq!(manager.state(), ManagerState::Disabled);
        assert_eq!(current_handler(libc::SIGSEGV), before);
        // The flag is still set: start arms again.
        manager.start().unwrap();
        assert!(manager.is_enabled());
        manager.stop();
        // No crash happened, nothing is left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_invalid_configuration_ends_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ExceptionManager::new();
        manager.configure(options(dir.path(), true)).unwrap();

        let invalid = ExceptionOptions::new(true).with_storage_dir("relative/dir");
        assert!(matches!(
            manager.configure(invalid),
            Err(ManagerError::Configuration(
                ConfigurationError::RelativeStoreDir(_)
            ))
        ));
        assert_eq!(manager.state(), ManagerState::Disabled);
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_pending_crashes_reported_on_first_enable() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        write_previous_instance(
            &mut store,
            &[test_record(libc::SIGSEGV), test_record(libc::SIGABRT)],
        );

        let manager = ExceptionManager::new();
        let sink = Arc::new(QueueSink::new());
        assert_eq!(manager.set_event_sink(sink.clone()).unwrap(), None);
        manager.configure(options(dir.path(), true)).unwrap();

        let events = sink.take_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.name == "AppCrashed"));
        assert_eq!(manager.drain_pending().unwrap(), DrainSummary::default());
        manager.stop();
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_late_sink_triggers_drain() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PendingCrashStore::open(dir.path()).unwrap();
        write_previous_instance(&mut store, &[test_record(libc::SIGBUS)]);

        let manager = ExceptionManager::new();
        manager.configure(options(dir.path(), true)).unwrap();
        let sink = Arc::new(QueueSink::new());
        let summary = manager.set_event_sink(sink.clone()).unwrap().unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(sink.len(), 1);
        // Already drained.
        assert_eq!(manager.set_event_sink(sink.clone()).unwrap(), None);
        manager.stop();
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_set_enabled_before_configure_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(STORE_DIR_ENV, dir.path());
        let manager = ExceptionManager::new();
        manager.set_enabled(true).unwrap();
        assert!(manager.is_enabled());
        assert!(manager.configuration().unwrap().enable_track_app_crash);
        manager.stop();
        std::env::remove_var(STORE_DIR_ENV);
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_drain_before_configure() {
        let manager = ExceptionManager::new();
        assert!(matches!(
            manager.drain_pending(),
            Err(ManagerError::NotConfigured)
        ));
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_module_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ExceptionManager::new();
        manager.configure(options(dir.path(), false)).unwrap();
        let module: &dyn ExceptionModule = &manager;
        assert_eq!(module.module_name(), "Exception");
        module.set_enabled(true).unwrap();
        assert!(module.is_enabled());
        module.set_enabled(false).unwrap();
        assert!(!module.is_enabled());
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_update_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ExceptionManager::new();
        manager.configure(options(dir.path(), true)).unwrap();
        manager.update_metadata(ProcessMetadata::new("6.0.0", "Linux", "box", 1));
        assert_eq!(
            manager.lock().config.as_ref().unwrap().metadata().app_version,
            "6.0.0"
        );
        manager.stop();
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_concurrent_set_enabled_keeps_handlers_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let before = current_handler(libc::SIGSEGV);
        let manager = ExceptionManager::new();
        manager.configure(options(dir.path(), false)).unwrap();

        let manager = &manager;
        std::thread::scope(|s| {
            for worker in 0..8 {
                s.spawn(move || {
                    for round in 0..25 {
                        manager.set_enabled((worker + round) % 2 == 0).unwrap();
                        // Whatever the interleaving, the state and the handlers agree.
                        let inner = manager.lock();
                        let armed = inner.state == ManagerState::Enabled;
                        assert_eq!(inner.registry.is_installed(), armed);
                        assert_eq!(current_handler(libc::SIGSEGV) != before, armed);
                    }
                });
            }
        });

        let enabled = manager.is_enabled();
        assert_eq!(
            manager.configuration().unwrap().enable_track_app_crash,
            enabled
        );
        assert_eq!(current_handler(libc::SIGSEGV) != before, enabled);

        manager.set_enabled(true).unwrap();
        manager.stop();
        assert_eq!(current_handler(libc::SIGSEGV), before);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    #[serial]
    #[cfg_attr(miri, ignore)]
    fn test_refused_install_releases_segment() {
        let first_dir = tempfile::tempdir().unwrap();
        let second_dir = tempfile::tempdir().unwrap();
        let first = ExceptionManager::new();
        first.configure(options(first_dir.path(), true)).unwrap();

        let second = ExceptionManager::new();
        assert!(matches!(
            second.configure(options(second_dir.path(), true)),
            Err(ManagerError::Registry(RegistryError::AlreadyClaimed))
        ));
        assert_eq!(second.state(), ManagerState::Disabled);
        assert!(second
            .lock()
            .store
            .as_ref()
            .unwrap()
            .active_segment()
            .is_none());
        assert_eq!(std::fs::read_dir(second_dir.path()).unwrap().count(), 0);

        first.stop();
        assert_eq!(std::fs::read_dir(first_dir.path()).unwrap().count(), 0);
    }
}
