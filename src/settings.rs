//! Persisted controller settings.
//!
//! The store holds a working copy that commands edit and a persisted copy
//! that only changes on [`SettingsStore::save`].

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::protocol::commands::GainKind;

/// Proportional, integral and derivative gains of one loop.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PidGains {
    /// Proportional gain.
    pub p: f64,
    /// Integral gain.
    pub i: f64,
    /// Derivative gain.
    pub d: f64,
}

impl PidGains {
    /// Create gains.
    pub const fn new(p: f64, i: f64, d: f64) -> Self {
        Self { p, i, d }
    }

    /// The term of this loop that `kind` addresses.
    pub fn get(&self, kind: GainKind) -> f64 {
        match kind {
            GainKind::VoltageP | GainKind::AmpsP => self.p,
            GainKind::VoltageI | GainKind::AmpsI => self.i,
            GainKind::VoltageD | GainKind::AmpsD => self.d,
        }
    }

    /// Set the term of this loop that `kind` addresses.
    pub fn set(&mut self, kind: GainKind, value: f64) {
        match kind {
            GainKind::VoltageP | GainKind::AmpsP => self.p = value,
            GainKind::VoltageI | GainKind::AmpsI => self.i = value,
            GainKind::VoltageD | GainKind::AmpsD => self.d = value,
        }
    }
}

/// Everything the controller persists.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Settings {
    /// Voltage loop gains.
    pub voltage: PidGains,
    /// Current loop gains.
    pub current: PidGains,
    /// Whether the Bluetooth module has been configured.
    pub bt_initialized: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            voltage: PidGains::new(1.0, 0.1, 0.0),
            current: PidGains::new(0.5, 0.05, 0.0),
            bt_initialized: false,
        }
    }
}

impl Settings {
    /// Read one gain.
    pub fn gain(&self, kind: GainKind) -> f64 {
        self.loop_gains(kind).get(kind)
    }

    /// Set one gain.
    pub fn set_gain(&mut self, kind: GainKind, value: f64) {
        match kind {
            GainKind::VoltageP | GainKind::VoltageI | GainKind::VoltageD => {
                self.voltage.set(kind, value)
            }
            GainKind::AmpsP | GainKind::AmpsI | GainKind::AmpsD => self.current.set(kind, value),
        }
    }

    fn loop_gains(&self, kind: GainKind) -> &PidGains {
        match kind {
            GainKind::VoltageP | GainKind::VoltageI | GainKind::VoltageD => &self.voltage,
            GainKind::AmpsP | GainKind::AmpsI | GainKind::AmpsD => &self.current,
        }
    }
}

/// Settings storage used by the dispatcher and the initializer.
#[cfg_attr(test, mockall::automock)]
pub trait SettingsStore: Send + Sync {
    /// Snapshot of the working settings.
    fn settings(&self) -> Settings;

    /// Set a gain in the working settings.
    fn set_gain(&self, kind: GainKind, value: f64);

    /// Whether the module has been configured.
    fn bt_initialized(&self) -> bool;

    /// Mark the module as configured (or not).
    fn set_bt_initialized(&self, initialized: bool);

    /// Persist the working settings.
    fn save(&self) -> Result<()>;

    /// Reset the working settings to defaults without persisting.
    fn reset_to_defaults(&self);
}

/// Settings kept in memory.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    working: RwLock<Settings>,
    persisted: RwLock<Settings>,
}

impl MemorySettingsStore {
    /// Create a store whose working and persisted copies are `settings`.
    pub fn new(settings: Settings) -> Self {
        Self {
            working: RwLock::new(settings.clone()),
            persisted: RwLock::new(settings),
        }
    }

    /// The last saved settings.
    pub fn persisted(&self) -> Settings {
        self.persisted.read().clone()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn settings(&self) -> Settings {
        self.working.read().clone()
    }

    fn set_gain(&self, kind: GainKind, value: f64) {
        self.working.write().set_gain(kind, value);
    }

    fn bt_initialized(&self) -> bool {
        self.working.read().bt_initialized
    }

    fn set_bt_initialized(&self, initialized: bool) {
        self.working.write().bt_initialized = initialized;
    }

    fn save(&self) -> Result<()> {
        let snapshot = self.working.read().clone();
        *self.persisted.write() = snapshot;
        debug!("Settings saved to memory");
        Ok(())
    }

    fn reset_to_defaults(&self) {
        let mut working = self.working.write();
        let bt_initialized = working.bt_initialized;
        *working = Settings {
            bt_initialized,
            ..Settings::default()
        };
        info!("Settings reset to defaults");
    }
}

#[cfg(feature = "serde")]
pub use json::JsonFileSettingsStore;

#[cfg(feature = "serde")]
mod json {
    use parking_lot::RwLock;
    use std::ffi::OsString;
    use std::fs::File;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tracing::{debug, info, warn};

    use super::{Settings, SettingsStore};
    use crate::error::{Error, Result};
    use crate::protocol::commands::GainKind;

    /// Settings persisted as a JSON file.
    #[derive(Debug)]
    pub struct JsonFileSettingsStore {
        path: PathBuf,
        working: RwLock<Settings>,
    }

    impl JsonFileSettingsStore {
        /// Load settings from `path`, falling back to defaults if the file
        /// does not exist yet.
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref().to_path_buf();
            let settings = if path.exists() {
                let text = std::fs::read_to_string(&path)?;
                serde_json::from_str(&text).map_err(|e| Error::Settings {
                    reason: format!("{}: {}", path.display(), e),
                })?
            } else {
                warn!("No settings at {}, using defaults", path.display());
                Settings::default()
            };

            debug!("Loaded settings from {}", path.display());

            Ok(Self {
                path,
                working: RwLock::new(settings),
            })
        }

        /// Path of the backing file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Sibling file a save is staged in before it replaces the original.
        fn staging_path(&self) -> PathBuf {
            let mut name = self
                .path
                .file_name()
                .map(OsString::from)
                .unwrap_or_else(|| OsString::from("settings"));
            name.push(".tmp");
            self.path.with_file_name(name)
        }
    }

    impl SettingsStore for JsonFileSettingsStore {
        fn settings(&self) -> Settings {
            self.working.read().clone()
        }

        fn set_gain(&self, kind: GainKind, value: f64) {
            self.working.write().set_gain(kind, value);
        }

        fn bt_initialized(&self) -> bool {
            self.working.read().bt_initialized
        }

        fn set_bt_initialized(&self, initialized: bool) {
            self.working.write().bt_initialized = initialized;
        }

        fn save(&self) -> Result<()> {
            let text = serde_json::to_string_pretty(&*self.working.read()).map_err(|e| {
                Error::Settings {
                    reason: e.to_string(),
                }
            })?;

            // The original is only ever replaced whole, by rename.
            let staging = self.staging_path();
            let mut file = File::create(&staging)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
            drop(file);
            if let Err(e) = std::fs::rename(&staging, &self.path) {
                let _ = std::fs::remove_file(&staging);
                return Err(e.into());
            }

            info!("Settings saved to {}", self.path.display());
            Ok(())
        }

        fn reset_to_defaults(&self) {
            let mut working = self.working.write();
            let bt_initialized = working.bt_initialized;
            *working = Settings {
                bt_initialized,
                ..Settings::default()
            };
        }
    }

}
