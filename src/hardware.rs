//! Capabilities the driver borrows from the host firmware.
//!
//! The driver never owns GPIO or the control loop; it is handed these
//! traits and calls them at well-defined points.

use parking_lot::RwLock;

use crate::error::Result;
use crate::protocol::commands::GainKind;
use crate::settings::PidGains;

/// Live PID controller whose gains can be changed at runtime.
#[cfg_attr(test, mockall::automock)]
pub trait GainController: Send + Sync {
    /// Apply a new gain immediately.
    fn set_gain(&self, kind: GainKind, value: f64);
}

/// Levels for the module's control lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleLines {
    /// Module supply enable.
    pub power_enable: bool,
    /// First boot-mode strap (P2_0 on RN4678).
    pub mode_a: bool,
    /// Second boot-mode strap (P2_4 on RN4678).
    pub mode_b: bool,
    /// Whether reset is asserted.
    pub reset_asserted: bool,
}

impl ModuleLines {
    /// Powered, booting application firmware from flash, reset released.
    pub const APPLICATION: Self = Self {
        power_enable: true,
        mode_a: true,
        mode_b: true,
        reset_asserted: false,
    };
}

/// Drives the module's power, mode and reset lines.
#[cfg_attr(test, mockall::automock)]
pub trait PowerControl: Send + Sync {
    /// Set all lines at once.
    fn set_lines(&self, lines: ModuleLines) -> Result<()>;
}

/// No-op power control for modules that are hard-wired on.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOn;

impl PowerControl for AlwaysOn {
    fn set_lines(&self, _lines: ModuleLines) -> Result<()> {
        Ok(())
    }
}

/// Gain controller that just stores the values, for hosts that poll them.
#[derive(Debug, Default)]
pub struct SharedGains {
    voltage: RwLock<PidGains>,
    current: RwLock<PidGains>,
}

impl SharedGains {
    /// Create with the given starting gains.
    pub fn new(voltage: PidGains, current: PidGains) -> Self {
        Self {
            voltage: RwLock::new(voltage),
            current: RwLock::new(current),
        }
    }

    /// Current voltage loop gains.
    pub fn voltage(&self) -> PidGains {
        *self.voltage.read()
    }

    /// Current amps loop gains.
    pub fn current(&self) -> PidGains {
        *self.current.read()
    }

    /// Read one gain.
    pub fn gain(&self, kind: GainKind) -> f64 {
        match kind {
            GainKind::VoltageP | GainKind::VoltageI | GainKind::VoltageD => {
                self.voltage.read().get(kind)
            }
            GainKind::AmpsP | GainKind::AmpsI | GainKind::AmpsD => self.current.read().get(kind),
        }
    }
}

impl GainController for SharedGains {
    fn set_gain(&self, kind: GainKind, value: f64) {
        match kind {
            GainKind::VoltageP | GainKind::VoltageI | GainKind::VoltageD => {
                self.voltage.write().set(kind, value)
            }
            GainKind::AmpsP | GainKind::AmpsI | GainKind::AmpsD => {
                self.current.write().set(kind, value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_lines() {
        let lines = ModuleLines::APPLICATION;
        assert!(lines.power_enable);
        assert!(!lines.reset_asserted);
    }

    #[test]
    fn test_shared_gains() {
        let gains = SharedGains::default();
        gains.set_gain(GainKind::VoltageP, 2.5);
        gains.set_gain(GainKind::AmpsD, 0.125);

        assert_eq!(gains.gain(GainKind::VoltageP), 2.5);
        assert_eq!(gains.voltage().p, 2.5);
        assert_eq!(gains.current().d, 0.125);
        assert_eq!(gains.gain(GainKind::AmpsP), 0.0);
    }
}
