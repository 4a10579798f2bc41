//! Command grammars.
//!
//! Two directions share this module:
//! - inbound application commands arriving as SPP data lines
//!   (`help`, `go`, `svp:2.5`, ...), decoded into [`Command`]
//! - outbound module configuration commands sent in command mode during
//!   first-boot initialization ([`ModuleCommand`])

use std::fmt;

/// Gain slot on the PID controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GainKind {
    /// Voltage loop proportional gain.
    VoltageP,
    /// Voltage loop integral gain.
    VoltageI,
    /// Voltage loop derivative gain.
    VoltageD,
    /// Current loop proportional gain.
    AmpsP,
    /// Current loop integral gain.
    AmpsI,
    /// Current loop derivative gain.
    AmpsD,
}

impl GainKind {
    /// All gain slots.
    pub const ALL: [GainKind; 6] = [
        Self::VoltageP,
        Self::VoltageI,
        Self::VoltageD,
        Self::AmpsP,
        Self::AmpsI,
        Self::AmpsD,
    ];

    /// The command key that sets this gain.
    pub fn key(&self) -> &'static str {
        match self {
            Self::VoltageP => "svp",
            Self::VoltageI => "svi",
            Self::VoltageD => "svd",
            Self::AmpsP => "sap",
            Self::AmpsI => "sai",
            Self::AmpsD => "sad",
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::VoltageP => "Voltage P",
            Self::VoltageI => "Voltage I",
            Self::VoltageD => "Voltage D",
            Self::AmpsP => "Amps P",
            Self::AmpsI => "Amps I",
            Self::AmpsD => "Amps D",
        }
    }

    /// Look up a gain by its command key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.key() == key)
    }
}

impl fmt::Display for GainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bare keyword commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    /// Print the command reference.
    Help,
    /// Stop streaming telemetry.
    Stop,
    /// Start streaming telemetry.
    Go,
    /// Persist all settings.
    Save,
    /// Restore default settings (not persisted until `save`).
    Defaults,
}

const KEYWORD_TABLE: &[(&str, Keyword)] = &[
    ("help", Keyword::Help),
    ("stop", Keyword::Stop),
    ("go", Keyword::Go),
    ("save", Keyword::Save),
    ("defaults", Keyword::Defaults),
];

impl Keyword {
    /// Look up a keyword. Matching is case-sensitive.
    pub fn lookup(word: &str) -> Option<Self> {
        KEYWORD_TABLE
            .iter()
            .find(|(name, _)| *name == word)
            .map(|(_, keyword)| *keyword)
    }
}

/// Key of the telemetry gate command.
pub const PERF_KEY: &str = "perf";

/// A decoded inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A bare keyword.
    Keyword(Keyword),
    /// `perf:<value>`; only `1` enables.
    Perf(bool),
    /// A gain key with its raw, not yet parsed value.
    SetGain {
        /// Target gain.
        kind: GainKind,
        /// Value text as received.
        value: String,
    },
    /// A line without `:` that is not a keyword. Reported to the sender.
    Invalid(String),
    /// A `key:value` line with an empty side or an unknown key. Dropped
    /// without a reply.
    Ignored {
        /// Key text (may be empty).
        key: String,
        /// Value text (may be empty).
        value: String,
    },
}

impl Command {
    /// Decode a data line.
    ///
    /// Lines without `:` must be keywords. Lines with `:` split on the first
    /// colon; both halves must be non-empty and the key must be known.
    pub fn decode(line: &str) -> Self {
        let Some((key, value)) = line.split_once(':') else {
            return match Keyword::lookup(line) {
                Some(keyword) => Self::Keyword(keyword),
                None => Self::Invalid(line.to_string()),
            };
        };

        if key.is_empty() || value.is_empty() {
            return Self::Ignored {
                key: key.to_string(),
                value: value.to_string(),
            };
        }

        if key == PERF_KEY {
            return Self::Perf(value == "1");
        }

        match GainKind::from_key(key) {
            Some(kind) => Self::SetGain {
                kind,
                value: value.to_string(),
            },
            None => Self::Ignored {
                key: key.to_string(),
                value: value.to_string(),
            },
        }
    }
}

/// Bluetooth mode argument for `SG`.
pub const MODE_DUAL: &str = "0";
/// Authentication argument for `SA`: "just works" pairing.
pub const AUTH_JUST_WORKS: &str = "2";
/// Feature bitmap for `SQ`: no flow-control wait on boot, reboot after disconnect.
pub const FEATURES: &str = "4000";
/// Argument for `SY`: maximum transmit power.
pub const TX_POWER_MAX: &str = "0004";
/// Argument for `SJ`: page scan window.
pub const SCAN_WINDOW: &str = "0200";

/// A configuration command for the module's command mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleCommand {
    /// `$$$`: enter command mode.
    EnterCommandMode,
    /// `SG,<mode>`: dual-mode / classic selection.
    SetMode(String),
    /// `SA,<auth>`: pairing method.
    SetAuthentication(String),
    /// `SN,<name>`: device name.
    SetName(String),
    /// `SQ,<bitmap>`: flow control and auto-reboot features.
    SetFeatures(String),
    /// `SY,<power>`: transmit power.
    SetTxPower(String),
    /// `SJ,<window>`: scan window.
    SetScanWindow(String),
    /// `R,1`: reboot to apply settings.
    Reboot,
}

impl ModuleCommand {
    /// Command text without terminator.
    pub fn text(&self) -> String {
        match self {
            Self::EnterCommandMode => "$$$".to_string(),
            Self::SetMode(mode) => format!("SG,{mode}"),
            Self::SetAuthentication(auth) => format!("SA,{auth}"),
            Self::SetName(name) => format!("SN,{name}"),
            Self::SetFeatures(bitmap) => format!("SQ,{bitmap}"),
            Self::SetTxPower(power) => format!("SY,{power}"),
            Self::SetScanWindow(window) => format!("SJ,{window}"),
            Self::Reboot => "R,1".to_string(),
        }
    }

    /// Wire bytes: command text followed by a bare `\r`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.text().into_bytes();
        bytes.push(b'\r');
        bytes
    }
}

impl fmt::Display for ModuleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// The first-boot configuration sequence, in send order.
pub fn init_sequence(device_name: &str) -> Vec<ModuleCommand> {
    vec![
        ModuleCommand::EnterCommandMode,
        ModuleCommand::SetMode(MODE_DUAL.to_string()),
        ModuleCommand::SetAuthentication(AUTH_JUST_WORKS.to_string()),
        ModuleCommand::SetName(device_name.to_string()),
        ModuleCommand::SetFeatures(FEATURES.to_string()),
        ModuleCommand::SetTxPower(TX_POWER_MAX.to_string()),
        ModuleCommand::SetScanWindow(SCAN_WINDOW.to_string()),
        ModuleCommand::Reboot,
    ]
}
