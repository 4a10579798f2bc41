//! Module connection status.
//!
//! The module reports its connection lifecycle with `%`-delimited tokens.
//! [`apply_token`] maps a token to the status it implies; [`StatusTracker`]
//! holds the live value that gates the writer.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Connection status of the SPP link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionStatus {
    /// No status token seen yet, or an unrecognized one.
    #[default]
    Unknown,
    /// RFCOMM channel is open; application data may be written.
    Ready,
    /// Connected, disconnected, rebooting or being configured.
    NotReady,
}

impl ConnectionStatus {
    /// Check if writes are allowed.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Ready => write!(f, "Ready"),
            Self::NotReady => write!(f, "NotReady"),
        }
    }
}

/// Status tokens the module is known to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusToken {
    /// `%CONNECT%`: ACL link established.
    Connect,
    /// `%DISCONN%`: link dropped.
    Disconnect,
    /// `%RFCOMM_OPEN%`: SPP data channel opened.
    RfcommOpen,
    /// `%RFCOMM_CLOSE%`: SPP data channel closed.
    RfcommClose,
    /// `%REBOOT%`: module restarted.
    Reboot,
}

/// Token identifiers and the status each one implies.
const TOKEN_TABLE: &[(&str, StatusToken, ConnectionStatus)] = &[
    ("CONNECT", StatusToken::Connect, ConnectionStatus::NotReady),
    ("DISCONN", StatusToken::Disconnect, ConnectionStatus::NotReady),
    ("RFCOMM_OPEN", StatusToken::RfcommOpen, ConnectionStatus::Ready),
    ("RFCOMM_CLOSE", StatusToken::RfcommClose, ConnectionStatus::NotReady),
    ("REBOOT", StatusToken::Reboot, ConnectionStatus::NotReady),
];

impl StatusToken {
    /// Decode a raw `%...%` token.
    ///
    /// The identifier runs from after the opening `%` up to the first `,`
    /// or the closing `%`. Anything after the comma is payload and is not
    /// interpreted.
    pub fn decode(raw: &str) -> Option<Self> {
        let inner = raw.strip_prefix('%')?;
        let inner = inner.strip_suffix('%').unwrap_or(inner);
        let identifier = inner.split(',').next().unwrap_or(inner);

        TOKEN_TABLE
            .iter()
            .find(|(name, _, _)| *name == identifier)
            .map(|(_, token, _)| *token)
    }

    /// The status this token implies.
    pub fn status(&self) -> ConnectionStatus {
        TOKEN_TABLE
            .iter()
            .find(|(_, token, _)| token == self)
            .map(|(_, _, status)| *status)
            .unwrap_or_default()
    }
}

/// Map a raw token to the resulting connection status.
///
/// Empty or unrecognized tokens yield [`ConnectionStatus::Unknown`].
pub fn apply_token(raw: &str) -> ConnectionStatus {
    StatusToken::decode(raw)
        .map(|token| token.status())
        .unwrap_or_default()
}

/// Event for connection status changes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusChange {
    /// Status before the change.
    pub previous: ConnectionStatus,
    /// Status after the change.
    pub current: ConnectionStatus,
    /// Token that caused the change, if any.
    pub token: Option<String>,
    /// When the change was applied.
    pub at: DateTime<Utc>,
}

/// Holds the live connection status.
pub struct StatusTracker {
    status: RwLock<ConnectionStatus>,
    event_tx: broadcast::Sender<StatusChange>,
}

impl StatusTracker {
    /// Create a tracker starting at [`ConnectionStatus::Unknown`].
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            status: RwLock::new(ConnectionStatus::Unknown),
            event_tx,
        }
    }

    /// Get the current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.event_tx.subscribe()
    }

    /// Apply a status token received from the module.
    pub fn on_status_token(&self, token: &str) -> ConnectionStatus {
        let status = apply_token(token);
        if status == ConnectionStatus::Unknown {
            warn!("Unrecognized status token: {}", token);
        } else {
            info!("Module status {} -> {}", token, status);
        }

        self.set(status, Some(token.to_string()));
        status
    }

    /// Force a status, e.g. while the module is being reconfigured.
    pub fn force(&self, status: ConnectionStatus) {
        self.set(status, None);
    }

    fn set(&self, new_status: ConnectionStatus, token: Option<String>) {
        let previous = {
            let mut status = self.status.write();
            let old = *status;
            *status = new_status;
            old
        };

        if previous != new_status {
            debug!("Connection status changed: {} -> {}", previous, new_status);

            let _ = self.event_tx.send(StatusChange {
                previous,
                current: new_status,
                token,
                at: Utc::now(),
            });
        }
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new(16)
    }
}
