//! Command dispatch for lines received from the paired device.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hardware::GainController;
use crate::link::writer::Writer;
use crate::protocol::commands::{Command, GainKind, Keyword};
use crate::settings::SettingsStore;

/// Reference text sent in reply to `help`, one write per line.
pub const HELP_TEXT: &[&str] = &[
    "Commands:",
    "  help              show this text",
    "  go | stop         start/stop performance data",
    "  perf:<0|1>        disable/enable performance data",
    "  svp|svi|svd:<x>   set voltage P/I/D gain",
    "  sap|sai|sad:<x>   set amps P/I/D gain",
    "  save              write settings to storage",
    "  defaults          restore defaults (send save to keep them)",
];

/// Reply to `save`.
pub const SAVED_REPLY: &str = "Settings saved";

/// Reply to `defaults`.
pub const DEFAULTS_REPLY: &str = "Defaults restored, send save to persist";

/// Applies decoded commands to the settings store and the live controller.
pub struct CommandDispatcher {
    writer: Writer,
    settings: Arc<dyn SettingsStore>,
    controller: Arc<dyn GainController>,
}

impl CommandDispatcher {
    /// Create a dispatcher.
    pub fn new(
        writer: Writer,
        settings: Arc<dyn SettingsStore>,
        controller: Arc<dyn GainController>,
    ) -> Self {
        Self {
            writer,
            settings,
            controller,
        }
    }

    /// Handle one data line. Failures are logged and never escalate.
    pub async fn on_data_line(&self, line: &str) {
        match self.dispatch(line).await {
            Ok(()) => {}
            Err(e @ Error::InvalidCommand { .. }) => debug!("{}", e),
            Err(e) => warn!("Command {:?} aborted: {}", line, e),
        }
    }

    /// Handle one data line, reporting how it failed.
    ///
    /// An unknown bare word is answered with an error line and returned as
    /// [`Error::InvalidCommand`]. A gain value that does not parse aborts
    /// the command before any setting changes.
    pub async fn dispatch(&self, line: &str) -> Result<()> {
        match Command::decode(line) {
            Command::Keyword(keyword) => self.run_keyword(keyword).await,
            Command::Perf(enabled) => {
                self.writer.set_perf_data_enabled(enabled);
                Ok(())
            }
            Command::SetGain { kind, value } => self.set_gain(kind, &value).await,
            Command::Invalid(line) => {
                self.writer
                    .send(&format!("ERROR: invalid command '{line}', send help"), false)
                    .await;
                Err(Error::InvalidCommand { line })
            }
            Command::Ignored { key, value } => {
                debug!("Ignoring {:?}:{:?}", key, value);
                Ok(())
            }
        }
    }

    async fn run_keyword(&self, keyword: Keyword) -> Result<()> {
        match keyword {
            Keyword::Help => {
                for line in HELP_TEXT {
                    self.writer.send(line, false).await;
                }
            }
            Keyword::Stop => self.writer.set_perf_data_enabled(false),
            Keyword::Go => self.writer.set_perf_data_enabled(true),
            Keyword::Save => {
                if let Err(e) = self.settings.save() {
                    self.writer.send("ERROR: save failed", false).await;
                    return Err(e);
                }
                info!("Settings saved on request");
                self.writer.send(SAVED_REPLY, false).await;
            }
            Keyword::Defaults => {
                self.settings.reset_to_defaults();
                self.writer.send(DEFAULTS_REPLY, false).await;
            }
        }
        Ok(())
    }

    async fn set_gain(&self, kind: GainKind, value: &str) -> Result<()> {
        let gain = value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::InvalidValue {
                key: kind.key().to_string(),
                value: value.to_string(),
            })?;

        self.settings.set_gain(kind, gain);
        self.controller.set_gain(kind, gain);
        info!("{} gain set to {}", kind, gain);

        self.writer
            .send(&format!("{kind} gain set to {gain}"), false)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockGainController, SharedGains};
    use crate::link::transport::MemoryTransport;
    use crate::protocol::status::StatusTracker;
    use crate::settings::{MemorySettingsStore, MockSettingsStore, Settings};
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    struct Harness {
        transport: MemoryTransport,
        writer: Writer,
        settings: Arc<MemorySettingsStore>,
        gains: Arc<SharedGains>,
        dispatcher: CommandDispatcher,
    }

    fn harness() -> Harness {
        let transport = MemoryTransport::new();
        let status = Arc::new(StatusTracker::default());
        status.on_status_token("%RFCOMM_OPEN%");
        let writer = Writer::new(Arc::new(transport.clone()), status, 255, true);
        let settings = Arc::new(MemorySettingsStore::default());
        let gains = Arc::new(SharedGains::default());
        let dispatcher = CommandDispatcher::new(writer.clone(), settings.clone(), gains.clone());

        Harness {
            transport,
            writer,
            settings,
            gains,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn test_set_voltage_p() {
        let h = harness();
        h.dispatcher.dispatch("svp:2.5").await.unwrap();

        assert_eq!(h.settings.settings().voltage.p, 2.5);
        assert_eq!(h.gains.gain(GainKind::VoltageP), 2.5);
        assert_eq!(
            h.transport.written_lines(),
            vec!["Voltage P gain set to 2.5\r\n".to_string()]
        );
    }

    #[tokio::test]
    async fn test_gain_with_mocks() {
        let transport = MemoryTransport::new();
        let status = Arc::new(StatusTracker::default());
        status.on_status_token("%RFCOMM_OPEN%");
        let writer = Writer::new(Arc::new(transport.clone()), status, 255, false);

        let mut settings = MockSettingsStore::new();
        settings
            .expect_set_gain()
            .with(eq(GainKind::AmpsI), eq(0.25))
            .times(1)
            .return_const(());
        let mut controller = MockGainController::new();
        controller
            .expect_set_gain()
            .with(eq(GainKind::AmpsI), eq(0.25))
            .times(1)
            .return_const(());

        let dispatcher = CommandDispatcher::new(writer, Arc::new(settings), Arc::new(controller));
        dispatcher.dispatch("sai:0.25").await.unwrap();
        assert_eq!(transport.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_every_gain_key() {
        let h = harness();
        for (i, kind) in GainKind::ALL.iter().enumerate() {
            let value = i as f64 + 0.5;
            h.dispatcher
                .dispatch(&format!("{}:{}", kind.key(), value))
                .await
                .unwrap();
            assert_eq!(h.settings.settings().gain(*kind), value);
            assert_eq!(h.gains.gain(*kind), value);
        }
        assert_eq!(h.transport.writes().len(), GainKind::ALL.len());
    }

    #[tokio::test]
    async fn test_unparsable_gain_aborts() {
        let h = harness();
        let before = h.settings.settings();

        let result = h.dispatcher.dispatch("svp:abc").await;
        assert!(matches!(result, Err(Error::InvalidValue { .. })));
        assert!(h.dispatcher.dispatch("svd:NaN").await.is_err());

        assert_eq!(h.settings.settings(), before);
        assert_eq!(h.gains.gain(GainKind::VoltageP), 0.0);
        assert!(h.transport.writes().is_empty());

        // The line-level entry point swallows the failure.
        h.dispatcher.on_data_line("svp:abc").await;
    }

    #[tokio::test]
    async fn test_invalid_command() {
        let h = harness();
        let before = h.settings.settings();
        let perf_before = h.writer.perf_data_enabled();

        let result = h.dispatcher.dispatch("foo").await;
        assert!(matches!(result, Err(Error::InvalidCommand { ref line }) if line == "foo"));

        assert_eq!(
            h.transport.written_lines(),
            vec!["ERROR: invalid command 'foo', send help\r\n".to_string()]
        );
        assert_eq!(h.settings.settings(), before);
        assert_eq!(h.writer.perf_data_enabled(), perf_before);
    }

    #[tokio::test]
    async fn test_unknown_key_is_silent() {
        // Unknown keys get no reply, unlike unknown bare words.
        let h = harness();
        h.dispatcher.dispatch("xyz:1").await.unwrap();
        h.dispatcher.dispatch("svp:").await.unwrap();
        h.dispatcher.dispatch(":1").await.unwrap();

        assert!(h.transport.writes().is_empty());
        assert_eq!(h.settings.settings(), Settings::default());
    }

    #[tokio::test]
    async fn test_perf_toggle_gates_telemetry() {
        let h = harness();

        h.dispatcher.dispatch("perf:0").await.unwrap();
        assert!(!h.writer.perf_data_enabled());
        assert!(!h.writer.send_telemetry("v=1").await);

        h.dispatcher.dispatch("perf:1").await.unwrap();
        assert!(h.writer.perf_data_enabled());
        assert!(h.writer.send_telemetry("v=2").await);

        assert_eq!(h.transport.written_lines(), vec!["v=2\r\n".to_string()]);
    }

    #[tokio::test]
    async fn test_go_and_stop() {
        let h = harness();
        h.dispatcher.dispatch("stop").await.unwrap();
        assert!(!h.writer.perf_data_enabled());
        h.dispatcher.dispatch("go").await.unwrap();
        assert!(h.writer.perf_data_enabled());
        assert!(h.transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_help() {
        let h = harness();
        h.dispatcher.dispatch("help").await.unwrap();

        let expected: Vec<String> = HELP_TEXT.iter().map(|l| format!("{l}\r\n")).collect();
        assert_eq!(h.transport.written_lines(), expected);
    }

    #[tokio::test]
    async fn test_save_and_defaults() {
        let h = harness();
        h.dispatcher.dispatch("svi:3").await.unwrap();
        h.dispatcher.dispatch("save").await.unwrap();
        assert_eq!(h.settings.persisted().voltage.i, 3.0);

        h.dispatcher.dispatch("defaults").await.unwrap();
        assert_eq!(h.settings.settings().voltage.i, 0.1);
        assert_eq!(h.settings.persisted().voltage.i, 3.0);

        let lines = h.transport.written_lines();
        assert_eq!(lines[1], format!("{SAVED_REPLY}\r\n"));
        assert_eq!(lines[2], format!("{DEFAULTS_REPLY}\r\n"));
    }

    #[tokio::test]
    async fn test_save_failure_reported() {
        let transport = MemoryTransport::new();
        let status = Arc::new(StatusTracker::default());
        status.on_status_token("%RFCOMM_OPEN%");
        let writer = Writer::new(Arc::new(transport.clone()), status, 255, false);

        let mut settings = MockSettingsStore::new();
        settings.expect_save().times(1).returning(|| {
            Err(Error::Settings {
                reason: "flash busy".to_string(),
            })
        });

        let dispatcher = CommandDispatcher::new(
            writer,
            Arc::new(settings),
            Arc::new(MockGainController::new()),
        );

        assert!(dispatcher.dispatch("save").await.is_err());
        assert_eq!(
            transport.written_lines(),
            vec!["ERROR: save failed\r\n".to_string()]
        );
    }
}
