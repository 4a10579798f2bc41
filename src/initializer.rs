//! First-boot configuration of the Bluetooth module.
//!
//! Runs once, when the persisted `bt_initialized` flag is false. The
//! sequence enters command mode, writes the fixed configuration and reboots
//! the module. Each command waits a bounded time for the `CMD> ` prompt; a
//! missing prompt is recorded and the sequence carries on.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, error, info, warn};

use crate::link::writer::Writer;
use crate::protocol::commands::ModuleCommand;
use crate::protocol::frame::ParserEvent;
use crate::protocol::status::{ConnectionStatus, StatusTracker};
use crate::settings::SettingsStore;

/// Result of waiting for the command prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptWait {
    /// The module printed `CMD> ` within the bound.
    Prompted,
    /// No prompt arrived in time.
    TimedOut,
}

/// Outcome of one configuration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Command written and prompt received.
    Acknowledged,
    /// Command written, prompt never came.
    TimedOut,
    /// The transport refused the write.
    SendFailed,
}

/// One command of the sequence and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitStep {
    /// Command that was sent.
    pub command: ModuleCommand,
    /// What happened.
    pub outcome: StepOutcome,
}

/// Summary of an initialization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Steps in send order.
    pub steps: Vec<InitStep>,
}

impl InitReport {
    /// Whether every command was acknowledged.
    pub fn all_acknowledged(&self) -> bool {
        self.steps
            .iter()
            .all(|step| step.outcome == StepOutcome::Acknowledged)
    }

    /// Steps that did not see a prompt.
    pub fn timed_out(&self) -> impl Iterator<Item = &InitStep> {
        self.steps
            .iter()
            .filter(|step| step.outcome == StepOutcome::TimedOut)
    }
}

/// Wait for the next `CMD> ` prompt on `events`.
///
/// Other events are skipped. Never fails: the caller gets
/// [`PromptWait::TimedOut`] if nothing arrives within `timeout`.
pub async fn wait_for_prompt(
    events: &mut broadcast::Receiver<ParserEvent>,
    timeout: Duration,
) -> PromptWait {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(ParserEvent::CommandPrompt) => return PromptWait::Prompted,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {} parser events while waiting for prompt", skipped);
                }
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .unwrap_or(PromptWait::TimedOut)
}

/// One-shot module configuration sequence.
pub struct InitSequencer {
    writer: Writer,
    status: Arc<StatusTracker>,
    settings: Arc<dyn SettingsStore>,
    events: broadcast::Sender<ParserEvent>,
    commands: Vec<ModuleCommand>,
    settle_delay: Duration,
    prompt_timeout: Duration,
}

impl InitSequencer {
    /// Create a sequencer for `commands`.
    ///
    /// `events` is the sender the reader publishes parser events on.
    pub fn new(
        writer: Writer,
        status: Arc<StatusTracker>,
        settings: Arc<dyn SettingsStore>,
        events: broadcast::Sender<ParserEvent>,
        commands: Vec<ModuleCommand>,
    ) -> Self {
        Self {
            writer,
            status,
            settings,
            events,
            commands,
            settle_delay: Duration::from_millis(500),
            prompt_timeout: Duration::from_secs(10),
        }
    }

    /// Set the settle delay and per-command prompt timeout.
    pub fn with_timing(mut self, settle_delay: Duration, prompt_timeout: Duration) -> Self {
        self.settle_delay = settle_delay;
        self.prompt_timeout = prompt_timeout;
        self
    }

    /// Run the sequence and mark the module as initialized.
    ///
    /// The flag is set and saved even if steps timed out.
    pub async fn run(self) -> InitReport {
        info!("Configuring Bluetooth module ({} commands)", self.commands.len());

        self.status.force(ConnectionStatus::NotReady);
        tokio::time::sleep(self.settle_delay).await;

        let mut events = self.events.subscribe();
        let mut report = InitReport::default();

        {
            let mut session = self.writer.command_session().await;

            for command in &self.commands {
                drain(&mut events);

                if let Err(e) = session.send_command(command) {
                    error!("Failed to send {}: {}", command, e);
                    report.steps.push(InitStep {
                        command: command.clone(),
                        outcome: StepOutcome::SendFailed,
                    });
                    continue;
                }

                let outcome = match wait_for_prompt(&mut events, self.prompt_timeout).await {
                    PromptWait::Prompted => {
                        debug!("{} acknowledged", command);
                        StepOutcome::Acknowledged
                    }
                    PromptWait::TimedOut => {
                        warn!("No prompt after {} within {:?}", command, self.prompt_timeout);
                        StepOutcome::TimedOut
                    }
                };

                report.steps.push(InitStep {
                    command: command.clone(),
                    outcome,
                });
            }
        }

        self.settings.set_bt_initialized(true);
        if let Err(e) = self.settings.save() {
            error!("Failed to persist initialization flag: {}", e);
        }

        info!(
            "Bluetooth module configured ({} of {} steps acknowledged)",
            report
                .steps
                .iter()
                .filter(|s| s.outcome == StepOutcome::Acknowledged)
                .count(),
            report.steps.len()
        );

        report
    }
}

/// Discard events left over from earlier commands.
fn drain(events: &mut broadcast::Receiver<ParserEvent>) {
    loop {
        match events.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}
