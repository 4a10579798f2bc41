//! Driver that owns the link to the Bluetooth module.
//!
//! [`LinkDriver`] wires the transport, parser, status tracker, dispatcher,
//! writer and initializer together and manages their tasks.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::dispatcher::CommandDispatcher;
use crate::error::{Error, Result};
use crate::hardware::{GainController, ModuleLines, PowerControl};
use crate::initializer::{InitReport, InitSequencer};
use crate::link::reader::Reader;
use crate::link::transport::Transport;
use crate::link::writer::Writer;
use crate::protocol::commands::init_sequence;
use crate::protocol::frame::ParserEvent;
use crate::protocol::status::{ConnectionStatus, StatusChange, StatusTracker};
use crate::settings::SettingsStore;

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    initializer: Option<JoinHandle<InitReport>>,
}

/// Central driver for one Bluetooth serial module.
pub struct LinkDriver {
    config: DriverConfig,
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsStore>,
    controller: Arc<dyn GainController>,
    power: Arc<dyn PowerControl>,
    status: Arc<StatusTracker>,
    writer: Writer,
    event_tx: broadcast::Sender<ParserEvent>,
    tasks: RwLock<Tasks>,
    is_running: Arc<AtomicBool>,
    /// Keeps the reader polling; cleared only after the initializer ends.
    reader_running: Arc<AtomicBool>,
}

impl LinkDriver {
    /// Create a driver. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: DriverConfig,
        transport: Arc<dyn Transport>,
        settings: Arc<dyn SettingsStore>,
        controller: Arc<dyn GainController>,
        power: Arc<dyn PowerControl>,
    ) -> Self {
        let status = Arc::new(StatusTracker::new(config.event_capacity));
        let writer = Writer::new(
            transport.clone(),
            status.clone(),
            config.max_payload_len,
            config.perf_data_enabled,
        );
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            config,
            transport,
            settings,
            controller,
            power,
            status,
            writer,
            event_tx,
            tasks: RwLock::new(Tasks::default()),
            is_running: Arc::new(AtomicBool::new(false)),
            reader_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Power the module and start the reader, dispatcher and, on first
    /// boot, the initializer.
    pub async fn start(&self) -> Result<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        if let Err(e) = self.power.set_lines(ModuleLines::APPLICATION) {
            self.is_running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!("Starting Bluetooth link driver");

        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

        let reader = Reader::new(
            self.transport.clone(),
            self.status.clone(),
            self.event_tx.clone(),
            line_tx,
            self.config.poll_interval,
        );
        self.reader_running.store(true, Ordering::SeqCst);
        let reader_handle = tokio::spawn(reader.run(self.reader_running.clone()));

        let dispatcher = CommandDispatcher::new(
            self.writer.clone(),
            self.settings.clone(),
            self.controller.clone(),
        );
        let dispatcher_handle = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                dispatcher.on_data_line(&line).await;
            }
            debug!("Dispatcher task ended");
        });

        let initializer_handle = if self.settings.bt_initialized() {
            debug!("Module already configured, skipping initialization");
            None
        } else {
            let sequencer = InitSequencer::new(
                self.writer.clone(),
                self.status.clone(),
                self.settings.clone(),
                self.event_tx.clone(),
                init_sequence(&self.config.device_name),
            )
            .with_timing(self.config.settle_delay, self.config.prompt_timeout);
            Some(tokio::spawn(sequencer.run()))
        };

        *self.tasks.write() = Tasks {
            reader: Some(reader_handle),
            dispatcher: Some(dispatcher_handle),
            initializer: initializer_handle,
        };

        Ok(())
    }

    /// Wait for the tasks to finish, then stop the reader.
    ///
    /// A running initializer completes its remaining steps first, with the
    /// reader still polling so prompts are seen. Returns its report if it ran.
    pub async fn shutdown(&self) -> Result<Option<InitReport>> {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }

        info!("Stopping Bluetooth link driver");

        let tasks = std::mem::take(&mut *self.tasks.write());

        let report = match tasks.initializer {
            Some(handle) => Some(
                handle
                    .await
                    .map_err(|e| Error::Internal(format!("initializer task failed: {e}")))?,
            ),
            None => None,
        };

        self.reader_running.store(false, Ordering::SeqCst);

        // The reader owns the line sender, so the dispatcher drains and
        // exits once the reader is gone.
        if let Some(handle) = tasks.reader {
            if let Err(e) = handle.await {
                warn!("Reader task failed: {}", e);
            }
        }
        if let Some(handle) = tasks.dispatcher {
            if let Err(e) = handle.await {
                warn!("Dispatcher task failed: {}", e);
            }
        }

        Ok(report)
    }

    /// Wait for the first-boot initializer, if one was started.
    pub async fn wait_initialized(&self) -> Result<Option<InitReport>> {
        let handle = self.tasks.write().initializer.take();
        match handle {
            Some(handle) => handle
                .await
                .map(Some)
                .map_err(|e| Error::Internal(format!("initializer task failed: {e}"))),
            None => Ok(None),
        }
    }

    /// Whether the driver tasks are running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.status.status()
    }

    /// Writer for responses and telemetry.
    pub fn writer(&self) -> Writer {
        self.writer.clone()
    }

    /// Subscribe to parser events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ParserEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to connection status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusChange> {
        self.status.subscribe()
    }

    /// The driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}
