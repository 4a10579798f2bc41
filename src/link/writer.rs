//! Outbound writes to the module.
//!
//! All writes go through one async mutex. Application lines take it for a
//! single write; the initializer holds it for its whole command sequence
//! through a [`CommandSession`], so the two never interleave on the wire.
//! Senders that arrive while the lock is held queue on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::link::transport::Transport;
use crate::protocol::commands::ModuleCommand;
use crate::protocol::status::StatusTracker;

/// Terminator appended to application lines.
const LINE_TERMINATOR: &str = "\r\n";

struct WriterInner {
    transport: Arc<dyn Transport>,
    status: Arc<StatusTracker>,
    perf_data_enabled: AtomicBool,
    write_lock: Mutex<()>,
    max_payload_len: usize,
}

/// Serialized, gated writer. Cheap to clone.
#[derive(Clone)]
pub struct Writer {
    inner: Arc<WriterInner>,
}

impl Writer {
    /// Create a writer over a transport.
    ///
    /// Payloads whose encoded length reaches `max_payload_len` are refused.
    pub fn new(
        transport: Arc<dyn Transport>,
        status: Arc<StatusTracker>,
        max_payload_len: usize,
        perf_data_enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                transport,
                status,
                perf_data_enabled: AtomicBool::new(perf_data_enabled),
                write_lock: Mutex::new(()),
                max_payload_len,
            }),
        }
    }

    /// Whether discardable telemetry is currently sent.
    pub fn perf_data_enabled(&self) -> bool {
        self.inner.perf_data_enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable discardable telemetry.
    pub fn set_perf_data_enabled(&self, enabled: bool) {
        let previous = self.inner.perf_data_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            debug!("Performance data {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    /// Effective exclusive limit on encoded line length.
    pub fn payload_limit(&self) -> usize {
        self.inner
            .max_payload_len
            .min(self.inner.transport.max_write_size().saturating_add(1))
    }

    /// Send one line, returning whether it was written.
    ///
    /// Refused without touching the lock when the link is not ready, or
    /// when `discardable` is set and telemetry is disabled.
    pub async fn send(&self, text: &str, discardable: bool) -> bool {
        match self.try_send(text, discardable).await {
            Ok(()) => true,
            Err(Error::NotReady | Error::PerfDataDisabled) => false,
            Err(e @ Error::PayloadTooLong { .. }) => {
                warn!("Refusing write: {}", e);
                false
            }
            Err(e) => {
                error!("Write failed: {}", e);
                false
            }
        }
    }

    /// Send a discardable telemetry line.
    pub async fn send_telemetry(&self, text: &str) -> bool {
        self.send(text, true).await
    }

    /// Send one line, reporting why it was refused.
    pub async fn try_send(&self, text: &str, discardable: bool) -> Result<()> {
        if !self.inner.status.status().is_ready() {
            trace!("Link not ready, dropping {:?}", text);
            return Err(Error::NotReady);
        }

        if discardable && !self.perf_data_enabled() {
            return Err(Error::PerfDataDisabled);
        }

        let _guard = self.inner.write_lock.lock().await;

        let mut payload = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        payload.push_str(text);
        payload.push_str(LINE_TERMINATOR);

        let bytes = payload.as_bytes();
        let limit = self.payload_limit();
        if bytes.len() >= limit {
            return Err(Error::PayloadTooLong {
                len: bytes.len(),
                max: limit,
            });
        }

        write_once(self.inner.transport.as_ref(), bytes)
    }

    /// Take the write lock for a sequence of raw module commands.
    ///
    /// Application sends queue until the session is dropped.
    pub async fn command_session(&self) -> CommandSession<'_> {
        let guard = self.inner.write_lock.lock().await;
        debug!("Command session started");
        CommandSession {
            _guard: guard,
            transport: self.inner.transport.as_ref(),
        }
    }
}

/// Exclusive access to the transport for configuration commands.
pub struct CommandSession<'a> {
    _guard: MutexGuard<'a, ()>,
    transport: &'a dyn Transport,
}

impl CommandSession<'_> {
    /// Write a configuration command followed by `\r`.
    ///
    /// Not gated on connection status.
    pub fn send_command(&mut self, command: &ModuleCommand) -> Result<()> {
        trace!("Module command: {}", command);
        write_once(self.transport, &command.to_bytes())
    }
}

impl Drop for CommandSession<'_> {
    fn drop(&mut self) {
        debug!("Command session ended");
    }
}

fn write_once(transport: &dyn Transport, bytes: &[u8]) -> Result<()> {
    let written = transport.write(bytes)?;
    if written < bytes.len() {
        warn!("Short write: {} of {} bytes", written, bytes.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::MemoryTransport;
    use crate::protocol::status::ConnectionStatus;
    use proptest::prelude::*;
    use std::time::Duration;

    fn ready_writer(transport: &MemoryTransport) -> Writer {
        let status = Arc::new(StatusTracker::default());
        status.on_status_token("%RFCOMM_OPEN%");
        Writer::new(Arc::new(transport.clone()), status, 255, false)
    }

    #[test]
    fn test_send_appends_crlf() {
        let transport = MemoryTransport::new();
        let writer = ready_writer(&transport);

        assert!(tokio_test::block_on(writer.send("hello", false)));
        assert_eq!(transport.writes(), vec![b"hello\r\n".to_vec()]);
    }

    #[test]
    fn test_length_boundary() {
        let transport = MemoryTransport::new();
        let writer = ready_writer(&transport);

        // 252 chars + CRLF = 254 bytes
        let fits = "a".repeat(252);
        assert!(tokio_test::block_on(writer.send(&fits, false)));

        // 253 chars + CRLF = 255 bytes
        let too_long = "a".repeat(253);
        assert!(!tokio_test::block_on(writer.send(&too_long, false)));
        assert!(matches!(
            tokio_test::block_on(writer.try_send(&too_long, false)),
            Err(Error::PayloadTooLong { len: 255, max: 255 })
        ));

        assert_eq!(transport.writes().len(), 1);
    }

    #[test]
    fn test_length_counts_encoded_bytes() {
        let transport = MemoryTransport::new();
        let writer = ready_writer(&transport);

        // 127 two-byte chars + CRLF = 256 bytes
        let text = "\u{e9}".repeat(127);
        assert!(!tokio_test::block_on(writer.send(&text, false)));
        assert!(transport.writes().is_empty());
    }

    #[test]
    fn test_transport_write_size_limits_payload() {
        let transport = MemoryTransport::new().with_max_write_size(8);
        let writer = ready_writer(&transport);

        assert_eq!(writer.payload_limit(), 9);
        assert!(tokio_test::block_on(writer.send("123456", false)));
        assert!(!tokio_test::block_on(writer.send("1234567", false)));
    }

    #[test]
    fn test_refused_unless_ready() {
        let transport = MemoryTransport::new();
        let status = Arc::new(StatusTracker::default());
        let writer = Writer::new(Arc::new(transport.clone()), status.clone(), 255, true);

        assert!(!tokio_test::block_on(writer.send("x", false)));

        status.on_status_token("%CONNECT%");
        assert!(matches!(
            tokio_test::block_on(writer.try_send("x", false)),
            Err(Error::NotReady)
        ));

        status.on_status_token("%RFCOMM_OPEN%");
        assert!(tokio_test::block_on(writer.send("x", false)));

        status.on_status_token("%RFCOMM_CLOSE%");
        assert!(!tokio_test::block_on(writer.send("x", true)));

        assert_eq!(transport.writes().len(), 1);
    }

    #[test]
    fn test_discardable_gated_by_perf_flag() {
        let transport = MemoryTransport::new();
        let writer = ready_writer(&transport);

        assert!(!writer.perf_data_enabled());
        assert!(!tokio_test::block_on(writer.send_telemetry("t=1")));
        assert!(tokio_test::block_on(writer.send("reply", false)));

        writer.set_perf_data_enabled(true);
        assert!(tokio_test::block_on(writer.send_telemetry("t=2")));

        assert_eq!(
            transport.written_lines(),
            vec!["reply\r\n".to_string(), "t=2\r\n".to_string()]
        );
    }

    #[test]
    fn test_transport_error_returns_false() {
        let transport = MemoryTransport::new();
        let writer = ready_writer(&transport);
        transport.set_fail_writes(true);
        assert!(!tokio_test::block_on(writer.send("x", false)));
    }

    #[tokio::test]
    async fn test_command_session_blocks_senders() {
        let transport = MemoryTransport::new();
        let writer = ready_writer(&transport);

        let mut session = writer.command_session().await;
        session
            .send_command(&ModuleCommand::EnterCommandMode)
            .unwrap();

        let queued = tokio::time::timeout(Duration::from_millis(50), writer.send("x", false)).await;
        assert!(queued.is_err());

        drop(session);
        assert!(writer.send("x", false).await);

        assert_eq!(
            transport.writes(),
            vec![b"$$$\r".to_vec(), b"x\r\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_command_session_ignores_status() {
        let transport = MemoryTransport::new();
        let writer = Writer::new(
            Arc::new(transport.clone()),
            Arc::new(StatusTracker::default()),
            255,
            false,
        );

        let mut session = writer.command_session().await;
        session.send_command(&ModuleCommand::Reboot).unwrap();
        assert_eq!(transport.writes(), vec![b"R,1\r".to_vec()]);
    }

    /// `None` leaves the tracker at Unknown.
    fn not_ready_token() -> impl Strategy<Value = Option<&'static str>> {
        prop_oneof![
            Just(None),
            Just(Some("%CONNECT,0123456789AB,0%")),
            Just(Some("%DISCONN%")),
            Just(Some("%RFCOMM_CLOSE%")),
            Just(Some("%REBOOT%")),
        ]
    }

    proptest! {
        #[test]
        fn prop_refused_unless_ready(
            text in "(?s).{0,300}",
            discardable in any::<bool>(),
            token in not_ready_token(),
        ) {
            let transport = MemoryTransport::new();
            let status = Arc::new(StatusTracker::default());
            if let Some(token) = token {
                status.on_status_token(token);
            }
            prop_assert_ne!(status.status(), ConnectionStatus::Ready);

            let writer = Writer::new(Arc::new(transport.clone()), status, 255, true);
            prop_assert!(!tokio_test::block_on(writer.send(&text, discardable)));
            prop_assert!(matches!(
                tokio_test::block_on(writer.try_send(&text, discardable)),
                Err(Error::NotReady)
            ));
            prop_assert!(transport.writes().is_empty());
        }
    }
}
