//! Reader loop: polls the transport and routes parsed events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace};

use crate::error::Result;
use crate::link::transport::Transport;
use crate::protocol::frame::{FrameParser, ParserEvent};
use crate::protocol::status::StatusTracker;

/// Polls the transport at a fixed interval and feeds the frame parser.
///
/// Status tokens update the tracker in place. Data lines are forwarded in
/// order to the dispatch task so the reader never waits on the write lock.
/// Every event is also broadcast, which is how the initializer sees
/// command prompts.
pub struct Reader {
    transport: Arc<dyn Transport>,
    parser: FrameParser,
    status: Arc<StatusTracker>,
    event_tx: broadcast::Sender<ParserEvent>,
    line_tx: mpsc::UnboundedSender<String>,
    poll_interval: Duration,
    read_failing: bool,
}

impl Reader {
    /// Create a reader.
    pub fn new(
        transport: Arc<dyn Transport>,
        status: Arc<StatusTracker>,
        event_tx: broadcast::Sender<ParserEvent>,
        line_tx: mpsc::UnboundedSender<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            parser: FrameParser::new(),
            status,
            event_tx,
            line_tx,
            poll_interval,
            read_failing: false,
        }
    }

    /// Drain everything the transport has and process it.
    ///
    /// Returns the number of events produced.
    pub fn poll(&mut self) -> Result<usize> {
        let mut events = 0;

        loop {
            let data = self.transport.read()?;
            if data.is_empty() {
                break;
            }

            trace!("Read {} bytes", data.len());

            for &byte in data.iter() {
                if let Some(event) = self.parser.feed(byte) {
                    self.handle(event);
                    events += 1;
                }
            }
        }

        Ok(events)
    }

    /// Poll until `running` is cleared.
    pub async fn run(mut self, running: Arc<AtomicBool>) {
        debug!("Reader loop starting");

        while running.load(Ordering::SeqCst) {
            self.tick();
            tokio::time::sleep(self.poll_interval).await;
        }

        debug!("Reader loop stopped");
    }

    /// One poll of the run loop.
    ///
    /// A read error is logged at `error` once when it starts and at `debug`
    /// while it persists. Returns true when the error state changed.
    fn tick(&mut self) -> bool {
        match self.poll() {
            Ok(_) if self.read_failing => {
                info!("Transport reads recovered");
                self.read_failing = false;
                true
            }
            Ok(_) => false,
            Err(e) if self.read_failing => {
                debug!("Transport read still failing: {}", e);
                false
            }
            Err(e) => {
                error!("Transport read failed: {}", e);
                self.read_failing = true;
                true
            }
        }
    }

    fn handle(&mut self, event: ParserEvent) {
        match &event {
            ParserEvent::Status(token) => {
                self.status.on_status_token(token);
            }
            ParserEvent::CommandPrompt => debug!("Module prompt"),
            ParserEvent::Acknowledgement(line) => debug!("Module acknowledged: {}", line),
            ParserEvent::DataLine(line) => {
                if self.line_tx.send(line.clone()).is_err() {
                    debug!("No dispatcher, dropping line {:?}", line);
                }
            }
        }

        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::MemoryTransport;
    use crate::protocol::status::ConnectionStatus;
    use pretty_assertions::assert_eq;

    struct Harness {
        transport: MemoryTransport,
        status: Arc<StatusTracker>,
        events: broadcast::Receiver<ParserEvent>,
        lines: mpsc::UnboundedReceiver<String>,
        reader: Reader,
    }

    fn harness() -> Harness {
        let transport = MemoryTransport::new();
        let status = Arc::new(StatusTracker::default());
        let (event_tx, events) = broadcast::channel(64);
        let (line_tx, lines) = mpsc::unbounded_channel();
        let reader = Reader::new(
            Arc::new(transport.clone()),
            status.clone(),
            event_tx,
            line_tx,
            Duration::from_millis(20),
        );

        Harness {
            transport,
            status,
            events,
            lines,
            reader,
        }
    }

    #[test]
    fn test_routes_status_and_lines() {
        let mut h = harness();
        h.transport.push_inbound(b"%RFCOMM_OPEN%svp:2.5\r\n");

        assert_eq!(h.reader.poll().unwrap(), 2);
        assert_eq!(h.status.status(), ConnectionStatus::Ready);
        assert_eq!(h.lines.try_recv().unwrap(), "svp:2.5");
        assert_eq!(
            h.events.try_recv().unwrap(),
            ParserEvent::Status("%RFCOMM_OPEN%".to_string())
        );
    }

    #[test]
    fn test_fragmented_reads() {
        let mut h = harness();
        h.transport.set_read_chunk(Some(3));
        h.transport.push_inbound(b"AOK\r\nCMD> help\r\n%DISCONN%");

        assert_eq!(h.reader.poll().unwrap(), 4);

        let mut seen = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                ParserEvent::Acknowledgement("AOK".to_string()),
                ParserEvent::CommandPrompt,
                ParserEvent::DataLine("help".to_string()),
                ParserEvent::Status("%DISCONN%".to_string()),
            ]
        );
        assert_eq!(h.status.status(), ConnectionStatus::NotReady);
    }

    #[test]
    fn test_partial_line_carries_over() {
        let mut h = harness();
        h.transport.push_inbound(b"sv");
        assert_eq!(h.reader.poll().unwrap(), 0);
        h.transport.push_inbound(b"p:1\r\n");
        assert_eq!(h.reader.poll().unwrap(), 1);
        assert_eq!(h.lines.try_recv().unwrap(), "svp:1");
    }

    #[test]
    fn test_lines_dropped_without_dispatcher() {
        let mut h = harness();
        drop(h.lines);
        h.transport.push_inbound(b"go\r\n");
        assert_eq!(h.reader.poll().unwrap(), 1);
    }

    #[test]
    fn test_read_error_reported_on_change() {
        let mut h = harness();
        h.transport.set_fail_reads(true);

        assert!(h.reader.tick());
        for _ in 0..50 {
            assert!(!h.reader.tick());
        }
        assert!(h.reader.read_failing);

        h.transport.set_fail_reads(false);
        h.transport.push_inbound(b"go\r\n");
        assert!(h.reader.tick());
        assert!(!h.reader.read_failing);
        assert_eq!(h.lines.try_recv().unwrap(), "go");
        assert!(!h.reader.tick());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped() {
        let h = harness();
        let running = Arc::new(AtomicBool::new(true));
        let mut lines = h.lines;
        let task = tokio::spawn(h.reader.run(running.clone()));

        h.transport.push_inbound(b"go\r\n");
        assert_eq!(lines.recv().await.unwrap(), "go");

        running.store(false, Ordering::SeqCst);
        task.await.unwrap();
    }
}
