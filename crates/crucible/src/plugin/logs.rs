//! Output stream forwarding for plugin processes
//!
//! One reader task per child stream pipes every line into the structured
//! logger. Each reader signals stream end on a shared notification channel
//! sized for both streams, so the owning instance can tell when the process
//! has stopped producing output.

use tokio::io::{AsyncBufRead, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::{EventLog, Publish};

/// Capacity of the stream-end notification channel: one slot per stream.
pub(crate) const STREAM_NOTIFY_CAPACITY: usize = 2;

/// Which child stream a line or notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamId {
    Stdout,
    Stderr,
}

impl StreamId {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            StreamId::Stdout => "stdout",
            StreamId::Stderr => "stderr",
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spawn the long-lived forwarder for one child stream.
///
/// Lines are logged in publish-suppressed mode: forwarding plugin output must
/// never generate events that could loop back into plugins. Read errors are
/// logged and end the forwarder; liveness is tracked by process exit, not by
/// a reader's own failure. On stream end a notification is sent before the
/// task finishes.
pub(crate) fn forward_lines<R>(
    mut lines: Lines<R>,
    stream: StreamId,
    log: EventLog,
    done: mpsc::Sender<StreamId>,
) -> JoinHandle<()>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => log.output(stream.as_str(), &line, Publish::Suppress),
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(
                        target: "plugin",
                        plugin = %log.plugin(),
                        %stream,
                        %error,
                        "error reading plugin output"
                    );
                    break;
                }
            }
        }
        let _ = done.try_send(stream);
        tracing::trace!(target: "plugin", plugin = %log.plugin(), %stream, "output stream closed");
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::sync::broadcast;

    use super::*;

    #[tokio::test]
    async fn test_forwarder_signals_stream_end() {
        let (event_tx, mut event_rx) = broadcast::channel(16);
        let (done_tx, mut done_rx) = mpsc::channel(STREAM_NOTIFY_CAPACITY);
        let log = EventLog::new("probe", event_tx);

        let input: &[u8] = b"line one\nline two\n";
        let lines = BufReader::new(input).lines();
        let task = forward_lines(lines, StreamId::Stderr, log, done_tx);

        task.await.unwrap();
        assert_eq!(done_rx.recv().await, Some(StreamId::Stderr));

        // Forwarded output is publish-suppressed: nothing on the event bus.
        assert!(event_rx.try_recv().is_err());
    }
}
