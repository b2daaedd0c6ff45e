//! Plugin events and the per-instance logging capability

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Event
// ─────────────────────────────────────────────────────────────────────────────

/// A lifecycle or output event published on the registry's event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginEvent {
    /// Event type identifier (e.g. "plugin.loaded", "plugin.unloaded")
    pub event_type: String,

    /// Name of the plugin the event concerns
    pub plugin: String,

    /// Event payload data
    pub data: serde_json::Value,

    /// Timestamp when the event was created (Unix milliseconds)
    pub timestamp: u64,
}

impl PluginEvent {
    pub fn new(
        event_type: impl Into<String>,
        plugin: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            plugin: plugin.into(),
            data,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Log
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a log call also publishes an event on the bus.
///
/// Forwarded plugin output must use `Suppress`: publishing an event for a
/// plugin's log line can reach plugins again and generate further log lines,
/// so the output path never re-enters the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    Emit,
    Suppress,
}

/// Logging capability handed to a plugin instance at construction.
///
/// Wraps the structured logger and the registry's event bus so callers state
/// explicitly, per call, whether an event accompanies the log line.
#[derive(Clone)]
pub struct EventLog {
    plugin: String,
    events: broadcast::Sender<PluginEvent>,
}

impl EventLog {
    pub fn new(plugin: impl Into<String>, events: broadcast::Sender<PluginEvent>) -> Self {
        Self {
            plugin: plugin.into(),
            events,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Record one line of plugin output, tagged with the stream it came from.
    pub fn output(&self, stream: &str, line: &str, publish: Publish) {
        tracing::info!(target: "plugin", plugin = %self.plugin, stream, "{line}");
        if publish == Publish::Emit {
            let _ = self.events.send(PluginEvent::new(
                "plugin.output",
                &self.plugin,
                serde_json::json!({ "stream": stream, "line": line }),
            ));
        }
    }

    /// Publish a lifecycle event and log it.
    pub fn lifecycle(&self, event_type: &str, data: serde_json::Value) {
        tracing::debug!(target: "plugin", plugin = %self.plugin, event = event_type, "lifecycle event");
        let _ = self
            .events
            .send(PluginEvent::new(event_type, &self.plugin, data));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppressed_output_publishes_nothing() {
        let (tx, mut rx) = broadcast::channel(16);
        let log = EventLog::new("probe", tx);

        log.output("stdout", "a line", Publish::Suppress);
        assert!(rx.try_recv().is_err());

        log.output("stdout", "another line", Publish::Emit);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, "plugin.output");
        assert_eq!(event.plugin, "probe");
    }

    #[test]
    fn test_lifecycle_event_reaches_bus() {
        let (tx, mut rx) = broadcast::channel(16);
        let log = EventLog::new("probe", tx);

        log.lifecycle("plugin.loaded", serde_json::json!({}));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, "plugin.loaded");
    }
}
