//! Plugin Process Supervision
//!
//! Plugins are external executables supervised by the daemon. Each loaded
//! plugin gets its own OS process and a pair of unix-domain sockets: a
//! command channel the host dials to call into the plugin, and a callback
//! channel the host listens on so the plugin can call back into the API.
//!
//! # Lifecycle
//!
//! `PluginRegistry::load` spawns the process, runs the startup handshake,
//! and configures the plugin. `PluginRegistry::call` forwards work over the
//! command channel behind an admission gate, and `PluginRegistry::unload`
//! drains in-flight calls before terminating the process.

mod admission;
mod channel;
mod events;
mod instance;
mod logs;
mod registry;

pub use admission::{DrainGate, GateClosed, Permit};
pub use events::{EventLog, PluginEvent, Publish};
pub use instance::{LaunchSpec, PluginInstance, PluginState, PluginStatus};
pub use registry::{PluginRegistry, RegistrySettings};

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors produced while supervising plugin processes
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("failed to spawn plugin process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("channel setup failed: {0}")]
    ChannelSetup(String),

    #[error("startup handshake failed: {0}")]
    Handshake(String),

    #[error("plugin rejected configuration: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("plugin `{0}` is unloading; no new work admitted")]
    AdmissionRejected(String),

    #[error("no plugin loaded under `{0}`")]
    NotFound(String),

    #[error("plugin `{0}` is already loaded")]
    AlreadyLoaded(String),

    #[error("plugin load timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

// ─────────────────────────────────────────────────────────────────────────────
// Forwarded Calls
// ─────────────────────────────────────────────────────────────────────────────

/// A request forwarded to a plugin over its command channel.
///
/// The supervisor does not interpret `path` or `body`; beyond the built-in
/// configuration endpoint, the routes a plugin exposes are its own business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginCall {
    /// HTTP method, e.g. `"POST"`.
    #[serde(default = "default_method")]
    pub method: String,

    /// Request path on the plugin's socket, e.g. `"/echo"`.
    pub path: String,

    /// Optional JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "POST".to_string()
}

impl PluginCall {
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: default_method(),
            path: path.into(),
            body: Some(body),
        }
    }
}

/// The plugin's answer to a forwarded call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginReply {
    /// HTTP status returned by the plugin.
    pub status: u16,

    /// Response body; `null` when the plugin sent none.
    pub body: serde_json::Value,
}

impl PluginReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
