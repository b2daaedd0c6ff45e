//! IPC channels between the daemon and a plugin process
//!
//! Each instance gets a pair of unix-domain sockets under the plugin comm
//! directory: the command socket (plugin listens, host dials) and the
//! callback socket (host listens, plugin dials). Both exist only for the
//! lifetime of the instance and are never exposed on the network.

use std::path::{Path, PathBuf};

use axum::Router;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, header};
use hyper_util::rt::TokioIo;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use super::{PluginCall, PluginError, PluginReply, PluginResult};

// ─────────────────────────────────────────────────────────────────────────────
// Socket Paths
// ─────────────────────────────────────────────────────────────────────────────

/// The socket pair for one plugin instance.
#[derive(Debug, Clone)]
pub(crate) struct ChannelPaths {
    /// Plugin listens here; the host dials it to issue commands.
    pub command: PathBuf,

    /// Host listens here; the plugin dials it to reach the API.
    pub callback: PathBuf,
}

impl ChannelPaths {
    pub(crate) fn new(comm_dir: &Path, plugin: &str) -> Self {
        Self {
            command: comm_dir.join(format!("{plugin}.to-plugin.sock")),
            callback: comm_dir.join(format!("{plugin}.from-plugin.sock")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command Client
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP/1.1 client over the plugin's command socket.
///
/// Connections are per-call: command traffic is low-volume control traffic,
/// and a fresh dial per request keeps failure handling simple — a dead plugin
/// surfaces as a connect error on the next call.
pub(crate) struct CommandClient {
    socket: PathBuf,
}

impl CommandClient {
    pub(crate) fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    /// Forward one request over the command channel.
    pub(crate) async fn call(&self, call: &PluginCall) -> PluginResult<PluginReply> {
        let method = Method::from_bytes(call.method.as_bytes())
            .map_err(|e| PluginError::Transport(format!("invalid method `{}`: {e}", call.method)))?;

        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            PluginError::Transport(format!("connect {}: {e}", self.socket.display()))
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| PluginError::Transport(format!("handshake: {e}")))?;
        // The connection task ends when the response (and socket) is done.
        tokio::spawn(async move {
            if let Err(error) = conn.await {
                tracing::trace!(%error, "command channel connection closed");
            }
        });

        let body = match &call.body {
            Some(value) => serde_json::to_vec(value)
                .map_err(|e| PluginError::Transport(format!("encode request body: {e}")))?,
            None => Vec::new(),
        };

        let request = Request::builder()
            .method(method)
            .uri(call.path.as_str())
            .header(header::HOST, "crucible-plugin")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| PluginError::Transport(format!("build request: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| PluginError::Transport(format!("send request: {e}")))?;

        let status = response.status().as_u16();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| PluginError::Transport(format!("read response body: {e}")))?
            .to_bytes();

        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| PluginError::Transport(format!("malformed response body: {e}")))?
        };

        Ok(PluginReply { status, body })
    }

    /// Hand the plugin its configuration. Any failure here is a config
    /// failure: a plugin that cannot accept its parameters is unusable.
    pub(crate) async fn configure(&self, params: &serde_json::Value) -> PluginResult<()> {
        let reply = self
            .call(&PluginCall::post("/config", params.clone()))
            .await
            .map_err(|e| match e {
                PluginError::Transport(msg) => PluginError::Config(msg),
                other => other,
            })?;

        if !reply.is_success() {
            return Err(PluginError::Config(format!(
                "status {}: {}",
                reply.status, reply.body
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Callback Server
// ─────────────────────────────────────────────────────────────────────────────

/// The host-owned listener serving the API surface to one plugin.
pub(crate) struct CallbackServer {
    path: PathBuf,
    task: JoinHandle<()>,
}

impl CallbackServer {
    /// Bind the callback socket and start serving the router on it.
    pub(crate) fn bind(path: &Path, router: Router) -> PluginResult<Self> {
        // A socket file left behind by a crashed run would fail the bind.
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }

        let listener = UnixListener::bind(path).map_err(|e| {
            PluginError::ChannelSetup(format!("bind {}: {e}", path.display()))
        })?;

        let socket_path = path.display().to_string();
        let task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router).await {
                tracing::error!(%error, socket = %socket_path, "callback listener failed");
            }
        });

        Ok(Self {
            path: path.to_path_buf(),
            task,
        })
    }

    /// Stop serving and remove the socket file.
    pub(crate) fn shutdown(&self) {
        self.task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
