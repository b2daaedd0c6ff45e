//! Plugin Registry
//!
//! The registry owns every loaded plugin instance, keyed by name, and routes
//! load/unload/call-through requests to them. It is an explicit object with
//! its own lock: created at process start, torn down at shutdown by
//! unloading every remaining instance. The lock covers only map operations
//! and is never held across a blocking call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::token::TokenIssuer;

use super::events::{EventLog, PluginEvent};
use super::instance::{LaunchEnv, LaunchSpec, PluginInstance, PluginStatus};
use super::{PluginCall, PluginError, PluginReply, PluginResult};

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Shared configuration used to launch every plugin instance.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Directory holding the per-plugin socket pairs.
    pub comm_dir: PathBuf,

    /// API base URL handed to plugins for callback access.
    pub api_url: String,

    /// Static file-server URL handed to plugins.
    pub fileserver_url: String,

    /// Deadline for the whole load operation (spawn + handshake + config).
    pub load_timeout: Duration,
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

enum PluginSlot {
    /// Name reserved while a load is in progress.
    Loading,
    Live(Arc<PluginInstance>),
}

/// Owner of all loaded plugin instances.
pub struct PluginRegistry {
    plugins: Mutex<HashMap<String, PluginSlot>>,
    settings: RegistrySettings,
    tokens: Arc<dyn TokenIssuer>,

    /// Router mounted on every callback socket. Set once the API surface is
    /// built (the router itself needs the registry, so it arrives late).
    callback_router: RwLock<Option<Router>>,

    /// Lifecycle and output events for anyone listening.
    events: broadcast::Sender<PluginEvent>,
}

impl PluginRegistry {
    pub fn new(settings: RegistrySettings, tokens: Arc<dyn TokenIssuer>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            plugins: Mutex::new(HashMap::new()),
            settings,
            tokens,
            callback_router: RwLock::new(None),
            events,
        }
    }

    /// Install the API router served on each instance's callback socket.
    pub fn set_callback_router(&self, router: Router) {
        *self.callback_router.write() = Some(router);
    }

    /// Subscribe to plugin lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    /// Launch a plugin and make it callable under its name.
    ///
    /// Rejects names that already have a live (or currently loading)
    /// instance. The whole operation runs under the configured deadline, so
    /// an unresponsive binary cannot wedge the registry.
    pub async fn load(&self, spec: LaunchSpec) -> PluginResult<()> {
        let name = spec.name.clone();

        // Reserve the name first so concurrent loads cannot race each other.
        {
            let mut plugins = self.plugins.lock();
            if plugins.contains_key(&name) {
                return Err(PluginError::AlreadyLoaded(name));
            }
            plugins.insert(name.clone(), PluginSlot::Loading);
        }

        let env = LaunchEnv {
            comm_dir: self.settings.comm_dir.clone(),
            api_url: self.settings.api_url.clone(),
            fileserver_url: self.settings.fileserver_url.clone(),
            token: self.tokens.issue(&name),
            callback_router: self
                .callback_router
                .read()
                .clone()
                .unwrap_or_else(Router::new),
        };
        let log = EventLog::new(&name, self.events.clone());

        let launched = tokio::time::timeout(
            self.settings.load_timeout,
            PluginInstance::launch(spec, &env, log.clone()),
        )
        .await;

        match launched {
            Ok(Ok(instance)) => {
                self.plugins
                    .lock()
                    .insert(name.clone(), PluginSlot::Live(Arc::new(instance)));
                log.lifecycle("plugin.loaded", serde_json::json!({}));
                info!(plugin = %name, "plugin loaded");
                Ok(())
            }
            Ok(Err(e)) => {
                self.plugins.lock().remove(&name);
                log.lifecycle(
                    "plugin.failed",
                    serde_json::json!({ "error": e.to_string() }),
                );
                Err(e)
            }
            Err(_) => {
                // Dropping the launch future kills the half-started process
                // and releases its channels.
                self.plugins.lock().remove(&name);
                let timeout = self.settings.load_timeout;
                warn!(plugin = %name, ?timeout, "plugin load timed out");
                log.lifecycle(
                    "plugin.failed",
                    serde_json::json!({ "error": "load timed out" }),
                );
                Err(PluginError::Timeout(timeout))
            }
        }
    }

    /// Forward a request to a loaded plugin.
    ///
    /// The admission permit is held for exactly the duration of the forward
    /// and released on every exit path.
    pub async fn call(&self, name: &str, call: &PluginCall) -> PluginResult<PluginReply> {
        let instance = self.live(name)?;
        let _permit = instance
            .reserve()
            .map_err(|_| PluginError::AdmissionRejected(name.to_string()))?;
        instance.forward(call).await
    }

    /// Drain a plugin's in-flight calls, terminate it, and forget it.
    pub async fn unload(&self, name: &str) -> PluginResult<()> {
        let instance = self.live(name)?;
        instance.unload().await;
        self.plugins.lock().remove(name);
        let log = EventLog::new(name, self.events.clone());
        log.lifecycle("plugin.unloaded", serde_json::json!({}));
        info!(plugin = %name, "plugin unloaded");
        Ok(())
    }

    /// Unload every remaining plugin; used at daemon shutdown.
    ///
    /// Instances drain independently, so they are unloaded concurrently
    /// rather than serializing the drains.
    pub async fn unload_all(&self) {
        let names: Vec<String> = self.plugins.lock().keys().cloned().collect();
        let results = futures::future::join_all(names.iter().map(|name| self.unload(name))).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(error) = result {
                warn!(plugin = %name, %error, "error unloading plugin at shutdown");
            }
        }
    }

    /// Status snapshots for every known plugin.
    pub fn list(&self) -> Vec<PluginStatus> {
        self.plugins
            .lock()
            .iter()
            .map(|(name, slot)| match slot {
                PluginSlot::Loading => PluginStatus {
                    name: name.clone(),
                    state: "starting".to_string(),
                    in_flight: 0,
                    last_error: None,
                },
                PluginSlot::Live(instance) => instance.status(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.lock().is_empty()
    }

    fn live(&self, name: &str) -> PluginResult<Arc<PluginInstance>> {
        match self.plugins.lock().get(name) {
            Some(PluginSlot::Live(instance)) => Ok(Arc::clone(instance)),
            // A still-loading instance is not usable yet; as far as callers
            // are concerned it is not there.
            Some(PluginSlot::Loading) | None => Err(PluginError::NotFound(name.to_string())),
        }
    }
}
