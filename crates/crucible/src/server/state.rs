//! Server Application State
//!
//! Shared state accessible by all API handlers, on the TCP listener and on
//! every plugin callback socket alike.

use std::sync::Arc;

use crate::plugin::PluginRegistry;
use crate::token::TokenIssuer;

use super::store::Store;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: Arc<PluginRegistry>,
    store: Store,
    tokens: Arc<dyn TokenIssuer>,
}

impl AppState {
    pub fn new(registry: Arc<PluginRegistry>, store: Store, tokens: Arc<dyn TokenIssuer>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                store,
                tokens,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn tokens(&self) -> &Arc<dyn TokenIssuer> {
        &self.inner.tokens
    }
}
