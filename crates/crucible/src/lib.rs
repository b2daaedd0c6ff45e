//! Crucible - Bare-Metal Provisioning Control Plane
//!
//! This crate provides the main daemon runtime, including:
//! - Plugin process supervision and IPC via `plugin`
//! - The REST API surface via `server`
//! - Layered configuration via `config`
//! - Bearer token issuing via `token`

// Re-export the model types
pub use crucible_models as models;

// Layered daemon configuration
pub mod config;

// Plugin process supervision
pub mod plugin;

// REST API surface
pub mod server;

// Bearer tokens for the API surface
pub mod token;
