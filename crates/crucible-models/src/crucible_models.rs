//! Crucible Models - Core object types for the provisioning control plane
//!
//! This crate contains the pure data structures shared between the server,
//! the CLI, and plugins: machines, boot environments, DHCP networks, and
//! jobs. Objects are stored as JSON and addressed by prefix + key.

mod bootenv;
mod job;
mod machine;
mod network;

pub use bootenv::*;
pub use job::*;
pub use machine::*;
pub use network::*;

/// An object that can live in the store.
///
/// `PREFIX` is the collection name (`"machines"`, `"leases"`, ...) and
/// `key()` the unique identifier within it.
pub trait Keyed {
    const PREFIX: &'static str;

    fn key(&self) -> String;
}

/// Check that a name is usable as an object identifier.
///
/// Names end up in socket paths, URLs, and log lines, so they are restricted
/// to a conservative character set.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
