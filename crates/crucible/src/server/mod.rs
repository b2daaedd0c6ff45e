//! REST surface for the control plane
//!
//! Thin by design: validation plus the in-memory store. The interesting
//! machinery lives in [`crate::plugin`]; this module just exposes it, and is
//! also what gets mounted on every plugin callback socket.

mod router;
mod state;
mod store;

pub use router::create_router;
pub use state::AppState;
pub use store::{Collection, Store};
