//! BOA server library: router, shared state and the background worker.
//!
//! The `boa-server` binary wires these together; tests drive the router
//! directly.

pub mod routes;
pub mod state;
pub mod worker;

pub use state::AppState;
