//! BOA core library
//!
//! BOA is a server-mediated platform for running multi-objective
//! Bayesian-optimization campaigns whose experiments are executed by humans
//! or external systems. This crate holds the authoritative core:
//!
//! - Persistence layer and repositories over SQLite ([`db`])
//! - Process specification loading, validation and the mixed-space
//!   encoder ([`spec`])
//! - Plugin registry with built-in samplers, surrogate models, acquisition
//!   functions and input constraints ([`plugins`])
//! - Strategy executor, proposal ledger, campaign engine, checkpointer and
//!   analyzer ([`core`])
//! - Durable job queue ([`db::job_queue`])
//! - Campaign bundle export/import ([`bundle`])
//! - In-process benchmark harness ([`benchmarks`])
//!
//! HTTP and CLI bindings over these operations live in the `boa-server` and
//! `boa-cli` crates.

pub mod benchmarks;
pub mod bundle;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod plugins;
pub mod spec;

pub use config::BoaConfig;
pub use error::{BoaError, BoaResult};
