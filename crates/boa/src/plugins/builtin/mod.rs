//! Built-in plugins registered at startup

pub mod acquisitions;
pub mod constraints;
pub mod models;
pub mod samplers;
