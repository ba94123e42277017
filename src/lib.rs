//! Droplog Backend Library
//!
//! This library exposes modules for testing and external use.
//! The main binary is in `src/main.rs`.

pub mod api;
pub mod config;
pub mod error;
pub mod retention;
/// Shared application state wiring the storage layer together
pub mod state;
pub mod store;
