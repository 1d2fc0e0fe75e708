//! zp metadata controller: offset condition cron.
//!
//! This crate ships a `zp-meta` binary, but exposes its library surface so
//! the controller and integration tests can register conditions directly.

pub mod condition;
pub mod config;
pub mod migrate;
pub mod offsets;
pub mod update;
