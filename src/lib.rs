//! Webpforge - asynchronous animated WebP recompression
//!
//! This library crate exposes the core functionality for integration testing.

pub mod cleanup;
pub mod config;
pub mod pipeline;
pub mod pool;
pub mod processor;
pub mod progress;
pub mod server;
pub mod state;
