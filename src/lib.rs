//! dbg-frontend - session front-end for an interactive process debugger
//!
//! Commands arrive from a local prompt or a single remote websocket client,
//! are funnelled through one ordered channel and run against a Debug
//! Adapter Protocol backed engine.

pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod engine;
pub mod session;
pub mod testing;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
