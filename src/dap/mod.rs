//! Debug Adapter Protocol (DAP) client
//!
//! Talks to debug adapters such as lldb-dap, gdb or delve over their stdio.

pub mod client;
pub mod codec;
pub mod types;

pub use client::{DapClient, DapRequester};
pub use types::*;
