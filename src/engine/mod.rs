//! Debugging engine seam
//!
//! The session core only ever talks to an engine through these traits. The
//! engine owns the debugged process; the core serializes access to it.

pub mod dap;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::Result;

pub use self::dap::DapEngine;

/// Whether a breakpoint occupies a hardware debug register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Hardware,
    Software,
}

/// A breakpoint as tracked by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Engine-assigned identifier
    pub id: u32,
    pub kind: BreakpointKind,
    /// Human-readable place, e.g. `main.c:10`, `main` or `*0x401000`
    pub location: String,
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            BreakpointKind::Hardware => "hw",
            BreakpointKind::Software => "sw",
        };
        write!(f, "{} [{}] {}", self.id, kind, self.location)
    }
}

/// Concurrency-safe handle for stopping a running target
///
/// This is the only engine operation that may run while a command handler
/// holds the engine.
#[async_trait]
pub trait Interrupter: Send + Sync {
    fn is_running(&self) -> bool;

    /// Ask the target to stop; a no-op when it is already stopped
    async fn request_stop(&self) -> Result<()>;
}

/// The debugging engine driven by the session
#[async_trait]
pub trait Engine: Send + 'static {
    /// Process id of the debugged target, once known
    fn pid(&self) -> Option<u32>;

    fn interrupter(&self) -> Arc<dyn Interrupter>;

    fn hardware_breakpoints(&self) -> Vec<Breakpoint>;

    fn software_breakpoints(&self) -> Vec<Breakpoint>;

    /// Remove a breakpoint, returning what was removed
    async fn clear(&mut self, id: u32) -> Result<Breakpoint>;

    /// Release the target, leaving it running
    async fn detach(&mut self) -> Result<()>;

    async fn kill(&mut self) -> Result<()>;
}
