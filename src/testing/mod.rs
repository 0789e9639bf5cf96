//! Scripted engine and command handlers for exercising the session core
//!
//! The mock records every engine call in a shared [`CallLog`] so tests can
//! assert on the exact order in which the core drove the engine.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::engine::{Breakpoint, BreakpointKind, Engine, Interrupter};
use crate::session::shutdown::{ExitStatus, Terminate, Trigger};
use crate::session::table::{CommandHandler, CommandTable};

/// One observable engine interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// A command handler ran, with its name and arguments joined by spaces
    Command(String),
    Clear(u32),
    Detach,
    Kill,
}

/// Shared, ordered record of engine calls
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<MockCall>>>);

impl CallLog {
    pub fn push(&self, call: MockCall) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    /// Drain everything recorded so far
    pub fn take(&self) -> Vec<MockCall> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Interrupter whose running state is set by the test
pub struct MockInterrupter {
    running: AtomicBool,
    stops: AtomicUsize,
}

impl MockInterrupter {
    pub fn new(running: bool) -> Self {
        Self {
            running: AtomicBool::new(running),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn stop_requests(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Interrupter for MockInterrupter {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn request_stop(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Shutdown entry point that only records what asked for it
#[derive(Debug, Default)]
pub struct TriggerLog(Mutex<Vec<Trigger>>);

impl TriggerLog {
    pub fn triggers(&self) -> Vec<Trigger> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Terminate for TriggerLog {
    async fn terminate(&self, trigger: Trigger) -> Option<ExitStatus> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trigger);
        None
    }
}

pub struct MockEngine {
    calls: CallLog,
    breakpoints: Vec<Breakpoint>,
    interrupter: Arc<MockInterrupter>,
    failing_clear: Vec<u32>,
    fail_detach: bool,
    pid: Option<u32>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            calls: CallLog::default(),
            breakpoints: Vec::new(),
            interrupter: Arc::new(MockInterrupter::new(false)),
            failing_clear: Vec::new(),
            fail_detach: false,
            pid: Some(4242),
        }
    }

    fn with_breakpoints(mut self, ids: &[u32], kind: BreakpointKind) -> Self {
        self.breakpoints.extend(ids.iter().map(|&id| Breakpoint {
            id,
            kind,
            location: format!("main.go:{}", id * 10),
        }));
        self
    }

    pub fn with_hardware(self, ids: &[u32]) -> Self {
        self.with_breakpoints(ids, BreakpointKind::Hardware)
    }

    pub fn with_software(self, ids: &[u32]) -> Self {
        self.with_breakpoints(ids, BreakpointKind::Software)
    }

    /// Make clearing breakpoint `id` fail
    pub fn failing_clear(mut self, id: u32) -> Self {
        self.failing_clear.push(id);
        self
    }

    pub fn failing_detach(mut self) -> Self {
        self.fail_detach = true;
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    pub fn mock_interrupter(&self) -> Arc<MockInterrupter> {
        self.interrupter.clone()
    }

    fn list(&self, kind: BreakpointKind) -> Vec<Breakpoint> {
        self.breakpoints
            .iter()
            .filter(|bp| bp.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn interrupter(&self) -> Arc<dyn Interrupter> {
        self.interrupter.clone()
    }

    fn hardware_breakpoints(&self) -> Vec<Breakpoint> {
        self.list(BreakpointKind::Hardware)
    }

    fn software_breakpoints(&self) -> Vec<Breakpoint> {
        self.list(BreakpointKind::Software)
    }

    async fn clear(&mut self, id: u32) -> Result<Breakpoint> {
        self.calls.push(MockCall::Clear(id));
        if self.failing_clear.contains(&id) {
            return Err(Error::dap_request_failed("setBreakpoints", "scripted failure"));
        }
        let pos = self
            .breakpoints
            .iter()
            .position(|bp| bp.id == id)
            .ok_or(Error::BreakpointNotFound { id })?;
        Ok(self.breakpoints.remove(pos))
    }

    async fn detach(&mut self) -> Result<()> {
        self.calls.push(MockCall::Detach);
        if self.fail_detach {
            return Err(Error::Detach("scripted failure".to_string()));
        }
        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        self.calls.push(MockCall::Kill);
        Ok(())
    }
}

/// Handler that records its invocation; `fails` makes it return an error after
/// recording
pub struct Recording {
    name: &'static str,
    fails: bool,
}

#[async_trait]
impl CommandHandler<MockEngine> for Recording {
    async fn call(&self, engine: &mut MockEngine, args: &[String]) -> Result<()> {
        let line = std::iter::once(self.name.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        engine.calls.push(MockCall::Command(line));
        if self.fails {
            return Err(Error::Internal("scripted failure".to_string()));
        }
        Ok(())
    }
}

/// Table with recording `break`, `continue`, `next`, `step` and a failing `fail`
pub fn recording_table() -> CommandTable<MockEngine> {
    let mut table = CommandTable::new();
    for name in ["break", "continue", "next", "step"] {
        table.register(&[name], Recording { name, fails: false });
    }
    table.register(
        &["fail"],
        Recording {
            name: "fail",
            fails: true,
        },
    );
    table
}
