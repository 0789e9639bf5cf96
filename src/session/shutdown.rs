//! Ordered, run-once teardown of a debugging session
//!
//! Every path out of a session (typed `exit`, end of input, an interrupt in
//! remote mode, a failed transport) ends up in [`ShutdownSequencer::run`].
//! Only the first caller performs the teardown; everyone else gets `None` and
//! can wait for the outcome with [`ShutdownSequencer::finished`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::common::Result;
use crate::engine::{Breakpoint, Engine};
use crate::transport::capture::OutputCapture;

use super::channel::ChannelCloser;
use super::history::History;

/// What started the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The `exit` command; `confirm` asks before killing the target
    Exit { confirm: bool },
    /// The input stream ended
    EndOfInput,
    /// SIGINT in remote mode
    Interrupt,
    /// The local prompt failed to read
    InputFailure,
    /// The remote transport ended or failed
    TransportFailure,
}

impl Trigger {
    fn status(self) -> ExitStatus {
        match self {
            Trigger::Exit { .. } | Trigger::EndOfInput | Trigger::Interrupt => ExitStatus::Clean,
            Trigger::InputFailure | Trigger::TransportFailure => ExitStatus::Fatal,
        }
    }
}

/// Process exit status decided by the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    Fatal,
    ShutdownFailed,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::ShutdownFailed => 2,
        }
    }
}

/// Asks the user whether the target should be killed
#[async_trait]
pub trait KillConfirmation: Send + Sync {
    /// `Ok(true)` to kill; an error means no answer could be obtained
    async fn confirm_kill(&self, pid: Option<u32>) -> Result<bool>;
}

/// Object-safe entry point into the shutdown, for transports and signal handlers
#[async_trait]
pub trait Terminate: Send + Sync {
    /// Run the shutdown, or return `None` if it was already started elsewhere
    async fn terminate(&self, trigger: Trigger) -> Option<ExitStatus>;
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;

pub struct ShutdownSequencer<E> {
    phase: AtomicU8,
    engine: Arc<Mutex<E>>,
    history: Arc<History>,
    closer: ChannelCloser,
    confirmation: Option<Arc<dyn KillConfirmation>>,
    capture: StdMutex<Option<OutputCapture>>,
    done: watch::Sender<Option<ExitStatus>>,
}

impl<E: Engine> ShutdownSequencer<E> {
    pub fn new(engine: Arc<Mutex<E>>, history: Arc<History>, closer: ChannelCloser) -> Self {
        Self {
            phase: AtomicU8::new(IDLE),
            engine,
            history,
            closer,
            confirmation: None,
            capture: StdMutex::new(None),
            done: watch::channel(None).0,
        }
    }

    pub fn with_confirmation(mut self, confirmation: Arc<dyn KillConfirmation>) -> Self {
        self.confirmation = Some(confirmation);
        self
    }

    /// Hand over the stdout capture; it is restored first thing during shutdown
    pub fn with_output_capture(self, capture: OutputCapture) -> Self {
        *self.capture.lock().unwrap_or_else(PoisonError::into_inner) = Some(capture);
        self
    }

    pub fn has_started(&self) -> bool {
        self.phase.load(Ordering::SeqCst) != IDLE
    }

    /// Wait until some caller's run has completed
    pub async fn finished(&self) -> ExitStatus {
        let mut done = self.done.subscribe();
        let status = match done.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or(ExitStatus::ShutdownFailed),
            Err(_) => ExitStatus::ShutdownFailed,
        };
        status
    }

    /// Perform the shutdown once
    pub async fn run(&self, trigger: Trigger) -> Option<ExitStatus> {
        if self
            .phase
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(?trigger, "Shutdown already in progress");
            return None;
        }
        tracing::info!(?trigger, "Shutting down");

        let status = self.teardown(trigger).await;

        self.phase.store(DONE, Ordering::SeqCst);
        self.done.send_replace(Some(status));
        tracing::info!(code = status.code(), "Shutdown complete");
        Some(status)
    }

    async fn teardown(&self, trigger: Trigger) -> ExitStatus {
        // Restore stdout before anything else prints
        self.closer.close();
        let capture = self
            .capture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(capture) = capture {
            if let Err(e) = capture.restore() {
                eprintln!("Could not restore standard output: {}", e);
            }
        }

        if let Err(e) = self.history.flush() {
            eprintln!(
                "Could not save history to {}: {}",
                self.history.path().display(),
                e
            );
            tracing::warn!(error = %e, "History flush failed");
        }

        let mut engine = self.engine.lock().await;

        let kill = match (trigger, &self.confirmation) {
            (Trigger::Exit { confirm: true }, Some(confirmation)) => {
                match confirmation.confirm_kill(engine.pid()).await {
                    Ok(kill) => kill,
                    Err(e) => {
                        eprintln!("{}", e);
                        return ExitStatus::ShutdownFailed;
                    }
                }
            }
            _ => true,
        };

        let breakpoints: Vec<Breakpoint> = engine
            .hardware_breakpoints()
            .into_iter()
            .chain(engine.software_breakpoints())
            .collect();
        for bp in breakpoints {
            if let Err(e) = engine.clear(bp.id).await {
                eprintln!("Can't clear breakpoint {} @ {}: {}", bp.id, bp.location, e);
                tracing::warn!(id = bp.id, error = %e, "Breakpoint clear failed");
            }
        }

        println!("Detaching from process...");
        if let Err(e) = engine.detach().await {
            eprintln!("{}", e);
            tracing::error!(error = %e, "Detach failed");
            return ExitStatus::ShutdownFailed;
        }

        if kill {
            match engine.pid() {
                Some(pid) => println!("Killing process {}", pid),
                None => println!("Killing process"),
            }
            if let Err(e) = engine.kill().await {
                eprintln!("Could not kill process: {}", e);
                tracing::warn!(error = %e, "Kill failed");
            }
        }

        println!("Hope I was of service hunting your bug!");
        trigger.status()
    }
}

#[async_trait]
impl<E: Engine> Terminate for ShutdownSequencer<E> {
    async fn terminate(&self, trigger: Trigger) -> Option<ExitStatus> {
        self.run(trigger).await
    }
}
