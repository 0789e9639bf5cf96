//! SIGINT handling
//!
//! An interrupt always tries to stop a running target. In remote mode there is
//! no prompt to return to, so it also ends the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::engine::Interrupter;

use super::shutdown::{Terminate, Trigger};

/// Set by the watcher, consumed by the dispatcher before the next command
#[derive(Debug, Default)]
pub struct InterruptFlag(AtomicBool);

impl InterruptFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

pub struct InterruptWatcher {
    interrupter: Arc<dyn Interrupter>,
    flag: Arc<InterruptFlag>,
    /// Present in remote mode only
    terminate: Option<Arc<dyn Terminate>>,
}

impl InterruptWatcher {
    pub fn new(interrupter: Arc<dyn Interrupter>, flag: Arc<InterruptFlag>) -> Self {
        Self {
            interrupter,
            flag,
            terminate: None,
        }
    }

    /// Also run the shutdown on every interrupt
    pub fn terminating(mut self, terminate: Arc<dyn Terminate>) -> Self {
        self.terminate = Some(terminate);
        self
    }

    /// React to one interrupt delivery
    pub async fn on_interrupt(&self) {
        tracing::debug!("Interrupt received");
        self.flag.raise();

        if self.interrupter.is_running() {
            if let Err(e) = self.interrupter.request_stop().await {
                eprintln!("Could not stop the process: {}", e);
                tracing::warn!(error = %e, "Stop request failed");
            }
        }

        if let Some(terminate) = &self.terminate {
            terminate.terminate(Trigger::Interrupt).await;
        }
    }

    /// Listen for SIGINT for the rest of the process lifetime
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let mut interrupts = match signal(SignalKind::interrupt()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!(error = %e, "Could not install SIGINT handler");
                        return;
                    }
                };
                while interrupts.recv().await.is_some() {
                    self.on_interrupt().await;
                }
            }

            #[cfg(not(unix))]
            {
                while tokio::signal::ctrl_c().await.is_ok() {
                    self.on_interrupt().await;
                }
            }
        })
    }
}
