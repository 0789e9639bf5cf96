//! The single consumer of the command channel
//!
//! Commands run one at a time, in the order they were pushed, with exclusive
//! access to the engine.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::engine::Engine;

use super::channel::{Command, CommandReceiver};
use super::interrupt::InterruptFlag;
use super::shutdown::{ShutdownSequencer, Trigger};
use super::table::CommandTable;

/// Where command failures are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// Remote mode: stdout is what the client sees
    Stdout,
    Stderr,
}

impl Report {
    fn line(self, message: &str) {
        match self {
            Report::Stdout => println!("{}", message),
            Report::Stderr => eprintln!("{}", message),
        }
    }
}

pub struct Dispatcher<E> {
    engine: Arc<Mutex<E>>,
    table: CommandTable<E>,
    interrupts: Arc<InterruptFlag>,
    report: Report,
}

impl<E: Engine> Dispatcher<E> {
    pub fn new(
        engine: Arc<Mutex<E>>,
        table: CommandTable<E>,
        interrupts: Arc<InterruptFlag>,
        report: Report,
    ) -> Self {
        Self {
            engine,
            table,
            interrupts,
            report,
        }
    }

    /// Consume commands until `exit`, end of stream, or a shutdown started
    /// elsewhere
    ///
    /// `exit` runs the shutdown with `exit_trigger`; end of stream runs it with
    /// [`Trigger::EndOfInput`].
    pub async fn run(
        &self,
        mut commands: CommandReceiver,
        sequencer: &ShutdownSequencer<E>,
        exit_trigger: Trigger,
    ) {
        while let Some(command) = commands.pop().await {
            if sequencer.has_started() {
                tracing::debug!(command = %command.line, "Dropping command, shutdown in progress");
                return;
            }
            if command.is_exit() {
                sequencer.run(exit_trigger).await;
                return;
            }
            if command.is_blank() {
                continue;
            }
            self.dispatch(command).await;
        }

        tracing::debug!("Command stream ended");
        sequencer.run(Trigger::EndOfInput).await;
    }

    async fn dispatch(&self, command: Command) {
        if self.interrupts.take() {
            self.report.line("Process interrupted");
        }

        let handler = self.table.find(&command.name);
        tracing::debug!(command = %command.name, args = ?command.args, "Dispatching");

        let result = {
            let mut engine = self.engine.lock().await;
            handler.call(&mut *engine, &command.args).await
        };

        if let Err(e) = result {
            self.report
                .line(&format!("Command failed: {}: {}", command.name, e));
            tracing::warn!(command = %command.name, error = %e, "Command failed");
        }
    }
}
