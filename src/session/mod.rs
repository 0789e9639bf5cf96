//! Session core: command channel, dispatcher, history and shutdown
//!
//! A [`Session`] wires one engine to exactly one transport. Either way the
//! dispatcher is the only consumer of the command channel and the process
//! ends when the shutdown sequencer publishes its status.

pub mod channel;
pub mod dispatcher;
pub mod history;
pub mod interrupt;
pub mod shutdown;
pub mod table;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};

use crate::common::config::{Config, RemoteConfig};
use crate::common::Result;
use crate::engine::Engine;
use crate::transport::capture::OutputCapture;
use crate::transport::prompt::{LocalConfirmation, LocalPrompt};
use crate::transport::remote::{self, RemoteState};

use self::channel::command_channel;
use self::dispatcher::{Dispatcher, Report};
use self::history::History;
use self::interrupt::{InterruptFlag, InterruptWatcher};
use self::shutdown::{ExitStatus, ShutdownSequencer, Trigger};
use self::table::CommandTable;

pub struct Session<E> {
    engine: Arc<Mutex<E>>,
    table: CommandTable<E>,
    history_path: PathBuf,
    prompt: String,
    remote: RemoteConfig,
}

impl<E: Engine> Session<E> {
    pub fn new(engine: E, table: CommandTable<E>, config: &Config) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            table,
            history_path: config.history.file.clone(),
            prompt: config.prompt.text.clone(),
            remote: config.remote.clone(),
        }
    }

    /// Drive the session from the terminal until it shuts down
    pub async fn run_local(self) -> Result<ExitStatus> {
        let history = Arc::new(History::load(&self.history_path)?);
        let (commands, receiver, closer) = command_channel();
        let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();

        let sequencer = Arc::new(
            ShutdownSequencer::new(self.engine.clone(), history.clone(), closer)
                .with_confirmation(Arc::new(LocalConfirmation::new(confirm_tx))),
        );

        let flag = Arc::new(InterruptFlag::default());
        let interrupter = self.engine.lock().await.interrupter();
        let watcher = Arc::new(InterruptWatcher::new(interrupter, flag.clone()));
        let signals = watcher.clone().spawn();

        // The prompt thread owns the only producer; its end is end of input.
        LocalPrompt::new(
            self.prompt,
            commands,
            history,
            confirm_rx,
            sequencer.clone(),
            watcher,
        )
        .spawn(Handle::current())?;

        let dispatcher = Dispatcher::new(self.engine, self.table, flag, Report::Stderr);
        dispatcher
            .run(receiver, &sequencer, Trigger::Exit { confirm: true })
            .await;

        let status = sequencer.finished().await;
        signals.abort();
        Ok(status)
    }

    /// Serve one websocket client on `listener` until the session shuts down
    ///
    /// Standard output is captured for the whole session and streamed to the
    /// attached client.
    pub async fn run_remote(self, listener: TcpListener) -> Result<ExitStatus> {
        let history = Arc::new(History::load(&self.history_path)?);
        let (commands, receiver, closer) = command_channel();

        let (capture, output) = OutputCapture::redirect_stdout()?;
        let sequencer = Arc::new(
            ShutdownSequencer::new(self.engine.clone(), history.clone(), closer)
                .with_output_capture(capture),
        );

        let flag = Arc::new(InterruptFlag::default());
        let interrupter = self.engine.lock().await.interrupter();
        let watcher =
            Arc::new(InterruptWatcher::new(interrupter, flag.clone()).terminating(sequencer.clone()));
        let signals = watcher.spawn();

        let state = RemoteState::new(output, commands, history, sequencer.clone(), self.remote);
        let server = tokio::spawn(remote::serve(listener, state));

        let dispatcher = Dispatcher::new(self.engine, self.table, flag, Report::Stdout);
        dispatcher
            .run(receiver, &sequencer, Trigger::Exit { confirm: false })
            .await;

        let status = sequencer.finished().await;
        server.abort();
        signals.abort();
        Ok(status)
    }
}
