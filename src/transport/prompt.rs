//! Interactive terminal transport
//!
//! rustyline blocks, so the prompt lives on its own OS thread and talks to
//! the async side through the command channel and a runtime handle.

use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::common::{Error, Result};
use crate::session::channel::{Command, CommandSender};
use crate::session::history::History;
use crate::session::interrupt::InterruptWatcher;
use crate::session::shutdown::{KillConfirmation, Terminate, Trigger};

pub const BANNER: &str = "Type 'help' for list of commands.";
pub const KILL_QUESTION: &str = "Would you like to kill the process? [y/n] ";

/// A question the prompt thread answers on behalf of the shutdown
pub struct ConfirmRequest {
    pub question: String,
    pub reply: oneshot::Sender<Option<String>>,
}

/// Kill confirmation answered at the local prompt
pub struct LocalConfirmation {
    requests: mpsc::UnboundedSender<ConfirmRequest>,
}

impl LocalConfirmation {
    pub fn new(requests: mpsc::UnboundedSender<ConfirmRequest>) -> Self {
        Self { requests }
    }
}

/// "y" or "yes" in any case, surrounding whitespace ignored
pub fn is_yes(answer: &str) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

#[async_trait]
impl KillConfirmation for LocalConfirmation {
    async fn confirm_kill(&self, _pid: Option<u32>) -> Result<bool> {
        let (reply, answer) = oneshot::channel();
        self.requests
            .send(ConfirmRequest {
                question: KILL_QUESTION.to_string(),
                reply,
            })
            .map_err(|_| Error::ConfirmationAborted)?;

        match answer.await {
            Ok(Some(answer)) => Ok(is_yes(&answer)),
            _ => Err(Error::ConfirmationAborted),
        }
    }
}

/// What the read loop does after one line
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    /// Keep reading; carries a line to add to the editor's history
    Continue(Option<String>),
    /// `exit` was queued; the kill question may follow
    Confirm,
    Stop,
}

pub struct LocalPrompt {
    prompt: String,
    commands: CommandSender,
    history: Arc<History>,
    confirmations: mpsc::UnboundedReceiver<ConfirmRequest>,
    terminate: Arc<dyn Terminate>,
    watcher: Arc<InterruptWatcher>,
}

impl LocalPrompt {
    pub fn new(
        prompt: String,
        commands: CommandSender,
        history: Arc<History>,
        confirmations: mpsc::UnboundedReceiver<ConfirmRequest>,
        terminate: Arc<dyn Terminate>,
        watcher: Arc<InterruptWatcher>,
    ) -> Self {
        Self {
            prompt,
            commands,
            history,
            confirmations,
            terminate,
            watcher,
        }
    }

    /// Start reading lines on a dedicated thread
    pub fn spawn(self, handle: Handle) -> Result<JoinHandle<()>> {
        let mut editor = DefaultEditor::new()?;
        for entry in self.history.entries() {
            let _ = editor.add_history_entry(entry);
        }

        let thread = std::thread::Builder::new()
            .name("prompt".to_string())
            .spawn(move || self.read_loop(editor, handle))?;
        Ok(thread)
    }

    fn read_loop(mut self, mut editor: DefaultEditor, handle: Handle) {
        println!("{}", BANNER);

        loop {
            let read = editor.readline(&self.prompt);
            match self.on_read(read, &handle) {
                Flow::Continue(Some(line)) => {
                    let _ = editor.add_history_entry(line);
                }
                Flow::Continue(None) => {}
                Flow::Confirm => {
                    self.answer_confirmation(&mut editor);
                    break;
                }
                Flow::Stop => break,
            }
        }
        // Dropping `self.commands` here ends the stream for the dispatcher.
    }

    /// Act on one readline result; must not be called from a runtime thread
    fn on_read(&self, read: rustyline::Result<String>, handle: &Handle) -> Flow {
        match read {
            Ok(line) => {
                let recorded = self.history.record(&line);
                let command = Command::parse(&line);
                let exiting = command.is_exit();
                if self.commands.push(command).is_err() {
                    // Shutdown already closed the channel
                    return Flow::Stop;
                }
                if exiting {
                    Flow::Confirm
                } else {
                    Flow::Continue(recorded.then_some(line))
                }
            }
            Err(ReadlineError::Interrupted) => {
                handle.block_on(self.watcher.on_interrupt());
                Flow::Continue(None)
            }
            Err(ReadlineError::Eof) => {
                tracing::debug!("End of input at the prompt");
                Flow::Stop
            }
            Err(e) => {
                eprintln!("Prompt for input failed: {}", e);
                tracing::error!(error = %e, "Prompt failed");
                handle.block_on(self.terminate.terminate(Trigger::InputFailure));
                Flow::Stop
            }
        }
    }

    /// Serve the one confirmation question that may follow `exit`
    fn answer_confirmation(&mut self, editor: &mut DefaultEditor) {
        let Some(request) = self.confirmations.blocking_recv() else {
            return;
        };

        let answer = match editor.readline(&request.question) {
            Ok(answer) => Some(answer),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => None,
            Err(e) => {
                eprintln!("Prompt for input failed: {}", e);
                None
            }
        };
        let _ = request.reply.send(answer);
    }
}
