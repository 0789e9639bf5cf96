//! Ordered command funnel from the transports to the dispatcher
//!
//! Many producers, one consumer. Closing is one-way: pushes fail from then on,
//! and the consumer drains whatever was already queued before seeing the end.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::common::{Error, Result};

/// The command keyword that ends a session
pub const EXIT: &str = "exit";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The line as received
    pub line: String,
    /// First whitespace-separated token, empty for a blank line
    pub name: String,
    /// Remaining tokens
    pub args: Vec<String>,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut tokens = line.split_whitespace().map(str::to_string);
        let name = tokens.next().unwrap_or_default();
        Self {
            line: line.to_string(),
            name,
            args: tokens.collect(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.name.is_empty()
    }

    pub fn is_exit(&self) -> bool {
        self.name == EXIT
    }
}

/// Producer side; cheap to clone
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<Command>,
    closed: watch::Receiver<bool>,
}

impl CommandSender {
    /// Enqueue a command without blocking
    pub fn push(&self, command: Command) -> Result<()> {
        if *self.closed.borrow() {
            return Err(Error::ChannelClosed);
        }
        self.tx.send(command).map_err(|_| Error::ChannelClosed)
    }
}

/// Handle used by the shutdown sequence to close the channel
#[derive(Clone)]
pub struct ChannelCloser {
    closed: Arc<watch::Sender<bool>>,
}

impl ChannelCloser {
    /// Close the channel; idempotent
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Consumer side, owned by the dispatcher
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
    closed: watch::Receiver<bool>,
    // Keeps the watch sender alive for `wait_for`
    _closer: Arc<watch::Sender<bool>>,
    draining: bool,
}

impl CommandReceiver {
    /// Next command in push order, or `None` at end of stream
    ///
    /// End of stream is reached when the channel was closed and the queue is
    /// drained, or when every producer has gone away.
    pub async fn pop(&mut self) -> Option<Command> {
        if !self.draining {
            tokio::select! {
                biased;
                command = self.rx.recv() => return command,
                _ = self.closed.wait_for(|closed| *closed) => {
                    self.rx.close();
                    self.draining = true;
                }
            }
        }
        self.rx.recv().await
    }
}

/// Create a command channel
pub fn command_channel() -> (CommandSender, CommandReceiver, ChannelCloser) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let closed_tx = Arc::new(closed_tx);

    let sender = CommandSender {
        tx,
        closed: closed_rx.clone(),
    };
    let receiver = CommandReceiver {
        rx,
        closed: closed_rx,
        _closer: closed_tx.clone(),
        draining: false,
    };
    let closer = ChannelCloser { closed: closed_tx };
    (sender, receiver, closer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        let cmd = Command::parse("  break   main.go:10 ");
        assert_eq!(cmd.name, "break");
        assert_eq!(cmd.args, vec!["main.go:10".to_string()]);
        assert_eq!(cmd.line, "  break   main.go:10 ");

        let cmd = Command::parse("continue");
        assert!(cmd.args.is_empty());
        assert!(!cmd.is_exit());

        assert!(Command::parse("   ").is_blank());
        assert!(Command::parse("exit").is_exit());
    }

    #[tokio::test]
    async fn test_two_producers_keep_push_order() {
        let (a, mut rx, _closer) = command_channel();
        let b = a.clone();

        a.push(Command::parse("one")).unwrap();
        b.push(Command::parse("two")).unwrap();
        a.push(Command::parse("three")).unwrap();
        drop((a, b));

        let mut names = Vec::new();
        while let Some(cmd) = rx.pop().await {
            names.push(cmd.name);
        }
        assert_eq!(names, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (tx, mut rx, closer) = command_channel();
        tx.push(Command::parse("next")).unwrap();
        tx.push(Command::parse("step")).unwrap();

        closer.close();
        closer.close();
        assert!(closer.is_closed());

        assert_eq!(rx.pop().await.unwrap().name, "next");
        assert_eq!(rx.pop().await.unwrap().name, "step");
        // The sender is still alive, the close alone ends the stream.
        assert!(rx.pop().await.is_none());
        assert!(rx.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_push_after_close_fails() {
        let (tx, _rx, closer) = command_channel();
        closer.close();
        assert!(matches!(
            tx.push(Command::parse("continue")),
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let (_tx, mut rx, closer) = command_channel();
        let waiter = tokio::spawn(async move { rx.pop().await });
        tokio::task::yield_now().await;
        closer.close();
        assert!(waiter.await.unwrap().is_none());
    }
}
