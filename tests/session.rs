//! Session core tests against the scripted engine
//!
//! These drive the command channel, dispatcher, history and shutdown the way
//! the transports do, without a terminal or a network client.

use std::sync::{Arc, Mutex as StdMutex};

use dbg_frontend::session::channel::{command_channel, Command, CommandReceiver, CommandSender};
use dbg_frontend::session::dispatcher::{Dispatcher, Report};
use dbg_frontend::session::history::History;
use dbg_frontend::session::shutdown::{ExitStatus, ShutdownSequencer, Trigger};
use dbg_frontend::testing::{recording_table, CallLog, MockCall, MockEngine};
use tokio::sync::Mutex;

/// A wired-up session core with its history file in a temp dir
struct Harness {
    dispatcher: Dispatcher<MockEngine>,
    sequencer: Arc<ShutdownSequencer<MockEngine>>,
    history: Arc<History>,
    sender: CommandSender,
    receiver: CommandReceiver,
    calls: CallLog,
    dir: tempfile::TempDir,
}

impl Harness {
    fn new(engine: MockEngine) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let calls = engine.calls();
        let engine = Arc::new(Mutex::new(engine));
        let history = Arc::new(History::load(dir.path().join(".dbg_history")).unwrap());
        let (sender, receiver, closer) = command_channel();
        let sequencer = Arc::new(ShutdownSequencer::new(
            engine.clone(),
            history.clone(),
            closer,
        ));
        let dispatcher = Dispatcher::new(engine, recording_table(), Arc::default(), Report::Stderr);

        Self {
            dispatcher,
            sequencer,
            history,
            sender,
            receiver,
            calls,
            dir,
        }
    }

    /// Record and push a line the way a transport does
    fn type_line(&self, line: &str) {
        self.history.record(line);
        self.sender.push(Command::parse(line)).unwrap();
    }

    fn history_file(&self) -> std::path::PathBuf {
        self.dir.path().join(".dbg_history")
    }
}

#[tokio::test]
async fn test_two_producers_keep_push_order() {
    let harness = Harness::new(MockEngine::new());
    let pushed = Arc::new(StdMutex::new(Vec::new()));

    let producers: Vec<_> = ["break", "step"]
        .into_iter()
        .map(|name| {
            let sender = harness.sender.clone();
            let pushed = pushed.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    let line = format!("{} {}", name, i);
                    // Holding the lock across the push fixes the observed order
                    let mut pushed = pushed.lock().unwrap();
                    sender.push(Command::parse(&line)).unwrap();
                    pushed.push(MockCall::Command(line));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let Harness {
        dispatcher,
        sequencer,
        sender,
        receiver,
        calls,
        ..
    } = harness;
    drop(sender);
    dispatcher
        .run(receiver, &sequencer, Trigger::Exit { confirm: false })
        .await;

    let mut expected = pushed.lock().unwrap().clone();
    expected.push(MockCall::Detach);
    expected.push(MockCall::Kill);
    assert_eq!(calls.take(), expected);
}

#[tokio::test]
async fn test_concurrent_triggers_shut_down_once() {
    let harness = Harness::new(MockEngine::new().with_software(&[1]));

    let triggers = [
        Trigger::Exit { confirm: false },
        Trigger::EndOfInput,
        Trigger::Interrupt,
        Trigger::TransportFailure,
        Trigger::InputFailure,
        Trigger::Interrupt,
    ];
    let runs: Vec<_> = triggers
        .into_iter()
        .map(|trigger| {
            let sequencer = harness.sequencer.clone();
            tokio::spawn(async move { sequencer.run(trigger).await })
        })
        .collect();

    let mut statuses = Vec::new();
    for run in runs {
        if let Some(status) = run.await.unwrap() {
            statuses.push(status);
        }
    }

    assert_eq!(statuses.len(), 1);
    assert_eq!(harness.sequencer.finished().await, statuses[0]);
    assert_eq!(
        harness.calls.take(),
        vec![MockCall::Clear(1), MockCall::Detach, MockCall::Kill]
    );
}

#[tokio::test]
async fn test_history_excludes_exit() {
    let harness = Harness::new(MockEngine::new());
    for line in ["break main.go:10", "continue", "exit"] {
        harness.type_line(line);
    }

    let path = harness.history_file();
    let Harness {
        dispatcher,
        sequencer,
        receiver,
        calls,
        ..
    } = harness;
    dispatcher
        .run(receiver, &sequencer, Trigger::Exit { confirm: false })
        .await;

    assert_eq!(sequencer.finished().await, ExitStatus::Clean);
    assert_eq!(
        std::fs::read_to_string(path).unwrap(),
        "break main.go:10\ncontinue\n"
    );
    assert_eq!(
        calls.take(),
        vec![
            MockCall::Command("break main.go:10".to_string()),
            MockCall::Command("continue".to_string()),
            MockCall::Detach,
            MockCall::Kill,
        ]
    );
}

#[tokio::test]
async fn test_detach_failure_exits_with_two() {
    let harness = Harness::new(MockEngine::new().failing_detach());
    harness.type_line("exit");

    let Harness {
        dispatcher,
        sequencer,
        receiver,
        calls,
        ..
    } = harness;
    dispatcher
        .run(receiver, &sequencer, Trigger::Exit { confirm: false })
        .await;

    assert_eq!(sequencer.finished().await.code(), 2);
    assert_eq!(calls.take(), vec![MockCall::Detach]);
}

#[tokio::test]
async fn test_end_of_input_without_commands() {
    let harness = Harness::new(MockEngine::new());
    let path = harness.history_file();
    assert!(!path.exists());

    let Harness {
        dispatcher,
        sequencer,
        sender,
        receiver,
        ..
    } = harness;
    drop(sender);
    dispatcher
        .run(receiver, &sequencer, Trigger::Exit { confirm: false })
        .await;

    assert_eq!(sequencer.finished().await.code(), 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
}

#[tokio::test]
async fn test_shutdown_stops_further_intake() {
    let harness = Harness::new(MockEngine::new());
    harness.type_line("continue");

    assert_eq!(
        harness.sequencer.run(Trigger::TransportFailure).await,
        Some(ExitStatus::Fatal)
    );
    assert!(harness.sender.push(Command::parse("next")).is_err());

    let Harness {
        dispatcher,
        sequencer,
        receiver,
        calls,
        ..
    } = harness;
    dispatcher
        .run(receiver, &sequencer, Trigger::Exit { confirm: false })
        .await;

    assert_eq!(sequencer.finished().await.code(), 1);
    assert_eq!(calls.take(), vec![MockCall::Detach, MockCall::Kill]);
}
