//! Engine backed by a Debug Adapter Protocol adapter
//!
//! The adapter runs as a child process. Breakpoints are tracked locally and
//! resent per group (one source file, all functions, all instructions, all
//! data breakpoints), since DAP replaces a whole group on every `set*` request.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::config::{Config, Timeouts};
use crate::common::{Error, Result};
use crate::dap::client::arguments;
use crate::dap::{
    self as protocol, AttachArguments, DapClient, DapRequester, DataBreakpoint,
    DataBreakpointInfoArguments, DataBreakpointInfoResponseBody, DisconnectArguments, Event,
    FunctionBreakpoint, InstructionBreakpoint, LaunchArguments, SetBreakpointsArguments,
    SetBreakpointsResponseBody, SetDataBreakpointsArguments, SetFunctionBreakpointsArguments,
    SetInstructionBreakpointsArguments, Source, SourceBreakpoint, StackFrame,
    StackTraceArguments, StackTraceResponseBody, Thread, ThreadArguments, ThreadsResponseBody,
};

use super::{Breakpoint, BreakpointKind, Engine, Interrupter};

/// Marks "no thread seen yet"; DAP thread ids are otherwise arbitrary
const UNKNOWN_THREAD: i64 = i64::MIN;

/// Where a software breakpoint is placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Line { file: PathBuf, line: u32 },
    Function { name: String },
    Instruction { address: String },
}

impl Location {
    /// Parse `file:line`, `*0xADDR` or a function name
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidLocation("empty location".to_string()));
        }

        if let Some(address) = s.strip_prefix('*') {
            let address = address.trim();
            let digits = address
                .strip_prefix("0x")
                .or_else(|| address.strip_prefix("0X"))
                .ok_or_else(|| {
                    Error::InvalidLocation(format!("address must be hexadecimal: {}", address))
                })?;
            u64::from_str_radix(digits, 16).map_err(|_| {
                Error::InvalidLocation(format!("invalid address: {}", address))
            })?;
            return Ok(Self::Instruction {
                address: address.to_string(),
            });
        }

        // The last ':' followed only by digits splits file from line, so
        // Windows drive letters survive.
        if let Some(colon) = s.rfind(':') {
            let (file, line) = (&s[..colon], &s[colon + 1..]);
            if !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
                let line: u32 = line
                    .parse()
                    .map_err(|_| Error::InvalidLocation(format!("invalid line number: {}", line)))?;
                if file.is_empty() {
                    return Err(Error::InvalidLocation(format!("missing file in {}", s)));
                }
                return Ok(Self::Line {
                    file: PathBuf::from(file),
                    line,
                });
            }
        }

        Ok(Self::Function {
            name: s.to_string(),
        })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Line { file, line } => write!(f, "{}:{}", file.display(), line),
            Self::Function { name } => write!(f, "{}", name),
            Self::Instruction { address } => write!(f, "*{}", address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    Software(Location),
    /// Hardware watchpoint on an expression
    Data { expression: String, data_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Group {
    Source(PathBuf),
    Functions,
    Instructions,
    Data,
}

impl Placement {
    fn group(&self) -> Group {
        match self {
            Self::Software(Location::Line { file, .. }) => Group::Source(file.clone()),
            Self::Software(Location::Function { .. }) => Group::Functions,
            Self::Software(Location::Instruction { .. }) => Group::Instructions,
            Self::Data { .. } => Group::Data,
        }
    }

    fn kind(&self) -> BreakpointKind {
        match self {
            Self::Software(_) => BreakpointKind::Software,
            Self::Data { .. } => BreakpointKind::Hardware,
        }
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    id: u32,
    placement: Placement,
}

impl Tracked {
    fn describe(&self) -> Breakpoint {
        let location = match &self.placement {
            Placement::Software(location) => location.to_string(),
            Placement::Data { expression, .. } => expression.clone(),
        };
        Breakpoint {
            id: self.id,
            kind: self.placement.kind(),
            location,
        }
    }
}

/// Locally tracked breakpoints, in creation order
#[derive(Debug, Default)]
struct BreakpointBook {
    last_id: u32,
    tracked: Vec<Tracked>,
}

impl BreakpointBook {
    fn insert(&mut self, placement: Placement) -> u32 {
        self.last_id += 1;
        self.tracked.push(Tracked {
            id: self.last_id,
            placement,
        });
        self.last_id
    }

    fn remove(&mut self, id: u32) -> Option<Tracked> {
        let pos = self.tracked.iter().position(|t| t.id == id)?;
        Some(self.tracked.remove(pos))
    }

    fn restore(&mut self, tracked: Tracked) {
        let pos = self
            .tracked
            .iter()
            .position(|t| t.id > tracked.id)
            .unwrap_or(self.tracked.len());
        self.tracked.insert(pos, tracked);
    }

    fn members<'a>(&'a self, group: &'a Group) -> impl Iterator<Item = &'a Tracked> + 'a {
        self.tracked
            .iter()
            .filter(move |t| &t.placement.group() == group)
    }

    fn list(&self, kind: BreakpointKind) -> Vec<Breakpoint> {
        self.tracked
            .iter()
            .filter(|t| t.placement.kind() == kind)
            .map(Tracked::describe)
            .collect()
    }

    /// Request that replaces `group` on the adapter with the book's contents
    fn request_for(&self, group: &Group) -> Result<(&'static str, Option<serde_json::Value>)> {
        match group {
            Group::Source(file) => {
                let breakpoints = self
                    .members(group)
                    .filter_map(|t| match &t.placement {
                        Placement::Software(Location::Line { line, .. }) => {
                            Some(SourceBreakpoint { line: *line })
                        }
                        _ => None,
                    })
                    .collect();
                let args = SetBreakpointsArguments {
                    source: Source {
                        name: None,
                        path: Some(file.to_string_lossy().into_owned()),
                    },
                    breakpoints,
                };
                Ok(("setBreakpoints", arguments(&args)?))
            }
            Group::Functions => {
                let breakpoints = self
                    .members(group)
                    .filter_map(|t| match &t.placement {
                        Placement::Software(Location::Function { name }) => {
                            Some(FunctionBreakpoint { name: name.clone() })
                        }
                        _ => None,
                    })
                    .collect();
                let args = SetFunctionBreakpointsArguments { breakpoints };
                Ok(("setFunctionBreakpoints", arguments(&args)?))
            }
            Group::Instructions => {
                let breakpoints = self
                    .members(group)
                    .filter_map(|t| match &t.placement {
                        Placement::Software(Location::Instruction { address }) => {
                            Some(InstructionBreakpoint {
                                instruction_reference: address.clone(),
                            })
                        }
                        _ => None,
                    })
                    .collect();
                let args = SetInstructionBreakpointsArguments { breakpoints };
                Ok(("setInstructionBreakpoints", arguments(&args)?))
            }
            Group::Data => {
                let breakpoints = self
                    .members(group)
                    .filter_map(|t| match &t.placement {
                        Placement::Data { data_id, .. } => Some(DataBreakpoint {
                            data_id: data_id.clone(),
                            access_type: "write",
                        }),
                        _ => None,
                    })
                    .collect();
                let args = SetDataBreakpointsArguments { breakpoints };
                Ok(("setDataBreakpoints", arguments(&args)?))
            }
        }
    }
}

/// Target state shared between the engine, its interrupter and the event tracker
#[derive(Debug)]
struct TargetState {
    running: AtomicBool,
    /// The debuggee itself exited
    exited: AtomicBool,
    /// The debug session ended; the debuggee may still be alive
    ended: AtomicBool,
    /// Set by the first `stopped` event
    stopped_once: AtomicBool,
    /// 0 until the adapter reports the process
    pid: AtomicU32,
    thread: AtomicI64,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            exited: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            stopped_once: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            thread: AtomicI64::new(UNKNOWN_THREAD),
        }
    }
}

impl TargetState {
    fn state_name(&self) -> &'static str {
        if self.exited.load(Ordering::SeqCst) {
            "exited"
        } else if self.ended.load(Ordering::SeqCst) {
            "detached"
        } else if self.running.load(Ordering::SeqCst) {
            "running"
        } else {
            "stopped"
        }
    }

    fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

/// Resolve the thread to act on: last stopped/started thread, else the first one
async fn current_thread(requester: &DapRequester, target: &TargetState) -> Result<i64> {
    let known = target.thread.load(Ordering::SeqCst);
    if known != UNKNOWN_THREAD {
        return Ok(known);
    }

    let response: ThreadsResponseBody = requester.request("threads", None).await?;
    let first = response.threads.first().map(|t| t.id).ok_or(Error::NoThreads)?;
    target.thread.store(first, Ordering::SeqCst);
    Ok(first)
}

/// Consume adapter events: keep `target` current and echo them to stdout
async fn track_events(
    mut events: mpsc::UnboundedReceiver<Event>,
    target: Arc<TargetState>,
    initialized: oneshot::Sender<()>,
) {
    let mut initialized = Some(initialized);

    while let Some(event) = events.recv().await {
        match event {
            Event::Initialized => {
                if let Some(tx) = initialized.take() {
                    let _ = tx.send(());
                }
            }
            Event::Stopped(body) => {
                target.stopped_once.store(true, Ordering::SeqCst);
                target.running.store(false, Ordering::SeqCst);
                if let Some(thread) = body.thread_id {
                    target.thread.store(thread, Ordering::SeqCst);
                }
                match body.description {
                    Some(description) => println!("Stopped: {} ({})", body.reason, description),
                    None => println!("Stopped: {}", body.reason),
                }
            }
            Event::Continued { thread_id } => {
                target.running.store(true, Ordering::SeqCst);
                if let Some(thread) = thread_id {
                    target.thread.store(thread, Ordering::SeqCst);
                }
            }
            Event::Exited(body) => {
                target.exited.store(true, Ordering::SeqCst);
                target.running.store(false, Ordering::SeqCst);
                match target.pid() {
                    Some(pid) => println!(
                        "Process {} has exited with status {}",
                        pid, body.exit_code
                    ),
                    None => println!("Process has exited with status {}", body.exit_code),
                }
            }
            Event::Terminated => {
                target.ended.store(true, Ordering::SeqCst);
                target.running.store(false, Ordering::SeqCst);
                tracing::debug!("Debug session terminated");
            }
            Event::Process(body) => {
                if let Some(pid) = body.system_process_id {
                    target.pid.store(pid, Ordering::SeqCst);
                }
                tracing::debug!(name = %body.name, pid = ?body.system_process_id, "Target process");
            }
            Event::Thread(body) => {
                if body.reason == "started" {
                    let _ = target.thread.compare_exchange(
                        UNKNOWN_THREAD,
                        body.thread_id,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                }
            }
            Event::Output(body) => {
                if body.category.as_deref() != Some("telemetry") {
                    print!("{}", body.output);
                    let _ = std::io::stdout().flush();
                }
            }
            Event::Unknown { event } => tracing::trace!(event = %event, "Unhandled DAP event"),
        }
    }

    tracing::debug!("DAP event stream ended");
}

/// Stops the target with a DAP `pause`
pub struct DapInterrupter {
    requester: DapRequester,
    target: Arc<TargetState>,
}

#[async_trait]
impl Interrupter for DapInterrupter {
    fn is_running(&self) -> bool {
        self.target.state_name() == "running"
    }

    async fn request_stop(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let thread_id = current_thread(&self.requester, &self.target).await?;
        self.requester
            .execute("pause", arguments(&ThreadArguments { thread_id })?)
            .await
    }
}

enum StartRequest {
    Launch(LaunchArguments),
    Attach(AttachArguments),
}

/// Engine driving a DAP adapter
pub struct DapEngine {
    // Keeps the adapter process and reader task alive
    _client: DapClient,
    requester: DapRequester,
    target: Arc<TargetState>,
    breakpoints: BreakpointBook,
    tracker: JoinHandle<()>,
    supports_data_breakpoints: bool,
}

impl DapEngine {
    /// Launch `program` under the adapter, stopped on entry
    #[tracing::instrument(skip(config, program, args), fields(program = %program.display()))]
    pub async fn launch(
        config: &Config,
        adapter: Option<&str>,
        program: &Path,
        args: Vec<String>,
    ) -> Result<Self> {
        let (name, client) = spawn_adapter(config, adapter).await?;
        let cwd = std::env::current_dir()
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        let request = StartRequest::Launch(LaunchArguments {
            program: program.to_string_lossy().into_owned(),
            args,
            cwd,
            stop_on_entry: true,
        });
        Self::start(client, &name, request, &config.timeouts).await
    }

    /// Attach to the running process `pid`
    #[tracing::instrument(skip(config))]
    pub async fn attach(config: &Config, adapter: Option<&str>, pid: u32) -> Result<Self> {
        let (name, client) = spawn_adapter(config, adapter).await?;
        Self::start(client, &name, StartRequest::Attach(AttachArguments { pid }), &config.timeouts)
            .await
    }

    /// Run the DAP startup handshake over an existing client
    ///
    /// `initialize`, then `launch`/`attach` in the background, then wait for
    /// the `initialized` event, then `configurationDone`, then the start
    /// response. Some adapters only answer the start request after
    /// `configurationDone`, hence the background request.
    async fn start(
        mut client: DapClient,
        adapter_id: &str,
        request: StartRequest,
        timeouts: &Timeouts,
    ) -> Result<Self> {
        let request_timeout = Duration::from_secs(timeouts.dap_request_secs);
        client
            .initialize(adapter_id, Duration::from_secs(timeouts.dap_initialize_secs))
            .await?;

        let events = client
            .take_event_receiver()
            .ok_or_else(|| Error::Internal("DAP event receiver already taken".to_string()))?;
        let target = Arc::new(TargetState::default());
        let (init_tx, mut init_rx) = oneshot::channel();
        let tracker = tokio::spawn(track_events(events, target.clone(), init_tx));

        let requester = client.requester();
        let (command, args) = match &request {
            StartRequest::Launch(args) => ("launch", arguments(args)?),
            StartRequest::Attach(args) => {
                target.pid.store(args.pid, Ordering::SeqCst);
                ("attach", arguments(args)?)
            }
        };
        let fail = |e: Error| match &request {
            StartRequest::Launch(_) => Error::LaunchFailed(e.to_string()),
            StartRequest::Attach(args) => Error::AttachFailed {
                pid: args.pid,
                reason: e.to_string(),
            },
        };

        tracing::debug!(command, "Sending DAP start request");
        let mut start = tokio::spawn({
            let requester = requester.clone();
            async move { requester.execute(command, args).await }
        });
        let mut started = false;

        let initialized = tokio::time::timeout(request_timeout, async {
            tokio::select! {
                init = &mut init_rx => return init.map_err(|_| Error::AdapterClosed),
                joined = &mut start => {
                    joined.map_err(|e| Error::Internal(e.to_string()))??;
                    started = true;
                }
            }
            (&mut init_rx).await.map_err(|_| Error::AdapterClosed)
        })
        .await
        .unwrap_or_else(|_| {
            Err(Error::Timeout {
                command: "initialized".to_string(),
                secs: request_timeout.as_secs(),
            })
        });

        if let Err(e) = initialized {
            start.abort();
            tracker.abort();
            return Err(fail(e));
        }

        requester
            .execute("configurationDone", None)
            .await
            .map_err(&fail)?;
        if !started {
            start
                .await
                .map_err(|e| Error::Internal(e.to_string()))?
                .map_err(&fail)?;
        }
        if matches!(request, StartRequest::Attach(_)) {
            // An attached process keeps running and no `continued` event
            // announces it. A stop seen meanwhile wins.
            target.running.store(true, Ordering::SeqCst);
            if target.stopped_once.load(Ordering::SeqCst) {
                target.running.store(false, Ordering::SeqCst);
            }
        }
        tracing::info!(pid = ?target.pid(), "Debug session started");

        let supports_data_breakpoints = client.capabilities.supports_data_breakpoints;
        Ok(Self {
            _client: client,
            requester,
            target,
            breakpoints: BreakpointBook::default(),
            tracker,
            supports_data_breakpoints,
        })
    }

    fn ensure_stopped(&self, action: &str) -> Result<()> {
        match self.target.state_name() {
            "stopped" => Ok(()),
            state => Err(Error::invalid_state(action, state)),
        }
    }

    async fn sync(&self, group: &Group) -> Result<Vec<protocol::Breakpoint>> {
        let (command, args) = self.breakpoints.request_for(group)?;
        let response: SetBreakpointsResponseBody = self.requester.request(command, args).await?;
        Ok(response.breakpoints)
    }

    /// Track a placement and push its group to the adapter
    async fn add(&mut self, placement: Placement) -> Result<Breakpoint> {
        let group = placement.group();
        let id = self.breakpoints.insert(placement);

        let results = match self.sync(&group).await {
            Ok(results) => results,
            Err(e) => {
                self.breakpoints.remove(id);
                return Err(e);
            }
        };

        let position = self.breakpoints.members(&group).position(|t| t.id == id);
        if let Some(result) = position.and_then(|i| results.get(i)) {
            if !result.verified {
                tracing::info!(
                    id,
                    message = ?result.message,
                    "Breakpoint not yet verified by the adapter"
                );
            }
        }

        self.breakpoints
            .tracked
            .iter()
            .find(|t| t.id == id)
            .map(Tracked::describe)
            .ok_or(Error::BreakpointNotFound { id })
    }

    /// Set a software breakpoint at `file:line`, `function` or `*0xADDR`
    pub async fn set_breakpoint(&mut self, location: &str) -> Result<Breakpoint> {
        let location = Location::parse(location)?;
        self.add(Placement::Software(location)).await
    }

    /// Set a hardware watchpoint on writes to `expression`
    pub async fn watch(&mut self, expression: &str) -> Result<Breakpoint> {
        if !self.supports_data_breakpoints {
            return Err(Error::dap_request_failed(
                "setDataBreakpoints",
                "adapter does not support data breakpoints",
            ));
        }
        self.ensure_stopped("watch")?;

        let frame_id = self.top_frame().await?.map(|f| f.id);
        let info: DataBreakpointInfoResponseBody = self
            .requester
            .request(
                "dataBreakpointInfo",
                arguments(&DataBreakpointInfoArguments {
                    name: expression.to_string(),
                    frame_id,
                })?,
            )
            .await?;
        let data_id = info
            .data_id
            .ok_or_else(|| Error::dap_request_failed("dataBreakpointInfo", &info.description))?;

        self.add(Placement::Data {
            expression: expression.to_string(),
            data_id,
        })
        .await
    }

    /// All breakpoints, hardware first
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        let mut all = self.breakpoints.list(BreakpointKind::Hardware);
        all.extend(self.breakpoints.list(BreakpointKind::Software));
        all
    }

    async fn resume(&mut self, command: &str) -> Result<()> {
        self.ensure_stopped(command)?;
        let thread_id = current_thread(&self.requester, &self.target).await?;

        // Mark running first: the stop event may beat the response.
        self.target.running.store(true, Ordering::SeqCst);
        let result = self
            .requester
            .execute(command, arguments(&ThreadArguments { thread_id })?)
            .await;
        if result.is_err() {
            self.target.running.store(false, Ordering::SeqCst);
        }
        result
    }

    pub async fn continue_execution(&mut self) -> Result<()> {
        self.resume("continue").await
    }

    pub async fn next(&mut self) -> Result<()> {
        self.resume("next").await
    }

    pub async fn step_in(&mut self) -> Result<()> {
        self.resume("stepIn").await
    }

    pub async fn step_out(&mut self) -> Result<()> {
        self.resume("stepOut").await
    }

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        let response: ThreadsResponseBody = self.requester.request("threads", None).await?;
        Ok(response.threads)
    }

    pub async fn stack_trace(&self, levels: i64) -> Result<Vec<StackFrame>> {
        self.ensure_stopped("show the stack")?;
        let thread_id = current_thread(&self.requester, &self.target).await?;
        let response: StackTraceResponseBody = self
            .requester
            .request(
                "stackTrace",
                arguments(&StackTraceArguments {
                    thread_id,
                    start_frame: 0,
                    levels,
                })?,
            )
            .await?;
        Ok(response.stack_frames)
    }

    async fn top_frame(&self) -> Result<Option<StackFrame>> {
        Ok(self.stack_trace(1).await?.into_iter().next())
    }
}

async fn spawn_adapter(config: &Config, adapter: Option<&str>) -> Result<(String, DapClient)> {
    let name = adapter.unwrap_or(&config.defaults.adapter).to_string();
    let adapter_config = config
        .get_adapter(&name)
        .ok_or_else(|| Error::adapter_not_found(&name, &["config.toml", "PATH"]))?;

    tracing::info!(
        adapter = %name,
        path = %adapter_config.path.display(),
        args = ?adapter_config.args,
        "Starting debug adapter"
    );

    let client = DapClient::spawn(
        &adapter_config.path,
        &adapter_config.args,
        Duration::from_secs(config.timeouts.dap_request_secs),
    )
    .await?;
    Ok((name, client))
}

#[async_trait]
impl Engine for DapEngine {
    fn pid(&self) -> Option<u32> {
        self.target.pid()
    }

    fn interrupter(&self) -> Arc<dyn Interrupter> {
        Arc::new(DapInterrupter {
            requester: self.requester.clone(),
            target: self.target.clone(),
        })
    }

    fn hardware_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.list(BreakpointKind::Hardware)
    }

    fn software_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.list(BreakpointKind::Software)
    }

    async fn clear(&mut self, id: u32) -> Result<Breakpoint> {
        let removed = self
            .breakpoints
            .remove(id)
            .ok_or(Error::BreakpointNotFound { id })?;

        match self.sync(&removed.placement.group()).await {
            Ok(_) => Ok(removed.describe()),
            Err(e) => {
                self.breakpoints.restore(removed);
                Err(e)
            }
        }
    }

    async fn detach(&mut self) -> Result<()> {
        if self.target.exited.load(Ordering::SeqCst) || self.target.ended.load(Ordering::SeqCst) {
            return Ok(());
        }

        let args = DisconnectArguments {
            restart: false,
            terminate_debuggee: false,
        };
        match self.requester.execute("disconnect", arguments(&args)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_adapter_closed() => Ok(()),
            Err(e) => Err(Error::Detach(e.to_string())),
        }
    }

    #[cfg(unix)]
    async fn kill(&mut self) -> Result<()> {
        if self.target.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        let pid = self
            .target
            .pid()
            .ok_or_else(|| Error::Internal("target process id is unknown".to_string()))?;
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| Error::Internal(format!("pid {} out of range", pid)))?;

        // SAFETY: kill(2) has no memory-safety preconditions.
        if unsafe { libc::kill(pid, libc::SIGKILL) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(Error::Io(err))
        }
    }

    #[cfg(not(unix))]
    async fn kill(&mut self) -> Result<()> {
        Err(Error::Internal(
            "killing the target is not supported on this platform".to_string(),
        ))
    }
}

impl Drop for DapEngine {
    fn drop(&mut self) {
        self.tracker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dap::codec;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tokio::io::{duplex, BufReader};

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            Location::parse("main.c:10").unwrap(),
            Location::Line {
                file: PathBuf::from("main.c"),
                line: 10
            }
        );
        assert_eq!(
            Location::parse(r"C:\src\main.c:7").unwrap(),
            Location::Line {
                file: PathBuf::from(r"C:\src\main.c"),
                line: 7
            }
        );
        assert_eq!(
            Location::parse("std::vec::Vec::push").unwrap(),
            Location::Function {
                name: "std::vec::Vec::push".to_string()
            }
        );
        assert_eq!(
            Location::parse("*0x401000").unwrap(),
            Location::Instruction {
                address: "0x401000".to_string()
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_locations() {
        assert!(Location::parse("").is_err());
        assert!(Location::parse("*401000").is_err());
        assert!(Location::parse("*0xZZ").is_err());
        assert!(Location::parse(":12").is_err());
    }

    #[test]
    fn test_book_groups_and_kinds() {
        let mut book = BreakpointBook::default();
        let a = book.insert(Placement::Software(Location::parse("a.c:1").unwrap()));
        let b = book.insert(Placement::Software(Location::parse("b.c:2").unwrap()));
        let c = book.insert(Placement::Software(Location::parse("a.c:3").unwrap()));
        let w = book.insert(Placement::Data {
            expression: "x".to_string(),
            data_id: "0x10".to_string(),
        });
        assert_eq!((a, b, c, w), (1, 2, 3, 4));

        let group = Group::Source(PathBuf::from("a.c"));
        let ids: Vec<u32> = book.members(&group).map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3]);

        assert_eq!(book.list(BreakpointKind::Hardware).len(), 1);
        assert_eq!(book.list(BreakpointKind::Software).len(), 3);

        let removed = book.remove(3).unwrap();
        let (command, args) = book.request_for(&group).unwrap();
        assert_eq!(command, "setBreakpoints");
        assert_eq!(args.unwrap()["breakpoints"], json!([{"line": 1}]));

        book.restore(removed);
        let ids: Vec<u32> = book.tracked.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    /// Minimal scripted adapter on the far end of two duplex pipes
    ///
    /// Launch reports process `pid`; `disconnect` ends the session with a
    /// `terminated` event the way lldb-dap does.
    fn fake_adapter(log: Arc<Mutex<Vec<Value>>>, pid: u32) -> DapClient {
        let (client_out, adapter_in) = duplex(64 * 1024);
        let (mut adapter_out, client_in) = duplex(64 * 1024);

        tokio::spawn(async move {
            let mut reader = BufReader::new(adapter_in);
            let mut seq = 1000;
            while let Ok(Some(json)) = codec::read_frame(&mut reader).await {
                let request: Value = serde_json::from_str(&json).unwrap();
                log.lock().unwrap().push(request.clone());
                let command = request["command"].as_str().unwrap_or_default().to_string();

                let body = match command.as_str() {
                    "initialize" => json!({"supportsDataBreakpoints": true}),
                    "setBreakpoints" | "setFunctionBreakpoints" => {
                        let count = request["arguments"]["breakpoints"]
                            .as_array()
                            .map(|a| a.len())
                            .unwrap_or(0);
                        json!({"breakpoints": vec![json!({"verified": true}); count]})
                    }
                    _ => json!({}),
                };
                seq += 1;
                let response = json!({"seq": seq, "type": "response",
                    "request_seq": request["seq"], "success": true,
                    "command": command, "body": body});
                codec::write_frame(&mut adapter_out, &response.to_string())
                    .await
                    .unwrap();

                let events = match command.as_str() {
                    "launch" => vec![
                        json!({"seq": 1, "type": "event", "event": "initialized"}),
                        json!({"seq": 2, "type": "event", "event": "process",
                            "body": {"name": "demo", "systemProcessId": pid}}),
                    ],
                    "attach" => vec![json!({"seq": 1, "type": "event", "event": "initialized"})],
                    "disconnect" => vec![json!({"seq": 3, "type": "event", "event": "terminated"})],
                    _ => Vec::new(),
                };
                for event in events {
                    codec::write_frame(&mut adapter_out, &event.to_string())
                        .await
                        .unwrap();
                }
                if command == "disconnect" {
                    break;
                }
            }
        });

        DapClient::from_streams(BufReader::new(client_in), client_out, Duration::from_secs(5))
    }

    fn commands(log: &Mutex<Vec<Value>>) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .map(|r| r["command"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    async fn launched_as(log: Arc<Mutex<Vec<Value>>>, pid: u32) -> DapEngine {
        let request = StartRequest::Launch(LaunchArguments {
            program: "demo".to_string(),
            args: Vec::new(),
            cwd: None,
            stop_on_entry: true,
        });
        DapEngine::start(fake_adapter(log, pid), "fake", request, &Timeouts::default())
            .await
            .unwrap()
    }

    async fn launched(log: Arc<Mutex<Vec<Value>>>) -> DapEngine {
        launched_as(log, 4242).await
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_startup_handshake_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = launched(log.clone()).await;

        assert_eq!(
            commands(&log),
            vec!["initialize", "launch", "configurationDone"]
        );
        // The process event is delivered asynchronously.
        eventually(|| engine.pid().is_some()).await;
        assert_eq!(engine.pid(), Some(4242));
    }

    #[tokio::test]
    async fn test_clear_resends_remaining_group() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = launched(log.clone()).await;

        let first = engine.set_breakpoint("main.c:10").await.unwrap();
        let second = engine.set_breakpoint("main.c:20").await.unwrap();
        assert_eq!(first.location, "main.c:10");
        assert_eq!(engine.software_breakpoints().len(), 2);

        let cleared = engine.clear(first.id).await.unwrap();
        assert_eq!(cleared, first);
        assert_eq!(engine.software_breakpoints(), vec![second]);

        let last = log.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last["command"], "setBreakpoints");
        assert_eq!(last["arguments"]["breakpoints"], json!([{"line": 20}]));

        assert!(matches!(
            engine.clear(99).await,
            Err(Error::BreakpointNotFound { id: 99 })
        ));
    }

    #[tokio::test]
    async fn test_detach_keeps_debuggee_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = launched(log.clone()).await;

        engine.detach().await.unwrap();

        let last = log.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last["command"], "disconnect");
        assert_eq!(last["arguments"]["terminateDebuggee"], json!(false));
    }

    #[tokio::test]
    async fn test_attached_target_counts_as_running() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let request = StartRequest::Attach(AttachArguments { pid: 4343 });
        let engine = DapEngine::start(
            fake_adapter(log.clone(), 0),
            "fake",
            request,
            &Timeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            commands(&log),
            vec!["initialize", "attach", "configurationDone"]
        );
        assert_eq!(engine.pid(), Some(4343));
        assert!(engine.interrupter().is_running());
        assert!(matches!(
            engine.stack_trace(5).await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kill_after_session_terminated() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = launched_as(log, child.id()).await;
        eventually(|| engine.pid() == Some(child.id())).await;

        engine.detach().await.unwrap();
        let target = engine.target.clone();
        eventually(|| target.ended.load(Ordering::SeqCst)).await;
        assert!(!engine.interrupter().is_running());

        engine.kill().await.unwrap();
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }
}
