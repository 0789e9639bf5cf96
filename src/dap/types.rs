//! DAP message types
//!
//! Only the subset of the Debug Adapter Protocol that the front-end drives.
//! See: https://microsoft.github.io/debug-adapter-protocol/specification

use serde::{Deserialize, Serialize};
use serde_json::Value;

// === Base Protocol Messages ===

/// Any message read from the adapter, tagged by its `type` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IncomingMessage {
    Response(ResponseMessage),
    Event(EventMessage),
    /// Reverse requests (e.g. `runInTerminal`), which are not supported
    Request(ReverseRequest),
}

/// Request sent to the adapter
#[derive(Debug, Clone, Serialize)]
pub struct RequestMessage<'a> {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: &'static str,
    pub command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl<'a> RequestMessage<'a> {
    pub fn new(seq: i64, command: &'a str, arguments: Option<Value>) -> Self {
        Self {
            seq,
            message_type: "request",
            command,
            arguments,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub event: String,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReverseRequest {
    pub seq: i64,
    pub command: String,
}

// === Request Arguments ===

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(rename = "clientID")]
    pub client_id: String,
    pub client_name: String,
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    pub lines_start_at1: bool,
    pub columns_start_at1: bool,
    pub path_format: String,
    pub supports_run_in_terminal_request: bool,
}

impl InitializeArguments {
    pub fn new(adapter_id: &str) -> Self {
        Self {
            client_id: "dbg-frontend".to_string(),
            client_name: "dbg".to_string(),
            adapter_id: adapter_id.to_string(),
            lines_start_at1: true,
            columns_start_at1: true,
            path_format: "path".to_string(),
            supports_run_in_terminal_request: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub stop_on_entry: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachArguments {
    pub pid: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    pub breakpoints: Vec<SourceBreakpoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetFunctionBreakpointsArguments {
    pub breakpoints: Vec<FunctionBreakpoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetInstructionBreakpointsArguments {
    pub breakpoints: Vec<InstructionBreakpoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetDataBreakpointsArguments {
    pub breakpoints: Vec<DataBreakpoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBreakpointInfoArguments {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<i64>,
}

/// Arguments shared by `continue`, `next`, `stepIn`, `stepOut` and `pause`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadArguments {
    pub thread_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub thread_id: i64,
    pub start_frame: i64,
    pub levels: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    pub restart: bool,
    pub terminate_debuggee: bool,
}

// === Response Bodies ===

/// Capabilities returned by initialize response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub supports_configuration_done_request: bool,
    #[serde(default)]
    pub supports_function_breakpoints: bool,
    #[serde(default)]
    pub supports_data_breakpoints: bool,
    #[serde(default)]
    pub supports_instruction_breakpoints: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetBreakpointsResponseBody {
    #[serde(default)]
    pub breakpoints: Vec<Breakpoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBreakpointInfoResponseBody {
    pub data_id: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    pub stack_frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadsResponseBody {
    pub threads: Vec<Thread>,
}

// === Common Types ===

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceBreakpoint {
    pub line: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionBreakpoint {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionBreakpoint {
    pub instruction_reference: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBreakpoint {
    pub data_id: String,
    pub access_type: &'static str,
}

/// Breakpoint as reported back by the adapter
#[derive(Debug, Clone, Deserialize)]
pub struct Breakpoint {
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub instruction_pointer_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

// === Event Bodies ===

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEventBody {
    pub reason: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thread_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputEventBody {
    #[serde(default)]
    pub category: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEventBody {
    pub exit_code: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEventBody {
    pub name: String,
    #[serde(default)]
    pub system_process_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEventBody {
    pub reason: String,
    pub thread_id: i64,
}

// === Parsed Events ===

#[derive(Debug, Clone)]
pub enum Event {
    Initialized,
    Stopped(StoppedEventBody),
    Continued { thread_id: Option<i64> },
    Exited(ExitedEventBody),
    Terminated,
    Process(ProcessEventBody),
    Thread(ThreadEventBody),
    Output(OutputEventBody),
    Unknown { event: String },
}

impl Event {
    /// Parse an event from an EventMessage
    ///
    /// Bodies that fail to parse degrade to `Unknown` rather than erroring.
    pub fn from_message(msg: EventMessage) -> Self {
        fn body<T: serde::de::DeserializeOwned>(body: &Option<Value>) -> Option<T> {
            body.as_ref()
                .and_then(|b| serde_json::from_value(b.clone()).ok())
        }

        let parsed = match msg.event.as_str() {
            "initialized" => Some(Event::Initialized),
            "stopped" => body(&msg.body).map(Event::Stopped),
            "continued" => Some(Event::Continued {
                thread_id: msg
                    .body
                    .as_ref()
                    .and_then(|b| b.get("threadId"))
                    .and_then(Value::as_i64),
            }),
            "exited" => Some(Event::Exited(
                body(&msg.body).unwrap_or(ExitedEventBody { exit_code: 0 }),
            )),
            "terminated" => Some(Event::Terminated),
            "process" => body(&msg.body).map(Event::Process),
            "thread" => body(&msg.body).map(Event::Thread),
            "output" => body(&msg.body).map(Event::Output),
            _ => None,
        };

        parsed.unwrap_or(Event::Unknown { event: msg.event })
    }
}
