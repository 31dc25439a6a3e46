//! Streaming protocol events and request shapes.
//!
//! Events are JSON objects discriminated by a SCREAMING_SNAKE_CASE `type`;
//! payload fields are camelCase. Every event may carry a millisecond
//! `timestamp`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};
use uuid::Uuid;

use crate::context::RequestContextItem;
use crate::tools::FrontendTool;

/// A protocol event with its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AguiEvent {
    #[serde(flatten)]
    pub payload: AguiEventPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl AguiEvent {
    /// Wrap `payload` stamped with the current time.
    pub fn now(payload: AguiEventPayload) -> Self {
        Self {
            payload,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn untimed(payload: AguiEventPayload) -> Self {
        Self {
            payload,
            timestamp: None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, AguiEventPayload::RunFinished { .. })
    }
}

impl From<AguiEventPayload> for AguiEvent {
    fn from(payload: AguiEventPayload) -> Self {
        Self::untimed(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum AguiEventPayload {
    RunStarted {
        thread_id: String,
        run_id: String,
    },
    /// A failure reported during the run. The run still ends with
    /// `RUN_FINISHED`.
    RunError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    TextMessageStart {
        message_id: String,
        #[serde(default = "assistant_role")]
        role: String,
    },
    TextMessageContent {
        message_id: String,
        delta: String,
    },
    TextMessageEnd {
        message_id: String,
    },
    ToolCallStart {
        tool_call_id: String,
        tool_call_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_message_id: Option<String>,
    },
    ToolCallArgs {
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        tool_call_id: String,
    },
    ToolCallResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        tool_call_id: String,
        content: String,
    },
    RunFinished {
        #[serde(default)]
        thread_id: String,
        #[serde(default)]
        run_id: String,
        #[serde(default)]
        outcome: RunOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "lenient_interrupt"
        )]
        interrupt: Option<InterruptInfo>,
    },
    StateSnapshot {
        #[serde(alias = "snapshot")]
        state: Value,
    },
    StateDelta {
        delta: Value,
    },
    MessagesSnapshot {
        messages: Vec<ProtocolMessage>,
    },
    /// Application-defined event passed through to the client untouched.
    Custom {
        name: String,
        #[serde(default)]
        value: Value,
    },
}

fn assistant_role() -> String {
    "assistant".to_string()
}

impl AguiEventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Self::StateDelta { .. } => "STATE_DELTA",
            Self::MessagesSnapshot { .. } => "MESSAGES_SNAPSHOT",
            Self::Custom { .. } => "CUSTOM",
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunOutcome {
    #[default]
    Success,
    Error,
    Interrupt,
}

impl RunOutcome {
    /// Any casing is accepted; unknown values are treated as success.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Self::Error,
            "interrupt" => Self::Interrupt,
            _ => Self::Success,
        }
    }
}

impl<'de> Deserialize<'de> for RunOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Self::parse_lenient).unwrap_or_default())
    }
}

fn lenient_interrupt<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<InterruptInfo>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.filter(|v| !v.is_null()).map(|v| InterruptInfo::from_value(&v)))
}

/// Kind of human input an interrupt asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InterruptKind {
    Approval,
    Input,
    Choice,
    #[default]
    #[serde(other)]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptOption {
    pub value: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub multiline: bool,
}

pub const DEFAULT_INTERRUPT_TITLE: &str = "Action Required";

/// A request for human input that suspends a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: InterruptKind,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<InterruptOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_config: Option<InputConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

fn default_title() -> String {
    DEFAULT_INTERRUPT_TITLE.to_string()
}

impl InterruptInfo {
    /// A server-side interrupt with a fresh id.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            reason: Some(reason.into()),
            kind: InterruptKind::Custom,
            title: default_title(),
            message: String::new(),
            options: None,
            input_config: None,
            payload: None,
            metadata: None,
        }
    }

    /// Field-by-field parse that never fails. Missing `id` gets a fresh uuid,
    /// missing `title`/`message` get their defaults, unknown `type` is custom,
    /// missing `reason` stays absent, malformed optional fields are dropped.
    pub fn from_value(value: &Value) -> Self {
        let str_field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let typed = |key: &str| value.get(key).cloned().filter(|v| !v.is_null());

        Self {
            id: str_field("id")
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            reason: str_field("reason"),
            kind: typed("type")
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            title: str_field("title").unwrap_or_else(default_title),
            message: str_field("message").unwrap_or_default(),
            options: typed("options").and_then(|v| serde_json::from_value(v).ok()),
            input_config: typed("inputConfig").and_then(|v| serde_json::from_value(v).ok()),
            payload: typed("payload"),
            metadata: typed("metadata"),
        }
    }
}

/// Caller's answer to an interrupt, sent with the next run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeInfo {
    pub interrupt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProtocolRole {
    User,
    Assistant,
    Tool,
    System,
    /// Treated as system.
    Developer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

impl ProtocolToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: function_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A transcript message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    #[serde(default)]
    pub id: String,
    pub role: ProtocolRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ProtocolToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ProtocolMessage {
    fn with_role(role: ProtocolRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(ProtocolRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(ProtocolRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(ProtocolRole::System, content)
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::with_role(ProtocolRole::Tool, content);
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    pub fn with_tool_calls(mut self, calls: Vec<ProtocolToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Everything needed to start (or resume) a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub thread_id: String,
    pub run_id: String,
    #[serde(default)]
    pub messages: Vec<ProtocolMessage>,
    /// Tools the caller executes.
    #[serde(default)]
    pub tools: Vec<FrontendTool>,
    #[serde(default)]
    pub context: Vec<RequestContextItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeInfo>,
}

impl RunRequest {
    /// A first run on a new thread.
    pub fn new(messages: Vec<ProtocolMessage>) -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            run_id: Uuid::new_v4().to_string(),
            messages,
            tools: Vec::new(),
            context: Vec::new(),
            state: None,
            resume: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<FrontendTool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_context(mut self, context: Vec<RequestContextItem>) -> Self {
        self.context = context;
        self
    }
}
