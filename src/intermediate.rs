use crate::{arguments, chat::Role};
use serde::{Deserialize, Serialize};

/// Tool name used when a call names no target.
pub const UNKNOWN_TOOL: &str = "unknown";
/// Tool name used when a tool result cannot be attributed.
pub const UNNAMED_TOOL_RESULT: &str = "tool";

/// The marker that closed a frame.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StopMarker {
    /// Ordinary end of message.
    End,
    /// End of the assistant's turn; sampling is done.
    Return,
    /// The assistant handed control to a tool.
    Call,
}

impl StopMarker {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopMarker::End => "end",
            StopMarker::Return => "return",
            StopMarker::Call => "call",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ParsedToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        let name = name.into();
        let name = if name.trim().is_empty() {
            UNKNOWN_TOOL.to_string()
        } else {
            name.trim().to_string()
        };
        Self { name, arguments }
    }
}

/// What a parsed message is. Derived from the frame, never chosen freely.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MessageKind {
    Message,
    ToolCall { tool_calls: Vec<ParsedToolCall> },
    ToolResult,
    FinalResponse,
}

impl MessageKind {
    pub fn is_tool_call(&self) -> bool {
        matches!(self, MessageKind::ToolCall { .. })
    }
}

/// Header fields of a frame, as recognized by a parser.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct FrameHeader {
    pub role: Option<Role>,
    pub name: Option<String>,
    pub channel: Option<String>,
    pub recipient: Option<String>,
    pub content_type: Option<String>,
}

impl FrameHeader {
    pub fn for_role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Default::default()
        }
    }
}

/// A message recovered from completion text.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct IntermediateMessage {
    role: Role,
    name: Option<String>,
    channel: Option<String>,
    recipient: Option<String>,
    content_type: Option<String>,
    content: String,
    stop: Option<StopMarker>,
    #[serde(flatten)]
    kind: MessageKind,
}

impl IntermediateMessage {
    /// Builds a message from a closed (or flushed) frame.
    ///
    /// A frame that derives to a tool call carries exactly one call,
    /// addressed by the recipient and decoded from the content.
    /// `strip_namespace` maps the recipient to the call name.
    pub(crate) fn framed<F>(
        header: FrameHeader,
        content: &str,
        stop: Option<StopMarker>,
        strip_namespace: F,
    ) -> Self
    where
        F: Fn(&str) -> String,
    {
        let role = header.role.unwrap_or(Role::Assistant);
        let content = content.trim();
        let kind = match derive_kind(role, header.recipient.as_deref(), stop) {
            Derived::Message => MessageKind::Message,
            Derived::ToolResult => MessageKind::ToolResult,
            Derived::FinalResponse => MessageKind::FinalResponse,
            Derived::ToolCall => {
                let name = header
                    .recipient
                    .as_deref()
                    .map(&strip_namespace)
                    .unwrap_or_else(|| UNKNOWN_TOOL.to_string());
                let arguments =
                    arguments::decode_with_hint(content, header.content_type.as_deref());
                MessageKind::ToolCall {
                    tool_calls: vec![ParsedToolCall::new(name, arguments)],
                }
            }
        };
        Self {
            role,
            name: header.name,
            channel: header.channel,
            recipient: header.recipient,
            content_type: header.content_type,
            content: content.to_string(),
            stop,
            kind,
        }
    }

    /// Builds an assistant message for one or more already-decoded calls.
    /// Such messages are closed by a call marker by construction.
    pub(crate) fn calls(content: &str, tool_calls: Vec<ParsedToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            name: None,
            channel: None,
            recipient: None,
            content_type: None,
            content: content.trim().to_string(),
            stop: Some(StopMarker::Call),
            kind: MessageKind::ToolCall { tool_calls },
        }
    }

    /// The stand-in returned when no frame could be recognized at all.
    pub(crate) fn fallback(raw: &str) -> Self {
        Self::framed(
            FrameHeader::for_role(Role::Assistant),
            raw,
            None,
            str::to_string,
        )
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn stop(&self) -> Option<StopMarker> {
        self.stop
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// The decoded calls; empty unless this is a tool call.
    pub fn tool_calls(&self) -> &[ParsedToolCall] {
        match &self.kind {
            MessageKind::ToolCall { tool_calls } => tool_calls,
            MessageKind::Message | MessageKind::ToolResult | MessageKind::FinalResponse => &[],
        }
    }

    pub fn is_reasoning(&self) -> bool {
        self.role == Role::Assistant && self.channel.as_deref() == Some("analysis")
    }
}

enum Derived {
    Message,
    ToolCall,
    ToolResult,
    FinalResponse,
}

// Tool-authored frames are results whatever their header says; otherwise
// the stop marker and recipient decide.
fn derive_kind(role: Role, recipient: Option<&str>, stop: Option<StopMarker>) -> Derived {
    if role == Role::Tool {
        return Derived::ToolResult;
    }
    match (stop, recipient) {
        (Some(StopMarker::Call), _) | (_, Some(_)) => Derived::ToolCall,
        (Some(StopMarker::Return), None) => Derived::FinalResponse,
        (Some(StopMarker::End), None) | (None, None) => Derived::Message,
    }
}

/// Removes reasoning messages unless that would leave nothing.
pub fn drop_analysis(messages: Vec<IntermediateMessage>) -> Vec<IntermediateMessage> {
    if messages.iter().all(IntermediateMessage::is_reasoning) {
        return messages;
    }
    messages.into_iter().filter(|m| !m.is_reasoning()).collect()
}
