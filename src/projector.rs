//! Maps parsed records onto the conversation model.

use crate::{
    chat::{
        Author, Content, Message, Role, ToolCall, CHANNEL_KEY, CONTENT_TYPE_KEY, RECIPIENT_KEY,
        STOP_KEY,
    },
    config::FormatDefaults,
    intermediate::{IntermediateMessage, MessageKind, UNNAMED_TOOL_RESULT},
};

/// Converts one parsed record into a [`Message`].
///
/// Channel, recipient, content type and stop marker are kept as metadata so
/// callers can filter on them later.
pub fn project(message: &IntermediateMessage, defaults: &FormatDefaults) -> Message {
    let projected = match message.kind() {
        MessageKind::Message => Message::from_author_and_content(
            Author {
                role: message.role(),
                name: message.name().map(str::to_string),
            },
            message.content(),
        ),
        MessageKind::FinalResponse => {
            Message::from_role_and_content(Role::Assistant, message.content())
        }
        MessageKind::ToolCall { tool_calls } => Message::from_tool_calls(
            tool_calls
                .iter()
                .map(|call| ToolCall::new(call.name.clone(), call.arguments.clone())),
        ),
        MessageKind::ToolResult => {
            let name = message
                .name()
                .map(|n| defaults.strip_namespace(n))
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(UNNAMED_TOOL_RESULT);
            Message::tool_result(name, result_content(message.content()))
        }
    };
    with_frame_metadata(projected, message)
}

/// Projects every record in order.
pub fn project_all(messages: &[IntermediateMessage], defaults: &FormatDefaults) -> Vec<Message> {
    messages.iter().map(|m| project(m, defaults)).collect()
}

fn result_content(content: &str) -> Content {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) => Content::json(value),
        Err(_) => Content::from(content),
    }
}

fn with_frame_metadata(mut message: Message, source: &IntermediateMessage) -> Message {
    if let Some(channel) = source.channel() {
        message = message.with_metadata(CHANNEL_KEY, channel);
    }
    if let Some(recipient) = source.recipient() {
        message = message.with_metadata(RECIPIENT_KEY, recipient);
    }
    if let Some(content_type) = source.content_type() {
        message = message.with_metadata(CONTENT_TYPE_KEY, content_type);
    }
    if let Some(stop) = source.stop() {
        message = message.with_metadata(STOP_KEY, stop.as_str());
    }
    message
}
