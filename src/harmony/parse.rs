use super::{FormattingToken, STOP_MARKERS};
use crate::{
    chat::Role,
    config::FormatDefaults,
    intermediate::{FrameHeader, IntermediateMessage, StopMarker, UNKNOWN_TOOL},
    streaming::{trim_partial_marker, Frame, WireParser},
};

/// Parses Harmony completion text, whole or chunk by chunk.
#[derive(Clone, Debug, Default)]
pub struct HarmonyParser {
    defaults: FormatDefaults,
    preamble: String,
}

impl HarmonyParser {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_defaults(mut self, defaults: FormatDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Treats input as continuing an already-opened `<|start|>role` frame,
    /// as completions of a rendered prompt do.
    pub fn with_implicit_start(mut self, role: Role) -> Self {
        self.preamble = format!("{}{}", FormattingToken::Start, role);
        self
    }

    fn message(
        &self,
        header: &str,
        content: &str,
        stop: Option<StopMarker>,
    ) -> IntermediateMessage {
        IntermediateMessage::framed(parse_header(header), content, stop, |recipient| {
            self.defaults.strip_namespace(recipient).to_string()
        })
    }
}

impl WireParser for HarmonyParser {
    fn next_frame(&self, buffer: &str) -> Frame {
        let start = FormattingToken::Start.as_str();
        let Some(idx) = buffer.find(start) else {
            return Frame::Pending;
        };
        if idx > 0 {
            if !buffer[..idx].trim().is_empty() {
                tracing::debug!(skipped = idx, "discarding text before start marker");
            }
            return Frame::skipped(idx);
        }

        let body = &buffer[start.len()..];
        let next_start = body.find(start);
        let message_marker = FormattingToken::Message.as_str();
        let header_end = match body.find(message_marker) {
            Some(m) if next_start.map_or(true, |s| m < s) => m,
            _ => {
                return match next_start {
                    Some(s) => {
                        tracing::warn!("frame interrupted before its message marker, skipping");
                        Frame::skipped(start.len() + s)
                    }
                    None => Frame::Pending,
                };
            }
        };

        let content_offset = start.len() + header_end + message_marker.len();
        let content_area = &buffer[content_offset..];
        let next_start = content_area.find(start);
        match find_stop(content_area) {
            Some((end, stop)) if next_start.map_or(true, |s| end < s) => {
                let consumed =
                    content_offset + end + FormattingToken::for_stop(stop).as_str().len();
                let message = self.message(&body[..header_end], &content_area[..end], Some(stop));
                Frame::recognized(vec![message], consumed)
            }
            _ => match next_start {
                Some(s) => {
                    tracing::warn!("frame interrupted before its stop marker, skipping");
                    Frame::skipped(content_offset + s)
                }
                None => Frame::Pending,
            },
        }
    }

    fn flush(&self, remainder: &str) -> Vec<IntermediateMessage> {
        let start = FormattingToken::Start.as_str();
        let message_marker = FormattingToken::Message.as_str();
        let Some(body) = remainder
            .find(start)
            .map(|idx| &remainder[idx + start.len()..])
        else {
            return Vec::new();
        };
        let Some(header_end) = body.find(message_marker) else {
            return Vec::new();
        };
        let content = trim_partial_tail(&body[header_end + message_marker.len()..]);
        tracing::debug!("flushing frame without a stop marker");
        vec![self.message(&body[..header_end], content, None)]
    }

    fn preamble(&self) -> &str {
        &self.preamble
    }
}

/// Finds the earliest stop marker in `content`.
fn find_stop(content: &str) -> Option<(usize, StopMarker)> {
    STOP_MARKERS
        .iter()
        .filter_map(|stop| {
            content
                .find(FormattingToken::for_stop(*stop).as_str())
                .map(|idx| (idx, *stop))
        })
        .min_by_key(|(idx, _)| *idx)
}

/// Drops a stop or start marker cut off by the end of the stream.
fn trim_partial_tail(content: &str) -> &str {
    let [end, ret, call] = STOP_MARKERS.map(|stop| FormattingToken::for_stop(stop).as_str());
    trim_partial_marker(content, &[end, ret, call, FormattingToken::Start.as_str()])
}

/// Splits a raw header into role, channel, recipient and content type.
pub(crate) fn parse_header(raw: &str) -> FrameHeader {
    let mut header_string = raw.to_string();

    let mut channel: Option<String> = None;
    let channel_marker = FormattingToken::Channel.as_str();
    if let Some(idx) = header_string.find(channel_marker) {
        let after_marker = &header_string[idx + channel_marker.len()..];
        let channel_end = after_marker
            .find(|c: char| c.is_whitespace() || c == '<')
            .unwrap_or(after_marker.len());
        let channel_value = &after_marker[..channel_end];
        if !channel_value.is_empty() {
            channel = Some(channel_value.to_string());
        }
        let mut new_header = String::new();
        new_header.push_str(&header_string[..idx]);
        new_header.push(' ');
        new_header.push_str(&after_marker[channel_end..]);
        header_string = new_header;
    }

    // "to=foo<|constrain|>json" splits into two tokens.
    let constrain_marker = FormattingToken::ConstrainedFormat.as_str();
    if header_string.contains(constrain_marker) {
        header_string = header_string.replace(constrain_marker, &format!(" {constrain_marker}"));
    }

    let mut parts: Vec<&str> = header_string.split_ascii_whitespace().collect();

    let mut role = Role::Assistant;
    let mut name = None;
    if let Some(&first) = parts.first() {
        if !first.starts_with("to=") && !first.starts_with(constrain_marker) {
            parts.remove(0);
            match first {
                "analysis" | "commentary" | "final" => {
                    channel.get_or_insert_with(|| first.to_string());
                }
                other => match Role::try_from(other) {
                    Ok(r) => role = r,
                    Err(_) => {
                        role = Role::Tool;
                        name = Some(other.to_string());
                    }
                },
            }
        }
    }

    let mut recipient: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut awaiting_content_type = false;
    for part in parts {
        if let Some(target) = part.strip_prefix("to=") {
            recipient = Some(if target.is_empty() {
                UNKNOWN_TOOL.to_string()
            } else {
                target.to_string()
            });
        } else if let Some(ct) = part.strip_prefix(constrain_marker) {
            if ct.is_empty() {
                awaiting_content_type = true;
            } else {
                content_type = Some(ct.to_string());
            }
        } else if awaiting_content_type || recipient.is_some() {
            content_type = Some(part.to_string());
            awaiting_content_type = false;
        } else {
            recipient = Some(part.to_string());
        }
    }

    FrameHeader {
        role: Some(role),
        name,
        channel,
        recipient,
        content_type,
    }
}
