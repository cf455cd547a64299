use super::{Block, BodyGrammar, JinjaStrategy, FUNCTION_OPEN, TURN_END, TURN_START};
use crate::{
    arguments,
    chat::Role,
    intermediate::{
        drop_analysis, FrameHeader, IntermediateMessage, ParsedToolCall, StopMarker,
        UNNAMED_TOOL_RESULT,
    },
    streaming::{trim_partial_marker, Frame, WireParser},
};

/// Parses Jinja-template completion text, whole or chunk by chunk.
///
/// Each `<|im_start|>` opens a segment that runs to `<|im_end|>` or to the
/// next `<|im_start|>`. The first line of a segment names the role; the
/// body is decoded with the configured [`BodyGrammar`].
#[derive(Debug)]
pub struct JinjaParser {
    grammar: Box<dyn BodyGrammar>,
    preamble: String,
    drop_analysis: bool,
}

impl Default for JinjaParser {
    fn default() -> Self {
        Self::with_strategy(JinjaStrategy::default())
    }
}

impl JinjaParser {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_strategy(strategy: JinjaStrategy) -> Self {
        Self::with_grammar(strategy.grammar())
    }

    pub fn with_grammar(grammar: Box<dyn BodyGrammar>) -> Self {
        Self {
            grammar,
            preamble: String::new(),
            drop_analysis: true,
        }
    }

    /// Treats input as continuing an already-opened turn for `role`.
    pub fn with_implicit_start(mut self, role: Role) -> Self {
        self.preamble = format!("{TURN_START}{role}\n");
        self
    }

    /// Whether one-shot parses drop `<think>` reasoning (default `true`).
    /// Reasoning is never dropped if it is all there is.
    pub fn with_drop_analysis(mut self, drop_analysis: bool) -> Self {
        self.drop_analysis = drop_analysis;
        self
    }

    fn segment(&self, segment: &str, stop: Option<StopMarker>) -> Vec<IntermediateMessage> {
        let (role_line, content) = segment.split_once('\n').unwrap_or((segment, ""));
        let role = match Role::try_from(role_line.trim()) {
            Ok(role) => role,
            Err(_) => {
                tracing::debug!(role = role_line.trim(), "unknown turn role, assuming assistant");
                Role::Assistant
            }
        };
        match role {
            Role::Assistant => self.assistant(content, stop),
            Role::User => self.user(content, stop),
            Role::System | Role::Developer | Role::Tool => {
                if content.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![plain(FrameHeader::for_role(role), content, stop)]
                }
            }
        }
    }

    fn assistant(&self, content: &str, stop: Option<StopMarker>) -> Vec<IntermediateMessage> {
        let mut out = Vec::new();
        let (reasoning, rest) = self.grammar.split_reasoning(content);
        if let Some(reasoning) = reasoning.filter(|r| !r.trim().is_empty()) {
            let header = FrameHeader {
                channel: Some("analysis".to_string()),
                ..FrameHeader::for_role(Role::Assistant)
            };
            out.push(plain(header, reasoning, stop));
        }

        let (mut blocks, mut text) = self.grammar.split_blocks(&rest, Block::ToolCall);
        // Some servers drop the <tool_call> wrapper around bare functions.
        if blocks.is_empty() {
            if let Some(idx) = rest.find(FUNCTION_OPEN) {
                blocks.push(&rest[idx..]);
                text = rest[..idx].to_string();
            }
        }

        if !text.trim().is_empty() {
            out.push(plain(FrameHeader::for_role(Role::Assistant), &text, stop));
        }

        let calls: Vec<ParsedToolCall> = blocks
            .iter()
            .flat_map(|block| self.grammar.functions(*block))
            .map(|(name, body)| {
                let mut args = serde_json::Map::new();
                for (key, raw) in self.grammar.parameters(body) {
                    args.insert(key.trim().to_string(), arguments::decode_parameter(raw));
                }
                ParsedToolCall::new(name, serde_json::Value::Object(args))
            })
            .collect();
        if !calls.is_empty() {
            let raw: Vec<&str> = blocks.iter().map(|b| b.trim()).collect();
            out.push(IntermediateMessage::calls(&raw.join("\n"), calls));
        } else if !blocks.is_empty() {
            tracing::warn!("tool call block without a function, ignoring");
        }
        out
    }

    fn user(&self, content: &str, stop: Option<StopMarker>) -> Vec<IntermediateMessage> {
        let (blocks, text) = self.grammar.split_blocks(content, Block::ToolResponse);
        let mut out: Vec<IntermediateMessage> = blocks
            .into_iter()
            .map(|block| {
                let (name, body) = self.tool_response(block);
                let header = FrameHeader {
                    name: Some(name.to_string()),
                    ..FrameHeader::for_role(Role::Tool)
                };
                plain(header, body, stop)
            })
            .collect();
        if !text.trim().is_empty() {
            out.push(plain(FrameHeader::for_role(Role::User), &text, stop));
        }
        out
    }

    /// Names a tool response from its `<function=NAME>` tag, or from a first
    /// line that is a lone identifier followed by more lines.
    fn tool_response<'a>(&self, block: &'a str) -> (&'a str, &'a str) {
        if let Some((name, body)) = self.grammar.functions(block).into_iter().next() {
            if !name.trim().is_empty() {
                return (name.trim(), body);
            }
        }
        let trimmed = block.trim();
        // A one-line body is all output; its first word is not a tool name.
        if let Some((first, rest)) = trimmed.split_once('\n') {
            let first = first.trim();
            if is_identifier(first) && !rest.trim().is_empty() {
                return (first, rest);
            }
        }
        (UNNAMED_TOOL_RESULT, block)
    }
}

fn is_identifier(line: &str) -> bool {
    let mut chars = line.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn plain(header: FrameHeader, content: &str, stop: Option<StopMarker>) -> IntermediateMessage {
    IntermediateMessage::framed(header, content, stop, str::to_string)
}

impl WireParser for JinjaParser {
    fn next_frame(&self, buffer: &str) -> Frame {
        let Some(idx) = buffer.find(TURN_START) else {
            return Frame::Pending;
        };
        if idx > 0 {
            if !buffer[..idx].trim().is_empty() {
                tracing::debug!(skipped = idx, "discarding text before turn start");
            }
            return Frame::skipped(idx);
        }

        let body = &buffer[TURN_START.len()..];
        let end = body.find(TURN_END);
        let next = body.find(TURN_START);
        match (end, next) {
            (Some(e), n) if n.map_or(true, |n| e < n) => {
                let messages = self.segment(&body[..e], Some(StopMarker::End));
                Frame::recognized(messages, TURN_START.len() + e + TURN_END.len())
            }
            (_, Some(n)) => {
                let messages = self.segment(&body[..n], None);
                Frame::recognized(messages, TURN_START.len() + n)
            }
            _ => Frame::Pending,
        }
    }

    fn flush(&self, remainder: &str) -> Vec<IntermediateMessage> {
        let Some(idx) = remainder.find(TURN_START) else {
            return Vec::new();
        };
        let segment = &remainder[idx + TURN_START.len()..];
        if !segment.contains('\n') {
            return Vec::new();
        }
        let segment = trim_partial_marker(segment, &[TURN_END, TURN_START]);
        tracing::debug!("flushing unterminated turn");
        self.segment(segment, None)
    }

    fn preamble(&self) -> &str {
        &self.preamble
    }

    fn post_process(&self, messages: Vec<IntermediateMessage>) -> Vec<IntermediateMessage> {
        if self.drop_analysis {
            drop_analysis(messages)
        } else {
            messages
        }
    }
}
