//! The Harmony special-token protocol used by the gpt-oss model family.
//!
//! Every message is one frame:
//! `<|start|>header<|message|>content<|end|>`, where the header carries the
//! role and optionally a channel, a recipient and a content type, and the
//! stop marker says why the frame ended (`<|end|>`, `<|return|>` or
//! `<|call|>`).

mod parse;
mod render;

pub use parse::HarmonyParser;
pub use render::HarmonyRenderer;

use crate::intermediate::StopMarker;

/// The markers that delimit Harmony frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum FormattingToken {
    Start,
    Message,
    EndMessage,
    EndMessageDoneSampling,
    EndMessageAssistantToTool,
    ConstrainedFormat,
    Channel,
}

impl FormattingToken {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            FormattingToken::Start => "<|start|>",
            FormattingToken::Message => "<|message|>",
            FormattingToken::EndMessage => "<|end|>",
            FormattingToken::EndMessageDoneSampling => "<|return|>",
            FormattingToken::EndMessageAssistantToTool => "<|call|>",
            FormattingToken::ConstrainedFormat => "<|constrain|>",
            FormattingToken::Channel => "<|channel|>",
        }
    }

    pub(crate) fn for_stop(stop: StopMarker) -> Self {
        match stop {
            StopMarker::End => FormattingToken::EndMessage,
            StopMarker::Return => FormattingToken::EndMessageDoneSampling,
            StopMarker::Call => FormattingToken::EndMessageAssistantToTool,
        }
    }
}

impl std::fmt::Display for FormattingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stop markers in the order they are looked for.
pub(crate) const STOP_MARKERS: [StopMarker; 3] =
    [StopMarker::End, StopMarker::Return, StopMarker::Call];
