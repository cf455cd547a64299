//! The tag-delimited chat format produced by the Qwen3-Coder Jinja template.
//!
//! Turns are `<|im_start|>role\n…<|im_end|>\n`. Tool calls are XML-ish
//! `<tool_call><function=NAME><parameter=KEY>value</parameter></function></tool_call>`
//! blocks inside an assistant turn, and tool output travels back to the
//! model as `<tool_response>` blocks inside a synthetic user turn.

mod parse;
mod pattern;
mod render;
mod scanner;

pub use parse::JinjaParser;
pub use pattern::Pattern;
pub use render::JinjaRenderer;
pub use scanner::Scanner;

use serde::{Deserialize, Serialize};

pub(crate) const TURN_START: &str = "<|im_start|>";
pub(crate) const TURN_END: &str = "<|im_end|>";
pub(crate) const THINK_OPEN: &str = "<think>";
pub(crate) const THINK_CLOSE: &str = "</think>";
pub(crate) const FUNCTION_OPEN: &str = "<function=";
pub(crate) const FUNCTION_CLOSE: &str = "</function>";
pub(crate) const PARAMETER_OPEN: &str = "<parameter=";
pub(crate) const PARAMETER_CLOSE: &str = "</parameter>";

/// Block tags that wrap a run of content inside a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
    ToolCall,
    ToolResponse,
}

impl Block {
    pub fn open(&self) -> &'static str {
        match self {
            Block::ToolCall => "<tool_call>",
            Block::ToolResponse => "<tool_response>",
        }
    }

    pub fn close(&self) -> &'static str {
        match self {
            Block::ToolCall => "</tool_call>",
            Block::ToolResponse => "</tool_response>",
        }
    }
}

/// The lexical layer of the turn-body grammar.
///
/// Implementations only locate tags; decoding what they find is shared, so
/// every implementation must return the same pieces for the same input.
/// An unterminated block, function or parameter runs to the end of its
/// enclosing text.
pub trait BodyGrammar: std::fmt::Debug + Send + Sync {
    /// Splits off the first reasoning block. A closing `</think>` with no
    /// opener before it closes reasoning that began at the start of the
    /// content. Returns the reasoning and the remaining text.
    fn split_reasoning<'a>(&self, content: &'a str) -> (Option<&'a str>, String);

    /// Inner texts of every `block` and the text outside all of them.
    fn split_blocks<'a>(&self, content: &'a str, block: Block) -> (Vec<&'a str>, String);

    /// `(name, body)` of every `<function=NAME>` in a block.
    fn functions<'a>(&self, block: &'a str) -> Vec<(&'a str, &'a str)>;

    /// `(name, raw value)` of every `<parameter=NAME>` in a function body.
    /// A value ends at `</parameter>`, at the next `<parameter=`, or at the
    /// end of the body.
    fn parameters<'a>(&self, body: &'a str) -> Vec<(&'a str, &'a str)>;
}

/// Which [`BodyGrammar`] a Jinja parser uses.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JinjaStrategy {
    /// Hand-rolled `str::find` scanner.
    #[default]
    Scanner,
    /// Regular-expression grammar.
    Pattern,
}

impl JinjaStrategy {
    pub fn grammar(&self) -> Box<dyn BodyGrammar> {
        match self {
            JinjaStrategy::Scanner => Box::new(Scanner),
            JinjaStrategy::Pattern => Box::new(Pattern),
        }
    }
}

impl std::fmt::Display for JinjaStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JinjaStrategy::Scanner => "scanner",
            JinjaStrategy::Pattern => "pattern",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JinjaStrategy {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scanner" => Ok(JinjaStrategy::Scanner),
            "pattern" => Ok(JinjaStrategy::Pattern),
            _ => anyhow::bail!("Unknown jinja strategy: {}", s),
        }
    }
}
