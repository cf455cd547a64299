use crate::{
    chat::{Message, ToolDefinition},
    config::{FormatDefaults, RenderOptions},
};
use serde::{Deserialize, Serialize};

/// Side telemetry of one render call. Not part of the prompt.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderReport {
    /// Reasoning messages left out of the rendered history.
    pub dropped_messages: usize,
    /// Rough token estimate of the prompt.
    pub approx_tokens: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Rendered {
    pub prompt: String,
    pub report: RenderReport,
}

impl Rendered {
    pub(crate) fn new(prompt: String, dropped_messages: usize) -> Self {
        let report = RenderReport {
            dropped_messages,
            approx_tokens: approx_tokens(&prompt),
        };
        Self { prompt, report }
    }
}

/// Every whitespace-separated word counts as a quarter token per char,
/// rounded up.
pub fn approx_tokens(text: &str) -> usize {
    text.split_whitespace()
        .map(|word| word.chars().count().div_ceil(4))
        .sum()
}

/// Flattens a conversation into one prompt string for a completion server.
pub trait PromptRenderer: Send + Sync {
    fn render_with_report(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &RenderOptions,
        defaults: &FormatDefaults,
    ) -> Rendered;

    fn render(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &RenderOptions,
        defaults: &FormatDefaults,
    ) -> String {
        self.render_with_report(messages, tools, options, defaults).prompt
    }
}
