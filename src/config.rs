use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl std::str::FromStr for ReasoningEffort {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            _ => anyhow::bail!("Invalid reasoning effort: {}", s),
        }
    }
}

/// Fallback values for everything a caller may leave out of
/// [`RenderOptions`]. One immutable record, handed to every render call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FormatDefaults {
    /// Identity line opening the Harmony system preamble.
    pub model_identity: String,
    pub knowledge_cutoff: String,
    pub reasoning_effort: ReasoningEffort,
    /// Channels the model is told it may emit on, in order.
    pub valid_channels: Vec<String>,
    /// Namespace prefixed to tool names when they are call recipients.
    pub tool_namespace: String,
    /// System line used by the Jinja renderer when tools are present but
    /// the conversation has no system message.
    pub jinja_persona: String,
}

impl Default for FormatDefaults {
    fn default() -> Self {
        Self {
            model_identity: "You are ChatGPT, a large language model trained by OpenAI."
                .to_string(),
            knowledge_cutoff: "2024-06".to_string(),
            reasoning_effort: ReasoningEffort::Medium,
            valid_channels: vec![
                "analysis".to_string(),
                "commentary".to_string(),
                "final".to_string(),
            ],
            tool_namespace: "functions".to_string(),
            jinja_persona:
                "You are Qwen, a helpful AI assistant that can interact with a computer to solve tasks."
                    .to_string(),
        }
    }
}

impl FormatDefaults {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn with_model_identity(mut self, model_identity: impl Into<String>) -> Self {
        self.model_identity = model_identity.into();
        self
    }
    pub fn with_knowledge_cutoff(mut self, knowledge_cutoff: impl Into<String>) -> Self {
        self.knowledge_cutoff = knowledge_cutoff.into();
        self
    }
    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = effort;
        self
    }
    pub fn with_valid_channels<I, T>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.valid_channels = channels.into_iter().map(|c| c.into()).collect();
        self
    }
    pub fn with_tool_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.tool_namespace = namespace.into();
        self
    }
    pub fn with_jinja_persona(mut self, persona: impl Into<String>) -> Self {
        self.jinja_persona = persona.into();
        self
    }

    /// `functions.get_weather` for `get_weather`; names already carrying
    /// the namespace are returned unchanged.
    pub fn namespaced(&self, tool_name: &str) -> String {
        let prefix = format!("{}.", self.tool_namespace);
        if tool_name.starts_with(&prefix) {
            tool_name.to_string()
        } else {
            format!("{prefix}{tool_name}")
        }
    }

    /// Inverse of [`FormatDefaults::namespaced`]; other namespaces are kept.
    pub fn strip_namespace<'a>(&self, recipient: &'a str) -> &'a str {
        recipient
            .strip_prefix(self.tool_namespace.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(recipient)
    }
}

/// Per-call rendering options. Unset fields fall back to
/// [`FormatDefaults`]; unknown keys in an options file are ignored.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RenderOptions {
    pub reasoning_effort: Option<ReasoningEffort>,
    pub knowledge_cutoff: Option<String>,
    /// Date/Time at which the conversation is taking place.
    pub current_date: Option<String>,
    pub identity: Option<String>,
    pub instructions: Option<String>,
    /// Keep `analysis` channel assistant messages in the rendered history.
    pub show_reasoning: bool,
    /// Append the assistant turn opener (Jinja only).
    pub add_generation_prompt: bool,
    /// Close a trailing assistant `final` message with `<|return|>`
    /// instead of `<|end|>` (Harmony only).
    pub terminal_final: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            reasoning_effort: None,
            knowledge_cutoff: None,
            current_date: None,
            identity: None,
            instructions: None,
            show_reasoning: false,
            add_generation_prompt: true,
            terminal_final: false,
        }
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("invalid render options")
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read render options from {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }
    pub fn with_knowledge_cutoff(mut self, knowledge_cutoff: impl Into<String>) -> Self {
        self.knowledge_cutoff = Some(knowledge_cutoff.into());
        self
    }
    pub fn with_current_date(mut self, current_date: impl Into<String>) -> Self {
        self.current_date = Some(current_date.into());
        self
    }
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
    pub fn with_show_reasoning(mut self, show: bool) -> Self {
        self.show_reasoning = show;
        self
    }
    pub fn with_generation_prompt(mut self, add: bool) -> Self {
        self.add_generation_prompt = add;
        self
    }
    pub fn with_terminal_final(mut self, terminal: bool) -> Self {
        self.terminal_final = terminal;
        self
    }

    pub(crate) fn effort(&self, defaults: &FormatDefaults) -> ReasoningEffort {
        self.reasoning_effort.unwrap_or(defaults.reasoning_effort)
    }

    pub(crate) fn identity<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.identity.as_deref().unwrap_or(fallback)
    }

    pub(crate) fn knowledge_cutoff<'a>(&'a self, defaults: &'a FormatDefaults) -> &'a str {
        self.knowledge_cutoff
            .as_deref()
            .unwrap_or(&defaults.knowledge_cutoff)
    }
}
