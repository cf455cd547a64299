use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{
    chat::{Conversation, Message, Role, ToolDefinition},
    config::{FormatDefaults, RenderOptions},
    harmony::{HarmonyParser, HarmonyRenderer},
    intermediate::IntermediateMessage,
    jinja::{JinjaParser, JinjaRenderer, JinjaStrategy},
    projector,
    render::{PromptRenderer, Rendered},
    streaming::{ParseError, ParserState, WireParser},
};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    Harmony,
    Jinja,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                WireFormat::Harmony => "harmony",
                WireFormat::Jinja => "jinja",
            }
        )
    }
}

impl std::str::FromStr for WireFormat {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "harmony" => Ok(WireFormat::Harmony),
            "jinja" => Ok(WireFormat::Jinja),
            _ => anyhow::bail!("Invalid WireFormat: {}", s),
        }
    }
}

impl std::fmt::Debug for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

/// How a [`Codec`] is put together.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CodecConfig {
    pub defaults: FormatDefaults,
    /// Body grammar of the Jinja parser; ignored for Harmony.
    pub jinja_strategy: JinjaStrategy,
    /// Parse input as the continuation of an opened turn for this role.
    pub implicit_start: Option<Role>,
    /// Drop reasoning from one-shot Jinja parses.
    pub drop_analysis: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            defaults: FormatDefaults::default(),
            jinja_strategy: JinjaStrategy::default(),
            implicit_start: None,
            drop_analysis: true,
        }
    }
}

impl CodecConfig {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not read codec config from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid codec config in {}", path.display()))
    }

    pub fn with_defaults(mut self, defaults: FormatDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_jinja_strategy(mut self, strategy: JinjaStrategy) -> Self {
        self.jinja_strategy = strategy;
        self
    }

    pub fn with_implicit_start(mut self, role: Role) -> Self {
        self.implicit_start = Some(role);
        self
    }

    pub fn with_drop_analysis(mut self, drop_analysis: bool) -> Self {
        self.drop_analysis = drop_analysis;
        self
    }

    fn validate(&self) -> anyhow::Result<()> {
        let namespace = &self.defaults.tool_namespace;
        anyhow::ensure!(!namespace.is_empty(), "tool namespace must not be empty");
        anyhow::ensure!(
            !namespace.contains(|c: char| c.is_whitespace() || c == '<' || c == '.'),
            "tool namespace {namespace:?} must be a single bare identifier"
        );
        for channel in &self.defaults.valid_channels {
            anyhow::ensure!(
                !channel.is_empty() && !channel.contains(|c: char| c.is_whitespace() || c == '<'),
                "invalid channel name {channel:?}"
            );
        }
        Ok(())
    }
}

/// A renderer and a parser for one wire format, sharing one defaults record.
pub struct Codec {
    format: WireFormat,
    defaults: FormatDefaults,
    renderer: Box<dyn PromptRenderer>,
    parser: Box<dyn WireParser + Send + Sync>,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("format", &self.format)
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Codec({})", self.format)
    }
}

impl Codec {
    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn defaults(&self) -> &FormatDefaults {
        &self.defaults
    }

    pub fn parser(&self) -> &dyn WireParser {
        self.parser.as_ref()
    }

    pub fn render(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &RenderOptions,
    ) -> String {
        self.renderer.render(messages, tools, options, &self.defaults)
    }

    pub fn render_with_report(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &RenderOptions,
    ) -> Rendered {
        self.renderer
            .render_with_report(messages, tools, options, &self.defaults)
    }

    pub fn render_conversation(
        &self,
        conversation: &Conversation,
        options: &RenderOptions,
    ) -> Rendered {
        self.render_with_report(&conversation.messages, &conversation.tools, options)
    }

    pub fn parse(&self, text: &str) -> Vec<IntermediateMessage> {
        self.parser.parse(text)
    }

    pub fn try_parse(&self, text: &str) -> Result<Vec<IntermediateMessage>, ParseError> {
        self.parser.try_parse(text)
    }

    pub fn start(&self) -> ParserState {
        self.parser.start()
    }

    pub fn feed(&self, state: ParserState, chunk: &str) -> ParserState {
        self.parser.feed(state, chunk)
    }

    pub fn finish(&self, state: ParserState) -> Vec<IntermediateMessage> {
        self.parser.finish(state)
    }

    /// Parses a complete response straight into conversation messages.
    pub fn parse_messages(&self, text: &str) -> Vec<Message> {
        self.project(&self.parse(text))
    }

    pub fn project(&self, messages: &[IntermediateMessage]) -> Vec<Message> {
        projector::project_all(messages, &self.defaults)
    }
}

pub fn load_codec(format: WireFormat) -> anyhow::Result<Codec> {
    load_codec_with(format, CodecConfig::default())
}

pub fn load_codec_with(format: WireFormat, config: CodecConfig) -> anyhow::Result<Codec> {
    config
        .validate()
        .with_context(|| format!("invalid configuration for {format} codec"))?;
    let CodecConfig {
        defaults,
        jinja_strategy,
        implicit_start,
        drop_analysis,
    } = config;
    let (renderer, parser): (Box<dyn PromptRenderer>, Box<dyn WireParser + Send + Sync>) =
        match format {
            WireFormat::Harmony => {
                let mut parser = HarmonyParser::new().with_defaults(defaults.clone());
                if let Some(role) = implicit_start {
                    parser = parser.with_implicit_start(role);
                }
                (Box::new(HarmonyRenderer::new()), Box::new(parser))
            }
            WireFormat::Jinja => {
                let mut parser =
                    JinjaParser::with_strategy(jinja_strategy).with_drop_analysis(drop_analysis);
                if let Some(role) = implicit_start {
                    parser = parser.with_implicit_start(role);
                }
                (Box::new(JinjaRenderer::new()), Box::new(parser))
            }
        };
    tracing::debug!(%format, "loaded codec");
    Ok(Codec {
        format,
        defaults,
        renderer,
        parser,
    })
}
