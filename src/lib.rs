#![doc = include_str!("../README.md")]

pub mod arguments;
pub mod chat;
pub mod config;
pub mod harmony;
pub mod intermediate;
pub mod jinja;
pub mod projector;
mod registry;
pub mod render;
pub mod streaming;

pub use config::{FormatDefaults, ReasoningEffort, RenderOptions};
pub use intermediate::{IntermediateMessage, MessageKind, ParsedToolCall, StopMarker};
pub use registry::{load_codec, load_codec_with, Codec, CodecConfig, WireFormat};
pub use render::{PromptRenderer, RenderReport, Rendered};
pub use streaming::{ParseError, ParserState, WireParser};

#[cfg(test)]
pub mod tests;
