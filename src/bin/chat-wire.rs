use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chat_wire::{
    chat::{Conversation, Role},
    jinja::JinjaStrategy,
    load_codec_with, CodecConfig, IntermediateMessage, RenderOptions, WireFormat,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Wire format (harmony or jinja)
    #[arg(short, long, default_value = "harmony", global = true)]
    format: WireFormat,

    /// Codec configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a conversation (JSON with `messages` and `tools`) into a prompt
    Render {
        /// Conversation file; stdin when omitted
        input: Option<PathBuf>,

        /// Render options file (JSON)
        #[arg(short, long)]
        options: Option<PathBuf>,

        /// Print the prompt together with the render report as JSON
        #[arg(long)]
        report: bool,
    },
    /// Parse completion text into messages
    Parse {
        /// Completion text file; stdin when omitted
        input: Option<PathBuf>,

        /// Feed the text in chunks of this many characters
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Treat the text as continuing an opened assistant turn
        #[arg(long)]
        implicit_start: bool,

        /// Jinja body grammar (scanner or pattern)
        #[arg(long)]
        strategy: Option<JinjaStrategy>,

        /// Fail instead of degrading when no frame is recognized
        #[arg(long)]
        strict: bool,

        /// Print conversation messages instead of parsed records
        #[arg(long)]
        project: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "chat_wire=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => CodecConfig::from_path(path)?,
        None => CodecConfig::default(),
    };

    match cli.command {
        Command::Render {
            input,
            options,
            report,
        } => {
            let codec = load_codec_with(cli.format, config)?;
            let conversation: Conversation = serde_json::from_str(&read_input(input.as_deref())?)
                .context("invalid conversation JSON")?;
            let options = match options {
                Some(path) => RenderOptions::from_path(path)?,
                None => RenderOptions::default(),
            };
            let rendered = codec.render_conversation(&conversation, &options);
            tracing::info!(
                format = %codec.format(),
                dropped = rendered.report.dropped_messages,
                approx_tokens = rendered.report.approx_tokens,
                "rendered prompt"
            );
            if report {
                println!("{}", serde_json::to_string_pretty(&rendered)?);
            } else {
                print!("{}", rendered.prompt);
            }
        }
        Command::Parse {
            input,
            chunk_size,
            implicit_start,
            strategy,
            strict,
            project,
        } => {
            if implicit_start {
                config = config.with_implicit_start(Role::Assistant);
            }
            if let Some(strategy) = strategy {
                config = config.with_jinja_strategy(strategy);
            }
            let codec = load_codec_with(cli.format, config)?;
            let text = read_input(input.as_deref())?;

            let messages: Vec<IntermediateMessage> = match chunk_size {
                Some(size) => {
                    anyhow::ensure!(size > 0, "chunk size must be positive");
                    let chars: Vec<char> = text.chars().collect();
                    let mut state = codec.start();
                    let mut out = Vec::new();
                    for chunk in chars.chunks(size) {
                        state = codec.feed(state, &chunk.iter().collect::<String>());
                        if state.has_ready() {
                            let (ready, rest) = state.drain();
                            tracing::info!(count = ready.len(), "messages completed");
                            out.extend(ready);
                            state = rest;
                        }
                    }
                    out.extend(codec.finish(state));
                    out
                }
                None if strict => codec.try_parse(&text)?,
                None => codec.parse(&text),
            };

            if project {
                let projected = codec.project(&messages);
                println!("{}", serde_json::to_string_pretty(&projected)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            }
        }
    }
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("could not read stdin")?;
            Ok(buf)
        }
    }
}
