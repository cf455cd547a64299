use super::{Block, BodyGrammar};
use std::sync::LazyLock;

static THINK_CLOSED_ONLY: LazyLock<fancy_regex::Regex> =
    LazyLock::new(|| fancy(r"(?s)\A((?:(?!<think>).)*?)</think>"));
static THINK: LazyLock<regex::Regex> =
    LazyLock::new(|| plain(r"(?s)<think>(.*?)(?:</think>|\z)"));
static TOOL_CALL: LazyLock<regex::Regex> =
    LazyLock::new(|| plain(r"(?s)<tool_call>(.*?)(?:</tool_call>|\z)"));
static TOOL_RESPONSE: LazyLock<regex::Regex> =
    LazyLock::new(|| plain(r"(?s)<tool_response>(.*?)(?:</tool_response>|\z)"));
static FUNCTION: LazyLock<regex::Regex> =
    LazyLock::new(|| plain(r"(?s)<function=([^>]*)>(.*?)(?:</function>|\z)"));
static PARAMETER: LazyLock<fancy_regex::Regex> = LazyLock::new(|| {
    fancy(r"(?s)<parameter=([^>]*)>(.*?)(?:</parameter>|(?=<parameter=)|\z)")
});

// The patterns are fixed strings; failing to compile one is a programming error.
fn plain(pattern: &str) -> regex::Regex {
    regex::Regex::new(pattern).expect("invalid body grammar pattern")
}

fn fancy(pattern: &str) -> fancy_regex::Regex {
    fancy_regex::Regex::new(pattern).expect("invalid body grammar pattern")
}

/// Finds tags with a regular-expression grammar.
#[derive(Clone, Copy, Debug, Default)]
pub struct Pattern;

impl BodyGrammar for Pattern {
    fn split_reasoning<'a>(&self, content: &'a str) -> (Option<&'a str>, String) {
        match THINK_CLOSED_ONLY.captures(content) {
            Ok(Some(caps)) => {
                if let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) {
                    return (Some(inner.as_str()), content[whole.end()..].to_string());
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "reasoning pattern failed"),
        }
        let Some(caps) = THINK.captures(content) else {
            return (None, content.to_string());
        };
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            return (None, content.to_string());
        };
        let mut rest = content[..whole.start()].to_string();
        rest.push_str(&content[whole.end()..]);
        (Some(inner.as_str()), rest)
    }

    fn split_blocks<'a>(&self, content: &'a str, block: Block) -> (Vec<&'a str>, String) {
        let re = match block {
            Block::ToolCall => &*TOOL_CALL,
            Block::ToolResponse => &*TOOL_RESPONSE,
        };
        let mut blocks = Vec::new();
        let mut outside = String::new();
        let mut cursor = 0;
        for caps in re.captures_iter(content) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            outside.push_str(&content[cursor..whole.start()]);
            blocks.push(inner.as_str());
            cursor = whole.end();
        }
        outside.push_str(&content[cursor..]);
        (blocks, outside)
    }

    fn functions<'a>(&self, block: &'a str) -> Vec<(&'a str, &'a str)> {
        FUNCTION
            .captures_iter(block)
            .filter_map(|caps| Some((caps.get(1)?.as_str(), caps.get(2)?.as_str())))
            .collect()
    }

    fn parameters<'a>(&self, body: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut params = Vec::new();
        for caps in PARAMETER.captures_iter(body) {
            match caps {
                Ok(caps) => {
                    if let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) {
                        params.push((name.as_str(), value.as_str()));
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "parameter pattern failed");
                    break;
                }
            }
        }
        params
    }
}
