use super::FormattingToken;
use crate::{
    arguments,
    chat::{filter_reasoning, Message, ParamType, Role, ToolDefinition, ToolParameter},
    config::{FormatDefaults, RenderOptions},
    intermediate::{StopMarker, UNNAMED_TOOL_RESULT},
    render::{PromptRenderer, Rendered},
};

/// Renders conversations as Harmony prompts.
///
/// The prompt opens with a system frame (identity, dates, reasoning
/// effort, valid channels), then a developer frame when there are
/// instructions or tools, then one frame per message and per tool call,
/// and always ends with the completion opener `<|start|>assistant`.
#[derive(Clone, Copy, Debug, Default)]
pub struct HarmonyRenderer;

#[derive(Clone, Copy)]
struct RenderContext<'a> {
    defaults: &'a FormatDefaults,
    /// Whether the message being rendered is the last one of the history
    /// and the caller asked for a terminal final answer.
    terminal: bool,
}

trait Render<T: ?Sized> {
    fn render(&self, item: &T, into: &mut String, cx: &RenderContext<'_>);
}

impl HarmonyRenderer {
    pub fn new() -> Self {
        Self
    }

    fn system_preamble(
        &self,
        options: &RenderOptions,
        defaults: &FormatDefaults,
        has_tools: bool,
    ) -> String {
        let mut sections = Vec::<String>::new();

        let mut top_section = Vec::<String>::new();
        top_section.push(options.identity(&defaults.model_identity).to_string());
        top_section.push(format!(
            "Knowledge cutoff: {}",
            options.knowledge_cutoff(defaults)
        ));
        if let Some(current_date) = &options.current_date {
            top_section.push(format!("Current date: {current_date}"));
        }
        sections.push(top_section.join("\n"));

        sections.push(format!("Reasoning: {}", options.effort(defaults).as_str()));

        if !defaults.valid_channels.is_empty() {
            let mut channels_header = format!(
                "# Valid channels: {}. Channel must be included for every message.",
                defaults.valid_channels.join(", ")
            );
            if has_tools {
                channels_header.push('\n');
                channels_header.push_str(&format!(
                    "Calls to these tools must go to the commentary channel: '{}'.",
                    defaults.tool_namespace
                ));
            }
            sections.push(channels_header);
        }
        sections.join("\n\n")
    }

    fn developer_preamble(
        &self,
        instructions: &[String],
        tools: &[ToolDefinition],
        cx: &RenderContext<'_>,
    ) -> Option<String> {
        let mut sections = Vec::<String>::new();
        if !instructions.is_empty() {
            sections.push("# Instructions".to_string());
            sections.push(instructions.join("\n\n"));
        }
        if !tools.is_empty() {
            let mut tools_section = String::new();
            Render::<[ToolDefinition]>::render(self, tools, &mut tools_section, cx);
            sections.push(tools_section);
        }
        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}

impl PromptRenderer for HarmonyRenderer {
    fn render_with_report(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &RenderOptions,
        defaults: &FormatDefaults,
    ) -> Rendered {
        let (kept, dropped) = filter_reasoning(messages, options.show_reasoning);

        // System and developer messages from the caller are folded into the
        // developer instructions rather than replayed as turns.
        let mut instructions: Vec<String> = options
            .instructions
            .iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        let mut history = Vec::with_capacity(kept.len());
        for message in kept {
            match message.role() {
                Role::System | Role::Developer => {
                    let text = message.text();
                    if !text.trim().is_empty() {
                        instructions.push(text.trim().to_string());
                    }
                }
                Role::User | Role::Assistant | Role::Tool => history.push(message),
            }
        }

        let cx = RenderContext {
            defaults,
            terminal: false,
        };
        let mut prompt = String::new();
        push_frame(
            &mut prompt,
            Role::System.as_str(),
            &self.system_preamble(options, defaults, !tools.is_empty()),
            StopMarker::End,
        );
        if let Some(developer) = self.developer_preamble(&instructions, tools, &cx) {
            push_frame(
                &mut prompt,
                Role::Developer.as_str(),
                &developer,
                StopMarker::End,
            );
        }

        let last = history.len().saturating_sub(1);
        for (idx, message) in history.into_iter().enumerate() {
            let cx = RenderContext {
                terminal: options.terminal_final && idx == last,
                ..cx
            };
            Render::<Message>::render(self, message, &mut prompt, &cx);
        }

        prompt.push_str(FormattingToken::Start.as_str());
        prompt.push_str(Role::Assistant.as_str());

        tracing::debug!(
            dropped,
            bytes = prompt.len(),
            tools = tools.len(),
            "rendered harmony prompt"
        );
        Rendered::new(prompt, dropped)
    }
}

impl Render<Message> for HarmonyRenderer {
    fn render(&self, message: &Message, into: &mut String, cx: &RenderContext<'_>) {
        let text = message.text();
        match message.role() {
            Role::System | Role::Developer => {}
            Role::User => push_frame(into, Role::User.as_str(), &text, StopMarker::End),
            Role::Tool => {
                let name = message
                    .author
                    .name
                    .as_deref()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or(UNNAMED_TOOL_RESULT);
                let header = format!(
                    "{} to={}{}commentary",
                    cx.defaults.namespaced(name),
                    Role::Assistant,
                    FormattingToken::Channel
                );
                push_frame(into, &header, &text, StopMarker::End);
            }
            Role::Assistant => {
                if !text.trim().is_empty() || message.tool_calls.is_empty() {
                    let channel = message.channel().unwrap_or("final");
                    let recipient = message.recipient();
                    let stop = if recipient.is_some() {
                        StopMarker::Call
                    } else if cx.terminal && channel == "final" && message.tool_calls.is_empty()
                    {
                        StopMarker::Return
                    } else {
                        StopMarker::End
                    };
                    let header = header(
                        Role::Assistant.as_str(),
                        Some(channel),
                        recipient,
                        message.content_type(),
                    );
                    push_frame(into, &header, &text, stop);
                }
                for call in &message.tool_calls {
                    let recipient = cx.defaults.namespaced(&call.name);
                    let header = header(
                        Role::Assistant.as_str(),
                        Some("commentary"),
                        Some(&recipient),
                        Some("json"),
                    );
                    push_frame(
                        into,
                        &header,
                        &arguments::encode(&call.arguments),
                        StopMarker::Call,
                    );
                }
            }
        }
    }
}

impl Render<[ToolDefinition]> for HarmonyRenderer {
    fn render(&self, tools: &[ToolDefinition], into: &mut String, cx: &RenderContext<'_>) {
        let namespace = &cx.defaults.tool_namespace;
        let mut tool_section_content = Vec::<String>::new();
        tool_section_content.push(format!("## {namespace}\n"));
        tool_section_content.push(format!("namespace {namespace} {{\n"));
        for tool in tools {
            let mut signature = String::new();
            Render::<ToolDefinition>::render(self, tool, &mut signature, cx);
            tool_section_content.push(signature);
        }
        tool_section_content.push(format!("}} // namespace {namespace}"));

        into.push_str("# Tools\n\n");
        into.push_str(&tool_section_content.join("\n"));
    }
}

impl Render<ToolDefinition> for HarmonyRenderer {
    fn render(&self, tool: &ToolDefinition, into: &mut String, _cx: &RenderContext<'_>) {
        for line in tool.description.lines() {
            into.push_str(&format!("// {line}\n"));
        }
        if tool.parameters.is_empty() {
            into.push_str(&format!("type {} = () => any;\n", tool.name));
        } else {
            into.push_str(&format!(
                "type {} = (_: {}) => any;\n",
                tool.name,
                parameters_to_typescript(&tool.parameters)
            ));
        }
    }
}

fn header(
    role: &str,
    channel: Option<&str>,
    recipient: Option<&str>,
    content_type: Option<&str>,
) -> String {
    let mut out = role.to_string();
    if let Some(channel) = channel {
        out.push_str(FormattingToken::Channel.as_str());
        out.push_str(channel);
    }
    if let Some(recipient) = recipient {
        out.push_str(&format!(" to={recipient}"));
    }
    if let Some(content_type) = content_type {
        let marker = FormattingToken::ConstrainedFormat.as_str();
        let content_type = content_type.strip_prefix(marker).unwrap_or(content_type);
        out.push_str(&format!(" {marker}{content_type}"));
    }
    out
}

fn push_frame(into: &mut String, header: &str, content: &str, stop: StopMarker) {
    into.push_str(FormattingToken::Start.as_str());
    into.push_str(header);
    into.push_str(FormattingToken::Message.as_str());
    into.push_str(content.trim());
    into.push_str(FormattingToken::for_stop(stop).as_str());
}

fn parameters_to_typescript(parameters: &[ToolParameter]) -> String {
    let mut out = String::from("{\n");
    for param in parameters {
        if let Some(desc) = &param.description {
            for line in desc.lines() {
                out.push_str(&format!("// {line}\n"));
            }
        }
        out.push_str(&format!(
            "{}{}: {},",
            param.name,
            if param.required { "" } else { "?" },
            parameter_type(param)
        ));
        if let Some(default) = &param.default {
            match default {
                serde_json::Value::String(s) if param.enum_values.is_empty() => {
                    out.push_str(&format!(" // default: \"{s}\""))
                }
                serde_json::Value::String(s) => out.push_str(&format!(" // default: {s}")),
                other => out.push_str(&format!(" // default: {other}")),
            }
        }
        out.push('\n');
    }
    out.push('}');
    out
}

fn parameter_type(param: &ToolParameter) -> String {
    if !param.enum_values.is_empty() {
        return param
            .enum_values
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => format!("\"{s}\""),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" | ");
    }
    type_name(&param.kind)
}

fn type_name(kind: &ParamType) -> String {
    match kind {
        ParamType::String => "string".to_string(),
        ParamType::Number | ParamType::Integer => "number".to_string(),
        ParamType::Boolean => "boolean".to_string(),
        ParamType::Array(items) => format!("{}[]", type_name(items)),
        ParamType::Object | ParamType::Any => "any".to_string(),
    }
}
