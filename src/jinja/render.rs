use super::{
    Block, FUNCTION_CLOSE, FUNCTION_OPEN, PARAMETER_CLOSE, PARAMETER_OPEN, THINK_CLOSE,
    THINK_OPEN, TURN_END, TURN_START,
};
use crate::{
    arguments,
    chat::{filter_reasoning, Message, Role, ToolCall, ToolDefinition},
    config::{FormatDefaults, RenderOptions},
    render::{PromptRenderer, Rendered},
};

const TOOLS_HEADER: &str = "# Tools\n\nYou have access to the following functions:\n\n<tools>";
const TOOLS_FOOTER: &str = "</tools>

If you choose to call a function ONLY reply in the following format with NO suffix:

<tool_call>
<function=example_function_name>
<parameter=example_parameter_1>
value_1
</parameter>
<parameter=example_parameter_2>
This is the value for the second parameter
that can span
multiple lines
</parameter>
</function>
</tool_call>

<IMPORTANT>
Reminder:
- Function calls MUST follow the specified format: an inner <function=...></function> block must be nested within <tool_call></tool_call> XML tags
- Required parameters MUST be specified
- You may provide optional reasoning for your function call in natural language BEFORE the function call, but NOT after
- If there is no function call available, answer the question like normal with your current knowledge and do not tell the user about function calls
</IMPORTANT>";

/// Renders conversations the way the Qwen3-Coder chat template does.
#[derive(Clone, Copy, Debug, Default)]
pub struct JinjaRenderer;

impl JinjaRenderer {
    pub fn new() -> Self {
        Self
    }

    fn system_turn(
        &self,
        system: Option<&Message>,
        tools: &[ToolDefinition],
        options: &RenderOptions,
        defaults: &FormatDefaults,
        into: &mut String,
    ) {
        let mut sections = Vec::<String>::new();
        if let Some(system) = system {
            sections.push(system.text().trim().to_string());
        } else if !tools.is_empty() {
            sections.push(options.identity(&defaults.jinja_persona).to_string());
        }
        if let Some(instructions) = options.instructions.as_deref().map(str::trim) {
            if !instructions.is_empty() {
                sections.push(instructions.to_string());
            }
        }
        if !tools.is_empty() {
            sections.push(tools_section(tools));
        }
        sections.retain(|s| !s.is_empty());
        if sections.is_empty() {
            return;
        }
        push_turn(into, Role::System.as_str(), &sections.join("\n\n"));
    }
}

impl PromptRenderer for JinjaRenderer {
    fn render_with_report(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        options: &RenderOptions,
        defaults: &FormatDefaults,
    ) -> Rendered {
        let (kept, dropped) = filter_reasoning(messages, options.show_reasoning);

        let system_idx = kept.iter().position(|m| m.role() == Role::System);
        let mut prompt = String::new();
        self.system_turn(
            system_idx.map(|idx| kept[idx]),
            tools,
            options,
            defaults,
            &mut prompt,
        );

        let mut idx = 0;
        while idx < kept.len() {
            if Some(idx) == system_idx {
                idx += 1;
                continue;
            }
            let message = kept[idx];
            match message.role() {
                Role::System | Role::Developer => {
                    push_turn(&mut prompt, Role::System.as_str(), &message.text());
                }
                Role::User => push_turn(&mut prompt, Role::User.as_str(), &message.text()),
                Role::Assistant => {
                    push_turn(&mut prompt, Role::Assistant.as_str(), &assistant_body(message))
                }
                Role::Tool => {
                    // Consecutive tool results share one synthetic user turn.
                    prompt.push_str(TURN_START);
                    prompt.push_str(Role::User.as_str());
                    prompt.push('\n');
                    while idx < kept.len() && kept[idx].role() == Role::Tool {
                        push_tool_response(&mut prompt, kept[idx]);
                        idx += 1;
                    }
                    prompt.push_str(TURN_END);
                    prompt.push('\n');
                    continue;
                }
            }
            idx += 1;
        }

        if options.add_generation_prompt {
            prompt.push_str(TURN_START);
            prompt.push_str(Role::Assistant.as_str());
            prompt.push('\n');
        }

        tracing::debug!(
            dropped,
            bytes = prompt.len(),
            tools = tools.len(),
            "rendered jinja prompt"
        );
        Rendered::new(prompt, dropped)
    }
}

fn push_turn(into: &mut String, role: &str, content: &str) {
    into.push_str(TURN_START);
    into.push_str(role);
    into.push('\n');
    into.push_str(content.trim());
    into.push_str(TURN_END);
    into.push('\n');
}

fn push_tool_response(into: &mut String, message: &Message) {
    into.push_str(Block::ToolResponse.open());
    into.push('\n');
    let text = message.text();
    match message.author.name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => {
            into.push_str(&format!(
                "{FUNCTION_OPEN}{name}>\n{}\n{FUNCTION_CLOSE}",
                text.trim()
            ));
        }
        None => into.push_str(text.trim()),
    }
    into.push('\n');
    into.push_str(Block::ToolResponse.close());
    into.push('\n');
}

fn assistant_body(message: &Message) -> String {
    let text = message.text();
    let mut body = if message.is_reasoning() {
        format!("{THINK_OPEN}\n{}\n{THINK_CLOSE}", text.trim())
    } else {
        text.trim().to_string()
    };
    for (i, call) in message.tool_calls.iter().enumerate() {
        if !body.is_empty() {
            body.push_str(if i == 0 { "\n\n" } else { "\n" });
        }
        body.push_str(&call_block(call));
    }
    body
}

fn call_block(call: &ToolCall) -> String {
    let mut out = String::new();
    out.push_str(Block::ToolCall.open());
    out.push('\n');
    out.push_str(&format!("{FUNCTION_OPEN}{}>\n", call.name));
    for (name, value) in arguments::named_parameters(&call.arguments) {
        out.push_str(&format!(
            "{PARAMETER_OPEN}{name}>\n{}\n{PARAMETER_CLOSE}\n",
            arguments::encode_parameter(value)
        ));
    }
    out.push_str(FUNCTION_CLOSE);
    out.push('\n');
    out.push_str(Block::ToolCall.close());
    out
}

fn tools_section(tools: &[ToolDefinition]) -> String {
    let mut out = String::from(TOOLS_HEADER);
    for tool in tools {
        out.push_str("\n<function>");
        out.push_str(&format!("\n<name>{}</name>", tool.name));
        if !tool.description.trim().is_empty() {
            out.push_str(&format!(
                "\n<description>{}</description>",
                tool.description.trim()
            ));
        }
        out.push_str("\n<parameters>");
        for param in &tool.parameters {
            out.push_str("\n<parameter>");
            out.push_str(&format!("\n<name>{}</name>", param.name));
            if let Some(kind) = param.kind.schema_name() {
                out.push_str(&format!("\n<type>{kind}</type>"));
            }
            if let Some(desc) = param.description.as_deref().map(str::trim) {
                if !desc.is_empty() {
                    out.push_str(&format!("\n<description>{desc}</description>"));
                }
            }
            if !param.enum_values.is_empty() {
                let values = serde_json::Value::Array(param.enum_values.clone());
                out.push_str(&format!("\n<enum>{values}</enum>"));
            }
            out.push_str("\n</parameter>");
        }
        let required: Vec<&str> = tool.required_parameters().map(|p| p.name.as_str()).collect();
        if !required.is_empty() {
            out.push_str(&format!(
                "\n<required>{}</required>",
                serde_json::Value::from(required)
            ));
        }
        out.push_str("\n</parameters>");
        out.push_str("\n</function>");
    }
    out.push('\n');
    out.push_str(TOOLS_FOOTER);
    out
}
