use std::path::Path;

use crate::{
    arguments,
    chat::{
        filter_reasoning, Author, Content, Conversation, Message, ParamType, Role, ToolCall,
        ToolDefinition, ToolParameter,
    },
    harmony::{HarmonyParser, HarmonyRenderer},
    intermediate::{IntermediateMessage, MessageKind, ParsedToolCall, StopMarker},
    jinja::{Block, BodyGrammar, JinjaParser, JinjaRenderer, JinjaStrategy, Pattern, Scanner},
    load_codec, load_codec_with,
    projector::project,
    render::approx_tokens,
    CodecConfig, FormatDefaults, ParseError, ParserState, PromptRenderer, ReasoningEffort,
    RenderOptions, WireFormat, WireParser,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn load_test_data(path: impl AsRef<Path>) -> String {
    // on windows, we need to replace \r\n with \n
    let cargo_manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let src_dir = cargo_manifest_dir.join("src");
    let path = src_dir.join(path);
    std::fs::read_to_string(path)
        .unwrap()
        .replace("\r\n", "\n")
        .trim_end()
        .to_string()
}

const STRATEGIES: [JinjaStrategy; 2] = [JinjaStrategy::Scanner, JinjaStrategy::Pattern];

fn harmony_render(
    messages: &[Message],
    tools: &[ToolDefinition],
    options: &RenderOptions,
) -> String {
    HarmonyRenderer::new().render(messages, tools, options, &FormatDefaults::default())
}

fn jinja_render(
    messages: &[Message],
    tools: &[ToolDefinition],
    options: &RenderOptions,
) -> String {
    JinjaRenderer::new().render(messages, tools, options, &FormatDefaults::default())
}

fn weather_tool() -> ToolDefinition {
    serde_json::from_value(json!({
        "name": "get_weather",
        "description": "Get the current weather for a city",
        "parameters": {
            "type": "object",
            "properties": {
                "location": {"type": "string", "description": "City name"}
            },
            "required": ["location"]
        }
    }))
    .unwrap()
}

/// Feeds `text` split at `split` and finishes the session.
fn stream_split<P: WireParser + ?Sized>(
    parser: &P,
    text: &str,
    split: usize,
) -> Vec<IntermediateMessage> {
    let (head, tail) = text.split_at(split);
    let state = parser.feed(parser.start(), head);
    let state = parser.feed(state, tail);
    parser.finish(state)
}

fn stream_whole<P: WireParser + ?Sized>(parser: &P, text: &str) -> Vec<IntermediateMessage> {
    parser.finish(parser.feed(parser.start(), text))
}

#[test]
fn test_harmony_parse_simple_message() {
    let parsed = HarmonyParser::new().parse("<|start|>assistant<|message|>Hello world<|end|>");
    assert_eq!(parsed.len(), 1);
    let msg = &parsed[0];
    assert_eq!(msg.role(), Role::Assistant);
    assert_eq!(msg.channel(), None);
    assert_eq!(msg.content(), "Hello world");
    assert_eq!(msg.kind(), &MessageKind::Message);
    assert_eq!(msg.stop(), Some(StopMarker::End));
}

#[test]
fn test_harmony_parse_tool_call_with_constrain() {
    let text = "<|start|>assistant<|channel|>commentary to=functions.weather<|constrain|>json<|message|>{\"location\":\"NYC\"}<|call|>";
    let parsed = HarmonyParser::new().parse(text);
    assert_eq!(parsed.len(), 1);
    let msg = &parsed[0];
    assert!(msg.kind().is_tool_call());
    assert_eq!(msg.recipient(), Some("functions.weather"));
    assert_eq!(msg.content_type(), Some("json"));
    assert_eq!(msg.channel(), Some("commentary"));
    assert_eq!(msg.content(), "{\"location\":\"NYC\"}");
    assert_eq!(
        msg.tool_calls(),
        &[ParsedToolCall::new("weather", json!({"location": "NYC"}))]
    );
}

#[test]
fn test_harmony_header_variants() {
    let parser = HarmonyParser::new();

    // channel after the content type
    let parsed = parser.parse(
        "<|start|>assistant to=functions.x<|constrain|>json<|channel|>commentary<|message|>{}<|call|>",
    );
    assert_eq!(parsed[0].channel(), Some("commentary"));
    assert_eq!(parsed[0].recipient(), Some("functions.x"));
    assert_eq!(parsed[0].content_type(), Some("json"));

    // channel names used as the role
    let parsed = parser.parse("<|start|>analysis<|message|>thinking<|end|>");
    assert_eq!(parsed[0].role(), Role::Assistant);
    assert_eq!(parsed[0].channel(), Some("analysis"));

    // an unknown role is the name of a tool
    let parsed = parser.parse(
        "<|start|>functions.lookup to=assistant<|channel|>commentary<|message|>42<|end|>",
    );
    assert_eq!(parsed[0].role(), Role::Tool);
    assert_eq!(parsed[0].name(), Some("functions.lookup"));
    assert_eq!(parsed[0].recipient(), Some("assistant"));
    assert_eq!(parsed[0].kind(), &MessageKind::ToolResult);

    // empty target
    let parsed = parser.parse("<|start|>assistant to=<|message|>{}<|call|>");
    assert_eq!(parsed[0].recipient(), Some("unknown"));
    assert_eq!(parsed[0].tool_calls()[0].name, "unknown");

    // constrain marker followed by whitespace
    let parsed = parser.parse("<|start|>assistant <|constrain|> json<|message|>{}<|end|>");
    assert_eq!(parsed[0].recipient(), None);
    assert_eq!(parsed[0].content_type(), Some("json"));
}

#[test]
fn test_harmony_kind_table() {
    let parser = HarmonyParser::new();
    let kinds: Vec<(MessageKind, Option<StopMarker>)> = parser
        .parse(concat!(
            "<|start|>assistant<|channel|>final<|message|>a<|end|>",
            "<|start|>assistant<|channel|>final<|message|>b<|return|>",
            "<|start|>assistant<|channel|>commentary<|message|>c<|call|>",
            "<|start|>assistant<|channel|>commentary to=functions.f<|message|>d<|end|>",
        ))
        .into_iter()
        .map(|m| (m.kind().clone(), m.stop()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (MessageKind::Message, Some(StopMarker::End)),
            (MessageKind::FinalResponse, Some(StopMarker::Return)),
            (
                MessageKind::ToolCall {
                    tool_calls: vec![ParsedToolCall::new("unknown", json!("c"))]
                },
                Some(StopMarker::Call)
            ),
            (
                MessageKind::ToolCall {
                    tool_calls: vec![ParsedToolCall::new("f", json!("d"))]
                },
                Some(StopMarker::End)
            ),
        ]
    );
}

#[test]
fn test_harmony_no_frames() {
    let parser = HarmonyParser::new();
    assert_eq!(
        parser.try_parse("  just text "),
        Err(ParseError::NoFramesRecognized { len: 12 })
    );
    let parsed = parser.parse("  just text ");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].role(), Role::Assistant);
    assert_eq!(parsed[0].content(), "just text");
    assert_eq!(parsed[0].kind(), &MessageKind::Message);

    assert_eq!(parser.try_parse("  \n"), Ok(Vec::new()));
    assert!(parser.parse("").is_empty());
}

#[test]
fn test_harmony_skips_malformed_frames() {
    let parser = HarmonyParser::new();
    let parsed = parser.parse("<|start|>assistant<|start|>assistant<|message|>ok<|end|>");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].content(), "ok");

    let parsed = parser.parse("junk<|start|>user<|message|>hi<|end|>");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].role(), Role::User);

    let parsed = parser.parse(
        "<|start|>assistant<|message|>cut off<|start|>assistant<|message|>next<|end|>",
    );
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].content(), "next");
}

#[test]
fn test_harmony_try_parse_ignores_unterminated_tail() {
    let parser = HarmonyParser::new();
    let text = "<|start|>user<|message|>hi<|end|><|start|>assistant<|message|>partial";
    let strict = parser.try_parse(text).unwrap();
    assert_eq!(strict.len(), 1);

    let lenient = parser.parse(text);
    assert_eq!(lenient.len(), 2);
    assert_eq!(lenient[1].content(), "partial");
    assert_eq!(lenient[1].stop(), None);

    assert_eq!(
        parser.try_parse("<|start|>assistant<|message|>partial"),
        Err(ParseError::NoFramesRecognized { len: 36 })
    );
}

#[test]
fn test_harmony_streaming_split_message() {
    let parser = HarmonyParser::new();
    let state = parser.feed(parser.start(), "<|start|>assistant<|message|>Hel");
    assert!(!state.has_ready());
    let (ready, state) = state.drain();
    assert!(ready.is_empty());

    let state = parser.feed(state, "lo<|end|>");
    assert!(state.has_ready());
    let (ready, state) = state.drain();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].content(), "Hello");
    assert_eq!(state.buffered(), "");
    assert!(parser.finish(state).is_empty());
}

#[test]
fn test_harmony_implicit_start() {
    let parser = HarmonyParser::new().with_implicit_start(Role::Assistant);
    let parsed = parser.parse("<|channel|>final<|message|>Hi there<|return|>");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].channel(), Some("final"));
    assert_eq!(parsed[0].kind(), &MessageKind::FinalResponse);

    // servers usually strip the stop token
    let state = parser.feed(parser.start(), "<|channel|>analysis<|message|>Thinking");
    let state = parser.feed(state, " hard<|e");
    assert!(!state.has_ready());
    let flushed = parser.finish(state);
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].content(), "Thinking hard");
    assert_eq!(flushed[0].channel(), Some("analysis"));
    assert_eq!(flushed[0].stop(), None);

    let parsed = parser.parse("no markers at all");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].content(), "no markers at all");
}

#[test]
fn test_harmony_streaming_equivalence() {
    let text = concat!(
        "<|start|>assistant<|channel|>analysis<|message|>Need the weather.<|end|>",
        "<|start|>assistant<|channel|>commentary to=functions.get_weather <|constrain|>json",
        "<|message|>{\"location\":\"Paris\"}<|call|>",
        "<|start|>functions.get_weather to=assistant<|channel|>commentary<|message|>{\"temp\":18}<|end|>",
        "<|start|>assistant<|channel|>final<|message|>It is 18°C in Paris.<|return|>",
    );
    let parser = HarmonyParser::new();
    let whole = stream_whole(&parser, text);
    assert_eq!(whole.len(), 4);
    assert_eq!(parser.parse(text), whole);
    for split in (0..=text.len()).filter(|i| text.is_char_boundary(*i)) {
        assert_eq!(stream_split(&parser, text, split), whole, "split at {split}");
    }

    // one character at a time, draining as we go
    let mut state = parser.start();
    let mut drained = Vec::new();
    for ch in text.chars() {
        state = parser.feed(state, &ch.to_string());
        let (ready, rest) = state.drain();
        drained.extend(ready);
        state = rest;
    }
    drained.extend(parser.finish(state));
    assert_eq!(drained, whole);
}

#[test]
fn test_parser_state_snapshot() {
    let parser = HarmonyParser::new();
    let state = parser.feed(
        parser.start(),
        "<|start|>user<|message|>one<|end|><|start|>assistant<|message|>tw",
    );
    assert_eq!(state.frames_recognized(), 1);
    assert_eq!(state.buffered(), "<|start|>assistant<|message|>tw");

    let snapshot = serde_json::to_string(&state).unwrap();
    let restored: ParserState = serde_json::from_str(&snapshot).unwrap();
    assert_eq!(restored, state);

    let a = parser.finish(parser.feed(state, "o<|end|>"));
    let b = parser.finish(parser.feed(restored, "o<|end|>"));
    assert_eq!(a, b);
    assert_eq!(a.len(), 2);
    assert_eq!(a[1].content(), "two");
}

#[test]
fn test_harmony_render_simple_convo() {
    let expected = load_test_data("../test-data/harmony_simple_convo.txt");
    let messages = [Message::from_role_and_content(Role::User, "What is 2 + 2?")];
    let prompt = harmony_render(&messages, &[], &RenderOptions::default());
    assert_eq!(prompt, expected);
}

#[test]
fn test_harmony_render_effort() {
    let messages = [Message::from_role_and_content(Role::User, "What is 2 + 2?")];
    for (effort, label) in [
        (ReasoningEffort::Low, "Reasoning: low"),
        (ReasoningEffort::Medium, "Reasoning: medium"),
        (ReasoningEffort::High, "Reasoning: high"),
    ] {
        let options = RenderOptions::new().with_reasoning_effort(effort);
        let prompt = harmony_render(&messages, &[], &options);
        assert!(prompt.contains(label), "{prompt}");
    }

    let defaults = FormatDefaults::new()
        .with_reasoning_effort(ReasoningEffort::High)
        .with_knowledge_cutoff("2025-01");
    let prompt =
        HarmonyRenderer::new().render(&messages, &[], &RenderOptions::default(), &defaults);
    assert!(prompt.contains("Reasoning: high"));
    assert!(prompt.contains("Knowledge cutoff: 2025-01"));
}

#[test]
fn test_harmony_render_tools() {
    let expected = load_test_data("../test-data/harmony_tools.txt");
    let tools: Vec<ToolDefinition> = serde_json::from_value(json!([
        {
            "name": "get_location",
            "description": "Gets the location of the user."
        },
        {
            "name": "get_current_weather",
            "description": "Gets the current weather in the provided location.",
            "parameters": {
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "The city and state, e.g. San Francisco, CA"
                    },
                    "format": {
                        "type": "string",
                        "enum": ["celsius", "fahrenheit"],
                        "default": "celsius"
                    }
                },
                "required": ["location"]
            }
        }
    ]))
    .unwrap();
    let messages = [
        Message::from_role_and_content(Role::User, "What is the weather like in SF?"),
        Message::from_role_and_content(Role::Assistant, "Need to use function get_current_weather.")
            .with_channel("analysis"),
        Message::from_tool_calls([ToolCall::new(
            "get_current_weather",
            json!({"location": "San Francisco"}),
        )]),
        Message::tool_result("get_current_weather", "{\"sunny\": true, \"temperature\": 20}"),
    ];
    let options = RenderOptions::new()
        .with_current_date("2025-06-28")
        .with_instructions("Always respond in riddles");
    let rendered = HarmonyRenderer::new().render_with_report(
        &messages,
        &tools,
        &options,
        &FormatDefaults::default(),
    );
    assert_eq!(rendered.prompt, expected);
    assert_eq!(rendered.report.dropped_messages, 1);
    assert_eq!(rendered.report.approx_tokens, approx_tokens(&expected));
}

#[test]
fn test_harmony_type_lexicon() {
    let tool = ToolDefinition::new("search", "Search things.")
        .with_parameter(
            ToolParameter::new("tags", ParamType::Array(Box::new(ParamType::String))).required(),
        )
        .with_parameter(ToolParameter::new("count", ParamType::Integer).with_default(10))
        .with_parameter(ToolParameter::new("exact", ParamType::Boolean))
        .with_parameter(ToolParameter::new("filters", ParamType::Object))
        .with_parameter(ToolParameter::new("extra", ParamType::Any))
        .with_parameter(
            ToolParameter::new("query", ParamType::String)
                .with_description("What to look for")
                .with_default("*"),
        );
    let prompt = harmony_render(&[], &[tool], &RenderOptions::default());
    let expected = "type search = (_: {
tags: string[],
count?: number, // default: 10
exact?: boolean,
filters?: any,
extra?: any,
// What to look for
query?: string, // default: \"*\"
}) => any;";
    assert!(prompt.contains(expected), "{prompt}");
}

#[test]
fn test_harmony_caller_system_message_folds_into_instructions() {
    let messages = [
        Message::from_role_and_content(Role::System, "Be terse."),
        Message::from_role_and_content(Role::Developer, "Answer in French."),
        Message::from_role_and_content(Role::User, "Hi"),
    ];
    let options = RenderOptions::new().with_instructions("Stay polite.");
    let prompt = harmony_render(&messages, &[], &options);
    assert!(prompt.contains(
        "<|start|>developer<|message|># Instructions\n\nStay polite.\n\nBe terse.\n\nAnswer in French.<|end|><|start|>user<|message|>Hi<|end|>"
    ));
    assert_eq!(prompt.matches("<|start|>system").count(), 1);
}

#[test]
fn test_harmony_terminal_final() {
    let messages = [
        Message::from_role_and_content(Role::User, "Hi"),
        Message::from_role_and_content(Role::Assistant, "Hello!"),
    ];
    let prompt = harmony_render(&messages, &[], &RenderOptions::default());
    assert!(prompt.ends_with("<|channel|>final<|message|>Hello!<|end|><|start|>assistant"));

    let options = RenderOptions::new().with_terminal_final(true);
    let prompt = harmony_render(&messages, &[], &options);
    assert!(prompt.ends_with("<|channel|>final<|message|>Hello!<|return|><|start|>assistant"));

    let parsed = HarmonyParser::new().parse(&prompt);
    let last = parsed.last().unwrap();
    assert_eq!(last.kind(), &MessageKind::FinalResponse);
    assert_eq!(last.content(), "Hello!");
}

#[test]
fn test_harmony_round_trip() {
    let messages = [
        Message::from_role_and_content(Role::User, "What's the weather in Paris?"),
        Message::from_tool_calls([ToolCall::new("get_weather", json!({"location": "Paris"}))]),
        Message::tool_result("get_weather", "{\"temp\":18}"),
        Message::from_role_and_content(Role::Assistant, "It is 18 degrees."),
    ];
    let prompt = harmony_render(&messages, &[], &RenderOptions::default());
    let parsed = HarmonyParser::new().parse(&prompt);
    assert_eq!(parsed.len(), 5);

    assert_eq!(parsed[0].role(), Role::System);
    assert_eq!(parsed[1].role(), Role::User);
    assert_eq!(parsed[1].content(), "What's the weather in Paris?");

    assert_eq!(parsed[2].role(), Role::Assistant);
    assert_eq!(parsed[2].recipient(), Some("functions.get_weather"));
    assert_eq!(
        parsed[2].tool_calls(),
        &[ParsedToolCall::new("get_weather", json!({"location": "Paris"}))]
    );

    assert_eq!(parsed[3].kind(), &MessageKind::ToolResult);
    assert_eq!(parsed[3].name(), Some("functions.get_weather"));
    assert_eq!(parsed[3].content(), "{\"temp\":18}");

    assert_eq!(parsed[4].kind(), &MessageKind::Message);
    assert_eq!(parsed[4].channel(), Some("final"));
    assert_eq!(parsed[4].content(), "It is 18 degrees.");
}

#[test]
fn test_argument_decoding_idempotent() {
    for text in [
        "{\"location\": \"NYC\", \"days\": [1, 2, 3]}",
        "[1, \"two\", null]",
        "42",
        "true",
        "\"quoted\"",
        "not json",
        "  padded  ",
        "",
        "{\"nested\": {\"a\": {\"b\": 1.5}}}",
    ] {
        let once = arguments::decode(text);
        let twice = arguments::decode(&arguments::encode(&once));
        assert_eq!(twice, once, "{text:?}");
    }
    assert_eq!(arguments::decode("  not json \n"), json!("not json"));
    assert_eq!(arguments::decode(" \n"), json!({}));
    assert_eq!(arguments::decode_parameter(" "), json!(""));
    assert_eq!(arguments::decode_parameter("\n12\n"), json!(12));
}

#[test]
fn test_named_parameters() {
    let args = json!({"units": "metric", "location": "Seattle"});
    let names: Vec<String> = arguments::named_parameters(&args)
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    assert_eq!(names, vec!["location", "units"]);

    let args = json!(["a", {"b": 1}]);
    let params = arguments::named_parameters(&args);
    assert_eq!(params[0], ("arg_0".to_string(), &json!("a")));
    assert_eq!(params[1], ("arg_1".to_string(), &json!({"b": 1})));

    assert_eq!(
        arguments::named_parameters(&json!(7)),
        vec![("arg_0".to_string(), &json!(7))]
    );
    assert!(arguments::named_parameters(&json!(null)).is_empty());

    assert_eq!(arguments::encode_parameter(&json!("  text \n")), "text");
    assert_eq!(arguments::encode_parameter(&json!({"b": [1, 2]})), "{\"b\":[1,2]}");
}

#[test]
fn test_reasoning_filter() {
    let messages = vec![
        Message::from_role_and_content(Role::User, "Hi"),
        Message::from_role_and_content(Role::Assistant, "hmm").with_channel("analysis"),
        Message::from_role_and_content(Role::Assistant, "Hello").with_channel("final"),
    ];
    let (kept, dropped) = filter_reasoning(&messages, false);
    assert_eq!(dropped, 1);
    assert_eq!(kept.len(), 2);
    assert!(kept.iter().all(|m| m.channel() != Some("analysis")));

    let (kept, dropped) = filter_reasoning(&messages, true);
    assert_eq!((kept.len(), dropped), (3, 0));

    let only_reasoning =
        vec![Message::from_role_and_content(Role::Assistant, "hmm").with_channel("analysis")];
    let (kept, dropped) = filter_reasoning(&only_reasoning, false);
    assert_eq!((kept.len(), dropped), (1, 0));

    let (kept, dropped) = filter_reasoning(&[], false);
    assert!(kept.is_empty());
    assert_eq!(dropped, 0);

    // an analysis message from the user is not reasoning
    let user_analysis =
        vec![Message::from_role_and_content(Role::User, "x").with_channel("analysis")];
    assert_eq!(filter_reasoning(&user_analysis, false).1, 0);
}

#[test]
fn test_approx_tokens() {
    assert_eq!(approx_tokens(""), 0);
    assert_eq!(approx_tokens("hello world"), 4);
    assert_eq!(approx_tokens("a bb   ccccc\n"), 4);
}

#[test]
fn test_jinja_render_tools_system_block() {
    let expected = load_test_data("../test-data/jinja_tools.txt");
    let messages = [Message::from_role_and_content(
        Role::User,
        "What's the weather in Seattle?",
    )];
    let options = RenderOptions::new().with_generation_prompt(false);
    let prompt = jinja_render(&messages, &[weather_tool()], &options);
    assert!(prompt.contains("<function>\n<name>get_weather</name>"));
    assert!(prompt
        .contains("If you choose to call a function ONLY reply in the following format with NO suffix:"));
    assert!(!prompt.ends_with("<|im_start|>assistant\n"));
    assert_eq!(prompt.trim_end(), expected);
}

#[test]
fn test_jinja_render_without_system_or_tools() {
    let messages = [Message::from_role_and_content(Role::User, "  Hi  ")];
    let prompt = jinja_render(&messages, &[], &RenderOptions::default());
    assert_eq!(prompt, "<|im_start|>user\nHi<|im_end|>\n<|im_start|>assistant\n");

    let options = RenderOptions::new().with_identity("You are a pirate.");
    let prompt = jinja_render(&messages, &[weather_tool()], &options);
    assert!(prompt.starts_with("<|im_start|>system\nYou are a pirate.\n\n# Tools"));
}

#[test]
fn test_jinja_render_conversation() {
    let expected = load_test_data("../test-data/jinja_conversation.txt");
    let messages = [
        Message::from_role_and_content(Role::System, "You are a weather bot."),
        Message::from_role_and_content(Role::User, "Weather in Seattle and Paris?"),
        Message::from_role_and_content(Role::Assistant, "Let me check.")
            .adding_tool_call(ToolCall::new(
                "get_weather",
                json!({"units": "metric", "location": "Seattle"}),
            ))
            .adding_tool_call(ToolCall::new("get_weather", json!(["Paris"]))),
        Message::tool_result("get_weather", "Rainy, 12C"),
        Message::from_role_and_content(Role::Tool, "Sunny, 20C"),
        Message::from_role_and_content(Role::Assistant, "Seattle is rainy; Paris is sunny."),
    ];
    let prompt = jinja_render(&messages, &[], &RenderOptions::default());
    assert!(prompt.ends_with("<|im_start|>assistant\n"));
    assert_eq!(prompt.trim_end(), expected);
}

#[test]
fn test_jinja_render_reasoning() {
    let messages = [
        Message::from_role_and_content(Role::User, "Hi"),
        Message::from_role_and_content(Role::Assistant, "The user greets me.")
            .with_channel("analysis"),
        Message::from_role_and_content(Role::Assistant, "Hello!"),
    ];
    let rendered = JinjaRenderer::new().render_with_report(
        &messages,
        &[],
        &RenderOptions::default(),
        &FormatDefaults::default(),
    );
    assert!(!rendered.prompt.contains("<think>"));
    assert_eq!(rendered.report.dropped_messages, 1);

    let options = RenderOptions::new().with_show_reasoning(true);
    let prompt = jinja_render(&messages, &[], &options);
    assert!(prompt.contains(
        "<|im_start|>assistant\n<think>\nThe user greets me.\n</think><|im_end|>\n"
    ));
}

#[test]
fn test_jinja_parse_tool_call() {
    let text = "<|im_start|>assistant\n<tool_call>\n<function=get_weather>\n<parameter=location>\nSeattle\n</parameter>\n</function>\n</tool_call><|im_end|>";
    for strategy in STRATEGIES {
        let parsed = JinjaParser::with_strategy(strategy).parse(text);
        assert_eq!(parsed.len(), 1, "{strategy}");
        assert!(parsed[0].kind().is_tool_call());
        assert_eq!(parsed[0].stop(), Some(StopMarker::Call));
        assert_eq!(
            parsed[0].tool_calls(),
            &[ParsedToolCall::new(
                "get_weather",
                json!({"location": "Seattle"})
            )]
        );
    }
}

#[test]
fn test_jinja_malformed_parameter_keeps_text() {
    let text = "<|im_start|>assistant\n<tool_call>\n<function=run>\n<parameter=body>\n  not json  \n</parameter>\n<parameter=count>\n3\n</parameter>\n</function>\n</tool_call><|im_end|>";
    for strategy in STRATEGIES {
        let parsed = JinjaParser::with_strategy(strategy).try_parse(text).unwrap();
        assert_eq!(
            parsed[0].tool_calls()[0].arguments,
            json!({"body": "not json", "count": 3}),
            "{strategy}"
        );
    }
}

#[test]
fn test_jinja_text_before_calls() {
    let text = "<|im_start|>assistant\nI'll look that up.\n\n<tool_call>\n<function=a>\n</function>\n</tool_call>\n<tool_call>\n<function=>\n<parameter=x>1<parameter=y>two\n</function>\n</tool_call><|im_end|>";
    for strategy in STRATEGIES {
        let parsed = JinjaParser::with_strategy(strategy).parse(text);
        assert_eq!(parsed.len(), 2, "{strategy}");
        assert_eq!(parsed[0].kind(), &MessageKind::Message);
        assert_eq!(parsed[0].content(), "I'll look that up.");
        assert_eq!(
            parsed[1].tool_calls(),
            &[
                ParsedToolCall::new("a", json!({})),
                ParsedToolCall::new("unknown", json!({"x": 1, "y": "two"})),
            ]
        );
    }
}

#[test]
fn test_jinja_bare_function_call() {
    let text = "<|im_start|>assistant\nSure.\n<function=ls>\n<parameter=path>\n/tmp\n</parameter>\n</function><|im_end|>";
    let parsed = JinjaParser::new().parse(text);
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].content(), "Sure.");
    assert_eq!(
        parsed[1].tool_calls(),
        &[ParsedToolCall::new("ls", json!({"path": "/tmp"}))]
    );
}

#[test]
fn test_jinja_think_block() {
    let text = "<|im_start|>assistant\n<think>\nThe user wants a number.\n</think>\n\n42<|im_end|>";
    for strategy in STRATEGIES {
        let parsed = JinjaParser::with_strategy(strategy).parse(text);
        assert_eq!(parsed.len(), 1, "{strategy}");
        assert_eq!(parsed[0].content(), "42");

        let parsed = JinjaParser::with_strategy(strategy)
            .with_drop_analysis(false)
            .parse(text);
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].is_reasoning());
        assert_eq!(parsed[0].content(), "The user wants a number.");
        assert_eq!(parsed[1].content(), "42");

        // reasoning alone is never dropped
        let parsed = JinjaParser::with_strategy(strategy)
            .parse("<|im_start|>assistant\n<think>only thoughts</think><|im_end|>");
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].is_reasoning());

        // the opener was part of the prompt
        let parsed = JinjaParser::with_strategy(strategy)
            .with_drop_analysis(false)
            .with_implicit_start(Role::Assistant)
            .parse("pondering</think>\n\nanswer");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].channel(), Some("analysis"));
        assert_eq!(parsed[0].content(), "pondering");
        assert_eq!(parsed[1].content(), "answer");
    }
}

#[test]
fn test_jinja_tool_responses() {
    let text = concat!(
        "<|im_start|>user\n",
        "<tool_response>\n<function=get_weather>\n{\"temp\": 12}\n</function>\n</tool_response>\n",
        "<tool_response>\nlist_files\na.txt\nb.txt\n</tool_response>\n",
        "<tool_response>\njust output\n</tool_response>\n",
        "Thanks, now summarize.<|im_end|>",
    );
    for strategy in STRATEGIES {
        let parsed = JinjaParser::with_strategy(strategy).parse(text);
        let summary: Vec<(Role, Option<&str>, &str)> = parsed
            .iter()
            .map(|m| (m.role(), m.name(), m.content()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Role::Tool, Some("get_weather"), "{\"temp\": 12}"),
                (Role::Tool, Some("list_files"), "a.txt\nb.txt"),
                (Role::Tool, Some("tool"), "just output"),
                (Role::User, None, "Thanks, now summarize."),
            ],
            "{strategy}"
        );
        assert!(parsed[..3]
            .iter()
            .all(|m| m.kind() == &MessageKind::ToolResult));
    }
}

#[test]
fn test_jinja_no_segments() {
    let parser = JinjaParser::new();
    let parsed = parser.parse("  The server dropped the turn markers.\n");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].role(), Role::Assistant);
    assert_eq!(parsed[0].content(), "The server dropped the turn markers.");
    assert!(matches!(
        parser.try_parse("plain"),
        Err(ParseError::NoFramesRecognized { len: 5 })
    ));
}

#[test]
fn test_jinja_segment_ends_at_next_turn() {
    let parsed = JinjaParser::new()
        .parse("<|im_start|>user\nfirst<|im_start|>nobody\nsecond<|im_end|>");
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0].role(), Role::User);
    assert_eq!(parsed[0].stop(), None);
    // unknown roles are read as the assistant
    assert_eq!(parsed[1].role(), Role::Assistant);
    assert_eq!(parsed[1].content(), "second");
}

#[test]
fn test_jinja_round_trip() {
    let rendered = load_test_data("../test-data/jinja_conversation.txt");
    for strategy in STRATEGIES {
        let parsed = JinjaParser::with_strategy(strategy).parse(&rendered);
        let kinds: Vec<(Role, &MessageKind)> =
            parsed.iter().map(|m| (m.role(), m.kind())).collect();
        assert_eq!(kinds.len(), 7, "{strategy}");
        assert_eq!(parsed[0].role(), Role::System);
        assert_eq!(parsed[0].content(), "You are a weather bot.");
        assert_eq!(parsed[1].content(), "Weather in Seattle and Paris?");
        assert_eq!(parsed[2].content(), "Let me check.");
        assert_eq!(
            parsed[3].tool_calls(),
            &[
                ParsedToolCall::new(
                    "get_weather",
                    json!({"location": "Seattle", "units": "metric"})
                ),
                ParsedToolCall::new("get_weather", json!({"arg_0": "Paris"})),
            ]
        );
        assert_eq!(parsed[4].name(), Some("get_weather"));
        assert_eq!(parsed[4].content(), "Rainy, 12C");
        assert_eq!(parsed[5].name(), Some("tool"));
        assert_eq!(parsed[5].content(), "Sunny, 20C");
        assert_eq!(parsed[6].content(), "Seattle is rainy; Paris is sunny.");
    }
}

#[test]
fn test_jinja_streaming_equivalence() {
    let text = load_test_data("../test-data/jinja_conversation.txt");
    for strategy in STRATEGIES {
        let parser = JinjaParser::with_strategy(strategy);
        let whole = stream_whole(&parser, &text);
        assert_eq!(whole.len(), 7);
        for split in (0..=text.len()).filter(|i| text.is_char_boundary(*i)) {
            assert_eq!(
                stream_split(&parser, &text, split),
                whole,
                "{strategy} split at {split}"
            );
        }
    }
}

#[test]
fn test_jinja_strategy_conformance() {
    let bodies = [
        "<think>a</think>b",
        "pre</think>post",
        "x<think>unterminated",
        "a</think>b<think>c</think>d",
        "<tool_call>\n<function=f>\n<parameter=a>\n1\n</parameter>\n<parameter=b>\ntwo\n<parameter=c>3</function>\n</tool_call> tail",
        "<function=noclose>\n<parameter=x>v",
        "<tool_call><function=>\n</function></tool_call>",
        "<tool_call>one</tool_call>mid<tool_call>two",
        "no tags at all",
        "<tool_response>\nget_weather\nsunny\n</tool_response>\nthanks",
        "<parameter=a>1</parameter><parameter=b>2",
        "<function=f><parameter=broken",
        "",
    ];
    let scanner = Scanner;
    let pattern = Pattern;
    for body in bodies {
        assert_eq!(
            scanner.split_reasoning(body),
            pattern.split_reasoning(body),
            "{body:?}"
        );
        for block in [Block::ToolCall, Block::ToolResponse] {
            assert_eq!(
                scanner.split_blocks(body, block),
                pattern.split_blocks(body, block),
                "{body:?}"
            );
        }
        assert_eq!(scanner.functions(body), pattern.functions(body), "{body:?}");
        assert_eq!(scanner.parameters(body), pattern.parameters(body), "{body:?}");
        for (_, inner) in scanner.functions(body) {
            assert_eq!(scanner.parameters(inner), pattern.parameters(inner));
        }
    }

    assert_eq!(
        scanner.parameters("<parameter=a>\n1\n</parameter>\n<parameter=b>\ntwo\n<parameter=c>3"),
        vec![("a", "\n1\n"), ("b", "\ntwo\n"), ("c", "3")]
    );
    assert_eq!(
        scanner.split_blocks("<tool_call>one</tool_call>mid<tool_call>two", Block::ToolCall),
        (vec!["one", "two"], "mid".to_string())
    );
}

#[test]
fn test_project_messages() {
    let defaults = FormatDefaults::default();
    let parsed = HarmonyParser::new().parse(concat!(
        "<|start|>assistant<|channel|>commentary to=functions.weather <|constrain|>json<|message|>{\"location\":\"NYC\"}<|call|>",
        "<|start|>functions.weather to=assistant<|channel|>commentary<|message|>{\"temp\": 20}<|end|>",
        "<|start|>assistant<|channel|>final<|message|>It is 20 degrees.<|return|>",
    ));
    let messages: Vec<Message> = parsed.iter().map(|m| project(m, &defaults)).collect();

    let call = &messages[0];
    assert_eq!(call.author, Author::from(Role::Assistant));
    assert!(call.content.is_empty());
    assert_eq!(
        call.tool_calls,
        vec![ToolCall::new("weather", json!({"location": "NYC"}))]
    );
    assert_eq!(call.channel(), Some("commentary"));
    assert_eq!(call.recipient(), Some("functions.weather"));
    assert_eq!(call.content_type(), Some("json"));
    assert_eq!(call.metadata.get("stop"), Some(&json!("call")));

    let result = &messages[1];
    assert_eq!(result.author, Author::new(Role::Tool, "weather"));
    assert_eq!(result.content, vec![Content::json(json!({"temp": 20}))]);

    let answer = &messages[2];
    assert_eq!(answer.role(), Role::Assistant);
    assert_eq!(answer.text(), "It is 20 degrees.");
    assert_eq!(answer.channel(), Some("final"));
    assert!(answer.tool_calls.is_empty());

    // unattributed, non-JSON result
    let parsed = JinjaParser::new()
        .parse("<|im_start|>user\n<tool_response>\nplain output\n</tool_response><|im_end|>");
    let projected = project(&parsed[0], &defaults);
    assert_eq!(projected.author, Author::new(Role::Tool, "tool"));
    assert_eq!(projected.text(), "plain output");
}

#[test]
fn test_registry() {
    assert_eq!("harmony".parse::<WireFormat>().unwrap(), WireFormat::Harmony);
    assert_eq!("jinja".parse::<WireFormat>().unwrap(), WireFormat::Jinja);
    assert!("chatml".parse::<WireFormat>().is_err());
    assert_eq!(WireFormat::Jinja.to_string(), "jinja");

    let codec = load_codec(WireFormat::Harmony).unwrap();
    assert_eq!(codec.format(), WireFormat::Harmony);
    let messages = codec.parse_messages("<|start|>assistant<|message|>hi<|end|>");
    assert_eq!(messages[0].text(), "hi");

    let config = CodecConfig::default()
        .with_jinja_strategy(JinjaStrategy::Pattern)
        .with_implicit_start(Role::Assistant);
    let codec = load_codec_with(WireFormat::Jinja, config).unwrap();
    let parsed = codec.parse("Hello there<|im_end|>");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].content(), "Hello there");

    let conversation = Conversation::from_messages([Message::from_role_and_content(
        Role::User,
        "What's the weather in Seattle?",
    )])
    .with_tools([weather_tool()]);
    let rendered = codec.render_conversation(
        &conversation,
        &RenderOptions::new().with_generation_prompt(false),
    );
    assert_eq!(
        rendered.prompt.trim_end(),
        load_test_data("../test-data/jinja_tools.txt")
    );

    let bad = CodecConfig::default()
        .with_defaults(FormatDefaults::new().with_tool_namespace(""));
    assert!(load_codec_with(WireFormat::Harmony, bad).is_err());
    let bad = CodecConfig::default()
        .with_defaults(FormatDefaults::new().with_valid_channels(["final answer"]));
    assert!(load_codec_with(WireFormat::Harmony, bad).is_err());
}

#[test]
fn test_custom_namespace() {
    let defaults = FormatDefaults::new().with_tool_namespace("tools");
    let config = CodecConfig::default().with_defaults(defaults);
    let codec = load_codec_with(WireFormat::Harmony, config).unwrap();
    let messages = [Message::from_tool_calls([ToolCall::new("ping", json!({}))])];
    let prompt = codec.render(&messages, &[], &RenderOptions::default());
    assert!(prompt.contains("to=tools.ping <|constrain|>json<|message|>{}<|call|>"));
    let parsed = codec.parse(&prompt);
    let call = parsed.iter().find(|m| m.kind().is_tool_call()).unwrap();
    assert_eq!(call.tool_calls()[0].name, "ping");
}

#[test]
fn test_render_options_from_json() {
    let options = RenderOptions::from_json_str(
        r#"{"reasoning_effort": "high", "show_reasoning": true, "temperature": 0.2}"#,
    )
    .unwrap();
    assert_eq!(options.reasoning_effort, Some(ReasoningEffort::High));
    assert!(options.show_reasoning);
    assert!(options.add_generation_prompt);
    assert!(!options.terminal_final);
    assert_eq!(options.current_date, None);

    assert!(RenderOptions::from_json_str(r#"{"reasoning_effort": "extreme"}"#).is_err());
    let err = RenderOptions::from_path("/nonexistent/options.json").unwrap_err();
    assert!(err.to_string().contains("could not read render options"));

    let config: CodecConfig = serde_json::from_value(json!({
        "jinja_strategy": "pattern",
        "implicit_start": "assistant",
        "defaults": {"tool_namespace": "tools"}
    }))
    .unwrap();
    assert_eq!(config.jinja_strategy, JinjaStrategy::Pattern);
    assert_eq!(config.implicit_start, Some(Role::Assistant));
    assert_eq!(config.defaults.tool_namespace, "tools");
    assert_eq!(config.defaults.knowledge_cutoff, "2024-06");
    assert!(config.drop_analysis);
}

#[test]
fn test_tool_definition_from_json_schema() {
    let tool = ToolDefinition::from_json_schema(
        "search",
        "Search the web",
        &json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "required": true},
                "limit": {"type": "integer", "default": 5},
                "sites": {"type": "array", "items": {"type": "string"}},
                "mode": {"enum": ["fast", "deep"]}
            },
            "required": ["limit"]
        }),
    );
    let names: Vec<(&str, bool)> = tool
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p.required))
        .collect();
    assert_eq!(
        names,
        vec![("query", true), ("limit", true), ("sites", false), ("mode", false)]
    );
    assert_eq!(
        tool.parameters[2].kind,
        ParamType::Array(Box::new(ParamType::String))
    );
    assert_eq!(tool.parameters[3].kind, ParamType::Any);
    assert_eq!(tool.parameters[1].default, Some(json!(5)));

    let round_tripped: ToolDefinition =
        serde_json::from_value(serde_json::to_value(&tool).unwrap()).unwrap();
    assert_eq!(round_tripped, tool);
}

#[test]
fn test_message_serde() {
    let message: Message = serde_json::from_value(json!({
        "role": "tool",
        "name": "get_weather",
        "content": "sunny"
    }))
    .unwrap();
    assert_eq!(message, Message::tool_result("get_weather", "sunny"));

    let message: Message = serde_json::from_value(json!({
        "role": "assistant",
        "content": null,
        "tool_calls": [{"name": "f", "arguments": {"a": 1}}]
    }))
    .unwrap();
    assert!(message.content.is_empty());
    assert_eq!(message.tool_calls, vec![ToolCall::new("f", json!({"a": 1}))]);

    let conversation: Conversation = serde_json::from_value(json!({
        "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}]
    }))
    .unwrap();
    assert_eq!(conversation.messages[0].text(), "hi");
    assert!(conversation.tools.is_empty());
}

#[test]
fn test_unframed_text_is_never_lost() {
    let parser = HarmonyParser::new();
    let text = "<|channel|>analysis<|message|>thinking about it<|end|><|start|>assistant<|channel|>fin";
    let parsed = parser.parse(text);
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].role(), Role::Assistant);
    assert_eq!(parsed[0].content(), text);
    for split in 0..=text.len() {
        assert_eq!(stream_split(&parser, text, split), parsed, "split at {split}");
    }
    assert!(parser.try_parse(text).is_err());

    // once a frame is recognized, leading junk is dropped as usual
    let parsed = parser.parse("junk<|start|>user<|message|>hi<|end|><|start|>assistant");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].content(), "hi");

    let text = "The answer is 4. <|im_start|>assistant";
    for strategy in STRATEGIES {
        let parser = JinjaParser::with_strategy(strategy);
        let parsed = parser.parse(text);
        assert_eq!(parsed.len(), 1, "{strategy}");
        assert_eq!(parsed[0].content(), text);
        for split in 0..=text.len() {
            assert_eq!(stream_split(&parser, text, split), parsed, "split at {split}");
        }
    }
}

#[test]
fn test_unframed_text_survives_snapshot() {
    let parser = HarmonyParser::new();
    let state = parser.feed(parser.start(), "Sure thing. <|start|>assistant");
    assert_eq!(state.buffered(), "<|start|>assistant");
    let restored: ParserState =
        serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
    let parsed = parser.finish(parser.feed(restored, "<|chan"));
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].content(), "Sure thing. <|start|>assistant<|chan");
}

#[test]
fn test_flush_strips_partial_markers() {
    let parser = HarmonyParser::new();
    let parsed = parser.parse("<|start|>assistant<|message|>Hi<|sta");
    assert_eq!(parsed[0].content(), "Hi");
    let parsed = HarmonyParser::new()
        .with_implicit_start(Role::Assistant)
        .parse("<|channel|>final<|message|>Hi<|cal");
    assert_eq!(parsed[0].content(), "Hi");

    for strategy in STRATEGIES {
        let parser = JinjaParser::with_strategy(strategy);
        let parsed = parser.parse("<|im_start|>assistant\nHi<|im_st");
        assert_eq!(parsed[0].content(), "Hi", "{strategy}");
        let parsed = parser.parse("<|im_start|>assistant\nHi<|im_e");
        assert_eq!(parsed[0].content(), "Hi", "{strategy}");
    }

    // a lone '<' is content
    let parsed = HarmonyParser::new().parse("<|start|>assistant<|message|>1 <");
    assert_eq!(parsed[0].content(), "1 <");
}

#[test]
fn test_one_line_tool_response_is_unnamed() {
    for strategy in STRATEGIES {
        let parsed = JinjaParser::with_strategy(strategy).parse(
            "<|im_start|>user\n<tool_response>\nlist_files a.txt\n</tool_response><|im_end|>",
        );
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name(), Some("tool"), "{strategy}");
        assert_eq!(parsed[0].content(), "list_files a.txt");
    }
}
