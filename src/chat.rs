use core::fmt;
use rustc_hash::FxHashSet;
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize,
};
use std::collections::BTreeMap;
use std::{fmt::Display, marker::PhantomData};

/// Metadata key holding the channel a message was produced on.
pub const CHANNEL_KEY: &str = "channel";
/// Metadata key holding the recipient a message is addressed to.
pub const RECIPIENT_KEY: &str = "recipient";
/// Metadata key holding the content-type hint of a message.
pub const CONTENT_TYPE_KEY: &str = "content_type";
/// Metadata key holding the stop marker that closed a parsed frame.
pub const STOP_KEY: &str = "stop";

#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Author {
    pub role: Role,
    pub name: Option<String>,
}

impl Author {
    pub fn new(role: Role, name: impl Into<String>) -> Self {
        Self {
            role,
            name: Some(name.into()),
        }
    }
}

impl From<Role> for Author {
    fn from(role: Role) -> Self {
        Self { role, name: None }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
    Tool,
}

impl TryFrom<&str> for Role {
    type Error = &'static str;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "developer" => Ok(Role::Developer),
            "tool" => Ok(Role::Tool),
            _ => Err("Unknown role"),
        }
    }
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Developer => "developer",
            Role::Tool => "tool",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Content {
    Text(TextContent),
    /// Structured payload, typically a decoded tool result.
    Json(JsonContent),
}

impl Content {
    pub fn json(value: serde_json::Value) -> Self {
        Self::Json(JsonContent { value })
    }

    /// Text form of the part; JSON parts render compactly.
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(text) => text.text.clone(),
            Content::Json(json) => json.value.to_string(),
        }
    }
}

impl<T> From<T> for Content
where
    T: Into<String>,
{
    fn from(text: T) -> Self {
        Self::Text(TextContent { text: text.into() })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TextContent {
    pub text: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct JsonContent {
    pub value: serde_json::Value,
}

/// A tool invocation requested by the assistant.
#[serde_with::skip_serializing_none]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    /// An object representing the author of the message, including
    /// their role (e.g., user, assistant) and, for tool results, the
    /// name of the tool that produced it.
    #[serde(flatten)]
    pub author: Author,

    /// The main content of the message, as an ordered list of parts.
    #[serde(
        default,
        deserialize_with = "de_string_or_content_vec",
        serialize_with = "se_string_or_content_vec"
    )]
    pub content: Vec<Content>,

    /// Tool invocations carried by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Free-form metadata. The codecs read and write the `channel`,
    /// `recipient` and `content_type` keys; everything else is carried
    /// along untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Message {
    pub fn from_author_and_content<C>(author: Author, content: C) -> Self
    where
        C: Into<Content>,
    {
        Message {
            author,
            content: vec![content.into()],
            tool_calls: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn from_role_and_content<C>(role: Role, content: C) -> Self
    where
        C: Into<Content>,
    {
        Self::from_author_and_content(Author { role, name: None }, content)
    }

    /// An assistant message carrying only tool calls.
    pub fn from_tool_calls<I>(calls: I) -> Self
    where
        I: IntoIterator<Item = ToolCall>,
    {
        Message {
            author: Role::Assistant.into(),
            content: Vec::new(),
            tool_calls: calls.into_iter().collect(),
            metadata: BTreeMap::new(),
        }
    }

    /// A tool message reporting the result of the named tool.
    pub fn tool_result<C>(tool_name: impl Into<String>, content: C) -> Self
    where
        C: Into<Content>,
    {
        Self::from_author_and_content(Author::new(Role::Tool, tool_name), content)
    }

    pub fn adding_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }

    pub fn with_channel<S>(self, channel: S) -> Self
    where
        S: Into<String>,
    {
        self.with_metadata(CHANNEL_KEY, channel.into())
    }

    pub fn with_recipient<S>(self, recipient: S) -> Self
    where
        S: Into<String>,
    {
        self.with_metadata(RECIPIENT_KEY, recipient.into())
    }

    pub fn with_content_type<S>(self, content_type: S) -> Self
    where
        S: Into<String>,
    {
        self.with_metadata(CONTENT_TYPE_KEY, content_type.into())
    }

    pub fn with_metadata<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn role(&self) -> Role {
        self.author.role
    }

    pub fn channel(&self) -> Option<&str> {
        self.metadata_str(CHANNEL_KEY)
    }

    pub fn recipient(&self) -> Option<&str> {
        self.metadata_str(RECIPIENT_KEY)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata_str(CONTENT_TYPE_KEY)
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    /// All content parts joined into one string.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(Content::to_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn is_reasoning(&self) -> bool {
        self.author.role == Role::Assistant && self.channel() == Some("analysis")
    }
}

/// Removes hidden-reasoning messages from a history about to be rendered.
///
/// Assistant messages on the `analysis` channel are dropped unless
/// `show_reasoning` is set. Returns the kept messages and the number
/// dropped. A non-empty history is never reduced to nothing: if every
/// message would be dropped, all of them are kept instead.
pub fn filter_reasoning(messages: &[Message], show_reasoning: bool) -> (Vec<&Message>, usize) {
    if show_reasoning {
        return (messages.iter().collect(), 0);
    }
    let kept: Vec<&Message> = messages.iter().filter(|m| !m.is_reasoning()).collect();
    if kept.is_empty() && !messages.is_empty() {
        return (messages.iter().collect(), 0);
    }
    let dropped = messages.len() - kept.len();
    if dropped > 0 {
        tracing::debug!(dropped, "dropping analysis messages from rendered history");
    }
    (kept, dropped)
}

/// Parameter types understood by the renderers.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<ParamType>),
    Object,
    Any,
}

impl ParamType {
    fn from_schema(schema: &serde_json::Value) -> Self {
        match schema.get("type").and_then(|t| t.as_str()) {
            Some("string") => ParamType::String,
            Some("number") => ParamType::Number,
            Some("integer") => ParamType::Integer,
            Some("boolean") => ParamType::Boolean,
            Some("array") => ParamType::Array(Box::new(
                schema
                    .get("items")
                    .map(ParamType::from_schema)
                    .unwrap_or(ParamType::Any),
            )),
            Some("object") => ParamType::Object,
            _ => ParamType::Any,
        }
    }

    /// The JSON Schema type name, `None` for [`ParamType::Any`].
    pub fn schema_name(&self) -> Option<&'static str> {
        match self {
            ParamType::String => Some("string"),
            ParamType::Number => Some("number"),
            ParamType::Integer => Some("integer"),
            ParamType::Boolean => Some("boolean"),
            ParamType::Array(_) => Some("array"),
            ParamType::Object => Some("object"),
            ParamType::Any => None,
        }
    }

    fn to_schema(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        if let Some(name) = self.schema_name() {
            out.insert("type".into(), name.into());
        }
        if let ParamType::Array(items) = self {
            out.insert("items".into(), items.to_schema());
        }
        serde_json::Value::Object(out)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ParamType,
    pub description: Option<String>,
    pub enum_values: Vec<serde_json::Value>,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            enum_values: Vec::new(),
            required: false,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_enum<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<serde_json::Value>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, default: impl Into<serde_json::Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A function the model may call.
///
/// Deserializes from an OpenAI-style function definition whose
/// `parameters` field is a JSON Schema object.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        default,
        deserialize_with = "de_parameter_schema",
        serialize_with = "se_parameter_schema"
    )]
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Builds a definition from a JSON Schema `object` describing the
    /// parameters. Properties keep their document order.
    pub fn from_json_schema(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: &serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: parameters_from_schema(schema),
        }
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ToolParameter> {
        self.parameters.iter().filter(|p| p.required)
    }
}

fn parameters_from_schema(schema: &serde_json::Value) -> Vec<ToolParameter> {
    let required: FxHashSet<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Vec::new();
    };
    props
        .iter()
        .map(|(key, val)| ToolParameter {
            name: key.clone(),
            kind: ParamType::from_schema(val),
            description: val
                .get("description")
                .and_then(|d| d.as_str())
                .map(str::to_string),
            enum_values: val
                .get("enum")
                .and_then(|e| e.as_array())
                .cloned()
                .unwrap_or_default(),
            required: required.contains(key.as_str())
                || val.get("required").and_then(|r| r.as_bool()) == Some(true),
            default: val.get("default").cloned(),
        })
        .collect()
}

fn schema_from_parameters(parameters: &[ToolParameter]) -> serde_json::Value {
    let mut properties = serde_json::Map::new();
    for param in parameters {
        let mut schema = param.kind.to_schema();
        if let Some(obj) = schema.as_object_mut() {
            if let Some(desc) = &param.description {
                obj.insert("description".into(), desc.clone().into());
            }
            if !param.enum_values.is_empty() {
                obj.insert("enum".into(), param.enum_values.clone().into());
            }
            if let Some(default) = &param.default {
                obj.insert("default".into(), default.clone());
            }
        }
        properties.insert(param.name.clone(), schema);
    }
    let required: Vec<&str> = parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| p.name.as_str())
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn de_parameter_schema<'de, D>(deserializer: D) -> Result<Vec<ToolParameter>, D::Error>
where
    D: Deserializer<'de>,
{
    let schema = serde_json::Value::deserialize(deserializer)?;
    Ok(parameters_from_schema(&schema))
}

fn se_parameter_schema<S>(value: &[ToolParameter], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    schema_from_parameters(value).serialize(serializer)
}

/// A conversation as handed to a renderer: ordered messages plus the
/// tools the model may call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Conversation {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl Conversation {
    pub fn from_messages<I>(messages: I) -> Self
    where
        I: IntoIterator<Item = Message>,
    {
        Self {
            messages: messages.into_iter().collect(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools<I>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = ToolDefinition>,
    {
        self.tools.extend(tools);
        self
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

fn de_string_or_content_vec<'de, D>(deserializer: D) -> Result<Vec<Content>, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrContentVec(PhantomData<fn() -> Vec<Content>>);

    impl<'de> Visitor<'de> for StringOrContentVec {
        type Value = Vec<Content>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string, null or list of content")
        }

        fn visit_str<E>(self, value: &str) -> Result<Vec<Content>, E>
        where
            E: de::Error,
        {
            Ok(vec![Content::Text(TextContent {
                text: value.to_owned(),
            })])
        }

        fn visit_unit<E>(self) -> Result<Vec<Content>, E>
        where
            E: de::Error,
        {
            Ok(Vec::new())
        }

        fn visit_seq<A>(self, seq: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            Deserialize::deserialize(de::value::SeqAccessDeserializer::new(seq))
        }
    }

    deserializer.deserialize_any(StringOrContentVec(PhantomData))
}

fn se_string_or_content_vec<S>(value: &Vec<Content>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if value.len() == 1 {
        if let Content::Text(TextContent { text }) = &value[0] {
            return serializer.serialize_str(text);
        }
    }
    value.serialize(serializer)
}
