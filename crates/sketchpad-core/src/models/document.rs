use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Literal id the provider uses in sample payloads; never a real conversation.
pub const PLACEHOLDER_ID: &str = "hello-world";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("cannot extend the last part of an empty document")]
    NothingToExtend,

    #[error("chunk is missing its `{0}` field")]
    MissingField(&'static str),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    #[serde(default)]
    pub text: String,
}

/// A titled section of the reply. Tasks nest further parts, which is what
/// makes a document a tree rather than a flat list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeEditPart {
    #[serde(default)]
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MathPart {
    #[serde(default)]
    pub latex: String,
    #[serde(default)]
    pub display: bool,
}

/// One typed node of a reply document.
///
/// Discriminants this crate does not know are kept as `Opaque` with the
/// received JSON untouched, so newer provider payloads survive a round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(TextPart),
    Reasoning(TextPart),
    Task(TaskPart),
    CodeEdit(CodeEditPart),
    Math(MathPart),
    Opaque(Value),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum KnownPart {
    Text(TextPart),
    Reasoning(TextPart),
    Task(TaskPart),
    CodeEdit(CodeEditPart),
    Math(MathPart),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum KnownPartRef<'a> {
    Text(&'a TextPart),
    Reasoning(&'a TextPart),
    Task(&'a TaskPart),
    CodeEdit(&'a CodeEditPart),
    Math(&'a MathPart),
}

const KNOWN_PART_TYPES: [&str; 5] = ["text", "reasoning", "task", "code-edit", "math"];

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(TextPart { text: text.into() })
    }

    /// Decode a part, falling back to `Opaque` for anything that does not fit
    /// a known shape. Never fails.
    pub fn from_value(value: Value) -> Self {
        let known = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| KNOWN_PART_TYPES.contains(&t));

        if known && let Ok(part) = KnownPart::deserialize(&value) {
            return match part {
                KnownPart::Text(p) => Part::Text(p),
                KnownPart::Reasoning(p) => Part::Reasoning(p),
                KnownPart::Task(p) => Part::Task(p),
                KnownPart::CodeEdit(p) => Part::CodeEdit(p),
                KnownPart::Math(p) => Part::Math(p),
            };
        }
        Part::Opaque(value)
    }

    pub fn kind(&self) -> &str {
        match self {
            Part::Text(_) => "text",
            Part::Reasoning(_) => "reasoning",
            Part::Task(_) => "task",
            Part::CodeEdit(_) => "code-edit",
            Part::Math(_) => "math",
            Part::Opaque(value) => value.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }

    /// Merge a delta into this part in place.
    pub fn extend(&mut self, delta: Delta) {
        match self {
            Part::Text(p) | Part::Reasoning(p) => {
                if let Some(text) = delta.text {
                    p.text.push_str(&text);
                }
            }
            Part::Math(p) => {
                if let Some(text) = delta.text {
                    p.latex.push_str(&text);
                }
            }
            Part::CodeEdit(p) => {
                if let Some(text) = delta.text {
                    p.content.push_str(&text);
                }
            }
            Part::Task(task) => {
                if let Some(text) = delta.text {
                    task.summary.push_str(&text);
                }
                if let Some(status) = delta.status {
                    task.status = Some(status);
                }
                if let Some(child) = delta.part {
                    task.parts.push(*child);
                }
            }
            Part::Opaque(value) => extend_opaque(value, delta),
        }
    }

    /// Text a terminal can show for this part, children included.
    pub fn plain_text(&self) -> String {
        match self {
            Part::Text(p) | Part::Reasoning(p) => p.text.clone(),
            Part::Math(p) => p.latex.clone(),
            Part::CodeEdit(p) => p.content.clone(),
            Part::Task(task) => {
                let mut out = task.summary.clone();
                for child in &task.parts {
                    let text = child.plain_text();
                    if !text.is_empty() {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(&text);
                    }
                }
                out
            }
            Part::Opaque(value) => value
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

fn extend_opaque(value: &mut Value, delta: Delta) {
    // A bare scalar moves under `value` so the delta has fields to land in.
    if !value.is_object() {
        let previous = value.take();
        let mut wrapped = Map::new();
        if !previous.is_null() {
            wrapped.insert("value".to_string(), previous);
        }
        *value = Value::Object(wrapped);
    }
    let Some(fields) = value.as_object_mut() else {
        return;
    };

    if let Some(text) = delta.text {
        match fields.get_mut("text") {
            Some(Value::String(existing)) => existing.push_str(&text),
            _ => {
                fields.insert("text".to_string(), Value::String(text));
            }
        }
    }
    if let Some(status) = delta.status {
        fields.insert("status".to_string(), Value::String(status));
    }
    if let Some(child) = delta.part {
        let child = serde_json::to_value(&*child).unwrap_or(Value::Null);
        match fields.get_mut("parts") {
            Some(Value::Array(parts)) => parts.push(child),
            _ => {
                fields.insert("parts".to_string(), Value::Array(vec![child]));
            }
        }
    }
    for (key, extra) in delta.extra {
        fields.insert(key, extra);
    }
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Part::Text(p) => KnownPartRef::Text(p).serialize(serializer),
            Part::Reasoning(p) => KnownPartRef::Reasoning(p).serialize(serializer),
            Part::Task(p) => KnownPartRef::Task(p).serialize(serializer),
            Part::CodeEdit(p) => KnownPartRef::CodeEdit(p).serialize(serializer),
            Part::Math(p) => KnownPartRef::Math(p).serialize(serializer),
            Part::Opaque(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Part::from_value)
    }
}

/// Incremental change to the last part of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<Box<Part>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Delta {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Side-channel payload carried alongside the document (new conversation id, usage...).
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub key: String,
    pub payload: Value,
}

impl Metadata {
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }

    /// The conversation id this payload announces, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        if let Some(id) = self.payload.get("chatId").and_then(Value::as_str) {
            return Some(id).filter(|id| !id.is_empty());
        }
        let object = self.payload.get("object").and_then(Value::as_str);
        if object.is_none() || object == Some("chat") {
            return self
                .payload
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty());
        }
        None
    }
}

/// One decoded protocol unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    AppendPart(Part),
    ExtendLastPart(Delta),
    Metadata(Metadata),
}

impl Chunk {
    /// Decode a chunk object. `event` is the enclosing unit's name and stands in
    /// for a missing `type` field. Unknown discriminants become appended parts.
    pub fn from_json(mut value: Value, event: Option<&str>) -> Result<Self, DocumentError> {
        let Some(fields) = value.as_object_mut() else {
            return Err(DocumentError::InvalidChunk(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )));
        };

        let kind = fields
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| event.map(str::to_owned));

        match kind.as_deref() {
            Some("append-part") => {
                let part = fields.remove("part").ok_or(DocumentError::MissingField("part"))?;
                Ok(Chunk::AppendPart(Part::from_value(part)))
            }
            Some("extend-last-part") => {
                let delta = fields.remove("delta").ok_or(DocumentError::MissingField("delta"))?;
                let delta: Delta = serde_json::from_value(delta)
                    .map_err(|e| DocumentError::InvalidChunk(e.to_string()))?;
                Ok(Chunk::ExtendLastPart(delta))
            }
            Some("metadata") => {
                let payload = fields.remove("payload").unwrap_or(Value::Null);
                let key = fields
                    .get("key")
                    .and_then(Value::as_str)
                    .or_else(|| payload.get("object").and_then(Value::as_str))
                    .unwrap_or("metadata")
                    .to_string();
                Ok(Chunk::Metadata(Metadata { key, payload }))
            }
            _ => Ok(Chunk::AppendPart(Part::from_value(value))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// An ordered sequence of parts. While a reply streams, a document only grows:
/// parts are appended or the last one is extended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    parts: Vec<Part>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn last(&self) -> Option<&Part> {
        self.parts.last()
    }

    /// Fold one chunk into the document. Metadata leaves it unchanged.
    pub fn apply(&mut self, chunk: Chunk) -> Result<(), DocumentError> {
        match chunk {
            Chunk::AppendPart(part) => {
                self.parts.push(part);
                Ok(())
            }
            Chunk::ExtendLastPart(delta) => {
                let last = self.parts.last_mut().ok_or(DocumentError::NothingToExtend)?;
                last.extend(delta);
                Ok(())
            }
            Chunk::Metadata(_) => Ok(()),
        }
    }

    /// Search the whole tree for a provider-assigned conversation id.
    ///
    /// A `chatId` field anywhere wins over any `id` field. Within each, fields
    /// are visited in the order they arrived. The thresholds are tuned to skip
    /// short internal ids and the sample placeholder.
    pub fn find_conversation_id(&self) -> Option<String> {
        let tree = serde_json::to_value(self).ok()?;
        find_string_field(&tree, "chatId", &|id| {
            id.len() > 10 && id != PLACEHOLDER_ID
        })
        .or_else(|| {
            find_string_field(&tree, "id", &|id| {
                (id.contains('-') && id.len() > 20) || (id.len() > 15 && id != PLACEHOLDER_ID)
            })
        })
    }

    pub fn plain_text(&self) -> String {
        self.parts
            .iter()
            .map(Part::plain_text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl From<Vec<Part>> for Document {
    fn from(parts: Vec<Part>) -> Self {
        Self::from_parts(parts)
    }
}

/// Pure form of [`Document::apply`].
pub fn apply_chunk(mut document: Document, chunk: Chunk) -> Result<Document, DocumentError> {
    document.apply(chunk)?;
    Ok(document)
}

fn find_string_field(value: &Value, key: &str, accept: &dyn Fn(&str) -> bool) -> Option<String> {
    match value {
        Value::Object(fields) => {
            if let Some(Value::String(candidate)) = fields.get(key)
                && accept(candidate)
            {
                return Some(candidate.clone());
            }
            fields.values().find_map(|v| find_string_field(v, key, accept))
        }
        Value::Array(items) => items.iter().find_map(|v| find_string_field(v, key, accept)),
        _ => None,
    }
}
