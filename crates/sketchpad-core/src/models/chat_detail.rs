use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::document::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Who can see a chat on the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    Public,
    Private,
    Team,
    TeamEdit,
    Unlisted,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Team => "team",
            Visibility::TeamEdit => "team-edit",
            Visibility::Unlisted => "unlisted",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "team" => Ok(Visibility::Team),
            "team-edit" => Ok(Visibility::TeamEdit),
            "unlisted" => Ok(Visibility::Unlisted),
            other => Err(format!(
                "unknown visibility `{other}` (expected public, private, team, team-edit or unlisted)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental_content: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reply body of a stored message: the structured form when the provider
/// sent one, otherwise the plain text.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Document(Document),
    Text(String),
}

impl MessageContent {
    pub fn plain_text(&self) -> String {
        match self {
            MessageContent::Document(doc) => doc.plain_text(),
            MessageContent::Text(text) => text.clone(),
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            MessageContent::Document(doc) => Some(doc),
            MessageContent::Text(_) => None,
        }
    }
}

impl StoredMessage {
    pub fn content(&self) -> MessageContent {
        match &self.experimental_content {
            Some(value @ Value::Array(_)) => match serde_json::from_value::<Document>(value.clone()) {
                Ok(doc) => MessageContent::Document(doc),
                Err(_) => MessageContent::Text(self.content.clone()),
            },
            _ => MessageContent::Text(self.content.clone()),
        }
    }
}

/// The provider's canonical chat record. Unmodelled fields ride along in
/// `extra` so the record relays without loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetail {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<LatestVersion>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatDetail {
    /// Preview location: the latest version's demo URL, else the legacy `demo` field.
    pub fn demo_url(&self) -> Option<&str> {
        self.latest_version
            .as_ref()
            .and_then(|v| v.demo_url.as_deref())
            .or(self.demo.as_deref())
            .filter(|url| !url.is_empty())
    }

    /// Address of the chat on the provider's own site.
    pub fn web_url(&self) -> Option<&str> {
        self.web_url.as_deref().or(self.url.as_deref())
    }
}
