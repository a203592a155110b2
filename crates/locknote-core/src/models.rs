use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    #[default]
    Text,
    Checklist,
}

impl NoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteType::Text => "text",
            NoteType::Checklist => "checklist",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "text" => Some(NoteType::Text),
            "checklist" => Some(NoteType::Checklist),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    pub checked: bool,
}

impl ChecklistItem {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            checked: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NoteBody {
    Text(String),
    Checklist(Vec<ChecklistItem>),
}

impl Default for NoteBody {
    fn default() -> Self {
        NoteBody::Text(String::new())
    }
}

impl NoteBody {
    pub fn note_type(&self) -> NoteType {
        match self {
            NoteBody::Text(_) => NoteType::Text,
            NoteBody::Checklist(_) => NoteType::Checklist,
        }
    }

    /// Text used for search matching. Checklist items are joined by newlines.
    pub fn content(&self) -> String {
        match self {
            NoteBody::Text(text) => text.clone(),
            NoteBody::Checklist(items) => items
                .iter()
                .map(|item| item.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Serialized form of the body as it gets encrypted into `encrypted_content`.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        match self {
            NoteBody::Text(text) => Ok(text.clone()),
            NoteBody::Checklist(items) => serde_json::to_string(items),
        }
    }

    pub fn from_payload(note_type: NoteType, payload: &str) -> Result<Self, serde_json::Error> {
        match note_type {
            NoteType::Text => Ok(NoteBody::Text(payload.to_string())),
            NoteType::Checklist => Ok(NoteBody::Checklist(serde_json::from_str(payload)?)),
        }
    }

    pub fn cleared(&self) -> Self {
        match self {
            NoteBody::Text(_) => NoteBody::Text(String::new()),
            NoteBody::Checklist(_) => NoteBody::Checklist(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            NoteBody::Text(text) => text.is_empty(),
            NoteBody::Checklist(items) => items.is_empty(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub body: NoteBody,
    pub timestamp: i64,
    pub pinned: bool,
    pub archived: bool,
    pub private: bool,
    pub encrypted: bool,
    pub encrypted_title: Option<String>,
    pub encrypted_content: Option<String>,
    pub image_uri: Option<String>,
    pub audio_path: Option<String>,
}

impl Note {
    pub fn text(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: NoteBody::Text(content.into()),
            timestamp: now_millis(),
            ..Self::default()
        }
    }

    pub fn checklist(title: impl Into<String>, items: Vec<ChecklistItem>) -> Self {
        Self {
            title: title.into(),
            body: NoteBody::Checklist(items),
            timestamp: now_millis(),
            ..Self::default()
        }
    }

    pub fn is_new(&self) -> bool {
        self.id == 0
    }

    pub fn note_type(&self) -> NoteType {
        self.body.note_type()
    }

    pub fn content(&self) -> String {
        self.body.content()
    }

    /// Drops every trace of encryption, keeping the current title and body as truth.
    pub fn into_plaintext(self) -> Self {
        Self {
            encrypted: false,
            encrypted_title: None,
            encrypted_content: None,
            ..self
        }
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.title.to_lowercase().contains(&needle)
            || self.content().to_lowercase().contains(&needle)
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
