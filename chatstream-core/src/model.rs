use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of a conversation. Only the in-progress assistant reply ever has
/// its `content` replaced after it was published.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<i64>,
    pub content: String,
    pub role: Role,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            created_at_ms: Some(now_ms()),
            content: content.into(),
            role,
        }
    }

    /// Wire projection: only role and content leave the client.
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Input to `append`; the id is assigned when missing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CreateMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at_ms: Option<i64>,
    pub content: String,
    pub role: Role,
}

impl CreateMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: None,
            created_at_ms: Some(now_ms()),
            content: content.into(),
            role: Role::User,
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id.filter(|id| !id.is_empty()).unwrap_or_else(new_id),
            created_at_ms: self.created_at_ms,
            content: self.content,
            role: self.role,
        }
    }
}

impl From<Message> for CreateMessage {
    fn from(m: Message) -> Self {
        Self {
            id: Some(m.id),
            created_at_ms: m.created_at_ms,
            content: m.content,
            role: m.role,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Body of one exchange: `{"messages": [{role, content}, ...]}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatRequestBody {
    pub messages: Vec<ChatMessage>,
}

/// Everything a transport needs to run one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Endpoint, absolute or relative to the transport's base URL.
    pub api: String,
    pub conversation_id: String,
    pub request_id: String,
    pub body: ChatRequestBody,
}

/// Immutable view of the conversation at one point in time.
pub type Snapshot = Arc<[Message]>;

pub fn snapshot_of(messages: Vec<Message>) -> Snapshot {
    Arc::from(messages)
}

pub fn project(snapshot: &[Message]) -> ChatRequestBody {
    ChatRequestBody {
        messages: snapshot.iter().map(Message::to_chat).collect(),
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
