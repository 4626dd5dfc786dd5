use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{Error, Result};

/// Number of characters of the opening message used as a conversation name
pub const NAME_PREFIX_CHARS: usize = 20;

/// Message role enum for strict validation
///
/// Older records tagged assistant turns as `"system"`; those are read back as
/// `Assistant` and written out as `"assistant"` so a record never mixes both.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "system")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One role-tagged message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A persisted conversation
///
/// `messages` only ever grows: turns are appended through [`push_user`] and
/// [`push_assistant`] and never edited or removed.
///
/// [`push_user`]: ConversationRecord::push_user
/// [`push_assistant`]: ConversationRecord::push_assistant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationRecord {
    id: String,
    name: String,
    #[serde(default)]
    messages: Vec<Turn>,
}

impl ConversationRecord {
    /// Create an empty record named after the message that opened it
    pub fn new(id: impl Into<String>, opening_text: &str) -> Self {
        Self {
            id: id.into(),
            name: opening_text.chars().take(NAME_PREFIX_CHARS).collect(),
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn messages(&self) -> &[Turn] {
        &self.messages
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Turn::user(content));
    }

    /// Append an assistant turn. A conversation must be opened by the user.
    pub fn push_assistant(&mut self, content: impl Into<String>) -> Result<()> {
        if self.messages.is_empty() {
            return Err(Error::Internal(format!(
                "conversation {} has no user turn to answer",
                self.id
            )));
        }
        self.messages.push(Turn::assistant(content));
        Ok(())
    }
}

/// Inbound request to continue a conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRequest {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub text: String,
    /// Overrides the configured streaming mode for this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ConversationRequest {
    /// Validate the request
    pub fn validate(&self) -> Result<()> {
        if self.text.is_empty() {
            return Err(Error::Validation("Please enter a valid text".into()));
        }
        if self.conversation_id.is_empty() {
            return Err(Error::Validation("conversationId is required".into()));
        }
        Ok(())
    }
}

/// Acknowledgement body for store mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub result: String,
}

/// Request body for an OpenAI-compatible chat completion
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Turn>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

/// One streamed event payload
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

impl ChatCompletionChunk {
    /// Text carried by the first choice, if any
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.as_ref())
            .and_then(|delta| delta.content.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Option<DeltaContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeltaContent {
    #[serde(default)]
    pub content: Option<String>,
}

/// Non-streamed completion response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub store_reachable: bool,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Health status enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}
