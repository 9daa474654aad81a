//! Conversations and their lightweight index projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::message::Message;
use crate::core::providers::ProviderKind;
use crate::utils::ids::new_id;

pub const DEFAULT_TITLE: &str = "New Chat";
pub const PREVIEW_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub provider_id: ProviderKind,
    pub model_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: DEFAULT_TITLE.to_string(),
            provider_id: provider,
            model_id: model.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_pending_message(&self) -> bool {
        self.messages.iter().any(Message::is_pending)
    }

    pub fn with_messages_appended(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(messages);
        self.touch()
    }

    /// Replace the message with `id` in place, preserving its position.
    /// Unknown ids leave the conversation untouched.
    pub fn with_message_replaced<F>(mut self, id: &str, update: F) -> Self
    where
        F: FnOnce(Message) -> Message,
    {
        let Some(index) = self.messages.iter().position(|m| m.id == id) else {
            return self;
        };
        let current = self.messages[index].clone();
        let mut replacement = update(current);
        replacement.id = id.to_string();
        self.messages[index] = replacement;
        self.touch()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self.touch()
    }

    pub fn with_provider(mut self, provider: ProviderKind, model: impl Into<String>) -> Self {
        self.provider_id = provider;
        self.model_id = model.into();
        self.touch()
    }

    fn touch(mut self) -> Self {
        // Keep updated_at monotonic even if the clock steps backwards.
        self.updated_at = Utc::now().max(self.updated_at);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetadata {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub provider_id: ProviderKind,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message_preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

impl ConversationMetadata {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let usages = || {
            conversation
                .messages
                .iter()
                .filter_map(|message| message.token_usage.as_ref())
        };
        let total_tokens = usages()
            .filter_map(|usage| usage.total_tokens)
            .fold(None, |acc: Option<u64>, tokens| Some(acc.unwrap_or(0) + tokens));
        let total_cost = usages()
            .filter_map(|usage| usage.total_cost)
            .fold(None, |acc: Option<f64>, cost| Some(acc.unwrap_or(0.0) + cost));

        Self {
            id: conversation.id.clone(),
            title: conversation.title.clone(),
            message_count: conversation.messages.len(),
            provider_id: conversation.provider_id,
            model_id: conversation.model_id.clone(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            last_message_preview: conversation
                .last_message()
                .map(|message| preview_text(&message.content))
                .unwrap_or_default(),
            total_tokens,
            total_cost,
        }
    }
}

/// First `PREVIEW_LIMIT` characters with newlines flattened; short text is
/// returned untouched.
pub fn preview_text(content: &str) -> String {
    if content.chars().count() <= PREVIEW_LIMIT {
        return content.to_string();
    }
    content
        .chars()
        .take(PREVIEW_LIMIT)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}

/// Stable sort, most recently updated first.
pub fn sort_index(index: &mut [ConversationMetadata]) {
    index.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}
