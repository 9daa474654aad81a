use std::fmt;

use crate::core::persistence::PersistenceError;

#[derive(Debug)]
pub enum StoreError {
    Persistence(PersistenceError),
    /// Malformed input such as an import payload; nothing was changed.
    Validation(String),
    NotFound(String),
    /// A completion is already streaming into this conversation.
    Busy { conversation_id: String },
    NoActiveConversation,
    EmptyMessage,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Persistence(err) => write!(f, "Storage error: {err}"),
            StoreError::Validation(message) => write!(f, "Invalid data: {message}"),
            StoreError::NotFound(id) => write!(f, "Conversation not found: {id}"),
            StoreError::Busy { conversation_id } => write!(
                f,
                "A response is still streaming in conversation {conversation_id}"
            ),
            StoreError::NoActiveConversation => write!(f, "No active conversation"),
            StoreError::EmptyMessage => write!(f, "Message is empty"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PersistenceError> for StoreError {
    fn from(err: PersistenceError) -> Self {
        StoreError::Persistence(err)
    }
}
