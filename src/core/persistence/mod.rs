//! Durable storage for the metadata index and per-conversation blobs.

mod file;
mod memory;

pub use file::FileGateway;
pub use memory::MemoryGateway;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::core::conversation::{Conversation, ConversationMetadata};

pub const INDEX_KEY: &str = "chat_index";
pub const ACTIVE_KEY: &str = "active_chat";
pub const BLOB_PREFIX: &str = "chat_data_";

pub fn blob_key(id: &str) -> String {
    format!("{BLOB_PREFIX}{id}")
}

/// Ids end up in file names, so they are restricted to the URL-safe alphabet.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug)]
pub enum PersistenceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize {
        key: String,
        source: serde_json::Error,
    },
    Deserialize {
        key: String,
        source: serde_json::Error,
    },
    InvalidKey(String),
    Unavailable(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io { path, source } => {
                write!(f, "I/O error at {}: {source}", path.display())
            }
            PersistenceError::Serialize { key, source } => {
                write!(f, "Failed to serialize {key}: {source}")
            }
            PersistenceError::Deserialize { key, source } => {
                write!(f, "Failed to read {key}: {source}")
            }
            PersistenceError::InvalidKey(id) => write!(f, "Invalid conversation id: {id:?}"),
            PersistenceError::Unavailable(message) => write!(f, "Storage unavailable: {message}"),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistenceError::Io { source, .. } => Some(source),
            PersistenceError::Serialize { source, .. }
            | PersistenceError::Deserialize { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Key-value blob store consumed by the conversation store.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get_metadata_index(&self) -> Result<Option<Vec<ConversationMetadata>>, PersistenceError>;

    async fn put_metadata_index(&self, entries: &[ConversationMetadata]) -> Result<(), PersistenceError>;

    async fn get_conversation_blob(&self, id: &str) -> Result<Option<Conversation>, PersistenceError>;

    async fn put_conversation_blob(&self, conversation: &Conversation) -> Result<(), PersistenceError>;

    /// Deleting a missing blob is not an error.
    async fn delete_conversation_blob(&self, id: &str) -> Result<(), PersistenceError>;

    /// Ids of every stored blob, in no particular order.
    async fn list_conversation_blobs(&self) -> Result<Vec<String>, PersistenceError>;

    async fn get_active_conversation_id(&self) -> Result<Option<String>, PersistenceError>;

    async fn put_active_conversation_id(&self, id: Option<&str>) -> Result<(), PersistenceError>;
}

pub(crate) fn encode<T: serde::Serialize + ?Sized>(key: &str, value: &T) -> Result<String, PersistenceError> {
    serde_json::to_string_pretty(value).map_err(|source| PersistenceError::Serialize {
        key: key.to_string(),
        source,
    })
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(key: &str, text: &str) -> Result<T, PersistenceError> {
    serde_json::from_str(text).map_err(|source| PersistenceError::Deserialize {
        key: key.to_string(),
        source,
    })
}
