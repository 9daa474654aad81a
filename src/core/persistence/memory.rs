use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{blob_key, decode, encode, PersistenceError, PersistenceGateway, INDEX_KEY};
use crate::core::conversation::{Conversation, ConversationMetadata};

/// In-process gateway. Values are kept as encoded JSON so reads go through
/// the same serialization as on disk.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    index: Option<String>,
    blobs: HashMap<String, String>,
    active: Option<String>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn blob_count(&self) -> usize {
        self.state().blobs.len()
    }

    pub fn has_blob(&self, id: &str) -> bool {
        self.state().blobs.contains_key(id)
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn get_metadata_index(&self) -> Result<Option<Vec<ConversationMetadata>>, PersistenceError> {
        self.state()
            .index
            .as_deref()
            .map(|text| decode(INDEX_KEY, text))
            .transpose()
    }

    async fn put_metadata_index(&self, entries: &[ConversationMetadata]) -> Result<(), PersistenceError> {
        let text = encode(INDEX_KEY, entries)?;
        self.state().index = Some(text);
        Ok(())
    }

    async fn get_conversation_blob(&self, id: &str) -> Result<Option<Conversation>, PersistenceError> {
        let key = blob_key(id);
        self.state()
            .blobs
            .get(id)
            .map(|text| decode(&key, text))
            .transpose()
    }

    async fn put_conversation_blob(&self, conversation: &Conversation) -> Result<(), PersistenceError> {
        let text = encode(&blob_key(&conversation.id), conversation)?;
        self.state().blobs.insert(conversation.id.clone(), text);
        Ok(())
    }

    async fn delete_conversation_blob(&self, id: &str) -> Result<(), PersistenceError> {
        self.state().blobs.remove(id);
        Ok(())
    }

    async fn list_conversation_blobs(&self) -> Result<Vec<String>, PersistenceError> {
        Ok(self.state().blobs.keys().cloned().collect())
    }

    async fn get_active_conversation_id(&self) -> Result<Option<String>, PersistenceError> {
        Ok(self.state().active.clone())
    }

    async fn put_active_conversation_id(&self, id: Option<&str>) -> Result<(), PersistenceError> {
        self.state().active = id.map(str::to_string);
        Ok(())
    }
}
