use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{
    blob_key, decode, encode, is_valid_id, PersistenceError, PersistenceGateway, ACTIVE_KEY,
    BLOB_PREFIX, INDEX_KEY,
};
use crate::core::conversation::{Conversation, ConversationMetadata};

/// JSON files under one data directory:
/// `chat_index.json`, `chat_data_<id>.json`, `active_chat.json`.
#[derive(Debug, Clone)]
pub struct FileGateway {
    dir: PathBuf,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivePointer {
    active_chat: Option<String>,
}

impl FileGateway {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn blob_path(&self, id: &str) -> Result<PathBuf, PersistenceError> {
        if !is_valid_id(id) {
            return Err(PersistenceError::InvalidKey(id.to_string()));
        }
        Ok(self.path_for(&blob_key(id)))
    }

    async fn read(&self, path: PathBuf) -> Result<Option<String>, PersistenceError> {
        blocking(move || match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io { path, source }),
        })
        .await
    }

    async fn write(&self, path: PathBuf, contents: String) -> Result<(), PersistenceError> {
        let dir = self.dir.clone();
        blocking(move || write_atomic(&dir, &path, &contents)).await
    }
}

async fn blocking<T, F>(work: F) -> Result<T, PersistenceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PersistenceError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| PersistenceError::Unavailable(format!("storage task failed: {err}")))?
}

fn write_atomic(dir: &Path, path: &Path, contents: &str) -> Result<(), PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(io_err)?;
    let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.write_all(contents.as_bytes()).map_err(io_err)?;
    temp.flush().map_err(io_err)?;
    temp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}

#[async_trait]
impl PersistenceGateway for FileGateway {
    async fn get_metadata_index(&self) -> Result<Option<Vec<ConversationMetadata>>, PersistenceError> {
        self.read(self.path_for(INDEX_KEY))
            .await?
            .map(|text| decode(INDEX_KEY, &text))
            .transpose()
    }

    async fn put_metadata_index(&self, entries: &[ConversationMetadata]) -> Result<(), PersistenceError> {
        let text = encode(INDEX_KEY, entries)?;
        self.write(self.path_for(INDEX_KEY), text).await
    }

    async fn get_conversation_blob(&self, id: &str) -> Result<Option<Conversation>, PersistenceError> {
        let path = self.blob_path(id)?;
        self.read(path)
            .await?
            .map(|text| decode(&blob_key(id), &text))
            .transpose()
    }

    async fn put_conversation_blob(&self, conversation: &Conversation) -> Result<(), PersistenceError> {
        let path = self.blob_path(&conversation.id)?;
        let text = encode(&blob_key(&conversation.id), conversation)?;
        self.write(path, text).await
    }

    async fn delete_conversation_blob(&self, id: &str) -> Result<(), PersistenceError> {
        let path = self.blob_path(id)?;
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Io { path, source }),
        })
        .await
    }

    async fn list_conversation_blobs(&self) -> Result<Vec<String>, PersistenceError> {
        let dir = self.dir.clone();
        blocking(move || {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(source) => return Err(PersistenceError::Io { path: dir, source }),
            };
            let mut ids = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| PersistenceError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let name = entry.file_name();
                let Some(id) = name
                    .to_str()
                    .and_then(|name| name.strip_prefix(BLOB_PREFIX))
                    .and_then(|rest| rest.strip_suffix(".json"))
                else {
                    continue;
                };
                if is_valid_id(id) {
                    ids.push(id.to_string());
                }
            }
            Ok(ids)
        })
        .await
    }

    async fn get_active_conversation_id(&self) -> Result<Option<String>, PersistenceError> {
        let pointer: Option<ActivePointer> = self
            .read(self.path_for(ACTIVE_KEY))
            .await?
            .map(|text| decode(ACTIVE_KEY, &text))
            .transpose()?;
        Ok(pointer.and_then(|pointer| pointer.active_chat))
    }

    async fn put_active_conversation_id(&self, id: Option<&str>) -> Result<(), PersistenceError> {
        let pointer = ActivePointer {
            active_chat: id.map(str::to_string),
        };
        let text = encode(ACTIVE_KEY, &pointer)?;
        self.write(self.path_for(ACTIVE_KEY), text).await
    }
}
