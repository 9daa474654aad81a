//! Authoritative in-memory state for conversations.
//!
//! The store owns the active conversation, a bounded LRU of recently viewed
//! conversations and the metadata index of all of them. Every mutation goes
//! through `&mut self`. Completions and title requests run on background tasks
//! and report back as [`StoreEvent`]s, which the owner feeds into
//! [`ConversationStore::handle_event`] from its event loop.
//!
//! Only the active conversation can have a completion in flight: switching
//! away from it, deleting it or replacing everything cancels the stream, and
//! events carrying an older `stream_id` are dropped.

mod error;
mod snapshot;
mod title;

#[cfg(test)]
mod tests;

pub use error::StoreError;
pub use snapshot::Snapshot;
pub use title::{sanitize_title, title_prompt, MAX_TITLE_CHARS};

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::chat_stream::{CompletionEvent, CompletionOrchestrator, CompletionParams};
use crate::core::config::data::DEFAULT_CACHE_CAPACITY;
use crate::core::config::Config;
use crate::core::conversation::{sort_index, Conversation, ConversationMetadata, DEFAULT_TITLE};
use crate::core::message::Message;
use crate::core::persistence::PersistenceGateway;
use crate::core::providers::ProviderKind;
use crate::providers::{AdapterRegistry, ProviderError};

/// Error recorded on a reply whose stream was cancelled.
pub const CANCELLED_ERROR: &str = "Cancelled";
/// Error recorded on a reply that was still loading when the process stopped.
pub const INTERRUPTED_ERROR: &str = "Interrupted";

/// Minimum spacing between opportunistic saves of a streaming reply.
const PROGRESS_SAVE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Non-active conversations kept in memory.
    pub cache_capacity: usize,
}

impl StoreOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_capacity: config.cache_capacity(),
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Completion {
        event: CompletionEvent,
        stream_id: u64,
    },
    Title {
        conversation_id: String,
        result: Result<String, ProviderError>,
    },
}

type TitleResult = (String, Result<String, ProviderError>);

/// Receiving half of the store's background work.
pub struct StoreEvents {
    completions: mpsc::UnboundedReceiver<(CompletionEvent, u64)>,
    titles: mpsc::UnboundedReceiver<TitleResult>,
}

impl StoreEvents {
    /// Next event from any background task. Pending forever while the store
    /// is idle, since the store keeps the sending halves alive.
    pub async fn recv(&mut self) -> Option<StoreEvent> {
        tokio::select! {
            Some((event, stream_id)) = self.completions.recv() => {
                Some(StoreEvent::Completion { event, stream_id })
            }
            Some((conversation_id, result)) = self.titles.recv() => {
                Some(StoreEvent::Title { conversation_id, result })
            }
            else => None,
        }
    }
}

struct InFlight {
    stream_id: u64,
    conversation_id: String,
    placeholder_id: String,
    cancel_token: CancellationToken,
    last_saved: Option<Instant>,
}

pub struct ConversationStore {
    gateway: Arc<dyn PersistenceGateway>,
    adapters: Arc<AdapterRegistry>,
    orchestrator: CompletionOrchestrator,
    title_tx: mpsc::UnboundedSender<TitleResult>,
    index: Vec<ConversationMetadata>,
    active: Option<Conversation>,
    cache: LruCache<String, Conversation>,
    in_flight: Option<InFlight>,
    next_stream_id: u64,
    pending_titles: usize,
    revision: watch::Sender<u64>,
}

impl ConversationStore {
    /// Load the index and the active conversation from `gateway`.
    ///
    /// Index entries whose blob is gone are dropped, blobs missing from the
    /// index are re-indexed, and the repaired index is written back. Replies
    /// left loading by a previous process are settled as interrupted.
    pub async fn open(
        gateway: Arc<dyn PersistenceGateway>,
        adapters: Arc<AdapterRegistry>,
        options: StoreOptions,
    ) -> Result<(Self, StoreEvents), StoreError> {
        let (orchestrator, completions) = CompletionOrchestrator::new();
        let (title_tx, titles) = mpsc::unbounded_channel();
        let (revision, _) = watch::channel(0);
        let capacity = NonZeroUsize::new(options.cache_capacity).unwrap_or(NonZeroUsize::MIN);

        let mut store = Self {
            gateway,
            adapters,
            orchestrator,
            title_tx,
            index: Vec::new(),
            active: None,
            cache: LruCache::new(capacity),
            in_flight: None,
            next_stream_id: 0,
            pending_titles: 0,
            revision,
        };
        store.reload().await?;
        Ok((store, StoreEvents { completions, titles }))
    }

    pub fn metadata_index(&self) -> &[ConversationMetadata] {
        &self.index
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|conversation| conversation.id.as_str())
    }

    /// True while a completion is streaming.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// True while a completion or a title request has yet to report back.
    pub fn has_pending_work(&self) -> bool {
        self.in_flight.is_some() || self.pending_titles > 0
    }

    /// Ids of the cached non-active conversations, most recently used first.
    pub fn cached_ids(&self) -> Vec<String> {
        self.cache.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Change notifications. The value is a revision counter, so bursts of
    /// changes coalesce into the latest value.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Any indexed conversation, from memory or storage.
    pub async fn conversation(&mut self, id: &str) -> Result<Conversation, StoreError> {
        if !self.is_indexed(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let conversation = self.load(id).await?;
        if self.active_conversation_id() != Some(id) {
            self.cache.put(id.to_string(), conversation.clone());
        }
        Ok(conversation)
    }

    pub async fn create_conversation(
        &mut self,
        provider: ProviderKind,
        model: &str,
    ) -> Result<String, StoreError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(StoreError::Validation("model must not be empty".to_string()));
        }
        let conversation = Conversation::new(provider, model);
        self.gateway.put_conversation_blob(&conversation).await?;

        let index = self.index_with(&conversation);
        if let Err(err) = self.gateway.put_metadata_index(&index).await {
            self.discard_blob(&conversation.id).await;
            return Err(err.into());
        }
        self.index = index;
        self.cancel_in_flight().await;

        let id = conversation.id.clone();
        debug!(conversation_id = %id, provider = %provider, model, "created conversation");
        self.install_active(Some(conversation));
        self.save_active_pointer().await;
        self.notify();
        Ok(id)
    }

    /// Remove a conversation. Deleting the active one activates the most
    /// recently updated remaining conversation, if any.
    pub async fn delete_conversation(&mut self, id: &str) -> Result<(), StoreError> {
        if !self.is_indexed(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let deleting_active = self.active_conversation_id() == Some(id);
        let successor_id = self
            .index
            .iter()
            .find(|entry| entry.id != id)
            .map(|entry| entry.id.clone());
        let successor = match successor_id {
            Some(next) if deleting_active => Some(self.load(&next).await?),
            _ => None,
        };
        let restore = self.load(id).await.ok();

        // Loading can settle interrupted replies and re-sort the index.
        let mut index = self.index.clone();
        index.retain(|entry| entry.id != id);
        self.gateway.delete_conversation_blob(id).await?;
        if let Err(err) = self.gateway.put_metadata_index(&index).await {
            if let Some(conversation) = restore.as_ref() {
                if let Err(restore_err) = self.gateway.put_conversation_blob(conversation).await {
                    warn!(conversation_id = id, error = %restore_err, "failed to restore conversation after aborted delete");
                }
            }
            return Err(err.into());
        }

        if self
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.conversation_id == id)
        {
            self.abandon_in_flight();
        }
        self.index = index;
        self.cache.pop(id);
        if deleting_active {
            self.active = None;
            self.install_active(successor);
            self.save_active_pointer().await;
        }
        debug!(conversation_id = id, "deleted conversation");
        self.notify();
        Ok(())
    }

    /// Make `id` the active conversation. Already active is a no-op and does
    /// not notify.
    pub async fn set_active_conversation(&mut self, id: &str) -> Result<(), StoreError> {
        if self.active_conversation_id() == Some(id) {
            return Ok(());
        }
        if !self.is_indexed(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let conversation = self.load(id).await?;

        self.cancel_in_flight().await;
        self.install_active(Some(conversation));
        self.save_active_pointer().await;
        self.notify();
        Ok(())
    }

    /// Append a user message and a loading reply to the active conversation
    /// and start streaming the reply. Returns the reply's message id.
    pub async fn send_message(&mut self, text: &str) -> Result<String, StoreError> {
        if text.trim().is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        let Some(active) = self.active.as_ref() else {
            return Err(StoreError::NoActiveConversation);
        };
        if self.in_flight.is_some() || active.has_pending_message() {
            return Err(StoreError::Busy {
                conversation_id: active.id.clone(),
            });
        }

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id.clone();
        let updated = active
            .clone()
            .with_messages_appended([Message::user(text), placeholder]);
        let index = self.index_with(&updated);
        self.gateway.put_conversation_blob(&updated).await?;
        if let Err(err) = self.gateway.put_metadata_index(&index).await {
            warn!(conversation_id = %updated.id, error = %err, "failed to update index for outgoing message");
        }

        let conversation_id = updated.id.clone();
        let provider = updated.provider_id;
        let model = updated.model_id.clone();
        let messages = updated.messages.clone();
        self.index = index;
        self.active = Some(updated);

        match self.adapters.get(provider) {
            Ok(adapter) => {
                self.next_stream_id += 1;
                let stream_id = self.next_stream_id;
                let cancel_token = CancellationToken::new();
                debug!(%conversation_id, stream_id, %provider, model = %model, "starting completion");
                self.in_flight = Some(InFlight {
                    stream_id,
                    conversation_id,
                    placeholder_id: placeholder_id.clone(),
                    cancel_token: cancel_token.clone(),
                    last_saved: None,
                });
                self.orchestrator.spawn_stream(CompletionParams {
                    adapter,
                    model,
                    messages,
                    placeholder_id: placeholder_id.clone(),
                    cancel_token,
                    stream_id,
                });
                self.notify();
            }
            Err(err) => {
                let failed = CompletionEvent::Failed {
                    content: String::new(),
                    error: err.to_string(),
                };
                self.apply_terminal(&conversation_id, &placeholder_id, failed)
                    .await?;
            }
        }
        Ok(placeholder_id)
    }

    /// Cancel the streaming reply, keeping whatever content arrived.
    pub async fn cancel_completion(&mut self) -> bool {
        let cancelled = self.cancel_in_flight().await;
        if cancelled {
            self.notify();
        }
        cancelled
    }

    pub async fn update_title(&mut self, id: &str, title: &str) -> Result<(), StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::Validation("title must not be empty".to_string()));
        }
        self.modify(id, |conversation| conversation.with_title(title))
            .await
    }

    /// Switch the provider and model used for future replies.
    pub async fn update_provider(
        &mut self,
        id: &str,
        provider: ProviderKind,
        model: &str,
    ) -> Result<(), StoreError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(StoreError::Validation("model must not be empty".to_string()));
        }
        self.modify(id, |conversation| conversation.with_provider(provider, model))
            .await
    }

    /// Every conversation, in index order.
    pub async fn export_all(&mut self) -> Result<Snapshot, StoreError> {
        let ids: Vec<String> = self.index.iter().map(|entry| entry.id.clone()).collect();
        let mut chats = Vec::with_capacity(ids.len());
        for id in &ids {
            chats.push(self.load(id).await?);
        }
        Ok(Snapshot {
            chats,
            active_chat: self.active_conversation_id().map(str::to_string),
            export_date: Some(Utc::now()),
        })
    }

    /// Replace every conversation with the snapshot's. The snapshot is
    /// validated before anything is touched; a storage failure part way
    /// through reloads state from storage and reports the error.
    pub async fn import_all(&mut self, snapshot: Snapshot) -> Result<(), StoreError> {
        snapshot.validate()?;
        self.abandon_in_flight();
        if let Err(err) = self.replace_all(&snapshot).await {
            self.recover_after(&err).await;
            return Err(err);
        }
        debug!(conversations = self.index.len(), "imported conversations");
        Ok(())
    }

    pub async fn clear_all(&mut self) -> Result<(), StoreError> {
        self.abandon_in_flight();
        if let Err(err) = self.wipe().await {
            self.recover_after(&err).await;
            return Err(err);
        }
        Ok(())
    }

    pub async fn handle_event(&mut self, event: StoreEvent) -> Result<(), StoreError> {
        match event {
            StoreEvent::Completion { event, stream_id } => {
                self.handle_completion(event, stream_id).await
            }
            StoreEvent::Title {
                conversation_id,
                result,
            } => {
                self.handle_title(conversation_id, result).await;
                Ok(())
            }
        }
    }

    /// Feed events into the store until no completion or title request is
    /// outstanding.
    pub async fn run_until_idle(&mut self, events: &mut StoreEvents) -> Result<(), StoreError> {
        while self.has_pending_work() {
            let Some(event) = events.recv().await else {
                break;
            };
            self.handle_event(event).await?;
        }
        Ok(())
    }

    async fn handle_completion(
        &mut self,
        event: CompletionEvent,
        stream_id: u64,
    ) -> Result<(), StoreError> {
        let current = self.in_flight.as_ref().map(|in_flight| in_flight.stream_id);
        if current != Some(stream_id) {
            debug!(stream_id, ?current, "dropping event from stale stream");
            return Ok(());
        }
        match event {
            CompletionEvent::Progress { content } => {
                self.apply_progress(content).await;
                Ok(())
            }
            terminal => {
                let Some(in_flight) = self.in_flight.take() else {
                    return Ok(());
                };
                self.apply_terminal(&in_flight.conversation_id, &in_flight.placeholder_id, terminal)
                    .await
            }
        }
    }

    async fn apply_progress(&mut self, content: String) {
        let Some(in_flight) = self.in_flight.as_ref() else {
            return;
        };
        let placeholder_id = in_flight.placeholder_id.clone();
        let conversation_id = in_flight.conversation_id.clone();
        let Some(active) = self.active.take_if(|active| active.id == conversation_id) else {
            return;
        };
        self.active =
            Some(active.with_message_replaced(&placeholder_id, |message| message.with_progress(content)));

        let now = Instant::now();
        let save_due = self.in_flight.as_ref().is_some_and(|in_flight| {
            in_flight
                .last_saved
                .is_none_or(|at| now.duration_since(at) >= PROGRESS_SAVE_INTERVAL)
        });
        if save_due {
            if let Some(active) = self.active.as_ref() {
                if let Err(err) = self.gateway.put_conversation_blob(active).await {
                    warn!(%conversation_id, error = %err, "failed to save streaming progress");
                }
            }
            if let Some(in_flight) = self.in_flight.as_mut() {
                in_flight.last_saved = Some(now);
            }
        }
        self.notify();
    }

    /// Finalise the reply. Memory is updated even when saving fails, so the
    /// caller sees the error but the conversation stays usable.
    async fn apply_terminal(
        &mut self,
        conversation_id: &str,
        placeholder_id: &str,
        event: CompletionEvent,
    ) -> Result<(), StoreError> {
        let Some(active) = self.active.take_if(|active| active.id == conversation_id) else {
            debug!(conversation_id, "completion ended for a conversation that is no longer active");
            return Ok(());
        };
        let succeeded = matches!(event, CompletionEvent::Finished { .. });
        if let CompletionEvent::Failed { error, .. } = &event {
            debug!(conversation_id, error = %error, "completion failed");
        }
        let updated = active.with_message_replaced(placeholder_id, |message| match event {
            CompletionEvent::Finished { content, usage } => message.completed(content, usage),
            CompletionEvent::Failed { content, error } => message.failed(content, error),
            CompletionEvent::Progress { content } => message.with_progress(content),
        });
        let first_exchange = succeeded && updated.messages.len() == 2;

        self.index = self.index_with(&updated);
        self.active = Some(updated);
        self.notify();

        let saved = match self.active.as_ref() {
            Some(active) => self.save(active, &self.index).await,
            None => Ok(()),
        };
        if first_exchange {
            if let Some(active) = self.active.clone() {
                self.spawn_title(&active);
            }
        }
        saved
    }

    fn spawn_title(&mut self, conversation: &Conversation) {
        let adapter = match self.adapters.get(conversation.provider_id) {
            Ok(adapter) => adapter,
            Err(err) => {
                debug!(conversation_id = %conversation.id, error = %err, "skipping title generation");
                return;
            }
        };
        let prompt = title_prompt(&conversation.messages);
        let model = conversation.model_id.clone();
        let conversation_id = conversation.id.clone();
        let tx = self.title_tx.clone();
        self.pending_titles += 1;
        tokio::spawn(async move {
            let result = adapter
                .get_completion(&prompt, &model)
                .await
                .map(|completion| completion.content);
            let _ = tx.send((conversation_id, result));
        });
    }

    async fn handle_title(&mut self, conversation_id: String, result: Result<String, ProviderError>) {
        self.pending_titles = self.pending_titles.saturating_sub(1);
        let raw = match result {
            Ok(raw) => raw,
            Err(err) => {
                debug!(%conversation_id, error = %err, "title generation failed");
                return;
            }
        };
        let Some(title) = sanitize_title(&raw) else {
            debug!(%conversation_id, "title generation returned an empty title");
            return;
        };
        // A title set by hand in the meantime wins.
        let untitled = self
            .index
            .iter()
            .any(|entry| entry.id == conversation_id && entry.title == DEFAULT_TITLE);
        if !untitled {
            return;
        }
        if let Err(err) = self.update_title(&conversation_id, &title).await {
            debug!(%conversation_id, error = %err, "failed to apply generated title");
        }
    }

    async fn modify<F>(&mut self, id: &str, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(Conversation) -> Conversation,
    {
        if !self.is_indexed(id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let updated = change(self.load(id).await?);
        let index = self.index_with(&updated);
        self.save(&updated, &index).await?;

        self.index = index;
        if self.active_conversation_id() == Some(id) {
            self.active = Some(updated);
        } else {
            self.cache.put(id.to_string(), updated);
        }
        self.notify();
        Ok(())
    }

    async fn replace_all(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let existing = self.gateway.list_conversation_blobs().await?;
        let chats: Vec<Conversation> = snapshot
            .chats
            .iter()
            .cloned()
            .map(|conversation| settle_pending(conversation, INTERRUPTED_ERROR))
            .collect();

        for chat in &chats {
            self.gateway.put_conversation_blob(chat).await?;
        }
        let mut index: Vec<ConversationMetadata> =
            chats.iter().map(ConversationMetadata::from_conversation).collect();
        sort_index(&mut index);
        self.gateway.put_metadata_index(&index).await?;

        let keep: HashSet<&str> = chats.iter().map(|chat| chat.id.as_str()).collect();
        for id in existing.iter().filter(|id| !keep.contains(id.as_str())) {
            self.gateway.delete_conversation_blob(id).await?;
        }

        let active = snapshot
            .resolved_active()
            .and_then(|id| chats.iter().find(|chat| chat.id == id))
            .cloned();
        self.cache.clear();
        self.index = index;
        self.active = active;
        self.save_active_pointer().await;
        self.notify();
        Ok(())
    }

    async fn wipe(&mut self) -> Result<(), StoreError> {
        let existing = self.gateway.list_conversation_blobs().await?;
        for id in &existing {
            self.gateway.delete_conversation_blob(id).await?;
        }
        self.gateway.put_metadata_index(&[]).await?;

        self.index.clear();
        self.cache.clear();
        self.active = None;
        self.save_active_pointer().await;
        debug!(removed = existing.len(), "cleared all conversations");
        self.notify();
        Ok(())
    }

    async fn recover_after(&mut self, err: &StoreError) {
        warn!(error = %err, "bulk operation failed; reloading from storage");
        if let Err(reload_err) = self.reload().await {
            warn!(error = %reload_err, "failed to reload conversations");
        }
    }

    async fn reload(&mut self) -> Result<(), StoreError> {
        self.abandon_in_flight();
        self.cache.clear();
        self.active = None;
        self.index.clear();

        let stored = self.gateway.get_metadata_index().await?.unwrap_or_default();
        let blobs: HashSet<String> = self
            .gateway
            .list_conversation_blobs()
            .await?
            .into_iter()
            .collect();

        let mut seen = HashSet::new();
        let mut index: Vec<ConversationMetadata> = stored
            .iter()
            .filter(|entry| blobs.contains(&entry.id) && seen.insert(entry.id.clone()))
            .cloned()
            .collect();
        let mut repaired = index.len() != stored.len();
        if repaired {
            warn!(
                dropped = stored.len() - index.len(),
                "dropped index entries without a stored conversation"
            );
        }

        let mut orphans: Vec<&String> = blobs.iter().filter(|id| !seen.contains(*id)).collect();
        orphans.sort();
        for id in orphans {
            match self.gateway.get_conversation_blob(id).await {
                Ok(Some(conversation)) => {
                    index.push(ConversationMetadata::from_conversation(&conversation));
                    repaired = true;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(conversation_id = %id, error = %err, "skipping unreadable conversation")
                }
            }
        }
        sort_index(&mut index);
        if repaired {
            self.gateway.put_metadata_index(&index).await?;
        }
        self.index = index;

        let stored_active = self.gateway.get_active_conversation_id().await?;
        let active_id = stored_active
            .filter(|id| self.is_indexed(id))
            .or_else(|| self.index.first().map(|entry| entry.id.clone()));
        if let Some(id) = active_id {
            match self.load(&id).await {
                Ok(conversation) => self.active = Some(conversation),
                Err(err) => warn!(conversation_id = %id, error = %err, "failed to load active conversation"),
            }
        }
        self.notify();
        Ok(())
    }

    fn is_indexed(&self, id: &str) -> bool {
        self.index.iter().any(|entry| entry.id == id)
    }

    /// Look up a conversation without touching the cache contents.
    async fn load(&mut self, id: &str) -> Result<Conversation, StoreError> {
        if let Some(active) = self.active.as_ref().filter(|active| active.id == id) {
            return Ok(active.clone());
        }
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.clone());
        }
        let conversation = self
            .gateway
            .get_conversation_blob(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(self.settle_interrupted(conversation).await)
    }

    async fn settle_interrupted(&mut self, conversation: Conversation) -> Conversation {
        if !conversation.has_pending_message() {
            return conversation;
        }
        let settled = settle_pending(conversation, INTERRUPTED_ERROR);
        let index = self.index_with(&settled);
        match self.save(&settled, &index).await {
            Ok(()) => self.index = index,
            Err(err) => {
                warn!(conversation_id = %settled.id, error = %err, "failed to save interrupted reply")
            }
        }
        settled
    }

    /// The index with `conversation`'s entry replaced (or added) and re-sorted.
    fn index_with(&self, conversation: &Conversation) -> Vec<ConversationMetadata> {
        let entry = ConversationMetadata::from_conversation(conversation);
        let mut index = self.index.clone();
        match index.iter_mut().find(|existing| existing.id == entry.id) {
            Some(slot) => *slot = entry,
            None => index.insert(0, entry),
        }
        sort_index(&mut index);
        index
    }

    async fn save(
        &self,
        conversation: &Conversation,
        index: &[ConversationMetadata],
    ) -> Result<(), StoreError> {
        self.gateway.put_conversation_blob(conversation).await?;
        self.gateway.put_metadata_index(index).await?;
        Ok(())
    }

    async fn discard_blob(&self, id: &str) {
        if let Err(err) = self.gateway.delete_conversation_blob(id).await {
            warn!(conversation_id = id, error = %err, "failed to remove unindexed conversation");
        }
    }

    async fn save_active_pointer(&self) {
        if let Err(err) = self
            .gateway
            .put_active_conversation_id(self.active_conversation_id())
            .await
        {
            warn!(error = %err, "failed to save active conversation");
        }
    }

    /// Make `conversation` active, moving the previous one into the cache.
    fn install_active(&mut self, conversation: Option<Conversation>) {
        if let Some(conversation) = conversation.as_ref() {
            self.cache.pop(conversation.id.as_str());
        }
        if let Some(previous) = std::mem::replace(&mut self.active, conversation) {
            self.cache.put(previous.id.clone(), previous);
        }
    }

    /// Stop the stream without touching its reply.
    fn abandon_in_flight(&mut self) -> Option<InFlight> {
        let in_flight = self.in_flight.take()?;
        in_flight.cancel_token.cancel();
        debug!(
            stream_id = in_flight.stream_id,
            conversation_id = %in_flight.conversation_id,
            "abandoned completion"
        );
        Some(in_flight)
    }

    /// Stop the stream and settle its reply as cancelled.
    async fn cancel_in_flight(&mut self) -> bool {
        let Some(in_flight) = self.abandon_in_flight() else {
            return false;
        };
        let Some(active) = self
            .active
            .take_if(|active| active.id == in_flight.conversation_id)
        else {
            return true;
        };
        let updated = active.with_message_replaced(&in_flight.placeholder_id, |message| {
            fail_keeping_content(message, CANCELLED_ERROR)
        });
        self.index = self.index_with(&updated);
        self.active = Some(updated);
        if let Some(active) = self.active.as_ref() {
            if let Err(err) = self.save(active, &self.index).await {
                warn!(conversation_id = %active.id, error = %err, "failed to save cancelled reply");
            }
        }
        true
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

fn fail_keeping_content(message: Message, error: &str) -> Message {
    let content = message.content.clone();
    message.failed(content, error)
}

fn settle_pending(conversation: Conversation, error: &str) -> Conversation {
    let pending: Vec<String> = conversation
        .messages
        .iter()
        .filter(|message| message.is_pending())
        .map(|message| message.id.clone())
        .collect();
    pending.iter().fold(conversation, |conversation, id| {
        conversation.with_message_replaced(id, |message| fail_keeping_content(message, error))
    })
}
