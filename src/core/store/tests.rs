use std::sync::Arc;

use super::*;
use crate::core::conversation::{sort_index, ConversationMetadata};
use crate::core::persistence::MemoryGateway;
use crate::providers::{AdapterRegistry, ProviderAdapter, ProviderError};
use crate::utils::test_utils::{
    create_test_conversation, test_usage, FailingGateway, ScriptedAdapter, StreamScript,
};

fn registry(adapters: &[Arc<ScriptedAdapter>]) -> Arc<AdapterRegistry> {
    let adapters: Vec<Arc<dyn ProviderAdapter>> = adapters
        .iter()
        .map(|adapter| {
            let adapter: Arc<dyn ProviderAdapter> = adapter.clone();
            adapter
        })
        .collect();
    Arc::new(AdapterRegistry::fixed(adapters))
}

async fn open_with(
    gateway: Arc<dyn PersistenceGateway>,
    adapters: &[Arc<ScriptedAdapter>],
) -> (ConversationStore, StoreEvents) {
    ConversationStore::open(gateway, registry(adapters), StoreOptions::default())
        .await
        .expect("store opens")
}

async fn seed(gateway: &dyn PersistenceGateway, conversations: &[Conversation], active: Option<&str>) {
    for conversation in conversations {
        gateway
            .put_conversation_blob(conversation)
            .await
            .expect("seed blob");
    }
    let mut index: Vec<ConversationMetadata> = conversations
        .iter()
        .map(ConversationMetadata::from_conversation)
        .collect();
    sort_index(&mut index);
    gateway.put_metadata_index(&index).await.expect("seed index");
    gateway
        .put_active_conversation_id(active)
        .await
        .expect("seed active");
}

fn openai(script: StreamScript) -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter::new(ProviderKind::OpenAI).with_stream(script))
}

fn last_message(store: &ConversationStore) -> Message {
    store
        .active_conversation()
        .and_then(|conversation| conversation.last_message())
        .cloned()
        .expect("active conversation has messages")
}

#[tokio::test]
async fn first_exchange_streams_reply_and_generates_title() {
    let adapter = Arc::new(
        ScriptedAdapter::new(ProviderKind::OpenAI)
            .with_stream(StreamScript::deltas(["Hel", "lo"]).with_usage(test_usage(5, 2)))
            .with_title("  \"Greeting  exchange\" "),
    );
    let gateway = Arc::new(MemoryGateway::new());
    let (mut store, mut events) = open_with(gateway.clone(), &[adapter.clone()]).await;

    let id = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");
    assert_eq!(store.active_conversation_id(), Some(id.as_str()));
    assert_eq!(store.metadata_index()[0].id, id);

    let placeholder_id = store.send_message("Hello").await.expect("send");
    assert!(store.is_busy());
    let conversation = store.active_conversation().expect("active");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].content, "Hello");
    assert!(conversation.messages[1].is_loading);
    assert_eq!(conversation.messages[1].id, placeholder_id);

    let persisted = gateway
        .get_conversation_blob(&id)
        .await
        .expect("read")
        .expect("blob");
    assert_eq!(persisted.messages.len(), 2);

    store.run_until_idle(&mut events).await.expect("drain");

    let reply = last_message(&store);
    assert_eq!(reply.id, placeholder_id);
    assert_eq!(reply.content, "Hello");
    assert!(!reply.is_loading);
    assert_eq!(reply.error, None);
    assert_eq!(
        reply.token_usage.as_ref().and_then(|usage| usage.total_tokens),
        Some(7)
    );

    let title_calls = adapter.completion_calls();
    assert_eq!(title_calls.len(), 1);
    assert!(title_calls[0][0].is_system());
    assert_eq!(title_calls[0][1].content, "Hello");

    let conversation = store.active_conversation().expect("active");
    assert_eq!(conversation.title, "Greeting exchange");
    assert_eq!(store.metadata_index()[0].title, "Greeting exchange");
    assert_eq!(store.metadata_index()[0].message_count, 2);
    assert_eq!(store.metadata_index()[0].total_tokens, Some(7));

    let persisted = gateway
        .get_conversation_blob(&id)
        .await
        .expect("read")
        .expect("blob");
    assert_eq!(&persisted, conversation);
}

#[tokio::test]
async fn transport_failure_is_recorded_on_the_reply() {
    let failure = ProviderError::transport(ProviderKind::OpenAI, "connection refused").with_attempts(3);
    let adapter = openai(StreamScript::open_error(failure));
    adapter.push_stream(StreamScript::deltas(["second ", "try"]));
    let (mut store, mut events) = open_with(Arc::new(MemoryGateway::new()), &[adapter.clone()]).await;
    store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");

    store.send_message("Hello").await.expect("send");
    store.run_until_idle(&mut events).await.expect("drain");

    let reply = last_message(&store);
    assert!(!reply.is_loading);
    assert_eq!(reply.content, "");
    let error = reply.error.expect("error recorded");
    assert!(error.contains("connection refused"));
    assert!(!store.is_busy());
    assert!(adapter.completion_calls().is_empty(), "no title after a failed reply");

    store.send_message("Again").await.expect("send after failure");
    store.run_until_idle(&mut events).await.expect("drain");

    let conversation = store.active_conversation().expect("active");
    assert_eq!(conversation.messages.len(), 4);
    assert_eq!(last_message(&store).content, "second try");
    // The failed empty reply is not sent upstream again.
    let second_call = &adapter.stream_calls()[1];
    let contents: Vec<&str> = second_call.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["Hello", "Again"]);
}

#[tokio::test]
async fn only_one_reply_streams_at_a_time() {
    let adapter = openai(StreamScript::deltas(["partial"]).held_open());
    let (mut store, mut events) = open_with(Arc::new(MemoryGateway::new()), &[adapter]).await;
    let id = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");

    store.send_message("first").await.expect("send");
    let second = store.send_message("second").await;
    assert!(matches!(second, Err(StoreError::Busy { conversation_id }) if conversation_id == id));
    assert_eq!(store.active_conversation().expect("active").messages.len(), 2);

    // Let the partial delta land before cancelling.
    while last_message(&store).content.is_empty() {
        let event = events.recv().await.expect("event");
        store.handle_event(event).await.expect("progress");
    }

    assert!(store.cancel_completion().await);
    assert!(!store.is_busy());
    assert!(!store.cancel_completion().await);

    let reply = last_message(&store);
    assert!(!reply.is_loading);
    assert_eq!(reply.content, "partial");
    assert_eq!(reply.error.as_deref(), Some(CANCELLED_ERROR));
}

#[tokio::test]
async fn switching_away_cancels_the_stream() {
    let adapter = openai(StreamScript::deltas(["never finished"]).held_open());
    let gateway = Arc::new(MemoryGateway::new());
    let (mut store, _events) = open_with(gateway.clone(), &[adapter]).await;
    let first = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");
    let second = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");

    let placeholder_id = store.send_message("Hello").await.expect("send");
    store.set_active_conversation(&first).await.expect("switch");

    assert!(!store.is_busy());
    assert_eq!(store.active_conversation_id(), Some(first.as_str()));
    let abandoned = gateway
        .get_conversation_blob(&second)
        .await
        .expect("read")
        .expect("blob");
    let reply = abandoned.message(&placeholder_id).expect("reply kept");
    assert!(!reply.is_loading);
    assert_eq!(reply.error.as_deref(), Some(CANCELLED_ERROR));
}

#[tokio::test]
async fn events_from_stale_streams_are_ignored() {
    let adapter = openai(StreamScript::deltas(["ok"]));
    let (mut store, mut events) = open_with(Arc::new(MemoryGateway::new()), &[adapter]).await;
    store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");
    store.send_message("Hello").await.expect("send");

    let before = store.active_conversation().cloned();
    let revision = store.revision();
    store
        .handle_event(StoreEvent::Completion {
            event: CompletionEvent::Finished {
                content: "from elsewhere".to_string(),
                usage: None,
            },
            stream_id: 999,
        })
        .await
        .expect("stale event");
    assert_eq!(store.active_conversation().cloned(), before);
    assert_eq!(store.revision(), revision);
    assert!(store.is_busy());

    store.run_until_idle(&mut events).await.expect("drain");
    assert_eq!(last_message(&store).content, "ok");
}

#[tokio::test]
async fn activating_twice_notifies_once() {
    let gateway = Arc::new(MemoryGateway::new());
    let first = create_test_conversation("first", 1);
    let second = create_test_conversation("second", 2);
    seed(gateway.as_ref(), &[first.clone(), second.clone()], Some(&second.id)).await;
    let (mut store, _events) = open_with(gateway, &[]).await;
    let changes = store.subscribe();
    let start = store.revision();

    store.set_active_conversation(&first.id).await.expect("switch");
    store.set_active_conversation(&first.id).await.expect("no-op");

    assert_eq!(store.revision(), start + 1);
    assert!(changes.has_changed().expect("sender alive"));
    assert_eq!(store.active_conversation(), Some(&first));
}

#[tokio::test]
async fn cache_stays_bounded() {
    let gateway = Arc::new(MemoryGateway::new());
    let conversations: Vec<Conversation> = (1..=5)
        .map(|minute| create_test_conversation(&format!("chat {minute}"), minute))
        .collect();
    seed(gateway.as_ref(), &conversations, None).await;
    let (mut store, _events) = ConversationStore::open(
        gateway,
        registry(&[]),
        StoreOptions { cache_capacity: 2 },
    )
    .await
    .expect("open");

    for conversation in &conversations {
        store
            .set_active_conversation(&conversation.id)
            .await
            .expect("switch");
    }

    let cached = store.cached_ids();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0], conversations[3].id);
    assert_eq!(cached[1], conversations[2].id);
    assert!(!cached.contains(&conversations[4].id), "active is not cached");
}

#[tokio::test]
async fn deleting_the_active_conversation_activates_the_most_recent() {
    let gateway = Arc::new(MemoryGateway::new());
    let conversations: Vec<Conversation> = (1..=4)
        .map(|minute| create_test_conversation(&format!("chat {minute}"), minute))
        .collect();
    let doomed = conversations[1].id.clone();
    seed(gateway.as_ref(), &conversations, Some(&doomed)).await;
    let (mut store, _events) = open_with(gateway.clone(), &[]).await;
    assert_eq!(store.active_conversation_id(), Some(doomed.as_str()));

    store.delete_conversation(&doomed).await.expect("delete");

    assert_eq!(store.active_conversation_id(), Some(conversations[3].id.as_str()));
    assert_eq!(store.metadata_index().len(), 3);
    assert!(!gateway.has_blob(&doomed));
    let persisted = gateway.get_metadata_index().await.expect("read").expect("index");
    assert!(persisted.iter().all(|entry| entry.id != doomed));
    assert_eq!(
        gateway.get_active_conversation_id().await.expect("read"),
        Some(conversations[3].id.clone())
    );

    let missing = store.delete_conversation(&doomed).await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn deleting_the_last_conversation_leaves_none_active() {
    let gateway = Arc::new(MemoryGateway::new());
    let (mut store, _events) = open_with(gateway.clone(), &[]).await;
    let id = store
        .create_conversation(ProviderKind::Gemini, "gemini-1.5-flash")
        .await
        .expect("create");

    store.delete_conversation(&id).await.expect("delete");

    assert!(store.active_conversation().is_none());
    assert!(store.metadata_index().is_empty());
    assert_eq!(gateway.blob_count(), 0);
    assert_eq!(gateway.get_active_conversation_id().await.expect("read"), None);
}

#[tokio::test]
async fn failed_index_write_rolls_back_a_delete() {
    let gateway = Arc::new(FailingGateway::new());
    let conversation = create_test_conversation("keep me", 1);
    seed(gateway.as_ref(), &[conversation.clone()], Some(&conversation.id)).await;
    let (mut store, _events) = open_with(gateway.clone(), &[]).await;

    gateway.fail_index_writes(true);
    let result = store.delete_conversation(&conversation.id).await;

    assert!(matches!(result, Err(StoreError::Persistence(_))));
    assert!(gateway.inner.has_blob(&conversation.id));
    assert_eq!(store.metadata_index().len(), 1);
    assert_eq!(store.active_conversation(), Some(&conversation));
}

#[tokio::test]
async fn failed_create_changes_nothing() {
    let gateway = Arc::new(FailingGateway::new());
    let (mut store, _events) = open_with(gateway.clone(), &[]).await;
    gateway.fail_blob_writes(true);

    let result = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await;

    assert!(matches!(result, Err(StoreError::Persistence(_))));
    assert!(store.metadata_index().is_empty());
    assert!(store.active_conversation().is_none());

    gateway.fail_blob_writes(false);
    gateway.fail_index_writes(true);
    let result = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await;
    assert!(result.is_err());
    assert_eq!(gateway.inner.blob_count(), 0);
    assert!(store.metadata_index().is_empty());
}

#[tokio::test]
async fn deleting_a_conversation_with_an_interrupted_reply_keeps_the_others() {
    let gateway = Arc::new(MemoryGateway::new());
    let newest = create_test_conversation("newest", 3);
    let middle = create_test_conversation("middle", 2);
    let mut crashed = create_test_conversation("crashed", 1).with_messages_appended([
        Message::user("still there?"),
        Message::placeholder().with_progress("half"),
    ]);
    crashed.updated_at = crate::utils::test_utils::fixed_time(1);
    seed(
        gateway.as_ref(),
        &[newest.clone(), middle.clone(), crashed.clone()],
        Some(&newest.id),
    )
    .await;
    let (mut store, _events) = open_with(gateway.clone(), &[]).await;

    // Settling the interrupted reply on load moves it to the top of the index.
    store.delete_conversation(&crashed.id).await.expect("delete");

    let mut ids: Vec<&str> = store
        .metadata_index()
        .iter()
        .map(|entry| entry.id.as_str())
        .collect();
    ids.sort_unstable();
    let mut expected = [newest.id.as_str(), middle.id.as_str()];
    expected.sort_unstable();
    assert_eq!(ids, expected);
    assert!(!gateway.has_blob(&crashed.id));
    assert!(gateway.has_blob(&middle.id));

    let persisted = gateway.get_metadata_index().await.expect("read").expect("index");
    assert_eq!(persisted.len(), 2);
    assert!(persisted.iter().all(|entry| entry.id != crashed.id));
    assert!(persisted.iter().any(|entry| entry.id == middle.id));
}

#[tokio::test]
async fn failed_create_leaves_the_running_reply_alone() {
    let adapter = openai(StreamScript::deltas(["still going"]).held_open());
    let gateway = Arc::new(FailingGateway::new());
    let (mut store, _events) = open_with(gateway.clone(), &[adapter]).await;
    let id = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");
    store.send_message("Hello").await.expect("send");

    gateway.fail_index_writes(true);
    let result = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await;

    assert!(matches!(result, Err(StoreError::Persistence(_))));
    assert!(store.is_busy());
    assert_eq!(store.active_conversation_id(), Some(id.as_str()));
    let reply = last_message(&store);
    assert!(reply.is_loading);
    assert!(reply.error.is_none());
    assert_eq!(store.metadata_index().len(), 1);
}

#[tokio::test]
async fn creating_during_a_stream_indexes_both_conversations() {
    let adapter = openai(StreamScript::deltas(["still going"]).held_open());
    let gateway = Arc::new(MemoryGateway::new());
    let (mut store, _events) = open_with(gateway.clone(), &[adapter]).await;
    let first = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");
    let placeholder_id = store.send_message("Hello").await.expect("send");

    let second = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");

    assert!(!store.is_busy());
    assert_eq!(store.active_conversation_id(), Some(second.as_str()));
    let persisted = gateway.get_metadata_index().await.expect("read").expect("index");
    assert_eq!(persisted.len(), 2);
    assert!(persisted.iter().any(|entry| entry.id == first));
    assert!(persisted.iter().any(|entry| entry.id == second));
    let cancelled = store.conversation(&first).await.expect("first");
    let reply = cancelled.message(&placeholder_id).expect("reply");
    assert_eq!(reply.error.as_deref(), Some(CANCELLED_ERROR));
}

#[tokio::test]
async fn progress_save_failures_are_not_surfaced() {
    let adapter = openai(StreamScript::deltas(["Hel", "lo"]));
    let gateway = Arc::new(FailingGateway::new());
    let (mut store, mut events) = open_with(gateway.clone(), &[adapter]).await;
    store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");
    store.send_message("Hello").await.expect("send");
    gateway.fail_blob_writes(true);

    let mut outcomes = Vec::new();
    while store.is_busy() {
        let event = events.recv().await.expect("event");
        let terminal = matches!(&event, StoreEvent::Completion { event, .. } if event.is_terminal());
        outcomes.push((terminal, store.handle_event(event).await.is_ok()));
    }

    assert!(outcomes.iter().filter(|(terminal, _)| !terminal).all(|(_, ok)| *ok));
    assert_eq!(outcomes.last(), Some(&(true, false)), "final save error is reported");
    let reply = last_message(&store);
    assert_eq!(reply.content, "Hello");
    assert!(!reply.is_loading);
}

#[tokio::test]
async fn failed_title_generation_keeps_the_default_title() {
    let adapter = openai(StreamScript::deltas(["Hi"]));
    let (mut store, mut events) = open_with(Arc::new(MemoryGateway::new()), &[adapter.clone()]).await;
    store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");

    store.send_message("Hello").await.expect("send");
    store.run_until_idle(&mut events).await.expect("drain");

    assert_eq!(adapter.completion_calls().len(), 1);
    assert_eq!(store.active_conversation().expect("active").title, DEFAULT_TITLE);
    assert!(!store.has_pending_work());
}

#[tokio::test]
async fn titles_and_providers_update_in_memory_and_storage() {
    let openai_adapter = openai(StreamScript::default());
    let anthropic = Arc::new(
        ScriptedAdapter::new(ProviderKind::Anthropic)
            .with_stream(StreamScript::deltas(["from claude"]))
            .with_title("Generated title"),
    );
    let gateway = Arc::new(MemoryGateway::new());
    let (mut store, mut events) =
        open_with(gateway.clone(), &[openai_adapter.clone(), anthropic.clone()]).await;
    let id = store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");

    assert!(matches!(
        store.update_title(&id, "   ").await,
        Err(StoreError::Validation(_))
    ));
    store.update_title(&id, " Trip planning ").await.expect("title");
    store
        .update_provider(&id, ProviderKind::Anthropic, "claude-3-5-haiku-latest")
        .await
        .expect("provider");

    let entry = &store.metadata_index()[0];
    assert_eq!(entry.title, "Trip planning");
    assert_eq!(entry.provider_id, ProviderKind::Anthropic);
    let persisted = gateway
        .get_conversation_blob(&id)
        .await
        .expect("read")
        .expect("blob");
    assert_eq!(persisted.model_id, "claude-3-5-haiku-latest");

    store.send_message("Hello").await.expect("send");
    store.run_until_idle(&mut events).await.expect("drain");
    assert_eq!(last_message(&store).content, "from claude");
    assert!(openai_adapter.stream_calls().is_empty());
    assert_eq!(anthropic.stream_calls().len(), 1);
    // A title set by hand is not replaced by a generated one.
    assert_eq!(anthropic.completion_calls().len(), 1);
    assert_eq!(store.active_conversation().expect("active").title, "Trip planning");

    assert!(matches!(
        store.update_title("missing", "x").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn send_requires_text_and_an_active_conversation() {
    let (mut store, _events) = open_with(Arc::new(MemoryGateway::new()), &[]).await;
    assert!(matches!(
        store.send_message("hello").await,
        Err(StoreError::NoActiveConversation)
    ));
    store
        .create_conversation(ProviderKind::OpenAI, "gpt-4o-mini")
        .await
        .expect("create");
    assert!(matches!(
        store.send_message(" \n ").await,
        Err(StoreError::EmptyMessage)
    ));
}

#[tokio::test]
async fn missing_adapter_fails_the_reply_instead_of_the_call() {
    let (mut store, _events) = open_with(Arc::new(MemoryGateway::new()), &[]).await;
    store
        .create_conversation(ProviderKind::Gemini, "gemini-1.5-flash")
        .await
        .expect("create");

    store.send_message("Hello").await.expect("send");

    assert!(!store.is_busy());
    let reply = last_message(&store);
    assert!(!reply.is_loading);
    assert!(reply.error.is_some());
}

#[tokio::test]
async fn import_replaces_everything_and_activates_designated_chat() {
    let gateway = Arc::new(MemoryGateway::new());
    let existing = create_test_conversation("existing", 9);
    seed(gateway.as_ref(), &[existing.clone()], Some(&existing.id)).await;
    let (mut store, _events) = open_with(gateway.clone(), &[]).await;

    let first = create_test_conversation("first", 1);
    let second = create_test_conversation("second", 2);
    let payload = serde_json::json!({
        "chats": [first, second],
        "activeChat": second.id,
    })
    .to_string();
    let snapshot = Snapshot::from_json(&payload).expect("valid snapshot");

    store.import_all(snapshot).await.expect("import");

    assert_eq!(store.metadata_index().len(), 2);
    assert_eq!(store.active_conversation(), Some(&second));
    assert!(!gateway.has_blob(&existing.id));
    assert!(gateway.has_blob(&first.id));
    assert_eq!(
        gateway.get_active_conversation_id().await.expect("read"),
        Some(second.id.clone())
    );
}

#[tokio::test]
async fn invalid_import_leaves_state_untouched() {
    let gateway = Arc::new(MemoryGateway::new());
    let existing = create_test_conversation("existing", 3);
    seed(gateway.as_ref(), &[existing.clone()], Some(&existing.id)).await;
    let (mut store, _events) = open_with(gateway.clone(), &[]).await;

    let duplicate = Snapshot {
        chats: vec![existing.clone(), existing.clone()],
        active_chat: None,
        export_date: None,
    };
    assert!(matches!(
        store.import_all(duplicate).await,
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        Snapshot::from_json(r#"{"conversations": []}"#),
        Err(StoreError::Validation(_))
    ));

    assert_eq!(store.metadata_index().len(), 1);
    assert_eq!(store.active_conversation(), Some(&existing));
    assert!(gateway.has_blob(&existing.id));
}

#[tokio::test]
async fn export_materializes_every_conversation() {
    let gateway = Arc::new(MemoryGateway::new());
    let conversations: Vec<Conversation> = (1..=3)
        .map(|minute| create_test_conversation(&format!("chat {minute}"), minute))
        .collect();
    seed(gateway.as_ref(), &conversations, Some(&conversations[0].id)).await;
    let (mut store, _events) = open_with(gateway, &[]).await;

    let snapshot = store.export_all().await.expect("export");

    assert_eq!(snapshot.chats.len(), 3);
    assert_eq!(snapshot.chats[0], conversations[2]);
    assert_eq!(snapshot.active_chat.as_deref(), Some(conversations[0].id.as_str()));
    assert!(snapshot.export_date.is_some());

    let text = snapshot.to_json().expect("json");
    let (mut restored, _events) = open_with(Arc::new(MemoryGateway::new()), &[]).await;
    restored
        .import_all(Snapshot::from_json(&text).expect("parse"))
        .await
        .expect("import");
    assert_eq!(restored.metadata_index(), store.metadata_index());
}

#[tokio::test]
async fn clear_all_removes_everything() {
    let gateway = Arc::new(MemoryGateway::new());
    let conversations = [create_test_conversation("a", 1), create_test_conversation("b", 2)];
    seed(gateway.as_ref(), &conversations, Some(&conversations[0].id)).await;
    let (mut store, _events) = open_with(gateway.clone(), &[]).await;

    store.clear_all().await.expect("clear");

    assert!(store.metadata_index().is_empty());
    assert!(store.active_conversation().is_none());
    assert!(store.cached_ids().is_empty());
    assert_eq!(gateway.blob_count(), 0);
    assert_eq!(
        gateway.get_metadata_index().await.expect("read"),
        Some(Vec::new())
    );
}

#[tokio::test]
async fn open_repairs_the_index() {
    let gateway = Arc::new(MemoryGateway::new());
    let kept = create_test_conversation("kept", 1);
    let lost = create_test_conversation("lost", 2);
    let orphan = create_test_conversation("orphan", 3);
    seed(gateway.as_ref(), &[kept.clone(), lost.clone()], Some(&lost.id)).await;
    gateway.delete_conversation_blob(&lost.id).await.expect("delete");
    gateway
        .put_conversation_blob(&orphan)
        .await
        .expect("orphan blob");

    let (store, _events) = open_with(gateway.clone(), &[]).await;

    let ids: Vec<&str> = store
        .metadata_index()
        .iter()
        .map(|entry| entry.id.as_str())
        .collect();
    assert_eq!(ids, [orphan.id.as_str(), kept.id.as_str()]);
    // The stored active id pointed at the lost conversation.
    assert_eq!(store.active_conversation_id(), Some(orphan.id.as_str()));
    let persisted = gateway.get_metadata_index().await.expect("read").expect("index");
    assert_eq!(persisted.len(), 2);
}

#[tokio::test]
async fn open_settles_replies_left_loading() {
    let gateway = Arc::new(MemoryGateway::new());
    let conversation = create_test_conversation("crashed", 1)
        .with_messages_appended([Message::user("still there?"), Message::placeholder().with_progress("half")]);
    seed(gateway.as_ref(), &[conversation.clone()], Some(&conversation.id)).await;

    let (mut store, _events) = open_with(gateway.clone(), &[]).await;

    let reply = last_message(&store);
    assert!(!reply.is_loading);
    assert_eq!(reply.content, "half");
    assert_eq!(reply.error.as_deref(), Some(INTERRUPTED_ERROR));
    let persisted = gateway
        .get_conversation_blob(&conversation.id)
        .await
        .expect("read")
        .expect("blob");
    assert!(!persisted.has_pending_message());
    assert!(!store.is_busy());
    assert!(matches!(
        store.send_message("retry").await,
        Ok(_)
    ));
}
