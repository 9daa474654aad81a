//! History maintenance commands: list, export, import and clear.

use std::error::Error;
use std::fs;
use std::path::Path;

use crate::core::context::ChatContext;
use crate::core::conversation::ConversationMetadata;
use crate::core::store::Snapshot;

pub async fn list_conversations(context: &ChatContext) -> Result<(), Box<dyn Error>> {
    let (store, _events) = context.open_store().await?;
    let index = store.metadata_index();
    if index.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }
    let active = store.active_conversation_id();
    for (position, entry) in index.iter().enumerate() {
        println!(
            "{}",
            format_index_entry(position + 1, entry, active == Some(entry.id.as_str()))
        );
    }
    Ok(())
}

pub async fn export(context: &ChatContext, file: &Path) -> Result<(), Box<dyn Error>> {
    let (mut store, _events) = context.open_store().await?;
    let snapshot = store.export_all().await?;
    fs::write(file, snapshot.to_json()?)
        .map_err(|err| format!("Failed to write {}: {err}", file.display()))?;
    println!(
        "✅ Exported {} conversations to {}",
        snapshot.chats.len(),
        file.display()
    );
    Ok(())
}

pub async fn import(context: &ChatContext, file: &Path) -> Result<(), Box<dyn Error>> {
    let text = fs::read_to_string(file)
        .map_err(|err| format!("Failed to read {}: {err}", file.display()))?;
    let snapshot = Snapshot::from_json(&text)?;
    let count = snapshot.chats.len();

    let (mut store, _events) = context.open_store().await?;
    store.import_all(snapshot).await?;
    println!("✅ Imported {count} conversations");
    Ok(())
}

pub async fn clear(context: &ChatContext, yes: bool) -> Result<(), Box<dyn Error>> {
    let (mut store, _events) = context.open_store().await?;
    let count = store.metadata_index().len();
    if !yes {
        println!("⚠️  This deletes all {count} stored conversations. Re-run with --yes to confirm.");
        return Ok(());
    }
    store.clear_all().await?;
    println!("✅ Deleted {count} conversations");
    Ok(())
}

/// One line of the conversation listing, marking the active entry with `*`.
pub(crate) fn format_index_entry(position: usize, entry: &ConversationMetadata, active: bool) -> String {
    let marker = if active { "*" } else { " " };
    let mut line = format!(
        "{marker}{position:>3}. {}  [{}/{}]  {} messages  {}",
        entry.title,
        entry.provider_id,
        entry.model_id,
        entry.message_count,
        entry.updated_at.format("%Y-%m-%d %H:%M"),
    );
    if let Some(tokens) = entry.total_tokens {
        line.push_str(&format!("  {tokens} tokens"));
    }
    if let Some(cost) = entry.total_cost {
        line.push_str(&format!("  ${cost:.4}"));
    }
    line
}
