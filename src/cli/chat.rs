//! Line-oriented chat loop over the conversation store.

use std::error::Error;
use std::io::{self, Write};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::transfer::format_index_entry;
use crate::core::context::ChatContext;
use crate::core::conversation::{Conversation, ConversationMetadata};
use crate::core::providers::{pick_default_model, ProviderKind};
use crate::core::store::{ConversationStore, StoreEvents};

/// How long to wait for an outstanding title request when leaving.
const EXIT_GRACE: Duration = Duration::from_secs(5);

enum Flow {
    Continue,
    Quit,
}

pub async fn run_chat(
    context: ChatContext,
    provider: Option<ProviderKind>,
    model: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let (mut store, mut events) = context.open_store().await?;
    if store.active_conversation().is_none() || provider.is_some() || model.is_some() {
        let (kind, model) = context.selection(provider, model.as_deref());
        store.create_conversation(kind, &model).await?;
    }

    eprintln!("💬 Confab: type a message, /help for commands, /quit to leave");
    if let Some(conversation) = store.active_conversation() {
        print_conversation(conversation);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        // Title replies can arrive while we wait for input.
        let line = loop {
            tokio::select! {
                line = lines.next_line() => break line?,
                Some(event) = events.recv() => {
                    if let Err(err) = store.handle_event(event).await {
                        eprintln!("⚠️  {err}");
                    }
                }
            }
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            match run_command(&context, &mut store, command).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(err) => eprintln!("❌ {err}"),
            }
            continue;
        }

        match store.send_message(input).await {
            Ok(placeholder_id) => {
                if let Some(error) = stream_reply(&mut store, &mut events, &placeholder_id).await? {
                    eprintln!("❌ {error}");
                }
            }
            Err(err) => eprintln!("❌ {err}"),
        }
    }

    let _ = tokio::time::timeout(EXIT_GRACE, store.run_until_idle(&mut events)).await;
    Ok(())
}

/// Print the reply as it streams in. Returns the reply's error, if it failed.
pub(crate) async fn stream_reply(
    store: &mut ConversationStore,
    events: &mut StoreEvents,
    placeholder_id: &str,
) -> Result<Option<String>, Box<dyn Error>> {
    let mut printed = 0;
    let mut stdout = io::stdout();
    while store.is_busy() {
        let Some(event) = events.recv().await else {
            break;
        };
        if let Err(err) = store.handle_event(event).await {
            eprintln!("\n⚠️  {err}");
        }
        if let Some(message) = store
            .active_conversation()
            .and_then(|conversation| conversation.message(placeholder_id))
        {
            print_new_text(&mut stdout, &message.content, &mut printed)?;
        }
    }
    writeln!(stdout)?;

    Ok(store
        .active_conversation()
        .and_then(|conversation| conversation.message(placeholder_id))
        .and_then(|message| message.error.clone()))
}

/// Write the part of `content` past `printed` bytes.
pub(crate) fn print_new_text<W: Write>(
    out: &mut W,
    content: &str,
    printed: &mut usize,
) -> io::Result<()> {
    if let Some(new_text) = content.get(*printed..).filter(|text| !text.is_empty()) {
        out.write_all(new_text.as_bytes())?;
        out.flush()?;
        *printed = content.len();
    }
    Ok(())
}

async fn run_command(
    context: &ChatContext,
    store: &mut ConversationStore,
    command: &str,
) -> Result<Flow, Box<dyn Error>> {
    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(name, rest)| (name, rest.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" => return Ok(Flow::Quit),
        "help" => print_help(),
        "new" => {
            let (provider, model) = parse_provider_args(rest)?;
            let (kind, model) = context.selection(provider, model);
            let id = store.create_conversation(kind, &model).await?;
            println!("✅ Started conversation {id} ({kind}/{model})");
        }
        "list" => print_index(store.metadata_index(), store.active_conversation_id()),
        "switch" => {
            let id = require_target(store.metadata_index(), rest)?;
            store.set_active_conversation(&id).await?;
            if let Some(conversation) = store.active_conversation() {
                print_conversation(conversation);
            }
        }
        "delete" => {
            let id = require_target(store.metadata_index(), rest)?;
            store.delete_conversation(&id).await?;
            println!("✅ Deleted conversation {id}");
            match store.active_conversation() {
                Some(conversation) => print_conversation(conversation),
                None => {
                    let (kind, model) = context.selection(None, None);
                    store.create_conversation(kind, &model).await?;
                    println!("Started a new conversation ({kind}/{model})");
                }
            }
        }
        "title" => {
            let id = active_id(store)?;
            store.update_title(&id, rest).await?;
            println!("✅ Renamed to: {}", rest.trim());
        }
        "provider" => {
            let (provider, model) = parse_provider_args(rest)?;
            let Some(kind) = provider else {
                return Err("Usage: /provider <openai|anthropic|gemini> [model]".into());
            };
            let model = pick_default_model(&context.config, kind, model);
            let id = active_id(store)?;
            store.update_provider(&id, kind, &model).await?;
            println!("✅ Now using {kind}/{model}");
        }
        other => return Err(format!("Unknown command: /{other} (try /help)").into()),
    }
    Ok(Flow::Continue)
}

fn active_id(store: &ConversationStore) -> Result<String, Box<dyn Error>> {
    store
        .active_conversation_id()
        .map(str::to_string)
        .ok_or_else(|| "No active conversation".into())
}

fn parse_provider_args(rest: &str) -> Result<(Option<ProviderKind>, Option<&str>), Box<dyn Error>> {
    let mut parts = rest.split_whitespace();
    let provider = parts.next().map(ProviderKind::try_from).transpose()?;
    Ok((provider, parts.next()))
}

fn require_target(index: &[ConversationMetadata], arg: &str) -> Result<String, Box<dyn Error>> {
    if arg.is_empty() {
        return Err("Specify a conversation number or id (see /list)".into());
    }
    resolve_target(index, arg)
        .map(str::to_string)
        .ok_or_else(|| format!("No conversation matches '{arg}'").into())
}

/// A 1-based position in the index, an exact id, or an unambiguous id prefix.
pub(crate) fn resolve_target<'a>(index: &'a [ConversationMetadata], arg: &str) -> Option<&'a str> {
    if let Ok(position) = arg.parse::<usize>() {
        if let Some(entry) = position.checked_sub(1).and_then(|i| index.get(i)) {
            return Some(entry.id.as_str());
        }
    }
    if let Some(entry) = index.iter().find(|entry| entry.id == arg) {
        return Some(entry.id.as_str());
    }
    let mut matches = index.iter().filter(|entry| entry.id.starts_with(arg));
    match (matches.next(), matches.next()) {
        (Some(entry), None) => Some(entry.id.as_str()),
        _ => None,
    }
}

fn print_index(index: &[ConversationMetadata], active: Option<&str>) {
    if index.is_empty() {
        println!("No conversations yet.");
        return;
    }
    for (position, entry) in index.iter().enumerate() {
        println!("{}", format_index_entry(position + 1, entry, active == Some(entry.id.as_str())));
    }
}

fn print_conversation(conversation: &Conversation) {
    println!(
        "── {} ({}/{}) ──",
        conversation.title, conversation.provider_id, conversation.model_id
    );
    for message in conversation.messages.iter().filter(|m| !m.is_system()) {
        let speaker = if message.is_user() { "You" } else { "AI" };
        println!("{speaker}: {}", message.content);
        if let Some(error) = &message.error {
            println!("   ⚠️  {error}");
        }
    }
}

fn print_help() {
    println!("/new [provider [model]]   Start a new conversation");
    println!("/list                     List conversations");
    println!("/switch <n|id>            Switch to another conversation");
    println!("/delete <n|id>            Delete a conversation");
    println!("/title <text>             Rename the current conversation");
    println!("/provider <name> [model]  Change provider/model for the current conversation");
    println!("/quit                     Leave the chat");
}
