//! One-shot prompt: stream a single reply to stdout and exit.

use std::error::Error;
use std::io::{self, Write};

use tokio_util::sync::CancellationToken;

use crate::cli::chat::print_new_text;
use crate::core::chat_stream::{CompletionEvent, CompletionOrchestrator, CompletionParams};
use crate::core::context::ChatContext;
use crate::core::message::Message;
use crate::core::providers::ProviderKind;

pub async fn run_say(
    context: ChatContext,
    prompt: Vec<String>,
    provider: Option<ProviderKind>,
    model: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: confab say <prompt>");
        std::process::exit(1);
    }

    let (kind, model) = context.selection(provider, model.as_deref());
    let adapter = context.adapters.get(kind)?;

    let (orchestrator, mut rx) = CompletionOrchestrator::new();
    orchestrator.spawn_stream(CompletionParams {
        adapter,
        model,
        messages: vec![Message::user(prompt)],
        placeholder_id: String::new(),
        cancel_token: CancellationToken::new(),
        stream_id: 0,
    });
    drop(orchestrator);

    let mut stdout = io::stdout();
    let mut printed = 0;
    while let Some((event, _)) = rx.recv().await {
        print_new_text(&mut stdout, event.content(), &mut printed)?;
        match event {
            CompletionEvent::Progress { .. } => {}
            CompletionEvent::Finished { .. } => {
                writeln!(stdout)?;
                return Ok(());
            }
            CompletionEvent::Failed { error, .. } => {
                writeln!(stdout)?;
                eprintln!("\n❌ Error: {error}");
                std::process::exit(1);
            }
        }
    }
    Err("completion ended without a result".into())
}
