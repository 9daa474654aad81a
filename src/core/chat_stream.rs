//! Drives one adapter stream to exactly one terminal event.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::message::Message;
use crate::core::usage::TokenUsage;
use crate::providers::ProviderAdapter;

/// Minimum spacing between progress emissions.
pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub enum CompletionEvent {
    /// Accumulated content so far; the message is still loading.
    Progress { content: String },
    Finished {
        content: String,
        usage: Option<TokenUsage>,
    },
    Failed { content: String, error: String },
}

impl CompletionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CompletionEvent::Progress { .. })
    }

    pub fn content(&self) -> &str {
        match self {
            CompletionEvent::Progress { content }
            | CompletionEvent::Finished { content, .. }
            | CompletionEvent::Failed { content, .. } => content,
        }
    }
}

pub struct CompletionParams {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub model: String,
    /// Outbound history; the placeholder is filtered out again before sending.
    pub messages: Vec<Message>,
    pub placeholder_id: String,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Messages worth sending upstream: no placeholder, nothing still loading,
/// and no empty failed replies.
pub fn outbound_history(messages: &[Message], placeholder_id: &str) -> Vec<Message> {
    messages
        .iter()
        .filter(|message| message.id != placeholder_id && !message.is_loading)
        .filter(|message| !(message.error.is_some() && message.content.is_empty()))
        .cloned()
        .collect()
}

/// Run one completion, reporting through `emit`.
///
/// Returns `false` when `cancel_token` fired; in that case no terminal event
/// is emitted and nothing further is reported.
pub async fn run_completion<F>(
    adapter: &dyn ProviderAdapter,
    messages: &[Message],
    model: &str,
    cancel_token: &CancellationToken,
    mut emit: F,
) -> bool
where
    F: FnMut(CompletionEvent),
{
    let opened = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => return false,
        opened = adapter.stream_completion(messages, model) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            emit(CompletionEvent::Failed {
                content: String::new(),
                error: err.to_string(),
            });
            return true;
        }
    };

    let mut content = String::new();
    let mut last_emit: Option<Instant> = None;
    let mut unsent = false;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return false,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(delta)) => {
                content.push_str(&delta);
                unsent = true;
                let now = Instant::now();
                if last_emit.is_none_or(|at| now.duration_since(at) >= PROGRESS_THROTTLE) {
                    emit(CompletionEvent::Progress {
                        content: content.clone(),
                    });
                    last_emit = Some(now);
                    unsent = false;
                }
            }
            Some(Err(err)) => {
                emit(CompletionEvent::Failed {
                    content,
                    error: err.to_string(),
                });
                return true;
            }
            None => break,
        }
    }
    drop(stream);

    if cancel_token.is_cancelled() {
        return false;
    }
    if unsent {
        emit(CompletionEvent::Progress {
            content: content.clone(),
        });
    }
    emit(CompletionEvent::Finished {
        content,
        usage: adapter.last_stream_usage(),
    });
    true
}

/// Spawns completions and funnels their events, tagged with the stream id,
/// into one channel.
#[derive(Clone)]
pub struct CompletionOrchestrator {
    tx: mpsc::UnboundedSender<(CompletionEvent, u64)>,
}

impl CompletionOrchestrator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(CompletionEvent, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: CompletionParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let CompletionParams {
                adapter,
                model,
                messages,
                placeholder_id,
                cancel_token,
                stream_id,
            } = params;
            let history = outbound_history(&messages, &placeholder_id);
            let finished = run_completion(adapter.as_ref(), &history, &model, &cancel_token, |event| {
                if !cancel_token.is_cancelled() {
                    let _ = tx.send((event, stream_id));
                }
            })
            .await;
            if !finished {
                debug!(stream_id, "completion abandoned");
            }
        });
    }
}
