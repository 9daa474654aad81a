//! Anthropic Messages API.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::RequestBuilder;
use serde_json::Value;
use tracing::warn;

use crate::api::anthropic::{
    BlockDelta, ContentBlock, MessageParam, MessagesRequest, MessagesResponse, RawUsage,
    StreamEvent, Usage, API_VERSION, DEFAULT_MAX_TOKENS,
};
use crate::core::message::{Message, Role};
use crate::core::providers::{ProviderKind, ProviderSettings};
use crate::core::usage::{PricingTable, TokenUsage};
use crate::providers::http::{build_client, construct_api_url, read_json, send_with_retry};
use crate::providers::sse::{self, SseFrame};
use crate::providers::{
    priced_usage, AdapterOptions, Completion, DeltaStream, ProviderAdapter, ProviderError,
    RetryPolicy, UsageSlot, DEFAULT_TEMPERATURE,
};

const KIND: ProviderKind = ProviderKind::Anthropic;

pub const LATEX_INSTRUCTION: &str = "When writing mathematics, use LaTeX delimiters: \
$...$ for inline math and $$...$$ for display math.";

#[derive(Clone)]
pub struct AnthropicAdapter {
    settings: ProviderSettings,
    client: reqwest::Client,
    pricing: Arc<PricingTable>,
    retry: RetryPolicy,
    last_usage: UsageSlot,
}

impl AnthropicAdapter {
    pub fn new(
        settings: ProviderSettings,
        pricing: Arc<PricingTable>,
        options: AdapterOptions,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(&settings)?,
            settings,
            pricing,
            retry: options.retry,
            last_usage: UsageSlot::default(),
        })
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        self.settings
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::missing_api_key(KIND))
    }

    fn request(&self, api_key: &str, body: &MessagesRequest) -> RequestBuilder {
        self.client
            .post(construct_api_url(&self.settings.endpoint, "messages"))
            .header("Content-Type", "application/json")
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
    }

    fn usage_from(&self, model: &str, raw: Value) -> Option<TokenUsage> {
        let usage: Usage = serde_json::from_value(raw.clone()).ok()?;
        priced_usage(
            KIND,
            model,
            (usage.input_tokens, usage.output_tokens, None),
            raw,
            &self.pricing,
        )
    }

    async fn complete(
        &self,
        body: &MessagesRequest,
        retry: &RetryPolicy,
    ) -> Result<Completion, ProviderError> {
        let api_key = self.api_key()?;
        let response = send_with_retry(retry, KIND, || self.request(&api_key, body)).await?;
        let (parsed, _): (MessagesResponse, _) = read_json(KIND, response).await?;
        Ok(Completion {
            content: parsed.text(),
            usage: parsed.usage.and_then(|usage| self.usage_from(&body.model, usage)),
        })
    }
}

/// Split out system messages and append the LaTeX instruction, keeping any
/// existing system text intact.
pub(crate) fn build_request(messages: &[Message], model: &str, stream: bool) -> MessagesRequest {
    let existing: Vec<&str> = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(|message| message.content.as_str())
        .filter(|content| !content.trim().is_empty())
        .collect();
    let system = if existing.is_empty() {
        LATEX_INSTRUCTION.to_string()
    } else {
        let joined = existing.join("\n\n");
        if joined.contains(LATEX_INSTRUCTION) {
            joined
        } else {
            format!("{joined}\n\n{LATEX_INSTRUCTION}")
        }
    };

    MessagesRequest {
        model: model.to_string(),
        max_tokens: DEFAULT_MAX_TOKENS,
        system: Some(system),
        messages: messages
            .iter()
            .filter(|message| message.role != Role::System)
            .map(|message| MessageParam {
                role: message.role.as_str().to_string(),
                content: message.content.clone(),
            })
            .collect(),
        temperature: DEFAULT_TEMPERATURE,
        stream,
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum EventOutcome {
    Delta(String),
    Usage(Value),
    Stop,
    Nothing,
}

pub(crate) fn parse_event(payload: &str) -> Result<EventOutcome, ProviderError> {
    let event: StreamEvent = serde_json::from_str(payload)
        .map_err(|err| ProviderError::malformed(KIND, format!("{err}: {payload}")))?;
    Ok(match event {
        StreamEvent::MessageStart { message } => {
            message.usage.map_or(EventOutcome::Nothing, EventOutcome::Usage)
        }
        StreamEvent::ContentBlockStart {
            content_block: ContentBlock::Text { text },
        } if !text.is_empty() => EventOutcome::Delta(text),
        StreamEvent::ContentBlockDelta {
            delta: BlockDelta::TextDelta { text },
        } if !text.is_empty() => EventOutcome::Delta(text),
        StreamEvent::MessageDelta { usage: Some(usage) } => EventOutcome::Usage(usage),
        StreamEvent::MessageStop => EventOutcome::Stop,
        StreamEvent::Error { error } => {
            return Err(ProviderError::malformed(KIND, error.message));
        }
        _ => EventOutcome::Nothing,
    })
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn stream_completion(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<DeltaStream, ProviderError> {
        self.last_usage.clear();
        let api_key = self.api_key()?;
        let body = build_request(messages, model, true);

        let response =
            match send_with_retry(&self.retry, KIND, || self.request(&api_key, &body)).await {
                Ok(response) => response,
                Err(err) if err.is_client_error() => return Err(err),
                Err(err) => {
                    warn!(error = %err, model, "streaming failed, falling back to a single non-streaming call");
                    let fallback = build_request(messages, model, false);
                    return match self.complete(&fallback, &RetryPolicy::none()).await {
                        Ok(completion) => {
                            self.last_usage.set(completion.usage);
                            let whole = completion.content;
                            let stream: DeltaStream = Box::pin(futures_util::stream::iter(
                                (!whole.is_empty()).then_some(Ok::<_, ProviderError>(whole)),
                            ));
                            Ok(stream)
                        }
                        Err(fallback_err) => {
                            warn!(error = %fallback_err, "non-streaming fallback failed");
                            Err(err)
                        }
                    };
                }
            };

        let adapter = self.clone();
        let model = model.to_string();
        let stream = async_stream::stream! {
            let mut frames = Box::pin(sse::frames(KIND, response));
            let mut usage = RawUsage::default();
            let mut finished = false;
            while let Some(frame) = frames.next().await {
                let payload = match frame {
                    Ok(SseFrame::Data(payload)) => payload,
                    Ok(SseFrame::Done) => {
                        finished = true;
                        break;
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                match parse_event(&payload) {
                    Ok(EventOutcome::Delta(text)) => yield Ok(text),
                    Ok(EventOutcome::Usage(reported)) => usage.merge(reported),
                    Ok(EventOutcome::Stop) => {
                        finished = true;
                        break;
                    }
                    Ok(EventOutcome::Nothing) => {}
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
            if !finished {
                yield Err(ProviderError::truncated_stream(KIND));
                return;
            }
            adapter.last_usage.set(adapter.usage_from(&model, usage.into_value()));
        };
        let stream: DeltaStream = Box::pin(stream);
        Ok(stream)
    }

    async fn get_completion(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<Completion, ProviderError> {
        let body = build_request(messages, model, false);
        self.complete(&body, &self.retry).await
    }

    fn last_stream_usage(&self) -> Option<TokenUsage> {
        self.last_usage.get()
    }
}
