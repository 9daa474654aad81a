//! OpenAI-compatible chat completions.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::RequestBuilder;
use serde_json::Value;
use tracing::debug;

use crate::api::openai::{
    ChatCompletion, ChatMessage, ChatRequest, ChatStreamChunk, StreamOptions, Usage,
};
use crate::core::message::Message;
use crate::core::providers::{ProviderKind, ProviderSettings};
use crate::core::usage::{PricingTable, TokenUsage};
use crate::providers::http::{
    build_client, construct_api_url, format_api_error, read_json, send_with_retry,
};
use crate::providers::sse::{self, SseFrame};
use crate::providers::{
    priced_usage, AdapterOptions, Completion, DeltaStream, ProviderAdapter, ProviderError,
    RetryPolicy, UsageSlot, DEFAULT_TEMPERATURE,
};

const KIND: ProviderKind = ProviderKind::OpenAI;

#[derive(Clone)]
pub struct OpenAiAdapter {
    settings: ProviderSettings,
    client: reqwest::Client,
    pricing: Arc<PricingTable>,
    retry: RetryPolicy,
    recover_missing_usage: bool,
    last_usage: UsageSlot,
}

impl OpenAiAdapter {
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
            recover_missing_usage: options.recover_missing_usage,
            last_usage: UsageSlot::default(),
        })
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        self.settings
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::missing_api_key(KIND))
    }

    fn request(&self, api_key: &str, body: &ChatRequest) -> RequestBuilder {
        self.client
            .post(construct_api_url(&self.settings.endpoint, "chat/completions"))
            .header("Content-Type", "application/json")
            .bearer_auth(api_key)
            .json(body)
    }

    fn usage_from(&self, model: &str, raw: Value) -> Option<TokenUsage> {
        let counts: Usage = serde_json::from_value(raw.clone()).ok()?;
        priced_usage(
            KIND,
            model,
            (
                counts.prompt_tokens,
                counts.completion_tokens,
                counts.total_tokens,
            ),
            raw,
            &self.pricing,
        )
    }

    async fn complete(&self, body: &ChatRequest) -> Result<(ChatCompletion, Value), ProviderError> {
        let api_key = self.api_key()?;
        let response = send_with_retry(&self.retry, KIND, || self.request(&api_key, body)).await?;
        read_json(KIND, response).await
    }

    /// Second, billable round trip asking for a single token so the usage of
    /// the streamed prompt can be reported.
    async fn recover_usage(&self, mut body: ChatRequest) -> Option<TokenUsage> {
        debug!(model = %body.model, "stream carried no usage, issuing max_tokens=1 recovery call");
        body.stream = false;
        body.stream_options = None;
        body.max_tokens = Some(1);
        match self.complete(&body).await {
            Ok((completion, _)) => completion
                .usage
                .and_then(|raw| self.usage_from(&body.model, raw)),
            Err(err) => {
                debug!(error = %err, "usage recovery call failed");
                None
            }
        }
    }
}

pub(crate) fn chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|message| ChatMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        })
        .collect()
}

#[derive(Debug, Default, PartialEq)]
pub(crate) struct ParsedFrame {
    pub delta: Option<String>,
    pub usage: Option<Value>,
}

/// Interpret one `data:` payload. Error objects end the stream.
pub(crate) fn parse_stream_frame(payload: &str) -> Result<ParsedFrame, ProviderError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|_| ProviderError::malformed(KIND, format_api_error(payload)))?;
    if value.get("error").is_some_and(|error| !error.is_null()) {
        return Err(ProviderError::malformed(KIND, format_api_error(payload)));
    }
    let chunk: ChatStreamChunk = serde_json::from_value(value)
        .map_err(|err| ProviderError::malformed(KIND, err.to_string()))?;
    Ok(ParsedFrame {
        delta: chunk.delta_text().map(str::to_string),
        usage: chunk.usage.filter(Value::is_object),
    })
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
        let body = ChatRequest {
            model: model.to_string(),
            messages: chat_messages(messages),
            temperature: DEFAULT_TEMPERATURE,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            max_tokens: None,
        };
        let response =
            send_with_retry(&self.retry, KIND, || self.request(&api_key, &body)).await?;

        let adapter = self.clone();
        let stream = async_stream::stream! {
            let mut frames = Box::pin(sse::frames(KIND, response));
            // Usage may arrive in any frame before [DONE]; keep the latest.
            let mut usage_raw: Option<Value> = None;
            let mut finished = false;
            while let Some(frame) = frames.next().await {
                let payload = match frame {
                    Ok(SseFrame::Done) => {
                        finished = true;
                        break;
                    }
                    Ok(SseFrame::Data(payload)) => payload,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                match parse_stream_frame(&payload) {
                    Ok(parsed) => {
                        if parsed.usage.is_some() {
                            usage_raw = parsed.usage;
                        }
                        if let Some(delta) = parsed.delta {
                            yield Ok(delta);
                        }
                    }
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
            drop(frames);
            if !finished {
                yield Err(ProviderError::truncated_stream(KIND));
                return;
            }

            let usage = match usage_raw {
                Some(raw) => adapter.usage_from(&body.model, raw),
                None if adapter.recover_missing_usage => adapter.recover_usage(body).await,
                None => None,
            };
            adapter.last_usage.set(usage);
        };
        let stream: DeltaStream = Box::pin(stream);
        Ok(stream)
    }

    async fn get_completion(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<Completion, ProviderError> {
        let body = ChatRequest {
            model: model.to_string(),
            messages: chat_messages(messages),
            temperature: DEFAULT_TEMPERATURE,
            stream: false,
            stream_options: None,
            max_tokens: None,
        };
        let (completion, _) = self.complete(&body).await?;
        Ok(Completion {
            content: completion.text(),
            usage: completion
                .usage
                .clone()
                .and_then(|raw| self.usage_from(model, raw)),
        })
    }

    fn last_stream_usage(&self) -> Option<TokenUsage> {
        self.last_usage.get()
    }
}
