//! Google Gemini `generateContent`.
//!
//! History is flattened into one prompt (system text first, then labelled
//! turns) and sent as a single user turn.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::RequestBuilder;
use serde_json::Value;

use crate::api::gemini::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part,
    UsageMetadata,
};
use crate::core::message::{Message, Role};
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

const KIND: ProviderKind = ProviderKind::Gemini;

#[derive(Clone)]
pub struct GeminiAdapter {
    settings: ProviderSettings,
    client: reqwest::Client,
    pricing: Arc<PricingTable>,
    retry: RetryPolicy,
    last_usage: UsageSlot,
}

impl GeminiAdapter {
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

    fn request(
        &self,
        api_key: &str,
        model: &str,
        stream: bool,
        body: &GenerateContentRequest,
    ) -> RequestBuilder {
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let url = construct_api_url(&self.settings.endpoint, &format!("models/{model}:{method}"));
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .query(&[("key", api_key)]);
        if stream {
            request = request.query(&[("alt", "sse")]);
        }
        request.json(body)
    }

    fn usage_from(&self, model: &str, metadata: UsageMetadata) -> Option<TokenUsage> {
        let raw = serde_json::to_value(metadata).unwrap_or(Value::Null);
        priced_usage(
            KIND,
            model,
            (
                metadata.prompt_token_count,
                metadata.candidates_token_count,
                metadata.total_token_count,
            ),
            raw,
            &self.pricing,
        )
    }
}

pub(crate) fn flatten_prompt(messages: &[Message]) -> String {
    let system: Vec<&str> = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(|message| message.content.trim())
        .filter(|content| !content.is_empty())
        .collect();

    let mut sections = Vec::new();
    if !system.is_empty() {
        sections.push(system.join("\n\n"));
    }
    for message in messages.iter().filter(|m| m.role != Role::System) {
        let label = match message.role {
            Role::Assistant => "Assistant",
            _ => "User",
        };
        sections.push(format!("{label}: {}", message.content));
    }
    sections.join("\n\n")
}

pub(crate) fn build_request(messages: &[Message]) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(flatten_prompt(messages)),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: DEFAULT_TEMPERATURE,
        },
    }
}

pub(crate) fn parse_chunk(payload: &str) -> Result<GenerateContentResponse, ProviderError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|_| ProviderError::malformed(KIND, format_api_error(payload)))?;
    if value.get("error").is_some() {
        return Err(ProviderError::malformed(KIND, format_api_error(payload)));
    }
    serde_json::from_value(value).map_err(|err| ProviderError::malformed(KIND, err.to_string()))
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
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
        let body = build_request(messages);
        let response = send_with_retry(&self.retry, KIND, || {
            self.request(&api_key, model, true, &body)
        })
        .await?;

        let adapter = self.clone();
        let model = model.to_string();
        let stream = async_stream::stream! {
            let mut frames = Box::pin(sse::frames(KIND, response));
            // usageMetadata is only trustworthy once the stream has drained.
            let mut metadata: Option<UsageMetadata> = None;
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
                match parse_chunk(&payload) {
                    Ok(chunk) => {
                        if chunk.usage_metadata.is_some() {
                            metadata = chunk.usage_metadata;
                        }
                        finished |= chunk.is_finished();
                        let text = chunk.text();
                        if !text.is_empty() {
                            yield Ok(text);
                        }
                    }
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
            adapter
                .last_usage
                .set(metadata.and_then(|metadata| adapter.usage_from(&model, metadata)));
        };
        let stream: DeltaStream = Box::pin(stream);
        Ok(stream)
    }

    async fn get_completion(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<Completion, ProviderError> {
        let api_key = self.api_key()?;
        let body = build_request(messages);
        let response = send_with_retry(&self.retry, KIND, || {
            self.request(&api_key, model, false, &body)
        })
        .await?;
        let (parsed, _): (GenerateContentResponse, _) = read_json(KIND, response).await?;
        Ok(Completion {
            content: parsed.text(),
            usage: parsed
                .usage_metadata
                .and_then(|metadata| self.usage_from(model, metadata)),
        })
    }

    fn last_stream_usage(&self) -> Option<TokenUsage> {
        self.last_usage.get()
    }
}
