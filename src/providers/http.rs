//! HTTP plumbing shared by the adapters.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde_json::Value;

use crate::api::extract_error_summary;
use crate::core::providers::{ProviderKind, ProviderSettings};
use crate::providers::error::ProviderError;
use crate::providers::retry::RetryPolicy;

pub fn build_client(settings: &ProviderSettings) -> Result<reqwest::Client, ProviderError> {
    build_client_with_timeouts(settings.kind, settings.connect_timeout, settings.read_timeout)
}

pub fn build_client_with_timeouts(
    provider: ProviderKind,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .build()
        .map_err(|err| {
            ProviderError::configuration(provider, format!("failed to build HTTP client: {err}"))
        })
}

/// Join a base URL and an endpoint path without doubling slashes.
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    format!("{base}/{endpoint}")
}

/// Send a request built fresh for every attempt, retrying transport failures.
///
/// Non-2xx responses become [`ProviderError::Status`] with the body text.
pub async fn send_with_retry<F>(
    policy: &RetryPolicy,
    provider: ProviderKind,
    build: F,
) -> Result<Response, ProviderError>
where
    F: Fn() -> RequestBuilder,
{
    policy
        .run(provider, |attempt| {
            let request = build();
            async move {
                tracing::debug!(provider = %provider, attempt, "sending provider request");
                let response = request
                    .send()
                    .await
                    .map_err(|err| ProviderError::from_reqwest(provider, &err))?;
                check_status(provider, response).await
            }
        })
        .await
}

async fn check_status(provider: ProviderKind, response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    Err(ProviderError::Status {
        provider,
        status: status.as_u16(),
        body,
    })
}

pub async fn read_json<T>(provider: ProviderKind, response: Response) -> Result<(T, Value), ProviderError>
where
    T: serde::de::DeserializeOwned,
{
    let text = response
        .text()
        .await
        .map_err(|err| ProviderError::from_reqwest(provider, &err))?;
    let raw: Value = serde_json::from_str(&text)
        .map_err(|err| ProviderError::malformed(provider, format!("invalid JSON: {err}")))?;
    let parsed = serde_json::from_value(raw.clone())
        .map_err(|err| ProviderError::malformed(provider, format!("unexpected payload: {err}")))?;
    Ok((parsed, raw))
}

/// Render an error body for humans: pretty JSON with a summary line when one
/// can be found, otherwise the trimmed text in a fenced block.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                return format!("API Error: {summary}\n```json\n{pretty_json}\n```");
            }
            return format!("API Error:\n```json\n{pretty_json}\n```");
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{trimmed}\n```")
    } else {
        format!("API Error:\n```\n{trimmed}\n```")
    }
}
