use std::fmt;

use crate::core::providers::ProviderKind;
use crate::providers::http::format_api_error;

pub const STREAM_ENDED_EARLY: &str = "stream ended before completion";

/// Failure talking to a provider.
///
/// Only [`ProviderError::Transport`] is retried; everything else is surfaced
/// on first occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Missing key or unusable settings. Raised before any network call.
    Configuration {
        provider: ProviderKind,
        message: String,
    },
    /// Connection failure or timeout after `attempts` tries.
    Transport {
        provider: ProviderKind,
        message: String,
        attempts: u32,
    },
    /// Non-2xx response.
    Status {
        provider: ProviderKind,
        status: u16,
        body: String,
    },
    /// The provider answered, but not in a shape we understand (or it sent an
    /// error frame mid-stream).
    Malformed {
        provider: ProviderKind,
        message: String,
    },
}

impl ProviderError {
    pub fn configuration(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Configuration {
            provider,
            message: message.into(),
        }
    }

    pub fn transport(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Transport {
            provider,
            message: message.into(),
            attempts: 1,
        }
    }

    /// The connection closed before the provider signalled the end of the reply.
    pub fn truncated_stream(provider: ProviderKind) -> Self {
        Self::transport(provider, STREAM_ENDED_EARLY)
    }

    pub fn malformed(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider,
            message: message.into(),
        }
    }

    pub fn missing_api_key(provider: ProviderKind) -> Self {
        Self::configuration(
            provider,
            format!(
                "no API key configured (set {} or add it to the config file)",
                provider.api_key_var()
            ),
        )
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Configuration { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Status { provider, .. }
            | Self::Malformed { provider, .. } => *provider,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }

    pub(crate) fn with_attempts(self, attempts: u32) -> Self {
        match self {
            Self::Transport {
                provider, message, ..
            } => Self::Transport {
                provider,
                message,
                attempts,
            },
            other => other,
        }
    }

    pub(crate) fn from_reqwest(provider: ProviderKind, err: &reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::malformed(provider, err.to_string());
        }
        let kind = if err.is_timeout() {
            "request timed out"
        } else if err.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Self::transport(provider, format!("{kind}: {err}"))
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { provider, message } => {
                write!(f, "{} is not configured: {message}", provider.display_name())
            }
            Self::Transport {
                provider,
                message,
                attempts,
            } => {
                let plural = if *attempts == 1 { "" } else { "s" };
                write!(
                    f,
                    "Could not reach {} after {attempts} attempt{plural}: {message}",
                    provider.display_name()
                )
            }
            Self::Status {
                provider,
                status,
                body,
            } => write!(
                f,
                "{} returned HTTP {status}\n{}",
                provider.display_name(),
                format_api_error(body)
            ),
            Self::Malformed { provider, message } => write!(
                f,
                "{} sent an unexpected response: {message}",
                provider.display_name()
            ),
        }
    }
}

impl std::error::Error for ProviderError {}
