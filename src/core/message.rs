use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::usage::TokenUsage;
use crate::utils::ids::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }

    pub fn is_system(self) -> bool {
        self == Role::System
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// One transcript entry.
///
/// Assistant replies start as a placeholder (`is_loading`, empty content) and
/// end either complete (`token_usage` may be set) or errored (`error` set).
/// Updates return a new value; once a message stops loading its content no
/// longer changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            is_loading: false,
            error: None,
            token_usage: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn placeholder() -> Self {
        Self {
            is_loading: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    pub fn is_system(&self) -> bool {
        self.role.is_system()
    }

    pub fn is_pending(&self) -> bool {
        self.is_loading
    }

    /// Replace accumulated content while still loading; no-op otherwise.
    pub fn with_progress(mut self, content: impl Into<String>) -> Self {
        if self.is_loading {
            self.content = content.into();
        }
        self
    }

    pub fn completed(mut self, content: impl Into<String>, usage: Option<TokenUsage>) -> Self {
        if self.is_loading {
            self.content = content.into();
            self.token_usage = usage;
            self.is_loading = false;
        }
        self
    }

    pub fn failed(mut self, content: impl Into<String>, error: impl Into<String>) -> Self {
        if self.is_loading {
            self.content = content.into();
            self.error = Some(error.into());
            self.is_loading = false;
        }
        self
    }
}
