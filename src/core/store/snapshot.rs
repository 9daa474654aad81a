//! Export/import document: `{"chats": [...], "activeChat": id|null, "exportDate": iso}`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::conversation::Conversation;
use crate::core::persistence::is_valid_id;
use crate::core::store::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub chats: Vec<Conversation>,
    #[serde(default)]
    pub active_chat: Option<String>,
    #[serde(default)]
    pub export_date: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| StoreError::Validation(format!("could not serialize export: {err}")))
    }

    /// Parse and validate an export document. The top level must be an object
    /// whose `chats` is an array.
    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| StoreError::Validation(format!("not valid JSON: {err}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let Some(object) = value.as_object() else {
            return Err(StoreError::Validation(
                "expected a JSON object at the top level".to_string(),
            ));
        };
        match object.get("chats") {
            Some(Value::Array(_)) => {}
            Some(_) => {
                return Err(StoreError::Validation("\"chats\" must be an array".to_string()))
            }
            None => return Err(StoreError::Validation("missing \"chats\" array".to_string())),
        }
        let snapshot: Snapshot = serde_json::from_value(value)
            .map_err(|err| StoreError::Validation(format!("malformed conversation: {err}")))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for chat in &self.chats {
            if !is_valid_id(&chat.id) {
                return Err(StoreError::Validation(format!(
                    "invalid conversation id {:?}",
                    chat.id
                )));
            }
            if !seen.insert(chat.id.as_str()) {
                return Err(StoreError::Validation(format!(
                    "duplicate conversation id {}",
                    chat.id
                )));
            }
        }
        Ok(())
    }

    /// The designated active conversation if it is present, else the first.
    pub fn resolved_active(&self) -> Option<&str> {
        self.active_chat
            .as_deref()
            .filter(|id| self.chats.iter().any(|chat| chat.id == *id))
            .or_else(|| self.chats.first().map(|chat| chat.id.as_str()))
    }
}
