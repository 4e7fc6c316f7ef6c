//! Item model and validation

use crate::{ItemSyncError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Minimum accepted item text length (in characters)
pub const MIN_TEXT_LEN: usize = 3;

/// Maximum accepted item text length (in characters)
pub const MAX_TEXT_LEN: usize = 200;

/// A versioned record of the shared collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Server-assigned id, or a provisional id while unsynced
    pub id: i64,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    /// Optimistic-concurrency token, bumped by the server on every update
    #[serde(default = "default_version")]
    pub version: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

fn default_version() -> i64 {
    1
}

impl Item {
    /// Apply a patch locally without touching the version.
    ///
    /// The server is the only party that increments versions.
    pub fn apply_patch(&mut self, patch: &ItemPatch) {
        self.text = patch.text.clone();
        self.completed = patch.completed;
        self.due_date = patch.due_date;
        self.updated_at = Utc::now();
    }

    pub fn is_provisional(&self) -> bool {
        crate::is_provisional_id(self.id)
    }
}

/// Payload for creating an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    pub text: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl ItemDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: false,
            due_date: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_item_text(&self.text)
    }
}

/// Payload for updating an item.
///
/// `version` is the last version the client has seen; the server rejects the
/// update when it is stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    pub text: String,

    pub completed: bool,

    pub version: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

impl ItemPatch {
    /// Patch that keeps every field of `item` as is
    pub fn from_item(item: &Item) -> Self {
        Self {
            text: item.text.clone(),
            completed: item.completed,
            version: item.version,
            due_date: item.due_date,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_item_text(&self.text)
    }
}

/// One page of the remote collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemsPage {
    pub items: Vec<Item>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

/// Query filter for the remote collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFilter {
    /// Free-text search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<NaiveDate>,
}

impl ItemFilter {
    /// Whether `item` passes every active criterion
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(ref text) = self.text {
            if !item.text.to_lowercase().contains(&text.to_lowercase()) {
                return false;
            }
        }
        if let Some(completed) = self.completed {
            if item.completed != completed {
                return false;
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(due) = item.due_date else {
                return false;
            };
            if self.date_from.is_some_and(|from| due < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| due > to) {
                return false;
            }
        }
        true
    }
}

/// Check item text against the length rules
pub fn validate_item_text(text: &str) -> Result<()> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ItemSyncError::ValidationError(
            "Text is required".to_string(),
        ));
    }
    let len = trimmed.chars().count();
    if len < MIN_TEXT_LEN {
        return Err(ItemSyncError::ValidationError(format!(
            "Text must be at least {} characters",
            MIN_TEXT_LEN
        )));
    }
    if len > MAX_TEXT_LEN {
        return Err(ItemSyncError::ValidationError(format!(
            "Text must be at most {} characters",
            MAX_TEXT_LEN
        )));
    }
    Ok(())
}
