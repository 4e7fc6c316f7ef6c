//! Pending operation model

use crate::{Item, ItemDraft, ItemPatch, ItemSyncError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = ItemSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(ItemSyncError::ValidationError(format!(
                "Unknown operation type: {}",
                other
            ))),
        }
    }
}

/// Partial item snapshot, enough to replay the operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    /// Target item id (the provisional id for creates)
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

/// A queued intention to mutate the remote collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: OperationKind,

    pub item: OperationSnapshot,

    pub timestamp: DateTime<Utc>,
}

impl PendingOperation {
    fn with_snapshot(kind: OperationKind, item: OperationSnapshot) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            item,
            timestamp: Utc::now(),
        }
    }

    /// Queue the creation of a provisional item
    pub fn create(provisional: &Item) -> Self {
        Self::with_snapshot(
            OperationKind::Create,
            OperationSnapshot {
                id: provisional.id,
                text: Some(provisional.text.clone()),
                completed: Some(provisional.completed),
                due_date: provisional.due_date,
                version: None,
            },
        )
    }

    /// Queue an update carrying the last version known to the client
    pub fn update(id: i64, patch: &ItemPatch) -> Self {
        Self::with_snapshot(
            OperationKind::Update,
            OperationSnapshot {
                id,
                text: Some(patch.text.clone()),
                completed: Some(patch.completed),
                due_date: patch.due_date,
                version: Some(patch.version),
            },
        )
    }

    pub fn delete(id: i64) -> Self {
        Self::with_snapshot(
            OperationKind::Delete,
            OperationSnapshot {
                id,
                text: None,
                completed: None,
                due_date: None,
                version: None,
            },
        )
    }

    /// Check that the snapshot carries what replaying this kind needs
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ItemSyncError::ValidationError(
                "Operation id cannot be empty".to_string(),
            ));
        }
        match self.kind {
            OperationKind::Create => {
                self.text_or_err()?;
            }
            OperationKind::Update => {
                self.text_or_err()?;
                if self.item.version.is_none() {
                    return Err(ItemSyncError::ValidationError(
                        "Update operation requires a version".to_string(),
                    ));
                }
            }
            OperationKind::Delete => {}
        }
        Ok(())
    }

    fn text_or_err(&self) -> Result<&str> {
        self.item.text.as_deref().ok_or_else(|| {
            ItemSyncError::ValidationError(format!("{} operation requires text", self.kind))
        })
    }

    /// Rebuild the creation payload of a queued create
    pub fn draft(&self) -> Option<ItemDraft> {
        Some(ItemDraft {
            text: self.item.text.clone()?,
            completed: self.item.completed.unwrap_or(false),
            due_date: self.item.due_date,
        })
    }

    /// Rebuild the update payload of a queued update
    pub fn patch(&self) -> Option<ItemPatch> {
        Some(ItemPatch {
            text: self.item.text.clone()?,
            completed: self.item.completed.unwrap_or(false),
            version: self.item.version?,
            due_date: self.item.due_date,
        })
    }
}
