//! Common types and errors for ItemSync
//!
//! This crate provides the data model shared by the sync engine, the
//! configuration loader and the CLI: items, pending operations, session
//! records and the client-side validation rules.

pub mod item;
pub mod operation;
pub mod sanitizer;
pub mod session;
pub mod telemetry;

pub use item::{
    validate_item_text, Item, ItemDraft, ItemFilter, ItemPatch, ItemsPage, MAX_TEXT_LEN,
    MIN_TEXT_LEN,
};
pub use operation::{OperationKind, OperationSnapshot, PendingOperation};
pub use session::{validate_registration, AuthResponse, Registration, User};

use thiserror::Error;

/// Core error types shared across ItemSync crates
#[derive(Error, Debug)]
pub enum ItemSyncError {
    #[error("Invalid input: {0}")]
    ValidationError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ItemSyncError>;

/// Identifiers at or above this value are client-generated (provisional).
///
/// Provisional ids are derived from wall-clock milliseconds, which are already
/// past 10^12, so they never collide with server-assigned ids.
pub const PROVISIONAL_ID_THRESHOLD: i64 = 1_000_000_000_000;

/// Returns true when `id` was synthesized by the client and has not been
/// confirmed by the server yet.
pub fn is_provisional_id(id: i64) -> bool {
    id >= PROVISIONAL_ID_THRESHOLD
}

/// Exit code constants
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_CONFIG_ERROR: i32 = 101;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_threshold() {
        assert!(!is_provisional_id(1));
        assert!(!is_provisional_id(999_999_999_999));
        assert!(is_provisional_id(PROVISIONAL_ID_THRESHOLD));
        assert!(is_provisional_id(1_730_000_000_000));
    }
}
