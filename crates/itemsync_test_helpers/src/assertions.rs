//! Output predicates for ItemSync tests

use predicates::prelude::*;

/// First id this client may hand out for an unsynced item
const PROVISIONAL_ID_THRESHOLD: u64 = 1_000_000_000_000;

/// Stderr contains none of `values`
pub fn stderr_not_contains(values: &[&str]) -> impl Predicate<str> {
    let owned_values: Vec<String> = values.iter().map(|&s| s.to_string()).collect();
    predicate::function(move |s: &str| !owned_values.iter().any(|v| s.contains(v.as_str())))
}

/// Output mentions a client-assigned (provisional) item id
///
/// ```rust
/// use itemsync_test_helpers::assertions::contains_provisional_id;
/// use predicates::prelude::*;
///
/// assert!(contains_provisional_id().eval("✓ Queued item 1767225600000"));
/// assert!(!contains_provisional_id().eval("✓ Created item 42"));
/// ```
pub fn contains_provisional_id() -> impl Predicate<str> {
    predicate::function(|s: &str| {
        s.split(|c: char| !c.is_ascii_digit())
            .filter_map(|digits| digits.parse::<u64>().ok())
            .any(|n| n >= PROVISIONAL_ID_THRESHOLD)
    })
}
