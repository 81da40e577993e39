//! Index name extraction
//!
//! Elasticsearch does not report the source index of a reindex task as a
//! structured field. It is only present in the free-text task description,
//! which looks like:
//!
//! ```text
//! reindex from [staging-index-6d06] to [staging-index-6d06-new1]
//! ```

use once_cell::sync::Lazy;
use regex::Regex;

static DESCRIPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"reindex from \[([^\]]*)(?s:.*?)\] to ").expect("Invalid regex pattern provided")
});

/// Extract the source index name from a reindex task description.
///
/// The description must contain `reindex from [`, then any text, then `] to `.
/// The name is the text between that `[` and the first `]` after it. Returns
/// `None` when the description does not have this shape.
#[must_use]
pub fn index_name(description: &str) -> Option<&str> {
    DESCRIPTION_RE
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
