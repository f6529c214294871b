//! Content moderation seam.
//!
//! Moderation rules are managed outside this core; delivery only consumes a
//! synchronous transform applied to content before it reaches a recipient.
//! A failing hook never blocks delivery, it only affects displayed content.

use tracing::warn;

/// Optional transform applied to message content on the delivery and
/// retrieval paths.
pub trait ContentFilter: Send + Sync {
    fn transform(&self, content: &str) -> anyhow::Result<String>;
}

/// Default hook: content passes through untouched.
#[derive(Debug, Default, Clone)]
pub struct PassthroughFilter;

impl ContentFilter for PassthroughFilter {
    fn transform(&self, content: &str) -> anyhow::Result<String> {
        Ok(content.to_string())
    }
}

/// Apply the hook, falling back to the original content on failure.
pub fn apply_filter(filter: &dyn ContentFilter, content: &str) -> String {
    match filter.transform(content) {
        Ok(filtered) => filtered,
        Err(error) => {
            warn!(%error, "content filter failed, delivering original content");
            content.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingFilter;

    impl ContentFilter for FailingFilter {
        fn transform(&self, _content: &str) -> anyhow::Result<String> {
            anyhow::bail!("moderation backend unavailable")
        }
    }

    struct RedactingFilter;

    impl ContentFilter for RedactingFilter {
        fn transform(&self, content: &str) -> anyhow::Result<String> {
            Ok(content.replace("secret", "******"))
        }
    }

    #[test]
    fn passthrough_returns_content_unchanged() {
        assert_eq!(apply_filter(&PassthroughFilter, "hello"), "hello");
    }

    #[test]
    fn transform_is_applied_when_hook_succeeds() {
        assert_eq!(apply_filter(&RedactingFilter, "the secret plan"), "the ****** plan");
    }

    #[test]
    fn hook_failure_never_blocks_delivery() {
        assert_eq!(apply_filter(&FailingFilter, "hello"), "hello");
    }
}
