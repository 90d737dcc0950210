//! Cache key validation.

use crate::constants::key::{KEY_PATTERN, MAX_KEY_LENGTH};
use crate::error::{Error, ValidationError};
use regex::Regex;
use std::sync::OnceLock;

static PATTERN: OnceLock<Regex> = OnceLock::new();

fn compiled_key_pattern() -> &'static Regex {
    PATTERN.get_or_init(|| Regex::new(KEY_PATTERN).expect("key pattern is valid"))
}

/// A validated, opaque cache key.
///
/// Keys are non-empty, at most [`MAX_KEY_LENGTH`] characters, and restricted to
/// `[A-Za-z0-9:_-]`. `Key` is cheap to clone and compares/hashes like the string it wraps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Validate and wrap `raw` as a [`Key`].
    pub fn new(raw: impl Into<String>) -> Result<Self, Error> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ValidationError::InvalidKey {
                key: raw,
                reason: "key must not be empty".to_string(),
            }
            .into());
        }
        if raw.len() > MAX_KEY_LENGTH {
            return Err(ValidationError::InvalidKey {
                key: raw,
                reason: format!("key exceeds {MAX_KEY_LENGTH} characters"),
            }
            .into());
        }
        if !compiled_key_pattern().is_match(&raw) {
            return Err(ValidationError::InvalidKey {
                key: raw,
                reason: format!("key must match pattern {KEY_PATTERN}"),
            }
            .into());
        }
        Ok(Self(raw))
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` starts with `prefix`, used by `invalidateWithPrefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_key() {
        assert!(Key::new("users:42").is_ok());
        assert!(Key::new("a-b_c:1").is_ok());
    }

    #[test]
    fn rejects_empty_key() {
        assert!(Key::new("").is_err());
    }

    #[test]
    fn rejects_key_over_max_length() {
        let long = "a".repeat(MAX_KEY_LENGTH + 1);
        assert!(Key::new(long).is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(Key::new("users/42").is_err());
        assert!(Key::new("users 42").is_err());
    }

    #[test]
    fn starts_with_prefix() {
        let key = Key::new("users:42").unwrap();
        assert!(key.starts_with("users:"));
        assert!(!key.starts_with("posts:"));
    }
}
