//! Error types for page fetching and extraction.

use thiserror::Error;

/// Errors that end an extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The record's source type has no extractor.
    #[error(
        "no extractor for source type '{source_type}'\n  Suggestion: Supported source types are 'nga' and 'tieba'"
    )]
    UnsupportedSourceType {
        /// The unrecognised tag.
        source_type: String,
    },

    /// The page could not be fetched.
    #[error("failed to fetch {url}: {message}")]
    Fetch {
        /// The URL being fetched.
        url: String,
        /// Transport or status detail.
        message: String,
    },

    /// The body could not be decoded with the forum's charset.
    #[error("body of {url} is not valid {charset}")]
    Encoding {
        /// The URL whose body failed to decode.
        url: String,
        /// Expected charset label.
        charset: &'static str,
    },

    /// Neither the title nor the page count was found.
    #[error("no title or page count found in {forum} page")]
    PatternNotFound {
        /// Forum tag of the page.
        forum: &'static str,
    },
}

impl ExtractError {
    /// Creates an `UnsupportedSourceType` error.
    #[must_use]
    pub fn unsupported(source_type: &str) -> Self {
        Self::UnsupportedSourceType {
            source_type: source_type.to_string(),
        }
    }

    /// Creates a `Fetch` error.
    #[must_use]
    pub fn fetch(url: &str, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_source_type_message_has_suggestion() {
        let msg = ExtractError::unsupported("weibo").to_string();
        assert!(msg.contains("'weibo'"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_fetch_error_message() {
        let err = ExtractError::fetch("https://bbs.example/1", "HTTP 503");
        assert_eq!(err.to_string(), "failed to fetch https://bbs.example/1: HTTP 503");
    }
}
