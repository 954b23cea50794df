//! Per-forum page fetching and field extraction.
//!
//! A record's `source_type` selects a [`Forum`]. The [`Crawler`] prepares the
//! forum's request, fetches the page, decodes it with the forum's [`Charset`]
//! and runs the forum's patterns, producing a three-valued [`Extraction`].
//!
//! # Example
//!
//! ```ignore
//! use history_refresh::extract::{CrawlOptions, Crawler, Extraction, Forum};
//!
//! let crawler = Crawler::new(&CrawlOptions::default())?;
//! let forum: Forum = "tieba".parse()?;
//! match crawler.crawl(forum, "https://tieba.example/p/1").await {
//!     Extraction::Complete(info) => println!("{} ({} pages)", info.title, info.total_page_count),
//!     Extraction::Degraded { info, missing } => println!("partial {info:?}, missing {missing}"),
//!     Extraction::Failed(error) => eprintln!("{error}"),
//! }
//! ```

mod crawler;
mod error;
mod http;
mod nga;
mod tieba;

pub use crawler::{CrawlOptions, Crawler};
pub use error::ExtractError;

use std::fmt;
use std::str::FromStr;

use regex::Regex;

/// Supported forums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Forum {
    /// NGA: GBK pages behind a guest-token check.
    Nga,
    /// Baidu Tieba: UTF-8 pages.
    Tieba,
}

impl Forum {
    /// Returns the `source_type` tag for this forum.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nga => "nga",
            Self::Tieba => "tieba",
        }
    }

    /// Returns the charset the forum serves pages in.
    #[must_use]
    pub fn charset(&self) -> Charset {
        match self {
            Self::Nga => Charset::Gbk,
            Self::Tieba => Charset::Utf8,
        }
    }

    /// Runs the forum's patterns over a decoded page.
    #[must_use]
    pub fn extract(&self, text: &str) -> Extraction {
        match self {
            Self::Nga => nga::extract(text),
            Self::Tieba => tieba::extract(text),
        }
    }
}

impl fmt::Display for Forum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Forum {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nga" => Ok(Self::Nga),
            "tieba" => Ok(Self::Tieba),
            _ => Err(ExtractError::unsupported(s)),
        }
    }
}

/// Page body encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// UTF-8; invalid sequences are replaced.
    Utf8,
    /// GBK; invalid sequences fail the decode.
    Gbk,
}

impl Charset {
    /// Returns the charset label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Gbk => "GBK",
        }
    }

    /// Decodes a body to UTF-8 text.
    ///
    /// Returns `None` when a GBK body contains malformed sequences.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Self::Utf8 => Some(String::from_utf8_lossy(bytes).into_owned()),
            Self::Gbk => encoding_rs::GBK
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(std::borrow::Cow::into_owned),
        }
    }
}

/// Fields recovered from a thread page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// Thread title; empty when not found.
    pub title: String,
    /// Total number of pages; zero when not found.
    pub total_page_count: u32,
}

/// The field a degraded extraction could not recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    /// No title found.
    Title,
    /// No usable page count found.
    TotalPageCount,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Title => f.write_str("title"),
            Self::TotalPageCount => f.write_str("total_page_count"),
        }
    }
}

/// Outcome of crawling one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Both fields recovered.
    Complete(PageInfo),
    /// Exactly one field recovered; the other is empty or zero in `info`.
    Degraded {
        /// Partially filled fields.
        info: PageInfo,
        /// The field that was not found.
        missing: MissingField,
    },
    /// Nothing usable; the record must not be updated.
    Failed(ExtractError),
}

impl Extraction {
    /// Classifies raw extracted fields. An empty title or a zero count is missing.
    #[must_use]
    pub fn classify(forum: Forum, title: String, total_page_count: u32) -> Self {
        let info = PageInfo {
            title,
            total_page_count,
        };
        match (info.title.is_empty(), info.total_page_count == 0) {
            (true, true) => Self::Failed(ExtractError::PatternNotFound {
                forum: forum.as_str(),
            }),
            (true, false) => Self::Degraded {
                info,
                missing: MissingField::Title,
            },
            (false, true) => Self::Degraded {
                info,
                missing: MissingField::TotalPageCount,
            },
            (false, false) => Self::Complete(info),
        }
    }
}

/// Compiles a regex literal known to be valid.
///
/// # Panics
///
/// Panics if `pattern` is invalid; only used with static literals.
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Returns capture group 1 of the first match.
pub(crate) fn first_capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parses a captured count; empty or out-of-range values count as zero.
pub(crate) fn parse_count(raw: &str) -> u32 {
    raw.parse().unwrap_or(0)
}
