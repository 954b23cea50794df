//! Tieba thread pages: UTF-8 bodies, inline JSON page data.

use std::sync::LazyLock;

use regex::Regex;

use super::{Extraction, Forum, compile_static_regex, first_capture, parse_count};

/// Prefix tieba puts on titles of reply pages.
const REPLY_PREFIX: &str = "回复：";

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r#"title:.?"(.+?)""#));

static TOTAL_PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#""total_page":(\d+)"#));

/// Extracts the thread title and page count from a page.
///
/// The page reports the count for anonymous viewers; authenticated viewers
/// see twice as many posts per page, so the stored count is halved, rounding
/// up so a one-page thread keeps a count of 1.
pub(crate) fn extract(text: &str) -> Extraction {
    let title = first_capture(&TITLE_RE, text).unwrap_or_default();
    let title = title.strip_prefix(REPLY_PREFIX).unwrap_or(title).to_string();
    let total_page_count = first_capture(&TOTAL_PAGE_RE, text)
        .map_or(0, parse_count)
        .div_ceil(2);
    Extraction::classify(Forum::Tieba, title, total_page_count)
}
