//! NGA forum pages: GBK bodies, guest-token priming, `__PAGE` pagination table.

use std::sync::LazyLock;

use regex::Regex;

use super::{Extraction, Forum, compile_static_regex, first_capture, parse_count};

/// Cookie carrying the guest token on the real request.
pub(crate) const GUEST_COOKIE: &str = "guestJs";

static GUEST_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"guestJs=(\d+)"));

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"<title>(.+?)</title>"));

// `var __PAGE = {0:'/read.php?tid=1',1:82,...}`: the first numeric slot is the page count.
static PAGE_COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"__PAGE.+?,\d+:(\d*)"));

/// Finds the guest token in a priming response body.
pub(crate) fn guest_token(body: &str) -> Option<&str> {
    first_capture(&GUEST_TOKEN_RE, body)
}

/// Extracts the thread title and page count from a decoded page.
pub(crate) fn extract(text: &str) -> Extraction {
    let title = first_capture(&TITLE_RE, text).unwrap_or_default().to_string();
    let total_page_count = first_capture(&PAGE_COUNT_RE, text).map_or(0, parse_count);
    Extraction::classify(Forum::Nga, title, total_page_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{MissingField, PageInfo};

    const THREAD_PAGE: &str = r"
	<meta name='keywords' content=''>
	<title>[安科/安价] [原创] 我的女友是黄油女主这件事(心：女同竟在我身边) NGA玩家社区</title>
	<script type='text/javascript'>
		//loadscriptstart
var __CURRENT_UID = parseInt('',10),
class='pager_spacer'>下一页(23)</a><span id='pageBtnHere' class='x'></span>
<script>
	var __PAGE = {0:'/read.php?tid=29824736',1:82,2:22,3:20};commonui.pageBtn(document.getElementById('pageBtnHere').parentNode,__PAGE,true)

	class='pager_spacer'>下一页(23)</a><span id='pageBtnHere' class='x'></span>
<script>
	var __PAGE = {0:'/read.php?tid=29824736',1:82,2:22,3:20};commonui.pageBtn(document.getElementById('pageBtnHere').parentNode,__PAGE,true)
";

    #[test]
    fn test_extract_thread_page_complete() {
        assert_eq!(
            extract(THREAD_PAGE),
            Extraction::Complete(PageInfo {
                title: "[安科/安价] [原创] 我的女友是黄油女主这件事(心：女同竟在我身边) NGA玩家社区"
                    .to_string(),
                total_page_count: 82,
            })
        );
    }

    #[test]
    fn test_extract_without_pagination_is_degraded() {
        let extraction = extract("<html><title>T</title></html>");
        assert_eq!(
            extraction,
            Extraction::Degraded {
                info: PageInfo {
                    title: "T".to_string(),
                    total_page_count: 0,
                },
                missing: MissingField::TotalPageCount,
            }
        );
    }

    #[test]
    fn test_extract_empty_page_slot_counts_as_missing() {
        let extraction = extract("<title>T</title> var __PAGE = {0:'/read.php',1:};");
        assert!(matches!(
            extraction,
            Extraction::Degraded {
                missing: MissingField::TotalPageCount,
                ..
            }
        ));
    }

    #[test]
    fn test_extract_without_markers_fails() {
        assert!(matches!(extract("<html></html>"), Extraction::Failed(_)));
    }

    #[test]
    fn test_guest_token_found_in_script() {
        let body = "<script>document.cookie='guestJs=1700000000;path=/'</script>";
        assert_eq!(guest_token(body), Some("1700000000"));
        assert_eq!(guest_token("<html></html>"), None);
    }
}
