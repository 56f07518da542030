use regex::Regex;
use std::sync::OnceLock;

/// 卡密固定为 12 位字母数字。
const CODE_PATTERN: &str = "[A-Za-z0-9]{12}";

fn code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CODE_PATTERN).expect("static pattern"))
}

/// Pulls the activation code out of a join-request comment: the first
/// contiguous run of 12 ASCII alphanumerics, scanning left to right.
///
/// A comment with several 12-char runs yields the earliest one; the remote
/// service decides whether it is actually a code.
pub fn extract_code(comment: &str) -> Option<&str> {
    code_regex().find(comment).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_code_in_surrounding_text() {
        assert_eq!(
            extract_code("apply ABCDEFG12345 please"),
            Some("ABCDEFG12345")
        );
    }

    #[test]
    fn bare_code() {
        assert_eq!(extract_code("x9K2mQ7pL0aB"), Some("x9K2mQ7pL0aB"));
    }

    #[test]
    fn no_code_yields_none() {
        assert_eq!(extract_code("no code here"), None);
        assert_eq!(extract_code(""), None);
        assert_eq!(extract_code("short ABC123"), None);
    }

    #[test]
    fn first_match_wins() {
        assert_eq!(
            extract_code("AAAAAAAAAAAA then BBBBBBBBBBBB"),
            Some("AAAAAAAAAAAA")
        );
    }

    #[test]
    fn longer_run_still_matches_prefix() {
        // 13+ alphanumerics: the regex takes the first 12 of the run.
        assert_eq!(extract_code("ABCDEFG123456"), Some("ABCDEFG12345"));
    }

    #[test]
    fn non_ascii_does_not_count() {
        assert_eq!(extract_code("码ABCDEF123456码"), Some("ABCDEF123456"));
        assert_eq!(extract_code("全是中文没有卡密"), None);
    }
}
