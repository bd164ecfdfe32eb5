// ABOUTME: Normalizes chat tokens into bare endpoint and channel identifiers
// ABOUTME: Strips Slack link decoration such as <http://host|host>

/// Link openers Slack wraps around auto-linked text
const LINK_PREFIXES: [&str; 3] = ["<http://", "<https://", "<mailto:"];

/// Reduce a raw chat token to the bare identifier.
///
/// Tokens without a `|` are returned unchanged. Otherwise everything from the
/// first `|` on is dropped along with the link opener, so
/// `<http://redis.local:6379|redis.local:6379>` becomes `redis.local:6379`.
pub fn sanitize_token(raw: &str) -> String {
    let Some((head, _)) = raw.split_once('|') else {
        return raw.to_string();
    };

    let mut bare = head.to_string();
    for prefix in LINK_PREFIXES {
        bare = bare.replace(prefix, "");
    }
    match bare.strip_prefix('<') {
        Some(rest) => rest.to_string(),
        None => bare,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_http_link_decoration() {
        assert_eq!(
            sanitize_token("<http://redis.local:6379|redis.local:6379>"),
            "redis.local:6379"
        );
    }

    #[test]
    fn test_plain_token_unchanged() {
        assert_eq!(sanitize_token("redis.local:6379"), "redis.local:6379");
        assert_eq!(sanitize_token("<http://no-pipe>"), "<http://no-pipe>");
        assert_eq!(sanitize_token(""), "");
    }

    #[test]
    fn test_strips_trailing_suffix() {
        assert_eq!(sanitize_token("news|extra"), "news");
    }

    #[test]
    fn test_other_link_kinds() {
        assert_eq!(sanitize_token("<https://cache:6380|cache:6380>"), "cache:6380");
        assert_eq!(sanitize_token("<#C024BE7LR|general>"), "#C024BE7LR");
    }
}
