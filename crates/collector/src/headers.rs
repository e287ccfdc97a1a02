//! Header map helpers.

use crate::protocol::Headers;

/// Lowercases every header name so later lookups and filtering are
/// case-insensitive. Last write wins on case-only duplicates.
pub fn normalize_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .map(|(name, value)| (name.to_lowercase(), value.clone()))
        .collect()
}

/// Keeps only the allow-listed header names. Expects `headers` normalized
/// and `allowed` lowercased.
pub fn filter_headers(headers: &Headers, allowed: &[String]) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| allowed.iter().any(|allow| allow == *name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn normalize_lowercases_names() {
        let normalized = normalize_headers(&headers(&[("ETag", "x"), ("Set-Cookie", "y")]));
        assert_eq!(normalized.get("etag").map(String::as_str), Some("x"));
        assert_eq!(normalized.get("set-cookie").map(String::as_str), Some("y"));
        assert!(!normalized.contains_key("ETag"));
    }

    #[test]
    fn filter_keeps_only_allow_listed_names() {
        let normalized = normalize_headers(&headers(&[("ETag", "x"), ("Set-Cookie", "y")]));
        let filtered = filter_headers(&normalized, &["etag".to_string()]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.get("etag").map(String::as_str), Some("x"));
    }
}
