//! Search signal headers sent by clients alongside search requests.

use axum::http::HeaderMap;
use tracing::warn;

use crate::models::KeyValue;

pub const SEARCH_QUERY_HEADER: &str = "x-search-query";
pub const SEARCH_ID_HEADER: &str = "x-search-id";
pub const SEARCH_FILTERS_HEADER: &str = "x-search-filters";
pub const SEARCH_CLICK_HEADER: &str = "x-search-click";
pub const SEARCH_CLICK_POSITION_HEADER: &str = "x-search-click-position";
pub const SEARCH_CONVERSION_HEADER: &str = "x-search-conversion";
pub const SEARCH_CUSTOM_EVENT_HEADER: &str = "x-search-custom-event";

/// Raw values of the signal headers present on a request.
///
/// Values are kept unparsed so the request path does no work beyond copying
/// them; parsing happens during background enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalHeaders {
    pub query: Option<String>,
    pub search_id: Option<String>,
    pub filters: Option<String>,
    pub click: Option<String>,
    pub click_position: Option<String>,
    pub conversion: Option<String>,
    pub custom_events: Option<String>,
}

impl SignalHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            query: get(SEARCH_QUERY_HEADER),
            search_id: get(SEARCH_ID_HEADER),
            filters: get(SEARCH_FILTERS_HEADER),
            click: get(SEARCH_CLICK_HEADER),
            click_position: get(SEARCH_CLICK_POSITION_HEADER),
            conversion: get(SEARCH_CONVERSION_HEADER),
            custom_events: get(SEARCH_CUSTOM_EVENT_HEADER),
        }
    }

    /// Whether the request carries a query or refers to an earlier search.
    pub fn is_tracked(&self) -> bool {
        self.query.is_some() || self.search_id.is_some()
    }
}

/// Parse `key=value[,key=value...]`. A token that does not split into exactly
/// two parts on `=` is logged and skipped.
pub fn parse_key_values(raw: &str, header: &str) -> Vec<KeyValue> {
    raw.split(',')
        .filter_map(|token| {
            let parts: Vec<&str> = token.trim().split('=').collect();
            match parts.as_slice() {
                [key, value] => Some(KeyValue::new(*key, *value)),
                _ => {
                    warn!(token, header, "Skipping malformed key=value token");
                    None
                }
            }
        })
        .collect()
}

/// Boolean in the spellings clients commonly send: `1`, `t`, `true` and their
/// negations, in lower, upper or title case.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_malformed_token_is_skipped() {
        let parsed = parse_key_values("a=b,bad", SEARCH_FILTERS_HEADER);
        assert_eq!(parsed, vec![KeyValue::new("a", "b")]);

        let parsed = parse_key_values("brand=acme, color=red,x=y=z,=", SEARCH_FILTERS_HEADER);
        assert_eq!(
            parsed,
            vec![
                KeyValue::new("brand", "acme"),
                KeyValue::new("color", "red"),
                KeyValue::new("", "")
            ]
        );
    }

    #[test]
    fn test_parse_bool_spellings() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
        assert_eq!(parse_bool("tRuE"), None);
    }

    #[test]
    fn test_signal_headers() {
        let mut headers = HeaderMap::new();
        assert!(!SignalHeaders::from_headers(&headers).is_tracked());

        headers.insert(SEARCH_ID_HEADER, HeaderValue::from_static("abc"));
        headers.insert(SEARCH_QUERY_HEADER, HeaderValue::from_static(""));
        headers.insert(SEARCH_CLICK_HEADER, HeaderValue::from_static("true"));
        let signals = SignalHeaders::from_headers(&headers);
        assert!(signals.is_tracked());
        assert_eq!(signals.search_id.as_deref(), Some("abc"));
        assert!(signals.query.is_none());
        assert_eq!(signals.click.as_deref(), Some("true"));
    }
}
