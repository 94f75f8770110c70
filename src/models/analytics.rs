use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A `key=value` token from a filters or custom-event header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Summary of one search hit: id, type and the source serialized to a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

/// Document persisted per captured search or follow-up event.
///
/// Follow-up events (click, conversion) reuse the search id of the original
/// search and are merged into its document, so they leave the search-only
/// fields unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub took: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits_in_response: Option<Vec<HitSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_filters: Option<Vec<KeyValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_events: Option<Vec<KeyValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AnalyticsRecord {
    /// Overwrite fields that `other` sets, keeping the rest.
    pub fn merge(&mut self, other: AnalyticsRecord) {
        fn keep<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        keep(&mut self.took, other.took);
        keep(&mut self.indices, other.indices);
        keep(&mut self.search_query, other.search_query);
        keep(&mut self.hits_in_response, other.hits_in_response);
        keep(&mut self.total_hits, other.total_hits);
        keep(&mut self.search_filters, other.search_filters);
        keep(&mut self.ip, other.ip);
        keep(&mut self.location, other.location);
        keep(&mut self.country, other.country);
        keep(&mut self.click, other.click);
        keep(&mut self.click_position, other.click_position);
        keep(&mut self.conversion, other.conversion);
        keep(&mut self.custom_events, other.custom_events);
        keep(&mut self.timestamp, other.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_fields_are_not_serialized() {
        let record = AnalyticsRecord {
            click: Some(false),
            ..AnalyticsRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap_or_default();
        assert_eq!(json, serde_json::json!({ "click": false }));
    }

    #[test]
    fn test_hit_summary_uses_type_key() {
        let hit = HitSummary {
            id: "1".into(),
            doc_type: "_doc".into(),
            source: "{}".into(),
        };
        let json = serde_json::to_value(&hit).unwrap_or_default();
        assert_eq!(json["type"], "_doc");
    }
}
