//! Just enough of the search response shape to summarise it.
//!
//! Backend field names with a leading underscore (`_id`, `_type`, `_source`)
//! are accepted alongside their bare forms.

use serde::Deserialize;
use serde_json::Value;

use crate::models::HitSummary;

/// Hits kept per analytics record.
pub const MAX_RECORDED_HITS: usize = 10;

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub took: f64,
    #[serde(default)]
    pub hits: Hits,
}

#[derive(Debug, Default, Deserialize)]
pub struct Hits {
    #[serde(default)]
    pub total: Option<Total>,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// `hits.total` is a bare number on older clusters and `{ "value": n }` on newer ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Total {
    Count(u64),
    Object { value: u64 },
}

impl Total {
    pub fn value(self) -> u64 {
        match self {
            Total::Count(n) | Total::Object { value: n } => n,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    #[serde(rename = "_type", alias = "type", default)]
    pub doc_type: String,
    #[serde(rename = "_source", alias = "source", default)]
    pub source: Value,
}

#[derive(Debug, Deserialize)]
struct MultiSearchResponse {
    #[serde(default)]
    responses: Vec<SearchResponse>,
}

/// Parse a search body. For a multi-search envelope only the first
/// sub-response is kept; an empty envelope yields an empty response.
pub fn parse_search_response(
    body: &[u8],
    multi: bool,
) -> Result<SearchResponse, serde_json::Error> {
    if multi {
        let envelope: MultiSearchResponse = serde_json::from_slice(body)?;
        Ok(envelope.responses.into_iter().next().unwrap_or_default())
    } else {
        serde_json::from_slice(body)
    }
}

impl SearchResponse {
    pub fn total_hits(&self) -> u64 {
        self.hits.total.map_or(0, Total::value)
    }

    /// The first [`MAX_RECORDED_HITS`] hits with their sources serialized.
    pub fn top_hits(&self) -> Vec<HitSummary> {
        self.hits
            .hits
            .iter()
            .take(MAX_RECORDED_HITS)
            .map(|hit| HitSummary {
                id: hit.id.clone(),
                doc_type: hit.doc_type.clone(),
                source: hit.source.to_string(),
            })
            .collect()
    }
}
