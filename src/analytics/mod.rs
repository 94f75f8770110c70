//! Search analytics capture.
//!
//! [`AnalyticsRecorder`] wraps the rest of the chain for search requests that
//! carry a query or an existing search id:
//!
//! 1. the inner chain answers into a buffered response
//! 2. the buffer goes back to the client unchanged, plus `X-Search-Id`
//! 3. a detached task parses a copy of the buffer, enriches it and upserts
//!    the record under the search id
//!
//! Step 3 runs on the shared [`TaskTracker`]; the client never waits for it
//! and nothing it does can touch the bytes already returned. Responses known
//! to exceed the recorder's size cap are relayed as they are, unrecorded.

mod headers;
mod response;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, HttpBody, to_bytes};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

pub use headers::{
    SEARCH_CLICK_HEADER, SEARCH_CLICK_POSITION_HEADER, SEARCH_CONVERSION_HEADER,
    SEARCH_CUSTOM_EVENT_HEADER, SEARCH_FILTERS_HEADER, SEARCH_ID_HEADER, SEARCH_QUERY_HEADER,
    SignalHeaders, parse_bool, parse_key_values,
};
pub use response::{MAX_RECORDED_HITS, SearchResponse, parse_search_response};

use crate::error::{AnalyticsError, GatewayError, GeoError};
use crate::geo::GeoLocator;
use crate::metrics;
use crate::middleware::UNKNOWN_IP;
use crate::models::{Acl, AnalyticsRecord};
use crate::pipeline::{Middleware, Next, PipelineRequest, RequestContext};
use crate::store::Store;

/// Everything background enrichment needs, detached from the request.
#[derive(Debug, Clone)]
pub struct CapturedSearch {
    pub search_id: String,
    /// No search id was supplied; this is a new search, not a follow-up event.
    pub fresh: bool,
    pub status: StatusCode,
    pub body: Bytes,
    pub multi_search: bool,
    pub indices: Vec<String>,
    pub client_ip: String,
    pub signals: SignalHeaders,
}

impl CapturedSearch {
    /// Assemble the record from the parsed response (if it parsed) and the
    /// signal headers. Search-only fields are set for fresh searches only.
    pub fn assemble(&self, response: Option<&SearchResponse>) -> AnalyticsRecord {
        let signals = &self.signals;
        let mut record = AnalyticsRecord {
            took: response.map(|r| r.took),
            ..AnalyticsRecord::default()
        };

        if self.fresh {
            record.indices = Some(self.indices.clone());
            record.search_query = signals.query.clone();
            record.hits_in_response = response.map(SearchResponse::top_hits);
            record.total_hits = response.map(SearchResponse::total_hits);
            record.timestamp = Some(Utc::now());
            record.search_filters = signals
                .filters
                .as_deref()
                .map(|raw| parse_key_values(raw, SEARCH_FILTERS_HEADER))
                .filter(|filters| !filters.is_empty());
        }

        if self.client_ip != UNKNOWN_IP {
            record.ip = Some(self.client_ip.clone());
        }

        record.click = signals.click.as_deref().and_then(|raw| {
            parse_bool(raw).or_else(|| {
                warn!(value = raw, header = SEARCH_CLICK_HEADER, "Ignoring invalid bool");
                None
            })
        });
        record.click_position = signals.click_position.as_deref().and_then(|raw| {
            raw.parse::<i64>().ok().or_else(|| {
                warn!(value = raw, header = SEARCH_CLICK_POSITION_HEADER, "Ignoring invalid int");
                None
            })
        });
        record.conversion = signals.conversion.as_deref().and_then(|raw| {
            parse_bool(raw).or_else(|| {
                warn!(value = raw, header = SEARCH_CONVERSION_HEADER, "Ignoring invalid bool");
                None
            })
        });
        record.custom_events = signals
            .custom_events
            .as_deref()
            .map(|raw| parse_key_values(raw, SEARCH_CUSTOM_EVENT_HEADER))
            .filter(|events| !events.is_empty());

        record
    }
}

/// Parse, enrich and persist one captured search.
pub async fn enrich(
    capture: &CapturedSearch,
    store: &dyn Store,
    geo: &dyn GeoLocator,
) -> Result<AnalyticsRecord, AnalyticsError> {
    if !capture.status.is_success() {
        return Err(AnalyticsError::UnsuccessfulResponse(capture.status.as_u16()));
    }

    let response = match parse_search_response(&capture.body, capture.multi_search) {
        Ok(response) => Some(response),
        Err(e) => {
            warn!(
                search_id = %capture.search_id,
                error = %AnalyticsError::from(e),
                "Recording without response fields"
            );
            None
        }
    };

    let mut record = capture.assemble(response.as_ref());

    if let Some(ip) = record.ip.as_deref() {
        match geo.locate(ip).await {
            Ok(location) => {
                record.country = location.country;
                record.location = location.coordinates;
            }
            Err(GeoError::Disabled) => {}
            Err(e) => debug!(ip, error = %e, "Geolocation failed, recording without location"),
        }
    }

    store.index_record(&capture.search_id, &record).await?;
    Ok(record)
}

/// Pipeline stage that mirrors search responses into analytics records.
pub struct AnalyticsRecorder {
    store: Arc<dyn Store>,
    geo: Arc<dyn GeoLocator>,
    tracker: TaskTracker,
    max_response_size: usize,
}

impl AnalyticsRecorder {
    pub fn new(
        store: Arc<dyn Store>,
        geo: Arc<dyn GeoLocator>,
        tracker: TaskTracker,
        max_response_size: usize,
    ) -> Self {
        Self {
            store,
            geo,
            tracker,
            max_response_size,
        }
    }

    fn spawn_enrichment(&self, capture: CapturedSearch) {
        let store = Arc::clone(&self.store);
        let geo = Arc::clone(&self.geo);
        self.tracker.spawn(async move {
            let outcome = match enrich(&capture, store.as_ref(), geo.as_ref()).await {
                Ok(_) => {
                    debug!(
                        search_id = %capture.search_id,
                        fresh = capture.fresh,
                        "Analytics recorded"
                    );
                    "recorded"
                }
                Err(e @ AnalyticsError::UnsuccessfulResponse(_)) => {
                    debug!(search_id = %capture.search_id, error = %e, "Analytics skipped");
                    "skipped"
                }
                Err(e) => {
                    warn!(search_id = %capture.search_id, error = %e, "Analytics record failed");
                    "failed"
                }
            };
            metrics::record_analytics(outcome);
        });
    }
}

#[async_trait]
impl Middleware for AnalyticsRecorder {
    fn name(&self) -> &'static str {
        "analytics"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: PipelineRequest,
        next: Next<'_>,
    ) -> Response {
        let acl = match ctx.require_acl() {
            Ok(acl) => acl,
            Err(e) => return e.into_response(),
        };
        let signals = SignalHeaders::from_headers(req.headers());
        if acl != Acl::Search || !signals.is_tracked() {
            return next.run(ctx, req).await;
        }

        let fresh = signals.search_id.is_none();
        let search_id = signals
            .search_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let multi_search = req.uri().path().contains("_msearch");

        let (mut parts, body) = next.run(ctx, req).await.into_parts();

        match HeaderValue::from_str(&search_id) {
            Ok(value) => {
                parts.headers.insert(SEARCH_ID_HEADER, value);
            }
            Err(e) => warn!(error = %e, "Search id is not a valid header value"),
        }

        let declared = body.size_hint().lower();
        if declared > self.max_response_size as u64 {
            debug!(
                search_id = %search_id,
                size = declared,
                limit = self.max_response_size,
                "Search response too large to record"
            );
            metrics::record_analytics("oversized");
            return Response::from_parts(parts, body);
        }

        // Bodies without a size hint are still bounded while buffering.
        let body = match to_bytes(body, self.max_response_size).await {
            Ok(body) => body,
            Err(e) => {
                return GatewayError::Backend(format!("failed to buffer search response: {e}"))
                    .into_response();
            }
        };

        self.spawn_enrichment(CapturedSearch {
            search_id,
            fresh,
            status: parts.status,
            body: body.clone(),
            multi_search,
            indices: ctx.indices.clone(),
            client_ip: ctx.client_ip.clone(),
            signals,
        });

        Response::from_parts(parts, Body::from(body))
    }
}
