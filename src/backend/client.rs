use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{
    AUTHORIZATION, CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE,
    TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{HeaderMap, HeaderName};
use axum::response::Response;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::middleware::effective_timeout;
use crate::pipeline::{PipelineRequest, RequestContext};

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Headers that describe one hop and never cross the proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    CONNECTION,
    KEEP_ALIVE,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

/// Request headers to send upstream: hop-by-hop, `host`, `content-length` and
/// the client's `authorization` are dropped.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in HOP_BY_HOP.iter().chain([&HOST, &AUTHORIZATION, &CONTENT_LENGTH]) {
        filtered.remove(name);
    }
    filtered
}

/// Response headers to relay: hop-by-hop and `content-length` are dropped,
/// the latter is recomputed from the buffered body.
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = headers.clone();
    for name in HOP_BY_HOP.iter().chain([&CONTENT_LENGTH]) {
        filtered.remove(name);
    }
    filtered
}

/// Forwards pipeline requests to the search cluster.
///
/// Calls are bounded by the smaller of the configured backend timeout and
/// whatever is left of the client's `X-Request-Timeout`. Credentials embedded
/// in the cluster URL are sent as basic auth on every call.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base: Url,
    auth: Option<(String, Option<String>)>,
    timeout: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl BackendClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        breaker: CircuitBreakerConfig,
    ) -> GatewayResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| GatewayError::Config(format!("Invalid ELASTICSEARCH_URL: {e}")))?;

        let auth = if base.username().is_empty() {
            None
        } else {
            let auth = (
                base.username().to_string(),
                base.password().map(str::to_string),
            );
            base.set_username("")
                .and_then(|()| base.set_password(None))
                .map_err(|()| GatewayError::Config("Invalid ELASTICSEARCH_URL".to_string()))?;
            Some(auth)
        };

        let client = Client::builder()
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to build backend client: {e}")))?;

        Ok(Self {
            client,
            base,
            auth,
            timeout,
            breaker: Arc::new(CircuitBreaker::new(breaker)),
        })
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Backend URL for an inbound path and query.
    fn target(&self, path_and_query: &str) -> GatewayResult<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path_and_query}"))
            .map_err(|e| GatewayError::BadRequest(format!("Unroutable request path: {e}")))
    }

    pub async fn forward(
        &self,
        ctx: &RequestContext,
        req: PipelineRequest,
    ) -> GatewayResult<Response> {
        if !self.breaker.allow_request() {
            return Err(GatewayError::BackendUnavailable(format!(
                "circuit open, retry in {:?}",
                self.breaker.retry_after()
            )));
        }

        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or(parts.uri.path(), |pq| pq.as_str());
        let url = self.target(path_and_query)?;
        let timeout = effective_timeout(self.timeout, ctx.remaining());

        let mut builder = self
            .client
            .request(parts.method.clone(), url)
            .headers(filter_request_headers(&parts.headers))
            .timeout(timeout)
            .body(body);
        if let Some((user, password)) = &self.auth {
            builder = builder.basic_auth(user, password.as_deref());
        }

        let started = Instant::now();
        let result = async {
            let upstream = builder.send().await?;
            let status = upstream.status();
            let headers = filter_response_headers(upstream.headers());
            let body = upstream.bytes().await?;
            Ok::<_, reqwest::Error>((status, headers, body))
        }
        .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok((status, headers, body)) => {
                if status.is_server_error() {
                    self.breaker.record_failure();
                    metrics::record_backend_duration("server_error", elapsed);
                } else {
                    self.breaker.record_success();
                    metrics::record_backend_duration("ok", elapsed);
                }
                debug!(
                    request_id = %ctx.request_id,
                    method = %parts.method,
                    path = parts.uri.path(),
                    status = status.as_u16(),
                    bytes = body.len(),
                    "Backend responded"
                );

                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                Ok(response)
            }
            Err(e) => {
                self.breaker.record_failure();
                if e.is_timeout() {
                    metrics::record_backend_duration("timeout", elapsed);
                    warn!(request_id = %ctx.request_id, ?timeout, "Backend call timed out");
                    Err(GatewayError::BackendTimeout(format!("no response within {timeout:?}")))
                } else {
                    metrics::record_backend_duration("error", elapsed);
                    warn!(request_id = %ctx.request_id, error = %e, "Backend call failed");
                    Err(GatewayError::Backend(e.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::to_bytes;
    use axum::http::{HeaderValue, Request, StatusCode};
    use axum::routing::any;
    use bytes::Bytes;
    use tokio::net::TcpListener;

    async fn echo_server() -> String {
        let app = Router::new().fallback(any(|req: axum::extract::Request| async move {
            let auth = req.headers().contains_key(AUTHORIZATION);
            let uri = req.uri().to_string();
            let body = to_bytes(req.into_body(), usize::MAX).await.unwrap();
            let status = if uri.contains("fail") {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            (
                status,
                [("x-upstream", "yes")],
                format!("{uri}|{auth}|{}", String::from_utf8_lossy(&body)),
            )
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn request(uri: &str) -> PipelineRequest {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(AUTHORIZATION, "Basic Zm9vOmJhcg==")
            .body(Bytes::from_static(b"{\"q\":1}"))
            .unwrap()
    }

    #[test]
    fn test_request_headers_drop_credentials_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic x"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-search-query", HeaderValue::from_static("shoes"));

        let filtered = filter_request_headers(&headers);
        assert!(!filtered.contains_key(AUTHORIZATION));
        assert!(!filtered.contains_key(CONNECTION));
        assert_eq!(filtered["x-search-query"], "shoes");
    }

    #[tokio::test]
    async fn test_forward_relays_status_headers_and_body() {
        let base = echo_server().await;
        let client = BackendClient::new(&base, Duration::from_secs(5), Default::default()).unwrap();

        let response = client
            .forward(&RequestContext::new("r"), request("/logs/_search?size=5"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-upstream"], "yes");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"/logs/_search?size=5|false|{\"q\":1}");
    }

    #[tokio::test]
    async fn test_url_credentials_become_basic_auth() {
        let base = echo_server().await.replace("http://", "http://es:secret@");
        let client = BackendClient::new(&base, Duration::from_secs(5), Default::default()).unwrap();

        let response = client
            .forward(&RequestContext::new("r"), request("/"))
            .await
            .unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("|true|"));
    }

    #[tokio::test]
    async fn test_server_errors_open_the_circuit() {
        let base = echo_server().await;
        let client = BackendClient::new(
            &base,
            Duration::from_secs(5),
            CircuitBreakerConfig::new(2, 1, Duration::from_secs(60)),
        )
        .unwrap();
        let ctx = RequestContext::new("r");

        for _ in 0..2 {
            let response = client.forward(&ctx, request("/fail")).await.unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        let err = client.forward(&ctx, request("/")).await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = BackendClient::new(
            &format!("http://{addr}"),
            Duration::from_secs(2),
            Default::default(),
        )
        .unwrap();
        let err = client
            .forward(&RequestContext::new("r"), request("/"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }
}
