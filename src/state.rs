//! Shared services for the gateway.
//!
//! One [`AppState`] is built at startup and handed to the extension loader,
//! which gives each extension the services it needs. Nothing in here is a
//! process global; the credential cache in particular is reachable only
//! through this struct.
//!
//! # Structured Concurrency
//!
//! Background work (gauge refresh, analytics enrichment) is spawned on a
//! shared `tokio_util::task::TaskTracker` and watches a `CancellationToken`.
//! Call [`AppState::shutdown`] to stop the periodic tasks and drain analytics
//! writes that are still in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::backend::{BackendClient, CircuitBreakerConfig};
use crate::cache::CredentialCache;
use crate::config::{Config, StoreBackend};
use crate::error::{GatewayError, GatewayResult};
use crate::geo::{DisabledGeoLocator, GeoLocator, HttpGeoLocator};
use crate::metrics;
use crate::middleware::{IdentityRateLimiter, MasterIdentity, TrustedProxyConfig};
use crate::store::{ElasticsearchStore, MemoryStore, Store};

/// Timeout for a single geolocation lookup.
const GEO_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared application state.
///
/// Cloning is cheap; every service sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<CredentialCache>,
    pub backend: Arc<BackendClient>,
    pub limiter: Arc<IdentityRateLimiter>,
    pub geo: Arc<dyn GeoLocator>,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build every service the configuration asks for.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Config` when a configured URL cannot be used.
    pub fn from_config(config: Config) -> GatewayResult<Self> {
        let store: Arc<dyn Store> = match config.store_backend {
            StoreBackend::Elasticsearch => Arc::new(
                ElasticsearchStore::new(
                    &config.elasticsearch_url,
                    config.backend_timeout,
                    config.users_index.clone(),
                    config.permissions_index.clone(),
                    config.analytics_index.clone(),
                )
                .map_err(|e| GatewayError::Config(format!("Invalid store configuration: {e}")))?,
            ),
            StoreBackend::Memory => {
                warn!("Using the in-memory store; users and permissions are lost on restart");
                Arc::new(MemoryStore::new())
            }
        };

        let geo: Arc<dyn GeoLocator> = match &config.geo_lookup_url {
            Some(url) => Arc::new(
                HttpGeoLocator::new(url, GEO_LOOKUP_TIMEOUT)
                    .map_err(|e| GatewayError::Config(format!("Invalid GEO_LOOKUP_URL: {e}")))?,
            ),
            None => {
                info!("GEO_LOOKUP_URL not set, analytics records carry no location");
                Arc::new(DisabledGeoLocator)
            }
        };

        Self::new(config, store, geo)
    }

    /// Assemble state around an existing store and geolocator.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        geo: Arc<dyn GeoLocator>,
    ) -> GatewayResult<Self> {
        let backend = BackendClient::new(
            &config.elasticsearch_url,
            config.backend_timeout,
            CircuitBreakerConfig::new(
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_success_threshold,
                config.circuit_breaker_open_duration,
            ),
        )?;
        let limiter =
            IdentityRateLimiter::from_config(config.rate_limit_rps, config.rate_limit_burst);
        let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);

        Ok(Self {
            config: Arc::new(config),
            store,
            cache: Arc::new(CredentialCache::new()),
            backend: Arc::new(backend),
            limiter: Arc::new(limiter),
            geo,
            trusted_proxies: Arc::new(trusted_proxies),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// The configured master identity, if bootstrap is enabled.
    pub fn master_identity(&self) -> Option<MasterIdentity> {
        self.config
            .master_identity()
            .map(|(username, password)| MasterIdentity {
                username: username.to_string(),
                password: password.to_string(),
            })
    }

    /// Tracker for background work that must finish before exit.
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// Spawn the periodic gauge refresh.
    ///
    /// Publishes cache size, tracked rate-limit identities and circuit state
    /// every `gauge_refresh_interval`.
    pub fn spawn_gauge_refresh_task(&self) {
        let cache = Arc::clone(&self.cache);
        let limiter = Arc::clone(&self.limiter);
        let backend = Arc::clone(&self.backend);
        let period = self.config.gauge_refresh_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Gauge refresh task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        metrics::set_cache_entries(cache.len());
                        metrics::set_rate_limited_identities(limiter.tracked_identities());
                        metrics::set_circuit_breaker_state(backend.breaker().state().gauge_value());
                        trace!("Gauges refreshed");
                    }
                }
            }

            debug!("Gauge refresh task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// Signals the periodic tasks to stop, closes the tracker so no new
    /// analytics work is accepted, then waits for in-flight tasks.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod tests {
    use super::*;

    /// Configuration with every default and an in-memory store.
    pub(crate) fn test_config() -> Config {
        Config {
            store_backend: StoreBackend::Memory,
            metrics_port: 0,
            ..Config::default()
        }
    }

    pub(crate) fn memory_state(config: Config) -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(
            config,
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::new(DisabledGeoLocator),
        )
        .unwrap();
        (state, store)
    }

    #[test]
    fn test_master_identity_requires_both_halves() {
        let (state, _) = memory_state(test_config());
        assert!(state.master_identity().is_none());

        let config = Config {
            master_username: Some("root".into()),
            master_password: Some("s3cret-pass".into()),
            ..test_config()
        };
        let (state, _) = memory_state(config);
        let master = state.master_identity().unwrap();
        assert_eq!(master.username, "root");
    }

    #[test]
    fn test_from_config_with_memory_store() {
        let state = AppState::from_config(test_config()).unwrap();
        assert_eq!(state.cache.len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_tracker() {
        let (state, _) = memory_state(test_config());
        state.spawn_gauge_refresh_task();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&done);
        state.task_tracker().spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        state.shutdown().await;
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }
}
