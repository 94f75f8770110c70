//! Basic-auth credential resolution.
//!
//! # Resolution order
//!
//! 1. Per-IP lockout check (too many recent failures → 429).
//! 2. Master identity from configuration. On first use its admin user record
//!    is created in the store if missing; the record is then memoised until a
//!    management request mutates the master's own record.
//! 3. Data-plane categories: the identity is looked up in the store as a
//!    permission or user. Users must be admins.
//! 4. Management-plane categories: the acting user is resolved through the
//!    credential cache. Mutating requests invalidate the target identity
//!    before resolution and again once the handler has returned.
//!
//! Secrets are compared in constant time.
//!
//! # Brute force protection
//!
//! Every 401/404 outcome consumes a token from a per-IP limiter (10 per
//! minute, burst 5). Once exhausted, the IP is locked out until the limiter
//! would admit it again, even with valid credentials.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::cache::CredentialCache;
use crate::error::{GatewayError, GatewayResult};
use crate::metrics;
use crate::models::{Category, Credential, StoredCredential, User};
use crate::pipeline::{Middleware, Next, PipelineRequest, RequestContext};
use crate::store::Store;

/// Maximum auth failures per IP per minute.
const AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Burst capacity for auth failures.
const AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Path parameter naming the identity a management request targets.
pub const USERNAME_PARAM: &str = "username";

type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Decoded `Authorization: Basic` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Decode `Authorization: Basic <base64(user:pass)>`.
///
/// Returns `None` for a missing header, another scheme, bad base64, non-UTF-8
/// content, a missing `:` or an empty username.
pub fn parse_basic_auth(headers: &HeaderMap) -> Option<BasicCredentials> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    if username.is_empty() {
        return None;
    }

    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Constant-time string equality.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Statically configured bootstrap identity.
#[derive(Debug, Clone)]
pub struct MasterIdentity {
    pub username: String,
    pub password: String,
}

impl MasterIdentity {
    fn matches(&self, supplied: &BasicCredentials) -> bool {
        // evaluate both halves regardless of the first result
        let user = constant_time_eq(&self.username, &supplied.username);
        let pass = constant_time_eq(&self.password, &supplied.password);
        user & pass
    }
}

/// The authentication stage.
pub struct AuthResolver {
    store: Arc<dyn Store>,
    cache: Arc<CredentialCache>,
    master: Option<MasterIdentity>,
    master_record: Mutex<Option<User>>,
    failure_limiter: AuthFailureLimiter,
    lockouts: DashMap<String, Instant>,
}

impl AuthResolver {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<CredentialCache>,
        master: Option<MasterIdentity>,
    ) -> Self {
        let quota = Quota::per_minute(AUTH_FAILURE_LIMIT).allow_burst(AUTH_FAILURE_BURST);
        Self {
            store,
            cache,
            master,
            master_record: Mutex::new(None),
            failure_limiter: RateLimiter::keyed(quota),
            lockouts: DashMap::new(),
        }
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Seconds until `client_ip` may try again, if it is locked out.
    fn lockout_remaining(&self, client_ip: &str) -> Option<u64> {
        let until = *self.lockouts.get(client_ip)?;
        let now = Instant::now();
        if until <= now {
            self.lockouts.remove(client_ip);
            return None;
        }
        Some(until.duration_since(now).as_secs().max(1))
    }

    /// Count a failed attempt; lock the IP out once its budget is spent.
    fn record_failure(&self, client_ip: &str, reason: &'static str) {
        metrics::record_auth_failure(reason);
        if let Err(not_until) = self.failure_limiter.check_key(&client_ip.to_string()) {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            let wait = wait.max(Duration::from_secs(1));
            self.lockouts
                .insert(client_ip.to_string(), Instant::now() + wait);
            error!(
                client_ip,
                retry_after_secs = wait.as_secs(),
                "IP locked out after excessive auth failures"
            );
        }
    }

    /// The master's admin record, creating it in the store when missing.
    ///
    /// The lock is held across the store calls so concurrent first requests
    /// create the record once.
    async fn master_user(&self, master: &MasterIdentity) -> GatewayResult<User> {
        let mut memo = self.master_record.lock().await;
        let user = match memo.as_ref() {
            Some(user) => user.clone(),
            None => {
                let user = match self.store.get_user(&master.username).await? {
                    Some(existing) => existing,
                    None => {
                        warn!(
                            username = %master.username,
                            "Master user missing from store, creating it"
                        );
                        let admin =
                            User::admin(master.username.clone(), master.password.clone());
                        self.store.put_user(&admin).await?;
                        admin
                    }
                };
                *memo = Some(user.clone());
                user
            }
        };

        Ok(User {
            is_admin: true,
            ..user
        })
    }

    /// Drop cached state for `target` once a management mutation has run.
    async fn forget(&self, target: &str) {
        self.cache.invalidate(target);
        if self.master.as_ref().is_some_and(|m| m.username == target) {
            debug!(username = target, "Master record changed, re-checking on next use");
            *self.master_record.lock().await = None;
        }
    }

    /// Data plane: store lookup, admin check, secret check.
    async fn resolve_data_plane(&self, supplied: &BasicCredentials) -> GatewayResult<Credential> {
        let Some(stored) = self.store.get_credential(&supplied.username).await? else {
            return Err(GatewayError::NotFound(format!(
                r#"Credential with "username"="{}" Not Found"#,
                supplied.username
            )));
        };

        match stored {
            StoredCredential::User(user) => {
                if !user.is_admin {
                    return Err(GatewayError::Unauthorized(format!(
                        r#"User with "username"="{}" is not an admin"#,
                        supplied.username
                    )));
                }
                if !constant_time_eq(&user.password, &supplied.password) {
                    return Err(incorrect_credentials());
                }
                Ok(Credential::User(user))
            }
            StoredCredential::Permission(permission) => {
                if !constant_time_eq(&permission.password, &supplied.password) {
                    return Err(incorrect_credentials());
                }
                Ok(Credential::Permission(permission))
            }
        }
    }

    /// Management plane: acting user via cache-or-store, secret check.
    async fn resolve_management_plane(
        &self,
        supplied: &BasicCredentials,
    ) -> GatewayResult<Credential> {
        let Some(user) = self
            .cache
            .user_or_fetch(&supplied.username, self.store.as_ref())
            .await?
        else {
            return Err(GatewayError::NotFound(format!(
                r#"User with "username"="{}" Not Found"#,
                supplied.username
            )));
        };

        if !constant_time_eq(&user.password, &supplied.password) {
            return Err(incorrect_credentials());
        }
        Ok(Credential::User(user))
    }

    fn reject(&self, ctx: &RequestContext, err: GatewayError) -> Response {
        match &err {
            GatewayError::Unauthorized(_) => self.record_failure(&ctx.client_ip, "unauthorized"),
            GatewayError::NotFound(_) => self.record_failure(&ctx.client_ip, "not_found"),
            _ => {}
        }
        warn!(
            client_ip = %ctx.client_ip,
            category = ?ctx.category,
            error = %err,
            "Authentication rejected"
        );
        err.into_response()
    }
}

fn incorrect_credentials() -> GatewayError {
    GatewayError::Unauthorized("Incorrect credentials".into())
}

fn is_mutating(method: &Method) -> bool {
    *method == Method::PATCH || *method == Method::DELETE
}

#[async_trait]
impl Middleware for AuthResolver {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(
        &self,
        ctx: &mut RequestContext,
        req: PipelineRequest,
        next: Next<'_>,
    ) -> Response {
        let category: Category = match ctx.require_category() {
            Ok(category) => category,
            Err(e) => return e.into_response(),
        };

        if let Some(retry_after_secs) = self.lockout_remaining(&ctx.client_ip) {
            warn!(client_ip = %ctx.client_ip, "Request from locked out IP");
            return GatewayError::AuthLockout { retry_after_secs }.into_response();
        }

        let Some(supplied) = parse_basic_auth(req.headers()) else {
            return self.reject(ctx, GatewayError::Unauthorized("Not logged in".into()));
        };

        let mutation_target = (!category.is_from_es() && is_mutating(req.method())).then(|| {
            ctx.param(USERNAME_PARAM)
                .unwrap_or(supplied.username.as_str())
                .to_string()
        });
        if let Some(target) = &mutation_target {
            self.cache.invalidate(target);
        }

        if let Some(master) = &self.master
            && master.matches(&supplied)
        {
            return match self.master_user(master).await {
                Ok(user) => {
                    debug!(identity = %user.username, "Master identity authenticated");
                    ctx.credential = Some(Credential::Master(user));
                    let response = next.run(ctx, req).await;
                    if let Some(target) = &mutation_target {
                        self.forget(target).await;
                    }
                    response
                }
                Err(e) => {
                    error!(error = %e, "Unable to create master user");
                    GatewayError::Internal("unable to create master user".into()).into_response()
                }
            };
        }

        if category.is_from_es() {
            return match self.resolve_data_plane(&supplied).await {
                Ok(credential) => {
                    debug!(identity = credential.name(), kind = credential.kind(), "Authenticated");
                    ctx.credential = Some(credential);
                    next.run(ctx, req).await
                }
                Err(e) => self.reject(ctx, e),
            };
        }

        match self.resolve_management_plane(&supplied).await {
            Ok(credential) => {
                ctx.credential = Some(credential);
                let response = next.run(ctx, req).await;
                if let Some(target) = &mutation_target {
                    // a concurrent read may have refilled between the two
                    self.forget(target).await;
                }
                response
            }
            Err(e) => self.reject(ctx, e),
        }
    }
}
