//! Identity management: users and the permissions they issue.
//!
//! # Endpoints
//!
//! - `GET /_user` - the acting user
//! - `POST /_user` - create a user (admin only)
//! - `GET|PATCH /_user/{username}` - admin, or the user themself
//! - `DELETE /_user/{username}` - admin only
//! - `POST /_permission` - issue a permission owned by the acting user
//! - `GET|PATCH|DELETE /_permission/{username}` - owner or admin
//!
//! Every handler runs after the auth stage has resolved the acting user.
//! Stored passwords never appear in a response; the only secret returned is
//! the one generated for a new permission.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use rand::distr::{Alphanumeric, SampleString};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::cache::CredentialCache;
use crate::error::{GatewayError, GatewayResult};
use crate::extension::{Extension, ExtensionRoute};
use crate::middleware::USERNAME_PARAM;
use crate::models::{
    Acl, Category, CreatePermissionRequest, CreateUserRequest, Limits, MessageResponse,
    Operation, Permission, PermissionResponse, RouteSpec, UpdatePermissionRequest,
    UpdateUserRequest, User, UserResponse,
};
use crate::pipeline::{Handler, PipelineRequest, RequestContext};
use crate::state::AppState;
use crate::store::Store;
use crate::validation::{validate_email, validate_password, validate_username};

/// Length of generated permission names.
const PERMISSION_NAME_LENGTH: usize = 12;

/// Length of generated permission secrets.
const PERMISSION_SECRET_LENGTH: usize = 32;

/// Attempts at finding an unused generated name.
const NAME_ATTEMPTS: usize = 3;

const USER_BY_NAME: &str = "/_user/{username}";
const PERMISSION_BY_NAME: &str = "/_permission/{username}";

pub struct AuthExtension;

impl AuthExtension {
    pub const NAME: &'static str = "auth";
}

impl Extension for AuthExtension {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn routes(&self, state: &AppState) -> Vec<ExtensionRoute> {
        let user = |method: Method, template, op, action| {
            ExtensionRoute::new(
                method,
                template,
                RouteSpec::new(Category::User, Acl::User, op),
                Arc::new(UserHandler {
                    action,
                    store: Arc::clone(&state.store),
                    cache: Arc::clone(&state.cache),
                }) as Arc<dyn Handler>,
            )
        };
        let permission = |method: Method, template, op, action| {
            ExtensionRoute::new(
                method,
                template,
                RouteSpec::new(Category::Permission, Acl::Permission, op),
                Arc::new(PermissionHandler {
                    action,
                    store: Arc::clone(&state.store),
                    cache: Arc::clone(&state.cache),
                }) as Arc<dyn Handler>,
            )
        };

        vec![
            user(Method::GET, "/_user", Operation::Read, UserAction::Current),
            user(Method::POST, "/_user", Operation::Write, UserAction::Create),
            user(Method::GET, USER_BY_NAME, Operation::Read, UserAction::Get),
            user(Method::PATCH, USER_BY_NAME, Operation::Write, UserAction::Update),
            user(Method::DELETE, USER_BY_NAME, Operation::Delete, UserAction::Delete),
            permission(Method::POST, "/_permission", Operation::Write, PermissionAction::Create),
            permission(Method::GET, PERMISSION_BY_NAME, Operation::Read, PermissionAction::Get),
            permission(
                Method::PATCH,
                PERMISSION_BY_NAME,
                Operation::Write,
                PermissionAction::Update,
            ),
            permission(
                Method::DELETE,
                PERMISSION_BY_NAME,
                Operation::Delete,
                PermissionAction::Delete,
            ),
        ]
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn acting_user(ctx: &RequestContext) -> GatewayResult<&User> {
    ctx.require_credential()?
        .user()
        .ok_or_else(|| GatewayError::Forbidden("permissions cannot manage identities".into()))
}

fn target(ctx: &RequestContext) -> GatewayResult<String> {
    ctx.param(USERNAME_PARAM)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Internal("username path parameter missing".into()))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> GatewayResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid request body: {e}")))
}

/// Like [`parse_body`], but an empty body is the type's default.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> GatewayResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

fn user_not_found(username: &str) -> GatewayError {
    GatewayError::NotFound(format!(r#"User with "username"="{username}" Not Found"#))
}

fn permission_not_found(username: &str) -> GatewayError {
    GatewayError::NotFound(format!(r#"Permission with "username"="{username}" Not Found"#))
}

fn validate_limits(limits: Option<Limits>) -> GatewayResult<()> {
    match limits {
        Some(l) if l.requests == 0 || l.window_secs == 0 => Err(GatewayError::BadRequest(
            "limits.requests and limits.window_secs must be positive".into(),
        )),
        _ => Ok(()),
    }
}

fn created<T: serde::Serialize>(body: T) -> Response {
    (StatusCode::CREATED, Json(body)).into_response()
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UserAction {
    Current,
    Create,
    Get,
    Update,
    Delete,
}

struct UserHandler {
    action: UserAction,
    store: Arc<dyn Store>,
    cache: Arc<CredentialCache>,
}

#[async_trait]
impl Handler for UserHandler {
    async fn call(&self, ctx: &mut RequestContext, req: PipelineRequest) -> Response {
        let result = match self.action {
            UserAction::Current => {
                acting_user(ctx).map(|u| Json(UserResponse::from(u)).into_response())
            }
            UserAction::Create => self.create(ctx, req.body()).await,
            UserAction::Get => self.get(ctx).await,
            UserAction::Update => self.update(ctx, req.body()).await,
            UserAction::Delete => self.delete(ctx).await,
        };
        result.unwrap_or_else(IntoResponse::into_response)
    }
}

impl UserHandler {
    async fn create(&self, ctx: &RequestContext, body: &Bytes) -> GatewayResult<Response> {
        let acting = acting_user(ctx)?;
        if !acting.is_admin {
            return Err(GatewayError::Forbidden("Only admins can create users".into()));
        }

        let request: CreateUserRequest = parse_body(body)?;
        validate_username(&request.username)?;
        validate_password(&request.password)?;
        if let Some(email) = &request.email {
            validate_email(email)?;
        }
        if self.store.get_credential(&request.username).await?.is_some() {
            return Err(GatewayError::Conflict(format!(
                r#"User with "username"="{}" already exists"#,
                request.username
            )));
        }

        let user = User {
            email: request.email,
            ..User::new(request.username, request.password, request.is_admin)
        };
        self.store.put_user(&user).await?;
        self.cache.invalidate(&user.username);

        info!(
            actor = %acting.username,
            username = %user.username,
            is_admin = user.is_admin,
            "User created"
        );
        Ok(created(UserResponse::from(&user)))
    }

    /// The target user, if the acting user may see it.
    async fn load_visible(&self, ctx: &RequestContext) -> GatewayResult<(User, User)> {
        let acting = acting_user(ctx)?.clone();
        let target = target(ctx)?;
        if acting.username != target && !acting.is_admin {
            return Err(GatewayError::Forbidden(format!(
                "User {} cannot access user {target}",
                acting.username
            )));
        }
        let user = self
            .store
            .get_user(&target)
            .await?
            .ok_or_else(|| user_not_found(&target))?;
        Ok((acting, user))
    }

    async fn get(&self, ctx: &RequestContext) -> GatewayResult<Response> {
        let (_, user) = self.load_visible(ctx).await?;
        Ok(Json(UserResponse::from(&user)).into_response())
    }

    async fn update(&self, ctx: &RequestContext, body: &Bytes) -> GatewayResult<Response> {
        let request: UpdateUserRequest = parse_optional_body(body)?;
        let (acting, mut user) = self.load_visible(ctx).await?;

        if let Some(is_admin) = request.is_admin {
            if !acting.is_admin {
                return Err(GatewayError::Forbidden("Only admins can change admin status".into()));
            }
            user.is_admin = is_admin;
        }
        if let Some(password) = request.password {
            validate_password(&password)?;
            user.password = password;
        }
        if let Some(email) = request.email {
            validate_email(&email)?;
            user.email = Some(email);
        }

        self.store.put_user(&user).await?;
        self.cache.invalidate(&user.username);

        info!(actor = %acting.username, username = %user.username, "User updated");
        Ok(Json(UserResponse::from(&user)).into_response())
    }

    async fn delete(&self, ctx: &RequestContext) -> GatewayResult<Response> {
        let acting = acting_user(ctx)?;
        if !acting.is_admin {
            return Err(GatewayError::Forbidden("Only admins can delete users".into()));
        }
        let target = target(ctx)?;
        if target == acting.username {
            return Err(GatewayError::BadRequest("Users cannot delete themselves".into()));
        }

        if !self.store.delete_user(&target).await? {
            return Err(user_not_found(&target));
        }
        self.cache.invalidate(&target);

        info!(actor = %acting.username, username = %target, "User deleted");
        Ok(Json(MessageResponse::new(format!("User {target} deleted"))).into_response())
    }
}

// =============================================================================
// Permissions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermissionAction {
    Create,
    Get,
    Update,
    Delete,
}

struct PermissionHandler {
    action: PermissionAction,
    store: Arc<dyn Store>,
    cache: Arc<CredentialCache>,
}

#[async_trait]
impl Handler for PermissionHandler {
    async fn call(&self, ctx: &mut RequestContext, req: PipelineRequest) -> Response {
        let result = match self.action {
            PermissionAction::Create => self.create(ctx, req.body()).await,
            PermissionAction::Get => self
                .load_owned(ctx)
                .await
                .map(|(_, p)| Json(PermissionResponse::from(&p)).into_response()),
            PermissionAction::Update => self.update(ctx, req.body()).await,
            PermissionAction::Delete => self.delete(ctx).await,
        };
        result.unwrap_or_else(IntoResponse::into_response)
    }
}

impl PermissionHandler {
    /// A generated name no identity uses yet.
    async fn unused_name(&self) -> GatewayResult<String> {
        for _ in 0..NAME_ATTEMPTS {
            let name = Alphanumeric.sample_string(&mut rand::rng(), PERMISSION_NAME_LENGTH);
            if self.store.get_credential(&name).await?.is_none() {
                return Ok(name);
            }
        }
        Err(GatewayError::Internal("unable to generate an unused permission name".into()))
    }

    async fn create(&self, ctx: &RequestContext, body: &Bytes) -> GatewayResult<Response> {
        let owner = acting_user(ctx)?.username.clone();
        let request: CreatePermissionRequest = parse_optional_body(body)?;
        validate_limits(request.limits)?;

        let username = self.unused_name().await?;
        let secret = Alphanumeric.sample_string(&mut rand::rng(), PERMISSION_SECRET_LENGTH);
        let permission = Permission {
            expires_at: request.expires_at,
            sources: request.sources,
            referers: request.referers,
            indices: request.indices,
            categories: request.categories,
            acls: request.acls,
            ops: request.ops,
            limits: request.limits,
            ..Permission::new(username, secret, owner)
        };
        self.store.put_permission(&permission).await?;
        self.cache.invalidate(&permission.username);

        info!(owner = %permission.owner, username = %permission.username, "Permission created");
        Ok(created(PermissionResponse::with_secret(&permission)))
    }

    /// The target permission, if the acting user owns it or is an admin.
    async fn load_owned(&self, ctx: &RequestContext) -> GatewayResult<(User, Permission)> {
        let acting = acting_user(ctx)?.clone();
        let target = target(ctx)?;
        let permission = self
            .store
            .get_permission(&target)
            .await?
            .ok_or_else(|| permission_not_found(&target))?;
        if permission.owner != acting.username && !acting.is_admin {
            return Err(GatewayError::Forbidden(format!(
                "User {} does not own permission {target}",
                acting.username
            )));
        }
        Ok((acting, permission))
    }

    async fn update(&self, ctx: &RequestContext, body: &Bytes) -> GatewayResult<Response> {
        let request: UpdatePermissionRequest = parse_optional_body(body)?;
        validate_limits(request.limits)?;
        let (acting, mut permission) = self.load_owned(ctx).await?;

        if let Some(expires_at) = request.expires_at {
            permission.expires_at = Some(expires_at);
        }
        if let Some(sources) = request.sources {
            permission.sources = sources;
        }
        if let Some(referers) = request.referers {
            permission.referers = referers;
        }
        if let Some(indices) = request.indices {
            permission.indices = indices;
        }
        if let Some(categories) = request.categories {
            permission.categories = categories;
        }
        if let Some(acls) = request.acls {
            permission.acls = acls;
        }
        if let Some(ops) = request.ops {
            permission.ops = ops;
        }
        if let Some(limits) = request.limits {
            permission.limits = Some(limits);
        }

        self.store.put_permission(&permission).await?;
        self.cache.invalidate(&permission.username);

        info!(actor = %acting.username, username = %permission.username, "Permission updated");
        Ok(Json(PermissionResponse::from(&permission)).into_response())
    }

    async fn delete(&self, ctx: &RequestContext) -> GatewayResult<Response> {
        let (acting, permission) = self.load_owned(ctx).await?;
        if !self.store.delete_permission(&permission.username).await? {
            return Err(permission_not_found(&permission.username));
        }
        self.cache.invalidate(&permission.username);

        info!(actor = %acting.username, username = %permission.username, "Permission deleted");
        Ok(Json(MessageResponse::new(format!(
            "Permission {} deleted",
            permission.username
        )))
        .into_response())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::Credential;
    use crate::state::tests::{memory_state, test_config};
    use crate::store::MemoryStore;
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::{Value, json};

    struct Harness {
        state: AppState,
        store: Arc<MemoryStore>,
    }

    impl Harness {
        async fn new() -> Self {
            let (state, store) = memory_state(test_config());
            store.put_user(&User::admin("admin", "admin-password")).await.unwrap();
            store.put_user(&User::new("alice", "alice-password", false)).await.unwrap();
            store.put_user(&User::new("bob", "bob-password", false)).await.unwrap();
            Self { state, store }
        }

        fn route(&self, method: &Method, template: &str) -> ExtensionRoute {
            AuthExtension
                .routes(&self.state)
                .into_iter()
                .find(|r| r.method == *method && r.template == template)
                .unwrap()
        }

        async fn call(
            &self,
            actor: &str,
            method: Method,
            template: &str,
            username: Option<&str>,
            body: Value,
        ) -> (StatusCode, Value) {
            let route = self.route(&method, template);
            let user = self.store.get_user(actor).await.unwrap().unwrap();
            let mut ctx = RequestContext::new("test");
            ctx.credential = Some(Credential::User(user));
            if let Some(username) = username {
                ctx.path_params.insert(USERNAME_PARAM.into(), username.into());
            }
            let body = if body.is_null() {
                Bytes::new()
            } else {
                Bytes::from(serde_json::to_vec(&body).unwrap())
            };
            let req = Request::builder().method(method).uri("/").body(body).unwrap();

            let response = route.handler.call(&mut ctx, req).await;
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    #[tokio::test]
    async fn test_admin_creates_user_without_exposing_password() {
        let h = Harness::new().await;
        let (status, body) = h
            .call(
                "admin",
                Method::POST,
                "/_user",
                None,
                json!({ "username": "carol", "password": "carol-password" }),
            )
            .await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["username"], "carol");
        assert!(body.get("password").is_none());
        assert!(h.store.get_user("carol").await.unwrap().is_some());

        let (status, _) = h
            .call(
                "admin",
                Method::POST,
                "/_user",
                None,
                json!({ "username": "carol", "password": "carol-password" }),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_non_admin_cannot_create_or_promote() {
        let h = Harness::new().await;
        let (status, _) = h
            .call(
                "alice",
                Method::POST,
                "/_user",
                None,
                json!({ "username": "mallory", "password": "mallory-password" }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = h
            .call(
                "alice",
                Method::PATCH,
                "/_user/{username}",
                Some("alice"),
                json!({ "is_admin": true }),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(!h.store.get_user("alice").await.unwrap().unwrap().is_admin);
    }

    #[tokio::test]
    async fn test_self_service_and_visibility() {
        let h = Harness::new().await;
        let (status, body) = h.call("alice", Method::GET, "/_user", None, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");

        let (status, _) = h
            .call("alice", Method::GET, "/_user/{username}", Some("bob"), Value::Null)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = h
            .call(
                "alice",
                Method::PATCH,
                "/_user/{username}",
                Some("alice"),
                json!({ "password": "a-new-password" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            h.store.get_user("alice").await.unwrap().unwrap().password,
            "a-new-password"
        );

        let (status, body) = h
            .call("admin", Method::GET, "/_user/{username}", Some("ghost"), Value::Null)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["message"].as_str().unwrap().contains(r#""username"="ghost""#));
    }

    #[tokio::test]
    async fn test_delete_user_invalidates_cache() {
        let h = Harness::new().await;
        let bob = h.store.get_user("bob").await.unwrap().unwrap();
        h.state.cache.put(crate::models::StoredCredential::User(bob));

        let (status, _) = h
            .call("admin", Method::DELETE, "/_user/{username}", Some("bob"), Value::Null)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.state.cache.get("bob").is_none());
        assert!(h.store.get_user("bob").await.unwrap().is_none());

        let (status, _) = h
            .call("admin", Method::DELETE, "/_user/{username}", Some("bob"), Value::Null)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_permission_lifecycle() {
        let h = Harness::new().await;
        let (status, body) = h
            .call(
                "alice",
                Method::POST,
                "/_permission",
                None,
                json!({ "indices": ["products-*"], "acls": ["search"] }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let name = body["username"].as_str().unwrap().to_string();
        let secret = body["password"].as_str().unwrap();
        assert_eq!(name.len(), PERMISSION_NAME_LENGTH);
        assert_eq!(secret.len(), PERMISSION_SECRET_LENGTH);
        assert_eq!(body["owner"], "alice");

        let (status, body) = h
            .call("alice", Method::GET, "/_permission/{username}", Some(&name), Value::Null)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("password").is_none());

        let (status, _) = h
            .call("bob", Method::GET, "/_permission/{username}", Some(&name), Value::Null)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = h
            .call(
                "admin",
                Method::PATCH,
                "/_permission/{username}",
                Some(&name),
                json!({ "limits": { "requests": 5, "window_secs": 60 } }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["limits"]["requests"], 5);
        assert_eq!(body["indices"], json!(["products-*"]));

        let (status, _) = h
            .call("alice", Method::DELETE, "/_permission/{username}", Some(&name), Value::Null)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.store.get_permission(&name).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_permission_limits_rejected() {
        let h = Harness::new().await;
        let (status, _) = h
            .call(
                "alice",
                Method::POST,
                "/_permission",
                None,
                json!({ "limits": { "requests": 0, "window_secs": 60 } }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_permission_credential_cannot_manage() {
        let h = Harness::new().await;
        let route = h.route(&Method::GET, "/_user");
        let mut ctx = RequestContext::new("test");
        ctx.credential = Some(Credential::Permission(Permission::new("p", "s", "alice")));
        let req = Request::builder().uri("/_user").body(Bytes::new()).unwrap();
        let response = route.handler.call(&mut ctx, req).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
