use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Acl, Category, Limits, Operation, Permission, User};

/// Request to create a user (admin only).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub email: Option<String>,
}

/// Partial update of a user. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    pub password: Option<String>,
    pub is_admin: Option<bool>,
    pub email: Option<String>,
}

/// User as returned to clients; the password never leaves the gateway.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub username: String,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            is_admin: user.is_admin,
            email: user.email.clone(),
            created_at: user.created_at,
        }
    }
}

/// Request to issue a permission. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePermissionRequest {
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub referers: Vec<String>,
    #[serde(default)]
    pub indices: Vec<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub acls: Vec<Acl>,
    #[serde(default)]
    pub ops: Vec<Operation>,
    #[serde(default)]
    pub limits: Option<Limits>,
}

/// Partial update of a permission. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePermissionRequest {
    pub expires_at: Option<DateTime<Utc>>,
    pub sources: Option<Vec<String>>,
    pub referers: Option<Vec<String>>,
    pub indices: Option<Vec<String>>,
    pub categories: Option<Vec<Category>>,
    pub acls: Option<Vec<Acl>>,
    pub ops: Option<Vec<Operation>>,
    pub limits: Option<Limits>,
}

/// Permission as returned to clients.
///
/// `password` is only populated in the response to the creating request.
#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub sources: Vec<String>,
    pub referers: Vec<String>,
    pub indices: Vec<String>,
    pub categories: Vec<Category>,
    pub acls: Vec<Acl>,
    pub ops: Vec<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
    pub created_at: DateTime<Utc>,
}

impl PermissionResponse {
    /// Response that includes the generated secret.
    pub fn with_secret(permission: &Permission) -> Self {
        Self {
            password: Some(permission.password.clone()),
            ..Self::from(permission)
        }
    }
}

impl From<&Permission> for PermissionResponse {
    fn from(p: &Permission) -> Self {
        Self {
            username: p.username.clone(),
            password: None,
            owner: p.owner.clone(),
            expires_at: p.expires_at,
            sources: p.sources.clone(),
            referers: p.referers.clone(),
            indices: p.indices.clone(),
            categories: p.categories.clone(),
            acls: p.acls.clone(),
            ops: p.ops.clone(),
            limits: p.limits,
            created_at: p.created_at,
        }
    }
}

/// Plain acknowledgement body.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend_circuit: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
