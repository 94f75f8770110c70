use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Acl, Category, Operation};

/// A gateway user, stored in the users index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>, is_admin: bool) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            is_admin,
            email: None,
            created_at: Utc::now(),
        }
    }

    /// Admin user, as seeded by the master bootstrap.
    pub fn admin(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(username, password, true)
    }
}

/// Per-identity request quota: `requests` admitted per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub requests: u32,
    pub window_secs: u64,
}

/// A scoped credential issued by a user, stored in the permissions index.
///
/// Empty restriction lists mean "unrestricted" for that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub username: String,
    pub password: String,
    pub owner: String,
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
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Permission {
    /// Unrestricted permission owned by `owner`.
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            owner: owner.into(),
            expires_at: None,
            sources: Vec::new(),
            referers: Vec::new(),
            indices: Vec::new(),
            categories: Vec::new(),
            acls: Vec::new(),
            ops: Vec::new(),
            limits: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Record returned by a store lookup by identity name.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredCredential {
    User(User),
    Permission(Permission),
}

impl StoredCredential {
    pub fn name(&self) -> &str {
        match self {
            StoredCredential::User(u) => &u.username,
            StoredCredential::Permission(p) => &p.username,
        }
    }

    pub fn secret(&self) -> &str {
        match self {
            StoredCredential::User(u) => &u.password,
            StoredCredential::Permission(p) => &p.password,
        }
    }
}

/// Identity resolved for the current request.
///
/// Exactly one variant is attached per authenticated request. `Master` carries
/// the admin user record seeded from the bootstrap identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Credential {
    Master(User),
    User(User),
    Permission(Permission),
}

impl Credential {
    pub fn name(&self) -> &str {
        match self {
            Credential::Master(u) | Credential::User(u) => &u.username,
            Credential::Permission(p) => &p.username,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Master(_) => "master",
            Credential::User(_) => "user",
            Credential::Permission(_) => "permission",
        }
    }

    /// The user record behind a master or user credential.
    pub fn user(&self) -> Option<&User> {
        match self {
            Credential::Master(u) | Credential::User(u) => Some(u),
            Credential::Permission(_) => None,
        }
    }

    pub fn permission(&self) -> Option<&Permission> {
        match self {
            Credential::Permission(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user().is_some_and(|u| u.is_admin)
    }
}

impl From<StoredCredential> for Credential {
    fn from(stored: StoredCredential) -> Self {
        match stored {
            StoredCredential::User(u) => Credential::User(u),
            StoredCredential::Permission(p) => Credential::Permission(p),
        }
    }
}
