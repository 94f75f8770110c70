mod analytics;
mod api;
mod classification;
mod credential;

pub use analytics::{AnalyticsRecord, Coordinates, HitSummary, KeyValue};
pub use api::{
    CreatePermissionRequest, CreateUserRequest, HealthResponse, MessageResponse,
    PermissionResponse, UpdatePermissionRequest, UpdateUserRequest, UserResponse,
};
pub use classification::{Acl, Category, Operation, RouteSpec};
pub use credential::{Credential, Limits, Permission, StoredCredential, User};
