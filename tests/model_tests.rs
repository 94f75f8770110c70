//! Unit tests for domain models.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use serde_json::json;

// Note: These tests can be run with: cargo test --test model_tests

/// Classification vocabulary
mod classification_tests {
    use axum::http::Method;
    use search_gateway::models::{Acl, Category, Operation, RouteSpec};

    #[test]
    fn test_data_plane_categories() {
        for category in [
            Category::Docs,
            Category::Search,
            Category::Indices,
            Category::Cat,
            Category::Clusters,
            Category::Misc,
            Category::Streams,
        ] {
            assert!(category.is_from_es(), "{category}");
        }
        for category in [Category::User, Category::Permission] {
            assert!(!category.is_from_es(), "{category}");
        }
    }

    #[test]
    fn test_category_serialization() {
        assert_eq!(serde_json::to_string(&Category::Streams).unwrap(), "\"streams\"");
        let parsed: Vec<Category> = serde_json::from_str(r#"["docs","permission"]"#).unwrap();
        assert_eq!(parsed, vec![Category::Docs, Category::Permission]);
        assert!(serde_json::from_str::<Category>("\"Docs\"").is_err());
    }

    #[test]
    fn test_acl_display_matches_serde() {
        for acl in [Acl::Search, Acl::Bulk, Acl::Aliases, Acl::Permission] {
            let serialized = serde_json::to_string(&acl).unwrap();
            assert_eq!(serialized, format!("\"{acl}\""));
        }
    }

    #[test]
    fn test_operation_for_method() {
        assert_eq!(Operation::for_method(&Method::GET), Operation::Read);
        assert_eq!(Operation::for_method(&Method::HEAD), Operation::Read);
        assert_eq!(Operation::for_method(&Method::POST), Operation::Write);
        assert_eq!(Operation::for_method(&Method::PUT), Operation::Write);
        assert_eq!(Operation::for_method(&Method::PATCH), Operation::Write);
        assert_eq!(Operation::for_method(&Method::DELETE), Operation::Delete);
    }

    #[test]
    fn test_route_spec_equality() {
        let a = RouteSpec::new(Category::Search, Acl::Search, Operation::Read);
        let b = RouteSpec::new(Category::Search, Acl::Search, Operation::Read);
        assert_eq!(a, b);
        assert_ne!(a, RouteSpec::new(Category::Search, Acl::Count, Operation::Read));
    }
}

/// Stored credentials and the per-request credential
mod credential_tests {
    use super::*;
    use search_gateway::models::{Category, Credential, Limits, Permission, StoredCredential, User};

    #[test]
    fn test_user_document_defaults() {
        let user: User = serde_json::from_value(json!({
            "username": "alice",
            "password": "secret-password"
        }))
        .unwrap();
        assert!(!user.is_admin);
        assert!(user.email.is_none());
    }

    #[test]
    fn test_permission_document_defaults() {
        let permission: Permission = serde_json::from_value(json!({
            "username": "abcdefghijkl",
            "password": "0123456789abcdef0123456789abcdef",
            "owner": "alice"
        }))
        .unwrap();
        assert!(permission.categories.is_empty());
        assert!(permission.indices.is_empty());
        assert!(permission.limits.is_none());
        assert!(permission.expires_at.is_none());
    }

    #[test]
    fn test_permission_document_with_restrictions() {
        let permission: Permission = serde_json::from_value(json!({
            "username": "abcdefghijkl",
            "password": "s",
            "owner": "alice",
            "categories": ["search", "docs"],
            "indices": ["products*"],
            "limits": { "requests": 10, "window_secs": 60 }
        }))
        .unwrap();
        assert_eq!(permission.categories, vec![Category::Search, Category::Docs]);
        assert_eq!(
            permission.limits,
            Some(Limits {
                requests: 10,
                window_secs: 60
            })
        );
    }

    #[test]
    fn test_permission_expiry() {
        let now = Utc::now();
        let mut permission = Permission::new("p", "s", "alice");
        assert!(!permission.is_expired_at(now));

        permission.expires_at = Some(now - Duration::seconds(1));
        assert!(permission.is_expired_at(now));

        permission.expires_at = Some(now + Duration::hours(1));
        assert!(!permission.is_expired_at(now));
    }

    #[test]
    fn test_stored_credential_accessors() {
        let user = StoredCredential::User(User::new("alice", "pw", false));
        assert_eq!(user.name(), "alice");
        assert_eq!(user.secret(), "pw");

        let permission = StoredCredential::Permission(Permission::new("p", "s", "alice"));
        assert_eq!(permission.name(), "p");
        assert_eq!(permission.secret(), "s");
    }

    #[test]
    fn test_credential_helpers() {
        let master = Credential::Master(User::admin("root", "pw"));
        assert_eq!(master.kind(), "master");
        assert!(master.is_admin());
        assert!(master.permission().is_none());

        let user = Credential::User(User::new("alice", "pw", false));
        assert_eq!(user.kind(), "user");
        assert!(!user.is_admin());
        assert_eq!(user.user().map(|u| u.username.as_str()), Some("alice"));

        let permission = Credential::Permission(Permission::new("p", "s", "alice"));
        assert_eq!(permission.kind(), "permission");
        assert_eq!(permission.name(), "p");
        assert!(!permission.is_admin());
        assert!(permission.user().is_none());
    }
}

/// Management API bodies
mod api_tests {
    use super::*;
    use search_gateway::models::{
        Acl, CreatePermissionRequest, CreateUserRequest, HealthResponse, Permission,
        PermissionResponse, UpdateUserRequest, User, UserResponse,
    };

    #[test]
    fn test_create_user_request() {
        let request: CreateUserRequest = serde_json::from_value(json!({
            "username": "alice",
            "password": "secret-password"
        }))
        .unwrap();
        assert_eq!(request.username, "alice");
        assert!(!request.is_admin);
    }

    #[test]
    fn test_create_user_request_rejects_unknown_fields() {
        let result = serde_json::from_value::<CreateUserRequest>(json!({
            "username": "alice",
            "password": "secret-password",
            "role": "admin"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_update_user_request_is_partial() {
        let request: UpdateUserRequest =
            serde_json::from_value(json!({ "email": "alice@example.com" })).unwrap();
        assert!(request.password.is_none());
        assert!(request.is_admin.is_none());
        assert_eq!(request.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_create_permission_request_defaults() {
        let request: CreatePermissionRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.acls.is_empty());
        assert!(request.limits.is_none());

        let request: CreatePermissionRequest =
            serde_json::from_value(json!({ "acls": ["search", "count"] })).unwrap();
        assert_eq!(request.acls, vec![Acl::Search, Acl::Count]);
    }

    #[test]
    fn test_user_response_omits_password() {
        let user = User::new("alice", "secret-password", true);
        let json = serde_json::to_string(&UserResponse::from(&user)).unwrap();
        assert!(json.contains("\"username\":\"alice\""));
        assert!(json.contains("\"is_admin\":true"));
        assert!(!json.contains("secret-password"));
        assert!(!json.contains("password"));
    }

    #[test]
    fn test_permission_response_secret_only_on_creation() {
        let permission = Permission::new("abcdefghijkl", "the-secret", "alice");

        let listed = serde_json::to_value(PermissionResponse::from(&permission)).unwrap();
        assert!(listed.get("password").is_none());
        assert_eq!(listed["owner"], "alice");

        let created = serde_json::to_value(PermissionResponse::with_secret(&permission)).unwrap();
        assert_eq!(created["password"], "the-secret");
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            backend_circuit: "closed".to_string(),
            version: "0.1.0".to_string(),
            uptime_seconds: 42,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"backend_circuit\":\"closed\""));
        assert!(json.contains("\"uptime_seconds\":42"));
    }
}

/// Analytics documents
mod analytics_tests {
    use search_gateway::models::{AnalyticsRecord, KeyValue};

    #[test]
    fn test_follow_up_serializes_only_set_fields() {
        let record = AnalyticsRecord {
            click: Some(true),
            click_position: Some(2),
            ..AnalyticsRecord::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(json["click"], true);
    }

    #[test]
    fn test_merge_keeps_earlier_fields() {
        let mut stored = AnalyticsRecord {
            search_query: Some("shoes".into()),
            search_filters: Some(vec![KeyValue::new("brand", "acme")]),
            ..AnalyticsRecord::default()
        };
        stored.merge(AnalyticsRecord {
            conversion: Some(true),
            ..AnalyticsRecord::default()
        });
        assert_eq!(stored.search_query.as_deref(), Some("shoes"));
        assert_eq!(stored.conversion, Some(true));
        assert_eq!(stored.search_filters.map(|f| f.len()), Some(1));
    }
}

/// Config module tests
mod config_tests {
    use search_gateway::Config;
    use search_gateway::config::StoreBackend;

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.store_backend, StoreBackend::Elasticsearch);
        assert!(config.extensions.is_none());
        assert!(config.master_identity().is_none());
        assert!(config.rate_limiting_enabled());
    }

    #[test]
    fn test_master_identity_needs_both_halves() {
        let config = Config {
            master_username: Some("root".into()),
            ..Config::default()
        };
        assert!(config.master_identity().is_none());

        let config = Config {
            master_username: Some("root".into()),
            master_password: Some("pw".into()),
            ..Config::default()
        };
        assert_eq!(config.master_identity(), Some(("root", "pw")));
    }

    #[test]
    fn test_metrics_disabled_on_port_zero() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(!config.metrics_enabled());
        assert!(config.metrics_addr().is_none());
    }
}
