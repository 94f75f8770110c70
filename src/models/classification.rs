use std::fmt;

use axum::http::Method;
use serde::{Deserialize, Serialize};

/// Resource family a route belongs to.
///
/// The family decides which plane a request targets: the search engine's
/// own data plane, or the gateway's identity-management plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Docs,
    Search,
    Indices,
    Cat,
    Clusters,
    Misc,
    Streams,
    User,
    Permission,
}

impl Category {
    /// Whether requests in this family are served by the search engine.
    pub fn is_from_es(self) -> bool {
        matches!(
            self,
            Category::Docs
                | Category::Search
                | Category::Indices
                | Category::Cat
                | Category::Clusters
                | Category::Misc
                | Category::Streams
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Docs => "docs",
            Category::Search => "search",
            Category::Indices => "indices",
            Category::Cat => "cat",
            Category::Clusters => "clusters",
            Category::Misc => "misc",
            Category::Streams => "streams",
            Category::User => "user",
            Category::Permission => "permission",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained action a route performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acl {
    Info,
    Cat,
    Cluster,
    Nodes,
    Search,
    Count,
    Bulk,
    Doc,
    Get,
    Create,
    Update,
    Delete,
    Mapping,
    Settings,
    Aliases,
    Refresh,
    Stats,
    User,
    Permission,
}

impl Acl {
    pub fn as_str(self) -> &'static str {
        match self {
            Acl::Info => "info",
            Acl::Cat => "cat",
            Acl::Cluster => "cluster",
            Acl::Nodes => "nodes",
            Acl::Search => "search",
            Acl::Count => "count",
            Acl::Bulk => "bulk",
            Acl::Doc => "doc",
            Acl::Get => "get",
            Acl::Create => "create",
            Acl::Update => "update",
            Acl::Delete => "delete",
            Acl::Mapping => "mapping",
            Acl::Settings => "settings",
            Acl::Aliases => "aliases",
            Acl::Refresh => "refresh",
            Acl::Stats => "stats",
            Acl::User => "user",
            Acl::Permission => "permission",
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse CRUD-like operation of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Delete,
}

impl Operation {
    /// Conventional operation for a method on a plain resource route.
    ///
    /// Search-style routes that read through POST bodies declare
    /// `Operation::Read` explicitly instead.
    pub fn for_method(method: &Method) -> Self {
        match *method {
            Method::DELETE => Operation::Delete,
            Method::POST | Method::PUT | Method::PATCH => Operation::Write,
            _ => Operation::Read,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification attached to a `(method, template)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub category: Category,
    pub acl: Acl,
    pub op: Operation,
}

impl RouteSpec {
    pub const fn new(category: Category, acl: Acl, op: Operation) -> Self {
        Self { category, acl, op }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_plane_categories() {
        assert!(Category::Search.is_from_es());
        assert!(Category::Streams.is_from_es());
        assert!(Category::Cat.is_from_es());
        assert!(!Category::User.is_from_es());
        assert!(!Category::Permission.is_from_es());
    }

    #[test]
    fn test_operation_for_method() {
        assert_eq!(Operation::for_method(&Method::GET), Operation::Read);
        assert_eq!(Operation::for_method(&Method::HEAD), Operation::Read);
        assert_eq!(Operation::for_method(&Method::PUT), Operation::Write);
        assert_eq!(Operation::for_method(&Method::DELETE), Operation::Delete);
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&Category::Streams).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", Category::Streams));
        let json = serde_json::to_string(&Acl::Mapping).unwrap_or_default();
        assert_eq!(json, format!("\"{}\"", Acl::Mapping));
    }
}
