//! Extension modules shipped with the gateway.

mod analytics;
mod auth;
mod elasticsearch;

pub use analytics::AnalyticsExtension;
pub use auth::AuthExtension;
pub use elasticsearch::{ElasticsearchExtension, ProxyHandler};
