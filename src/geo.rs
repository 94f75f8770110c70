//! Client IP geolocation for analytics records.
//!
//! Lookups run on the background analytics path only, so a slow or failing
//! service never delays a client response.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::trace;

use crate::error::GeoError;
use crate::models::Coordinates;

/// Where an address is.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub country: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: &str) -> Result<Location, GeoError>;
}

/// Parse `ip` and reject addresses no public lookup service can place.
pub fn routable_address(ip: &str) -> Result<IpAddr, GeoError> {
    let unroutable = || GeoError::UnroutableAddress(ip.to_string());
    let addr: IpAddr = ip.trim().parse().map_err(|_| unroutable())?;
    let local = match addr {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    };
    if local { Err(unroutable()) } else { Ok(addr) }
}

/// Lookup against an ipapi-style service: `GET {base}/{ip}/json`.
#[derive(Debug, Clone)]
pub struct HttpGeoLocator {
    client: Client,
    base: Url,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    error: bool,
    country_name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl HttpGeoLocator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GeoError> {
        let base = Url::parse(base_url)
            .map_err(|_| GeoError::UnroutableAddress(base_url.to_string()))?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn url(&self, ip: &IpAddr) -> Result<Url, GeoError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| GeoError::UnroutableAddress(self.base.to_string()))?
            .pop_if_empty()
            .push(&ip.to_string())
            .push("json");
        Ok(url)
    }
}

#[async_trait]
impl GeoLocator for HttpGeoLocator {
    async fn locate(&self, ip: &str) -> Result<Location, GeoError> {
        let addr = routable_address(ip)?;
        let response = self.client.get(self.url(&addr)?).send().await?;
        if !response.status().is_success() {
            return Err(GeoError::Status(response.status().as_u16()));
        }

        let body: LookupResponse = response.json().await?;
        if body.error {
            return Err(GeoError::UnroutableAddress(ip.to_string()));
        }
        trace!(ip, country = ?body.country_name, "Address located");

        Ok(Location {
            country: body.country_name,
            coordinates: match (body.latitude, body.longitude) {
                (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
                _ => None,
            },
        })
    }
}

/// Used when no lookup service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGeoLocator;

#[async_trait]
impl GeoLocator for DisabledGeoLocator {
    async fn locate(&self, _ip: &str) -> Result<Location, GeoError> {
        Err(GeoError::Disabled)
    }
}
