//! Client IP extraction from forwarding headers.
//!
//! # Spoofing
//!
//! These functions trust client-provided headers. The gateway must sit behind
//! a reverse proxy that overwrites `X-Forwarded-For` / `X-Real-IP`; otherwise
//! callers can choose the address used for brute-force lockouts, source
//! restrictions and analytics geolocation.
//!
//! When no header is present every such request shares the [`UNKNOWN_IP`] key.

use std::borrow::Cow;

use axum::http::HeaderMap;
use tracing::debug;

use super::rate_limit::TrustedProxyConfig;

/// Fallback when no client IP can be determined.
pub const UNKNOWN_IP: &str = "unknown";

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

/// First address of `X-Forwarded-For`, else `X-Real-IP`.
#[inline]
fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp<'_> {
    // "client, proxy1, proxy2"
    if let Some(forwarded) = headers.get(FORWARDED_FOR_HEADER)
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = headers.get(REAL_IP_HEADER)
        && let Ok(value) = real_ip.to_str()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Extract the client IP, logging the source when proxy validation is on.
///
/// Returns a borrowed [`UNKNOWN_IP`] when no header is present, an owned
/// address otherwise.
#[inline]
pub fn extract_client_ip_with_validation(
    headers: &HeaderMap,
    trusted_proxies: &TrustedProxyConfig,
) -> Cow<'static, str> {
    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) => {
            if trusted_proxies.is_enabled() {
                debug!(client_ip = %ip, "Client IP from X-Forwarded-For");
            }
            Cow::Owned(ip.to_string())
        }
        ExtractedIp::FromRealIp(ip) => {
            if trusted_proxies.is_enabled() {
                debug!(client_ip = %ip, "Client IP from X-Real-IP");
            }
            Cow::Owned(ip.to_string())
        }
        ExtractedIp::NotFound => {
            if trusted_proxies.is_enabled() {
                debug!("No proxy headers found - request may be bypassing reverse proxy");
            }
            Cow::Borrowed(UNKNOWN_IP)
        }
    }
}

/// Extract the client IP without any logging.
#[inline]
pub fn extract_client_ip(headers: &HeaderMap) -> Cow<'static, str> {
    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ExtractedIp::NotFound => Cow::Borrowed(UNKNOWN_IP),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_extract_ip_from_xff_chain() {
        let h = headers(&[(FORWARDED_FOR_HEADER, "  192.168.1.1  , 10.0.0.1")]);
        assert_eq!(extract_client_ip(&h), "192.168.1.1");
    }

    #[test]
    fn test_extract_ip_from_real_ip() {
        let h = headers(&[(REAL_IP_HEADER, "::1")]);
        assert_eq!(extract_client_ip(&h), "::1");
    }

    #[test]
    fn test_xff_takes_priority_over_real_ip() {
        let h = headers(&[
            (FORWARDED_FOR_HEADER, "10.0.0.1"),
            (REAL_IP_HEADER, "192.168.1.1"),
        ]);
        assert_eq!(extract_client_ip(&h), "10.0.0.1");
    }

    #[test]
    fn test_unknown_is_borrowed() {
        let ip =
            extract_client_ip_with_validation(&HeaderMap::new(), &TrustedProxyConfig::default());
        assert_eq!(ip, UNKNOWN_IP);
        assert!(matches!(ip, Cow::Borrowed(_)));
    }

    #[test]
    fn test_empty_xff_yields_empty_string() {
        // split always yields one element, so an empty header is not "unknown"
        let h = headers(&[(FORWARDED_FOR_HEADER, "")]);
        assert_eq!(extract_client_ip(&h), "");
    }

    #[test]
    fn test_port_is_passed_through() {
        let h = headers(&[(FORWARDED_FOR_HEADER, "192.168.1.1:8080, 10.0.0.1")]);
        assert_eq!(extract_client_ip(&h), "192.168.1.1:8080");
    }
}
