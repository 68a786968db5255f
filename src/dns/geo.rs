//! IP geolocation lookups.
//!
//! Used only as a fallback hint for classification; every failure degrades
//! to [`UNKNOWN_LOCATION`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Label returned when an address cannot be located.
pub const UNKNOWN_LOCATION: &str = "Unknown location";

/// Default geolocation endpoint; `{ip}` is replaced with the address.
pub const DEFAULT_GEO_URL: &str = "http://ip-api.com/json/{ip}?fields=status,countryCode";

/// Capability to map an address to a country or region label.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> String;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeoResponse {
    status: String,
    #[serde(default)]
    country_code: Option<String>,
}

/// HTTP geolocation service client.
pub struct IpApiLocator {
    client: reqwest::Client,
    url_template: String,
}

impl IpApiLocator {
    /// Create a client for `url_template` (must contain `{ip}`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    async fn fetch(&self, ip: IpAddr) -> crate::Result<String> {
        let url = self.url_template.replace("{ip}", &ip.to_string());
        let response: GeoResponse = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match (response.status.as_str(), response.country_code) {
            ("success", Some(code)) if !code.is_empty() => Ok(code),
            (status, _) => Err(crate::Error::network(format!(
                "geolocation lookup for {ip} returned status {status}"
            ))),
        }
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn locate(&self, ip: IpAddr) -> String {
        match self.fetch(ip).await {
            Ok(label) => label,
            Err(e) => {
                tracing::debug!("geolocation failed for {ip}: {e}");
                UNKNOWN_LOCATION.to_string()
            }
        }
    }
}

/// Memoizing wrapper so each address is looked up at most once per run.
pub struct CachedLocator {
    inner: Arc<dyn GeoLocator>,
    cache: DashMap<IpAddr, String>,
}

impl CachedLocator {
    pub fn new(inner: Arc<dyn GeoLocator>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Cached label, if the address was already located.
    #[must_use]
    pub fn cached(&self, ip: IpAddr) -> Option<String> {
        self.cache.get(&ip).map(|v| v.value().clone())
    }
}

#[async_trait]
impl GeoLocator for CachedLocator {
    async fn locate(&self, ip: IpAddr) -> String {
        if let Some(hit) = self.cached(ip) {
            return hit;
        }
        let label = self.inner.locate(ip).await;
        self.cache.insert(ip, label.clone());
        label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLocator(AtomicUsize);

    #[async_trait]
    impl GeoLocator for CountingLocator {
        async fn locate(&self, _ip: IpAddr) -> String {
            self.0.fetch_add(1, Ordering::SeqCst);
            "DE".to_string()
        }
    }

    #[tokio::test]
    async fn test_cached_locator_hits_once() {
        let inner = Arc::new(CountingLocator(AtomicUsize::new(0)));
        let cached = CachedLocator::new(inner.clone());
        let ip: IpAddr = "203.0.113.9".parse().unwrap();

        assert_eq!(cached.locate(ip).await, "DE");
        assert_eq!(cached.locate(ip).await, "DE");
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cached(ip).as_deref(), Some("DE"));
    }

    #[tokio::test]
    async fn test_unreachable_service_degrades() {
        let locator =
            IpApiLocator::new("http://127.0.0.1:9/{ip}", Duration::from_millis(300)).unwrap();
        let label = locator.locate("203.0.113.9".parse().unwrap()).await;
        assert_eq!(label, UNKNOWN_LOCATION);
    }

    #[test]
    fn test_response_shape() {
        let ok: GeoResponse =
            serde_json::from_str(r#"{"status":"success","countryCode":"JP"}"#).unwrap();
        assert_eq!(ok.country_code.as_deref(), Some("JP"));
        let failed: GeoResponse = serde_json::from_str(r#"{"status":"fail"}"#).unwrap();
        assert!(failed.country_code.is_none());
    }
}
