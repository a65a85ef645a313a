//! IP geolocation over a fixed chain of public providers.

use super::is_private_ip;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Geolocation error types.
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider returned HTTP {0}")]
    Status(u16),
    #[error("malformed provider response: {0}")]
    Decode(String),
    #[error("{0} did not report a successful lookup")]
    Unrecognized(&'static str),
}

/// Normalized location for one IP address.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
    pub city: String,
    pub region: String,
    pub country: String,
    pub country_code: String,
    pub isp: String,
    pub org: String,
    #[serde(rename = "as")]
    pub as_name: String,
    /// The queried address.
    pub query: String,
}

const UNKNOWN: &str = "Unknown";
const UNKNOWN_ISP: &str = "Unknown ISP";
const UNKNOWN_COUNTRY_CODE: &str = "XX";

/// Supported geolocation services, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoApi {
    /// IP2Location.io
    Ip2Location,
    /// ip-api.com
    IpApi,
    /// ipwhois.app
    IpWhois,
}

impl GeoApi {
    pub fn name(&self) -> &'static str {
        match self {
            GeoApi::Ip2Location => "ip2location.io",
            GeoApi::IpApi => "ip-api.com",
            GeoApi::IpWhois => "ipwhois.app",
        }
    }

    /// All providers in the order they are consulted.
    pub fn all() -> &'static [GeoApi] {
        &[GeoApi::Ip2Location, GeoApi::IpApi, GeoApi::IpWhois]
    }

    /// Lookup URL for `ip` under the provider's base URL.
    pub fn url(&self, base: &str, ip: &str) -> String {
        let base = base.trim_end_matches('/');
        match self {
            GeoApi::Ip2Location => format!("{}/?ip={}", base, ip),
            GeoApi::IpApi => format!(
                "{}/json/{}?fields=status,message,country,countryCode,region,regionName,city,lat,lon,isp,org,as,query",
                base, ip
            ),
            GeoApi::IpWhois => format!("{}/json/{}", base, ip),
        }
    }

    /// Map a provider payload onto [`GeoLocation`].
    pub fn normalize(&self, body: &Value, ip: &str) -> Result<GeoLocation, GeoError> {
        match self {
            GeoApi::Ip2Location => {
                let failed = body.get("error").map_or(false, |e| !e.is_null());
                if failed || text(body, "country_code").is_none() {
                    return Err(GeoError::Unrecognized(self.name()));
                }
                Ok(GeoLocation {
                    lat: number(body, "latitude"),
                    lon: number(body, "longitude"),
                    city: text_or(body, "city_name", UNKNOWN),
                    region: text_or(body, "region_name", UNKNOWN),
                    country: text_or(body, "country_name", UNKNOWN),
                    country_code: text_or(body, "country_code", UNKNOWN_COUNTRY_CODE),
                    isp: text_or(body, "isp", UNKNOWN_ISP),
                    org: text_or(body, "as", UNKNOWN),
                    as_name: text_or(body, "asn", UNKNOWN),
                    query: ip.to_string(),
                })
            }
            GeoApi::IpApi => {
                if body.get("status").and_then(Value::as_str) != Some("success") {
                    return Err(GeoError::Unrecognized(self.name()));
                }
                Ok(GeoLocation {
                    lat: number(body, "lat"),
                    lon: number(body, "lon"),
                    city: text_or(body, "city", UNKNOWN),
                    region: text_or(body, "regionName", UNKNOWN),
                    country: text_or(body, "country", UNKNOWN),
                    country_code: text_or(body, "countryCode", UNKNOWN_COUNTRY_CODE),
                    isp: text_or(body, "isp", UNKNOWN_ISP),
                    org: text_or(body, "org", UNKNOWN),
                    as_name: text_or(body, "as", UNKNOWN),
                    query: text_or(body, "query", ip),
                })
            }
            GeoApi::IpWhois => {
                if body.get("success").and_then(Value::as_bool) != Some(true) {
                    return Err(GeoError::Unrecognized(self.name()));
                }
                Ok(GeoLocation {
                    lat: number(body, "latitude"),
                    lon: number(body, "longitude"),
                    city: text_or(body, "city", UNKNOWN),
                    region: text_or(body, "region", UNKNOWN),
                    country: text_or(body, "country", UNKNOWN),
                    country_code: text_or(body, "country_code", UNKNOWN_COUNTRY_CODE),
                    isp: text_or(body, "isp", UNKNOWN_ISP),
                    org: text_or(body, "org", UNKNOWN),
                    as_name: text_or(body, "asn", UNKNOWN),
                    query: ip.to_string(),
                })
            }
        }
    }
}

fn text(body: &Value, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_or(body: &Value, key: &str, default: &str) -> String {
    text(body, key).unwrap_or_else(|| default.to_string())
}

fn number(body: &Value, key: &str) -> f64 {
    match body.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// One geolocation source.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError>;
}

/// HTTP client for one [`GeoApi`].
pub struct HttpGeoProvider {
    api: GeoApi,
    base_url: String,
    client: reqwest::Client,
}

impl HttpGeoProvider {
    pub fn new(api: GeoApi, base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            api,
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    fn name(&self) -> &'static str {
        self.api.name()
    }

    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError> {
        let response = self
            .client
            .get(self.api.url(&self.base_url, ip))
            .send()
            .await
            .map_err(|e| GeoError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GeoError::Status(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| GeoError::Decode(e.to_string()))?;

        self.api.normalize(&body, ip)
    }
}

/// Tries each provider in order and returns the first location found.
#[derive(Clone)]
pub struct GeoLocator {
    providers: Vec<Arc<dyn GeoProvider>>,
}

impl GeoLocator {
    pub fn new(providers: Vec<Arc<dyn GeoProvider>>) -> Self {
        Self { providers }
    }

    /// Build the standard three-provider chain.
    pub fn http(client: reqwest::Client, ip2location: &str, ip_api: &str, ipwhois: &str) -> Self {
        let bases = [ip2location, ip_api, ipwhois];
        let providers = GeoApi::all()
            .iter()
            .zip(bases)
            .map(|(api, base)| {
                Arc::new(HttpGeoProvider::new(*api, base, client.clone())) as Arc<dyn GeoProvider>
            })
            .collect();
        Self::new(providers)
    }

    /// Locate `ip`. Private or malformed addresses return `None` without any request.
    pub async fn lookup(&self, ip: &str) -> Option<GeoLocation> {
        if is_private_ip(ip) {
            return None;
        }

        for provider in &self.providers {
            match provider.lookup(ip).await {
                Ok(location) => {
                    tracing::debug!("Located {} via {}", ip, provider.name());
                    return Some(location);
                }
                Err(e) => {
                    tracing::debug!("Geolocation via {} failed for {}: {}", provider.name(), ip, e);
                }
            }
        }

        tracing::warn!("All geolocation providers failed for {}", ip);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{extract::Path, routing::get, Json, Router};
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingProvider {
        name: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
        result: Option<GeoLocation>,
    }

    #[async_trait]
    impl GeoProvider for RecordingProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError> {
            self.calls.lock().unwrap().push(self.name);
            self.result
                .clone()
                .map(|mut loc| {
                    loc.query = ip.to_string();
                    loc
                })
                .ok_or(GeoError::Unrecognized(self.name))
        }
    }

    fn chain(results: [Option<GeoLocation>; 3]) -> (GeoLocator, Arc<Mutex<Vec<&'static str>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let names = ["first", "second", "third"];
        let providers = names
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                Arc::new(RecordingProvider {
                    name,
                    calls: calls.clone(),
                    result,
                }) as Arc<dyn GeoProvider>
            })
            .collect();
        (GeoLocator::new(providers), calls)
    }

    fn located(city: &str) -> GeoLocation {
        GeoLocation {
            city: city.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_private_ip_makes_no_calls() {
        let (locator, calls) = chain([Some(located("A")), None, None]);
        assert!(locator.lookup("192.168.1.1").await.is_none());
        assert!(locator.lookup("not-an-ip").await.is_none());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_failing_tries_each_once_in_order() {
        let (locator, calls) = chain([None, None, None]);
        assert!(locator.lookup("8.8.8.8").await.is_none());
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let (locator, calls) = chain([None, Some(located("Zurich")), Some(located("Oslo"))]);
        let location = locator.lookup("8.8.8.8").await.unwrap();
        assert_eq!(location.city, "Zurich");
        assert_eq!(location.query, "8.8.8.8");
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_ip2location_normalization() {
        let body = json!({
            "ip": "8.8.8.8",
            "country_code": "US",
            "country_name": "United States of America",
            "region_name": "California",
            "city_name": "Mountain View",
            "latitude": 37.38605,
            "longitude": -122.08385,
            "asn": "15169",
            "as": "Google LLC"
        });
        let loc = GeoApi::Ip2Location.normalize(&body, "8.8.8.8").unwrap();
        assert_eq!(loc.country_code, "US");
        assert_eq!(loc.org, "Google LLC");
        assert_eq!(loc.as_name, "15169");
        assert_eq!(loc.isp, "Unknown ISP");
        assert!((loc.lat - 37.38605).abs() < 1e-9);

        let error = json!({"error": {"error_code": 10001, "error_message": "Invalid API key."}});
        assert!(GeoApi::Ip2Location.normalize(&error, "8.8.8.8").is_err());
        assert!(GeoApi::Ip2Location.normalize(&json!({}), "8.8.8.8").is_err());
    }

    #[test]
    fn test_ip_api_normalization() {
        let body = json!({
            "status": "success",
            "country": "Germany",
            "countryCode": "DE",
            "regionName": "Hesse",
            "city": "",
            "lat": 50.1,
            "lon": 8.6,
            "isp": "Hetzner",
            "org": "",
            "as": "AS24940 Hetzner Online GmbH",
            "query": "88.99.0.1"
        });
        let loc = GeoApi::IpApi.normalize(&body, "88.99.0.1").unwrap();
        assert_eq!(loc.city, "Unknown");
        assert_eq!(loc.org, "Unknown");
        assert_eq!(loc.region, "Hesse");
        assert_eq!(loc.as_name, "AS24940 Hetzner Online GmbH");

        let fail = json!({"status": "fail", "message": "reserved range"});
        assert!(GeoApi::IpApi.normalize(&fail, "88.99.0.1").is_err());
    }

    #[test]
    fn test_ipwhois_normalization() {
        let body = json!({"success": true, "latitude": "48.85", "longitude": 2.35});
        let loc = GeoApi::IpWhois.normalize(&body, "51.15.0.1").unwrap();
        assert_eq!(loc.country_code, "XX");
        assert_eq!(loc.country, "Unknown");
        assert_eq!(loc.query, "51.15.0.1");
        assert!((loc.lat - 48.85).abs() < 1e-9);

        assert!(GeoApi::IpWhois
            .normalize(&json!({"success": false}), "51.15.0.1")
            .is_err());
    }

    #[test]
    fn test_provider_urls() {
        assert_eq!(
            GeoApi::Ip2Location.url("https://api.ip2location.io/", "1.2.3.4"),
            "https://api.ip2location.io/?ip=1.2.3.4"
        );
        assert!(GeoApi::IpApi
            .url("http://ip-api.com", "1.2.3.4")
            .starts_with("http://ip-api.com/json/1.2.3.4?fields=status"));
        assert_eq!(
            GeoApi::IpWhois.url("https://ipwhois.app", "1.2.3.4"),
            "https://ipwhois.app/json/1.2.3.4"
        );
    }

    #[tokio::test]
    async fn test_http_chain_falls_through_to_ipwhois() {
        let router = Router::new()
            .route(
                "/ip2l/",
                get(|| async { (axum::http::StatusCode::TOO_MANY_REQUESTS, "quota") }),
            )
            .route(
                "/ipapi/json/{ip}",
                get(|Path(ip): Path<String>| async move {
                    Json(json!({"status": "fail", "query": ip}))
                }),
            )
            .route(
                "/ipwhois/json/{ip}",
                get(|Path(_ip): Path<String>| async move {
                    Json(json!({
                        "success": true,
                        "city": "Amsterdam",
                        "country": "Netherlands",
                        "country_code": "NL",
                        "latitude": 52.37,
                        "longitude": 4.89,
                        "asn": "AS1136"
                    }))
                }),
            );
        let base = serve(router).await;
        let locator = GeoLocator::http(
            reqwest::Client::new(),
            &format!("{}/ip2l", base),
            &format!("{}/ipapi", base),
            &format!("{}/ipwhois", base),
        );

        let loc = locator.lookup("145.1.2.3").await.unwrap();
        assert_eq!(loc.city, "Amsterdam");
        assert_eq!(loc.country_code, "NL");
        assert_eq!(loc.as_name, "AS1136");
        assert_eq!(loc.query, "145.1.2.3");
    }
}
