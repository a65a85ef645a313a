//! Configuration module for Visual Traceroute.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite state database (default: "traceroute-state.db")
    pub db_path: String,
    /// Key under which the schedule collection is stored
    pub state_key: String,
    /// DNS-over-HTTPS JSON endpoint
    pub dns_url: String,
    pub ip2location_url: String,
    pub ip_api_url: String,
    pub ipwhois_url: String,
    /// Timeout applied to every outbound HTTP request (default: 10s)
    pub http_timeout: Duration,
    /// Maximum in-flight geolocation lookups per traceroute (default: 1)
    pub geo_concurrency: usize,
    /// Pause between sequential geolocation lookups
    pub geo_request_delay: Duration,
    /// Substitute a random address when DNS resolution fails (default: true)
    pub synthetic_fallback: bool,
    /// Period of the background sweep; zero disables it (default: 300s)
    pub sweep_interval: Duration,
    /// Log ingest endpoint. Records are written to the tracing log when unset.
    pub log_ingest_url: Option<String>,
    pub log_ingest_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "traceroute-state.db".to_string(),
            state_key: "traceroute-schedules".to_string(),
            dns_url: "https://dns.google/resolve".to_string(),
            ip2location_url: "https://api.ip2location.io".to_string(),
            ip_api_url: "http://ip-api.com".to_string(),
            ipwhois_url: "https://ipwhois.app".to_string(),
            http_timeout: Duration::from_secs(10),
            geo_concurrency: 1,
            geo_request_delay: Duration::ZERO,
            synthetic_fallback: true,
            sweep_interval: Duration::from_secs(300),
            log_ingest_url: None,
            log_ingest_token: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TRACEROUTE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `TRACEROUTE_DB_PATH`: Database file path (default: "traceroute-state.db"; empty keeps state in memory)
    /// - `TRACEROUTE_STATE_KEY`: Schedule collection key (default: "traceroute-schedules")
    /// - `TRACEROUTE_DNS_URL`: DoH resolver endpoint
    /// - `TRACEROUTE_IP2LOCATION_URL`, `TRACEROUTE_IP_API_URL`, `TRACEROUTE_IPWHOIS_URL`:
    ///   geolocation provider base URLs
    /// - `TRACEROUTE_HTTP_TIMEOUT_SECS`: outbound request timeout (default: 10)
    /// - `TRACEROUTE_GEO_CONCURRENCY`: parallel geolocation lookups (default: 1)
    /// - `TRACEROUTE_GEO_DELAY_MS`: delay between sequential lookups (default: 0)
    /// - `TRACEROUTE_SYNTHETIC_FALLBACK`: "true"/"false" (default: true)
    /// - `TRACEROUTE_SWEEP_INTERVAL_SECS`: sweep period, 0 disables (default: 300)
    /// - `TRACEROUTE_LOG_INGEST_URL`, `TRACEROUTE_LOG_INGEST_TOKEN`: log ingest target
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parse_var(&lookup, "TRACEROUTE_HTTP_PORT") {
            cfg.http_port = port;
        }
        if let Some(path) = lookup("TRACEROUTE_DB_PATH") {
            cfg.db_path = path;
        }
        if let Some(key) = lookup("TRACEROUTE_STATE_KEY").filter(|k| !k.is_empty()) {
            cfg.state_key = key;
        }
        if let Some(url) = lookup("TRACEROUTE_DNS_URL") {
            cfg.dns_url = url;
        }
        if let Some(url) = lookup("TRACEROUTE_IP2LOCATION_URL") {
            cfg.ip2location_url = url;
        }
        if let Some(url) = lookup("TRACEROUTE_IP_API_URL") {
            cfg.ip_api_url = url;
        }
        if let Some(url) = lookup("TRACEROUTE_IPWHOIS_URL") {
            cfg.ipwhois_url = url;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "TRACEROUTE_HTTP_TIMEOUT_SECS") {
            if secs > 0 {
                cfg.http_timeout = Duration::from_secs(secs);
            }
        }
        if let Some(n) = parse_var::<usize, _>(&lookup, "TRACEROUTE_GEO_CONCURRENCY") {
            cfg.geo_concurrency = n.max(1);
        }
        if let Some(ms) = parse_var(&lookup, "TRACEROUTE_GEO_DELAY_MS") {
            cfg.geo_request_delay = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_var(&lookup, "TRACEROUTE_SYNTHETIC_FALLBACK") {
            cfg.synthetic_fallback = flag;
        }
        if let Some(secs) = parse_var(&lookup, "TRACEROUTE_SWEEP_INTERVAL_SECS") {
            cfg.sweep_interval = Duration::from_secs(secs);
        }
        cfg.log_ingest_url = lookup("TRACEROUTE_LOG_INGEST_URL").filter(|u| !u.is_empty());
        cfg.log_ingest_token = lookup("TRACEROUTE_LOG_INGEST_TOKEN").filter(|t| !t.is_empty());

        cfg
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}
