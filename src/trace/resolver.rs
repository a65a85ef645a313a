//! Target resolution over DNS-over-HTTPS with a synthetic fallback.

use super::{Provenance, TraceError};

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// DNS lookup error types.
#[derive(Error, Debug)]
pub enum DnsError {
    #[error("network error: {0}")]
    Network(String),
    #[error("resolver returned HTTP {0}")]
    Status(u16),
    #[error("malformed resolver response: {0}")]
    Decode(String),
}

/// A-record lookup collaborator.
#[async_trait]
pub trait DnsClient: Send + Sync {
    /// Returns the first IPv4 address for `name`, or `None` for an empty answer.
    async fn lookup_a(&self, name: &str) -> Result<Option<String>, DnsError>;
}

/// JSON DNS-over-HTTPS client (`GET <url>?name=<name>&type=A`).
pub struct DohClient {
    client: reqwest::Client,
    url: String,
}

impl DohClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: Option<u16>,
    data: String,
}

const RECORD_TYPE_A: u16 = 1;

#[async_trait]
impl DnsClient for DohClient {
    async fn lookup_a(&self, name: &str) -> Result<Option<String>, DnsError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("name", name), ("type", "A")])
            .send()
            .await
            .map_err(|e| DnsError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DnsError::Status(response.status().as_u16()));
        }

        let body: DohResponse = response
            .json()
            .await
            .map_err(|e| DnsError::Decode(e.to_string()))?;

        // CNAME records may precede the address in the answer section.
        Ok(body
            .answer
            .into_iter()
            .find(|a| a.record_type.map_or(true, |t| t == RECORD_TYPE_A))
            .map(|a| a.data))
    }
}

/// A resolved traceroute destination.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub ip: String,
    pub provenance: Provenance,
}

/// Resolves targets to IPv4 addresses.
#[derive(Clone)]
pub struct Resolver {
    dns: Arc<dyn DnsClient>,
    synthetic_fallback: bool,
}

impl Resolver {
    pub fn new(dns: Arc<dyn DnsClient>, synthetic_fallback: bool) -> Self {
        Self {
            dns,
            synthetic_fallback,
        }
    }

    /// Resolve `target`.
    ///
    /// Dotted-quad literals are returned as-is without a lookup. When the lookup
    /// fails or comes back empty a random public-looking address is returned,
    /// unless the synthetic fallback is disabled.
    pub async fn resolve(&self, target: &str) -> Result<ResolvedTarget, TraceError> {
        if is_dotted_quad(target) {
            return Ok(ResolvedTarget {
                ip: target.to_string(),
                provenance: Provenance::Resolved,
            });
        }

        match self.dns.lookup_a(target).await {
            Ok(Some(ip)) => {
                return Ok(ResolvedTarget {
                    ip,
                    provenance: Provenance::Resolved,
                })
            }
            Ok(None) => tracing::warn!("DNS returned no A records for {}", target),
            Err(e) => tracing::warn!("DNS resolution error for {}: {}", target, e),
        }

        if !self.synthetic_fallback {
            return Err(TraceError::Unresolved(target.to_string()));
        }

        let ip = random_public_ip();
        tracing::debug!("Using synthetic address {} for {}", ip, target);
        Ok(ResolvedTarget {
            ip,
            provenance: Provenance::Simulated,
        })
    }
}

fn is_dotted_quad(s: &str) -> bool {
    static DOTTED_QUAD: OnceLock<Regex> = OnceLock::new();
    DOTTED_QUAD
        .get_or_init(|| {
            Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").expect("static regex is valid")
        })
        .is_match(s)
}

/// Generate a random address with a first octet in 20..=219.
pub fn random_public_ip() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}.{}.{}.{}",
        rng.gen_range(20..220),
        rng.gen_range(0..255),
        rng.gen_range(0..255),
        rng.gen_range(0..255)
    )
}
