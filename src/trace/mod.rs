//! Simulated traceroute execution.
//!
//! Hop chains are synthesized; only the final hop is resolved through
//! DNS-over-HTTPS and public hops are enriched with geolocation.

mod classify;
mod geo;
mod resolver;
mod simulator;

pub use classify::*;
pub use geo::*;
pub use resolver::*;
pub use simulator::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Traceroute error types.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("could not resolve target {0}")]
    Unresolved(String),
}

/// Where a hop address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// A literal address or a DNS answer.
    Resolved,
    /// Randomly generated filler.
    #[default]
    Simulated,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Resolved => "resolved",
            Provenance::Simulated => "simulated",
        }
    }
}

/// One simulated relay along the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerouteHop {
    pub hop: u32,
    pub ip: String,
    #[serde(default)]
    pub hostname: String,
    /// Round-trip samples in milliseconds.
    #[serde(default)]
    pub rtt: Vec<f64>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Pending,
    Running,
    #[default]
    Completed,
    Error,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Pending => "pending",
            TraceStatus::Running => "running",
            TraceStatus::Completed => "completed",
            TraceStatus::Error => "error",
        }
    }
}

/// Outcome of one traceroute execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracerouteResult {
    pub target: String,
    pub hops: Vec<TracerouteHop>,
    #[serde(default)]
    pub status: TraceStatus,
    /// Epoch milliseconds.
    #[serde(default)]
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
