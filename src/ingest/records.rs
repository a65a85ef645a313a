//! Mapping traceroute results onto log records.

use super::IngestError;
use crate::trace::{TracerouteHop, TracerouteResult};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

pub const LOG_SOURCE: &str = "traceroute-app";
pub const APP_NAME: &str = "traceroute";

/// Metadata attached to every record of one formatting pass.
#[derive(Debug, Clone, Default)]
pub struct RecordContext {
    pub schedule_id: Option<String>,
    pub schedule_name: Option<String>,
    pub execution_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RecordContext {
    pub fn schedule(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schedule_id: Some(id.into()),
            schedule_name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// One ingested log line, describing a single hop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    #[serde(rename = "log.source")]
    pub log_source: &'static str,
    #[serde(rename = "app.name")]
    pub app_name: &'static str,
    pub severity: &'static str,
    pub content: String,
    #[serde(rename = "execution.id", skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(rename = "schedule.id", skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
    #[serde(rename = "schedule.name", skip_serializing_if = "Option::is_none")]
    pub schedule_name: Option<String>,
    #[serde(rename = "traceroute.schedule", skip_serializing_if = "Option::is_none")]
    pub traceroute_schedule: Option<String>,
    #[serde(rename = "traceroute.target")]
    pub target: String,
    #[serde(rename = "traceroute.status")]
    pub status: &'static str,
    #[serde(rename = "traceroute.hop")]
    pub hop: u32,
    #[serde(rename = "traceroute.ip")]
    pub ip: String,
    #[serde(rename = "traceroute.hostname")]
    pub hostname: String,
    #[serde(rename = "traceroute.rtt.avg", skip_serializing_if = "Option::is_none")]
    pub rtt_avg: Option<f64>,
    #[serde(rename = "traceroute.rtt.min", skip_serializing_if = "Option::is_none")]
    pub rtt_min: Option<f64>,
    #[serde(rename = "traceroute.rtt.max", skip_serializing_if = "Option::is_none")]
    pub rtt_max: Option<f64>,
    #[serde(rename = "traceroute.is_public")]
    pub is_public: bool,
    #[serde(rename = "traceroute.provenance")]
    pub provenance: &'static str,
    #[serde(flatten)]
    pub location: Option<LocationFields>,
}

/// Geolocation attributes flattened into a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationFields {
    #[serde(rename = "traceroute.location.city")]
    pub city: String,
    #[serde(rename = "traceroute.location.region")]
    pub region: String,
    #[serde(rename = "traceroute.location.country")]
    pub country: String,
    #[serde(rename = "traceroute.location.countryCode")]
    pub country_code: String,
    #[serde(rename = "traceroute.location.lat")]
    pub lat: f64,
    #[serde(rename = "traceroute.location.lon")]
    pub lon: f64,
    #[serde(rename = "traceroute.location.isp")]
    pub isp: String,
    #[serde(rename = "traceroute.location.org")]
    pub org: String,
    #[serde(rename = "traceroute.location.as")]
    pub as_name: String,
}

/// Decode an untyped traceroute result, rejecting payloads without a hop list.
pub fn decode_result(payload: Option<Value>) -> Result<TracerouteResult, IngestError> {
    let payload = payload.ok_or(IngestError::InvalidResult)?;
    if !payload.get("hops").map_or(false, Value::is_array) {
        return Err(IngestError::InvalidResult);
    }
    serde_json::from_value(payload).map_err(|_| IngestError::InvalidResult)
}

/// Format one record per hop. All records share one timestamp.
pub fn format_records(result: &TracerouteResult, ctx: &RecordContext) -> Vec<LogRecord> {
    let timestamp = ctx
        .timestamp
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    result
        .hops
        .iter()
        .map(|hop| format_hop(result, hop, ctx, &timestamp))
        .collect()
}

fn format_hop(
    result: &TracerouteResult,
    hop: &TracerouteHop,
    ctx: &RecordContext,
    timestamp: &str,
) -> LogRecord {
    let hostname = if hop.hostname.is_empty() {
        "unknown".to_string()
    } else {
        hop.hostname.clone()
    };

    let mut content = format!(
        "Traceroute hop {} to {}: {} ({})",
        hop.hop, result.target, hop.ip, hostname
    );

    let stats = rtt_stats(&hop.rtt);
    if let Some((avg, _, _)) = stats {
        content.push_str(&format!(" - Avg RTT: {:.2}ms", avg));
    }

    let location = hop.location.as_ref().map(|loc| {
        content.push_str(&format!(" - Location: {}, {}", loc.city, loc.country));
        LocationFields {
            city: loc.city.clone(),
            region: loc.region.clone(),
            country: loc.country.clone(),
            country_code: loc.country_code.clone(),
            lat: loc.lat,
            lon: loc.lon,
            isp: loc.isp.clone(),
            org: loc.org.clone(),
            as_name: loc.as_name.clone(),
        }
    });

    LogRecord {
        timestamp: timestamp.to_string(),
        log_source: LOG_SOURCE,
        app_name: APP_NAME,
        severity: "INFO",
        content,
        execution_id: ctx.execution_id.clone(),
        schedule_id: ctx.schedule_id.clone(),
        schedule_name: ctx.schedule_name.clone(),
        traceroute_schedule: ctx.schedule_name.clone(),
        target: result.target.clone(),
        status: result.status.as_str(),
        hop: hop.hop,
        ip: hop.ip.clone(),
        hostname,
        rtt_avg: stats.map(|s| s.0),
        rtt_min: stats.map(|s| s.1),
        rtt_max: stats.map(|s| s.2),
        is_public: hop.is_public,
        provenance: hop.provenance.as_str(),
        location,
    }
}

/// (avg, min, max) over the samples.
fn rtt_stats(samples: &[f64]) -> Option<(f64, f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let sum: f64 = samples.iter().sum();
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((sum / samples.len() as f64, min, max))
}
