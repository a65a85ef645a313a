//! Synthetic hop chain generation.

use super::{
    is_private_ip, random_public_ip, GeoLocation, GeoLocator, Provenance, ResolvedTarget,
    Resolver, TraceError, TraceStatus, TracerouteHop, TracerouteResult,
};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::time::Duration;

pub const MIN_HOPS: u32 = 8;
pub const MAX_HOPS: u32 = 20;
pub const RTT_SAMPLES: usize = 3;

/// Produces simulated traceroutes.
#[derive(Clone)]
pub struct Simulator {
    resolver: Resolver,
    geo: GeoLocator,
    geo_concurrency: usize,
    geo_delay: Duration,
}

impl Simulator {
    pub fn new(resolver: Resolver, geo: GeoLocator) -> Self {
        Self {
            resolver,
            geo,
            geo_concurrency: 1,
            geo_delay: Duration::ZERO,
        }
    }

    /// Allow up to `n` geolocation lookups in flight. Hop order is preserved.
    pub fn with_geo_concurrency(mut self, n: usize) -> Self {
        self.geo_concurrency = n.max(1);
        self
    }

    /// Pause between sequential geolocation lookups.
    pub fn with_geo_delay(mut self, delay: Duration) -> Self {
        self.geo_delay = delay;
        self
    }

    pub fn geo(&self) -> &GeoLocator {
        &self.geo
    }

    /// Run a simulated traceroute to `target`.
    pub async fn run(&self, target: &str) -> Result<TracerouteResult, TraceError> {
        let start_time = Utc::now().timestamp_millis();
        tracing::info!("Starting traceroute to {}", target);

        let resolved = self.resolver.resolve(target).await?;
        let mut hops = synthesize_hops(target, &resolved);

        let locations = self.locate_all(&hops).await;
        for (hop, location) in hops.iter_mut().zip(locations) {
            hop.location = location;
        }

        tracing::info!(
            "Traceroute to {} ({}) finished with {} hops",
            target,
            resolved.ip,
            hops.len()
        );

        Ok(TracerouteResult {
            target: target.to_string(),
            hops,
            status: TraceStatus::Completed,
            start_time,
            end_time: Some(Utc::now().timestamp_millis()),
            error: None,
        })
    }

    async fn locate_all(&self, hops: &[TracerouteHop]) -> Vec<Option<GeoLocation>> {
        if self.geo_concurrency > 1 {
            let ips: Vec<String> = hops.iter().map(|hop| hop.ip.clone()).collect();
            let geo = self.geo.clone();
            return stream::iter(ips)
                .map(move |ip| {
                    let geo = geo.clone();
                    async move { geo.lookup(&ip).await }
                })
                .buffered(self.geo_concurrency)
                .collect()
                .await;
        }

        let mut locations = Vec::with_capacity(hops.len());
        let mut queried = false;
        for hop in hops {
            if !hop.is_public {
                locations.push(None);
                continue;
            }
            if queried && !self.geo_delay.is_zero() {
                tokio::time::sleep(self.geo_delay).await;
            }
            queried = true;
            locations.push(self.geo.lookup(&hop.ip).await);
        }
        locations
    }
}

/// Build the hop chain ending at the resolved target.
fn synthesize_hops(target: &str, resolved: &ResolvedTarget) -> Vec<TracerouteHop> {
    let mut rng = rand::thread_rng();
    let count = rng.gen_range(MIN_HOPS..=MAX_HOPS);

    (1..=count)
        .map(|i| {
            let last = i == count;
            let (ip, provenance) = if last {
                (resolved.ip.clone(), resolved.provenance)
            } else {
                (random_public_ip(), Provenance::Simulated)
            };
            let hostname = if last {
                target.to_string()
            } else {
                format!("hop{}.transit.net", i)
            };

            let base = 10.0 + 5.0 * f64::from(i) + rng.gen::<f64>() * 20.0;
            let rtt = (0..RTT_SAMPLES)
                .map(|_| base + rng.gen::<f64>() * 10.0)
                .collect();

            TracerouteHop {
                hop: i,
                is_public: !is_private_ip(&ip),
                ip,
                hostname,
                rtt,
                location: None,
                provenance,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{echo_geo, simulator, StaticDns};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hop_chain_properties() {
        let (sim, _) = simulator(Some("93.184.216.34"));

        for _ in 0..50 {
            let result = sim.run("example.com").await.unwrap();
            let n = result.hops.len() as u32;
            assert!((MIN_HOPS..=MAX_HOPS).contains(&n));
            assert_eq!(result.status, TraceStatus::Completed);
            assert!(result.end_time.unwrap() >= result.start_time);

            let last = result.hops.last().unwrap();
            assert_eq!(last.ip, "93.184.216.34");
            assert_eq!(last.hostname, "example.com");
            assert_eq!(last.provenance, Provenance::Resolved);

            for (i, hop) in result.hops.iter().enumerate() {
                assert_eq!(hop.hop, i as u32 + 1);
                assert_eq!(hop.is_public, !is_private_ip(&hop.ip));
                assert_eq!(hop.rtt.len(), RTT_SAMPLES);
                assert!(hop.rtt.iter().all(|r| *r > 0.0));
                let floor = 10.0 + 5.0 * f64::from(hop.hop);
                assert!(hop.rtt.iter().all(|r| *r >= floor && *r < floor + 30.0));
                assert_eq!(hop.location.is_some(), hop.is_public);
                if hop.hop < n {
                    assert_eq!(hop.hostname, format!("hop{}.transit.net", hop.hop));
                    assert_eq!(hop.provenance, Provenance::Simulated);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_private_target_has_no_location() {
        let (sim, calls) = simulator(None);
        let result = sim.run("10.0.0.5").await.unwrap();
        let last = result.hops.last().unwrap();
        assert_eq!(last.ip, "10.0.0.5");
        assert!(!last.is_public);
        assert!(last.location.is_none());

        let public_hops = result.hops.iter().filter(|h| h.is_public).count();
        assert_eq!(calls.count(), public_hops);
    }

    #[tokio::test]
    async fn test_unresolved_target_fails_without_fallback() {
        let resolver = Resolver::new(Arc::new(StaticDns(None)), false);
        let sim = Simulator::new(resolver, echo_geo().0);
        assert!(matches!(
            sim.run("nowhere.invalid").await,
            Err(TraceError::Unresolved(_))
        ));
    }

    #[tokio::test]
    async fn test_synthetic_target_is_tagged() {
        let resolver = Resolver::new(Arc::new(StaticDns(None)), true);
        let sim = Simulator::new(resolver, echo_geo().0);
        let result = sim.run("nowhere.invalid").await.unwrap();
        let last = result.hops.last().unwrap();
        assert_eq!(last.hostname, "nowhere.invalid");
        assert_eq!(last.provenance, Provenance::Simulated);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_keep_hop_order() {
        let (sim, _) = simulator(Some("8.8.8.8"));
        let sim = sim.with_geo_concurrency(4);
        // Runs are spawned by the sweeper and the web handlers.
        let result = tokio::spawn(async move { sim.run("dns.google").await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.hops.last().unwrap().ip, "8.8.8.8");
        for hop in &result.hops {
            if let Some(location) = &hop.location {
                assert_eq!(location.query, hop.ip);
            }
        }
    }
}
