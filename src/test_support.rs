//! Shared fixtures for unit tests.

use crate::ingest::{IngestError, LogRecord, LogSink};
use crate::trace::{
    DnsClient, DnsError, GeoError, GeoLocation, GeoLocator, GeoProvider, Resolver, Simulator,
};

use async_trait::async_trait;
use axum::Router;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// DNS client with a fixed answer.
pub struct StaticDns(pub Option<&'static str>);

#[async_trait]
impl DnsClient for StaticDns {
    async fn lookup_a(&self, _name: &str) -> Result<Option<String>, DnsError> {
        Ok(self.0.map(str::to_string))
    }
}

/// Geolocation provider that locates every address in "Testville".
pub struct EchoGeo {
    calls: CallCounter,
}

#[async_trait]
impl GeoProvider for EchoGeo {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError> {
        self.calls.hit();
        Ok(GeoLocation {
            city: "Testville".to_string(),
            country: "Testland".to_string(),
            country_code: "TT".to_string(),
            query: ip.to_string(),
            ..Default::default()
        })
    }
}

pub fn echo_geo() -> (GeoLocator, CallCounter) {
    let calls = CallCounter::default();
    let provider = Arc::new(EchoGeo {
        calls: calls.clone(),
    });
    (GeoLocator::new(vec![provider as Arc<dyn GeoProvider>]), calls)
}

/// Simulator whose DNS lookups return `answer` and whose geolocation always succeeds.
pub fn simulator(answer: Option<&'static str>) -> (Simulator, CallCounter) {
    let (geo, calls) = echo_geo();
    let resolver = Resolver::new(Arc::new(StaticDns(answer)), true);
    (Simulator::new(resolver, geo), calls)
}

/// Log sink that keeps submitted batches in memory.
#[derive(Default)]
pub struct MemorySink {
    pub batches: Mutex<Vec<Vec<LogRecord>>>,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        sink
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn submit(&self, records: &[LogRecord]) -> Result<(), IngestError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IngestError::Status(503));
        }
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}
