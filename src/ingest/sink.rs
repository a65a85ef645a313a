//! Log ingestion collaborators.

use super::{IngestError, LogRecord};

use async_trait::async_trait;

/// Receives formatted log records.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn submit(&self, records: &[LogRecord]) -> Result<(), IngestError>;
}

/// Posts records as a JSON array to a log ingest endpoint.
pub struct HttpLogSink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpLogSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            token,
        }
    }
}

#[async_trait]
impl LogSink for HttpLogSink {
    async fn submit(&self, records: &[LogRecord]) -> Result<(), IngestError> {
        if records.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(records)?;
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(body);
        if let Some(token) = &self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("Api-Token {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestError::Status(response.status().as_u16()));
        }

        tracing::debug!("Ingested {} log records", records.len());
        Ok(())
    }
}

/// Writes records to the application's own tracing output.
#[derive(Default)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn submit(&self, records: &[LogRecord]) -> Result<(), IngestError> {
        for record in records {
            let line = serde_json::to_string(record).unwrap_or_default();
            tracing::info!(
                target_host = %record.target,
                hop = record.hop,
                "{}",
                line
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{format_records, RecordContext};
    use crate::test_support::serve;
    use crate::trace::{Provenance, TraceStatus, TracerouteHop, TracerouteResult};
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    fn records() -> Vec<LogRecord> {
        let result = TracerouteResult {
            target: "1.1.1.1".to_string(),
            hops: vec![TracerouteHop {
                hop: 1,
                ip: "1.1.1.1".to_string(),
                hostname: "1.1.1.1".to_string(),
                rtt: vec![1.0, 2.0, 3.0],
                is_public: true,
                location: None,
                provenance: Provenance::Resolved,
            }],
            status: TraceStatus::Completed,
            start_time: 0,
            end_time: Some(1),
            error: None,
        };
        format_records(&result, &RecordContext::default())
    }

    #[tokio::test]
    async fn test_http_sink_posts_json_array() {
        let seen: Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>> = Arc::default();
        let captured = seen.clone();
        let router = Router::new().route(
            "/ingest",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    captured.lock().unwrap().push((auth, body));
                    StatusCode::NO_CONTENT
                }
            }),
        );
        let base = serve(router).await;
        let sink = HttpLogSink::new(
            reqwest::Client::new(),
            format!("{}/ingest", base),
            Some("secret".to_string()),
        );

        tokio_test::assert_ok!(sink.submit(&records()).await);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("Api-Token secret"));
        assert_eq!(seen[0].1[0]["traceroute.ip"], "1.1.1.1");
    }

    #[tokio::test]
    async fn test_http_sink_reports_rejection() {
        let router = Router::new().route(
            "/ingest",
            post(|| async { (StatusCode::BAD_REQUEST, "bad payload") }),
        );
        let base = serve(router).await;
        let sink = HttpLogSink::new(reqwest::Client::new(), format!("{}/ingest", base), None);

        assert!(matches!(
            sink.submit(&records()).await,
            Err(IngestError::Status(400))
        ));
    }

    #[tokio::test]
    async fn test_tracing_sink_accepts_records() {
        tokio_test::assert_ok!(TracingLogSink.submit(&records()).await);
    }

    struct CountEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for CountEvents {
        fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_tracing_sink_passes_default_filter() {
        let seen = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry()
            .with(crate::log_filter().unwrap())
            .with(CountEvents(seen.clone()));

        let batch = records();
        tracing::subscriber::with_default(subscriber, || {
            tokio_test::assert_ok!(futures::executor::block_on(TracingLogSink.submit(&batch)));
        });

        assert_eq!(seen.load(Ordering::SeqCst), batch.len());
    }
}
