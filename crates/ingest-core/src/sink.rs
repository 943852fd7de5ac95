use anyhow::Result;
use parking_lot::RwLock;
use reqwest::StatusCode;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::TargetConfig;
use crate::error::InsertError;
use crate::record::Record;

pub type InsertFuture<'a> =
    Pin<Box<dyn std::future::Future<Output = Result<(), InsertError>> + Send + 'a>>;

/// Storage collaborator: bulk-inserts already prepared records.
///
/// Field-level encryption and the storage schema are the implementor's concern.
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &'static str;

    fn insert_batch<'a>(&'a self, records: &'a [Record]) -> InsertFuture<'a>;

    /// Drop and re-establish pooled connections. Called by the backoff
    /// controller when connectivity failures persist.
    fn recycle_connections(&self) {}
}

/// Build the sink selected by `mode` ("mock" or "http").
pub fn build_sink(mode: &str, target: &TargetConfig) -> Result<Arc<dyn RecordSink>> {
    match mode {
        "mock" => Ok(Arc::new(MockSink::new(target.mock_delay_ms))),
        "http" => {
            if target.urls.is_empty() {
                anyhow::bail!("target.urls must list at least one endpoint in http mode");
            }
            Ok(Arc::new(HttpJsonSink::new(
                target.urls.clone(),
                target.timeout_ms,
            )?))
        }
        _ => anyhow::bail!("Invalid mode: {}, must be 'mock' or 'http'", mode),
    }
}

/// Mock sink for testing (always accepts with configurable delay)
pub struct MockSink {
    delay_ms: u64,
}

impl MockSink {
    pub fn new(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

impl RecordSink for MockSink {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn insert_batch<'a>(&'a self, _records: &'a [Record]) -> InsertFuture<'a> {
        Box::pin(async move {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(())
        })
    }
}

/// HTTP/JSON sink posting each batch to `{url}/patients/batch`.
pub struct HttpJsonSink {
    client: RwLock<reqwest::Client>,
    urls: Vec<String>,
    current_url_idx: AtomicUsize,
    timeout: Duration,
}

impl HttpJsonSink {
    pub fn new(urls: Vec<String>, timeout_ms: u64) -> Result<Self> {
        let timeout = Duration::from_millis(timeout_ms);
        Ok(Self {
            client: RwLock::new(build_client(timeout)?),
            urls,
            current_url_idx: AtomicUsize::new(0),
            timeout,
        })
    }

    fn next_url(&self) -> &str {
        let idx = self.current_url_idx.fetch_add(1, Ordering::Relaxed);
        &self.urls[idx % self.urls.len()]
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(30))
        .build()?)
}

impl RecordSink for HttpJsonSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn insert_batch<'a>(&'a self, records: &'a [Record]) -> InsertFuture<'a> {
        Box::pin(async move {
            let endpoint = format!("{}/patients/batch", self.next_url().trim_end_matches('/'));
            // reqwest::Client is an Arc handle; clone it so the lock is not held across the await.
            let client = self.client.read().clone();

            match client.post(&endpoint).json(records).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    let body = response.text().await.unwrap_or_default();
                    Err(map_status(status, &body))
                }
                Err(e) if e.is_timeout() => Err(InsertError::timeout(format!(
                    "request to {} timed out after {}ms",
                    endpoint,
                    self.timeout.as_millis()
                ))),
                Err(e) if e.is_connect() => Err(InsertError::connectivity(format!(
                    "connection to {} failed: {}",
                    endpoint, e
                ))),
                // Resets and closes mid-request surface as request/body errors.
                Err(e) if e.is_request() || e.is_body() => Err(InsertError::connectivity(
                    format!("connection to {} lost: {}", endpoint, error_chain(&e)),
                )),
                Err(e) => Err(InsertError::unknown(e.to_string())),
            }
        })
    }

    fn recycle_connections(&self) {
        match build_client(self.timeout) {
            Ok(client) => {
                *self.client.write() = client;
                debug!("Rebuilt http client for {} endpoints", self.urls.len());
            }
            Err(e) => debug!("Keeping existing http client, rebuild failed: {}", e),
        }
    }
}

/// Render an error with its source causes, e.g. the hyper/io error under a reqwest one.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

fn map_status(status: StatusCode, body: &str) -> InsertError {
    let detail = if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body.chars().take(200).collect::<String>())
    };

    match status {
        StatusCode::CONFLICT => {
            InsertError::constraint_violation(format!("duplicate key rejected by server{}", detail))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            InsertError::server(format!("authentication failed ({}){}", status, detail))
        }
        StatusCode::REQUEST_TIMEOUT => {
            InsertError::timeout(format!("server returned {}{}", status.as_u16(), detail))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            InsertError::server(format!("server returned {}{}", status.as_u16(), detail))
        }
        s if s.is_server_error() => {
            InsertError::server(format!("server returned {}{}", status.as_u16(), detail))
        }
        _ => InsertError::unknown(format!("unexpected status {}{}", status, detail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ErrorCategory, ErrorClassifier};
    use crate::error::InsertErrorKind;

    #[tokio::test]
    async fn test_mock_sink_accepts() {
        let sink = MockSink::new(1);
        let records = crate::record::RecordGenerator::generate(10, 1);
        assert!(sink.insert_batch(&records).await.is_ok());
        assert_eq!(sink.name(), "mock");
    }

    #[test]
    fn test_map_status_classification() {
        let err = map_status(StatusCode::CONFLICT, "");
        assert_eq!(err.kind, InsertErrorKind::ConstraintViolation);
        assert_eq!(
            ErrorClassifier::classify(&err).category,
            ErrorCategory::DataConstraint
        );

        let err = map_status(StatusCode::FORBIDDEN, "");
        let class = ErrorClassifier::classify(&err);
        assert_eq!(class.category, ErrorCategory::Auth);
        assert!(!class.retriable);

        let err = map_status(StatusCode::SERVICE_UNAVAILABLE, "try later");
        let class = ErrorClassifier::classify(&err);
        assert_eq!(class.category, ErrorCategory::Server);
        assert!(class.retriable);

        let err = map_status(StatusCode::REQUEST_TIMEOUT, "");
        assert_eq!(err.kind, InsertErrorKind::Timeout);
        assert!(ErrorClassifier::classify(&err).retriable);

        let err = map_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        let class = ErrorClassifier::classify(&err);
        assert_eq!(class.category, ErrorCategory::Server);
        assert!(class.retriable);

        let err = map_status(StatusCode::BAD_REQUEST, "");
        assert_eq!(err.kind, InsertErrorKind::Unknown);
        assert!(!ErrorClassifier::classify(&err).retriable);
    }

    #[test]
    fn test_build_sink_modes() {
        let target = TargetConfig {
            urls: vec![],
            timeout_ms: 1000,
            mock_delay_ms: 0,
        };
        assert_eq!(build_sink("mock", &target).unwrap().name(), "mock");
        assert!(build_sink("http", &target).is_err());
        assert!(build_sink("grpc", &target).is_err());

        let target = TargetConfig {
            urls: vec!["http://localhost:1".to_string()],
            ..target
        };
        assert_eq!(build_sink("http", &target).unwrap().name(), "http");
    }

    #[tokio::test]
    async fn test_http_sink_connect_failure_is_retriable() {
        // Port 9 (discard) is not expected to be listening locally.
        let sink = HttpJsonSink::new(vec!["http://127.0.0.1:9".to_string()], 2000).unwrap();
        let records = crate::record::RecordGenerator::generate(2, 1);
        let err = sink.insert_batch(&records).await.unwrap_err();
        let class = ErrorClassifier::classify(&err);
        assert!(class.retriable, "{:?}", err);
    }

    #[tokio::test]
    async fn test_http_sink_dropped_connection_is_retriable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let sink = HttpJsonSink::new(vec![format!("http://{}", addr)], 2000).unwrap();
        let records = crate::record::RecordGenerator::generate(2, 1);
        let err = sink.insert_batch(&records).await.unwrap_err();
        assert_eq!(err.kind, InsertErrorKind::Connectivity, "{:?}", err);

        let class = ErrorClassifier::classify(&err);
        assert!(class.retriable, "{:?}", err);
        assert!(class.network_like);
    }
}
