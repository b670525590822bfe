// Raw menu page transport
// The only place where network I/O happens; everything above it works on markup strings.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Unexpected status {status_code} from {url}")]
    StatusError { status_code: u16, url: String },

    #[error("Response from {url} is not valid UTF-8")]
    DecodeError { url: String },

    #[error("Client error: {0}")]
    ClientError(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::NetworkError(_) | SourceError::Timeout(_) => true,
            SourceError::StatusError { status_code, .. } => *status_code >= 500,
            SourceError::DecodeError { .. } | SourceError::ClientError(_) => false,
        }
    }
}

// Retry configuration for transport failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://studentenwerk.sh/de/mensen-in-luebeck".to_string(),
            timeout_ms: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

// Returns the markup behind a URL
#[async_trait]
pub trait DocumentSource: Send + Sync + 'static {
    async fn fetch_document(&self, url: &str) -> Result<String, SourceError>;
}

pub struct HttpDocumentSource {
    client: reqwest::Client,
    timeout_ms: u64,
    retry: RetryConfig,
}

impl HttpDocumentSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("mensa_menu/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_ms: config.timeout_ms,
            retry: config.retry.clone(),
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::StatusError {
                status_code: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body: Bytes = response.bytes().await.map_err(|e| self.map_error(e))?;
        String::from_utf8(body.to_vec()).map_err(|_| SourceError::DecodeError {
            url: url.to_string(),
        })
    }

    fn map_error(&self, error: reqwest::Error) -> SourceError {
        if error.is_timeout() {
            SourceError::Timeout(self.timeout_ms)
        } else {
            SourceError::NetworkError(error.to_string())
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn fetch_document(&self, url: &str) -> Result<String, SourceError> {
        let mut attempt = 0;
        loop {
            debug!("Fetching {} (attempt {})", url, attempt + 1);
            match self.fetch_once(url).await {
                Ok(markup) => return Ok(markup),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let backoff = calculate_backoff(attempt, &self.retry);
                    warn!("Fetching {} failed ({}), retrying in {:?}", url, e, backoff);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// Exponential backoff with jitter
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
    let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

    Duration::from_millis(backoff_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Local HTTP server answering each connection with the next scripted
    // response; the last one repeats. Returns the page URL and a hit counter.
    async fn scripted_server(responses: Vec<(u16, Vec<u8>)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/menu", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let hit = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = responses[hit.min(responses.len() - 1)].clone();

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, hits)
    }

    fn fast_retry_source(max_retries: u32) -> HttpDocumentSource {
        HttpDocumentSource::new(&SourceConfig {
            base_url: "http://127.0.0.1".to_string(),
            timeout_ms: 2000,
            retry: RetryConfig {
                max_retries,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                ..RetryConfig::default()
            },
        })
        .unwrap()
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };

        assert_eq!(calculate_backoff(0, &config), Duration::from_millis(100));
        assert_eq!(calculate_backoff(1, &config), Duration::from_millis(200));
        assert_eq!(calculate_backoff(2, &config), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10, &config), Duration::from_millis(1000));
    }

    #[test]
    fn test_backoff_jitter_stays_in_band() {
        let config = RetryConfig {
            jitter_factor: 0.2,
            ..RetryConfig::default()
        };

        for _ in 0..100 {
            let backoff = calculate_backoff(0, &config).as_millis() as u64;
            // 200ms base, +/- 10%
            assert!((180..=220).contains(&backoff), "backoff {backoff}ms");
        }
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SourceError::NetworkError("reset".to_string()).is_retryable());
        assert!(SourceError::Timeout(100).is_retryable());
        assert!(SourceError::StatusError {
            status_code: 503,
            url: "u".to_string()
        }
        .is_retryable());
        assert!(!SourceError::StatusError {
            status_code: 404,
            url: "u".to_string()
        }
        .is_retryable());
        assert!(!SourceError::DecodeError {
            url: "u".to_string()
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_network_error() {
        let source = HttpDocumentSource::new(&SourceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_ms: 500,
            retry: RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            },
        })
        .unwrap();

        let result = source.fetch_document("http://127.0.0.1:9/menu").await;
        assert!(matches!(
            result,
            Err(SourceError::NetworkError(_)) | Err(SourceError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_until_success() {
        let (url, hits) = scripted_server(vec![
            (503, b"busy".to_vec()),
            (503, b"busy".to_vec()),
            (200, b"hello".to_vec()),
        ])
        .await;

        let markup = fast_retry_source(2).fetch_document(&url).await.unwrap();
        assert_eq!(markup, "hello");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (url, hits) = scripted_server(vec![(502, Vec::new())]).await;

        let result = fast_retry_source(1).fetch_document(&url).await;
        assert!(matches!(
            result,
            Err(SourceError::StatusError {
                status_code: 502,
                ..
            })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_status_is_not_retried() {
        let (url, hits) = scripted_server(vec![(404, b"gone".to_vec())]).await;

        let result = fast_retry_source(2).fetch_document(&url).await;
        match result {
            Err(SourceError::StatusError {
                status_code,
                url: failed_url,
            }) => {
                assert_eq!(status_code, 404);
                assert_eq!(failed_url, url);
            }
            other => panic!("expected a 404 status error, got {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_body_is_a_decode_error() {
        let (url, hits) = scripted_server(vec![(200, vec![0x3c, 0x70, 0xff, 0xfe, 0x3e])]).await;

        let result = fast_retry_source(2).fetch_document(&url).await;
        assert!(matches!(result, Err(SourceError::DecodeError { .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
