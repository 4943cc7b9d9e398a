use anyhow::{Context, Result};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::config::HttpConfig;

/// Outbound HTTP client with the browser header set and a retry policy.
///
/// Non-success responses are returned to the caller once retries for
/// retryable statuses are exhausted; only transport failures are errors.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    policy: HttpConfig,
}

impl HttpClient {
    pub fn new(headers: HeaderMap, policy: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(policy.connect_timeout())
            .read_timeout(policy.read_timeout())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, policy })
    }

    /// GET `url`, retrying transient failures and retryable statuses.
    pub async fn get(&self, url: &str) -> Result<Response> {
        let attempts = self.policy.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    debug!("GET {url} -> {status} (attempt {attempt}/{attempts})");
                    if attempt < attempts && self.is_retryable_status(status) {
                        let delay = self.policy.backoff(attempt);
                        warn!(
                            "GET {url} returned {status} (attempt {attempt}/{attempts}), retrying in {delay:?}"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    if attempt < attempts && is_transient(&e) {
                        let delay = self.policy.backoff(attempt);
                        warn!(
                            "GET {url} failed (attempt {attempt}/{attempts}): {e}, retrying in {delay:?}"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e).with_context(|| format!("GET {url} failed"));
                }
            }
        }
    }

    fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.policy.retry_statuses.contains(&status.as_u16())
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve the given raw HTTP responses, one per accepted connection.
    async fn serve(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{addr}/")
    }

    fn fast_policy(max_retries: u32) -> HttpConfig {
        HttpConfig {
            max_retries,
            backoff_factor_secs: 0.0,
            ..HttpConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_retryable_status() {
        let url = serve(vec![
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        ])
        .await;
        let client = HttpClient::new(HeaderMap::new(), fast_policy(2)).unwrap();
        let resp = client.get(&url).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn returns_last_status_when_exhausted() {
        let url = serve(vec![
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ])
        .await;
        let client = HttpClient::new(HeaderMap::new(), fast_policy(1)).unwrap();
        let resp = client.get(&url).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn non_retryable_status_returns_immediately() {
        let url = serve(vec![
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ])
        .await;
        let client = HttpClient::new(HeaderMap::new(), fast_policy(3)).unwrap();
        let resp = client.get(&url).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
