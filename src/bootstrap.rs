//! Session token bootstrap.
//!
//! The feed authenticates with the `pstk` cookie the betting site sets on an
//! ordinary page load. A missing token is a normal outcome, not an error.

use reqwest::Response;
use tracing::{info, warn};

use crate::http::HttpClient;
use crate::types::SessionToken;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "pstk";

/// Anything that can produce a session token for one connection attempt.
#[allow(async_fn_in_trait)]
pub trait TokenSource {
    async fn fetch_session_token(&self) -> Option<SessionToken>;
}

/// Fetches the token from the session page over HTTP.
#[derive(Debug, Clone)]
pub struct SessionBootstrapper {
    http: HttpClient,
    session_url: String,
}

impl SessionBootstrapper {
    pub fn new(http: HttpClient, session_url: impl Into<String>) -> Self {
        Self {
            http,
            session_url: session_url.into(),
        }
    }
}

impl TokenSource for SessionBootstrapper {
    async fn fetch_session_token(&self) -> Option<SessionToken> {
        info!("Fetching session token from {}", self.session_url);
        let resp = match self.http.get(&self.session_url).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Session token fetch failed: {e:#}");
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            warn!("Session page returned {status}");
            return None;
        }

        let token = session_token(&resp);
        match &token {
            Some(t) => info!("Retrieved session token ({} chars)", t.as_str().len()),
            None => warn!("Session page response has no {SESSION_COOKIE} cookie"),
        }
        token
    }
}

/// A token fixed up front, e.g. supplied on the command line.
impl TokenSource for Option<SessionToken> {
    async fn fetch_session_token(&self) -> Option<SessionToken> {
        self.clone()
    }
}

/// The first non-empty `pstk` cookie set by `resp`.
fn session_token(resp: &Response) -> Option<SessionToken> {
    resp.cookies()
        .find(|c| c.name() == SESSION_COOKIE && !c.value().is_empty())
        .map(|c| SessionToken::new(c.value()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use reqwest::header::HeaderMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // ── SessionBootstrapper ────────────────────────────────────────

    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/")
    }

    fn bootstrapper(url: String) -> SessionBootstrapper {
        let policy = HttpConfig {
            max_retries: 0,
            ..HttpConfig::default()
        };
        SessionBootstrapper::new(HttpClient::new(HeaderMap::new(), policy).unwrap(), url)
    }

    #[tokio::test]
    async fn fetches_token_from_set_cookie() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nSet-Cookie: rmbs=3; path=/\r\nSet-Cookie: pstk=TOKEN42; path=/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let token = bootstrapper(url).fetch_session_token().await.unwrap();
        assert_eq!(token.as_str(), "TOKEN42");
    }

    #[tokio::test]
    async fn token_without_trailing_attributes() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nSet-Cookie: pstk=tail\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let token = bootstrapper(url).fetch_session_token().await.unwrap();
        assert_eq!(token.as_str(), "tail");
    }

    #[tokio::test]
    async fn ignores_cookie_with_matching_suffix() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nSet-Cookie: xpstk=wrong; path=/\r\nSet-Cookie: pstk=right; path=/; secure\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let token = bootstrapper(url).fetch_session_token().await.unwrap();
        assert_eq!(token.as_str(), "right");
    }

    #[tokio::test]
    async fn missing_cookie_is_none() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nSet-Cookie: session=1; path=/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(bootstrapper(url).fetch_session_token().await.is_none());
    }

    #[tokio::test]
    async fn no_cookies_at_all_is_none() {
        let url = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        assert!(bootstrapper(url).fetch_session_token().await.is_none());
    }

    #[tokio::test]
    async fn empty_value_is_none() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nSet-Cookie: pstk=; path=/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(bootstrapper(url).fetch_session_token().await.is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_none() {
        let url = serve_once(
            "HTTP/1.1 403 Forbidden\r\nSet-Cookie: pstk=TOKEN42; path=/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(bootstrapper(url).fetch_session_token().await.is_none());
    }

    #[tokio::test]
    async fn unreachable_host_is_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let token = bootstrapper(format!("http://{addr}/")).fetch_session_token().await;
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn fixed_token_source() {
        let fixed = Some(SessionToken::new("abc"));
        assert_eq!(fixed.fetch_session_token().await, Some(SessionToken::new("abc")));
        let none: Option<SessionToken> = None;
        assert!(none.fetch_session_token().await.is_none());
    }
}
