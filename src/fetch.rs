use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Error, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Plain GET access to the listing, detail and content hosts.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout())
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(HttpFetcher {
            client,
            max_retries: settings.max_retries,
            backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    /// Delay before retry number `attempt + 1`: doubles each time, capped.
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { url: url.to_string(), status: status.as_u16() });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.get_once(url).await {
                Ok(body) => {
                    debug!(url, bytes = body.len(), "fetched");
                    return Ok(body);
                }
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    let backoff = self.backoff_for(attempt);
                    attempt += 1;
                    warn!(
                        "GET {} failed (attempt {}/{}): {}, backing off {:.1}s",
                        url,
                        attempt,
                        self.max_retries,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Rate limiting, server errors and transport failures are worth another try.
pub(crate) fn is_transient(err: &Error) -> bool {
    match err {
        Error::Status { status, .. } => *status == 429 || *status >= 500,
        Error::Network(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn transient_statuses() {
        let status = |s| Error::Status { url: String::new(), status: s };
        assert!(is_transient(&status(429)));
        assert!(is_transient(&status(503)));
        assert!(!is_transient(&status(404)));
        assert!(!is_transient(&Error::parse("no links")));
    }

    #[test]
    fn builds_from_default_settings() {
        assert!(HttpFetcher::new(&Settings::default()).is_ok());
    }

    fn fetcher(max_retries: u32, retry_backoff_ms: u64) -> HttpFetcher {
        let settings = Settings { max_retries, retry_backoff_ms, http_timeout_secs: 5, ..Settings::default() };
        HttpFetcher::new(&settings).unwrap()
    }

    /// Serves `status` with an empty body to every connection, counting them.
    async fn serve(status: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/quiz", addr), hits)
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let (url, hits) = serve("503 Service Unavailable").await;
        let err = fetcher(2, 0).get(&url).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 503, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let (url, hits) = serve("404 Not Found").await;
        let err = fetcher(2, 0).get(&url).await.unwrap_err();
        assert!(matches!(err, Error::Status { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn many_retries_do_not_overflow_backoff() {
        let err = fetcher(40, 0).get("http://127.0.0.1:1/").await.unwrap_err();
        assert_eq!(err.class(), "network");
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let f = fetcher(2, 1000);
        assert_eq!(f.backoff_for(0), Duration::from_secs(1));
        assert_eq!(f.backoff_for(2), Duration::from_secs(4));
        assert_eq!(f.backoff_for(40), MAX_BACKOFF);
        assert_eq!(f.backoff_for(u32::MAX), MAX_BACKOFF);
    }
}
