use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::FetchError;

/// Source of listing page bodies.
pub trait PageFetcher {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send;
}

/// Plain GET with a browser user-agent. Non-2xx responses are errors.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let request_err = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        info!("Fetching {}", url);
        let start = Instant::now();
        let response = self.client.get(url).send().await.map_err(request_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.text().await.map_err(request_err)?;
        debug!(
            bytes = body.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Fetched {}",
            url
        );
        Ok(body)
    }
}
