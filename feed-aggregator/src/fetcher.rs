use crate::parser::FeedParser;
use crate::types::{AggregatorError, FeedDocument, FeedDocumentSource, FetchConfig, Result};
use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    /// GET `url`, retrying transport errors and 5xx responses with exponential backoff.
    ///
    /// Any other non-success status is returned as-is with an empty body.
    pub async fn fetch_raw(&self, url: &str) -> Result<RawResponse> {
        let start_time = Instant::now();
        debug!("Fetching feed: {}", url);

        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: retry_delay,
            initial_interval: retry_delay,
            max_interval: retry_delay * 32,
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(self.config.timeout_seconds * 3)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_server_error() && attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} got {} for {}, retrying in {:?}", attempt + 1, status, url, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }

                    if !status.is_success() {
                        warn!("HTTP Error {} for feed: {}", status.as_u16(), url);
                        return Ok(RawResponse {
                            status: status.as_u16(),
                            body: Vec::new(),
                        });
                    }

                    if let Some(content_length) = response.content_length() {
                        self.check_size(url, content_length as usize)?;
                    }

                    let body = response.bytes().await?.to_vec();
                    self.check_size(url, body.len())?;

                    info!(
                        "Fetched feed: {} ({} bytes in {}ms)",
                        url,
                        body.len(),
                        start_time.elapsed().as_millis()
                    );
                    return Ok(RawResponse {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(e) => {
                    last_error = Some(e);

                    if attempt < self.config.max_retries {
                        if let Some(delay) = backoff.next_backoff() {
                            warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    }
                    break;
                }
            }
        }

        error!(
            "Failed to fetch feed after {} attempts: {}",
            self.config.max_retries + 1,
            url
        );
        match last_error {
            Some(e) => Err(AggregatorError::Http(e)),
            None => Err(AggregatorError::SourceUnreachable {
                url: url.to_string(),
                reason: "Unknown error".to_string(),
            }),
        }
    }

    fn check_size(&self, url: &str, size_bytes: usize) -> Result<()> {
        let size_mb = size_bytes / (1024 * 1024);
        if size_mb > self.config.max_feed_size_mb {
            return Err(AggregatorError::SourceUnreachable {
                url: url.to_string(),
                reason: format!("Feed too large: {}MB", size_mb),
            });
        }
        Ok(())
    }
}

/// The production parsing collaborator: HTTP transport plus feed-rs.
pub struct HttpFeedSource {
    fetcher: Fetcher,
    parser: FeedParser,
}

impl HttpFeedSource {
    pub fn new(config: FetchConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(config)?,
            parser: FeedParser::new(),
        })
    }
}

#[async_trait]
impl FeedDocumentSource for HttpFeedSource {
    async fn retrieve(&self, url: &str) -> anyhow::Result<FeedDocument> {
        let response = self.fetcher.fetch_raw(url).await?;

        if !StatusCode::from_u16(response.status).is_ok_and(|status| status.is_success()) {
            return Ok(FeedDocument {
                status: Some(response.status),
                ..FeedDocument::default()
            });
        }

        let mut document = self.parser.parse_document(&response.body);
        document.status = Some(response.status);
        Ok(document)
    }
}
