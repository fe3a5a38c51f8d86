//! Source stream provider
//!
//! The provider exposes the buckets it currently retains and the activities in
//! each one. [`HttpSource`] talks to a JSON REST provider:
//!
//! ```text
//! GET {url}/publishers/{publisher}/buckets.json            -> ["201001010000", ...]
//! GET {url}/publishers/{publisher}/buckets/{bucket}.json   -> [{"body": ...}, ...]
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::activity::Activity;
use crate::bucket::Bucket;
use crate::config::Credentials;

/// Errors talking to the stream provider
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Provider rejected credentials ({status})")]
    Unauthorized { status: u16 },

    #[error("Provider error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Where activities come from
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Buckets currently retained upstream, oldest first
    async fn buckets(&self) -> Result<Vec<Bucket>, SourceError>;

    /// Activities in one bucket, optionally filtered upstream by keyword
    async fn fetch(&self, bucket: Bucket, keyword: Option<&str>) -> Result<Vec<Activity>, SourceError>;
}

/// JSON-over-HTTP provider client
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    publisher: String,
    credentials: Option<Credentials>,
}

impl HttpSource {
    pub fn new(
        base_url: &str,
        publisher: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        debug!(%base_url, %publisher, "HttpSource::new: called");
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("linkrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            publisher: publisher.to_string(),
            credentials,
        })
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/publishers/{}/{}", self.base_url, self.publisher, tail)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.credentials {
            Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
            None => request,
        }
    }
}

/// Map a non-success status to an error, passing successes through
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SourceError::Unauthorized {
            status: status.as_u16(),
        });
    }
    let message = response.text().await.unwrap_or_default();
    Err(SourceError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ActivitySource for HttpSource {
    async fn buckets(&self) -> Result<Vec<Bucket>, SourceError> {
        let url = self.url("buckets.json");
        debug!(%url, "HttpSource::buckets: called");
        let response = check_status(self.get(&url).send().await?).await?;
        let mut buckets: Vec<Bucket> = response.json().await?;
        buckets.sort();
        buckets.dedup();
        debug!(count = buckets.len(), "HttpSource::buckets: returning");
        Ok(buckets)
    }

    async fn fetch(&self, bucket: Bucket, keyword: Option<&str>) -> Result<Vec<Activity>, SourceError> {
        let url = self.url(&format!("buckets/{}.json", bucket));
        debug!(%url, ?keyword, "HttpSource::fetch: called");
        let mut request = self.get(&url);
        if let Some(keyword) = keyword {
            request = request.query(&[("keyword", keyword)]);
        }
        let response = check_status(request.send().await?).await?;
        let activities: Vec<Activity> = response.json().await?;
        debug!(count = activities.len(), "HttpSource::fetch: returning");
        Ok(activities)
    }
}
