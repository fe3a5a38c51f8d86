//! Sink publisher
//!
//! [`HttpPublisher`] posts each rewritten batch as
//! `{"activities": [...]}` to `{url}/publishers/{publisher}/activities.json`.
//! The relay never resubmits a committed bucket; deduplication inside the sink
//! is the sink's business.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::activity::Activity;
use crate::config::Credentials;
use crate::source::{SourceError, check_status};

/// Errors publishing a batch
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Sink rejected batch: {0}")]
    Rejected(#[from] SourceError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Where rewritten activities go
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, activities: &[Activity]) -> Result<(), PublishError>;
}

#[derive(Serialize)]
struct Batch<'a> {
    activities: &'a [Activity],
}

/// JSON-over-HTTP sink client
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<Credentials>,
}

impl HttpPublisher {
    pub fn new(
        base_url: &str,
        publisher: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, PublishError> {
        debug!(%base_url, %publisher, "HttpPublisher::new: called");
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("linkrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/publishers/{}/activities.json",
                base_url.trim_end_matches('/'),
                publisher
            ),
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, activities: &[Activity]) -> Result<(), PublishError> {
        debug!(endpoint = %self.endpoint, count = activities.len(), "HttpPublisher::publish: called");
        let mut request = self.client.post(&self.endpoint).json(&Batch { activities });
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        check_status(request.send().await?).await?;
        Ok(())
    }
}
