//! bit.ly v3 API expander

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ExpandError, Expander, host_of};

const BITLY_API_URL: &str = "https://api-ssl.bitly.com/v3/expand";

/// Domains served by bit.ly regardless of config
const BITLY_DOMAINS: &[&str] = &["bit.ly", "j.mp", "bitly.com"];

/// Expands bit.ly links through the v3 `expand` endpoint
pub struct BitlyExpander {
    client: reqwest::Client,
    login: String,
    api_key: String,
    domains: Vec<String>,
}

impl BitlyExpander {
    pub fn new(login: String, api_key: String, extra_domains: &[String], timeout: Duration) -> Result<Self, ExpandError> {
        debug!(%login, ?extra_domains, "BitlyExpander::new: called");
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ExpandError::from_reqwest)?;
        let mut domains: Vec<String> = BITLY_DOMAINS.iter().map(|d| d.to_string()).collect();
        domains.extend(extra_domains.iter().map(|d| d.to_ascii_lowercase()));
        Ok(Self {
            client,
            login,
            api_key,
            domains,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExpandResponse {
    status_code: u16,
    #[serde(default)]
    status_txt: String,
    data: Option<ExpandData>,
}

#[derive(Debug, Deserialize)]
struct ExpandData {
    #[serde(default)]
    expand: Vec<ExpandItem>,
}

#[derive(Debug, Deserialize)]
struct ExpandItem {
    long_url: Option<String>,
    error: Option<String>,
}

/// Pull the long URL out of an `expand` response body
fn parse_response(body: &str) -> Result<String, ExpandError> {
    let response: ExpandResponse =
        serde_json::from_str(body).map_err(|e| ExpandError::InvalidResponse(e.to_string()))?;
    if response.status_code != 200 {
        debug!(status = response.status_code, status_txt = %response.status_txt, "parse_response: api error");
        return Err(ExpandError::Status {
            status: response.status_code,
        });
    }
    let item = response
        .data
        .and_then(|d| d.expand.into_iter().next())
        .ok_or_else(|| ExpandError::InvalidResponse("empty expand list".to_string()))?;
    match (item.long_url, item.error) {
        (Some(long_url), _) => Ok(long_url),
        (None, Some(error)) => Err(ExpandError::InvalidResponse(error)),
        (None, None) => Err(ExpandError::InvalidResponse("missing long_url".to_string())),
    }
}

#[async_trait]
impl Expander for BitlyExpander {
    fn name(&self) -> &str {
        "bitly"
    }

    fn claims(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.domains.iter().any(|d| *d == host))
    }

    async fn lookup(&self, url: &str) -> Result<String, ExpandError> {
        debug!(%url, "BitlyExpander::lookup: called");
        let response = self
            .client
            .get(BITLY_API_URL)
            .query(&[
                ("shortUrl", url),
                ("login", self.login.as_str()),
                ("apiKey", self.api_key.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(ExpandError::from_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExpandError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.text().await.map_err(ExpandError::from_reqwest)?;
        parse_response(&body)
    }
}
