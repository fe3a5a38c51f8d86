//! Generic redirect-following expander

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tracing::debug;

use super::{ExpandError, Expander};

/// Follows `Location` headers with `HEAD` requests
///
/// Claims every http(s) URL, so it belongs at the end of a chain.
pub struct RedirectExpander {
    client: reqwest::Client,
    max_hops: u32,
}

impl RedirectExpander {
    pub fn new(max_hops: u32, timeout: Duration) -> Result<Self, ExpandError> {
        debug!(%max_hops, "RedirectExpander::new: called");
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(ExpandError::from_reqwest)?;
        Ok(Self {
            client,
            max_hops: max_hops.max(1),
        })
    }
}

/// Absolute target of a `Location` header, which may be relative to `base`
fn resolve_location(base: &str, location: &str) -> Result<String, ExpandError> {
    let base = reqwest::Url::parse(base).map_err(|e| ExpandError::InvalidResponse(e.to_string()))?;
    base.join(location)
        .map(String::from)
        .map_err(|e| ExpandError::InvalidResponse(format!("bad Location {:?}: {}", location, e)))
}

#[async_trait]
impl Expander for RedirectExpander {
    fn name(&self) -> &str {
        "redirect"
    }

    fn claims(&self, url: &str) -> bool {
        reqwest::Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
    }

    async fn lookup(&self, url: &str) -> Result<String, ExpandError> {
        debug!(%url, "RedirectExpander::lookup: called");
        let mut current = url.to_string();
        for hop in 0..self.max_hops {
            let response = self
                .client
                .head(&current)
                .send()
                .await
                .map_err(ExpandError::from_reqwest)?;
            let status = response.status();

            if status.is_server_error() {
                return Err(ExpandError::Status {
                    status: status.as_u16(),
                });
            }
            if !status.is_redirection() {
                debug!(%hop, %current, "RedirectExpander::lookup: reached final URL");
                return Ok(current);
            }

            let Some(location) = response.headers().get(LOCATION) else {
                return Ok(current);
            };
            let location = location
                .to_str()
                .map_err(|e| ExpandError::InvalidResponse(e.to_string()))?;
            current = resolve_location(&current, location)?;
            debug!(%hop, %current, "RedirectExpander::lookup: following redirect");
        }
        Ok(current)
    }
}
