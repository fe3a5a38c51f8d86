//! Link expansion
//!
//! An [`ExpanderChain`] holds an ordered list of [`Strategy`]s. Each strategy
//! wraps one [`Expander`] with its own LRU cache and a bounded retry policy.
//! The first strategy that claims a URL expands it; everything else passes
//! through unchanged.

mod bitly;
mod chain;
mod error;
mod redirect;
mod retry;

pub use bitly::BitlyExpander;
pub use chain::{CacheLoad, ExpanderChain, Strategy};
pub use error::ExpandError;
pub use redirect::RedirectExpander;
pub use retry::{RetryPolicy, retry};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::Config;

/// A link-shortening service that can turn a short URL into its target
#[async_trait]
pub trait Expander: Send + Sync {
    /// Stable name, also used for the cache file name
    fn name(&self) -> &str;

    /// Whether this expander handles the URL
    fn claims(&self, url: &str) -> bool;

    /// One network attempt at expanding the URL
    async fn lookup(&self, url: &str) -> Result<String, ExpandError>;
}

/// Lowercased host of a URL, if it parses
pub fn host_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Build the chain described by the config
///
/// Order is priority: service-specific expanders first, the redirect
/// follower last since it claims everything.
pub fn create_chain(config: &Config) -> eyre::Result<ExpanderChain> {
    debug!("create_chain: called");
    let timeout = Duration::from_millis(config.expanders.timeout_ms);
    let mut chain = ExpanderChain::new(config.retry_policy(), config.cache.capacity);

    if let Some((login, api_key)) = config.expanders.bitly.resolve() {
        let bitly = BitlyExpander::new(login, api_key, &config.expanders.bitly.domains, timeout)
            .map_err(|e| eyre::eyre!("Failed to build bitly expander: {}", e))?;
        chain.push(Arc::new(bitly));
    } else {
        debug!("create_chain: no bitly credentials, skipping");
    }

    if config.expanders.redirect.enabled {
        let redirect = RedirectExpander::new(config.expanders.redirect.max_hops, timeout)
            .map_err(|e| eyre::eyre!("Failed to build redirect expander: {}", e))?;
        chain.push(Arc::new(redirect));
    }

    info!(expanders = ?chain.names(), "Expander chain ready");
    Ok(chain)
}
