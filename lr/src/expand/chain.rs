//! Ordered expander strategies with per-strategy caches

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use lrucache::{PersistError, SharedCache};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::{ExpandError, Expander, RetryPolicy, retry};

type Pending = Arc<OnceCell<Result<String, ExpandError>>>;

/// One expander plus its cache and retry policy
pub struct Strategy {
    expander: Arc<dyn Expander>,
    cache: SharedCache<String, String>,
    policy: RetryPolicy,
    /// Lookups in progress, keyed by URL
    inflight: Mutex<HashMap<String, Pending>>,
}

impl Strategy {
    pub fn new(expander: Arc<dyn Expander>, policy: RetryPolicy, capacity: usize) -> Self {
        Self {
            expander,
            cache: SharedCache::new(capacity),
            policy,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.expander.name()
    }

    pub fn claims(&self, url: &str) -> bool {
        self.expander.claims(url)
    }

    /// Cached value, or a retried lookup whose success is cached
    ///
    /// Concurrent callers missing on the same URL share one lookup and its
    /// outcome. No lock is held while the network call runs.
    pub async fn expand(&self, url: &str) -> Result<String, ExpandError> {
        if let Some(hit) = self.cache.get(url) {
            debug!(name = %self.name(), %url, "Strategy::expand: cache hit");
            return Ok(hit);
        }

        let pending = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .clone();

        let result = pending
            .get_or_init(|| async {
                if let Some(hit) = self.cache.peek(url) {
                    return Ok(hit);
                }
                let result = retry(&self.policy, self.name(), url, || self.expander.lookup(url)).await;
                if let Ok(expanded) = &result {
                    self.cache.put(url.to_string(), expanded.clone());
                }
                result
            })
            .await
            .clone();

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight.get(url).is_some_and(|current| Arc::ptr_eq(current, &pending)) {
            inflight.remove(url);
        }
        result
    }

    fn cache_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.cache", self.name()))
    }
}

/// Result of [`ExpanderChain::load_caches`]
#[derive(Debug, Default)]
pub struct CacheLoad {
    /// Entries restored across all strategies
    pub loaded: usize,

    /// Strategies whose cache file could not be read
    pub failed: Vec<(String, PersistError)>,
}

/// Ordered strategies; earlier ones win
pub struct ExpanderChain {
    strategies: Vec<Strategy>,
    policy: RetryPolicy,
    capacity: usize,
}

impl ExpanderChain {
    pub fn new(policy: RetryPolicy, capacity: usize) -> Self {
        debug!(?policy, %capacity, "ExpanderChain::new: called");
        Self {
            strategies: Vec::new(),
            policy,
            capacity,
        }
    }

    /// Append an expander at the lowest priority so far
    pub fn push(&mut self, expander: Arc<dyn Expander>) {
        debug!(name = %expander.name(), "ExpanderChain::push: called");
        self.strategies.push(Strategy::new(expander, self.policy, self.capacity));
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(Strategy::name).collect()
    }

    pub fn strategy_for(&self, url: &str) -> Option<&Strategy> {
        self.strategies.iter().find(|s| s.claims(url))
    }

    /// Expanded form of `url`, or `url` itself when unclaimed or on failure
    pub async fn resolve(&self, url: &str) -> String {
        let Some(strategy) = self.strategy_for(url) else {
            debug!(%url, "ExpanderChain::resolve: unclaimed");
            return url.to_string();
        };
        match strategy.expand(url).await {
            Ok(expanded) => expanded,
            Err(e) => {
                debug!(name = %strategy.name(), %url, error = %e, "ExpanderChain::resolve: giving up, keeping original");
                url.to_string()
            }
        }
    }

    /// Restore every strategy's cache from `<dir>/<name>.cache`
    ///
    /// A file that fails to load leaves that strategy cold; the others still load.
    pub fn load_caches(&self, dir: &Path) -> CacheLoad {
        debug!(dir = %dir.display(), "ExpanderChain::load_caches: called");
        let mut outcome = CacheLoad::default();
        for strategy in &self.strategies {
            match strategy.cache.load_from(&strategy.cache_path(dir)) {
                Ok(count) => outcome.loaded += count,
                Err(e) => {
                    warn!(name = %strategy.name(), error = %e, "Failed to restore expander cache, starting cold");
                    outcome.failed.push((strategy.name().to_string(), e));
                }
            }
        }
        outcome
    }

    /// Write every strategy's cache to `<dir>/<name>.cache`
    pub fn save_caches(&self, dir: &Path) -> Result<(), PersistError> {
        debug!(dir = %dir.display(), "ExpanderChain::save_caches: called");
        for strategy in &self.strategies {
            strategy.cache.save_to(&strategy.cache_path(dir))?;
        }
        Ok(())
    }

    /// Cache size per strategy
    pub fn stats(&self) -> Vec<(String, usize)> {
        self.strategies
            .iter()
            .map(|s| (s.name().to_string(), s.cache.len()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct ScriptedExpander {
        name: String,
        domain: Option<String>,
        script: Mutex<VecDeque<Result<String, ExpandError>>>,
        fallback: String,
        calls: AtomicUsize,
        delay_ms: u64,
    }

    impl ScriptedExpander {
        fn new(name: &str, domain: Option<&str>, fallback: &str) -> Self {
            Self {
                name: name.to_string(),
                domain: domain.map(str::to_string),
                script: Mutex::new(VecDeque::new()),
                fallback: fallback.to_string(),
                calls: AtomicUsize::new(0),
                delay_ms: 0,
            }
        }

        fn with_delay(mut self, delay_ms: u64) -> Self {
            self.delay_ms = delay_ms;
            self
        }

        fn then(self, result: Result<String, ExpandError>) -> Self {
            self.script.lock().unwrap().push_back(result);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Expander for ScriptedExpander {
        fn name(&self) -> &str {
            &self.name
        }

        fn claims(&self, url: &str) -> bool {
            match &self.domain {
                Some(domain) => crate::expand::host_of(url).as_deref() == Some(domain.as_str()),
                None => true,
            }
        }

        async fn lookup(&self, _url: &str) -> Result<String, ExpandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn chain_with(expanders: Vec<Arc<ScriptedExpander>>) -> ExpanderChain {
        let mut chain = ExpanderChain::new(RetryPolicy::immediate(5), 100);
        for expander in expanders {
            chain.push(expander);
        }
        chain
    }

    #[tokio::test]
    async fn test_first_claimant_wins() {
        let bitly = Arc::new(ScriptedExpander::new("bitly", Some("bit.ly"), "http://example.com/page"));
        let catch_all = Arc::new(ScriptedExpander::new("redirect", None, "http://wrong.example"));
        let chain = chain_with(vec![bitly.clone(), catch_all.clone()]);

        assert_eq!(chain.resolve("http://bit.ly/abc").await, "http://example.com/page");
        assert_eq!(bitly.calls(), 1);
        assert_eq!(catch_all.calls(), 0);
    }

    #[tokio::test]
    async fn test_unclaimed_url_unchanged() {
        let bitly = Arc::new(ScriptedExpander::new("bitly", Some("bit.ly"), "http://example.com/page"));
        let chain = chain_with(vec![bitly.clone()]);

        assert_eq!(chain.resolve("http://t.co/xyz").await, "http://t.co/xyz");
        assert_eq!(bitly.calls(), 0);
    }

    #[tokio::test]
    async fn test_timeouts_then_success_is_cached() {
        let bitly = Arc::new(
            ScriptedExpander::new("bitly", Some("bit.ly"), "http://example.com/page")
                .then(Err(ExpandError::Timeout))
                .then(Err(ExpandError::Timeout))
                .then(Err(ExpandError::Timeout)),
        );
        let chain = chain_with(vec![bitly.clone()]);

        assert_eq!(chain.resolve("http://bit.ly/abc").await, "http://example.com/page");
        assert_eq!(bitly.calls(), 4);

        assert_eq!(chain.resolve("http://bit.ly/abc").await, "http://example.com/page");
        assert_eq!(bitly.calls(), 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_keeps_original_and_is_not_cached() {
        let bitly = Arc::new(
            ScriptedExpander::new("bitly", Some("bit.ly"), "http://example.com/page")
                .then(Err(ExpandError::Status { status: 404 })),
        );
        let chain = chain_with(vec![bitly.clone()]);

        assert_eq!(chain.resolve("http://bit.ly/abc").await, "http://bit.ly/abc");
        assert_eq!(bitly.calls(), 1);
        assert_eq!(chain.stats(), vec![("bitly".to_string(), 0)]);

        assert_eq!(chain.resolve("http://bit.ly/abc").await, "http://example.com/page");
        assert_eq!(bitly.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_original() {
        let mut expander = ScriptedExpander::new("bitly", None, "http://example.com/page");
        for _ in 0..5 {
            expander = expander.then(Err(ExpandError::Timeout));
        }
        let expander = Arc::new(expander);
        let chain = chain_with(vec![expander.clone()]);

        assert_eq!(chain.resolve("http://bit.ly/abc").await, "http://bit.ly/abc");
        assert_eq!(expander.calls(), 5);
    }

    #[tokio::test]
    async fn test_save_and_load_caches() {
        let temp_dir = TempDir::new().unwrap();
        let bitly = Arc::new(ScriptedExpander::new("bitly", None, "http://example.com/page"));
        let chain = chain_with(vec![bitly.clone()]);
        chain.resolve("http://bit.ly/abc").await;
        chain.save_caches(temp_dir.path()).unwrap();
        assert!(temp_dir.path().join("bitly.cache").exists());

        let fresh = Arc::new(ScriptedExpander::new("bitly", None, "http://other.example"));
        let restored = chain_with(vec![fresh.clone()]);
        assert_eq!(restored.load_caches(temp_dir.path()).loaded, 1);
        assert_eq!(restored.resolve("http://bit.ly/abc").await, "http://example.com/page");
        assert_eq!(fresh.calls(), 0);
    }

    #[test]
    fn test_load_caches_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let chain = chain_with(vec![Arc::new(ScriptedExpander::new("bitly", None, "x"))]);
        let outcome = chain.load_caches(temp_dir.path());
        assert_eq!(outcome.loaded, 0);
        assert!(outcome.failed.is_empty());
    }

    #[test]
    fn test_corrupt_cache_file_does_not_block_others() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("bitly.cache"), "{{ not yaml").unwrap();
        lrucache::persist::save(
            &temp_dir.path().join("redirect.cache"),
            &[("http://t.co/x".to_string(), "http://example.com/x".to_string())],
        )
        .unwrap();

        let chain = chain_with(vec![
            Arc::new(ScriptedExpander::new("bitly", Some("bit.ly"), "x")),
            Arc::new(ScriptedExpander::new("redirect", None, "y")),
        ]);
        let outcome = chain.load_caches(temp_dir.path());

        assert_eq!(outcome.loaded, 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "bitly");
        assert_eq!(
            chain.stats(),
            vec![("bitly".to_string(), 0), ("redirect".to_string(), 1)]
        );

        chain.save_caches(temp_dir.path()).unwrap();
        let saved: Vec<(String, String)> = lrucache::persist::load(&temp_dir.path().join("redirect.cache")).unwrap();
        assert_eq!(saved.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_lookup() {
        let expander = Arc::new(ScriptedExpander::new("bitly", None, "http://example.com/page").with_delay(20));
        let strategy = Strategy::new(expander.clone(), RetryPolicy::immediate(3), 100);

        let results = tokio::join!(
            strategy.expand("http://bit.ly/abc"),
            strategy.expand("http://bit.ly/abc"),
            strategy.expand("http://bit.ly/abc"),
            strategy.expand("http://bit.ly/other"),
        );

        assert_eq!(results.0.unwrap(), "http://example.com/page");
        assert_eq!(results.1.unwrap(), "http://example.com/page");
        assert_eq!(results.2.unwrap(), "http://example.com/page");
        assert!(results.3.is_ok());
        assert_eq!(expander.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_a_failure() {
        let expander = Arc::new(
            ScriptedExpander::new("bitly", None, "http://example.com/page")
                .with_delay(20)
                .then(Err(ExpandError::Status { status: 404 })),
        );
        let strategy = Strategy::new(expander.clone(), RetryPolicy::immediate(3), 100);

        let (a, b) = tokio::join!(strategy.expand("http://bit.ly/abc"), strategy.expand("http://bit.ly/abc"));

        assert!(matches!(a, Err(ExpandError::Status { status: 404 })));
        assert!(matches!(b, Err(ExpandError::Status { status: 404 })));
        assert_eq!(expander.calls(), 1);

        assert_eq!(strategy.expand("http://bit.ly/abc").await.unwrap(), "http://example.com/page");
        assert_eq!(expander.calls(), 2);
    }
}
