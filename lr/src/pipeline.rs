//! Concurrent link expansion for one bucket's activities
//!
//! Activities without links are dropped up front. The rest are spread across
//! a fixed pool of workers, each of which resolves every distinct URL in its
//! activity through the [`ExpanderChain`] and rewrites the body. The batch is
//! returned only once every worker has finished.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::activity::Activity;
use crate::expand::ExpanderChain;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://[^\s<>]+").expect("URL pattern compiles"));

/// Characters that end a sentence rather than a URL
const TRAILING_PUNCTUATION: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '"', '\''];

/// Default expansion workers per bucket
pub const DEFAULT_CONCURRENCY: usize = 32;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Upper bound on concurrently expanding activities
    pub concurrency: usize,

    /// Appended to each rewritten activity's `sources`
    pub provenance_tag: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            provenance_tag: "linkrelay".to_string(),
        }
    }
}

/// Every URL in `text`, in order of appearance
pub fn find_urls(text: &str) -> Vec<&str> {
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(TRAILING_PUNCTUATION))
        .filter(|url| has_host(url))
        .collect()
}

/// Whether the authority part of `url` names something
fn has_host(url: &str) -> bool {
    url.split_once("://")
        .and_then(|(_, rest)| rest.split(['/', '?', '#']).next())
        .is_some_and(|host| host.chars().any(char::is_alphanumeric))
}

pub fn has_url(text: &str) -> bool {
    !find_urls(text).is_empty()
}

/// Replace each URL in `text` that has an entry in `resolved`
pub fn rewrite_urls(text: &str, resolved: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in URL_RE.find_iter(text) {
        let url = m.as_str().trim_end_matches(TRAILING_PUNCTUATION);
        out.push_str(&text[last..m.start()]);
        match resolved.get(url) {
            Some(expanded) => out.push_str(expanded),
            None => out.push_str(url),
        }
        last = m.start() + url.len();
    }
    out.push_str(&text[last..]);
    out
}

/// Expand the links in one activity and tag it
pub async fn expand_activity(chain: &ExpanderChain, mut activity: Activity, provenance_tag: &str) -> Activity {
    let mut resolved: HashMap<String, String> = HashMap::new();
    for url in find_urls(&activity.body) {
        if resolved.contains_key(url) {
            continue;
        }
        let expanded = chain.resolve(url).await;
        resolved.insert(url.to_string(), expanded);
    }
    activity.body = rewrite_urls(&activity.body, &resolved);
    activity.sources.push(provenance_tag.to_string());
    activity
}

/// Filter, fan out, and fan in one batch
///
/// Output order is completion order, not input order.
pub async fn expand_batch(chain: Arc<ExpanderChain>, activities: Vec<Activity>, options: &PipelineOptions) -> Vec<Activity> {
    let total = activities.len();
    let candidates: Vec<Activity> = activities.into_iter().filter(|a| has_url(&a.body)).collect();
    debug!(%total, with_links = candidates.len(), concurrency = options.concurrency, "expand_batch: called");
    if candidates.is_empty() {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut workers = JoinSet::new();
    for activity in candidates {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let chain = chain.clone();
        let tag = options.provenance_tag.clone();
        workers.spawn(async move {
            let rewritten = expand_activity(&chain, activity, &tag).await;
            drop(permit);
            rewritten
        });
    }

    let mut rewritten = Vec::with_capacity(workers.len());
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(activity) => rewritten.push(activity),
            Err(e) => error!(error = %e, "expand_batch: worker failed, dropping activity"),
        }
    }
    debug!(count = rewritten.len(), "expand_batch: returning");
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::{ExpandError, Expander, RetryPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedExpander;

    #[async_trait]
    impl Expander for FixedExpander {
        fn name(&self) -> &str {
            "fixed"
        }

        fn claims(&self, url: &str) -> bool {
            url.starts_with("http://bit.ly/")
        }

        async fn lookup(&self, url: &str) -> Result<String, ExpandError> {
            match url {
                "http://bit.ly/abc" => Ok("http://example.com/page".to_string()),
                _ => Err(ExpandError::Status { status: 404 }),
            }
        }
    }

    struct SlowExpander {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Expander for SlowExpander {
        fn name(&self) -> &str {
            "slow"
        }

        fn claims(&self, _url: &str) -> bool {
            true
        }

        async fn lookup(&self, url: &str) -> Result<String, ExpandError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("{}/long", url))
        }
    }

    struct CountingExpander {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Expander for CountingExpander {
        fn name(&self) -> &str {
            "counting"
        }

        fn claims(&self, _url: &str) -> bool {
            true
        }

        async fn lookup(&self, _url: &str) -> Result<String, ExpandError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok("http://example.com/page".to_string())
        }
    }

    fn fixed_chain() -> Arc<ExpanderChain> {
        let mut chain = ExpanderChain::new(RetryPolicy::immediate(1), 100);
        chain.push(Arc::new(FixedExpander));
        Arc::new(chain)
    }

    #[test]
    fn test_find_urls() {
        assert_eq!(
            find_urls("see http://bit.ly/abc, and (https://t.co/x). done"),
            vec!["http://bit.ly/abc", "https://t.co/x"]
        );
        assert!(find_urls("no links here").is_empty());
        assert!(!has_url("http:// nothing"));
    }

    #[test]
    fn test_bare_scheme_is_not_a_link() {
        assert!(!has_url("https://."));
        assert!(!has_url("see http://..., then"));
        assert!(!has_url("https://./path"));
        assert_eq!(find_urls("see https://. and http://t.co/x"), vec!["http://t.co/x"]);
    }

    #[test]
    fn test_rewrite_keeps_punctuation() {
        let mut resolved = HashMap::new();
        resolved.insert("http://bit.ly/abc".to_string(), "http://example.com/page".to_string());
        assert_eq!(
            rewrite_urls("go http://bit.ly/abc. now http://other.example", &resolved),
            "go http://example.com/page. now http://other.example"
        );
    }

    #[tokio::test]
    async fn test_expands_bitly_link() {
        let activities = vec![Activity::new("see http://bit.ly/abc and more")];
        let out = expand_batch(fixed_chain(), activities, &PipelineOptions::default()).await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body, "see http://example.com/page and more");
        assert_eq!(out[0].sources, vec!["linkrelay"]);
    }

    #[tokio::test]
    async fn test_activities_without_links_are_dropped() {
        let activities = vec![
            Activity::new("plain text"),
            Activity::new("http://bit.ly/abc"),
            Activity::new("also plain"),
        ];
        let out = expand_batch(fixed_chain(), activities, &PipelineOptions::default()).await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_and_unclaimed_links_kept() {
        let activities = vec![Activity::new("http://bit.ly/missing http://t.co/x http://bit.ly/abc")];
        let out = expand_batch(fixed_chain(), activities, &PipelineOptions::default()).await;
        assert_eq!(out[0].body, "http://bit.ly/missing http://t.co/x http://example.com/page");
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let slow = Arc::new(SlowExpander {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut chain = ExpanderChain::new(RetryPolicy::immediate(1), 1000);
        chain.push(slow.clone());

        let activities: Vec<Activity> = (0..40).map(|i| Activity::new(format!("http://s.example/{}", i))).collect();
        let options = PipelineOptions {
            concurrency: 4,
            provenance_tag: "t".to_string(),
        };
        let out = expand_batch(Arc::new(chain), activities, &options).await;

        assert_eq!(out.len(), 40);
        assert!(slow.peak.load(Ordering::SeqCst) <= 4);
        assert!(out.iter().all(|a| a.body.ends_with("/long")));
    }

    #[tokio::test]
    async fn test_shared_link_is_looked_up_once() {
        let counting = Arc::new(CountingExpander {
            calls: AtomicUsize::new(0),
        });
        let mut chain = ExpanderChain::new(RetryPolicy::immediate(1), 100);
        chain.push(counting.clone());

        let activities: Vec<Activity> = (0..8).map(|i| Activity::new(format!("post {} http://bit.ly/abc", i))).collect();
        let out = expand_batch(Arc::new(chain), activities, &PipelineOptions::default()).await;

        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|a| a.body.ends_with("http://example.com/page")));
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
