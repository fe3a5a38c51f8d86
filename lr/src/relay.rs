//! The bucket loop
//!
//! One bucket at a time: list what the provider has, ask the cursor what to
//! do, then fetch, expand, publish and commit. Any failure along the way
//! leaves the checkpoint alone and the same bucket is tried again after
//! `retry_delay`. Shutdown is only observed between buckets and while
//! waiting, never in the middle of one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, error, info, warn};

use crate::bucket::Bucket;
use crate::config::Config;
use crate::cursor::{BucketCursor, Step};
use crate::expand::ExpanderChain;
use crate::pipeline::{PipelineOptions, expand_batch};
use crate::publish::Publisher;
use crate::source::ActivitySource;

/// Loop tuning
#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// Wait when no new bucket is available
    pub poll_interval: Duration,

    /// Wait before retrying a failed bucket
    pub retry_delay: Duration,

    /// Upstream keyword filter
    pub keyword: Option<String>,

    /// Cap on activities taken from one bucket
    pub max_activities: Option<usize>,

    pub pipeline: PipelineOptions,

    /// Where expander caches are saved
    pub cache_dir: PathBuf,

    /// Save caches every this many committed buckets (0 = only on exit)
    pub cache_save_every: u64,
}

impl RelayOptions {
    pub fn from_config(config: &Config, cache_dir: PathBuf) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.relay.poll_interval_secs),
            retry_delay: Duration::from_secs(config.relay.retry_delay_secs),
            keyword: config.source.keyword.clone(),
            max_activities: config.relay.max_activities,
            pipeline: PipelineOptions {
                concurrency: config.relay.concurrency,
                provenance_tag: config.relay.provenance_tag.clone(),
            },
            cache_dir,
            cache_save_every: config.relay.cache_save_every,
        }
    }
}

/// Outcome of a successful [`Relay::tick`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Processed { bucket: Bucket, published: usize },
    Idle,
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Buckets committed
    pub buckets: u64,

    /// Activities published
    pub published: u64,

    /// Failed attempts at a bucket
    pub failures: u64,
}

pub struct Relay {
    source: Arc<dyn ActivitySource>,
    sink: Arc<dyn Publisher>,
    chain: Arc<ExpanderChain>,
    cursor: BucketCursor,
    options: RelayOptions,
    stats: RelayStats,
}

impl Relay {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        sink: Arc<dyn Publisher>,
        chain: Arc<ExpanderChain>,
        cursor: BucketCursor,
        options: RelayOptions,
    ) -> Self {
        debug!(?options, "Relay::new: called");
        Self {
            source,
            sink,
            chain,
            cursor,
            options,
            stats: RelayStats::default(),
        }
    }

    pub fn cursor(&self) -> &BucketCursor {
        &self.cursor
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Run until a shutdown message arrives or the sender is dropped
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<RelayStats> {
        info!(checkpoint = ?self.cursor.checkpoint().map(|b| b.to_string()), "Relay started");

        loop {
            match shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Disconnected) => break,
            }

            let wait = match self.tick().await {
                Ok(Tick::Processed { .. }) => {
                    let every = self.options.cache_save_every;
                    if every > 0 && self.stats.buckets % every == 0 {
                        self.save_caches();
                    }
                    None
                }
                Ok(Tick::Idle) => Some(self.options.poll_interval),
                Err(e) => {
                    self.stats.failures += 1;
                    error!(error = ?e, retry_in = ?self.options.retry_delay, "Bucket failed, will retry");
                    Some(self.options.retry_delay)
                }
            };

            if let Some(duration) = wait
                && Self::wait(duration, &mut shutdown_rx).await
            {
                break;
            }
        }

        self.save_caches();
        info!(
            buckets = self.stats.buckets,
            published = self.stats.published,
            failures = self.stats.failures,
            caches = ?self.chain.stats(),
            "Relay stopped"
        );
        Ok(self.stats)
    }

    /// One step of the loop: plan, and process the chosen bucket if any
    pub async fn tick(&mut self) -> Result<Tick> {
        let available = self.source.buckets().await.context("Failed to list buckets")?;
        debug!(count = available.len(), "Relay::tick: buckets listed");

        let (bucket, skipped) = match self.cursor.plan(&available) {
            Step::Idle => {
                debug!("Relay::tick: idle");
                return Ok(Tick::Idle);
            }
            Step::Process { bucket, skipped } => (bucket, skipped),
        };

        if skipped > 0 {
            warn!(
                checkpoint = ?self.cursor.checkpoint().map(|b| b.to_string()),
                %bucket,
                skipped,
                "Checkpoint fell behind upstream retention, skipping expired buckets"
            );
        }

        let published = self.process_bucket(bucket).await?;
        self.cursor
            .commit(bucket)
            .context(format!("Failed to commit bucket {}", bucket))?;

        self.stats.buckets += 1;
        self.stats.published += published as u64;
        Ok(Tick::Processed { bucket, published })
    }

    /// Fetch, expand and publish one bucket, returning how many were published
    pub async fn process_bucket(&self, bucket: Bucket) -> Result<usize> {
        debug!(%bucket, "Relay::process_bucket: called");
        let mut activities = self
            .source
            .fetch(bucket, self.options.keyword.as_deref())
            .await
            .context(format!("Failed to fetch bucket {}", bucket))?;
        let fetched = activities.len();

        if let Some(limit) = self.options.max_activities
            && activities.len() > limit
        {
            debug!(%bucket, fetched, limit, "Relay::process_bucket: truncating");
            activities.truncate(limit);
        }

        let rewritten = expand_batch(self.chain.clone(), activities, &self.options.pipeline).await;
        if !rewritten.is_empty() {
            self.sink
                .publish(&rewritten)
                .await
                .context(format!("Failed to publish bucket {}", bucket))?;
        }

        info!(%bucket, fetched, published = rewritten.len(), "Processed bucket");
        Ok(rewritten.len())
    }

    /// Sleep for `duration`; true if shutdown was requested meanwhile
    async fn wait(duration: Duration, shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = shutdown_rx.recv() => true,
        }
    }

    fn save_caches(&self) {
        if let Err(e) = self.chain.save_caches(&self.options.cache_dir) {
            warn!(error = %e, "Failed to save expander caches");
        }
    }
}
