//! Bucket cursor - decides which bucket to process next
//!
//! The cursor owns the checkpoint (the last committed bucket) and the state
//! store it is persisted to. Each tick the relay hands it the provider's
//! currently available buckets and gets back a [`Step`]:
//!
//! - nothing newer than the checkpoint: [`Step::Idle`], poll again later
//! - checkpoint older than everything upstream still keeps: snap forward to
//!   the oldest available bucket (the gap has expired and cannot be fetched)
//! - otherwise: the first available bucket after the checkpoint
//!
//! [`BucketCursor::commit`] persists before it advances, so a crash mid-bucket
//! reprocesses at most that one bucket and never skips one.

use tracing::{debug, info, warn};

use crate::bucket::Bucket;
use crate::state::{RelayState, StateError, StateStore};

/// What the relay should do on this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Fetch and process `bucket`
    Process {
        bucket: Bucket,
        /// Buckets between the checkpoint and `bucket` that expired upstream
        skipped: i64,
    },
    /// No bucket newer than the checkpoint yet
    Idle,
}

/// Checkpoint state machine
#[derive(Debug)]
pub struct BucketCursor {
    checkpoint: Option<Bucket>,
    pid: u32,
    store: StateStore,
}

impl BucketCursor {
    /// Create a cursor without touching the store
    pub fn new(store: StateStore, pid: u32, checkpoint: Option<Bucket>) -> Self {
        Self { checkpoint, pid, store }
    }

    /// Load the persisted checkpoint, apply an operator override, and record `pid`
    pub fn restore(store: StateStore, pid: u32, override_ts: Option<Bucket>) -> Result<Self, StateError> {
        debug!(pid, ?override_ts, "BucketCursor::restore: called");
        let persisted = store.load()?.and_then(|state| state.timestamp);

        let checkpoint = match (override_ts, persisted) {
            (Some(requested), Some(saved)) if requested < saved => {
                warn!(%requested, %saved, "Rewinding checkpoint on operator request");
                Some(requested)
            }
            (Some(requested), _) => Some(requested),
            (None, saved) => saved,
        };

        store.save(&RelayState {
            pid,
            timestamp: checkpoint,
        })?;

        match checkpoint {
            Some(bucket) => info!(checkpoint = %bucket, "Resuming from checkpoint"),
            None => info!("No checkpoint recorded, starting from the newest bucket"),
        }
        Ok(Self { checkpoint, pid, store })
    }

    pub fn checkpoint(&self) -> Option<Bucket> {
        self.checkpoint
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Pick the next step given the buckets the provider currently offers
    pub fn plan(&self, available: &[Bucket]) -> Step {
        let (Some(&oldest), Some(&newest)) = (available.iter().min(), available.iter().max()) else {
            debug!("BucketCursor::plan: provider lists no buckets");
            return Step::Idle;
        };

        let Some(checkpoint) = self.checkpoint else {
            return Step::Process {
                bucket: newest,
                skipped: 0,
            };
        };

        if checkpoint < oldest {
            let skipped = checkpoint.intervals_until(oldest) - 1;
            return Step::Process {
                bucket: oldest,
                skipped: skipped.max(0),
            };
        }

        if checkpoint >= newest {
            return Step::Idle;
        }

        match available.iter().filter(|b| **b > checkpoint).min() {
            Some(&bucket) => Step::Process { bucket, skipped: 0 },
            None => Step::Idle,
        }
    }

    /// Persist `bucket` as the checkpoint, then advance to it
    ///
    /// On error the in-memory checkpoint is left where it was.
    pub fn commit(&mut self, bucket: Bucket) -> Result<(), StateError> {
        debug!(%bucket, "BucketCursor::commit: called");
        if let Some(checkpoint) = self.checkpoint
            && bucket <= checkpoint
        {
            return Err(StateError::NotMonotonic { checkpoint, bucket });
        }

        self.store.save(&RelayState {
            pid: self.pid,
            timestamp: Some(bucket),
        })?;
        self.checkpoint = Some(bucket);
        Ok(())
    }
}
