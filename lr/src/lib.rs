//! linkrelay - activity stream relay with link expansion
//!
//! Reads an activity stream one minute-bucket at a time, rewrites shortened
//! links in each activity to their long form, and republishes the result.
//! Progress is checkpointed per bucket so a restart resumes exactly where the
//! last run stopped.
//!
//! # Modules
//!
//! - [`bucket`] - Minute-granularity bucket timestamps
//! - [`cursor`] - Next-bucket selection and checkpoint commits
//! - [`state`] - Persisted pid and checkpoint
//! - [`expand`] - Expander trait, cached and retried strategies, the chain
//! - [`pipeline`] - Bounded concurrent expansion of a batch
//! - [`relay`] - The bucket loop
//! - [`daemon`] - Instance lock, pid lookup, stop, detach
//! - [`source`] / [`publish`] - Provider and sink clients
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod activity;
pub mod bucket;
pub mod cli;
pub mod config;
pub mod cursor;
pub mod daemon;
pub mod expand;
pub mod pipeline;
pub mod publish;
pub mod relay;
pub mod source;
pub mod state;

// Re-export commonly used types
pub use activity::Activity;
pub use bucket::Bucket;
pub use config::Config;
pub use cursor::{BucketCursor, Step};
pub use expand::{ExpandError, Expander, ExpanderChain, RetryPolicy};
pub use relay::{Relay, RelayOptions, RelayStats, Tick};
pub use state::{RelayState, StateStore};
