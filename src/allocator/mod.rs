//! Build-number allocation.
//!
//! [`Allocator::allocate`] reads the counter object, plans the next number
//! with [`plan::plan`], and writes it back.  Two strategies are available:
//!
//! * [`Strategy::Unguarded`]: existence check, read, unconditional overwrite.
//!   Concurrent invocations against the same object may issue the same
//!   number; callers serialize runs externally.
//! * [`Strategy::Conditional`]: read with entity tag, then a conditional
//!   write (`If-None-Match: *` / `If-Match`), retried on conflict.
//!
//! Neither strategy retries a failed read or write, and a failed write leaves
//! the previous counter value in place.

pub mod plan;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::{AllocationMode, Config};
use crate::pipeline::{JobId, OutputVariables};
use crate::storage::{CounterStore, StoreError, WriteCondition};

pub use plan::{Allocation, BuildNumber};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where the counter lives and how its value is presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterConfig {
    pub bucket: String,
    pub key: String,
    pub version_prefix: String,
    /// First number issued when no counter object exists yet.
    pub start_build_number: u64,
}

/// What gets posted back to the pipeline on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub job_id: JobId,
    pub output_variables: OutputVariables,
    #[serde(skip)]
    pub build_number: BuildNumber,
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("counter object s3://{bucket}/{key} does not hold a build number: {contents:?}")]
    CorruptCounter {
        bucket: String,
        key: String,
        contents: String,
    },

    #[error("build number {previous} cannot be incremented")]
    CounterOverflow { previous: u64 },

    #[error("counter object s3://{bucket}/{key} has no entity tag; conditional writes are unavailable")]
    Unversioned { bucket: String, key: String },

    #[error("counter kept changing underneath us; gave up after {attempts} attempts")]
    Contention { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Unguarded,
    Conditional { max_attempts: u32 },
}

impl Strategy {
    pub fn from_config(config: &Config) -> Self {
        match config.allocation_mode {
            AllocationMode::Unguarded => Self::Unguarded,
            AllocationMode::Conditional => Self::Conditional {
                max_attempts: config.max_attempts,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Allocator
// ---------------------------------------------------------------------------

pub struct Allocator {
    store: Arc<dyn CounterStore>,
    strategy: Strategy,
}

impl Allocator {
    pub fn new(store: Arc<dyn CounterStore>, strategy: Strategy) -> Self {
        Self { store, strategy }
    }

    /// Issue the next build number for `job_id` and persist it.
    #[instrument(skip(self, counter), fields(bucket = %counter.bucket, key = %counter.key))]
    pub async fn allocate(
        &self,
        counter: &CounterConfig,
        job_id: &JobId,
    ) -> Result<AllocationResult, AllocationError> {
        info!(strategy = ?self.strategy, "using bucket to store build number files");

        let allocation = match self.strategy {
            Strategy::Unguarded => self.allocate_unguarded(counter).await?,
            Strategy::Conditional { max_attempts } => {
                self.allocate_conditional(counter, max_attempts).await?
            }
        };

        info!(
            previous = ?allocation.previous.map(BuildNumber::get),
            build_number = %allocation.build_number,
            version = %allocation.version,
            "build number allocated"
        );

        Ok(AllocationResult {
            job_id: job_id.clone(),
            output_variables: allocation.output_variables(),
            build_number: allocation.build_number,
        })
    }

    async fn allocate_unguarded(&self, counter: &CounterConfig) -> Result<Allocation, AllocationError> {
        let previous = self.read_previous(counter).await?;
        let allocation = plan::plan(previous.as_deref(), counter)?;

        self.store
            .put(
                &counter.bucket,
                &counter.key,
                allocation.counter_bytes(),
                WriteCondition::Unconditional,
            )
            .await?;

        Ok(allocation)
    }

    async fn read_previous(&self, counter: &CounterConfig) -> Result<Option<Vec<u8>>, AllocationError> {
        if !self.store.exists(&counter.bucket, &counter.key).await? {
            info!(
                start_build_number = counter.start_build_number,
                "unable to find previous build number, starting from the configured start"
            );
            return Ok(None);
        }

        let object = self.store.get(&counter.bucket, &counter.key).await?;
        info!(
            previous = %String::from_utf8_lossy(&object.body),
            "previous build number"
        );
        Ok(Some(object.body))
    }

    async fn allocate_conditional(
        &self,
        counter: &CounterConfig,
        max_attempts: u32,
    ) -> Result<Allocation, AllocationError> {
        for attempt in 1..=max_attempts {
            let (previous, condition) = match self.store.get(&counter.bucket, &counter.key).await {
                Ok(object) => {
                    let etag = object.etag.ok_or_else(|| AllocationError::Unversioned {
                        bucket: counter.bucket.clone(),
                        key: counter.key.clone(),
                    })?;
                    (Some(object.body), WriteCondition::IfMatch(etag))
                }
                Err(StoreError::NotFound { .. }) => {
                    info!(
                        start_build_number = counter.start_build_number,
                        "unable to find previous build number, starting from the configured start"
                    );
                    (None, WriteCondition::IfAbsent)
                }
                Err(err) => return Err(err.into()),
            };

            let allocation = plan::plan(previous.as_deref(), counter)?;

            match self
                .store
                .put(&counter.bucket, &counter.key, allocation.counter_bytes(), condition)
                .await
            {
                Ok(()) => return Ok(allocation),
                Err(StoreError::PreconditionFailed { .. }) => {
                    warn!(
                        attempt,
                        max_attempts,
                        lost_build_number = %allocation.build_number,
                        "counter changed concurrently, retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(AllocationError::Contention {
            attempts: max_attempts,
        })
    }
}
