//! Counter object storage.
//!
//! The allocator only ever touches a single object, so the store surface is
//! deliberately small: an existence check, a read, and a (possibly
//! conditional) overwrite.  [`s3`] talks to S3; [`memory`] backs the tests.

#[cfg(test)]
pub mod memory;
pub mod s3;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Contents of the counter object as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterObject {
    pub body: Vec<u8>,
    /// Entity tag of the version that was read, when the store exposes one.
    pub etag: Option<String>,
}

/// Precondition attached to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Overwrite whatever is there.
    Unconditional,
    /// Only create; reject if the object already exists.
    IfAbsent,
    /// Only overwrite the version carrying this entity tag.
    IfMatch(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("conditional write to s3://{bucket}/{key} was rejected")]
    PreconditionFailed { bucket: String, key: String },

    #[error("{operation} on s3://{bucket}/{key} failed")]
    Request {
        operation: &'static str,
        bucket: String,
        key: String,
        #[source]
        source: BoxError,
    },
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn precondition_failed(bucket: &str, key: &str) -> Self {
        Self::PreconditionFailed {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn request(
        operation: &'static str,
        bucket: &str,
        key: &str,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Request {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: source.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Durable key/value store holding the counter object.
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// True iff an object with exactly this key exists in `bucket`.
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// Read the object.  Fails with [`StoreError::NotFound`] when absent.
    async fn get(&self, bucket: &str, key: &str) -> Result<CounterObject, StoreError>;

    /// Write `body` to the object.  A rejected `condition` surfaces as
    /// [`StoreError::PreconditionFailed`].
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        condition: WriteCondition,
    ) -> Result<(), StoreError>;
}
