//! Offset-based pagination over "not yet processed" records.

use async_trait::async_trait;

use crate::error::Result;

/// Anything a batch job can process. The id is used for logging and for the
/// store write that follows a successful external call.
pub trait WorkItem: Send + Sync {
    fn id(&self) -> &str;
}

/// Position of a run within the unprocessed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub offset: u64,
    pub limit: u32,
}

impl Cursor {
    pub fn new(limit: u32) -> Self {
        Self {
            offset: 0,
            limit: limit.max(1),
        }
    }

    /// Step over `len` records that are still in the set. Never rewinds.
    pub fn advance(&mut self, len: usize) {
        self.offset += len as u64;
    }

    /// A batch shorter than the limit means the set is exhausted.
    pub fn is_last_batch(&self, len: usize) -> bool {
        len == 0 || (len as u64) < u64::from(self.limit)
    }
}

/// Reads unprocessed records from a backing store in a stable order.
///
/// Implementations must order results deterministically (creation time
/// ascending). A record the job has written may drop out of the set, so the
/// same offset can return different records on the next fetch. Errors are
/// fatal for the run.
#[async_trait]
pub trait CursorFetcher: Send + Sync {
    type Item: WorkItem;

    async fn count(&self) -> Result<u64>;

    async fn fetch(&self, limit: u32, offset: u64) -> Result<Vec<Self::Item>>;
}
