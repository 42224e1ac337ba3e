//! Storage abstraction: transactional persistence of the resource tree,
//! batch-notification queues, and statistics snapshots.
//!
//! The dispatcher runs every mutation through a [`StorageTx`]: writes are
//! staged, then applied atomically on commit. Reads outside a transaction are
//! snapshot reads; backends must never expose a half-applied transaction.

pub mod error;
pub mod memory;
pub mod sql;

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use sql::SqliteStorage;

use async_trait::async_trait;
use serde_json::Value;

use ocse_model::Resource;

/// A staged, atomically-committed set of tree mutations.
///
/// Dropping a transaction without committing discards it. Uniqueness
/// invariants (`ri` CSE-wide, `srn` — and therefore `rn` per parent) are
/// enforced at commit.
#[async_trait]
pub trait StorageTx: Send {
    /// Stage an insert. The resource must carry `ri`, `pi`, and its `srn`.
    fn insert(&mut self, resource: Resource);
    /// Stage a full replacement of an existing resource.
    fn update(&mut self, resource: Resource);
    /// Stage a delete by resource identifier.
    fn delete(&mut self, ri: &str);
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

/// Persistent store for resources and engine bookkeeping.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageTx>, StorageError>;

    // -- snapshot reads --

    async fn resource_by_ri(&self, ri: &str) -> Result<Option<Resource>, StorageError>;
    async fn resource_by_srn(&self, srn: &str) -> Result<Option<Resource>, StorageError>;
    /// Direct children, ordered by creation time.
    async fn children_of(&self, pi: &str) -> Result<Vec<Resource>, StorageError>;
    /// All descendants (excluding the resource itself), breadth-first.
    async fn descendants_of(&self, ri: &str) -> Result<Vec<Resource>, StorageError>;
    async fn resources_of_type(&self, ty: u32) -> Result<Vec<Resource>, StorageError>;
    /// Resources whose expiration time lies at or before `ts`.
    async fn expired_before(&self, ts: &str) -> Result<Vec<Resource>, StorageError>;
    async fn count_resources(&self) -> Result<u64, StorageError>;

    // -- batch notification queues --

    /// Append to a subscription's batch queue; returns the new queue length.
    async fn batch_append(&self, sub_ri: &str, sgn: Value) -> Result<usize, StorageError>;
    /// Drain a subscription's batch queue in insertion order.
    async fn batch_take(&self, sub_ri: &str) -> Result<Vec<Value>, StorageError>;
    async fn batch_len(&self, sub_ri: &str) -> Result<usize, StorageError>;
    /// Drop the `n` oldest entries of a queue (backpressure).
    async fn batch_drop_oldest(&self, sub_ri: &str, n: usize) -> Result<(), StorageError>;

    // -- statistics --

    async fn stats_write(&self, stats: Value) -> Result<(), StorageError>;
    async fn stats_read(&self) -> Result<Option<Value>, StorageError>;
}
