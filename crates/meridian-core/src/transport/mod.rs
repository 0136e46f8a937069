//! Abstract append-only stream transport.
//!
//! Two concrete backings are provided: [`memory::MemoryTransport`] (process-
//! local, for single-process coordinators and tests) and
//! [`redis_backed::RedisTransport`] (Redis streams, for a coordinator
//! sharing a transport with out-of-process persona workers).

pub mod memory;
pub mod redis_backed;

use std::collections::HashMap;

use async_trait::async_trait;

pub use memory::MemoryTransport;
pub use redis_backed::RedisTransport;

use crate::error::{MeridianError, Result};

/// A single entry read back from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Monotonically increasing within a stream.
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Abstract append-only stream with consumer-group semantics, modeled on
/// Redis streams (`XADD`/`XREADGROUP`/`XACK`/`XRANGE`).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Append an entry, returning its monotonic entry id.
    async fn append(&self, stream: &str, fields: HashMap<String, String>) -> Result<String>;

    /// Create a consumer group on `stream`, starting at `start` (`"$"` for
    /// new entries only, `"0"` for the beginning). Idempotent: an
    /// already-existing group (the Redis `BUSYGROUP` condition) is treated
    /// as success, not an error. `create_stream` mirrors Redis's `MKSTREAM`
    /// flag: create the stream itself if it does not yet exist.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<()>;

    /// Read up to `count` new entries (`id == ">"`) for `consumer` in
    /// `group`, blocking up to `block_ms` if none are immediately
    /// available. Returns an empty vec on timeout rather than erroring.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>>;

    /// Acknowledge delivery of `entry_id` in `group`, removing it from the
    /// group's pending-entries list.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()>;

    /// Return up to `count` entries between `from` and `to` (inclusive,
    /// `"-"`/`"+"` meaning the stream's bounds), in id order. Used by abort
    /// cleanup to find every entry belonging to an aborted workflow.
    async fn range(
        &self,
        stream: &str,
        from: &str,
        to: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Delete the given entry ids from `stream`.
    async fn del(&self, stream: &str, ids: &[String]) -> Result<()>;

    /// Return the number of entries currently in `stream`.
    async fn len(&self, stream: &str) -> Result<u64>;
}

/// Helper: build the per-persona request-stream consumer group name.
pub fn persona_group(prefix: &str, persona: &str) -> String {
    format!("{prefix}:{persona}")
}

/// Helper: the coordinator's event-stream consumer group name.
pub fn coordinator_group(prefix: &str) -> String {
    format!("{prefix}:coordinator")
}

/// Map a transport backend error string into the taxonomy's `Transport`
/// variant. Kept as a free function so both backings share one mapping.
pub(crate) fn transport_err(context: impl Into<String>, cause: impl std::fmt::Display) -> MeridianError {
    MeridianError::Transport(format!("{}: {cause}", context.into()))
}
