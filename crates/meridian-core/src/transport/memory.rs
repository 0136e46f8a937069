//! Process-local, mutex-guarded in-memory transport.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{StreamEntry, Transport};
use crate::error::Result;

#[derive(Default)]
struct StreamState {
    /// Entries in append order, keyed by monotonic id.
    log: BTreeMap<u64, HashMap<String, String>>,
    next_id: u64,
    /// Per-group read cursor (last-delivered id) and pending (unacked) set.
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct GroupState {
    cursor: u64,
    pending: HashSet<u64>,
}

/// A fully in-process [`Transport`]. Honors `block_ms` by waiting on a
/// per-stream [`Notify`] rather than polling, so `read_group` returns as
/// soon as a new entry is appended or the timeout elapses, whichever is
/// first.
#[derive(Default)]
pub struct MemoryTransport {
    streams: Mutex<HashMap<String, Arc<StreamSlot>>>,
}

struct StreamSlot {
    state: Mutex<StreamState>,
    notify: Notify,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, stream: &str) -> Arc<StreamSlot> {
        let mut streams = self.streams.lock().await;
        streams
            .entry(stream.to_string())
            .or_insert_with(|| {
                Arc::new(StreamSlot {
                    state: Mutex::new(StreamState::default()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    fn id_string(id: u64) -> String {
        format!("{id}-0")
    }

    fn parse_id(id: &str) -> u64 {
        id.split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn append(&self, stream: &str, fields: HashMap<String, String>) -> Result<String> {
        let slot = self.slot(stream).await;
        let id = {
            let mut state = slot.state.lock().await;
            let id = state.next_id;
            state.next_id += 1;
            state.log.insert(id, fields);
            id
        };
        slot.notify.notify_waiters();
        Ok(Self::id_string(id))
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        _create_stream: bool,
    ) -> Result<()> {
        let slot = self.slot(stream).await;
        let mut state = slot.state.lock().await;
        // Idempotent: an existing group is left untouched (the BUSYGROUP
        // case), matching Redis semantics.
        state.groups.entry(group.to_string()).or_insert_with(|| {
            let cursor = if start == "0" { 0 } else { state.next_id };
            GroupState {
                cursor,
                pending: HashSet::new(),
            }
        });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>> {
        let slot = self.slot(stream).await;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(block_ms.max(1));

        loop {
            {
                let mut state = slot.state.lock().await;
                let cursor = state.groups.get(group).map(|g| g.cursor).unwrap_or(0);
                let ready: Vec<u64> = state
                    .log
                    .range((cursor + 1)..)
                    .take(count.max(1))
                    .map(|(id, _)| *id)
                    .collect();

                if !ready.is_empty() {
                    let mut out = Vec::with_capacity(ready.len());
                    let mut new_cursor = cursor;
                    for id in &ready {
                        let fields = state.log.get(id).cloned().unwrap_or_default();
                        out.push(StreamEntry {
                            id: Self::id_string(*id),
                            fields,
                        });
                        new_cursor = new_cursor.max(*id);
                    }
                    if let Some(g) = state.groups.get_mut(group) {
                        g.cursor = new_cursor;
                        g.pending.extend(ready.iter().copied());
                    }
                    return Ok(out);
                }
            }

            if block_ms == 0 || tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            let wait = tokio::time::timeout(Duration::from_millis(10), slot.notify.notified());
            let _ = wait.await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()> {
        let slot = self.slot(stream).await;
        let mut state = slot.state.lock().await;
        let id = Self::parse_id(entry_id);
        if let Some(g) = state.groups.get_mut(group) {
            g.pending.remove(&id);
        }
        Ok(())
    }

    async fn range(
        &self,
        stream: &str,
        from: &str,
        to: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let slot = self.slot(stream).await;
        let state = slot.state.lock().await;
        let lo = if from == "-" { 0 } else { Self::parse_id(from) };
        let hi = if to == "+" { u64::MAX } else { Self::parse_id(to) };

        let entries = state
            .log
            .range(lo..=hi)
            .take(count.max(1))
            .map(|(id, fields)| StreamEntry {
                id: Self::id_string(*id),
                fields: fields.clone(),
            })
            .collect();
        Ok(entries)
    }

    async fn del(&self, stream: &str, ids: &[String]) -> Result<()> {
        let slot = self.slot(stream).await;
        let mut state = slot.state.lock().await;
        for id in ids {
            state.log.remove(&Self::parse_id(id));
        }
        Ok(())
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let slot = self.slot(stream).await;
        let state = slot.state.lock().await;
        Ok(state.log.len() as u64)
    }
}
