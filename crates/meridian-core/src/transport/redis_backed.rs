//! Redis-stream-backed transport, for a coordinator sharing the transport
//! with out-of-process persona workers.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{StreamEntry, Transport, transport_err};
use crate::error::Result;

/// `Transport` implementation over Redis streams (`XADD`/`XREADGROUP`/
/// `XACK`/`XRANGE`/`XDEL`/`XLEN`/`XGROUP CREATE`).
pub struct RedisTransport {
    conn: ConnectionManager,
}

impl RedisTransport {
    /// Connect to `redis_url` using a `ConnectionManager`, which
    /// transparently reconnects on transient connection loss.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| transport_err("failed to build redis client", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| transport_err("failed to connect to redis", e))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn append(&self, stream: &str, fields: HashMap<String, String>) -> Result<String> {
        let mut conn = self.conn.clone();
        let items: Vec<(String, String)> = fields.into_iter().collect();
        let id: String = conn
            .xadd(stream, "*", &items)
            .await
            .map_err(|e| transport_err(format!("xadd {stream}"), e))?;
        Ok(id)
    }

    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: &str,
        create_stream: bool,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(stream).arg(group).arg(start);
        if create_stream {
            cmd.arg("MKSTREAM");
        }
        let result: redis::RedisResult<()> = cmd.query_async(&mut conn).await;
        match result {
            Ok(()) => Ok(()),
            // BUSYGROUP: the group already exists. Swallowed per contract.
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(transport_err(format!("xgroup create {stream}/{group}"), e)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let opts = redis::streams::StreamReadOptions::default()
            .group(group, consumer)
            .count(count.max(1))
            .block(block_ms as usize);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .map_err(|e| transport_err(format!("xreadgroup {stream}/{group}"), e))?;

        let mut out = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                let fields: HashMap<String, String> = id
                    .map
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        redis::Value::BulkString(b) => {
                            Some((k, String::from_utf8_lossy(&b).into_owned()))
                        }
                        redis::Value::SimpleString(s) => Some((k, s)),
                        _ => None,
                    })
                    .collect();
                out.push(StreamEntry { id: id.id, fields });
            }
        }
        Ok(out)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xack(stream, group, &[entry_id])
            .await
            .map_err(|e| transport_err(format!("xack {stream}/{group}/{entry_id}"), e))?;
        Ok(())
    }

    async fn range(
        &self,
        stream: &str,
        from: &str,
        to: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrange_count(stream, from, to, count.max(1) as isize)
            .await
            .map_err(|e| transport_err(format!("xrange {stream}"), e))?;

        let entries = reply
            .ids
            .into_iter()
            .map(|id| {
                let fields = id
                    .map
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        redis::Value::BulkString(b) => {
                            Some((k, String::from_utf8_lossy(&b).into_owned()))
                        }
                        redis::Value::SimpleString(s) => Some((k, s)),
                        _ => None,
                    })
                    .collect();
                StreamEntry { id: id.id, fields }
            })
            .collect();
        Ok(entries)
    }

    async fn del(&self, stream: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .xdel(stream, ids)
            .await
            .map_err(|e| transport_err(format!("xdel {stream}"), e))?;
        Ok(())
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn
            .xlen(stream)
            .await
            .map_err(|e| transport_err(format!("xlen {stream}"), e))?;
        Ok(len)
    }
}
