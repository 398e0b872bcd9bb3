//! Shared Redis cache store.
//!
//! # Responsibility
//! - Get, set with expiry and delete keys over a blocking connection.
//! - Delete key prefixes with `SCAN MATCH` + `DEL`, never `KEYS`.
//!
//! # Invariants
//! - Opening never connects; an unreachable server only fails individual
//!   calls.
//! - Every connect and command is bounded by a one second timeout.
//! - Prefixes are glob-escaped before matching.

use super::{CacheError, CacheResult, CacheStore};
use log::info;
use redis::{Client, Connection, RedisResult};
use std::sync::Mutex;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const IO_TIMEOUT: Duration = Duration::from_secs(1);
const SCAN_COUNT: u32 = 200;

/// Redis-backed cache over one lazily opened blocking connection.
///
/// A failed command drops the connection; the next call reconnects.
pub struct RedisCacheStore {
    client: Client,
    conn: Mutex<Option<Connection>>,
}

impl RedisCacheStore {
    /// Parses `url` without connecting.
    pub fn open(url: &str) -> CacheResult<Self> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
        })
    }

    fn connect(&self) -> RedisResult<Connection> {
        let conn = self.client.get_connection_with_timeout(CONNECT_TIMEOUT)?;
        conn.set_read_timeout(Some(IO_TIMEOUT))?;
        conn.set_write_timeout(Some(IO_TIMEOUT))?;
        info!("event=cache_connect module=cache store=redis status=ok");
        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> CacheResult<T> {
        let mut guard = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let result = op(&mut conn);
        if result.is_ok() {
            *guard = Some(conn);
        }
        Ok(result?)
    }
}

impl CacheStore for RedisCacheStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get(&self, key: &str) -> CacheResult<Option<String>> {
        self.with_connection(|conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let secs = ttl.as_secs().max(1);
        self.with_connection(|conn| {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query(conn)
        })
    }

    fn delete(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.with_connection(|conn| {
            let mut cmd = redis::cmd("DEL");
            for key in keys {
                cmd.arg(key);
            }
            cmd.query(conn)
        })
    }

    fn delete_prefix(&self, prefix: &str) -> CacheResult<()> {
        let pattern = format!("{}*", escape_glob(prefix));
        self.with_connection(|conn| {
            // SCAN instead of KEYS so a large keyspace never blocks the server.
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query(conn)?;
                if !keys.is_empty() {
                    let mut del = redis::cmd("DEL");
                    for key in &keys {
                        del.arg(key);
                    }
                    del.query::<()>(conn)?;
                }
                if next == 0 {
                    return Ok(());
                }
                cursor = next;
            }
        })
    }
}

fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
