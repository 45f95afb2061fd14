//! Key/value clients behind the remote cache store.

use blobgate_error::{CacheError, CacheErrorKind, CacheResult};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// The handful of key/value commands the remote cache needs.
///
/// Sorted-set members are ordered by ascending score, ties broken by member.
#[async_trait::async_trait]
pub trait KvClient: Send + Sync + std::fmt::Debug {
    /// Read a value.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()>;
    /// Write a value and return the one it replaced, as a single command.
    async fn set_get(&self, key: &str, value: Vec<u8>) -> CacheResult<Option<Vec<u8>>>;
    /// Delete a key and return its value, as a single command.
    async fn get_del(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;
    /// Delete keys; absent keys are ignored.
    async fn del(&self, keys: &[String]) -> CacheResult<()>;
    /// Add `delta` to an integer counter, returning the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64>;
    /// Insert or re-score a sorted-set member.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> CacheResult<()>;
    /// Remove a sorted-set member.
    async fn zrem(&self, key: &str, member: &str) -> CacheResult<()>;
    /// Members ranked `start..=stop`; negative indices count from the end.
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>>;
}

fn remote_error(err: redis::RedisError) -> CacheError {
    if err.is_timeout() {
        CacheError::new(CacheErrorKind::Timeout(err.to_string()))
    } else {
        CacheError::new(CacheErrorKind::Remote(err.to_string()))
    }
}

/// [`KvClient`] over a Redis multiplexed connection.
#[derive(Clone)]
pub struct RedisKv {
    connection: redis::aio::MultiplexedConnection,
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}

impl RedisKv {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379`.
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the URL is invalid or the server is unreachable.
    #[tracing::instrument]
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(remote_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(remote_error)?;
        tracing::info!("Connected to remote cache");
        Ok(Self { connection })
    }
}

#[async_trait::async_trait]
impl KvClient for RedisKv {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(())
    }

    async fn set_get(&self, key: &str, value: Vec<u8>) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let previous: Option<Vec<u8>> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("GET")
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(previous)
    }

    async fn get_del(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(value)
    }

    async fn del(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(keys.to_vec())
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.connection.clone();
        let value: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(value)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let _: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(remote_error)?;
        Ok(members)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Vec<u8>>,
    sorted: HashMap<String, HashMap<String, i64>>,
}

/// Process-local [`KvClient`] with Redis semantics for the commands above.
///
/// Useful for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<MemoryState>,
}

impl MemoryKv {
    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

/// Resolve Redis-style inclusive, possibly negative, range bounds.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    (start <= stop && start < len && stop >= 0).then_some((start as usize, stop as usize))
}

#[async_trait::async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.with_state(|s| s.values.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        self.with_state(|s| s.values.insert(key.to_string(), value));
        Ok(())
    }

    async fn set_get(&self, key: &str, value: Vec<u8>) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.with_state(|s| s.values.insert(key.to_string(), value)))
    }

    async fn get_del(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.with_state(|s| s.values.remove(key)))
    }

    async fn del(&self, keys: &[String]) -> CacheResult<()> {
        self.with_state(|s| {
            for key in keys {
                s.values.remove(key);
                s.sorted.remove(key);
            }
        });
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> CacheResult<i64> {
        self.with_state(|s| {
            let current = match s.values.get(key) {
                None => 0,
                Some(raw) => std::str::from_utf8(raw)
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok())
                    .ok_or_else(|| {
                        CacheError::new(CacheErrorKind::Remote(format!(
                            "value at {} is not an integer",
                            key
                        )))
                    })?,
            };
            let next = current + delta;
            s.values.insert(key.to_string(), next.to_string().into_bytes());
            Ok(next)
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> CacheResult<()> {
        self.with_state(|s| {
            s.sorted
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string(), score)
        });
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> CacheResult<()> {
        self.with_state(|s| {
            if let Some(set) = s.sorted.get_mut(key) {
                set.remove(member);
            }
        });
        Ok(())
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> CacheResult<Vec<String>> {
        Ok(self.with_state(|s| {
            let Some(set) = s.sorted.get(key) else {
                return Vec::new();
            };
            let mut ranked: Vec<(&String, &i64)> = set.iter().collect();
            ranked.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
            match resolve_range(ranked.len(), start, stop) {
                Some((from, to)) => ranked[from..=to]
                    .iter()
                    .map(|(member, _)| member.to_string())
                    .collect(),
                None => Vec::new(),
            }
        }))
    }
}
