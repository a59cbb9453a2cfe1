//! In-process store with Redis semantics.
//!
//! All state sits behind a single mutex so every method is atomic with
//! respect to every other, the same guarantee a single Redis server gives.
//! Expiry uses `tokio::time::Instant`, which lets tests drive TTLs with
//! `tokio::time::pause`/`advance`.

use super::{KeyTtl, Store, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

impl Value {
    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::List(l) => l.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::ZSet(z) => z.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn purge_if_expired(&mut self, key: &str, now: Instant) {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_if_expired(key, Instant::now());
        self.entries.get_mut(key)
    }

    /// Drop a collection once its last element is gone, as Redis does.
    fn gc(&mut self, key: &str) {
        if self
            .entries
            .get(key)
            .is_some_and(|e| e.value.is_empty_collection())
        {
            self.entries.remove(key);
        }
    }
}

macro_rules! typed {
    ($fn_name:ident, $variant:ident, $ty:ty, $name:literal) => {
        fn $fn_name<'a>(
            space: &'a mut Keyspace,
            key: &str,
            create: bool,
        ) -> StoreResult<Option<&'a mut $ty>> {
            if space.live(key).is_none() {
                if !create {
                    return Ok(None);
                }
                space.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::$variant(Default::default()),
                        expires_at: None,
                    },
                );
            }
            match space.entries.get_mut(key).map(|e| &mut e.value) {
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(_) => Err(StoreError::WrongType {
                    key: key.to_string(),
                    expected: $name,
                }),
                None => Ok(None),
            }
        }
    };
}

typed!(list_mut, List, VecDeque<String>, "list");
typed!(set_mut, Set, HashSet<String>, "set");
typed!(zset_mut, ZSet, HashMap<String, f64>, "zset");

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

/// Resolve a Redis-style inclusive `[start, stop]` range against `len`.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}

/// `INCRBY` on a string counter; returns the new value and its expiry.
fn increment(space: &mut Keyspace, key: &str, by: i64) -> StoreResult<(i64, Option<Instant>)> {
    space.purge_if_expired(key, Instant::now());
    let entry = space.entries.entry(key.to_string()).or_insert_with(|| Entry {
        value: Value::Str("0".to_string()),
        expires_at: None,
    });
    let Value::Str(raw) = &mut entry.value else {
        return Err(wrong_type(key, "integer"));
    };
    let next = raw
        .parse::<i64>()
        .map_err(|_| wrong_type(key, "integer"))?
        .saturating_add(by);
    *raw = next.to_string();
    Ok((next, entry.expires_at))
}

fn remaining_secs(expires_at: Instant, now: Instant) -> u64 {
    let remaining = expires_at.saturating_duration_since(now);
    // Redis rounds TTL to the nearest second.
    (remaining.as_millis().saturating_add(500) / 1000)
        .try_into()
        .unwrap_or(u64::MAX)
}

/// In-memory [`Store`] for development and tests.
///
/// Cloning shares the same underlying data, like two connections to one
/// server.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Keyspace>>,
    pushed: Arc<Notify>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.expires_at.is_none_or(|at| at > now))
            .count()
    }

    fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        let mut space = self.inner.lock();
        let popped = list_mut(&mut space, key, false)?.and_then(VecDeque::pop_front);
        space.gc(key);
        Ok(popped)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut space = self.inner.lock();
        match space.live(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key, "string")),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.inner.lock().entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut space = self.inner.lock();
        if space.live(key).is_some() {
            return Ok(false);
        }
        space.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        let mut space = self.inner.lock();
        let existed = space.live(key).is_some();
        space.entries.remove(key);
        Ok(u64::from(existed))
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut space = self.inner.lock();
        let matches = matches!(
            space.live(key).map(|e| &e.value),
            Some(Value::Str(current)) if current == expected
        );
        if matches {
            space.entries.remove(key);
        }
        Ok(matches)
    }

    async fn incr(&self, key: &str, by: i64) -> StoreResult<i64> {
        let mut space = self.inner.lock();
        increment(&mut space, key, by).map(|(count, _)| count)
    }

    async fn incr_with_ttl(&self, key: &str) -> StoreResult<(i64, KeyTtl)> {
        let mut space = self.inner.lock();
        let (count, expires_at) = increment(&mut space, key, 1)?;
        let ttl = expires_at.map_or(KeyTtl::Persistent, |at| {
            KeyTtl::Expires(remaining_secs(at, Instant::now()))
        });
        Ok((count, ttl))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut space = self.inner.lock();
        Ok(space.live(key).map_or(false, |entry| {
            entry.expires_at = Some(Instant::now() + ttl);
            true
        }))
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut space = self.inner.lock();
        Ok(match space.live(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(remaining_secs(*at, Instant::now())),
        })
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        let len = {
            let mut space = self.inner.lock();
            let list = list_mut(&mut space, key, true)?
                .ok_or_else(|| wrong_type(key, "list"))?;
            list.push_back(value.to_string());
            list.len() as u64
        };
        self.pushed.notify_waiters();
        Ok(len)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        if timeout.is_zero() {
            return self.lpop(key);
        }

        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the wait is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.lpop(key)? {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        let mut space = self.inner.lock();
        Ok(list_mut(&mut space, key, false)?.map_or(0, |l| l.len() as u64))
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut space = self.inner.lock();
        let Some(list) = list_mut(&mut space, key, false)? else {
            return Ok(Vec::new());
        };
        Ok(resolve_range(list.len(), start, stop).map_or_else(Vec::new, |(from, to)| {
            list.range(from..=to).cloned().collect()
        }))
    }

    async fn lindex(&self, key: &str, index: i64) -> StoreResult<Option<String>> {
        let mut space = self.inner.lock();
        let Some(list) = list_mut(&mut space, key, false)? else {
            return Ok(None);
        };
        let len = i64::try_from(list.len()).unwrap_or(i64::MAX);
        let index = if index < 0 { len + index } else { index };
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| list.get(i))
            .cloned())
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> StoreResult<u64> {
        let mut space = self.inner.lock();
        let removed = {
            let Some(list) = list_mut(&mut space, key, false)? else {
                return Ok(0);
            };
            let limit = if count == 0 {
                usize::MAX
            } else {
                usize::try_from(count.unsigned_abs()).unwrap_or(usize::MAX)
            };
            let mut removed = 0usize;
            if count >= 0 {
                let mut i = 0;
                while i < list.len() && removed < limit {
                    if list[i] == value {
                        list.remove(i);
                        removed += 1;
                    } else {
                        i += 1;
                    }
                }
            } else {
                let mut i = list.len();
                while i > 0 && removed < limit {
                    i -= 1;
                    if list[i] == value {
                        list.remove(i);
                        removed += 1;
                    }
                }
            }
            removed as u64
        };
        space.gc(key);
        Ok(removed)
    }

    async fn take_list(&self, key: &str) -> StoreResult<u64> {
        let mut space = self.inner.lock();
        let len = list_mut(&mut space, key, false)?.map_or(0, |l| l.len() as u64);
        space.entries.remove(key);
        Ok(len)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut space = self.inner.lock();
        let set = set_mut(&mut space, key, true)?.ok_or_else(|| wrong_type(key, "set"))?;
        Ok(set.insert(member.to_string()))
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        let mut space = self.inner.lock();
        Ok(set_mut(&mut space, key, false)?.map_or(0, |s| s.len() as u64))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut space = self.inner.lock();
        let zset = zset_mut(&mut space, key, true)?.ok_or_else(|| wrong_type(key, "zset"))?;
        zset.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut space = self.inner.lock();
        let removed = zset_mut(&mut space, key, false)?
            .is_some_and(|z| z.remove(member).is_some());
        space.gc(key);
        Ok(removed)
    }

    async fn rpush_zrem(
        &self,
        list: &str,
        value: &str,
        zset: &str,
        member: &str,
    ) -> StoreResult<bool> {
        let removed = {
            let mut space = self.inner.lock();
            // Type-check both keys before writing either.
            zset_mut(&mut space, zset, false)?;
            list_mut(&mut space, list, true)?
                .ok_or_else(|| wrong_type(list, "list"))?
                .push_back(value.to_string());
            let removed = zset_mut(&mut space, zset, false)?
                .is_some_and(|z| z.remove(member).is_some());
            space.gc(zset);
            removed
        };
        self.pushed.notify_waiters();
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut space = self.inner.lock();
        Ok(zset_mut(&mut space, key, false)?.map_or(0, |z| z.len() as u64))
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        let mut space = self.inner.lock();
        let zset = zset_mut(&mut space, key, true)?.ok_or_else(|| wrong_type(key, "zset"))?;
        let score = zset.entry(member.to_string()).or_insert(0.0);
        *score += delta;
        Ok(*score)
    }

    async fn zrevrange_withscores(&self, key: &str, n: usize) -> StoreResult<Vec<(String, f64)>> {
        let mut space = self.inner.lock();
        let Some(zset) = zset_mut(&mut space, key, false)? else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        // Descending score, ties broken by descending member like ZREVRANGE.
        rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        rows.truncate(n);
        Ok(rows)
    }

    async fn zrangebyscore(&self, key: &str, max: f64, n: usize) -> StoreResult<Vec<String>> {
        let mut space = self.inner.lock();
        let Some(zset) = zset_mut(&mut space, key, false)? else {
            return Ok(Vec::new());
        };
        let mut rows: Vec<(&String, f64)> = zset
            .iter()
            .filter(|(_, s)| **s <= max)
            .map(|(m, s)| (m, *s))
            .collect();
        rows.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(rows.into_iter().take(n).map(|(m, _)| m.clone()).collect())
    }
}
