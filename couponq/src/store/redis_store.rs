//! Redis-backed store over a `deadpool-redis` pool.
//!
//! Each call checks a connection out of the pool for the duration of one
//! command or one atomic pipeline. `BLPOP` holds its connection for the
//! whole poll timeout, so the pool should be sized above the worker count.

use super::{KeyTtl, Store, StoreResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use redis::{FromRedisValue, Script};
use std::time::Duration;
use tracing::debug;

/// Compare-and-delete used for owner-token lock release.
const DEL_IF_EQ_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Production store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    del_if_eq: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisStore")
            .field("max_size", &status.max_size)
            .field("size", &status.size)
            .field("available", &status.available)
            .finish()
    }
}

impl RedisStore {
    /// Build a pool for `redis_url` holding at most `pool_size` connections.
    ///
    /// No connection is opened until the first command runs; call
    /// [`Store::ping`] to fail fast on a bad URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed into a pool config.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use couponq::store::{RedisStore, Store};
    ///
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = RedisStore::connect("redis://localhost:6379", 16)?;
    /// store.ping().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn connect(redis_url: &str, pool_size: usize) -> StoreResult<Self> {
        let mut config = Config::from_url(redis_url);
        config.pool = Some(PoolConfig::new(pool_size.max(1)));
        let pool = config.create_pool(Some(Runtime::Tokio1))?;

        debug!(url = %redis_url, pool_size, "Created Redis pool");

        Ok(Self {
            pool,
            del_if_eq: Script::new(DEL_IF_EQ_SCRIPT),
        })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool) -> Self {
        Self {
            pool,
            del_if_eq: Script::new(DEL_IF_EQ_SCRIPT),
        }
    }

    /// Close the pool; in-flight commands finish, new checkouts fail.
    pub fn close(&self) {
        self.pool.close();
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> StoreResult<T> {
        let mut conn = self.pool.get().await?;
        Ok(cmd.query_async(&mut *conn).await?)
    }

    async fn query_pipe<T: FromRedisValue>(&self, pipe: &redis::Pipeline) -> StoreResult<T> {
        let mut conn = self.pool.get().await?;
        Ok(pipe.query_async(&mut *conn).await?)
    }
}

/// Redis rejects a zero `EX`, so round sub-second TTLs up to one second.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn stop_index(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX) - 1
}

#[async_trait]
impl Store for RedisStore {
    async fn ping(&self) -> StoreResult<()> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.query(redis::cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs(ttl)))
            .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let reply: Option<String> = self
            .query(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs(ttl)),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> StoreResult<u64> {
        self.query(redis::cmd("DEL").arg(key)).await
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = self
            .del_if_eq
            .key(key)
            .arg(expected)
            .invoke_async(&mut *conn)
            .await?;
        Ok(removed == 1)
    }

    async fn incr(&self, key: &str, by: i64) -> StoreResult<i64> {
        self.query(redis::cmd("INCRBY").arg(key).arg(by)).await
    }

    async fn incr_with_ttl(&self, key: &str) -> StoreResult<(i64, KeyTtl)> {
        let (count, ttl): (i64, i64) = self
            .query_pipe(
                redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("TTL")
                    .arg(key),
            )
            .await?;
        Ok((count, KeyTtl::from_reply(ttl)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.query(redis::cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)))
            .await
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let reply: i64 = self.query(redis::cmd("TTL").arg(key)).await?;
        Ok(KeyTtl::from_reply(reply))
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<u64> {
        self.query(redis::cmd("RPUSH").arg(key).arg(value)).await
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        if timeout.is_zero() {
            return self.query(redis::cmd("LPOP").arg(key)).await;
        }

        let popped: Option<(String, String)> = self
            .query(redis::cmd("BLPOP").arg(key).arg(timeout.as_secs_f64()))
            .await?;
        Ok(popped.map(|(_, value)| value))
    }

    async fn llen(&self, key: &str) -> StoreResult<u64> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn lindex(&self, key: &str, index: i64) -> StoreResult<Option<String>> {
        self.query(redis::cmd("LINDEX").arg(key).arg(index)).await
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> StoreResult<u64> {
        self.query(redis::cmd("LREM").arg(key).arg(count).arg(value))
            .await
    }

    async fn take_list(&self, key: &str) -> StoreResult<u64> {
        let (len, _deleted): (u64, u64) = self
            .query_pipe(
                redis::pipe()
                    .atomic()
                    .cmd("LLEN")
                    .arg(key)
                    .cmd("DEL")
                    .arg(key),
            )
            .await?;
        Ok(len)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let added: u64 = self.query(redis::cmd("SADD").arg(key).arg(member)).await?;
        Ok(added > 0)
    }

    async fn scard(&self, key: &str) -> StoreResult<u64> {
        self.query(redis::cmd("SCARD").arg(key)).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let _: u64 = self
            .query(redis::cmd("ZADD").arg(key).arg(score).arg(member))
            .await?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let removed: u64 = self.query(redis::cmd("ZREM").arg(key).arg(member)).await?;
        Ok(removed > 0)
    }

    async fn rpush_zrem(
        &self,
        list: &str,
        value: &str,
        zset: &str,
        member: &str,
    ) -> StoreResult<bool> {
        let (_len, removed): (u64, u64) = self
            .query_pipe(
                redis::pipe()
                    .atomic()
                    .cmd("RPUSH")
                    .arg(list)
                    .arg(value)
                    .cmd("ZREM")
                    .arg(zset)
                    .arg(member),
            )
            .await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.query(redis::cmd("ZCARD").arg(key)).await
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        self.query(redis::cmd("ZINCRBY").arg(key).arg(delta).arg(member))
            .await
    }

    async fn zrevrange_withscores(&self, key: &str, n: usize) -> StoreResult<Vec<(String, f64)>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.query(
            redis::cmd("ZREVRANGE")
                .arg(key)
                .arg(0)
                .arg(stop_index(n))
                .arg("WITHSCORES"),
        )
        .await
    }

    async fn zrangebyscore(&self, key: &str, max: f64, n: usize) -> StoreResult<Vec<String>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.query(
            redis::cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg("-inf")
                .arg(max)
                .arg("LIMIT")
                .arg(0)
                .arg(n),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_secs_rounds_up_to_one() {
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
    }

    #[test]
    fn test_stop_index() {
        assert_eq!(stop_index(1), 0);
        assert_eq!(stop_index(10), 9);
    }

    #[tokio::test]
    async fn test_connect_builds_lazy_pool() {
        // Pool creation does not dial the server.
        let store = RedisStore::connect("redis://127.0.0.1:6399", 4).expect("pool");
        let debug = format!("{store:?}");
        assert!(debug.contains("RedisStore"));
        store.close();
    }

    #[test]
    fn test_connect_rejects_bad_url() {
        assert!(RedisStore::connect("not a url", 4).is_err());
    }
}
