//! Redis-backed store shared by every service process

use crate::error::{ContestError, Result};
use crate::store::gateway::StoreGateway;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// Creates a hash with all fields only when the key is absent, then applies the TTL.
/// ARGV[1] is the TTL in ms (0 for none), followed by field/value pairs.
const CREATE_HASH_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 2))
local ttl = tonumber(ARGV[1])
if ttl > 0 then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return 1
"#;

/// Store implementation over a multiplexed Redis connection
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    create_hash: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(ContestError::from)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(ContestError::from)?;

        info!("Connected to shared store at {}", url);

        Ok(Self {
            connection,
            create_hash: Script::new(CREATE_HASH_SCRIPT),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl StoreGateway for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(ContestError::from)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(ContestError::from)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(fields)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(value)
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let _: i64 = cmd.query_async(&mut conn).await.map_err(ContestError::from)?;
        Ok(())
    }

    async fn hash_create(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut conn = self.conn();
        let mut invocation = self.create_hash.key(key);
        invocation.arg(ttl.map(ttl_millis).unwrap_or(0));
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let created: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(created == 1)
    }

    async fn hash_increment(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let mut conn = self.conn();
        let value: i64 = redis::cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(by)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(value)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        let added: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(added == 1)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(removed == 1)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        let is_member: bool = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(is_member)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let mut members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        members.sort();
        Ok(members)
    }

    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn();
        let len: usize = redis::cmd("RPUSH")
            .arg(key)
            .arg(values)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(len)
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = redis::cmd("LPOP")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(value)
    }

    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn();
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(())
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(removed == 1)
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(String, i64)>> {
        let mut conn = self.conn();
        let members: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(members
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(ContestError::from)?;
        Ok(())
    }
}
