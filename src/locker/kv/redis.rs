use crate::locker::kv::KeyValueStore;
use crate::locker::Error;
use async_trait::async_trait;
use redis::Client;
use std::time::Duration;
use tracing::info;

const COMPARE_AND_DELETE_SCRIPT: &str = r"
    if redis.call('get', KEYS[1]) == ARGV[1] then
        return redis.call('del', KEYS[1])
    else
        return 0
    end
";

#[derive(Debug, Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, Error> {
        let client = Client::open(redis_url)?;
        Ok(RedisStore { client })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, Error> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn provision(&self) -> Result<(), Error> {
        info!("Using Redis lock store");
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, Error> {
        let mut conn = self.get_connection().await?;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool, Error> {
        let mut conn = self.get_connection().await?;
        let deleted: i32 = redis::Script::new(COMPARE_AND_DELETE_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }
}
