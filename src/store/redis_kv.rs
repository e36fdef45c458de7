//! Redis-backed implementation of the coordination store contract.

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};

use super::{KeyValueStore, KvError, KvResult};

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            KvError::Unavailable(err.to_string())
        } else {
            KvError::Protocol(err.to_string())
        }
    }
}

#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
    client: redis::Client,
}

impl RedisKv {
    /// Open the client and establish the managed multiplexed connection.
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url).map_err(KvError::from)?;
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(2)
            .set_connection_timeout(Duration::from_millis(500));
        let manager = client
            .get_connection_manager_with_config(config)
            .await
            .map_err(KvError::from)?;
        Ok(Self { manager, client })
    }

    /// The underlying client, used by the pub/sub subscriber task which needs
    /// its own dedicated connection.
    pub fn client(&self) -> redis::Client {
        self.client.clone()
    }
}

impl KeyValueStore for RedisKv {
    fn get_bytes(&self, key: &str) -> BoxFuture<'static, KvResult<Option<Vec<u8>>>> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        async move { Ok(conn.get::<_, Option<Vec<u8>>>(key).await?) }.boxed()
    }

    fn set_bytes(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> BoxFuture<'static, KvResult<()>> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        async move {
            match ttl {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?,
                None => conn.set::<_, _, ()>(key, value).await?,
            }
            Ok(())
        }
        .boxed()
    }

    fn add(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'static, KvResult<bool>> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        let value = value.to_string();
        async move {
            let reply: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        }
        .boxed()
    }

    fn incr(&self, key: &str, ttl_on_create: Duration) -> BoxFuture<'static, KvResult<i64>> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        async move {
            let value: i64 = conn.incr(&key, 1).await?;
            if value == 1 {
                conn.expire::<_, ()>(&key, ttl_on_create.as_secs() as i64)
                    .await?;
            }
            Ok(value)
        }
        .boxed()
    }

    fn expire(&self, key: &str, ttl: Duration) -> BoxFuture<'static, KvResult<bool>> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        async move {
            let refreshed: bool = conn.expire(&key, ttl.as_secs() as i64).await?;
            Ok(refreshed)
        }
        .boxed()
    }

    fn set_int(&self, key: &str, value: i64, ttl: Duration) -> BoxFuture<'static, KvResult<()>> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        async move {
            conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
            Ok(())
        }
        .boxed()
    }

    fn get_int(&self, key: &str) -> BoxFuture<'static, KvResult<Option<i64>>> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        async move { Ok(conn.get::<_, Option<i64>>(key).await?) }.boxed()
    }

    fn delete(&self, key: &str) -> BoxFuture<'static, KvResult<()>> {
        let mut conn = self.manager.clone();
        let key = key.to_string();
        async move {
            conn.del::<_, ()>(key).await?;
            Ok(())
        }
        .boxed()
    }

    fn scan_prefix(&self, prefix: &str) -> BoxFuture<'static, KvResult<Vec<String>>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{prefix}*");
        async move {
            let mut keys = Vec::new();
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            Ok(keys)
        }
        .boxed()
    }

    fn publish(&self, channel: &str, payload: String) -> BoxFuture<'static, KvResult<()>> {
        let mut conn = self.manager.clone();
        let channel = channel.to_string();
        async move {
            conn.publish::<_, _, ()>(channel, payload).await?;
            Ok(())
        }
        .boxed()
    }
}
