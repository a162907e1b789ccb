//! Redis-backed [`CounterStore`] for `windowgate` (companion crate).
//! Bring your own URL or client; every operation runs on a shared multiplexed connection.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use windowgate::CounterStore;

pub use redis::RedisError;

#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("conn", &"<redis::aio::MultiplexedConnection>").finish()
    }
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = redis::Client::open(url)?;
        Self::from_client(&client).await
    }

    pub async fn from_client(client: &redis::Client) -> Result<Self, RedisError> {
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::debug!(target: "windowgate::redis", "connected");
        Ok(Self { conn })
    }

    /// Wrap an existing connection.
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

/// Redis TTLs are whole seconds; anything shorter still lives one second.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    type Error = RedisError;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let mut conn = self.conn.clone();
        conn.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Self::Error> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl_secs(ttl)).await
    }

    async fn incr(&self, key: &str) -> Result<i64, Self::Error> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1_i64).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), Self::Error> {
        let mut conn = self.conn.clone();
        // EXPIRE replies 0 for a missing key; that is not an error here.
        let _: bool = conn.expire(key, ttl_secs(ttl) as i64).await?;
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        let mut conn = self.conn.clone();
        // TTL replies -2 for a missing key and -1 for a key without expiry.
        let secs: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_second_ttls_round_up_to_one() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_secs(Duration::from_millis(2500)), 2);
    }
}
