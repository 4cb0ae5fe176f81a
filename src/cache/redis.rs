//! Redis-backed [`CacheStore`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use super::store::{CacheStore, StoreError};

/// Connection settings for the Redis store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

impl RedisSettings {
    /// Renders the settings as a `redis://` connection URL. The password is
    /// percent-encoded.
    pub fn url(&self) -> Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            // Only fails for URLs without a host, which `redis://host` always has.
            let _ = url.set_password(Some(password));
        }
        Ok(url)
    }
}

/// Redis store over a multiplexed, auto-reconnecting connection.
///
/// Cloning is cheap; clones share the underlying connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Opens a connection and verifies it with `PING`.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, StoreError> {
        let url = settings
            .url()
            .map_err(|e| StoreError::Unavailable(format!("invalid redis address: {e}")))?;
        let client = redis::Client::open(url.as_str())?;
        let conn = client.get_connection_manager().await?;
        let store = Self { conn };
        store.ping().await?;
        info!(host = %settings.host, port = settings.port, db = settings.db, "connected to redis");
        Ok(store)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value.as_ref(), ttl_secs(ttl)).await?;
        Ok(())
    }

    /// `SET key value NX EX ttl`: atomic, so concurrent writers cannot
    /// overwrite each other.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        tracing::debug!(reply = %pong, "redis ping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url() {
        let url = RedisSettings::default().url().unwrap();
        assert_eq!(url.as_str(), "redis://127.0.0.1:6379/0");
    }

    #[test]
    fn password_and_db_are_encoded() {
        let settings = RedisSettings {
            host: "cache.internal".into(),
            port: 6380,
            password: Some("p@ss/word".into()),
            db: 3,
        };
        let url = settings.url().unwrap();
        assert_eq!(url.host_str(), Some("cache.internal"));
        assert_eq!(url.port(), Some(6380));
        assert_eq!(url.path(), "/3");
        assert_eq!(url.password(), Some("p%40ss%2Fword"));
    }

    #[test]
    fn empty_password_is_omitted() {
        let settings = RedisSettings {
            password: Some(String::new()),
            ..RedisSettings::default()
        };
        assert_eq!(settings.url().unwrap().password(), None);
    }

    #[test]
    fn ttl_is_at_least_one_second() {
        assert_eq!(ttl_secs(Duration::ZERO), 1);
        assert_eq!(ttl_secs(Duration::from_secs(86_400)), 86_400);
    }

    #[tokio::test]
    #[ignore = "needs a Redis server on 127.0.0.1:6379"]
    async fn live_round_trip() {
        let store = RedisStore::connect(&RedisSettings::default()).await.unwrap();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let key = format!("hcproxy-test-{}-{nanos}", std::process::id());
        let ttl = Duration::from_secs(5);

        assert_eq!(store.get(&key).await.unwrap(), None);
        assert!(store.set_if_absent(&key, Bytes::from_static(b"first"), ttl).await.unwrap());
        assert!(!store.set_if_absent(&key, Bytes::from_static(b"second"), ttl).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap(), Some(Bytes::from_static(b"first")));

        store.set(&key, Bytes::from_static(b"third"), ttl).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(Bytes::from_static(b"third")));
    }
}
