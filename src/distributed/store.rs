//! The shared store seen by distributed buckets.

use super::script::BucketScript;
use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::Script;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Store operations a [`RedisBucket`](super::RedisBucket) relies on.
///
/// [`eval`](Self::eval) must run the script atomically with respect to every
/// other script on the same key; bucket correctness across processes depends
/// on nothing else.
#[async_trait]
pub trait BucketStore: Send + Sync + fmt::Debug {
    /// Liveness check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Runs `script` against `key`.
    ///
    /// Returns `Ok(None)` when the key holds no bucket.
    async fn eval(&self, script: BucketScript, key: &str, args: &[i64]) -> Result<Option<i64>, StoreError>;

    /// Reads integer hash fields of `key`, `None` for each missing field.
    async fn read_fields(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<i64>>, StoreError>;
}

/// [`BucketStore`] over a Redis connection.
///
/// Scripts run through `EVALSHA`, falling back to loading the source on the
/// first call against a fresh server. Cloning is cheap and shares the
/// multiplexed connection. Any async connection works; production code uses
/// the [`ConnectionManager`] built by [`RedisStore::open`].
#[derive(Clone)]
pub struct RedisStore<C: ConnectionLike + Clone + Send + Sync = ConnectionManager> {
    connection: C,
    scripts: Arc<HashMap<BucketScript, Script>>,
}

impl RedisStore {
    /// Connects to the server at `url`.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_tokio_connection_manager().await?;
        Ok(Self::new_with_connection(connection))
    }
}

impl<C: ConnectionLike + Clone + Send + Sync> RedisStore<C> {
    pub fn new_with_connection(connection: C) -> Self {
        let scripts = BucketScript::ALL
            .into_iter()
            .map(|script| (script, Script::new(&script.source())))
            .collect();
        RedisStore {
            connection,
            scripts: Arc::new(scripts),
        }
    }
}

impl<C: ConnectionLike + Clone + Send + Sync> fmt::Debug for RedisStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl<C: ConnectionLike + Clone + Send + Sync> BucketStore for RedisStore<C> {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        redis::cmd("PING").query_async::<_, String>(&mut connection).await?;
        Ok(())
    }

    async fn eval(&self, script: BucketScript, key: &str, args: &[i64]) -> Result<Option<i64>, StoreError> {
        let mut invocation = self.scripts[&script].key(key);
        for arg in args {
            invocation.arg(*arg);
        }
        let mut connection = self.connection.clone();
        Ok(invocation.invoke_async(&mut connection).await?)
    }

    async fn read_fields(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<i64>>, StoreError> {
        let mut connection = self.connection.clone();
        Ok(redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut connection)
            .await?)
    }
}
