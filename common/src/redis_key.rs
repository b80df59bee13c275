use crate::server_config::RedisConfig;
use deadpool_redis::redis::{AsyncCommands, RedisError};
use deadpool_redis::{Config as DeadConfig, Pool, Runtime};

/// Shared Redis access. The only cached value today is the identity
/// provider's JWKS document; tokens themselves are never cached — every
/// request re-verifies its credential.
#[derive(Clone)]
pub struct RedisHelper {
    pool: Pool,
}

const JWKS_DOCUMENT_KEY: &str = "records:identity:jwks";

impl RedisHelper {
    pub fn new(config: &RedisConfig) -> Self {
        let dead_cfg = DeadConfig::from_url(config.url.clone());
        let pool = dead_cfg
            .create_pool(Some(Runtime::Tokio1))
            .expect("Pool creation failed");
        RedisHelper { pool }
    }

    async fn get_connection(&self) -> Result<deadpool_redis::Connection, RedisError> {
        match self.pool.get().await {
            Ok(conn) => Ok(conn),
            Err(e) => Err(RedisError::from((
                deadpool_redis::redis::ErrorKind::IoError,
                "Failed to get Redis connection",
                e.to_string(),
            ))),
        }
    }

    pub async fn set_jwks_document(
        &self,
        txt: String,
        expire_seconds: u64,
    ) -> Result<(), RedisError> {
        let mut conn = self.get_connection().await?;
        conn.set_ex::<&str, String, ()>(JWKS_DOCUMENT_KEY, txt, expire_seconds)
            .await?;
        Ok(())
    }

    pub async fn get_jwks_document(&self) -> Result<String, RedisError> {
        let mut conn = self.get_connection().await?;
        let txt: String = conn.get(JWKS_DOCUMENT_KEY).await?;
        Ok(txt)
    }
}
