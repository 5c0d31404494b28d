use std::time::Duration;

use rand::Rng;
use redis::aio::MultiplexedConnection;

/// Maximum attempts for one logical store operation.
const MAX_ATTEMPTS: u32 = 3;
/// Jitter bounds for retry sleeps between attempts.
const RETRY_BASE: Duration = Duration::from_millis(50);
const RETRY_CAP: Duration = Duration::from_millis(1000);

/// Client for the shared coordination store.
///
/// All frontier state lives behind this handle so that any number of
/// scheduler processes can share one frontier. Transient errors are retried
/// with decorrelated jitter; what escapes here is persistent.
pub struct CoordinationStore {
    conn: MultiplexedConnection,
}

impl CoordinationStore {
    /// Connect and verify the connection with a PING.
    pub async fn connect(store_url: &str) -> Result<Self, StoreError> {
        tracing::info!("Connecting to coordination store");

        let client =
            redis::Client::open(store_url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self { conn };
        store.health_check().await?;
        tracing::info!("Coordination store connection established");

        Ok(store)
    }

    /// Verify the connection is alive (PING).
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Command(e.to_string()))?;

        if pong != "PONG" {
            return Err(StoreError::Command(format!(
                "Unexpected PING response: {}",
                pong
            )));
        }
        Ok(())
    }

    /// Run a single command, retrying transient failures.
    pub async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, StoreError> {
        let mut sleep = RETRY_BASE;
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut conn = self.conn.clone();
            match cmd.query_async::<T>(&mut conn).await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < MAX_ATTEMPTS => {
                    last_error = e.to_string();
                    sleep = jitter(sleep);
                    tracing::warn!(
                        attempt = attempt,
                        sleep_ms = sleep.as_millis() as u64,
                        error = %last_error,
                        "Transient store error, retrying"
                    );
                    tokio::time::sleep(sleep).await;
                }
                Err(e) if is_transient(&e) => {
                    return Err(StoreError::Unavailable(e.to_string()));
                }
                Err(e) => return Err(StoreError::Command(e.to_string())),
            }
        }

        Err(StoreError::Unavailable(last_error))
    }

    /// Run a pipeline, retrying transient failures. The whole pipeline is
    /// re-issued on retry, so callers must keep pipelines idempotent.
    pub async fn query_pipeline<T: redis::FromRedisValue>(
        &self,
        pipe: &redis::Pipeline,
    ) -> Result<T, StoreError> {
        let mut sleep = RETRY_BASE;
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut conn = self.conn.clone();
            match pipe.query_async::<T>(&mut conn).await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && attempt < MAX_ATTEMPTS => {
                    last_error = e.to_string();
                    sleep = jitter(sleep);
                    tracing::warn!(
                        attempt = attempt,
                        sleep_ms = sleep.as_millis() as u64,
                        error = %last_error,
                        "Transient store error on pipeline, retrying"
                    );
                    tokio::time::sleep(sleep).await;
                }
                Err(e) if is_transient(&e) => {
                    return Err(StoreError::Unavailable(e.to_string()));
                }
                Err(e) => return Err(StoreError::Command(e.to_string())),
            }
        }

        Err(StoreError::Unavailable(last_error))
    }
}

/// Decorrelated jitter: uniform(base, 3 × previous), capped.
fn jitter(previous: Duration) -> Duration {
    let base = RETRY_BASE.as_secs_f64();
    let upper = (previous.as_secs_f64() * 3.0).max(base);
    let next = rand::thread_rng().gen_range(base..=upper);
    Duration::from_secs_f64(next.min(RETRY_CAP.as_secs_f64()))
}

fn is_transient(error: &redis::RedisError) -> bool {
    error.is_io_error()
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_cluster_error()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store command error: {0}")]
    Command(String),

    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
}
