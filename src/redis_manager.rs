//! Redis queue transport
//!
//! - Job consumption (BLPOP over every inbound queue)
//! - Verdict publishing (RPUSH to the after-evaluation queues)
//!
//! Consumer and publisher use separate connections so a blocking BLPOP never
//! delays a publish.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::jobs::JobQueue;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub struct RedisQueue {
    client: redis::Client,
    consumer: Mutex<MultiplexedConnection>,
    publisher: Mutex<MultiplexedConnection>,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let consumer = get_connection_with_retry(&client).await?;
        let publisher = get_connection_with_retry(&client).await?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            client,
            consumer: Mutex::new(consumer),
            publisher: Mutex::new(publisher),
        })
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    /// Block until a message arrives on any of `queues`.
    ///
    /// Reconnects and retries on connection failure.
    async fn dequeue(&self, queues: &[&str]) -> Result<(String, String)> {
        let keys: Vec<String> = queues.iter().map(|q| q.to_string()).collect();
        let mut conn = self.consumer.lock().await;

        loop {
            let result: Option<(String, String)> = match conn.blpop(&keys, 0.0).await {
                Ok(res) => res,
                Err(e) => {
                    warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                    *conn = get_connection_with_retry(&self.client).await?;
                    continue;
                }
            };

            if let Some((queue, payload)) = result {
                debug!("Dequeued {} bytes from {}", payload.len(), queue);
                return Ok((queue, payload));
            }
        }
    }

    async fn enqueue(&self, queue: &str, payload: &str) -> Result<()> {
        let mut conn = self.publisher.lock().await;

        if let Err(e) = conn.rpush::<_, _, ()>(queue, payload).await {
            warn!("Failed to push to {}: {}. Reconnecting...", queue, e);
            *conn = get_connection_with_retry(&self.client).await?;
            conn.rpush::<_, _, ()>(queue, payload)
                .await
                .with_context(|| format!("Failed to push to {}", queue))?;
        }

        Ok(())
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in {} seconds...",
                    e,
                    RECONNECT_DELAY.as_secs()
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
