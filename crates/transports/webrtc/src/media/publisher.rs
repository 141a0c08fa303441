//! Redis pub/sub publisher for sampled frames

use super::sampler::FramePublisher;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use redis::aio::MultiplexedConnection;
use redis::AsyncConnectionConfig;
use std::time::Duration;
use tracing::{info, warn};

/// Publishes frames with `PUBLISH` over one multiplexed connection
///
/// A connection-level failure triggers one reconnect and a retry of the
/// failed publish; later ticks keep using the replacement.
pub struct RedisPublisher {
    client: redis::Client,
    timeout: Duration,
    connection: RwLock<MultiplexedConnection>,
}

impl RedisPublisher {
    /// Connect and check the server once with `PING`
    ///
    /// Connecting and the `PING` together are bounded by `timeout`, which
    /// also bounds every later command. Callers treat an error as "bus
    /// unavailable" and disable sampling.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Publish(format!("Invalid Redis URL {}: {}", url, e)))?;

        let connection = open(&client, timeout).await?;
        info!("Redis connected at {}", url);

        Ok(Self {
            client,
            timeout,
            connection: RwLock::new(connection),
        })
    }

    async fn reconnect(&self) -> Result<MultiplexedConnection> {
        let connection = open(&self.client, self.timeout).await?;
        *self.connection.write() = connection.clone();
        info!("Redis reconnected");
        Ok(connection)
    }
}

async fn open(client: &redis::Client, timeout: Duration) -> Result<MultiplexedConnection> {
    let config = AsyncConnectionConfig::new()
        .set_connection_timeout(timeout)
        .set_response_timeout(timeout);

    let handshake = async {
        let mut connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await
            .map_err(|e| Error::Publish(format!("Failed to connect to Redis: {}", e)))?;

        let _pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| Error::Publish(format!("Redis PING failed: {}", e)))?;

        Ok::<_, Error>(connection)
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| Error::Publish(format!("Redis did not answer within {:?}", timeout)))?
}

async fn send_publish(
    mut connection: MultiplexedConnection,
    topic: &str,
    payload: &[u8],
) -> redis::RedisResult<()> {
    let _receivers: i64 = redis::cmd("PUBLISH")
        .arg(topic)
        .arg(payload)
        .query_async(&mut connection)
        .await?;
    Ok(())
}

#[async_trait]
impl FramePublisher for RedisPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        let connection = self.connection.read().clone();
        match send_publish(connection, topic, &payload).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_io_error() || e.is_unrecoverable_error() => {
                warn!("Redis connection lost ({}), reconnecting", e);
                let connection = self.reconnect().await?;
                send_publish(connection, topic, &payload)
                    .await
                    .map_err(|e| Error::Publish(e.to_string()))
            }
            Err(e) => Err(Error::Publish(e.to_string())),
        }
    }
}
