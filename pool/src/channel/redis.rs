/// Redis PUBLISH/SUBSCRIBE transport for the work channel.
///
/// Publishing shares one lazily created `ConnectionManager`; every
/// subscription opens its own pub/sub connection and forwards payloads
/// into an unbounded receiver until the subscriber is dropped. A dropped
/// pub/sub connection is reopened; messages published meanwhile are lost.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use super::{Topic, WorkChannel, WorkReceiver};
use crate::metrics::prometheus as metrics;

/// Pause between resubscribe attempts.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

type PayloadStream = BoxStream<'static, Vec<u8>>;

pub struct RedisChannel {
    client: redis::Client,
    connection: Arc<RwLock<Option<redis::aio::ConnectionManager>>>,
    prefix: String,
}

impl RedisChannel {
    pub fn new(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;
        Ok(Self {
            client,
            connection: Arc::new(RwLock::new(None)),
            prefix: prefix.to_string(),
        })
    }

    fn channel_name(&self, topic: Topic) -> String {
        format!("{}:{}", self.prefix, topic.name())
    }

    async fn get_connection(&self) -> Result<redis::aio::ConnectionManager> {
        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let manager = self
            .client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow!("Failed to get connection manager: {}", e))?;
        *guard = Some(manager.clone());
        Ok(manager)
    }
}

#[async_trait]
impl WorkChannel for RedisChannel {
    async fn publish(&self, topic: Topic, payload: Vec<u8>) {
        let channel = self.channel_name(topic);
        let res: Result<()> = async {
            let mut conn = self.get_connection().await?;
            conn.publish::<_, _, ()>(&channel, payload)
                .await
                .map_err(|e| anyhow!("PUBLISH {} failed: {}", channel, e))
        }
        .await;
        if let Err(e) = res {
            metrics::inc_redis_errors();
            tracing::warn!("{}", e);
        }
    }

    async fn subscribe(&self, topic: Topic) -> Result<WorkReceiver> {
        let channel = self.channel_name(topic);
        let first = open_subscription(&self.client, &channel).await?;
        tracing::info!("Subscribed to {}", channel);

        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let name = channel.clone();
        tokio::spawn(forward_with_resubscribe(
            first,
            move || {
                let client = client.clone();
                let name = name.clone();
                async move { open_subscription(&client, &name).await }
            },
            tx,
            channel,
            RESUBSCRIBE_DELAY,
        ));

        Ok(rx)
    }
}

async fn open_subscription(client: &redis::Client, channel: &str) -> Result<PayloadStream> {
    #[allow(deprecated)]
    let conn = client
        .get_async_connection()
        .await
        .map_err(|e| anyhow!("Failed to open pub/sub connection: {}", e))?;
    let mut pubsub = conn.into_pubsub();
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| anyhow!("SUBSCRIBE {} failed: {}", channel, e))?;

    let name = channel.to_string();
    Ok(pubsub
        .into_on_message()
        .filter_map(move |msg| {
            let payload = match msg.get_payload::<Vec<u8>>() {
                Ok(p) => Some(p),
                Err(e) => {
                    tracing::warn!("Bad payload on {}: {}", name, e);
                    None
                }
            };
            futures::future::ready(payload)
        })
        .boxed())
}

/// Drain `stream` into `tx`; whenever it ends, reconnect through `connect`
/// after `delay` and keep forwarding into the same receiver. Stops once the
/// receiver is dropped.
async fn forward_with_resubscribe<C, Fut>(
    first: PayloadStream,
    mut connect: C,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    channel: String,
    delay: Duration,
) where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<PayloadStream>>,
{
    let mut current = Some(first);
    loop {
        if let Some(mut stream) = current.take() {
            while let Some(payload) = stream.next().await {
                if tx.send(payload).is_err() {
                    return;
                }
            }
            metrics::inc_redis_errors();
            tracing::warn!("Subscription to {} dropped, resubscribing", channel);
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(delay).await;
        match connect().await {
            Ok(stream) => {
                tracing::info!("Resubscribed to {}", channel);
                current = Some(stream);
            }
            Err(e) => {
                metrics::inc_redis_errors();
                tracing::warn!("Resubscribe to {} failed: {}", channel, e);
            }
        }
    }
}
