// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Redis-backed bus.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::{BusError, BusResult};
use super::{Bus, Fields, StartId, StreamEntry, Subscription};

/// Maximum delay between subscription reconnect attempts.
const MAX_RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(10);

/// Bus backed by a Redis server.
///
/// Commands share one multiplexed connection. Blocking stream reads use a
/// second connection so they never stall publishes.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
    conn: ConnectionManager,
    blocking: ConnectionManager,
    url: String,
}

impl RedisBus {
    /// Connect to a Redis server, e.g. `redis://localhost:6380`.
    pub async fn connect(url: &str) -> BusResult<Self> {
        let client = Client::open(url).map_err(|e| BusError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Unavailable(format!("{}: {}", url, e)))?;
        let blocking = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Unavailable(format!("{}: {}", url, e)))?;
        info!("Connected to bus at {}", url);
        Ok(Self {
            client,
            conn,
            blocking,
            url: url.to_string(),
        })
    }

    /// Server URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_group_error(err: redis::RedisError, stream: &str, group: &str) -> BusError {
        if err.code() == Some("NOGROUP") {
            BusError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            }
        } else {
            err.into()
        }
    }

    fn to_entries(reply: Option<StreamReadReply>) -> BusResult<Vec<StreamEntry>> {
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let mut fields = Fields::new();
                for (name, value) in entry.map {
                    // Pending re-reads of deleted entries come back with nil fields.
                    if let Ok(text) = redis::from_redis_value::<String>(&value) {
                        fields.insert(name, text);
                    }
                }
                out.push(StreamEntry {
                    id: entry.id,
                    fields,
                });
            }
        }
        Ok(out)
    }

    async fn open_subscription(client: &Client, channel: &str) -> redis::RedisResult<PubSub> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }

    /// Forward messages from `subscribed` until the receiver goes away,
    /// resubscribing with backoff whenever the connection drops.
    async fn pump_subscription(
        client: Client,
        channel: String,
        subscribed: PubSub,
        tx: mpsc::UnboundedSender<String>,
    ) {
        let mut backoff = Duration::from_millis(250);
        let mut current = Some(subscribed);
        loop {
            if tx.is_closed() {
                return;
            }
            let pubsub = match current.take() {
                Some(p) => p,
                None => match Self::open_subscription(&client, &channel).await {
                    Ok(p) => {
                        debug!("Resubscribed to {}", channel);
                        backoff = Duration::from_millis(250);
                        p
                    }
                    Err(e) => {
                        warn!("Subscribe to {} failed: {}; retrying in {:?}", channel, e, backoff);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_RESUBSCRIBE_BACKOFF);
                        continue;
                    }
                },
            };

            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Dropping undecodable message on {}: {}", channel, e);
                        continue;
                    }
                };
                if tx.send(payload).is_err() {
                    return;
                }
            }
            warn!("Subscription to {} dropped; reconnecting", channel);
        }
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn ping(&self) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> BusResult<usize> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> BusResult<Subscription> {
        // The server has confirmed SUBSCRIBE before this returns, so a
        // publish issued right after cannot be missed.
        let pubsub = Self::open_subscription(&self.client, channel).await?;
        debug!("Subscribed to {}", channel);

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::pump_subscription(
            self.client.clone(),
            channel.to_string(),
            pubsub,
            tx,
        ));
        Ok(Subscription::new(channel, rx))
    }

    async fn append(&self, stream: &str, fields: &Fields) -> BusResult<String> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let id: String = conn.xadd(stream, "*", pairs.as_slice()).await?;
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start: StartId) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(stream, group, start.as_str())
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
    ) -> BusResult<Vec<StreamEntry>> {
        let mut opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count.max(1));
        let mut conn = match block {
            Some(b) => {
                opts = opts.block(b.as_millis().max(1) as usize);
                self.blocking.clone()
            }
            None => self.conn.clone(),
        };
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &[">"], &opts)
            .await
            .map_err(|e| Self::map_group_error(e, stream, group))?;
        Self::to_entries(reply)
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> BusResult<Vec<StreamEntry>> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count.max(1));
        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[stream], &["0"], &opts)
            .await
            .map_err(|e| Self::map_group_error(e, stream, group))?;
        Self::to_entries(reply)
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let _acked: i64 = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> BusResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn set_nx(&self, key: &str, value: &str) -> BusResult<bool> {
        let mut conn = self.conn.clone();
        let written: bool = conn.set_nx(key, value).await?;
        Ok(written)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BusResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn del(&self, key: &str) -> BusResult<()> {
        let mut conn = self.conn.clone();
        let _removed: i64 = conn.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Server for live tests, e.g. `redis://localhost:6380`. Unset skips them.
    fn live_url() -> Option<String> {
        std::env::var("CENTERFIRE_TEST_REDIS_URL").ok().filter(|u| !u.is_empty())
    }

    #[tokio::test]
    async fn test_publish_right_after_subscribe_is_delivered() {
        let Some(url) = live_url() else {
            return;
        };
        let bus = RedisBus::connect(&url).await.unwrap();
        let channel = format!("centerfire:test:{}", uuid::Uuid::new_v4());

        let mut sub = bus.subscribe(&channel).await.unwrap();
        assert_eq!(bus.publish(&channel, "ack").await.unwrap(), 1);

        let got = tokio::time::timeout(Duration::from_secs(2), sub.recv()).await.unwrap();
        assert_eq!(got.as_deref(), Some("ack"));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_subscribe() {
        let Ok(client) = Client::open("redis://127.0.0.1:1") else {
            return;
        };
        let result = RedisBus::open_subscription(&client, "centerfire:test").await;
        assert!(result.is_err());
    }
}
