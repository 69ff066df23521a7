//! The separate subscriber connection for publish/subscribe.
//!
//! A subscribed Redis connection cannot issue ordinary commands, so
//! pub/sub gets its own connection with its own lifecycle: lazily created
//! on the first subscribe, torn down entirely when the last
//! channel/pattern is unsubscribed (never kept idle - an idle subscriber
//! is a leaked session).

use crate::db::redis::redis_url;
use crate::error::{ConduitError, ConduitResult};
use crate::models::ConnectionConfig;
use futures_util::StreamExt;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One inbound pub/sub message, delivered out-of-band on the registry
/// event stream. Delivery within one channel preserves publish order
/// (a single pump task forwards messages); ordering across channels is
/// not guaranteed.
#[derive(Debug, Clone)]
pub struct PubSubEvent {
    pub pool_id: String,
    pub channel: String,
    pub payload: String,
    /// True when the message matched a pattern subscription.
    pub from_pattern: bool,
}

pub struct RedisSubscriber {
    sink: redis::aio::PubSubSink,
    channels: HashSet<String>,
    patterns: HashSet<String>,
    pump: JoinHandle<()>,
}

impl RedisSubscriber {
    /// Open the subscriber connection and start the message pump.
    pub async fn connect(
        config: &ConnectionConfig,
        pool_id: String,
        events: mpsc::UnboundedSender<PubSubEvent>,
    ) -> ConduitResult<Self> {
        let client = redis::Client::open(redis_url(config)).map_err(ConduitError::from)?;
        let pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| {
                ConduitError::connection_detailed(
                    format!("subscriber connect failed: {}", e),
                    e.code().map(|c| c.to_string()),
                    config.host.clone(),
                    config.port,
                    "check that the Redis server is reachable",
                )
            })?;
        let (sink, mut stream) = pubsub.split();

        let pump = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let from_pattern = msg
                    .get_pattern::<Option<String>>()
                    .ok()
                    .flatten()
                    .is_some();
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "undecodable pub/sub payload");
                        continue;
                    }
                };
                if events
                    .send(PubSubEvent {
                        pool_id: pool_id.clone(),
                        channel,
                        payload,
                        from_pattern,
                    })
                    .is_err()
                {
                    // Event receiver dropped; nothing left to deliver to.
                    break;
                }
            }
            debug!("pub/sub pump finished");
        });

        Ok(Self {
            sink,
            channels: HashSet::new(),
            patterns: HashSet::new(),
            pump,
        })
    }

    /// Subscribe to channels or patterns. Entries already subscribed are
    /// skipped (subscribing twice is a no-op).
    pub async fn subscribe(&mut self, entries: &[String], is_pattern: bool) -> ConduitResult<()> {
        for entry in entries {
            let already = if is_pattern {
                self.patterns.contains(entry)
            } else {
                self.channels.contains(entry)
            };
            if already {
                continue;
            }
            if is_pattern {
                self.sink
                    .psubscribe(entry)
                    .await
                    .map_err(ConduitError::from)?;
                self.patterns.insert(entry.clone());
            } else {
                self.sink
                    .subscribe(entry)
                    .await
                    .map_err(ConduitError::from)?;
                self.channels.insert(entry.clone());
            }
            debug!(entry = %entry, pattern = is_pattern, "subscribed");
        }
        Ok(())
    }

    /// Unsubscribe from channels or patterns. Unknown entries are ignored.
    pub async fn unsubscribe(
        &mut self,
        entries: &[String],
        is_pattern: bool,
    ) -> ConduitResult<()> {
        for entry in entries {
            let known = if is_pattern {
                self.patterns.remove(entry)
            } else {
                self.channels.remove(entry)
            };
            if !known {
                continue;
            }
            if is_pattern {
                self.sink
                    .punsubscribe(entry)
                    .await
                    .map_err(ConduitError::from)?;
            } else {
                self.sink
                    .unsubscribe(entry)
                    .await
                    .map_err(ConduitError::from)?;
            }
            debug!(entry = %entry, pattern = is_pattern, "unsubscribed");
        }
        Ok(())
    }

    /// True when nothing is subscribed anymore; the owner must tear the
    /// subscriber down at that point.
    pub fn is_idle(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty()
    }

    pub fn subscription_count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }

    /// Tear the subscriber connection down.
    pub fn shutdown(self) {
        self.pump.abort();
        drop(self.sink);
        debug!("subscriber connection torn down");
    }
}

impl std::fmt::Debug for RedisSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSubscriber")
            .field("channels", &self.channels.len())
            .field("patterns", &self.patterns.len())
            .finish()
    }
}
