//! `BrokerAdapter`: the uniform interface stages use to talk to the message
//! broker (spec §4.2), independent of whether the endpoint behind it is a
//! load-balanced queue or a fan-out exchange/topic.

use super::channel::{Channel, ChannelType, PubSubChannel, Subscriber};
use super::registry::ChannelRegistry;
use crate::error::PipelineError;

use async_trait::async_trait;
use std::sync::Mutex;

/// How an endpoint name is addressed. Queue names are shared by every
/// producer/consumer of a given stage kind; Exchange names are qualified
/// with a routing key, one channel per key (spec §4.2 "one consumer per
/// routing key").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Queue,
    Exchange,
}

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Publish a frame to a named endpoint, creating it on first use.
    async fn send(&self, endpoint: &str, frame: Vec<u8>) -> Result<(), PipelineError>;

    /// Attach a new consumer to a named endpoint, creating it on first use.
    fn start_consuming(&self, endpoint: &str) -> Subscriber<Vec<u8>>;

    /// Detach a consumer. The in-process adapter has nothing to release
    /// beyond dropping the `Subscriber`; kept for interface parity with a
    /// networked broker client.
    fn stop_consuming(&self, _endpoint: &str) {}

    /// Remove an endpoint so a later reference re-creates it empty.
    fn delete(&self, endpoint: &str);

    /// Release all endpoints. Used by test harnesses between scenarios.
    fn close(&self);
}

/// Default `BrokerAdapter`: everything lives in one process, backed by
/// `ChannelRegistry`. A networked deployment would swap this for a client
/// of a real broker behind the same trait (see DESIGN.md Open Questions).
pub struct InProcessBroker {
    registry: Mutex<ChannelRegistry<Vec<u8>>>,
    capacity: usize,
}

impl InProcessBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(ChannelRegistry::new()),
            capacity,
        }
    }

    fn channel_type_for(&self, endpoint: &str) -> ChannelType {
        if is_exchange_endpoint(endpoint) {
            ChannelType::Broadcast
        } else {
            ChannelType::Shared
        }
    }

    fn get_or_create(&self, endpoint: &str) -> std::sync::Arc<Channel<Vec<u8>>> {
        let kind = self.channel_type_for(endpoint);
        let mut registry = self
            .registry
            .lock()
            .expect("broker registry lock poisoned");
        registry.get_or_create(endpoint, kind, self.capacity)
    }
}

/// A queue endpoint name is the stage/queue name alone. An exchange
/// endpoint name is qualified `<prefix>.<routing_key>`; this is the only
/// signal `InProcessBroker` uses to decide Queue vs Exchange discipline.
fn is_exchange_endpoint(endpoint: &str) -> bool {
    endpoint.contains('.')
}

#[async_trait]
impl BrokerAdapter for InProcessBroker {
    async fn send(&self, endpoint: &str, frame: Vec<u8>) -> Result<(), PipelineError> {
        let channel = self.get_or_create(endpoint);
        channel
            .publish(frame)
            .await
            .map_err(|_| PipelineError::BrokerError(format!("publish to {endpoint} failed")))
    }

    fn start_consuming(&self, endpoint: &str) -> Subscriber<Vec<u8>> {
        let channel = self.get_or_create(endpoint);
        channel.subscribe()
    }

    fn delete(&self, endpoint: &str) {
        let mut registry = self
            .registry
            .lock()
            .expect("broker registry lock poisoned");
        registry.remove(endpoint);
    }

    fn close(&self) {
        let mut registry = self
            .registry
            .lock()
            .expect("broker registry lock poisoned");
        registry.clear();
    }
}

/// Builds the exchange routing key for a producer instance, per spec §4.2
/// (`<prefix>.<producer_index>`).
pub fn exchange_routing_key(prefix: &str, producer_index: u32) -> String {
    format!("{prefix}.{producer_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_endpoint_load_balances_across_consumers() {
        let broker = InProcessBroker::new(16);
        let mut c1 = broker.start_consuming("cleaner.queue");
        let mut c2 = broker.start_consuming("cleaner.queue");

        for i in 0..4u8 {
            broker
                .send("cleaner.queue", vec![i])
                .await
                .expect("send should succeed");
        }

        let mut received = Vec::new();
        for _ in 0..4 {
            tokio::select! {
                Some(msg) = c1.recv() => received.push(msg),
                Some(msg) = c2.recv() => received.push(msg),
            }
        }
        received.sort();
        assert_eq!(received, vec![vec![0], vec![1], vec![2], vec![3]]);
    }

    #[tokio::test]
    async fn exchange_endpoint_fans_out_to_every_consumer() {
        let broker = InProcessBroker::new(16);
        let topic = exchange_routing_key("results", 1);
        let mut c1 = broker.start_consuming(&topic);
        let mut c2 = broker.start_consuming(&topic);

        broker.send(&topic, vec![9]).await.unwrap();

        assert_eq!(c1.recv().await, Some(vec![9]));
        assert_eq!(c2.recv().await, Some(vec![9]));
    }

    #[tokio::test]
    async fn delete_resets_the_endpoint() {
        let broker = InProcessBroker::new(4);
        let mut c1 = broker.start_consuming("sorter.queue");
        broker.delete("sorter.queue");
        broker.send("sorter.queue", vec![1]).await.unwrap();
        // c1 was subscribed to the deleted channel, a fresh one now exists.
        assert_eq!(c1.try_recv().await, None);
    }
}
