pub mod adapter;
pub mod channel;
pub mod registry;

pub use adapter::{exchange_routing_key, BrokerAdapter, EndpointKind, InProcessBroker};
pub use channel::{Channel, ChannelType, PubSubChannel, PublishError, Subscriber};
pub use registry::ChannelRegistry;
