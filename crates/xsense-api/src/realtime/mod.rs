// Realtime channel: MQTT topic vocabulary and per-house connections.

mod channel;
pub mod topics;

pub use channel::{AWS_MQTT_USERNAME, BrokerTarget, ChannelConfig, ChannelEvent, RealtimeChannel};
pub use topics::{Outbound, TopicKind};
