// xsense-api: Async Rust client for the X-Sense cloud (REST, Cognito SRP, IoT shadows, MQTT)

pub mod backoff;
pub mod cognito;
mod crypto;
pub mod error;
pub mod mac;
pub mod notice;
pub mod realtime;
pub mod rest;
pub mod shadow;
pub mod signer;
pub mod srp;
pub mod transport;

pub use backoff::{ReconnectConfig, ReconnectStrategy, ServerErrorBackoff};
pub use cognito::AuthState;
pub use error::Error;
pub use notice::{ApiNotice, NoticeKind};
pub use realtime::{BrokerTarget, ChannelConfig, ChannelEvent, RealtimeChannel};
pub use rest::{ClientSettings, HouseRecord, StationRecord, XSenseClient};
pub use shadow::{HouseIdentity, ShadowDocument, ShadowName, StationIdentity};
pub use signer::{AwsCredentials, Signer};
pub use transport::TransportConfig;
