// Vendor REST client modules
//
// Single `POST /app` endpoint multiplexed by business code. Transport
// mechanics live in `client`; each concern adds inherent methods on
// `XSenseClient` from its own file.

pub mod auth;
pub mod client;
pub mod directory;
pub mod legacy;
pub mod models;

pub use auth::IotCredentials;
pub use client::{
    AppIdentity, BizCode, ClientSettings, DEFAULT_BASE_URL, DEFAULT_IOT_HOST_TEMPLATE, XSenseClient,
};
pub use legacy::LegacyMqttConfig;
pub use models::{HouseRecord, StationRecord};
