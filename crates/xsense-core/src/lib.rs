// xsense-core: Device cache, realtime dispatch and consumer API on top of xsense-api.

pub mod command;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod registry;
pub mod sanitize;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::ClientConfig;
pub use controller::{ClientState, Controller, DirectorySnapshot};
pub use error::{CoreError, ErrorKind};
pub use registry::ClientRegistry;
pub use store::{DataStore, Subscription, UpdateCallback, UpdateEvent};

// Re-export model types at the crate root for ergonomics.
pub use model::{Device, House, Station};

// Wire-layer types consumers see through events and config.
pub use xsense_api::{ApiNotice, NoticeKind, ReconnectConfig};
