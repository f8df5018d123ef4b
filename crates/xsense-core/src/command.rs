// ── Command API ──
//
// Every write flows through the `Command` enum. The controller resolves
// the target, builds the MQTT publish and sends it on the owning house's
// realtime connection.

use serde_json::{Map, Value};

use crate::error::CoreError;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All write operations against the X-Sense cloud.
#[derive(Debug, Clone)]
pub enum Command {
    /// Silence a sounding alarm.
    MuteAlarm { device_id: String },
    /// Ask a device to run its self-test.
    TestAlarm { device_id: String },
    /// Write settings into a station's info shadow.
    SetStationConfig {
        station_id: String,
        config: Map<String, Value>,
    },
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MuteAlarm { .. } => "mute_alarm",
            Self::TestAlarm { .. } => "test_alarm",
            Self::SetStationConfig { .. } => "set_station_config",
        }
    }
}

/// Outcome of a published command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Published { house_id: String, topic: String },
}

impl CommandResult {
    pub fn topic(&self) -> &str {
        match self {
            Self::Published { topic, .. } => topic,
        }
    }
}
