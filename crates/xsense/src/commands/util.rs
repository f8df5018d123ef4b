//! Shared helpers for command handlers.

use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::broadcast::error::RecvError;
use xsense_core::{Controller, CoreError, Device, UpdateEvent};

use crate::error::CliError;

/// Open the house's realtime channel and wait until it reports healthy.
pub async fn connect_and_wait(
    controller: &Controller,
    house_id: &str,
    station_id: Option<&str>,
    timeout: Duration,
) -> Result<(), CoreError> {
    let mut updates = controller.updates();
    controller.connect_realtime(Some(house_id), station_id).await?;
    if controller.realtime_health(house_id) == Some(true) {
        return Ok(());
    }

    let wait = async {
        loop {
            match updates.recv().await {
                Ok(UpdateEvent::RealtimeHealth { house_id: h, healthy: true }) if h == house_id => {
                    return Ok(());
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        Err(CoreError::RealtimeNotConnected {
            house_id: house_id.to_owned(),
        })
    };

    tokio::time::timeout(timeout, wait).await.unwrap_or_else(|_| {
        Err(CoreError::RealtimeNotConnected {
            house_id: house_id.to_owned(),
        })
    })
}

/// Parse `KEY=VALUE` pairs. Values that parse as JSON keep their type;
/// anything else is a string.
pub fn parse_settings(pairs: &[String]) -> Result<Map<String, Value>, CliError> {
    let mut settings = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            return Err(CliError::Validation {
                field: "setting".into(),
                reason: format!("expected KEY=VALUE, got '{pair}'"),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::Validation {
                field: "setting".into(),
                reason: format!("empty key in '{pair}'"),
            });
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        settings.insert(key.to_owned(), value);
    }
    Ok(settings)
}

/// `Kitchen (ABCDEF01)`
pub fn device_label(device: &Device) -> String {
    format!("{} ({})", device.name, device.serial)
}

pub fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn yes_no(value: Option<bool>) -> String {
    match value {
        Some(true) => "yes".into(),
        Some(false) => "no".into(),
        None => String::new(),
    }
}
