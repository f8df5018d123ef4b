// ── Station domain type ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use xsense_api::StationRecord;
use xsense_api::shadow::{StationIdentity, is_wifi_type, station_thing_name};

use super::strip_promoted;

/// A hub station, or a WiFi device that is its own station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub serial: String,
    pub type_code: String,
    pub name: String,
    pub house_id: String,
    pub user_id: Option<String>,
    /// Directory extras plus merged shadow state.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Station {
    /// Serialized names of the dedicated fields and their vendor aliases.
    pub(crate) const PROMOTED_KEYS: &'static [&'static str] = &[
        "id", "serial", "typeCode", "name", "houseId", "userId", "stationId", "stationSn",
        "stationSN", "sn", "category", "stationType", "stationName",
    ];

    pub fn from_record(record: &StationRecord, house_id: &str) -> Self {
        let mut fields = record.extra.clone();
        strip_promoted(&mut fields, Self::PROMOTED_KEYS);
        Self {
            id: record.station_id.clone(),
            serial: record.serial().unwrap_or_default().to_owned(),
            type_code: record.type_code().unwrap_or_default().to_owned(),
            name: record.station_name.clone().unwrap_or_default(),
            house_id: house_id.to_owned(),
            user_id: record.user_id.clone(),
            fields,
        }
    }

    /// Primary IoT thing name.
    pub fn thing_name(&self) -> String {
        station_thing_name(&self.type_code, &self.serial)
    }

    /// Directly-connected WiFi device with no children.
    pub fn is_wifi(&self) -> bool {
        is_wifi_type(&self.type_code)
    }

    pub fn identity(&self, region: Option<String>) -> StationIdentity {
        StationIdentity {
            station_id: self.id.clone(),
            serial: self.serial.clone(),
            type_code: self.type_code.clone(),
            house_id: self.house_id.clone(),
            user_id: self.user_id.clone(),
            region,
        }
    }
}
