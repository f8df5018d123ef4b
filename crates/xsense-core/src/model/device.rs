// ── Device domain type ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Station;
use super::{string_field, strip_promoted};
use crate::sanitize::{self, sanitize_update};

/// Sensors that report temperature and humidity as `status.b` / `status.c`.
const THERMO_TYPES: [&str; 3] = ["STH51", "STH54", "STH0A"];

/// One addressable sensor.
///
/// Identity lives in dedicated fields; everything else the cloud reports
/// (battery, alarm flags, readings, the raw `status` object) is a flat
/// bag in `fields`, coerced by the sanitizer on every merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Vendor device id, or the serial when the vendor sends none.
    pub id: String,
    pub serial: String,
    pub type_code: String,
    pub name: String,
    pub station_id: String,
    pub house_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Device {
    /// Serialized names of the dedicated fields and the vendor aliases
    /// they are read from. Never kept in `fields`.
    pub(crate) const PROMOTED_KEYS: &'static [&'static str] = &[
        "id", "serial", "typeCode", "name", "stationId", "houseId", "deviceId", "deviceSn",
        "deviceSN", "sn", "deviceType", "type", "deviceName",
    ];

    /// Normalize a raw device record listed under `station`.
    ///
    /// Returns `None` for records with neither id nor serial.
    pub fn from_record(record: &Map<String, Value>, station: &Station) -> Option<Self> {
        let serial = string_field(record, &["deviceSn", "deviceSN", "sn"]).unwrap_or_default();
        let id = string_field(record, &["deviceId"]).unwrap_or_else(|| serial.clone());
        if id.is_empty() {
            return None;
        }
        let type_code = string_field(record, &["deviceType", "type"]).unwrap_or_default();
        let name = display_name(record.get("deviceName"), &type_code, &serial);

        let mut fields: Map<String, Value> = record
            .iter()
            .filter(|(key, _)| !Self::PROMOTED_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if THERMO_TYPES.contains(&type_code.as_str()) {
            lift_thermo_status(&mut fields);
        }

        Some(Self {
            id,
            serial,
            type_code,
            name,
            station_id: station.id.clone(),
            house_id: station.house_id.clone(),
            fields: sanitize_update(fields),
        })
    }

    /// The device view of a WiFi station. Its id is the station id.
    pub fn from_wifi_station(station: &Station) -> Self {
        let mut fields = station.fields.clone();
        if let Some(rssi) = fields.remove("wifiRSSI") {
            fields.entry("wifiRssi").or_insert(rssi);
        }
        strip_promoted(&mut fields, Self::PROMOTED_KEYS);
        Self {
            id: station.id.clone(),
            serial: station.serial.clone(),
            type_code: station.type_code.clone(),
            name: display_name(
                Some(&Value::String(station.name.clone())),
                &station.type_code,
                &station.serial,
            ),
            station_id: station.id.clone(),
            house_id: station.house_id.clone(),
            fields: sanitize_update(fields),
        }
    }

    // ── Sensor accessors ─────────────────────────────────────────────

    fn int(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(sanitize::to_int)
    }

    fn float(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(sanitize::to_float)
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(sanitize::to_bool)
    }

    /// Battery level on the vendor's 0-3 scale.
    pub fn battery(&self) -> Option<i64> {
        self.int("batInfo")
    }

    pub fn alarm_status(&self) -> Option<i64> {
        self.int("alarmStatus")
    }

    pub fn is_alarming(&self) -> bool {
        self.alarm_status().is_some_and(|s| s > 0)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.float("temperature")
    }

    pub fn humidity(&self) -> Option<f64> {
        self.float("humidity")
    }

    pub fn co_ppm(&self) -> Option<i64> {
        self.int("coPpm")
    }

    pub fn is_open(&self) -> Option<bool> {
        self.flag("isOpen")
    }

    pub fn is_moved(&self) -> Option<bool> {
        self.flag("isMoved")
    }

    pub fn online(&self) -> Option<bool> {
        self.flag("onLine").or_else(|| self.flag("online"))
    }

    pub fn rf_level(&self) -> Option<i64> {
        self.int("rfLevel")
    }

    pub fn wifi_rssi(&self) -> Option<i64> {
        self.int("wifiRssi")
    }

    pub fn mute_status(&self) -> Option<i64> {
        self.int("muteStatus")
    }

    /// Raw vendor `status` sub-object.
    pub fn status(&self) -> Option<&Map<String, Value>> {
        self.fields.get("status").and_then(Value::as_object)
    }
}

/// Replace missing or generic vendor names with `"{type} {last4}"`.
fn display_name(name: Option<&Value>, type_code: &str, serial: &str) -> String {
    let name = name.and_then(Value::as_str).unwrap_or_default().trim();
    if !name.is_empty() && !name.starts_with("Station de base") && name != "Sensore" {
        return name.to_owned();
    }
    let suffix_start = serial
        .char_indices()
        .rev()
        .nth(3)
        .map_or(0, |(index, _)| index);
    let prefix = if type_code.is_empty() { "Device" } else { type_code };
    format!("{prefix} {}", &serial[suffix_start..])
}

fn lift_thermo_status(fields: &mut Map<String, Value>) {
    let Some(status) = fields.get("status").and_then(Value::as_object) else {
        return;
    };
    let temperature = status.get("b").and_then(sanitize::to_float);
    let humidity = status.get("c").and_then(sanitize::to_float);
    if let Some(t) = temperature {
        fields.insert("temperature".into(), Value::from(t));
    }
    if let Some(h) = humidity {
        fields.insert("humidity".into(), Value::from(h));
    }
}
