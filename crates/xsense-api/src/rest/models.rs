// Vendor REST response types
//
// The directory endpoints are loosely typed: identifiers arrive as
// strings or numbers, serial fields have several spellings, and most
// fields are optional. Known fields are modelled explicitly and the rest
// lands in `extra`. Device records stay raw maps; `xsense-core`
// normalizes their aliases.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ── House ────────────────────────────────────────────────────────────

/// One entry of the `102007` house list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub house_id: String,
    #[serde(default)]
    pub house_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub mqtt_region: Option<String>,
    #[serde(default)]
    pub mqtt_server: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Station ──────────────────────────────────────────────────────────

/// One entry of the `103007` station list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationRecord {
    #[serde(deserialize_with = "lenient_string")]
    pub station_id: String,
    #[serde(default)]
    pub station_sn: Option<String>,
    #[serde(default)]
    pub sn: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub station_type: Option<String>,
    #[serde(default)]
    pub station_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub devices: Vec<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StationRecord {
    /// Serial, preferring `stationSn` over `sn`.
    pub fn serial(&self) -> Option<&str> {
        self.station_sn
            .as_deref()
            .or(self.sn.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Category code, preferring `stationType` over `category`.
    pub fn type_code(&self) -> Option<&str> {
        self.station_type
            .as_deref()
            .or(self.category.as_deref())
            .filter(|s| !s.is_empty())
    }
}

// ── Lenient scalars ──────────────────────────────────────────────────

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
