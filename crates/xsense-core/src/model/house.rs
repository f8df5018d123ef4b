// ── House domain type ──

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use xsense_api::{HouseIdentity, HouseRecord};

use super::strip_promoted;

/// A house: the unit of one realtime connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct House {
    pub id: String,
    pub name: String,
    /// Owning user. Replaced by the station owner after enumeration so a
    /// shared account targets the owner's shadows.
    pub user_id: Option<String>,
    pub mqtt_region: Option<String>,
    pub mqtt_server: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl House {
    /// Serialized names of the dedicated fields and their vendor aliases.
    pub(crate) const PROMOTED_KEYS: &'static [&'static str] = &[
        "id", "name", "userId", "mqttRegion", "mqttServer", "houseId", "houseName",
    ];

    pub fn identity(&self) -> HouseIdentity {
        HouseIdentity {
            house_id: self.id.clone(),
            name: Some(self.name.clone()).filter(|n| !n.is_empty()),
            user_id: self.user_id.clone(),
            region: self.mqtt_region.clone(),
        }
    }
}

impl From<HouseRecord> for House {
    fn from(record: HouseRecord) -> Self {
        let mut fields = record.extra;
        strip_promoted(&mut fields, Self::PROMOTED_KEYS);
        Self {
            name: record.house_name.unwrap_or_default(),
            id: record.house_id,
            user_id: record.user_id,
            mqtt_region: record.mqtt_region.filter(|r| !r.is_empty()),
            mqtt_server: record.mqtt_server.filter(|s| !s.is_empty()),
            fields,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serialized_house_names_each_key_once() {
        let record: HouseRecord = serde_json::from_value(json!({
            "houseId": "H1",
            "houseName": "Home",
            "userId": "U1",
            "mqttRegion": "eu-central-1",
            "name": "shadowed",
            "id": "X",
            "timezone": "Europe/Berlin"
        }))
        .unwrap();
        let house = House::from(record);
        assert_eq!(house.fields.len(), 1);

        let text = serde_json::to_string(&house).unwrap();
        for key in ["id", "name", "userId", "mqttRegion", "timezone"] {
            assert_eq!(text.matches(&format!("\"{key}\":")).count(), 1, "{key} in {text}");
        }
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], "H1");
        assert_eq!(value["name"], "Home");
    }
}
