// Directory endpoints: houses and stations.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::Error;
use crate::rest::client::{BizCode, XSenseClient, re_data};
use crate::rest::models::{HouseRecord, StationRecord};

impl XSenseClient {
    /// List houses visible to the account (`102007`).
    pub async fn list_houses(&self) -> Result<Vec<HouseRecord>, Error> {
        let mut params = Map::new();
        params.insert("utctimestamp".into(), json!("0"));
        let response = self.call(BizCode::Houses, params).await?;

        let list = re_data(&response).cloned().unwrap_or(Value::Array(Vec::new()));
        let houses: Vec<HouseRecord> = decode(list)?;
        debug!(count = houses.len(), "listed houses");
        Ok(houses)
    }

    /// List stations of a house, with their child devices (`103007`).
    pub async fn list_stations(&self, house_id: &str) -> Result<Vec<StationRecord>, Error> {
        let mut params = Map::new();
        params.insert("houseId".into(), json!(house_id));
        params.insert("utctimestamp".into(), json!("0"));
        let response = self.call(BizCode::Stations, params).await?;

        let list = re_data(&response)
            .and_then(|d| d.get("stations"))
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let stations: Vec<StationRecord> = decode(list)?;
        debug!(house_id, count = stations.len(), "listed stations");
        Ok(stations)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<Vec<T>, Error> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let body = value.to_string();
    serde_json::from_value(value).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}
