// Signed shadow fetches and the brute-force resolution walk.
//
// A failed (thing, shadow) pair is counted; once the count passes the
// threshold the pair is never requested again for the lifetime of the
// client. Absence is the common case, so a missing shadow yields an
// empty document rather than an error.

use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value, json};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::Error;
use crate::rest::XSenseClient;
use crate::shadow::candidates::{
    HOUSE_SHADOWS, HouseIdentity, LEGACY_FALLBACK, SC07_SHADOW_GROUPS, STATION_SHADOW_PRIORITY,
    ShadowName, StationIdentity, USER_THING_HOUSE_SHADOWS, USER_THING_STATION_SHADOWS,
    WIFI_SHADOWS, expand, house_thing_names, station_thing_name, station_thing_names,
};
use crate::signer::{IOT_DATA_SERVICE, SignableRequest, Signer};

/// A reported shadow state, or a flat shadow document.
pub type ShadowDocument = Map<String, Value>;

/// Failures tolerated per (thing, shadow) pair before it is skipped.
pub const SHADOW_FAILURE_THRESHOLD: u32 = 5;

/// Named shadow used to ask a station to push temperature logs.
pub const TEMP_DATA_SHADOW: &str = "2nd_apptempdata";

const SHADOW_CONTENT_TYPE: &str = "application/x-amz-json-1.0";

fn breaker_key(thing: &str, shadow: &ShadowName) -> String {
    format!("{thing}:{}", shadow.label())
}

impl XSenseClient {
    // ── Breaker ──────────────────────────────────────────────────────

    /// Whether the breaker has tripped for this pair.
    pub fn shadow_tripped(&self, thing: &str, shadow: &ShadowName) -> bool {
        self.shadow_failures
            .get(&breaker_key(thing, shadow))
            .is_some_and(|count| *count > SHADOW_FAILURE_THRESHOLD)
    }

    /// Failures recorded for this pair.
    pub fn shadow_failure_count(&self, thing: &str, shadow: &ShadowName) -> u32 {
        self.shadow_failures
            .get(&breaker_key(thing, shadow))
            .map_or(0, |count| *count)
    }

    fn record_shadow_failure(&self, thing: &str, shadow: &ShadowName) {
        *self
            .shadow_failures
            .entry(breaker_key(thing, shadow))
            .or_insert(0) += 1;
    }

    // ── Single fetch ─────────────────────────────────────────────────

    /// Region for shadow calls: the house's broker region, else the Cognito region.
    pub fn shadow_region(&self, hint: Option<&str>) -> Result<String, Error> {
        hint.filter(|r| !r.is_empty())
            .map(str::to_owned)
            .or_else(|| self.cognito_region())
            .ok_or_else(|| Error::Signing {
                message: "no IoT region known for shadow request".into(),
            })
    }

    fn shadow_url(&self, region: &str, thing: &str, shadow: &ShadowName) -> Result<Url, Error> {
        let mut url = self
            .settings()
            .iot_base(region)?
            .join(&format!("things/{thing}/shadow"))?;
        if let Some(name) = shadow.as_query() {
            url.query_pairs_mut().append_pair("name", name);
        }
        Ok(url)
    }

    /// Fetch one shadow, surfacing absence as [`Error::ShadowNotFound`].
    pub async fn try_thing_shadow(
        &self,
        thing: &str,
        shadow: &ShadowName,
        region: &str,
    ) -> Result<ShadowDocument, Error> {
        if self.shadow_tripped(thing, shadow) {
            return Err(Error::ShadowNotFound {
                thing: thing.to_owned(),
                shadow: shadow.label().to_owned(),
            });
        }

        let iot = self.ensure_iot_credentials().await?;
        let url = self.shadow_url(region, thing, shadow)?;
        let signed = Signer::new(iot.credentials.clone()).sign(&SignableRequest {
            method: "GET",
            url: &url,
            region,
            service: IOT_DATA_SERVICE,
            payload: b"",
        })?;

        trace!(thing, shadow = %shadow, "GET {}", url);
        let resp = self
            .http()
            .get(url)
            .headers(signed.to_header_map()?)
            .header(CONTENT_TYPE, SHADOW_CONTENT_TYPE)
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                self.record_shadow_failure(thing, shadow);
                return Err(e.into());
            }
        };
        let status = resp.status();
        if !status.is_success() {
            self.record_shadow_failure(thing, shadow);
            trace!(thing, shadow = %shadow, status = status.as_u16(), "shadow unavailable");
            return Err(Error::ShadowNotFound {
                thing: thing.to_owned(),
                shadow: shadow.label().to_owned(),
            });
        }

        let text = resp.text().await?;
        let document: Value = serde_json::from_str(&text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text,
        })?;
        self.shadow_failures.remove(&breaker_key(thing, shadow));
        Ok(unwrap_reported(document))
    }

    /// Fetch one shadow; an absent or unreachable shadow is an empty document.
    ///
    /// Only credential problems are errors.
    pub async fn get_thing_shadow(
        &self,
        thing: &str,
        shadow: &ShadowName,
        region: Option<&str>,
    ) -> Result<ShadowDocument, Error> {
        let region = self.shadow_region(region)?;
        match self.try_thing_shadow(thing, shadow, &region).await {
            Ok(doc) => Ok(doc),
            Err(
                e @ (Error::Signing { .. }
                | Error::Authentication { .. }
                | Error::SessionExpired { .. }
                | Error::ServerUnavailable { .. }),
            ) => Err(e),
            Err(e) => {
                if !e.is_not_found() {
                    debug!(thing, shadow = %shadow, error = %e, "shadow fetch failed");
                }
                Ok(ShadowDocument::new())
            }
        }
    }

    // ── Resolution ───────────────────────────────────────────────────

    /// Walk things × shadows in order and return the first non-empty document.
    pub async fn resolve_shadow(
        &self,
        things: &[String],
        shadows: &[ShadowName],
        region: Option<&str>,
    ) -> Result<ShadowDocument, Error> {
        for thing in things.iter().filter(|t| !t.is_empty()) {
            for shadow in shadows {
                if self.shadow_tripped(thing, shadow) {
                    continue;
                }
                let doc = self.get_thing_shadow(thing, shadow, region).await?;
                if !doc.is_empty() {
                    debug!(thing = %thing, shadow = %shadow, keys = doc.len(), "shadow resolved");
                    return Ok(doc);
                }
            }
        }
        Ok(ShadowDocument::new())
    }

    /// Resolve the state document of a station.
    ///
    /// SC07-WX merges one hit from each of its three groups. Otherwise the
    /// priority list is tried, then the legacy names, then the owning
    /// user's thing.
    pub async fn get_station_shadow(
        &self,
        station: &StationIdentity,
    ) -> Result<ShadowDocument, Error> {
        let region = station.region.as_deref();
        let things = station_thing_names(station);

        if station.type_code == "SC07-WX" {
            let mut merged = ShadowDocument::new();
            for group in SC07_SHADOW_GROUPS {
                let doc = self
                    .resolve_shadow(&things, &expand(group, station), region)
                    .await?;
                merged.extend(doc);
            }
            if !merged.is_empty() {
                debug!(serial = %station.serial, keys = merged.len(), "merged SC07-WX shadows");
                return Ok(merged);
            }
        }

        let doc = self
            .resolve_shadow(&things, &expand(STATION_SHADOW_PRIORITY, station), region)
            .await?;
        if !doc.is_empty() {
            return Ok(doc);
        }

        let doc = self
            .resolve_shadow(&things, &expand(LEGACY_FALLBACK, station), region)
            .await?;
        if !doc.is_empty() {
            return Ok(doc);
        }

        if let Some(user_id) = station.user_id.as_deref().filter(|u| !u.is_empty()) {
            debug!(user_id, station_id = %station.station_id, "trying user thing for station");
            return self
                .resolve_shadow(
                    &[user_id.to_owned()],
                    &expand(USER_THING_STATION_SHADOWS, station),
                    region,
                )
                .await;
        }
        Ok(ShadowDocument::new())
    }

    /// Aggregate every WiFi shadow of a directly-connected device.
    ///
    /// Each name is tried on the primary thing and then on the bare
    /// serial. Known aliases are folded onto their canonical keys.
    pub async fn get_wifi_device_shadow(
        &self,
        station: &StationIdentity,
    ) -> Result<ShadowDocument, Error> {
        let region = station.region.as_deref();
        let thing = station_thing_name(&station.type_code, &station.serial);
        let alt_thing = station.serial.as_str();

        let mut aggregated = ShadowDocument::new();
        for shadow in expand(WIFI_SHADOWS, station) {
            let mut doc = self.get_thing_shadow(&thing, &shadow, region).await?;
            if doc.is_empty() && !alt_thing.is_empty() && alt_thing != thing {
                doc = self.get_thing_shadow(alt_thing, &shadow, region).await?;
            }
            if doc.is_empty() {
                continue;
            }
            debug!(thing = %thing, shadow = %shadow, keys = doc.len(), "WiFi shadow found");
            fold_wifi_shadow(&mut aggregated, doc);
        }
        Ok(aggregated)
    }

    /// Resolve a house document: house things first, then the owner's thing.
    pub async fn get_house_shadow(&self, house: &HouseIdentity) -> Result<ShadowDocument, Error> {
        let region = house.region.as_deref();
        let doc = self
            .resolve_shadow(
                &house_thing_names(house),
                &expand(HOUSE_SHADOWS, house),
                region,
            )
            .await?;
        if !doc.is_empty() {
            return Ok(doc);
        }

        match house.user_id.as_deref().filter(|u| !u.is_empty()) {
            Some(user_id) => {
                debug!(user_id, house_id = %house.house_id, "trying user thing for house");
                self.resolve_shadow(
                    &[user_id.to_owned()],
                    &expand(USER_THING_HOUSE_SHADOWS, house),
                    region,
                )
                .await
            }
            None => Ok(ShadowDocument::new()),
        }
    }

    /// Ask a station to push fresh temperature logs for `device_serials`.
    ///
    /// Returns whether the shadow update was accepted.
    pub async fn request_temp_data_sync(
        &self,
        station: &StationIdentity,
        device_serials: &[String],
    ) -> Result<bool, Error> {
        let iot = self.ensure_iot_credentials().await?;
        let region = self.shadow_region(station.region.as_deref())?;
        let thing = station_thing_name(&station.type_code, &station.serial);
        let url = self.shadow_url(&region, &thing, &ShadowName::named(TEMP_DATA_SHADOW))?;

        let payload = json!({
            "state": {
                "desired": {
                    "shadow": "appTempData",
                    "stationSN": station.serial,
                    "deviceSN": device_serials,
                    "source": "1",
                    "report": "1",
                    "reportDst": "",
                    "timeoutM": "5",
                }
            }
        })
        .to_string();

        let signed = Signer::new(iot.credentials.clone()).sign(&SignableRequest {
            method: "POST",
            url: &url,
            region: &region,
            service: IOT_DATA_SERVICE,
            payload: payload.as_bytes(),
        })?;

        let resp = self
            .http()
            .post(url)
            .headers(signed.to_header_map()?)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => {
                debug!(thing = %thing, devices = device_serials.len(), "temp data sync requested");
                Ok(true)
            }
            Ok(resp) => {
                warn!(thing = %thing, status = resp.status().as_u16(), "temp data sync rejected");
                Ok(false)
            }
            Err(e) => {
                warn!(thing = %thing, error = %e, "temp data sync failed");
                Ok(false)
            }
        }
    }
}

/// `state.reported` when present, otherwise the document itself.
fn unwrap_reported(document: Value) -> ShadowDocument {
    match document {
        Value::Object(mut root) => {
            let reported = root
                .get_mut("state")
                .and_then(|s| s.get_mut("reported"))
                .map(Value::take);
            match reported {
                Some(Value::Object(reported)) => reported,
                _ => root,
            }
        }
        _ => ShadowDocument::new(),
    }
}

fn first_present<'a>(doc: &'a ShadowDocument, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| doc.get(*k))
        .find(|v| !v.is_null())
}

fn fold_wifi_shadow(aggregated: &mut ShadowDocument, doc: ShadowDocument) {
    let co_ppm = first_present(&doc, &["coPpm", "co"]).cloned();
    let co_level = doc.get("coLevel").cloned();
    let temperature = first_present(&doc, &["temperature", "temp"]).cloned();
    let humidity = first_present(&doc, &["humidity", "humi"]).cloned();
    let battery = first_present(&doc, &["batInfo", "battery"]).cloned();
    let status = doc.get("status").and_then(Value::as_object).cloned();

    aggregated.extend(doc);
    if let Some(status) = status {
        aggregated.extend(status);
    }
    for (key, value) in [
        ("coPpm", co_ppm),
        ("coLevel", co_level),
        ("temperature", temperature),
        ("humidity", humidity),
        ("batInfo", battery),
    ] {
        if let Some(v) = value {
            aggregated.insert(key.into(), v);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reported_state_is_unwrapped() {
        let doc = unwrap_reported(json!({"state": {"reported": {"devs": {}}}, "version": 3}));
        assert!(doc.contains_key("devs"));
        assert!(!doc.contains_key("version"));
    }

    #[test]
    fn flat_document_is_kept() {
        let doc = unwrap_reported(json!({"wifiRssi": "-50"}));
        assert_eq!(doc.get("wifiRssi"), Some(&json!("-50")));
        assert!(unwrap_reported(json!([1, 2])).is_empty());
    }

    #[test]
    fn wifi_aliases_are_folded() {
        let mut agg = ShadowDocument::new();
        let doc = json!({"co": 12, "temp": "21.5", "battery": "3", "status": {"alarmStatus": "1"}})
            .as_object()
            .cloned()
            .unwrap();
        fold_wifi_shadow(&mut agg, doc);
        assert_eq!(agg.get("coPpm"), Some(&json!(12)));
        assert_eq!(agg.get("temperature"), Some(&json!("21.5")));
        assert_eq!(agg.get("batInfo"), Some(&json!("3")));
        assert_eq!(agg.get("alarmStatus"), Some(&json!("1")));
    }

    #[test]
    fn breaker_key_uses_default_label() {
        assert_eq!(breaker_key("T1", &ShadowName::Classic), "T1:default");
        assert_eq!(breaker_key("T1", &ShadowName::named("2nd_systime")), "T1:2nd_systime");
    }
}
