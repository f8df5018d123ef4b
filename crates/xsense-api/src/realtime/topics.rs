// MQTT topic vocabulary
//
// Subscription matrices per house and per station class, topic
// classification for inbound messages, and outbound command payloads.
// Topic strings must match the vendor broker verbatim.

use serde_json::{Map, Value, json};

use crate::shadow::{StationIdentity, is_wifi_type, station_thing_name};

/// Named-shadow update topic.
pub fn shadow_update(thing: &str, shadow: &str) -> String {
    format!("$aws/things/{thing}/shadow/name/{shadow}/update")
}

/// Classic (unnamed) shadow update topic.
pub fn classic_update(thing: &str) -> String {
    format!("$aws/things/{thing}/shadow/update")
}

/// Ordered topic list without duplicates.
#[derive(Debug, Default)]
struct TopicSet(Vec<String>);

impl TopicSet {
    fn push(&mut self, topic: String) {
        if !topic.is_empty() && !self.0.contains(&topic) {
            self.0.push(topic);
        }
    }

    fn shadow(&mut self, thing: &str, shadow: &str, suffixes: &[&str]) {
        let base = shadow_update(thing, shadow);
        for suffix in suffixes {
            self.push(format!("{base}{suffix}"));
        }
    }
}

const PLAIN: &[&str] = &[""];
const ACCEPTED: &[&str] = &["", "/accepted"];
const ACCEPTED_DELTA: &[&str] = &["", "/accepted", "/delta"];

// ── Subscription matrices ────────────────────────────────────────────

/// House-wide topics. Owner topics are added once the owner id is known.
pub fn house_topics(house_id: &str, owner_id: Option<&str>) -> Vec<String> {
    let mut topics = TopicSet::default();
    topics.push(format!("@xsense/events/+/{house_id}"));
    topics.push(shadow_update(house_id, "+"));

    if let Some(owner) = owner_id.filter(|o| !o.is_empty()) {
        topics.push(shadow_update(owner, house_id));
        topics.push(shadow_update(owner, &format!("house_{house_id}")));
        topics.push(shadow_update(owner, "+"));
        topics.push(classic_update(owner));
    }
    topics.0
}

/// Topics for one station, chosen by device class.
///
/// WiFi devices listen on their own thing. RF stations listen under the
/// owning user plus the station thing and the vendor event families;
/// without an owner id an RF station has no subscriptions.
pub fn station_topics(station: &StationIdentity) -> Vec<String> {
    let thing = station_thing_name(&station.type_code, &station.serial);
    if is_wifi_type(&station.type_code) && !thing.is_empty() {
        return wifi_station_topics(&station.type_code, &thing);
    }
    rf_station_topics(station, &thing)
}

fn wifi_station_topics(type_code: &str, thing: &str) -> Vec<String> {
    let mut topics = TopicSet::default();
    if type_code.ends_with("-WX") {
        topics.shadow(thing, "mainpage", ACCEPTED_DELTA);
        topics.shadow(thing, "pwordup", ACCEPTED);
        topics.shadow(thing, "muteup", ACCEPTED);
        topics.shadow(thing, "2nd_systime", PLAIN);
        topics.shadow(thing, "2nd_alarm_status", ACCEPTED);
        topics.shadow(thing, "alarm_status", ACCEPTED);
        topics.shadow(thing, "2nd_sensor_data", ACCEPTED);
        topics.shadow(thing, "sensor_data", PLAIN);
        topics.push(classic_update(thing));
        topics.push(shadow_update(thing, "+"));
    }
    topics.shadow(thing, "mainpage", ACCEPTED_DELTA);
    topics.shadow(thing, "pwordup", PLAIN);
    topics.shadow(thing, "muteup", PLAIN);
    topics.shadow(thing, "2nd_systime", PLAIN);
    topics.push(classic_update(thing));
    topics.push(shadow_update(thing, "+"));
    topics.0
}

fn rf_station_topics(station: &StationIdentity, thing: &str) -> Vec<String> {
    let mut topics = TopicSet::default();
    let Some(owner) = station.user_id.as_deref().filter(|o| !o.is_empty()) else {
        return topics.0;
    };

    topics.push(shadow_update(owner, &station.station_id));
    topics.push(shadow_update(owner, &station.serial));
    if !thing.is_empty() {
        topics.shadow(thing, "2nd_systime", ACCEPTED_DELTA);
        topics.shadow(thing, "2nd_mainpage", ACCEPTED_DELTA);
        topics.shadow(thing, "2nd_tempdatalog", PLAIN);
        topics.shadow(thing, "2nd_apptempdata", PLAIN);
        topics.shadow(thing, "2nd_extendmuteup", PLAIN);
        topics.shadow(thing, "2nd_extendalarm", PLAIN);
        topics.shadow(thing, "2nd_device_info", ACCEPTED_DELTA);
        topics.push(shadow_update(thing, "+"));
    }
    topics.push(shadow_update(owner, &format!("station_{}", station.station_id)));
    topics.push(shadow_update(owner, "+"));
    topics.push(classic_update(owner));

    if !station.house_id.is_empty() {
        for family in [
            "house",
            "safealarm",
            "shareadd",
            "shareupt",
            "lampgroup",
            "lampsched",
            "securityplan",
        ] {
            topics.push(format!("@xsense/events/{family}/{}", station.house_id));
        }
    }

    if !thing.is_empty() && !station.serial.is_empty() {
        let sn = &station.serial;
        topics.push(format!("@xsense/events/tempcleanlog/{sn}"));
        topics.push(format!("@xsense/events/master/{sn}"));
        topics.push(format!("@claybox/events/sospush/{sn}"));
        topics.push(format!("@claybox/events/keyboard/{sn}"));
    }
    topics.0
}

/// Topics on a legacy username/password broker.
pub fn legacy_topics(house_id: &str, station_id: &str) -> Vec<String> {
    vec![
        format!("house/{house_id}/event"),
        format!("house/{house_id}/shadow/+/update"),
        format!("house/{house_id}/presence/station/{station_id}"),
    ]
}

// ── Inbound classification ───────────────────────────────────────────

/// How an inbound message is folded into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TopicKind {
    /// Direct WiFi device shadows (`mainpage`, `pwordup`, `2nd_systime`, `muteup`).
    WifiShadow,
    /// Temperature log announcement; triggers a debounced re-fetch.
    TempDataLog,
    /// Vendor event families; flat payload, highest priority.
    Event,
    /// Any other shadow update; `state.reported.devs` fan-out.
    ShadowUpdate,
}

/// Classify an inbound topic.
pub fn classify(topic: &str) -> TopicKind {
    const WIFI: [&str; 4] = [
        "/shadow/name/mainpage",
        "/shadow/name/pwordup",
        "/shadow/name/2nd_systime",
        "/shadow/name/muteup",
    ];
    const TEMP_LOG: [&str; 2] = ["/shadow/name/2nd_tempdatalog", "/shadow/name/2nd_apptempdata"];

    if WIFI.iter().any(|p| topic.contains(p)) {
        TopicKind::WifiShadow
    } else if TEMP_LOG.iter().any(|p| topic.contains(p)) {
        TopicKind::TempDataLog
    } else if topic.starts_with("@xsense/events/") || topic.starts_with("@claybox/events/") {
        TopicKind::Event
    } else {
        TopicKind::ShadowUpdate
    }
}

/// Thing name of a `$aws/things/{thing}/shadow/...` topic.
pub fn thing_of(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix("$aws/things/")?;
    let (thing, tail) = rest.split_once('/')?;
    (tail.starts_with("shadow") && !thing.is_empty()).then_some(thing)
}

// ── Outbound commands ────────────────────────────────────────────────

/// A QoS 1 publish on the owning house's connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub topic: String,
    pub payload: Value,
}

/// Device classes muted through the `mutekey` shadow.
pub const MUTE_KEY_TYPES: [&str; 2] = ["SC07-WX", "XC01-WX"];

/// Silence a sounding alarm.
pub fn mute_command(owner_id: &str, device_type: &str, device_serial: &str) -> Outbound {
    if MUTE_KEY_TYPES.contains(&device_type) {
        Outbound {
            topic: shadow_update(owner_id, "mutekey"),
            payload: json!({ "state": { "desired": { "mute": "1" } } }),
        }
    } else {
        Outbound {
            topic: shadow_update(owner_id, "2nd_muteup"),
            payload: json!({
                "state": { "desired": { "muteStatus": "1", "deviceSN": device_serial } }
            }),
        }
    }
}

/// Trigger a device self-test.
pub fn self_test_command(owner_id: &str, wifi: bool, device_serial: &str) -> Outbound {
    let shadow = if wifi { "selftestup" } else { "2nd_selftestup" };
    Outbound {
        topic: shadow_update(owner_id, shadow),
        payload: json!({
            "state": { "desired": { "selfTest": "1", "deviceSN": device_serial } }
        }),
    }
}

/// Write station settings into its `2nd_info_{sn}` shadow.
pub fn config_command(owner_id: &str, station_serial: &str, config: Map<String, Value>) -> Outbound {
    Outbound {
        topic: shadow_update(owner_id, &format!("2nd_info_{station_serial}")),
        payload: json!({ "state": { "desired": config } }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rf_station() -> StationIdentity {
        StationIdentity {
            station_id: "ST1".into(),
            serial: "14998680".into(),
            type_code: "SBS50".into(),
            house_id: "H1".into(),
            user_id: Some("U1".into()),
            region: None,
        }
    }

    #[test]
    fn house_matrix_with_owner() {
        insta::assert_json_snapshot!(house_topics("H1", Some("U1")), @r#"
        [
          "@xsense/events/+/H1",
          "$aws/things/H1/shadow/name/+/update",
          "$aws/things/U1/shadow/name/H1/update",
          "$aws/things/U1/shadow/name/house_H1/update",
          "$aws/things/U1/shadow/name/+/update",
          "$aws/things/U1/shadow/update"
        ]
        "#);
    }

    #[test]
    fn house_matrix_without_owner_has_no_user_topics() {
        assert_eq!(house_topics("H1", None).len(), 2);
    }

    #[test]
    fn rf_matrix_covers_owner_station_and_events() {
        let topics = station_topics(&rf_station());
        assert_eq!(topics[0], "$aws/things/U1/shadow/name/ST1/update");
        assert!(topics.contains(&"$aws/things/SBS5014998680/shadow/name/2nd_mainpage/update/delta".to_owned()));
        assert!(topics.contains(&"$aws/things/SBS5014998680/shadow/name/2nd_tempdatalog/update".to_owned()));
        assert!(topics.contains(&"@xsense/events/safealarm/H1".to_owned()));
        assert!(topics.contains(&"@claybox/events/keyboard/14998680".to_owned()));
        assert!(!topics.iter().any(|t| t == "+" || t.ends_with("/#")));
    }

    #[test]
    fn rf_without_owner_subscribes_nothing() {
        let mut station = rf_station();
        station.user_id = None;
        assert!(station_topics(&station).is_empty());
    }

    #[test]
    fn wifi_matrix_uses_device_thing() {
        let station = StationIdentity {
            serial: "00AA".into(),
            type_code: "SC07-WX".into(),
            ..StationIdentity::default()
        };
        let topics = station_topics(&station);
        assert_eq!(topics[0], "$aws/things/SC07-WX-00AA/shadow/name/mainpage/update");
        assert!(topics.contains(&"$aws/things/SC07-WX-00AA/shadow/name/muteup/update/accepted".to_owned()));
        let mut unique = topics.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), topics.len());
    }

    #[test]
    fn classification() {
        assert_eq!(classify("$aws/things/SC07-WX-1/shadow/name/mainpage/update"), TopicKind::WifiShadow);
        assert_eq!(classify("$aws/things/SC07-WX-1/shadow/name/muteup/update/accepted"), TopicKind::WifiShadow);
        assert_eq!(classify("$aws/things/SBS501/shadow/name/2nd_tempdatalog/update"), TopicKind::TempDataLog);
        assert_eq!(classify("@claybox/events/sospush/1"), TopicKind::Event);
        assert_eq!(classify("$aws/things/U1/shadow/name/ST1/update"), TopicKind::ShadowUpdate);
        assert_eq!(classify("house/H1/shadow/x/update"), TopicKind::ShadowUpdate);
    }

    #[test]
    fn thing_extraction() {
        assert_eq!(thing_of("$aws/things/SBS501/shadow/name/2nd_mainpage/update"), Some("SBS501"));
        assert_eq!(thing_of("@xsense/events/house/H1"), None);
    }

    #[test]
    fn mute_payload_depends_on_class() {
        let wifi = mute_command("U1", "SC07-WX", "AA");
        assert_eq!(wifi.topic, "$aws/things/U1/shadow/name/mutekey/update");
        assert_eq!(wifi.payload, json!({"state": {"desired": {"mute": "1"}}}));

        let rf = mute_command("U1", "XS01-M", "AA");
        assert_eq!(rf.topic, "$aws/things/U1/shadow/name/2nd_muteup/update");
        assert_eq!(rf.payload["state"]["desired"]["deviceSN"], "AA");
    }

    #[test]
    fn config_targets_info_shadow() {
        let mut config = Map::new();
        config.insert("alarmVol".into(), json!("80"));
        let out = config_command("U1", "SN1", config);
        assert_eq!(out.topic, "$aws/things/U1/shadow/name/2nd_info_SN1/update");
        assert_eq!(out.payload, json!({"state": {"desired": {"alarmVol": "80"}}}));
    }
}
