// ── Realtime message dispatch ──
//
// Folds one inbound MQTT message into the DataStore. The topic decides
// the handler; every device touched gets exactly one merge (and so one
// observer notification). Temperature-log announcements that carry no
// readings are handed back to the controller as a follow-up fetch.

use serde_json::{Map, Value};
use tracing::{debug, trace};
use xsense_api::realtime::topics::{TopicKind, classify, thing_of};

use crate::sanitize::lift_status;
use crate::store::DataStore;

/// Keys of a WiFi `reported` document that never name a device.
const NON_DEVICE_KEYS: &[&str] = &[
    "stationSN", "stationSn", "deviceSN", "devs", "wifiRSSI", "wifiRssi", "type", "sw", "deleted",
];

/// Work the controller should do after a message was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    None,
    /// Re-fetch the station's shadow (debounced) and merge `serials`, or
    /// every device in it when `serials` is `None`.
    TempDataRefresh {
        station_id: String,
        serials: Option<Vec<String>>,
    },
}

/// Apply one message. Unparseable payloads are ignored.
pub fn handle_message(store: &DataStore, topic: &str, payload: &[u8]) -> Followup {
    let message: Map<String, Value> = match serde_json::from_slice(payload) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            debug!(topic, bytes = payload.len(), "ignoring non-object realtime payload");
            return Followup::None;
        }
    };
    store.mark_realtime_event();

    let kind = classify(topic);
    trace!(topic, %kind, "realtime message");
    match kind {
        TopicKind::Event => {
            handle_event(store, message);
            Followup::None
        }
        TopicKind::WifiShadow => {
            handle_wifi_shadow(store, &message);
            Followup::None
        }
        TopicKind::TempDataLog => handle_temp_data_log(store, topic, &message),
        TopicKind::ShadowUpdate => {
            handle_shadow_update(store, topic, &message);
            Followup::None
        }
    }
}

fn reported(message: &Map<String, Value>) -> Option<&Map<String, Value>> {
    message
        .get("state")?
        .get("reported")
        .and_then(Value::as_object)
}

fn str_of<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn station_serial(reported: &Map<String, Value>) -> Option<&str> {
    str_of(reported, &["stationSN", "stationSn"])
}

// ── Event topics ─────────────────────────────────────────────────────

/// Flat alarm payload keyed by `deviceSN`; merged as-is.
fn handle_event(store: &DataStore, data: Map<String, Value>) {
    let Some(serial) = str_of(&data, &["deviceSN"]).map(str::to_owned) else {
        return;
    };
    let Some(device) = store.device_by_serial(&serial) else {
        trace!(serial = %serial, "event for unknown device");
        return;
    };
    debug!(
        serial = %serial,
        event = data.get("event").and_then(serde_json::Value::as_str).unwrap_or("update"),
        "realtime event"
    );
    store.merge_device(&device.id, data);
}

// ── WiFi device shadows ──────────────────────────────────────────────

fn handle_wifi_shadow(store: &DataStore, message: &Map<String, Value>) {
    let Some(reported) = reported(message) else {
        return;
    };

    if let Some(devs) = reported.get("devs").and_then(Value::as_object) {
        for (serial, data) in devs {
            let Some(device) = store.device_by_serial(serial) else {
                continue;
            };
            let Some(data) = data.as_object() else {
                continue;
            };
            store.merge_device(&device.id, wifi_update(data));
        }
        if let (Some(sn), Some(rssi)) = (station_serial(reported), reported.get("wifiRSSI")) {
            if let Some(station) = store.station_by_serial(sn) {
                let mut update = Map::new();
                update.insert("wifiRssi".into(), rssi.clone());
                store.merge_station(&station.id, update);
            }
        }
        return;
    }

    // Device nested under its own serial.
    let nested = reported.iter().find(|(key, value)| {
        !NON_DEVICE_KEYS.contains(&key.as_str())
            && value
                .as_object()
                .is_some_and(|v| v.contains_key("type") || v.contains_key("batInfo"))
    });
    if let Some((key, Value::Object(data))) = nested {
        let device = store.device_by_serial(key).or_else(|| {
            str_of(data, &["stationSN"]).and_then(|sn| store.device_by_serial(sn))
        });
        match device {
            Some(device) => {
                store.merge_device(&device.id, wifi_update(data));
            }
            None => debug!(serial = %key, "WiFi device not in cache"),
        }
        return;
    }

    // Flat document for the device itself.
    let Some(serial) = str_of(reported, &["deviceSN"]).or_else(|| station_serial(reported)) else {
        return;
    };
    let Some(device) = store.device_by_serial(serial) else {
        return;
    };
    store.merge_device(&device.id, wifi_update(reported));
}

/// Device update from any WiFi shadow layout: `status` lifted and
/// `wifiRSSI` spelled `wifiRssi`.
fn wifi_update(data: &Map<String, Value>) -> Map<String, Value> {
    let mut update = data.clone();
    lift_status(&mut update);
    if let Some(rssi) = update.remove("wifiRSSI") {
        update.entry("wifiRssi").or_insert(rssi);
    }
    update
}

// ── Temperature logs ─────────────────────────────────────────────────

fn handle_temp_data_log(store: &DataStore, topic: &str, message: &Map<String, Value>) -> Followup {
    let Some(reported) = reported(message) else {
        return Followup::None;
    };

    if let Some(entries) = reported.get("data").and_then(Value::as_array) {
        let applied = entries
            .iter()
            .filter_map(Value::as_object)
            .filter(|entry| apply_temp_entry(store, entry))
            .count();
        if applied > 0 {
            return Followup::None;
        }
    }

    let station = station_serial(reported)
        .and_then(|sn| store.station_by_serial(sn))
        .or_else(|| thing_of(topic).and_then(|thing| store.station_by_thing(thing)));
    let Some(station) = station else {
        return Followup::None;
    };

    let serials = reported
        .get("deviceSnList")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        });
    Followup::TempDataRefresh {
        station_id: station.id.clone(),
        serials,
    }
}

/// Merge the newest `time,temp,hum` sample of one log entry.
fn apply_temp_entry(store: &DataStore, entry: &Map<String, Value>) -> bool {
    let Some(serial) = str_of(entry, &["deviceSN", "deviceSn"]) else {
        return false;
    };
    let Some(samples) = entry
        .iter()
        .find(|(key, _)| key.len() == 8 && key.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|(_, value)| value.as_array())
    else {
        return false;
    };
    let Some((temperature, humidity)) = samples
        .last()
        .and_then(Value::as_str)
        .and_then(parse_sample)
    else {
        debug!(serial, "unparseable temperature sample");
        return false;
    };
    let Some(device) = store.device_by_serial(serial) else {
        debug!(serial, "temperature data for unknown device");
        return false;
    };

    let mut update = Map::new();
    update.insert("temperature".into(), Value::from(temperature));
    update.insert("humidity".into(), Value::from(humidity));
    update.insert(
        "lastTempUpdate".into(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    store.merge_device(&device.id, update);
    true
}

fn parse_sample(sample: &str) -> Option<(f64, f64)> {
    let mut parts = sample.split(',');
    let (_time, temperature, humidity) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    Some((temperature.trim().parse().ok()?, humidity.trim().parse().ok()?))
}

// ── Generic shadow updates ───────────────────────────────────────────

/// `state.reported.devs` fan-out. Every listed device is moved under the
/// reporting station; updates from an unknown station are dropped.
fn handle_shadow_update(store: &DataStore, topic: &str, message: &Map<String, Value>) {
    let Some(reported) = reported(message) else {
        return;
    };
    let Some(devs) = reported.get("devs").and_then(Value::as_object) else {
        return;
    };

    let station = station_serial(reported)
        .and_then(|sn| store.station_by_serial(sn))
        .or_else(|| thing_of(topic).and_then(|thing| store.station_by_thing(thing)));
    let Some(station) = station else {
        debug!(topic, devices = devs.len(), "devs update from unknown station");
        return;
    };

    for (serial, data) in devs {
        let Some(device) = store.device_by_serial(serial) else {
            continue;
        };
        let Some(mut update) = data.as_object().cloned() else {
            continue;
        };
        if device.station_id != station.id {
            debug!(serial = %serial, from = %device.station_id, to = %station.id, "device moved");
        }
        trace!(serial = %serial, station_id = %station.id, "devs update");
        lift_status(&mut update);
        store.merge_device_from_station(&device.id, &station, update);
    }
}

/// Apply a resolved station shadow's `devs` map, limited to `serials`
/// when given. Returns the number of devices merged.
pub(crate) fn apply_devs(
    store: &DataStore,
    doc: &Map<String, Value>,
    serials: Option<&[String]>,
    notify: bool,
) -> usize {
    let Some(devs) = doc.get("devs").and_then(Value::as_object) else {
        return 0;
    };
    let mut merged = 0;
    for (serial, data) in devs {
        if serials.is_some_and(|wanted| !wanted.iter().any(|w| w.eq_ignore_ascii_case(serial))) {
            continue;
        }
        let Some(device) = store.device_by_serial(serial) else {
            continue;
        };
        let Some(mut update) = data.as_object().cloned() else {
            continue;
        };
        lift_status(&mut update);
        let applied = if notify {
            store.merge_device(&device.id, update)
        } else {
            store.merge_device_quiet(&device.id, update)
        };
        merged += usize::from(applied.is_some());
    }
    merged
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::{Device, House, Station};

    fn store() -> DataStore {
        let store = DataStore::new();
        store.insert_house(House {
            id: "H1".into(),
            name: "Home".into(),
            user_id: Some("U1".into()),
            mqtt_region: Some("eu-central-1".into()),
            mqtt_server: None,
            fields: Map::new(),
        });
        let hub = Station {
            id: "ST1".into(),
            serial: "14998680".into(),
            type_code: "SBS50".into(),
            name: "Hub".into(),
            house_id: "H1".into(),
            user_id: Some("U1".into()),
            fields: Map::new(),
        };
        for record in [
            json!({ "deviceId": "D1", "deviceSn": "ABCDEF01", "deviceType": "XS01-M", "batInfo": "2", "rfLevel": "3" }),
            json!({ "deviceId": "D2", "deviceSn": "00000003", "deviceType": "STH51" }),
        ] {
            let device = Device::from_record(record.as_object().unwrap(), &hub).unwrap();
            store.insert_device(device);
        }
        store.insert_station(hub);

        let wifi = Station {
            id: "ST2".into(),
            serial: "0054253D".into(),
            type_code: "XS01-WX".into(),
            name: "Attic".into(),
            house_id: "H1".into(),
            user_id: None,
            fields: Map::new(),
        };
        store.insert_device(Device::from_wifi_station(&wifi));
        store.insert_station(wifi);
        store
    }

    fn record_updates(store: &DataStore) -> (Arc<Mutex<Vec<String>>>, crate::store::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = store.on_update(Arc::new(move |event| {
            if let Some(device) = event.device() {
                sink.lock().unwrap().push(device.id.clone());
            }
        }));
        (seen, sub)
    }

    fn bytes(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    #[test]
    fn devs_update_touches_only_battery() {
        let store = store();
        let (seen, _sub) = record_updates(&store);
        let before = store.device("D1").unwrap();

        let followup = handle_message(
            &store,
            "$aws/things/SBS5014998680/shadow/name/2nd_mainpage/update",
            &bytes(&json!({ "state": { "reported": { "devs": { "ABCDEF01": { "batInfo": "3" } } } } })),
        );

        assert_eq!(followup, Followup::None);
        let after = store.device("D1").unwrap();
        assert_eq!(after.battery(), Some(3));
        let mut expected = before.fields.clone();
        expected.insert("batInfo".into(), json!(3));
        assert_eq!(after.fields, expected);
        assert_eq!(after.station_id, "ST1");
        assert_eq!(*seen.lock().unwrap(), vec!["D1".to_owned()]);
    }

    #[test]
    fn event_topic_merges_flat_payload() {
        let store = store();
        let (seen, _sub) = record_updates(&store);
        handle_message(
            &store,
            "@xsense/events/safealarm/H1",
            &bytes(&json!({ "deviceSN": "ABCDEF01", "alarmStatus": "1", "event": "alarm_triggered" })),
        );
        let device = store.device("D1").unwrap();
        assert!(device.is_alarming());
        assert_eq!(device.fields["event"], "alarm_triggered");
        assert_eq!(seen.lock().unwrap().len(), 1);

        handle_message(&store, "@xsense/events/house/H1", &bytes(&json!({ "alarmStatus": 1 })));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn wifi_flat_shadow_maps_rssi() {
        let store = store();
        handle_message(
            &store,
            "$aws/things/XS01-WX0054253D/shadow/name/mainpage/update/accepted",
            &bytes(&json!({ "state": { "reported": { "stationSN": "0054253D", "wifiRSSI": "-55", "onLine": "1" } } })),
        );
        let device = store.device("ST2").unwrap();
        assert_eq!(device.wifi_rssi(), Some(-55));
        assert_eq!(device.online(), Some(true));
    }

    #[test]
    fn wifi_nested_shadow_uses_serial_key() {
        let store = store();
        let (seen, _sub) = record_updates(&store);
        handle_message(
            &store,
            "$aws/things/XS01-WX0054253D/shadow/name/pwordup/update",
            &bytes(&json!({ "state": { "reported": {
                "sw": "1.0",
                "0054253D": { "type": "XS01-WX", "batInfo": "1", "isLifeEnd": "0" }
            } } })),
        );
        let device = store.device("ST2").unwrap();
        assert_eq!(device.battery(), Some(1));
        assert_eq!(device.fields["isLifeEnd"], false);
        assert_eq!(*seen.lock().unwrap(), vec!["ST2".to_owned()]);
    }

    #[test]
    fn wifi_devs_shadow_maps_rssi() {
        let store = store();
        handle_message(
            &store,
            "$aws/things/XS01-WX0054253D/shadow/name/mainpage/update",
            &bytes(&json!({ "state": { "reported": {
                "stationSN": "0054253D",
                "devs": { "0054253D": { "wifiRSSI": "-67", "batInfo": "2", "status": { "a": "0" } } }
            } } })),
        );
        let device = store.device("ST2").unwrap();
        assert_eq!(device.wifi_rssi(), Some(-67));
        assert_eq!(device.battery(), Some(2));
        assert_eq!(device.alarm_status(), Some(0));
        assert!(!device.fields.contains_key("wifiRSSI"));
    }

    #[test]
    fn devs_update_reparents_device_to_reporting_station() {
        let store = store();
        store.insert_station(Station {
            id: "ST3".into(),
            serial: "22223333".into(),
            type_code: "SBS50".into(),
            name: "Garage".into(),
            house_id: "H2".into(),
            user_id: None,
            fields: Map::new(),
        });
        let (seen, _sub) = record_updates(&store);

        handle_message(
            &store,
            "$aws/things/SBS5022223333/shadow/name/2nd_mainpage/update",
            &bytes(&json!({ "state": { "reported": { "devs": { "ABCDEF01": { "batInfo": "1" } } } } })),
        );

        let device = store.device("D1").unwrap();
        assert_eq!(device.station_id, "ST3");
        assert_eq!(device.house_id, "H2");
        assert_eq!(device.battery(), Some(1));
        assert_eq!(store.devices_of_station("ST3").len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["D1".to_owned()]);
    }

    #[test]
    fn devs_update_from_unknown_station_is_dropped() {
        let store = store();
        let (seen, _sub) = record_updates(&store);
        handle_message(
            &store,
            "$aws/things/SBS5099999999/shadow/name/2nd_mainpage/update",
            &bytes(&json!({ "state": { "reported": { "devs": { "ABCDEF01": { "batInfo": "1" } } } } })),
        );
        let device = store.device("D1").unwrap();
        assert_eq!(device.battery(), Some(2));
        assert_eq!(device.station_id, "ST1");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn temp_log_with_samples_merges_latest() {
        let store = store();
        let followup = handle_message(
            &store,
            "$aws/things/SBS5014998680/shadow/name/2nd_tempdatalog/update",
            &bytes(&json!({ "state": { "reported": {
                "stationSN": "14998680",
                "data": [{ "deviceSN": "00000003", "type": "STH51",
                           "20260115": ["030500,18.4,51.2", "030600,18.6,50.9"] }]
            } } })),
        );
        assert_eq!(followup, Followup::None);
        let device = store.device("D2").unwrap();
        assert_eq!(device.temperature(), Some(18.6));
        assert_eq!(device.humidity(), Some(50.9));
    }

    #[test]
    fn temp_log_announcement_requests_refresh() {
        let store = store();
        let followup = handle_message(
            &store,
            "$aws/things/SBS5014998680/shadow/name/2nd_apptempdata/update",
            &bytes(&json!({ "state": { "reported": {
                "stationSN": "14998680", "deviceSnList": ["00000003"]
            } } })),
        );
        assert_eq!(
            followup,
            Followup::TempDataRefresh {
                station_id: "ST1".into(),
                serials: Some(vec!["00000003".into()]),
            }
        );
    }

    #[test]
    fn garbage_payload_is_ignored() {
        let store = store();
        assert_eq!(
            handle_message(&store, "$aws/things/x/shadow/update", b"not json"),
            Followup::None
        );
        assert!(store.last_realtime_event().is_none());
    }

    #[test]
    fn apply_devs_filters_serials() {
        let store = store();
        let doc = json!({ "devs": {
            "abcdef01": { "status": { "a": "1" } },
            "00000003": { "status": { "b": "20.5", "c": "40" } }
        } });
        let wanted = vec!["00000003".to_owned()];
        assert_eq!(apply_devs(&store, doc.as_object().unwrap(), Some(&wanted), true), 1);
        assert_eq!(store.device("D2").unwrap().temperature(), Some(20.5));
        assert_eq!(store.device("D1").unwrap().alarm_status(), None);

        assert_eq!(apply_devs(&store, doc.as_object().unwrap(), None, false), 2);
        assert_eq!(store.device("D1").unwrap().alarm_status(), Some(1));
    }
}
