// ── Central reactive data store ──
//
// Thread-safe storage for houses, stations and devices.
// Field merges are additive and every device merge is announced to
// observers exactly once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use xsense_api::{HouseIdentity, StationIdentity};

use super::collection::EntityCollection;
use super::observer::{Observers, Subscription, UpdateCallback, UpdateEvent};
use crate::model::{Device, House, Station, strip_promoted};
use crate::sanitize::sanitize_update;

/// Authoritative in-memory cache of one account's directory and state.
pub struct DataStore {
    pub(crate) houses: EntityCollection<House>,
    pub(crate) stations: EntityCollection<Station>,
    pub(crate) devices: EntityCollection<Device>,
    observers: Arc<Observers>,
    last_full_refresh: watch::Sender<Option<DateTime<Utc>>>,
    last_realtime_event: watch::Sender<Option<DateTime<Utc>>>,
}

impl DataStore {
    pub fn new() -> Self {
        let (last_full_refresh, _) = watch::channel(None);
        let (last_realtime_event, _) = watch::channel(None);

        Self {
            houses: EntityCollection::new(),
            stations: EntityCollection::new(),
            devices: EntityCollection::new(),
            observers: Arc::new(Observers::new()),
            last_full_refresh,
            last_realtime_event,
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn houses_snapshot(&self) -> Arc<Vec<Arc<House>>> {
        self.houses.snapshot()
    }

    pub fn stations_snapshot(&self) -> Arc<Vec<Arc<Station>>> {
        self.stations.snapshot()
    }

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    // ── Single-entity lookups ────────────────────────────────────────

    pub fn house(&self, id: &str) -> Option<Arc<House>> {
        self.houses.get(id)
    }

    pub fn station(&self, id: &str) -> Option<Arc<Station>> {
        self.stations.get(id)
    }

    pub fn station_by_serial(&self, serial: &str) -> Option<Arc<Station>> {
        self.stations.get_by_serial(serial)
    }

    /// Station whose thing name (or bare serial) is `thing`.
    pub fn station_by_thing(&self, thing: &str) -> Option<Arc<Station>> {
        self.stations
            .snapshot()
            .iter()
            .find(|s| s.thing_name().eq_ignore_ascii_case(thing))
            .cloned()
            .or_else(|| self.station_by_serial(thing))
    }

    pub fn device(&self, id: &str) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    /// Device by serial, ignoring case.
    pub fn device_by_serial(&self, serial: &str) -> Option<Arc<Device>> {
        self.devices.get_by_serial(serial)
    }

    /// Device by id, falling back to serial.
    pub fn resolve_device(&self, id_or_serial: &str) -> Option<Arc<Device>> {
        self.device(id_or_serial)
            .or_else(|| self.device_by_serial(id_or_serial))
    }

    pub fn devices_of_station(&self, station_id: &str) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = self
            .devices
            .snapshot()
            .iter()
            .filter(|d| d.station_id == station_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        devices
    }

    /// Identity used for shadow lookups and topic matrices.
    ///
    /// The owner falls back to the house owner and the region comes from
    /// the house.
    pub fn station_identity(&self, station_id: &str) -> Option<StationIdentity> {
        let station = self.station(station_id)?;
        let house = self.house(&station.house_id);
        let mut identity = station.identity(house.as_ref().and_then(|h| h.mqtt_region.clone()));
        if identity.user_id.is_none() {
            identity.user_id = house.and_then(|h| h.user_id.clone());
        }
        Some(identity)
    }

    pub fn house_identity(&self, house_id: &str) -> Option<HouseIdentity> {
        self.house(house_id).map(|h| h.identity())
    }

    // ── Counts ───────────────────────────────────────────────────────

    pub fn house_count(&self) -> usize {
        self.houses.len()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.houses.is_empty()
    }

    // ── Directory writes ─────────────────────────────────────────────

    pub(crate) fn insert_house(&self, house: House) {
        self.houses.upsert(house.id.clone(), None, house);
    }

    pub(crate) fn insert_station(&self, station: Station) {
        let serial = Some(station.serial.clone());
        self.stations.upsert(station.id.clone(), serial, station);
    }

    pub(crate) fn insert_device(&self, device: Device) {
        let serial = Some(device.serial.clone());
        self.devices.upsert(device.id.clone(), serial, device);
    }

    /// Adopt the station owner as house owner.
    pub(crate) fn set_house_owner(&self, house_id: &str, user_id: &str) -> bool {
        let mut changed = false;
        self.houses.update(house_id, |house| {
            let mut next = house.clone();
            if next.user_id.as_deref() != Some(user_id) {
                next.user_id = Some(user_id.to_owned());
                changed = true;
            }
            next
        });
        changed
    }

    /// Drop every house, station and device.
    pub(crate) fn clear(&self) {
        self.devices.clear();
        self.stations.clear();
        self.houses.clear();
    }

    // ── Field merges ─────────────────────────────────────────────────

    /// Merge `update` into a device and notify observers once.
    ///
    /// Returns the merged record, or `None` if the device is unknown.
    pub fn merge_device(&self, id: &str, update: Map<String, Value>) -> Option<Arc<Device>> {
        let merged = self.merge_device_quiet(id, update)?;
        self.emit(&UpdateEvent::Device(Arc::clone(&merged)));
        Some(merged)
    }

    /// Merge `update` into a device reported by `station`, move the device
    /// under that station and notify observers once.
    pub(crate) fn merge_device_from_station(
        &self,
        id: &str,
        station: &Station,
        update: Map<String, Value>,
    ) -> Option<Arc<Device>> {
        let update = prepare(update, Device::PROMOTED_KEYS);
        let merged = self.devices.update(id, |device| {
            let mut next = device.clone();
            next.station_id.clone_from(&station.id);
            next.house_id.clone_from(&station.house_id);
            next.fields.extend(update);
            next
        })?;
        self.emit(&UpdateEvent::Device(Arc::clone(&merged)));
        Some(merged)
    }

    /// Merge without notifying observers.
    pub(crate) fn merge_device_quiet(
        &self,
        id: &str,
        update: Map<String, Value>,
    ) -> Option<Arc<Device>> {
        let update = prepare(update, Device::PROMOTED_KEYS);
        self.devices.update(id, |device| {
            let mut next = device.clone();
            next.fields.extend(update);
            next
        })
    }

    pub(crate) fn merge_station(
        &self,
        id: &str,
        update: Map<String, Value>,
    ) -> Option<Arc<Station>> {
        let update = prepare(update, Station::PROMOTED_KEYS);
        self.stations.update(id, |station| {
            let mut next = station.clone();
            next.fields.extend(update);
            next
        })
    }

    pub(crate) fn merge_house(&self, id: &str, update: Map<String, Value>) -> Option<Arc<House>> {
        let update = prepare(update, House::PROMOTED_KEYS);
        self.houses.update(id, |house| {
            let mut next = house.clone();
            next.fields.extend(update);
            next
        })
    }

    // ── Observers ────────────────────────────────────────────────────

    /// Register a callback for every update.
    pub fn on_update(&self, callback: UpdateCallback) -> Subscription {
        self.observers.register(callback)
    }

    /// Broadcast view of the same events, for async consumers.
    pub fn updates(&self) -> broadcast::Receiver<UpdateEvent> {
        self.observers.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn emit(&self, event: &UpdateEvent) {
        self.observers.emit(event);
    }

    pub(crate) fn clear_observers(&self) {
        self.observers.clear();
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub(crate) fn mark_full_refresh(&self) {
        self.last_full_refresh.send_replace(Some(Utc::now()));
    }

    pub(crate) fn mark_realtime_event(&self) {
        self.last_realtime_event.send_replace(Some(Utc::now()));
    }

    pub fn last_full_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_full_refresh.borrow()
    }

    pub fn last_realtime_event(&self) -> Option<DateTime<Utc>> {
        *self.last_realtime_event.borrow()
    }
}

/// Sanitize a field update and drop keys owned by dedicated fields.
fn prepare(update: Map<String, Value>, promoted: &[&str]) -> Map<String, Value> {
    let mut update = sanitize_update(update);
    strip_promoted(&mut update, promoted);
    update
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn seeded() -> DataStore {
        let store = DataStore::new();
        store.insert_house(House {
            id: "H1".into(),
            name: "Home".into(),
            user_id: Some("viewer".into()),
            mqtt_region: Some("eu-central-1".into()),
            mqtt_server: None,
            fields: Map::new(),
        });
        let station = Station {
            id: "ST1".into(),
            serial: "12345678".into(),
            type_code: "XH02-M".into(),
            name: "Hub".into(),
            house_id: "H1".into(),
            user_id: None,
            fields: Map::new(),
        };
        let device = Device::from_record(
            json!({ "deviceId": "D1", "deviceSn": "ABCDEF01", "deviceType": "XH02-M", "batInfo": "2", "rfLevel": "3" })
                .as_object()
                .unwrap(),
            &station,
        )
        .unwrap();
        store.insert_station(station);
        store.insert_device(device);
        store
    }

    fn update(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let store = seeded();
        let merged = store
            .merge_device("D1", update(json!({ "batInfo": "3", "temperature": null })))
            .unwrap();
        assert_eq!(merged.battery(), Some(3));
        assert_eq!(merged.rf_level(), Some(3));
        assert!(!merged.fields.contains_key("temperature"));
    }

    #[test]
    fn disjoint_merges_compose() {
        let a = update(json!({ "batInfo": "1" }));
        let b = update(json!({ "alarmStatus": "1", "isOpen": "true" }));

        let stepwise = seeded();
        stepwise.merge_device("D1", a.clone());
        stepwise.merge_device("D1", b.clone());

        let combined = seeded();
        let mut ab = a;
        ab.extend(b);
        combined.merge_device("D1", ab);

        assert_eq!(
            *stepwise.device("D1").unwrap(),
            *combined.device("D1").unwrap()
        );
    }

    #[test]
    fn merge_notifies_exactly_once() {
        let store = seeded();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = store.on_update(Arc::new(move |event| {
            if let Some(device) = event.device() {
                sink.lock().unwrap().push(device.battery());
            }
        }));

        store.merge_device("D1", update(json!({ "batInfo": 3 })));
        assert!(store.merge_device("missing", update(json!({ "batInfo": 3 }))).is_none());
        store.merge_device_quiet("D1", update(json!({ "batInfo": 1 })));

        assert_eq!(*seen.lock().unwrap(), vec![Some(3)]);
    }

    #[test]
    fn merges_never_shadow_dedicated_fields() {
        let store = seeded();
        let merged = store
            .merge_device(
                "D1",
                update(json!({ "stationId": "ST9", "deviceSn": "FFFF0000", "name": "x", "batInfo": 1 })),
            )
            .unwrap();
        assert_eq!(merged.station_id, "ST1");
        assert_eq!(merged.serial, "ABCDEF01");
        assert_eq!(merged.fields.keys().collect::<Vec<_>>(), vec!["batInfo", "rfLevel"]);

        let house = store
            .merge_house("H1", update(json!({ "houseName": "Other", "timezone": "UTC" })))
            .unwrap();
        assert_eq!(house.name, "Home");
        assert!(!house.fields.contains_key("houseName"));

        let station = store
            .merge_station("ST1", update(json!({ "stationSN": "12345678", "onLine": "1" })))
            .unwrap();
        assert_eq!(station.fields.keys().collect::<Vec<_>>(), vec!["onLine"]);
    }

    #[test]
    fn station_merge_reparents_device() {
        let store = seeded();
        let other = Station {
            id: "ST2".into(),
            serial: "87654321".into(),
            type_code: "SBS50".into(),
            name: "Garage".into(),
            house_id: "H2".into(),
            user_id: None,
            fields: Map::new(),
        };
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let _sub = store.on_update(Arc::new(move |_| *sink.lock().unwrap() += 1));

        let merged = store
            .merge_device_from_station("D1", &other, update(json!({ "batInfo": "1" })))
            .unwrap();
        assert_eq!(merged.station_id, "ST2");
        assert_eq!(merged.house_id, "H2");
        assert_eq!(merged.fields.keys().collect::<Vec<_>>(), vec!["batInfo", "rfLevel"]);
        assert_eq!(merged.battery(), Some(1));
        assert_eq!(*seen.lock().unwrap(), 1);
        assert!(store.merge_device_from_station("missing", &other, Map::new()).is_none());
    }

    #[test]
    fn identity_inherits_house_owner_and_region() {
        let store = seeded();
        let identity = store.station_identity("ST1").unwrap();
        assert_eq!(identity.user_id.as_deref(), Some("viewer"));
        assert_eq!(identity.region.as_deref(), Some("eu-central-1"));

        assert!(store.set_house_owner("H1", "owner"));
        assert!(!store.set_house_owner("H1", "owner"));
        assert_eq!(
            store.station_identity("ST1").unwrap().user_id.as_deref(),
            Some("owner")
        );
    }

    #[test]
    fn lookups_by_serial_and_thing() {
        let store = seeded();
        assert_eq!(store.device_by_serial("abcdef01").unwrap().id, "D1");
        assert_eq!(store.resolve_device("ABCDEF01").unwrap().id, "D1");
        assert_eq!(store.station_by_thing("XH02-M12345678").unwrap().id, "ST1");
        assert_eq!(store.station_by_thing("12345678").unwrap().id, "ST1");
        assert_eq!(store.devices_of_station("ST1").len(), 1);
    }

    #[test]
    fn clear_drops_directory() {
        let store = seeded();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.device_count(), 0);
        assert!(store.device_by_serial("ABCDEF01").is_none());
    }
}
