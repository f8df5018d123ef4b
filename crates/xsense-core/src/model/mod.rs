// ── Domain model ──
//
// Normalized house, station and device records. Directory records from
// `xsense-api` are converted here; everything the vendor sends that has
// no dedicated field is carried in a flat `fields` map.

mod device;
mod house;
mod station;

pub use device::Device;
pub use house::House;
pub use station::Station;

use serde_json::{Map, Value};

/// First non-empty string (or number) under any of `keys`.
pub(crate) fn string_field(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Drop keys a record promotes to dedicated fields, so a serialized
/// record names each key once.
pub(crate) fn strip_promoted(fields: &mut Map<String, Value>, promoted: &[&str]) {
    fields.retain(|key, _| !promoted.contains(&key.as_str()));
}
