// IoT thing-shadow data plane: candidate tables and signed fetches.

pub mod candidates;
mod fetch;

pub use candidates::{
    HouseIdentity, ShadowName, StationIdentity, is_wifi_type, station_thing_name,
    station_thing_names, house_thing_names,
};
pub use fetch::{SHADOW_FAILURE_THRESHOLD, ShadowDocument, TEMP_DATA_SHADOW};
