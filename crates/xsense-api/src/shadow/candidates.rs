// Shadow-name candidate tables
//
// The vendor exposes device state under inconsistently named shadows
// on inconsistently named things, with no listing API. Resolution is a
// brute-force walk over these ordered tables. Each entry is a pure
// template function so the heuristic can be inspected and extended
// without touching the walk itself.

use std::fmt;

// ── Identities ───────────────────────────────────────────────────────

/// What the candidate generators need to know about a station.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationIdentity {
    pub station_id: String,
    pub serial: String,
    pub type_code: String,
    pub house_id: String,
    /// Owning user (shadow owner for RF stations).
    pub user_id: Option<String>,
    /// IoT region of the owning house.
    pub region: Option<String>,
}

/// What the candidate generators need to know about a house.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HouseIdentity {
    pub house_id: String,
    pub name: Option<String>,
    pub user_id: Option<String>,
    pub region: Option<String>,
}

// ── Shadow names ─────────────────────────────────────────────────────

/// A named shadow, or the classic unnamed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShadowName {
    Named(String),
    Classic,
}

impl ShadowName {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Value for the `name` query parameter; `None` for the classic shadow.
    pub fn as_query(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Classic => None,
        }
    }

    /// Label used in breaker keys and logs.
    pub fn label(&self) -> &str {
        self.as_query().unwrap_or("default")
    }
}

impl fmt::Display for ShadowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub type StationShadowTemplate = fn(&StationIdentity) -> Option<ShadowName>;
pub type HouseShadowTemplate = fn(&HouseIdentity) -> Option<ShadowName>;

fn named(name: &str) -> Option<ShadowName> {
    Some(ShadowName::named(name))
}

fn serial_suffixed(prefix: &str, station: &StationIdentity) -> Option<ShadowName> {
    (!station.serial.is_empty()).then(|| ShadowName::Named(format!("{prefix}{}", station.serial)))
}

fn non_empty(value: &str) -> Option<ShadowName> {
    (!value.is_empty()).then(|| ShadowName::named(value))
}

/// Station shadows in priority order; the classic shadow comes last.
pub const STATION_SHADOW_PRIORITY: &[StationShadowTemplate] = &[
    |_| named("2nd_mainpage"),
    |_| named("mainpage"),
    |_| named("2nd_systime"),
    |s| serial_suffixed("2nd_info_", s),
    |s| serial_suffixed("info_", s),
    |_| named("2nd_device_info"),
    |_| named("device_info"),
    |_| named("2nd_status"),
    |_| named("status"),
    |s| serial_suffixed("2nd_status_", s),
    |s| serial_suffixed("status_", s),
    |s| serial_suffixed("2nd_alarm_status_", s),
    |s| serial_suffixed("alarm_status_", s),
    |_| named("alarm_status"),
    |_| named("2nd_alarm_status"),
    |_| named("baseInfo"),
    |_| Some(ShadowName::Classic),
];

/// Fallback when the priority list found nothing.
pub const LEGACY_FALLBACK: &[StationShadowTemplate] =
    &[|_| named("baseInfo"), |_| Some(ShadowName::Classic)];

/// Shadows tried on the owning user's thing for a station.
pub const USER_THING_STATION_SHADOWS: &[StationShadowTemplate] = &[
    |s| non_empty(&s.station_id),
    |s| non_empty(&s.serial),
    |s| (!s.station_id.is_empty()).then(|| ShadowName::Named(format!("station_{}", s.station_id))),
    |s| serial_suffixed("station_", s),
    |_| named("2nd_systime"),
    |_| named("2nd_device_info"),
    |_| Some(ShadowName::Classic),
];

/// Shadows tried on house things.
pub const HOUSE_SHADOWS: &[HouseShadowTemplate] =
    &[|_| named("baseInfo"), |_| Some(ShadowName::Classic)];

/// Shadows tried on the owning user's thing for a house.
pub const USER_THING_HOUSE_SHADOWS: &[HouseShadowTemplate] = &[
    |h| non_empty(&h.house_id),
    |h| (!h.house_id.is_empty()).then(|| ShadowName::Named(format!("house_{}", h.house_id))),
    |_| Some(ShadowName::Classic),
];

/// Every shadow a directly-connected WiFi device may report into.
/// All hits are aggregated, not just the first.
pub const WIFI_SHADOWS: &[StationShadowTemplate] = &[
    |_| named("2nd_systime"),
    |s| serial_suffixed("2nd_info_", s),
    |s| serial_suffixed("info_", s),
    |s| serial_suffixed("mode_", s),
    |_| named("mode"),
    |_| named("2nd_alarm_status"),
    |s| serial_suffixed("2nd_alarm_status_", s),
    |_| named("alarm_status"),
    |s| serial_suffixed("alarm_status_", s),
    |_| named("2nd_sensor_data"),
    |s| serial_suffixed("2nd_sensor_data_", s),
    |_| named("sensor_data"),
    |s| serial_suffixed("sensor_", s),
    |s| serial_suffixed("2nd_status_", s),
    |_| named("2nd_status"),
    |_| named("status"),
    |_| named("mainpage"),
    |_| named("pwordup"),
];

/// SC07-WX splits its state across three groups; one hit per group is merged.
pub const SC07_SHADOW_GROUPS: &[&[StationShadowTemplate]] = &[
    &[|_| named("2nd_systime")],
    &[|s| serial_suffixed("2nd_info_", s)],
    &[
        |s| serial_suffixed("2nd_status_", s),
        |s| serial_suffixed("status_", s),
        |_| named("2nd_status"),
        |_| named("status"),
        |_| named("2nd_alarm_status"),
        |_| named("alarm_status"),
        |_| named("2nd_mainpage"),
        |_| named("mainpage"),
    ],
];

/// Apply templates in order, skipping inapplicable entries and duplicates.
pub fn expand<T>(templates: &[fn(&T) -> Option<ShadowName>], subject: &T) -> Vec<ShadowName> {
    let mut out: Vec<ShadowName> = Vec::with_capacity(templates.len());
    for template in templates {
        if let Some(name) = template(subject) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    out
}

// ── Device classes ───────────────────────────────────────────────────

/// Station categories that are themselves a single WiFi device.
pub const WIFI_DEVICE_TYPES: &[&str] = &[
    "SC07-WX", "XC01-WX", "XH02-WX", "XS01-WX", "XC04-WX", "XP0A-iR", "XP0A-MR", "XP0A",
    "SC01-WX", "SC04-WX", "XS0B-iR", "XS0B",
];

/// Exact-match WiFi classification of a station category.
pub fn is_wifi_type(type_code: &str) -> bool {
    WIFI_DEVICE_TYPES.contains(&type_code)
}

// ── Thing names ──────────────────────────────────────────────────────

type JoinTemplate = fn(&str, &str) -> String;

const TYPE_SERIAL_JOINS: &[JoinTemplate] = &[
    |t, s| format!("{t}{s}"),
    |t, s| format!("{t}_{s}"),
    |t, s| format!("{t}-{s}"),
    |t, s| format!("{t}SN{s}"),
    |t, s| format!("{t}_SN{s}"),
    |t, s| format!("{t}-SN-{s}"),
];

const PREFIX_JOINS: &[JoinTemplate] = &[
    |p, v| format!("{p}_{v}"),
    |p, v| format!("{p}-{v}"),
    |p, v| format!("{p}{v}"),
];

/// Primary thing name of a station.
///
/// `SBS10` hubs drop the type prefix; `SC07-WX` and `XC04-WX` join with
/// a dash; everything else concatenates type and serial.
pub fn station_thing_name(type_code: &str, serial: &str) -> String {
    match type_code {
        "SBS10" => serial.to_owned(),
        "SC07-WX" | "XC04-WX" => format!("{type_code}-{serial}"),
        _ => format!("{type_code}{serial}"),
    }
}

/// Ordered, de-duplicated candidate list.
#[derive(Debug, Default)]
struct Candidates(Vec<String>);

impl Candidates {
    fn add(&mut self, value: &str) {
        let trimmed = value.trim();
        if !trimmed.is_empty() && !self.0.iter().any(|n| n == trimmed) {
            self.0.push(trimmed.to_owned());
        }
    }

    fn add_variants(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        self.add(value);
        self.add(&value.to_lowercase());
        self.add(&value.to_uppercase());
    }
}

/// Thing-name candidates for a station, primary name first.
pub fn station_thing_names(station: &StationIdentity) -> Vec<String> {
    let mut names = Candidates::default();
    names.add(&station_thing_name(&station.type_code, &station.serial));

    let type_lower = station.type_code.to_lowercase();
    if !station.serial.is_empty() {
        for type_code in [station.type_code.as_str(), type_lower.as_str()] {
            if type_code.is_empty() {
                continue;
            }
            for join in TYPE_SERIAL_JOINS {
                names.add_variants(&join(type_code, &station.serial));
            }
        }
    }

    names.add_variants(&station.serial);
    names.add_variants(&station.station_id);

    for value in [&station.station_id, &station.serial] {
        if !value.is_empty() {
            for join in PREFIX_JOINS {
                names.add_variants(&join("station", value));
            }
        }
    }

    if !station.house_id.is_empty() {
        for value in [&station.station_id, &station.serial] {
            if !value.is_empty() {
                for join in PREFIX_JOINS {
                    names.add_variants(&join(&station.house_id, value));
                }
            }
        }
    }

    names.0
}

/// Thing-name candidates for a house.
pub fn house_thing_names(house: &HouseIdentity) -> Vec<String> {
    let mut names = Candidates::default();
    let id = house.house_id.as_str();
    if !id.is_empty() {
        for join in PREFIX_JOINS {
            names.add_variants(&join("house", id));
        }
        names.add_variants(id);
    }

    let name = house
        .name
        .as_deref()
        .map(|n| n.split_whitespace().collect::<Vec<_>>().join("_"))
        .unwrap_or_default();
    if !name.is_empty() {
        names.add_variants(&format!("house_{name}"));
        names.add_variants(&name);
    }
    names.0
}
