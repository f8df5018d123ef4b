//! Base station listing.

use std::sync::Arc;

use tabled::Tabled;
use xsense_core::{ClientConfig, Controller, Station};

use crate::cli::{GlobalOpts, StationsArgs};
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct StationRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    type_code: String,
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "House")]
    house: String,
    #[tabled(rename = "Link")]
    link: &'static str,
    #[tabled(rename = "Devices")]
    devices: usize,
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: ClientConfig,
    args: StationsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let snapshot = Controller::oneshot(config, |c| async move { c.get_all_devices().await }).await?;

    if let Some(ref house) = args.house {
        if !snapshot.houses.iter().any(|h| &h.id == house) {
            return Err(CliError::not_found("house", house, "houses"));
        }
    }
    let stations: Vec<Arc<Station>> = snapshot
        .stations
        .iter()
        .filter(|s| args.house.as_ref().is_none_or(|h| &s.house_id == h))
        .cloned()
        .collect();

    let house_name = |id: &str| {
        snapshot
            .houses
            .iter()
            .find(|h| h.id == id)
            .map_or_else(|| id.to_owned(), |h| h.name.clone())
    };
    let device_count = |station: &Station| {
        snapshot
            .devices
            .iter()
            .filter(|d| d.station_id == station.id)
            .count()
    };

    let out = output::render_list(
        &global.output,
        &stations,
        |s| StationRow {
            id: s.id.clone(),
            name: s.name.clone(),
            type_code: s.type_code.clone(),
            serial: s.serial.clone(),
            house: house_name(&s.house_id),
            link: if s.is_wifi() { "wifi" } else { "rf" },
            devices: device_count(s),
        },
        |s| s.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
