//! House listing and detail.

use std::sync::Arc;

use tabled::Tabled;
use xsense_core::{ClientConfig, Controller, House};

use crate::cli::{GlobalOpts, HousesArgs};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct HouseRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Stations")]
    stations: usize,
}

fn detail(house: &House) -> String {
    // Shadow fields vary per account; show scalars only.
    let extra: Vec<(String, String)> = house
        .fields
        .iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k.clone(), s.clone())),
            serde_json::Value::Number(_) | serde_json::Value::Bool(_) => {
                Some((k.clone(), v.to_string()))
            }
            _ => None,
        })
        .collect();

    let mut pairs = vec![
        ("ID", house.id.clone()),
        ("Name", house.name.clone()),
        ("Owner", util::opt(house.user_id.as_deref())),
        ("Region", util::opt(house.mqtt_region.as_deref())),
        ("Broker", util::opt(house.mqtt_server.as_deref())),
    ];
    pairs.extend(extra.iter().map(|(k, v)| (k.as_str(), v.clone())));
    output::detail_lines(&pairs)
}

pub async fn handle(
    config: ClientConfig,
    args: HousesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Some(house_id) = args.house {
        let house = Controller::oneshot(config, |c| async move {
            c.get_all_devices().await?;
            c.house_state(&house_id).await
        })
        .await?;
        let out = output::render_single(&global.output, &house, |h| detail(h), |h| h.id.clone())?;
        output::print_output(&out, global.quiet);
        return Ok(());
    }

    let snapshot = Controller::oneshot(config, |c| async move { c.get_all_devices().await }).await?;
    let count = |house: &Arc<House>| {
        snapshot
            .stations
            .iter()
            .filter(|s| s.house_id == house.id)
            .count()
    };
    let out = output::render_list(
        &global.output,
        &snapshot.houses,
        |h| HouseRow {
            id: h.id.clone(),
            name: h.name.clone(),
            region: util::opt(h.mqtt_region.as_deref()),
            stations: count(h),
        },
        |h| h.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
