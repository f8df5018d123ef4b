//! Sensor listing and single-device sync.

use std::sync::Arc;

use tabled::Tabled;
use xsense_core::{ClientConfig, Controller, Device};

use crate::cli::{DevicesArgs, GlobalOpts, SyncArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    type_code: String,
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Alarm")]
    alarm: String,
    #[tabled(rename = "Temp")]
    temperature: String,
    #[tabled(rename = "Hum")]
    humidity: String,
    #[tabled(rename = "Online")]
    online: String,
}

impl DeviceRow {
    fn new(d: &Device, color: bool) -> Self {
        let alarm = util::opt(d.alarm_status());
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            type_code: d.type_code.clone(),
            serial: d.serial.clone(),
            battery: util::opt(d.battery()),
            alarm: output::paint_alarm(&alarm, d.is_alarming(), color),
            temperature: d.temperature().map(|t| format!("{t:.1}")).unwrap_or_default(),
            humidity: d.humidity().map(|h| format!("{h:.0}%")).unwrap_or_default(),
            online: util::yes_no(d.online()),
        }
    }
}

fn detail(d: &Device) -> String {
    output::detail_lines(&[
        ("ID", d.id.clone()),
        ("Name", d.name.clone()),
        ("Type", d.type_code.clone()),
        ("Serial", d.serial.clone()),
        ("Station", d.station_id.clone()),
        ("House", d.house_id.clone()),
        ("Battery", util::opt(d.battery())),
        ("Alarm", util::opt(d.alarm_status())),
        ("Muted", util::opt(d.mute_status())),
        ("Temperature", util::opt(d.temperature())),
        ("Humidity", util::opt(d.humidity())),
        ("CO ppm", util::opt(d.co_ppm())),
        ("Open", util::yes_no(d.is_open())),
        ("Moved", util::yes_no(d.is_moved())),
        ("Online", util::yes_no(d.online())),
        ("RF level", util::opt(d.rf_level())),
        ("WiFi RSSI", util::opt(d.wifi_rssi())),
    ])
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn handle(
    config: ClientConfig,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let station = args.station;
    let devices: Vec<Arc<Device>> = Controller::oneshot(config, |c| async move {
        let snapshot = c.get_all_devices().await?;
        match station {
            Some(id) => c.get_devices(&id).await,
            None => Ok(snapshot.devices),
        }
    })
    .await?;

    let color = output::should_color(&global.color);
    let out = output::render_list(
        &global.output,
        &devices,
        |d| DeviceRow::new(d, color),
        |d| d.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn sync(
    config: ClientConfig,
    args: SyncArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let id = args.device;
    let device = Controller::oneshot(config, |c| async move { c.refresh_device(&id).await }).await?;

    let out = output::render_single(&global.output, &device, |d| detail(d), |d| d.id.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
