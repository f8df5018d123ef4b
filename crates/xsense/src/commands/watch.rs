//! Realtime update stream.
//!
//! Refreshes the directory, connects the selected houses and prints every
//! device change, health change and cloud notice until Ctrl-C.

use chrono::Local;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use xsense_core::{ClientConfig, Controller, UpdateEvent};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

pub async fn handle(
    config: ClientConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let controller = Controller::new(config)?;
    if let Err(e) = controller.init().await {
        controller.destroy().await;
        return Err(e.into());
    }

    let result = stream(&controller, &args, global).await;
    controller.destroy().await;
    result
}

async fn stream(
    controller: &Controller,
    args: &WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let snapshot = controller.get_all_devices().await?;
    let mut updates = controller.updates();

    let houses: Vec<String> = match (&args.house, &args.station) {
        (Some(house), _) => vec![house.clone()],
        (None, Some(station)) => {
            let station = controller
                .store()
                .station(station)
                .ok_or_else(|| CliError::not_found("station", station, "stations"))?;
            vec![station.house_id.clone()]
        }
        (None, None) => snapshot.houses.iter().map(|h| h.id.clone()).collect(),
    };

    for house_id in &houses {
        match util::connect_and_wait(
            controller,
            house_id,
            args.station.as_deref(),
            args.connect_timeout,
        )
        .await
        {
            Ok(()) => debug!(house_id = %house_id, "realtime ready"),
            Err(e) => warn!(house_id = %house_id, error = %e, "realtime not ready, relying on polling"),
        }
    }

    let color = output::should_color(&global.color);
    if !global.quiet {
        eprintln!(
            "{}",
            output::dim(
                &format!(
                    "Watching {} device(s) in {} house(s). Ctrl-C to stop.",
                    snapshot.devices.len(),
                    houses.len()
                ),
                color
            )
        );
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = updates.recv() => match event {
                Ok(event) => {
                    let line = render_event(&event, &global.output, color)?;
                    output::print_output(&line, global.quiet);
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "dropped updates"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn render_event(
    event: &UpdateEvent,
    format: &OutputFormat,
    color: bool,
) -> Result<String, CliError> {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(event, true),
        OutputFormat::Yaml => output::render_yaml(event).map(|doc| format!("---\n{doc}")),
        OutputFormat::Table | OutputFormat::Plain => Ok(format!(
            "{}  {}",
            output::dim(&Local::now().format("%H:%M:%S").to_string(), color),
            describe(event, color)
        )),
    }
}

fn describe(event: &UpdateEvent, color: bool) -> String {
    match event {
        UpdateEvent::Device(device) => {
            let mut parts = vec![util::device_label(device)];
            if let Some(alarm) = device.alarm_status() {
                parts.push(output::paint_alarm(
                    &format!("alarm={alarm}"),
                    device.is_alarming(),
                    color,
                ));
            }
            if let Some(battery) = device.battery() {
                parts.push(format!("battery={battery}"));
            }
            if let Some(t) = device.temperature() {
                parts.push(format!("temp={t:.1}"));
            }
            if let Some(h) = device.humidity() {
                parts.push(format!("hum={h:.0}%"));
            }
            if let Some(co) = device.co_ppm() {
                parts.push(format!("co={co}ppm"));
            }
            if let Some(open) = device.is_open() {
                parts.push(format!("open={open}"));
            }
            parts.join("  ")
        }
        UpdateEvent::RealtimeHealth { house_id, healthy } => {
            format!("house {house_id} realtime {}", output::paint_health(*healthy, color))
        }
        UpdateEvent::Error(notice) => format!("notice {}: {}", notice.kind, notice.message),
    }
}
