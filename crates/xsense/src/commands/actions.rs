//! Write commands: mute, self-test and station configuration.
//!
//! Each one refreshes the directory to learn the owning house, brings its
//! realtime channel up and publishes the command there.

use xsense_core::{ClientConfig, CommandResult, Controller, CoreError};

use crate::cli::{DeviceTarget, GlobalOpts, StationConfigArgs};
use crate::error::CliError;

use super::util;

#[derive(Debug, Clone, Copy)]
enum DeviceAction {
    Mute,
    SelfTest,
}

pub async fn mute(
    config: ClientConfig,
    target: DeviceTarget,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    device_action(config, target, DeviceAction::Mute, global).await
}

pub async fn test_alarm(
    config: ClientConfig,
    target: DeviceTarget,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    device_action(config, target, DeviceAction::SelfTest, global).await
}

async fn device_action(
    config: ClientConfig,
    target: DeviceTarget,
    action: DeviceAction,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let DeviceTarget {
        device,
        connect_timeout,
    } = target;

    let (label, result) = Controller::oneshot(config, |c| async move {
        c.get_all_devices().await?;
        let found = c
            .store()
            .resolve_device(&device)
            .ok_or(CoreError::DeviceNotFound { device_id: device })?;
        util::connect_and_wait(&c, &found.house_id, Some(&found.station_id), connect_timeout)
            .await?;
        let result = match action {
            DeviceAction::Mute => c.mute_alarm(&found.id).await?,
            DeviceAction::SelfTest => c.test_alarm(&found.id).await?,
        };
        Ok((util::device_label(&found), result))
    })
    .await?;

    if !global.quiet {
        let verb = match action {
            DeviceAction::Mute => "Mute",
            DeviceAction::SelfTest => "Self-test",
        };
        eprintln!("{verb} sent to {label} via {}", result.topic());
    }
    Ok(())
}

pub async fn station_config(
    config: ClientConfig,
    args: StationConfigArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let settings = util::parse_settings(&args.settings)?;
    let keys = settings.keys().cloned().collect::<Vec<_>>().join(", ");
    let station_id = args.station;
    let connect_timeout = args.connect_timeout;

    let result: CommandResult = Controller::oneshot(config, |c| async move {
        c.get_all_devices().await?;
        let store = c.store();
        let station = store
            .station(&station_id)
            .or_else(|| {
                store
                    .resolve_device(&station_id)
                    .and_then(|d| store.station(&d.station_id))
            })
            .ok_or_else(|| CoreError::StationNotFound {
                station_id: station_id.clone(),
            })?;
        util::connect_and_wait(&c, &station.house_id, Some(&station.id), connect_timeout).await?;
        c.set_station_config(&station_id, settings).await
    })
    .await?;

    if !global.quiet {
        eprintln!("Updated {keys} via {}", result.topic());
    }
    Ok(())
}
