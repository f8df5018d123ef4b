//! Command dispatch.
//!
//! Listing and write commands run inside `Controller::oneshot`; `watch`
//! keeps its own long-lived controller.

mod actions;
mod devices;
mod houses;
mod stations;
mod util;
mod watch;

use xsense_core::ClientConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

pub async fn dispatch(
    cmd: Command,
    config: ClientConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Houses(args) => houses::handle(config, args, global).await,
        Command::Stations(args) => stations::handle(config, args, global).await,
        Command::Devices(args) => devices::handle(config, args, global).await,
        Command::Sync(args) => devices::sync(config, args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::Mute(target) => actions::mute(config, target, global).await,
        Command::TestAlarm(target) => actions::test_alarm(config, target, global).await,
        Command::StationConfig(args) => actions::station_config(config, args, global).await,
    }
}
