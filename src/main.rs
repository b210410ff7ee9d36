#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Bot configuration file")
        .default_value(pillar_bot_core::DEFAULT_CONFIG_PATH)
}

#[tokio::main]
async fn main() {
    let matches = Command::new("pillar-bot")
        .version(VERSION)
        .about("Pillar Bot - Mattermost onboarding bot")
        .subcommand(
            Command::new("up")
                .about("Connect and start handling events")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("doctor")
                .about("Check configuration and server access")
                .arg(config_arg()),
        )
        .arg(config_arg())
        .get_matches();

    match matches.subcommand() {
        Some(("up", sub_matches)) => commands::up::run(sub_matches).await,
        Some(("doctor", sub_matches)) => commands::doctor::run(sub_matches).await,
        _ => commands::up::run(&matches).await,
    }
}
