//! DALI bus scan example application.
//
// https://github.com/rust-iot/rust-dali
// Copyright 2021 Ryan Kurte

use log::info;

use structopt::StructOpt;

use dali::prelude::*;

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long)]
    /// Toggle this short address after scanning
    pub toggle: Option<u8>,

    #[structopt(long, default_value = "info")]
    /// Configure log level
    pub log_level: simplelog::LevelFilter,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load options
    let opts = Options::from_args();

    // Initialise logging
    let _ = simplelog::SimpleLogger::init(opts.log_level, simplelog::Config::default());

    let delta = scan_for_transceivers()?;
    let bus = match delta.added.into_iter().next() {
        Some(v) => v,
        None => {
            return Err(anyhow::anyhow!("No DALI adapters found"));
        }
    };

    info!("Using {}", bus.unique_id());
    bus.open()?;

    bus.scan_for_gear().await?;

    for gear in bus.present_gear() {
        println!(
            "A{:<2} {:?} gtin {} serial {} level {} (min {} max {}) groups {:#06x}",
            gear.short_address,
            gear.device_type,
            gear.gtin,
            gear.serial.as_deref().unwrap_or("-"),
            gear.level,
            gear.min_level,
            gear.max_level,
            gear.groups,
        );
    }

    for group in bus.present_groups() {
        println!("G{:<2} members {:?}", group.number, group.members);
    }

    if let Some(addr) = opts.toggle {
        info!("Toggling A{}", addr);
        bus.gear(addr).toggle().await?;
    }

    bus.close();

    Ok(())
}
