//! DALI commissioning example application.
//!
//! Wipes all short addresses on the bus and reassigns them from zero.
//
// https://github.com/rust-iot/rust-dali
// Copyright 2021 Ryan Kurte

use log::info;

use structopt::StructOpt;

use dali::prelude::*;

#[derive(Debug, StructOpt)]
struct Options {
    #[structopt(long)]
    /// Confirm wiping every short address on the bus
    pub wipe: bool,

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

    if !opts.wipe {
        return Err(anyhow::anyhow!(
            "Commissioning reassigns every short address, pass --wipe to confirm"
        ));
    }

    let delta = scan_for_transceivers()?;
    let bus = match delta.added.into_iter().next() {
        Some(v) => v,
        None => {
            return Err(anyhow::anyhow!("No DALI adapters found"));
        }
    };

    info!("Using {}", bus.unique_id());
    bus.open()?;

    let assigned = bus.commission().await?;
    println!("Assigned {} short addresses: {:?}", assigned.len(), assigned);

    // Re-scan so the model reflects the new addressing
    bus.scan_for_gear().await?;
    for gear in bus.present_gear() {
        println!(
            "A{:<2} {:?} gtin {}",
            gear.short_address, gear.device_type, gear.gtin
        );
    }

    bus.close();

    Ok(())
}
