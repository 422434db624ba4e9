use std::process::ExitCode;

use clap::Parser;
use pvcopy::{
    PVCopy, PVStructure, RequestParser,
    introspect::FieldBuilder,
    scalar::ScalarType,
    standard::StandardField,
};

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

#[derive(Parser)]
struct Options {
    /// pvRequest strings to parse
    #[clap(required = true, id = "REQUEST")]
    requests: Vec<String>,
    /// Also project each request onto a demo power supply record
    #[clap(long)]
    project: bool,
    /// Show debug output
    #[clap(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// alarm, timeStamp, and power/voltage/current each with a value and alarm
fn power_supply() -> PVStructure {
    let standard = StandardField::default();
    let (Ok(alarm), Ok(time_stamp)) = (standard.alarm(), standard.time_stamp()) else {
        unreachable!("standard fields are always valid");
    };
    let channel = FieldBuilder::new()
        .add_scalar("value", ScalarType::Double)
        .add("alarm", alarm.clone().into());
    let channel = match channel.create_structure() {
        Ok(channel) => channel,
        Err(e) => unreachable!("demo channel structure is valid: {e}"),
    };
    let structure = FieldBuilder::new()
        .id("powerSupply")
        .add("alarm", alarm.into())
        .add("timeStamp", time_stamp.into())
        .add("power", channel.clone().into())
        .add("voltage", channel.clone().into())
        .add("current", channel.into())
        .create_structure();
    match structure {
        Ok(structure) => PVStructure::new(structure),
        Err(e) => unreachable!("demo power supply structure is valid: {e}"),
    }
}

fn main() -> ExitCode {
    let opts = Options::parse();

    let filter = EnvFilter::default().add_directive(
        match opts.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            2.. => LevelFilter::TRACE,
        }
        .into(),
    );
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_filter(filter);
    let subscriber = tracing_subscriber::registry().with(fmt_layer);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set global subscriber: {e}");
        return ExitCode::FAILURE;
    }

    let parser = RequestParser::new();
    let master = power_supply();
    let mut failed = false;
    for request in &opts.requests {
        println!("request '{request}'");
        let tree = match parser.parse(request) {
            Ok(tree) => tree,
            Err(e) => {
                warn!("{e}");
                failed = true;
                continue;
            }
        };
        println!("{tree}");
        if !opts.project {
            continue;
        }
        match PVCopy::build(&master, tree.pv_structure(), None) {
            Ok(copy) => {
                println!("copy structure:\n{}", copy.structure());
                println!("nodes:\n{}", copy.dump());
            }
            Err(e) => {
                warn!("Could not project onto {}: {e}", master.structure().id());
                failed = true;
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
