use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

use midi_plex::{midi::MidirTransport, Broker};

/// Monitor MIDI inputs and optionally forward them to a destination
#[derive(Parser, Debug)]
#[command(name = "midi-plex", version)]
struct Args {
    /// List the MIDI sources and destinations, then exit
    #[arg(short, long)]
    list: bool,

    /// Forward every received message to the destination with this name
    #[arg(short, long, value_name = "DESTINATION")]
    thru: Option<String>,

    /// Open all destinations on startup
    #[arg(long)]
    enable_destinations: bool,

    /// Name under which this client registers with the MIDI subsystem
    #[arg(long, default_value = midi_plex::CLIENT_NAME)]
    client_name: String,

    /// Increase logging verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn log_level(&self) -> log::LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => log::LevelFilter::Error,
            (false, 0) => log::LevelFilter::Info,
            (false, 1) => log::LevelFilter::Debug,
            (false, _) => log::LevelFilter::Trace,
        }
    }
}

fn print_names(label: &str, names: &[Arc<str>]) {
    println!("{label}:");
    if names.is_empty() {
        println!("  (none)");
    }
    for (idx, name) in names.iter().enumerate() {
        println!("  {idx}: {name}");
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let broker = Broker::new(Arc::new(MidirTransport::new(args.client_name.as_str())));

    if args.list {
        print_names("Sources", &broker.source_names());
        print_names("Destinations", &broker.destination_names());
        broker.shutdown();
        return Ok(());
    }

    if args.enable_destinations {
        broker.enable_all_destinations();
    }

    broker.add_receive_callback(|msg| println!("{msg}"));

    if let Some(thru) = args.thru {
        if !broker.destination_names().iter().any(|name| **name == *thru) {
            log::warn!("Destination {thru} not found yet, forwarding once it shows up");
        }

        let weak = Arc::downgrade(&broker);
        broker.add_receive_callback(move |msg| {
            if let Some(broker) = weak.upgrade() {
                if let Err(err) = broker.send_to_name(&msg.midi, &thru) {
                    log::error!("Couldn't forward {msg}: {err}");
                }
            }
        });
    }

    let weak = Arc::downgrade(&broker);
    broker.add_setup_change_callback(move |reason| {
        log::info!("{reason}");
        if let Some(broker) = weak.upgrade() {
            // newly plugged sources are disabled
            broker.enable_all_sources();
        }
    });

    print_names("Listening to", &broker.source_names());
    println!("Press Enter to exit");

    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Couldn't read from stdin")?;

    broker.shutdown();

    Ok(())
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    match run(args) {
        Ok(()) => log::info!("Exiting"),
        Err(err) => {
            use std::error::Error;

            log::error!("Error: {}", err);
            if let Some(source) = err.source() {
                log::error!("\t{}", source)
            }
            std::process::exit(1);
        }
    }
}
