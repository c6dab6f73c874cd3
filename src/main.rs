mod capture;
mod config;
mod scan;

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::capture::{CaptureServer, CaptureSettings};
use crate::config::{DEFAULT_COORDS_PATH, DEFAULT_PORT, DEFAULT_SHEET_PATH, ScanThresholds};

fn cli() -> Command {
    Command::new("sprite-probe")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sprite-sheet scanning and coordinate capture helpers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (-v info, -vv debug, -vvv trace)"),
        )
        .subcommand(
            Command::new("scan")
                .about("Report checkerboard size and first red / ground pixels of a sprite sheet")
                .arg(
                    Arg::new("image")
                        .long("image")
                        .value_name("PATH")
                        .help("Sprite sheet to scan")
                        .default_value(DEFAULT_SHEET_PATH)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("thresholds")
                        .long("thresholds")
                        .value_name("FILE")
                        .help("JSON file overriding the red / ground color ranges")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("serve")
                .about("Accept one POST /submit, write it to the coords file, then exit")
                .arg(
                    Arg::new("port")
                        .long("port")
                        .value_name("PORT")
                        .help("TCP port to listen on, all interfaces [default: 8889]")
                        .value_parser(clap::value_parser!(u16)),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .value_name("PATH")
                        .help("File the submission is written to")
                        .default_value(DEFAULT_COORDS_PATH)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("root")
                        .long("root")
                        .value_name("DIR")
                        .help("Directory GET requests are served from")
                        .default_value(".")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sprite_probe={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn scan_sheet(matches: &ArgMatches) -> Result<scan::ScanReport> {
    let thresholds = match matches.get_one::<PathBuf>("thresholds") {
        Some(path) => ScanThresholds::load(path)?,
        None => ScanThresholds::default(),
    };
    let image = matches.get_one::<PathBuf>("image").unwrap(); // Safe due to default
    scan::run(image, &thresholds)
}

/// Scan errors are reported, never propagated: the scanner always exits 0.
fn run_scan(matches: &ArgMatches) {
    match scan_sheet(matches) {
        Ok(report) => println!("{}", report),
        Err(e) => println!("Error: {:#}", e),
    }
}

/// Reports the port actually bound, which differs from the requested one for `--port 0`.
fn listening_line(server: &CaptureServer) -> Result<String> {
    Ok(format!("Listening on {}...", server.local_addr()?.port()))
}

async fn run_serve(matches: &ArgMatches) -> Result<()> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(DEFAULT_PORT);
    let mut settings = CaptureSettings::new(port);
    // Safe due to defaults
    settings.output = matches.get_one::<PathBuf>("output").unwrap().clone();
    settings.static_root = matches.get_one::<PathBuf>("root").unwrap().clone();

    let server = CaptureServer::bind(settings).await?;
    println!("{}", listening_line(&server)?);
    server.serve().await
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_count("verbose"));

    match matches.subcommand() {
        Some(("scan", sub)) => run_scan(sub),
        Some(("serve", sub)) => run_serve(sub).await?,
        _ => unreachable!("subcommand_required is set"),
    }

    Ok(())
}
