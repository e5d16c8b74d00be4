//! EVCS Node - supervisor for a charging station serial link
//!
//! # Usage
//!
//! ```bash
//! # Attach to a serial device (19200 baud, 8N1)
//! evcs-node --device /dev/ttyUSB0
//!
//! # Different baud rate
//! evcs-node --device /dev/ttyUSB0 --baud 9600
//!
//! # Speak the protocol on stdin/stdout
//! evcs-node
//!
//! # Longer response timeout, log to a file
//! evcs-node --device /dev/ttyUSB0 --response-timeout-ms 5000 --log-file serial_comm.log
//! ```

mod device;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use evcs_link::{ChargerLink, LinkConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// EV charging station link supervisor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Byte-stream device of the charger link (stdin/stdout if omitted)
    #[arg(short, long)]
    device: Option<String>,

    /// Baud rate of the serial device
    #[arg(short, long, default_value_t = device::DEFAULT_BAUD)]
    baud: u32,

    /// Station acknowledged before the first heartbeat
    #[arg(short, long, default_value = "1")]
    station: String,

    /// Wait for follow-up lines of an exchange, in milliseconds
    #[arg(long, default_value = "3000")]
    response_timeout_ms: u64,

    /// Disable MMETERING structured frames
    #[arg(long)]
    no_frames: bool,

    /// Log filter (trace, debug, info, warn, error or a tracing directive)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_logging(&args)?;

    // stdout may carry the link, keep the banner on stderr
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║              EVCS Node - Charging Station Link               ║");
    eprintln!("╠══════════════════════════════════════════════════════════════╣");
    eprintln!("║  Device:   {:<50} ║", truncate(&device_name(&args), 50));
    eprintln!("║  Station:  {:<50} ║", args.station);
    eprintln!("║  Timeout:  {:<50} ║", format!("{} ms", args.response_timeout_ms));
    eprintln!("╚══════════════════════════════════════════════════════════════╝");
    eprintln!();

    let mut config = LinkConfig::new()
        .with_default_station(&args.station)
        .with_response_timeout(Duration::from_millis(args.response_timeout_ms));

    if args.no_frames {
        config = config.without_structured_frames();
    }

    let link = match &args.device {
        Some(path) => {
            let port = device::open_device(path, args.baud)?;
            let (reader, writer) = tokio::io::split(port);
            ChargerLink::spawn(config, reader, writer)?
        }
        None => ChargerLink::spawn(config, tokio::io::stdin(), tokio::io::stdout())?,
    };

    info!("Waiting for charger traffic, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let sessions = link.sessions();
    link.stop().await?;

    let open = sessions.snapshot();
    if !open.is_empty() {
        warn!(
            "{} session(s) still open: {}",
            open.len(),
            serde_json::to_string(&open)?
        );
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true);

    match &args.log_file {
        Some(path) => {
            let file = File::create(path)?;
            let subscriber = builder.with_ansi(false).with_writer(Mutex::new(file)).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = builder.with_writer(std::io::stderr).finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

fn device_name(args: &Args) -> String {
    match &args.device {
        Some(path) => format!("{} @{} baud", path, args.baud),
        None => "stdin/stdout".to_string(),
    }
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
