//! ELM327 OBD-II adapter command line
//!
//! Connects to the adapter, prints its identification and the battery
//! voltage, and on request scans supported PIDs, reads the readiness
//! monitors, reads one frame of live data or persists the high baud rate.
//!
//! # Usage
//!
//! ```bash
//! obd-cli /dev/ttyUSB0 --scan --live
//! obd-cli --mock --readiness --json
//! ```

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use obd_protocol::{
    LinkConfig, MockAdapter, MonitorStatus, ObdClient, ObdError, SensorFrame, SerialTransport,
    SupportedPids, Transport, HIGH_BAUD_RATE,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod settings;

/// Missing port, bad flags or unreadable configuration
const EXIT_USAGE: u8 = 1;
/// The port could not be opened or the adapter did not answer
const EXIT_CONNECTION: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "obd-cli")]
#[command(version, about = "Talk to an ELM327 OBD-II adapter over a serial port")]
struct Args {
    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    port: Option<String>,

    /// Configuration file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<String>,

    /// Baud rate the adapter currently uses
    #[arg(short, long)]
    baud: Option<u32>,

    /// Use a simulated adapter instead of a serial port
    #[arg(long)]
    mock: bool,

    /// List the PIDs the vehicle supports
    #[arg(long)]
    scan: bool,

    /// Show MIL, DTC count and readiness monitors
    #[arg(long)]
    readiness: bool,

    /// Read one frame of live data
    #[arg(long)]
    live: bool,

    /// Persist 115200 baud in the adapter
    #[arg(long)]
    high_baud: bool,

    /// Print results (and logs) as JSON
    #[arg(long)]
    json: bool,

    /// More log output (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Everything gathered during one session
#[derive(Debug, Default, Serialize)]
struct Report {
    adapter: String,
    baud_rate: u32,
    battery_voltage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    supported_pids: Option<SupportedPids>,
    #[serde(skip_serializing_if = "Option::is_none")]
    readiness: Option<MonitorStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    live: Option<SensorFrame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    high_baud: Option<bool>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(args.verbose, args.json);
    info!("=== OBD CLI v{} ===", env!("CARGO_PKG_VERSION"));

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "obd_cli=info,obd_protocol=info",
        1 => "obd_cli=debug,obd_protocol=debug",
        _ => "obd_cli=trace,obd_protocol=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: &Args) -> Result<()> {
    let overrides = settings::Overrides {
        config_file: args.config.as_deref(),
        port: args.port.as_deref(),
        baud_rate: args.baud,
    };
    let link = settings::load(&overrides, !args.mock)?;

    let transport: Box<dyn Transport> = if args.mock {
        info!("Using simulated adapter");
        Box::new(MockAdapter::new())
    } else {
        let port = SerialTransport::open(&link.port, link.baud_rate, link.command_timeout())
            .with_context(|| format!("cannot open {}", link.port))?;
        Box::new(port)
    };

    let report = probe(transport, &link, args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Handshake on `transport` and collect what `args` asks for
fn probe<T: Transport>(transport: T, link: &LinkConfig, args: &Args) -> Result<Report> {
    let mut client = ObdClient::handshake(transport, link).context("adapter handshake failed")?;

    let mut report = Report {
        adapter: client.version().to_string(),
        baud_rate: client.baud_rate(),
        battery_voltage: client.read_battery_voltage(),
        ..Default::default()
    };

    if args.scan {
        report.supported_pids = Some(client.scan_supported_pids());
    }
    if args.readiness {
        report.readiness = client.monitor_status();
    }
    if args.live {
        report.live = Some(client.read_frame());
    }
    if args.high_baud {
        report.high_baud = Some(client.switch_to_high_baud());
    }

    client.disconnect();
    Ok(report)
}

fn print_report(report: &Report) {
    println!("Adapter:         {}", report.adapter);
    println!("Baud rate:       {}", report.baud_rate);
    println!(
        "Battery voltage: {}",
        report.battery_voltage.as_deref().unwrap_or("unavailable")
    );

    if let Some(pids) = &report.supported_pids {
        let list: Vec<String> = pids.iter().map(|pid| format!("{:02X}", pid)).collect();
        println!("Supported PIDs:  {}", list.join(" "));
    }

    if let Some(status) = &report.readiness {
        println!("MIL:             {}", if status.mil { "on" } else { "off" });
        println!("Stored DTCs:     {}", status.dtc_count);
        println!("Ignition:        {:?}", status.ignition);
        for test in status.tests.iter().filter(|t| t.available) {
            println!(
                "  {:<32} {}",
                test.component.name(),
                if test.incomplete { "incomplete" } else { "complete" }
            );
        }
    }

    if let Some(frame) = &report.live {
        for line in live_lines(frame) {
            println!("{}", line);
        }
    }

    match report.high_baud {
        Some(true) => println!(
            "High baud rate persisted; reset the adapter and reconnect at {} baud",
            HIGH_BAUD_RATE
        ),
        Some(false) => println!("High baud rate switch rejected by the adapter"),
        None => {}
    }
}

/// One `name: value` line per live reading
fn live_lines(frame: &SensorFrame) -> Vec<String> {
    frame
        .values()
        .into_iter()
        .map(|(pid, value)| format!("{:<26} {}", format!("{}:", pid.name()), value))
        .collect()
}

/// Connection problems carry an [`ObdError`]; everything else is a usage error
fn exit_status(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ObdError>().is_some() {
        EXIT_CONNECTION
    } else {
        EXIT_USAGE
    }
}
