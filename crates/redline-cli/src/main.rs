//! redline - ECU diagnostics, calibration tuning and reflashing CLI

mod commands;
mod config;
mod output;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use redline_sim::{SimEcu, SimEcuConfig, SimTransport};
use redline_uds::{DiagnosticSession, TransportLink};

use crate::config::CliConfig;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "redline")]
#[command(author, version, about = "ECU diagnostics, calibration tuning and reflashing")]
#[command(propagate_version = true)]
struct Cli {
    /// Transport adapter (only `sim` ships in-tree)
    #[arg(short, long, env = "REDLINE_TRANSPORT")]
    transport: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "REDLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the VIN and stored trouble codes
    Scan {
        /// Clear all stored codes after reading
        #[arg(long)]
        clear: bool,
    },

    /// Dump an ECU memory range to a file
    Dump {
        /// Start address (hex with 0x prefix, or decimal)
        address: String,

        /// Number of bytes to read
        len: String,

        /// Output file
        #[arg(short, long, default_value = "dump.bin")]
        out: PathBuf,
    },

    /// Inspect and edit calibration maps
    Tune {
        /// Calibration definition file (YAML)
        #[arg(short, long)]
        definition: PathBuf,

        /// Raw calibration image file
        #[arg(short, long)]
        image: PathBuf,

        /// Map name to show or edit
        map: String,

        /// Cell edit as row,col=value (repeatable)
        #[arg(long = "set", value_name = "R,C=V")]
        sets: Vec<String>,

        /// Write the edited map back to the ECU
        #[arg(long)]
        write: bool,

        /// ECU profile file (YAML), required with --write
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// VIN for security levels that mix it in
        #[arg(long)]
        vin: Option<String>,
    },

    /// Poll live parameters until interrupted
    Realtime {
        /// Data identifiers to poll (hex, e.g. 0xF40C)
        #[arg(required = true)]
        dids: Vec<String>,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "500")]
        interval: u64,
    },

    /// Reflash the ECU, or recover from a failed flash
    Flash {
        /// Image file to flash
        #[arg(short, long, required_unless_present = "recover")]
        file: Option<PathBuf>,

        /// ECU profile file (YAML)
        #[arg(short, long)]
        profile: PathBuf,

        /// Skip the pre-flash backup
        #[arg(long)]
        no_backup: bool,

        /// Skip per-block readback verification
        #[arg(long)]
        no_verify: bool,

        /// VIN for security levels that mix it in
        #[arg(long)]
        vin: Option<String>,

        /// Replay the most recent backup instead of flashing a file
        #[arg(long)]
        recover: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let config = if let Some(config_path) = &cli.config {
        CliConfig::load_from(config_path)?
    } else {
        CliConfig::load()
    };

    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);

    let transport = cli
        .transport
        .as_deref()
        .or(config.transport.as_deref())
        .unwrap_or("sim");
    let link = build_link(transport)?;
    let session = DiagnosticSession::new(link, config.session.clone());

    match &cli.command {
        Commands::Scan { clear } => {
            commands::scan(&session, *clear, &ctx).await?;
        }

        Commands::Dump { address, len, out } => {
            let address = parse_number(address)? as u32;
            let len = parse_number(len)? as u32;
            commands::dump(&session, address, len, out, &ctx).await?;
        }

        Commands::Tune {
            definition,
            image,
            map,
            sets,
            write,
            profile,
            vin,
        } => {
            commands::tune(
                &session,
                definition,
                image,
                map,
                sets,
                *write,
                profile.as_deref(),
                vin.as_deref(),
                &ctx,
            )
            .await?;
        }

        Commands::Realtime { dids, interval } => {
            let dids = dids
                .iter()
                .map(|d| parse_number(d).map(|n| n as u16))
                .collect::<Result<Vec<_>>>()?;
            commands::realtime(session.clone(), dids, *interval, &ctx).await?;
        }

        Commands::Flash {
            file,
            profile,
            no_backup,
            no_verify,
            vin,
            recover,
        } => {
            commands::flash(
                session.clone(),
                file.as_deref(),
                profile,
                &config.backup_dir(),
                !no_backup,
                !no_verify,
                vin.as_deref(),
                *recover,
                &ctx,
            )
            .await?;
        }
    }

    Ok(())
}

/// Instantiate the configured transport adapter. Physical adapters (CAN,
/// J2534) plug in out-of-tree; the bench simulator is the only built-in.
fn build_link(transport: &str) -> Result<Arc<dyn TransportLink>> {
    match transport {
        "sim" => {
            let ecu = Arc::new(SimEcu::new(SimEcuConfig::default()));
            Ok(Arc::new(SimTransport::new(ecu)))
        }
        other => bail!("Unknown transport '{other}' (only 'sim' is built in)"),
    }
}

/// Accepts `0x`-prefixed hex or plain decimal
fn parse_number(text: &str) -> Result<u64> {
    let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    parsed.map_err(|_| anyhow::anyhow!("Invalid number '{text}'"))
}
