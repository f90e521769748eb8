//! Binary entrypoint for the px4param CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml`
//! - `ports` - list local serial ports and the autopilot candidate
//! - `status` - connect and print link status
//! - `list [--search <substr>] [--json]` - download and print the parameter list
//! - `get <name> [--fresh]` - read one parameter
//! - `set <name> <value> [--no-verify] [--min X --max Y]` - write one parameter
//! - `apply <file.json>` - batch-apply a JSON map of name/value pairs
//! - `refresh` - force a full parameter list re-download
//!
//! See the library crate docs for module-level details: `px4param::`.
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use px4param::cache::WILDCARD;
use px4param::client::{Px4Client, WriteOptions};
use px4param::config::Config;
use px4param::link::wire;
use px4param::ports;

#[derive(Parser)]
#[command(name = "px4param")]
#[command(about = "A PX4 parameter client for serial MAVLink links")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Serial port override (e.g., /dev/ttyACM0)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate override
    #[arg(short, long, global = true)]
    baud: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter configuration file
    Init,
    /// List local serial ports and the detected autopilot candidate
    Ports,
    /// Connect and print link status
    Status,
    /// Download and print the parameter list
    List {
        /// Only show parameters whose name contains this substring
        #[arg(short, long)]
        search: Option<String>,
        /// Emit JSON instead of a plain listing
        #[arg(long)]
        json: bool,
    },
    /// Read one parameter
    Get {
        /// Parameter name, e.g. SYS_AUTOSTART
        name: String,
        /// Bypass the cache and read from the autopilot
        #[arg(long)]
        fresh: bool,
    },
    /// Write one parameter
    Set {
        /// Parameter name, e.g. SYS_AUTOSTART
        name: String,
        /// New value
        value: f64,
        /// Skip the read-back verification
        #[arg(long)]
        no_verify: bool,
        /// Reject values below this bound before sending
        #[arg(long)]
        min: Option<f64>,
        /// Reject values above this bound before sending
        #[arg(long)]
        max: Option<f64>,
        /// Ignore --min/--max and send anyway
        #[arg(long)]
        force: bool,
    },
    /// Batch-apply parameters from a JSON file ({"NAME": value, ...})
    Apply {
        /// Path to the JSON file
        file: String,
    },
    /// Force a full parameter list re-download
    Refresh,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let mut config = if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
        Config::load(&cli.config).await?
    } else {
        Config::default()
    };
    if let Some(port) = cli.port.clone() {
        config.link.port = Some(port);
    }
    if let Some(baud) = cli.baud {
        config.link.baud_rate = baud;
    }
    config.validate()?;
    init_logging(&Some(config.clone()), cli.verbose);

    if let Commands::Ports = cli.command {
        let detected = ports::detect_ports();
        if detected.is_empty() {
            println!("No serial ports found.");
            return Ok(());
        }
        for port in &detected {
            println!("{}", ports::format_port(port));
        }
        match ports::find_candidate() {
            Some(candidate) => println!("\nAutopilot candidate: {}", candidate),
            None => println!("\nNo autopilot candidate identified."),
        }
        return Ok(());
    }

    let client = Px4Client::new(config);
    client
        .connect()
        .await
        .context("Failed to connect to the autopilot")?;

    let result = run_command(&client, cli.command).await;
    client.disconnect().await;
    result
}

async fn run_command(client: &Px4Client, command: Commands) -> Result<()> {
    match command {
        Commands::Init | Commands::Ports => unreachable!("handled before connecting"),
        Commands::Status => {
            let status = client.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::List { search, json } => {
            let outcome = client.await_parameters().await;
            if !outcome.stabilized {
                return Err(anyhow!(
                    "Parameter list incomplete ({} received); is the link healthy?",
                    outcome.count
                ));
            }
            let records = client.search(search.as_deref().unwrap_or(""));
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!(
                        "{:<16} = {}",
                        record.name,
                        wire::format_value(&record.name, record.wire_type, record.value)
                    );
                }
                println!("{} parameter(s)", records.len());
            }
        }
        Commands::Get { name, fresh } => {
            let record = if fresh {
                client.read_fresh(&name).await?
            } else {
                client.read(&name).await?
            };
            println!(
                "{} = {} ({:?}, index {}/{})",
                record.name,
                wire::format_value(&record.name, record.wire_type, record.value),
                record.wire_type,
                record.index,
                record.total_count
            );
        }
        Commands::Set {
            name,
            value,
            no_verify,
            min,
            max,
            force,
        } => {
            let opts = WriteOptions {
                verify: if no_verify { Some(false) } else { None },
                timeout: None,
                range: range_guard(force, min, max),
            };
            let outcome = client.write(&name, value, opts).await?;
            println!(
                "{} = {}",
                outcome.record.name,
                wire::format_value(
                    &outcome.record.name,
                    outcome.record.wire_type,
                    outcome.record.value
                )
            );
            if let Some(warning) = outcome.warning {
                println!("warning: {}", warning);
            }
        }
        Commands::Apply { file } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file))?;
            let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {} as a JSON object", file))?;
            let mut entries = Vec::with_capacity(map.len());
            for (name, value) in map {
                let value = value
                    .as_f64()
                    .ok_or_else(|| anyhow!("{}: value for {} is not a number", file, name))?;
                entries.push((name, value));
            }
            let outcome = client.batch_write(&entries).await;
            for (name, value) in &outcome.applied {
                println!("applied {} = {}", name, value);
            }
            for (name, reason) in &outcome.failed {
                println!("FAILED  {}: {}", name, reason);
            }
            if !outcome.failed.is_empty() {
                return Err(anyhow!("{} write(s) failed", outcome.failed.len()));
            }
        }
        Commands::Refresh => {
            // Progress feedback every 100 parameters during the burst.
            let listener = client.on_param_update(WILDCARD, |record| {
                if record.index % 100 == 0 && record.total_count > 0 {
                    info!("received {}/{}", record.index + 1, record.total_count);
                }
            });
            let result = client.refresh().await;
            client.remove_param_listener(listener);
            let count = result?;
            println!("{} parameter(s) synchronized", count);
        }
    }
    Ok(())
}

/// Range guard for `set`. A lone `--min` or `--max` still counts; the
/// missing bound is unbounded. `--force` disables the guard entirely.
fn range_guard(force: bool, min: Option<f64>, max: Option<f64>) -> Option<(f64, f64)> {
    if force || (min.is_none() && max.is_none()) {
        return None;
    }
    Some((
        min.unwrap_or(f64::NEG_INFINITY),
        max.unwrap_or(f64::INFINITY),
    ))
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level.
    let level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    let file = config.as_ref().and_then(|c| {
        c.logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        })
    });
    match file {
        Some(f) => {
            let sink = std::sync::Arc::new(std::sync::Mutex::new(f));
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = sink.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                writeln!(fmt, "{}", line)
            });
        }
        None => {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    }
    let _ = builder.try_init();
}
