//! `sensorbridge` – command line front end for the sensor bridge.
//!
//! - `sensorbridge check [CONFIG]` loads and validates a configuration and
//!   lists the enabled categories.
//! - `sensorbridge simulate [CONFIG] --cycles N` attaches the bridge to a
//!   simulated device set mirroring the configuration and polls it N times.
//!   Ctrl-C stops the loop early.
//! - `sensorbridge schema` prints the JSON schema of the typed configuration.
//!
//! When CONFIG is omitted, `SENSORBRIDGE_CONFIG` and then
//! `~/.sensorbridge/bridge.toml` are used.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use sensorbridge_hal::sim::SimRig;
use sensorbridge_hal::{SensorBridge, SensorBridgeConfig};
use sensorbridge_types::{SensorCategory, Shape};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sensorbridge", version, about = "Robot sensor bridge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a configuration file
    Check {
        /// Configuration file (TOML)
        config: Option<PathBuf>,
    },
    /// Attach to simulated devices and poll them
    Simulate {
        /// Configuration file (TOML)
        config: Option<PathBuf>,
        /// Number of poll cycles
        #[arg(long, default_value_t = 10)]
        cycles: u64,
        /// Delay between cycles in milliseconds
        #[arg(long, default_value_t = 100)]
        period_ms: u64,
    },
    /// Print the configuration JSON schema
    Schema,
}

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG selects the filter (default "info").  Set
    // SENSORBRIDGE_LOG_FORMAT=json for newline-delimited JSON logs.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("SENSORBRIDGE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Check { config } => check(config),
        Commands::Simulate {
            config,
            cycles,
            period_ms,
        } => simulate(config, cycles, Duration::from_millis(period_ms)),
        Commands::Schema => schema(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn load(explicit: Option<PathBuf>) -> Result<SensorBridgeConfig, String> {
    let path = config::resolve(explicit);
    let cfg = config::load_from(&path)?;
    println!("  Config loaded from {}", path.display().to_string().bold());
    Ok(cfg)
}

fn check(explicit: Option<PathBuf>) -> Result<(), String> {
    let cfg = load(explicit)?;
    print_categories(&cfg);
    println!("  {}", "✓ configuration is valid".green());
    Ok(())
}

fn simulate(explicit: Option<PathBuf>, cycles: u64, period: Duration) -> Result<(), String> {
    let cfg = load(explicit)?;
    print_categories(&cfg);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping after this cycle …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the loop will run to completion");
    }

    let rig = SimRig::mirroring(&cfg);
    let mut bridge = SensorBridge::new();
    bridge.initialize_with(cfg).map_err(|e| e.to_string())?;
    bridge.attach(rig.devices()).map_err(|e| e.to_string())?;
    println!(
        "  {} to {} simulated device(s)",
        "Attached".green().bold(),
        rig.devices().len()
    );

    let mut completed = 0;
    for cycle in 0..cycles {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        rig.step(cycle as f64 * period.as_secs_f64());
        bridge.advance().map_err(|e| e.to_string())?;
        print_cycle(&bridge, cycle);
        completed += 1;
        std::thread::sleep(period);
    }

    info!(cycles = completed, "simulation finished");
    println!("  {} {} cycle(s)", "✓ polled".green(), completed);
    Ok(())
}

fn schema() -> Result<(), String> {
    let schema = schemars::schema_for!(SensorBridgeConfig);
    let json = serde_json::to_string_pretty(&schema)
        .map_err(|e| format!("Failed to serialize schema: {}", e))?;
    println!("{json}");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

fn print_categories(cfg: &SensorBridgeConfig) {
    println!();
    for category in SensorCategory::ALL {
        let marker = if cfg.is_enabled(category) {
            "●".green()
        } else {
            "○".dimmed()
        };
        let names = cfg.expected(category).join(", ");
        println!("  {} {:<28} {}", marker, category.to_string().bold(), names.dimmed());
    }
    if cfg.sensor_dry_run {
        println!("  {}", "sensor dry run enabled".cyan());
    }
    println!();
}

fn print_cycle(bridge: &SensorBridge, cycle: u64) {
    let Ok(store) = bridge.measurements() else {
        return;
    };
    println!("  {} {}", "cycle".dimmed(), cycle.to_string().bold());
    if let Some(joints) = store.joints() {
        println!(
            "    joints      t={:.3}  {:?}",
            joints.positions.receive_time_s,
            joints.positions.value.as_slice()
        );
    }
    for (category, name, shape) in store.shapes() {
        match shape {
            Shape::Channels(_) if category != SensorCategory::Joints => {
                if let Some(reading) = store.vector(category, &name) {
                    println!(
                        "    {:<11} {}  t={:.3}  {:?}",
                        category.to_string(),
                        name.cyan(),
                        reading.receive_time_s,
                        reading.value.as_slice()
                    );
                }
            }
            Shape::Image { .. } => {
                println!("    {:<11} {}  {}", category.to_string(), name.cyan(), shape);
            }
            Shape::Channels(_) => {}
        }
    }
}
