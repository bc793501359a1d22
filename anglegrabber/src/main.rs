/*!
# Angle Grabber Application

Polls an absolute rotary encoder over RS-485/serial, averages the wrap-corrected
angle over a fixed window of valid responses, and prints one timestamped
reading per window to stdout.

## Features

- Fixed command/response exchange with per-read timeout
- Wrap correction placing the angle seam at -90/270 degrees
- Windowed averaging of valid samples only
- Optional response signature checking and bounded retry
- Several encoders polled concurrently, one thread per port
- Simulated encoder for running without hardware

## Usage

### Default device from config file (or built-in defaults)
```bash
anglegrabber
```

### Explicit port
```bash
anglegrabber run --port /dev/ttyUSB0
```

### Write a config file to edit
```bash
anglegrabber config --output anglegrabber.toml
```
*/

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use shared::transport::SimulatedTransport;
use shared::{AngleFilter, FilterStats, SerialTransport, Transport};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod config;
mod poller;
mod reporter;

use config::{AppConfig, DeviceConfig, OutputFormat};
use reporter::Reporter;

#[derive(Parser)]
#[command(name = "anglegrabber")]
#[command(about = "Absolute angle encoder polling with averaged angle output")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "anglegrabber.toml")]
    config: PathBuf,

    /// Disable logging on stderr
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured encoders and print averaged readings
    Run(RunArgs),

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "anglegrabber.toml")]
        output: PathBuf,
    },
}

/// Overrides applied on top of the configuration file
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Serial port of the first device
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Per-read timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Valid samples averaged into each reading
    #[arg(short, long)]
    averages: Option<usize>,

    /// Reject responses with an unexpected signature
    #[arg(long)]
    strict_header: bool,

    /// Fail after this many rejected exchanges for one sample
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Pause between rejected exchanges in milliseconds
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Emit JSON lines instead of CSV
    #[arg(long)]
    json: bool,

    /// Use a simulated encoder instead of the serial port
    #[arg(long)]
    simulate: bool,
}

impl RunArgs {
    /// Apply command-line overrides to the loaded configuration
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = &self.port {
            if config.devices.len() > 1 {
                warn!("--port only applies to the first device '{}'", config.devices[0].name);
            }
            if let Some(first) = config.devices.first_mut() {
                first.serial.port = port.clone();
            }
        }

        for device in &mut config.devices {
            if let Some(baud) = self.baud {
                device.serial.baud_rate = baud;
            }
            if let Some(timeout_ms) = self.timeout_ms {
                device.serial.timeout_ms = timeout_ms;
            }
            if let Some(averages) = self.averages {
                device.sampling.averages = averages;
            }
            if self.strict_header {
                device.sampling.strict_header = true;
            }
            if self.max_attempts.is_some() {
                device.retry.max_attempts = self.max_attempts;
            }
            if let Some(backoff_ms) = self.backoff_ms {
                device.retry.backoff_ms = backoff_ms;
            }
        }

        if self.json {
            config.output.format = OutputFormat::Json;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        // Initialize logging to stderr to keep stdout clean for readings
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Some(Commands::Run(args)) => {
            let mut config = AppConfig::load_or_default(&cli.config)?;
            args.apply(&mut config);
            run(config, args.simulate)
        }

        Some(Commands::Config { output }) => generate_config_file(output),

        None => {
            let config = AppConfig::load_or_default(&cli.config)?;
            run(config, false)
        }
    }
}

/// Open one device's transport, real or simulated
fn open_transport(device: &DeviceConfig, simulate: bool) -> Result<Box<dyn Transport + Send>> {
    if simulate {
        info!("🧪 Using simulated encoder for {}", device.name);
        let start = f64::from(device.sampling.max_counts) / 8.0;
        let transport = SimulatedTransport::new(start, 0.5, device.sampling.max_counts)
            .with_drop_every(7)
            .with_delay(Duration::from_millis(10));
        return Ok(Box::new(transport));
    }

    let transport = SerialTransport::open(&device.serial)
        .with_context(|| format!("Failed to open serial port {} for '{}'", device.serial.port, device.name))?;
    Ok(Box::new(transport))
}

/// Poll every configured device until Ctrl+C
fn run(config: AppConfig, simulate: bool) -> Result<()> {
    config.validate()?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, stopping at the next window boundary or rejected frame...");
        handler_flag.store(false, Ordering::SeqCst);
    })?;

    let mut devices = Vec::with_capacity(config.devices.len());
    for device in &config.devices {
        let transport = open_transport(device, simulate)?;
        let filter = AngleFilter::new(transport, &device.reader_config())
            .with_context(|| format!("Invalid settings for device '{}'", device.name))?;
        devices.push((device.name.clone(), filter));
    }

    let stdout = std::io::stdout();
    let mut reporter = Reporter::new(stdout.lock(), config.output.format);

    let stats = if devices.len() == 1 {
        let (name, filter) = devices.remove(0);
        let mut filter = filter.with_running_flag(Arc::clone(&running));
        info!("🚀 Polling {} ({} samples per reading)", name, config.devices[0].sampling.averages);
        reporter.run(&mut filter, &running)?;
        vec![(name, filter.stats())]
    } else {
        info!("🚀 Polling {} devices concurrently", devices.len());
        poller::run_devices(devices, &mut reporter, Arc::clone(&running))?
    };

    for (name, device_stats) in &stats {
        log_stats(name, device_stats);
    }
    info!("✅ Polling completed, {} readings written", reporter.lines());
    Ok(())
}

fn log_stats(name: &str, stats: &FilterStats) {
    info!("📈 Final stats for {}:", name);
    info!("   Exchanges: {}", stats.exchanges);
    info!("   Accepted: {}", stats.accepted);
    info!("   Short/long reads: {}", stats.length_rejections);
    info!("   Signature rejections: {}", stats.signature_rejections);
    info!("   Readings: {}", stats.windows);
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    info!("✅ Generated configuration file: {}", output_path.display());
    info!("📝 Edit the file to customize settings, then run:");
    info!("   anglegrabber --config {}", output_path.display());

    Ok(())
}
