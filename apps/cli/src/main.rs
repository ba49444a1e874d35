use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use nxdt_core::events::{HostEvent, HostObserver, LogLevel};
use nxdt_core::fsutil::format_size;
use nxdt_core::session::{HostServer, ServerConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "nxdt-host",
    author,
    version,
    about = "nxdumptool USB host (Pure Rust)",
    long_about = "Receives file dumps from a Nintendo Switch console running the nxdumptool homebrew over USB."
)]
struct Args {
    /// Path to output directory (defaults to ./nxdumptool)
    #[arg(short, long)]
    outdir: Option<PathBuf>,

    /// Path to a TOML configuration file (CLI flags take precedence)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip the free-space check before receiving a file
    #[arg(long)]
    disable_free_space_check: bool,

    /// Enable verbose output
    #[arg(short = 'V', long)]
    verbose: bool,
}

/// CLI observer that prints events to stderr. Debug records are suppressed
/// unless verbose mode is on; the core always emits them.
struct CliObserver {
    verbose: bool,
}

impl HostObserver for CliObserver {
    fn on_event(&self, event: &HostEvent) {
        match event {
            HostEvent::DeviceConnected {
                max_packet_size,
                usb_version,
            } => {
                eprintln!(
                    "✓ Console connected (USB {}, max packet size 0x{:x})",
                    usb_version, max_packet_size
                );
            }
            HostEvent::Log { level, message } => match level {
                LogLevel::Error => eprintln!("ERROR: {}", message),
                LogLevel::Warn => eprintln!("WARN: {}", message),
                LogLevel::Info => eprintln!("{}", message),
                LogLevel::Debug if self.verbose => eprintln!("DEBUG: {}", message),
                _ => {}
            },
            HostEvent::ProgressStart { total, filename } => {
                eprintln!("Transferring \"{}\" ({})", filename, format_size(*total));
            }
            HostEvent::ProgressUpdate {
                current,
                total,
                filename,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                eprint!(
                    "\r[{:>3}%] {} / {} - {}",
                    pct,
                    format_size(*current),
                    format_size(*total),
                    filename
                );
                if *current == *total {
                    eprintln!();
                }
            }
            HostEvent::ProgressEnd => {
                eprintln!();
            }
            HostEvent::ServerStopped => {
                eprintln!("✓ Server stopped");
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let mut config = match &args.config {
        Some(path) => match ServerConfig::load_from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("✗ Failed to load config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    if let Some(outdir) = &args.outdir {
        config.output_dir = outdir.clone();
    }
    if args.disable_free_space_check {
        config.disable_free_space_check = true;
    }

    info!(outdir = %config.output_dir.display(), "nxdt-host starting");

    let observer = Arc::new(CliObserver {
        verbose: args.verbose,
    });
    let server = HostServer::with_observer(config, observer);

    let stop = server.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nStop requested, waiting for the worker to wind down...");
        stop.request_stop();
    }) {
        eprintln!("✗ Failed to install Ctrl-C handler: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = server.run() {
        error!("Server failed: {}", e);
        eprintln!("✗ FAILED: {}", e);
        std::process::exit(1);
    }
}
