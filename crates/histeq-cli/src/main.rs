//! histeq - histogram equalization on an OpenCL device or the host
//!
//! Runs the histogram, scan, normalize and apply stages on one selected
//! device and reports per-stage kernel times.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use histeq_compute::Backend;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "histeq")]
#[command(author, version, about = "Histogram equalization on compute devices")]
#[command(long_about = "
Equalizes 8-bit images with a histogram / Blelloch scan / LUT pipeline
running on an OpenCL device (with the `opencl` feature) or the host.

Examples:
  histeq devices                          # List platforms and devices
  histeq eq input.png -o out.png          # Equalize on the best device
  histeq eq input.pgm -o out.pgm -p 0 -d 1 --bins 128
  histeq eq input.png -o out.png --kernels my.cl --build-options \"-DFAST\"
  histeq vec                              # Vector add/mult demo with profiling

Logging is controlled by HISTEQ_LOG (e.g. HISTEQ_LOG=histeq_compute=debug).
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// List platforms and devices of every backend
    #[command(visible_alias = "l")]
    Devices,

    /// Equalize an image
    #[command(visible_alias = "eq")]
    Equalize(EqualizeArgs),

    /// Run the vector add/mult kernels on sample data
    #[command(visible_alias = "vec")]
    Vector(DeviceArgs),
}

/// Device selection shared by the device-running commands.
#[derive(Args, Clone)]
struct DeviceArgs {
    /// Backend: auto, host, opencl
    #[arg(short, long, default_value = "auto")]
    backend: Backend,

    /// Platform index
    #[arg(short, long, default_value = "0")]
    platform: usize,

    /// Device index within the platform
    #[arg(short, long, default_value = "0")]
    device: usize,

    /// Disable queue profiling
    #[arg(long)]
    no_profile: bool,
}

#[derive(Args)]
struct EqualizeArgs {
    /// Input image (PNM or PNG, 8-bit)
    input: PathBuf,

    /// Output image
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    device: DeviceArgs,

    /// Histogram bucket count
    #[arg(long, default_value = "256")]
    bins: usize,

    /// Kernel source files (default: built-in kernels)
    #[arg(long, num_args = 1..)]
    kernels: Vec<PathBuf>,

    /// Options passed to the kernel compiler
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    build_options: String,

    /// Cumulative histogram to LUT mapping
    #[arg(long, value_enum, default_value = "reference")]
    normalize: NormalizeMode,

    /// Print histogram, cumulative histogram and LUT
    #[arg(long)]
    print_histograms: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum NormalizeMode {
    /// Scale by the last cumulative bucket onto 0..=255
    Reference,
    /// Constants of the first release (bucket 255, range 512, offset 3 planes)
    Legacy,
    /// Classic equalization from the first non-zero bucket
    Equalize,
    /// Apply the cumulative histogram unchanged
    Identity,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HISTEQ_LOG").unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Commands::Devices => commands::devices::run(cli.verbose),
        Commands::Equalize(args) => commands::equalize::run(args, cli.verbose),
        Commands::Vector(args) => commands::vector::run(args, cli.verbose),
    }
}
