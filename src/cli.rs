//! Command-line interface definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::CliOverrides;
use crate::correction::BoundaryPadding;

/// Exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGS: i32 = 2;
    pub const INPUT_NOT_FOUND: i32 = 3;
}

/// Column artifact correction for scanned images
#[derive(Debug, Parser)]
#[command(name = "scanband", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Correct a single image or every image in a directory
    Process(ProcessArgs),

    /// Print the effective configuration as TOML
    Config(ConfigArgs),

    /// Show version, system and config file information
    Info,
}

/// Edge policy for the band smoother's moving average
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PaddingArg {
    Zero,
    Replicate,
    Symmetric,
    Reflect,
}

impl From<PaddingArg> for BoundaryPadding {
    fn from(arg: PaddingArg) -> Self {
        match arg {
            PaddingArg::Zero => BoundaryPadding::Zero,
            PaddingArg::Replicate => BoundaryPadding::Replicate,
            PaddingArg::Symmetric => BoundaryPadding::Symmetric,
            PaddingArg::Reflect => BoundaryPadding::Reflect,
        }
    }
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Input image file or directory
    pub input: PathBuf,

    /// Output file (single input) or directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Config file (defaults to ./scanband.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Band smoothing window width
    #[arg(long)]
    pub window: Option<usize>,

    /// Number of band smoothing passes
    #[arg(long)]
    pub passes: Option<usize>,

    /// Band smoothing edge policy
    #[arg(long, value_enum)]
    pub padding: Option<PaddingArg>,

    /// Skip band smoothing
    #[arg(long)]
    pub no_band: bool,

    /// Enable per-column gamma equalization
    #[arg(long)]
    pub gamma: bool,

    /// Neighbor half-width for the gamma reference
    #[arg(long)]
    pub neighbor_radius: Option<usize>,

    /// Smallest gamma candidate
    #[arg(long)]
    pub gamma_min: Option<f64>,

    /// Largest gamma candidate
    #[arg(long)]
    pub gamma_max: Option<f64>,

    /// Number of gamma candidates
    #[arg(long)]
    pub gamma_steps: Option<usize>,

    /// Detect and remove page rotation before correction
    #[arg(long)]
    pub deskew: bool,

    /// Worker threads for directory input
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Print the plan without processing
    #[arg(long)]
    pub dry_run: bool,

    /// Verbose output (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl ProcessArgs {
    /// Overrides for values set explicitly on the command line
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            band: self.no_band.then_some(false),
            window: self.window,
            passes: self.passes,
            padding: self.padding.map(BoundaryPadding::from),
            gamma: self.gamma.then_some(true),
            neighbor_radius: self.neighbor_radius,
            gamma_min: self.gamma_min,
            gamma_max: self.gamma_max,
            gamma_steps: self.gamma_steps,
            deskew: self.deskew.then_some(true),
            threads: self.threads,
        }
    }
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config file to render instead of the default search
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
