//! scanband - column artifact correction for scanned images
//!
//! CLI entry point

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Instant;
use tracing::Level;

use scanband::{
    exit_codes, Cli, Commands, Config, ConfigArgs, Pipeline, PipelineConfig, PipelineError,
    ProcessArgs, ProgressCallback,
};

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Process(args) => {
            init_logging(args.verbose, args.quiet);
            run_process(&args)
        }
        Commands::Config(args) => run_config(&args),
        Commands::Info => run_info(),
    };

    std::process::exit(match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    });
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::INFO,
        (false, _) => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code_for(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<PipelineError>() {
        Some(PipelineError::ImageNotFound(_) | PipelineError::NoImagesFound(_)) => {
            exit_codes::INPUT_NOT_FOUND
        }
        Some(PipelineError::Correction(_)) => exit_codes::INVALID_ARGS,
        _ => exit_codes::GENERAL_ERROR,
    }
}

// ============ Progress Callback Implementation ============

/// Progress bar for directory batches
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(total: usize, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        if let Ok(style) =
            ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} ({elapsed})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        Self { bar }
    }
}

impl ProgressCallback for BarProgress {
    fn on_step_start(&self, step: &str) {
        self.bar.set_message(step.to_string());
    }

    fn on_step_progress(&self, current: usize, _total: usize) {
        self.bar.set_position(current as u64);
    }

    fn on_step_complete(&self, step: &str, message: &str) {
        self.bar.finish_with_message(format!("{}: {}", step, message));
    }

    fn on_debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }
}

// ============ Process Command ============

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}

fn run_process(args: &ProcessArgs) -> anyhow::Result<()> {
    let start_time = Instant::now();

    if !args.input.exists() {
        return Err(PipelineError::ImageNotFound(args.input.clone()).into());
    }

    let file_config = load_config(args.config.as_deref())?;
    let pipeline_config = file_config.merge_with_cli(&args.overrides());
    let pipeline = Pipeline::new(pipeline_config);

    if args.dry_run {
        print_execution_plan(args, pipeline.config());
        return Ok(());
    }

    if args.input.is_file() {
        let report = pipeline.process_file(&args.input, &args.output)?;
        if !args.quiet {
            println!(
                "Processed {} -> {} ({}x{}, {:.2}s)",
                report.input.display(),
                report.output.display(),
                report.width,
                report.height,
                report.elapsed_seconds
            );
        }
        return Ok(());
    }

    let total = scanband::pipeline::collect_images(&args.input)?.len();
    let progress = BarProgress::new(total, args.quiet);
    let report = pipeline.process_directory(&args.input, &args.output, &progress)?;

    if !args.quiet {
        for (path, error) in &report.failed {
            eprintln!("Failed: {}: {}", path.display(), error);
        }
        println!(
            "Processed {} image(s), {} failed, {:.2}s",
            report.ok_count(),
            report.error_count(),
            start_time.elapsed().as_secs_f64()
        );
    }

    if report.error_count() > 0 {
        bail!("{} image(s) failed to process", report.error_count());
    }
    Ok(())
}

/// Print execution plan for dry-run mode
fn print_execution_plan(args: &ProcessArgs, config: &PipelineConfig) {
    println!("=== Dry Run - Execution Plan ===");
    println!();
    println!("Input:  {}", args.input.display());
    println!("Output: {}", args.output.display());
    println!();
    println!("Stages:");
    let mut step = 1;
    for stage in &config.pre_filters {
        println!("  {}. Pre filter: {}", step, stage);
        step += 1;
    }
    if let Some(rotation) = &config.deskew {
        println!(
            "  {}. Deskew (canny {}/{}, votes {})",
            step, rotation.canny_low, rotation.canny_high, rotation.vote_threshold
        );
        step += 1;
    }
    match &config.band {
        Some(band) => println!(
            "  {}. Band smoothing: window {}, {} pass(es), {:?} padding",
            step, band.window, band.passes, band.padding
        ),
        None => println!("  {}. Band smoothing: DISABLED", step),
    }
    step += 1;
    match &config.gamma {
        Some(gamma) => println!(
            "  {}. Gamma equalization: radius {}, gamma {}..={}, {} steps",
            step, gamma.neighbor_radius, gamma.gamma_min, gamma.gamma_max, gamma.steps
        ),
        None => println!("  {}. Gamma equalization: DISABLED", step),
    }
    step += 1;
    for stage in &config.post_filters {
        println!("  {}. Post filter: {}", step, stage);
        step += 1;
    }
    println!();
    println!(
        "Threads: {}",
        config.threads.unwrap_or_else(num_cpus::get)
    );
}

// ============ Config Command ============

fn run_config(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    print!("{}", config.to_toml()?);
    Ok(())
}

// ============ Info Command ============

fn run_info() -> anyhow::Result<()> {
    println!("scanband v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("System Information:");
    println!("  Platform: {}", std::env::consts::OS);
    println!("  Arch: {}", std::env::consts::ARCH);
    println!("  CPUs: {}", num_cpus::get());
    println!();
    println!("Config File Locations:");
    for path in Config::search_paths() {
        let status = if path.is_file() { "found" } else { "not found" };
        println!("  {} ({})", path.display(), status);
    }
    Ok(())
}
