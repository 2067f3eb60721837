//! six-b skim CLI

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use sb_io::{ParquetChain, ParquetSink, read_file_list};
use sb_skim::{JobSetup, SampleKind, SixBFunctions, Skimmer, Systematics, read_job_config};

#[derive(Parser)]
#[command(name = "sixb-skim")]
#[command(about = "Skim NanoAOD-like events into six-b analysis ntuples")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Job configuration (YAML, or JSON by extension)
    #[arg(long)]
    cfg: PathBuf,

    /// Text file listing the input Parquet files, one per line
    #[arg(long)]
    input: PathBuf,

    /// Output Parquet file
    #[arg(long)]
    output: PathBuf,

    /// Maximum number of events to read (-1 = all)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    max_evts: i64,

    /// Seed for the resolution smearing
    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// JES shift: `nominal` or `<source>:<up|down>`
    #[arg(long, default_value = "nominal")]
    jes_shift_syst: String,

    /// JER variation: `nominal`, `up` or `down`
    #[arg(long, default_value = "nominal")]
    jer_shift_syst: String,

    /// b-regression resolution variation: `nominal`, `up` or `down`
    #[arg(long, default_value = "nominal")]
    bjer_shift_syst: String,

    /// Input is collision data (lumi mask applied, no calibration)
    #[arg(long)]
    is_data: bool,

    /// Input is signal simulation (generator matching enabled; ignored for data)
    #[arg(long)]
    is_signal: bool,

    /// Also write candidate masses
    #[arg(long)]
    save_p4: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    cmd_skim(cli)
}

fn cmd_skim(cli: Cli) -> Result<()> {
    let systematics =
        Systematics::resolve(&cli.jes_shift_syst, &cli.jer_shift_syst, &cli.bjer_shift_syst)?;
    let sample = SampleKind::from_flags(cli.is_data, cli.is_signal);

    let config = read_job_config(&cli.cfg)
        .with_context(|| format!("failed to read config {}", cli.cfg.display()))?;
    let services = SixBFunctions::new(config.preselection.clone(), config.sixb.n_max);

    let files = read_file_list(&cli.input)?;
    let mut source = ParquetChain::new(files)?;
    let mut sink = ParquetSink::new(&cli.output);

    tracing::info!(
        cfg = %cli.cfg.display(),
        input = %cli.input.display(),
        output = %cli.output.display(),
        is_data = sample.is_data(),
        is_signal = sample.is_signal(),
        save_p4 = cli.save_p4,
        "starting skim"
    );

    let job = JobSetup {
        config,
        systematics,
        sample,
        seed: cli.seed,
        max_events: cli.max_evts,
        save_p4: cli.save_p4,
    };
    let summary = Skimmer::new(job, services)
        .run(&mut source, &mut sink)
        .with_context(|| format!("skim of {} failed", cli.input.display()))?;

    tracing::info!(
        n_read = summary.n_read,
        n_written = summary.n_written,
        output = %cli.output.display(),
        "done"
    );
    Ok(())
}
