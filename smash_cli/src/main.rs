use smash_core::{Campaign, SmashConfig, Verdict};

use anyhow::Context;
use clap::Parser;
use log::{debug, error, info};
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code for harness faults and configuration errors, distinct from the
/// verdict codes 0 (no failures) and 1 (failures recorded).
const HARNESS_FAULT_EXIT_CODE: u8 = 2;

const DEFAULT_CONFIG_FILE: &str = "smash.toml";

/// Black-box crash fuzzer: feeds generated input to a target over stdin and
/// keeps every input that crashes it or makes it hang.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,
    /// Target executable, run with no arguments.
    #[arg(long)]
    target: Option<PathBuf>,
    #[arg(short, long)]
    iterations: Option<u64>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long)]
    crash_dir: Option<PathBuf>,
    /// Seed for payload generation; a run with the same seed replays the same inputs.
    #[arg(long)]
    seed: Option<u64>,
    /// Write the final report as JSON to this path.
    #[arg(long)]
    summary_json: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<SmashConfig> {
    let mut config = match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            SmashConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                info!("No config file specified, loading default: {default_config_path:?}");
                SmashConfig::load_from_file(&default_config_path)?
            } else {
                debug!("No config file found, using built-in defaults");
                SmashConfig::default()
            }
        }
    };

    if let Some(target) = &cli.target {
        config.target.path = Some(target.clone());
    }
    if let Some(iterations) = cli.iterations {
        config.campaign.iterations = iterations;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.target.timeout_ms = timeout_ms;
    }
    if let Some(crash_dir) = &cli.crash_dir {
        config.corpus.crash_dir = crash_dir.clone();
    }
    if let Some(seed) = cli.seed {
        config.campaign.seed = Some(seed);
    }
    Ok(config)
}

fn run(cli: &Cli) -> anyhow::Result<Verdict> {
    let config = load_config(cli)?;
    debug!("Effective configuration: {config:#?}");

    let mut campaign = Campaign::from_config(&config).context("Invalid configuration")?;
    let report = campaign.run().context("Fuzzing campaign aborted")?;

    if let Some(path) = &cli.summary_json {
        report.write_json(path)?;
        info!("Wrote summary to {path:?}");
    }
    Ok(report.verdict)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(&cli) {
        Ok(verdict) => ExitCode::from(verdict.exit_code()),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(HARNESS_FAULT_EXIT_CODE)
        }
    }
}
