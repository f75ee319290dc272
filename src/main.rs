use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vbot::browser::chrome::ChromeLauncher;
use vbot::config::{self, ENV_CHROME_PATH, ENV_IMGDIR, ENV_MISMATCH_THRESHOLD};
use vbot::{LogReporter, ParseOptions, RunError, RunOptions, ScenarioRunner};

/// vbot - visual regression testing with browser playbooks
#[derive(Parser, Debug)]
#[command(
    name = "vbot",
    version,
    about = "Run browser playbooks and compare screenshots against recorded baselines",
    after_help = "ENVIRONMENT VARIABLES:\n\
        VBOT_IMGDIR               Screenshot directory\n\
        VBOT_MISMATCH_THRESHOLD   Accepted mismatch fraction (0.0 - 1.0)\n\
        VBOT_WAIT_TIMEOUT         Default waitTimeout for actions (ms, or 5s)\n\
        VBOT_ANIMATION_TIMEOUT    Longest wait for animations to finish\n\
        VBOT_GOTO_TIMEOUT         Page load timeout\n\
        VBOT_CHROME_PATH          Chrome/Chromium executable\n\
        RUST_LOG                  Log filter (default: info)"
)]
struct Args {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a playbook, recording baselines or comparing against them
    Run {
        /// Playbook JSON file
        #[arg(short = 'f', long = "file")]
        playbook: PathBuf,

        /// Base URL overriding the playbook's url/host
        #[arg(long)]
        host: Option<String>,

        /// Discard recorded baselines and record new ones
        #[arg(short, long)]
        rebase: bool,

        /// Only run scenarios whose name contains this text
        #[arg(short, long)]
        search: Option<String>,

        /// Screenshot directory (default: ./vbot/<playbook name>)
        #[arg(long, env = ENV_IMGDIR)]
        imgdir: Option<PathBuf>,

        /// Show the browser window; screenshots are skipped
        #[arg(short, long)]
        debug: bool,

        /// Accepted mismatch fraction per screenshot
        #[arg(long, env = ENV_MISMATCH_THRESHOLD, value_parser = parse_threshold)]
        threshold: Option<f64>,

        /// Do not wait for animations before actions and captures
        #[arg(long)]
        no_wait_animation: bool,

        /// Save a screenshot of the final page of each scenario
        #[arg(long)]
        finish_snapshot: bool,

        /// Treat unknown action types as no-ops instead of errors
        #[arg(long)]
        lenient: bool,

        /// Chrome/Chromium executable
        #[arg(long, env = ENV_CHROME_PATH)]
        chrome: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a playbook and list its scenarios
    Validate {
        /// Playbook JSON file
        #[arg(short = 'f', long = "file")]
        playbook: PathBuf,

        /// Base URL overriding the playbook's url/host
        #[arg(long)]
        host: Option<String>,

        /// Treat unknown action types as no-ops instead of errors
        #[arg(long)]
        lenient: bool,
    },

    /// Compare two PNG files
    Diff {
        #[arg(long)]
        base: PathBuf,

        #[arg(long)]
        test: PathBuf,

        /// Where to write the diff image if they differ
        #[arg(short, long, default_value = "./diff.png")]
        output: PathBuf,

        /// Accepted mismatch fraction
        #[arg(long, env = ENV_MISMATCH_THRESHOLD, value_parser = parse_threshold)]
        threshold: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Run {
            playbook: playbook_path,
            host,
            rebase,
            search,
            imgdir,
            debug,
            threshold,
            no_wait_animation,
            finish_snapshot,
            lenient,
            chrome,
            json,
        } => {
            let parse_options = ParseOptions::default().lenient(lenient);
            let playbook = vbot::playbook::from_file(&playbook_path, &parse_options)?;

            let mut options = RunOptions::new()
                .imgdir(imgdir.unwrap_or_else(|| default_imgdir(&playbook_path)))
                .rebase(rebase)
                .show_window(debug)
                .wait_animation(!no_wait_animation)
                .finish_snapshot(finish_snapshot);
            if let Some(threshold) = threshold {
                options = options.mismatch_threshold(threshold);
            }
            if let Some(host) = host {
                options = options.host(host);
            }
            if let Some(search) = search {
                options = options.include(search);
            }
            if let Some(chrome) = chrome {
                options = options.chrome_path(chrome);
            }
            info!(imgdir = %options.imgdir.display(), "> Starting");

            let mut runner = ScenarioRunner::new(ChromeLauncher::new(), options);
            let mut reporter = LogReporter::new();
            let report = match runner.run_until(&playbook, &mut reporter, shutdown_signal()).await {
                Ok(report) => report,
                Err(RunError::Interrupted) => {
                    warn!("interrupted");
                    return Ok(ExitCode::from(130));
                }
                Err(err) => return Err(err.into()),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            for failed in report.failed_scenarios() {
                match &failed.failure {
                    Some(failure) => {
                        warn!("scenario '{}' failed: {}", failed.name, failure.message)
                    }
                    None => warn!(
                        "scenario '{}': {} screenshot(s) above the mismatch threshold",
                        failed.name,
                        failed.rejected_screenshots()
                    ),
                }
            }
            Ok(exit_code(report.passed()))
        }

        Commands::Validate {
            playbook: playbook_path,
            host,
            lenient,
        } => {
            let parse_options = ParseOptions::default().lenient(lenient);
            let playbook = vbot::playbook::from_file(&playbook_path, &parse_options)?;
            let urls = playbook.resolve_urls(host.as_deref())?;

            println!(
                "{}: {} scenario(s), viewport {}x{}",
                playbook_path.display(),
                playbook.scenarios.len(),
                playbook.view_width,
                playbook.view_height
            );
            for (scenario, url) in playbook.scenarios.iter().zip(&urls) {
                let shots = scenario.actions.iter().filter(|a| a.screenshot).count();
                println!(
                    "  {} -> {} ({} actions, {} screenshots)",
                    scenario.name,
                    url,
                    scenario.actions.len(),
                    shots
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Diff {
            base,
            test,
            output,
            threshold,
        } => {
            let threshold = threshold.unwrap_or(config::get().run.mismatch_threshold);
            let analysis = vbot::compare_files(&base, &test, &output, threshold)
                .with_context(|| format!("comparing {} with {}", base.display(), test.display()))?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            if analysis.has_mismatch() {
                println!("diff: {}", output.display());
            }
            Ok(exit_code(analysis.pass_threshold))
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// `{imgdir}/{playbook file stem}`
fn default_imgdir(playbook: &Path) -> PathBuf {
    let stem = playbook
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "playbook".to_string());
    PathBuf::from(config::imgdir()).join(stem)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Mismatch fractions live in `0.0..=1.0`
fn parse_threshold(value: &str) -> Result<f64, String> {
    let threshold: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(format!("{threshold} is outside 0.0 - 1.0"))
    }
}

fn exit_code(passed: bool) -> ExitCode {
    if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
