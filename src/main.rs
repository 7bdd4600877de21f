use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;

use bulwark::logging::{init_logging, LoggingConfig};
use bulwark::{
    BackoffPolicy, ErrorCategory, ErrorClassification, ErrorClassifier, Failure,
    OperationContext, RecoveryStrategy, RecoveryStrategyCatalog, ResilienceConfig, RetryPolicy,
};

#[derive(Parser, Debug)]
#[command(name = "bulwark")]
#[command(version)]
#[command(about = "Inspect error classification, retry schedules and resilience configuration")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colors (also respects NO_COLOR environment variable)
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify an error message and print the result as JSON
    Classify {
        /// Raw error message
        message: String,

        /// HTTP status code reported alongside the message
        #[arg(long, short)]
        status: Option<u16>,

        /// Feature the failing operation belongs to
        #[arg(long)]
        feature: Option<String>,

        /// Operation name within the feature
        #[arg(long, requires = "feature")]
        operation: Option<String>,
    },
    /// Print the retry delays for a category
    Schedule {
        /// Error category (e.g. network, rate_limit, SERVER_ERROR)
        #[arg(long, short, default_value = "network")]
        category: ErrorCategory,

        /// Configuration file with retry overrides
        #[arg(long)]
        config: Option<PathBuf>,

        /// Seed the jitter source for a reproducible schedule
        #[arg(long)]
        seed: Option<u64>,

        /// Print the schedule as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    CheckConfig {
        /// Path to the TOML configuration file
        path: PathBuf,
    },
}

#[derive(Serialize)]
struct ClassifyOutput {
    classification: ErrorClassification,
    recovery: RecoveryStrategy,
}

#[derive(Serialize)]
struct ScheduleOutput {
    category: ErrorCategory,
    max_retries: u32,
    delays_ms: Vec<u64>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(LoggingConfig::from_verbosity(cli.verbose).with_ansi(!cli.no_color));
    let color = !cli.no_color && std::env::var_os("NO_COLOR").is_none();

    match cli.command {
        Commands::Classify {
            message,
            status,
            feature,
            operation,
        } => {
            let failure = match status {
                Some(code) => Failure::status(code, message),
                None => Failure::message(message),
            };
            let context = feature.map(|feature| {
                OperationContext::new(feature, operation.unwrap_or_else(|| "unknown".to_string()))
            });
            let classification = ErrorClassifier::new().classify(&failure, context.as_ref());
            let recovery = RecoveryStrategyCatalog::new().for_classification(&classification);
            let output = ClassifyOutput {
                classification,
                recovery,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Schedule {
            category,
            config,
            seed,
            json,
        } => {
            let policy = match config {
                Some(path) => ResilienceConfig::load(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?
                    .retry_policy()?,
                None => RetryPolicy::default(),
            };
            let backoff = match seed {
                Some(seed) => BackoffPolicy::seeded(seed),
                None => BackoffPolicy::new(),
            };
            let retry = policy.for_category(category);
            let delays_ms: Vec<u64> = backoff
                .schedule(retry)
                .iter()
                .map(|d| d.as_millis() as u64)
                .collect();

            if json {
                let output = ScheduleOutput {
                    category,
                    max_retries: retry.max_retries,
                    delays_ms,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_schedule(category, &delays_ms, color);
            }
        }
        Commands::CheckConfig { path } => match ResilienceConfig::load(&path) {
            Ok(config) => {
                let label = "ok";
                if color {
                    println!("{} {}", label.green().bold(), path.display());
                } else {
                    println!("{} {}", label, path.display());
                }
                println!(
                    "  breaker: {} failures, {}s cooldown",
                    config.breaker.failure_threshold, config.breaker.cooldown_secs
                );
                let mut overridden: Vec<&String> = config.retry.keys().collect();
                overridden.sort();
                for name in overridden {
                    println!("  retry override: {}", name);
                }
            }
            Err(err) => {
                if color {
                    eprintln!("{} {}", "error:".red().bold(), err);
                } else {
                    eprintln!("error: {}", err);
                }
                return Ok(ExitCode::FAILURE);
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

fn print_schedule(category: ErrorCategory, delays_ms: &[u64], color: bool) {
    if delays_ms.is_empty() {
        println!("{}: not retried", category);
        return;
    }
    println!("{}: {} retries", category, delays_ms.len());
    for (i, ms) in delays_ms.iter().enumerate() {
        let delay = format!("{}ms", ms);
        if color {
            println!("  retry {} after {}", i + 1, delay.cyan());
        } else {
            println!("  retry {} after {}", i + 1, delay);
        }
    }
}
