mod commands;
mod config;
mod serve;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Config, Overrides};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Freelance marketplace engagement engine.
#[derive(Parser)]
#[command(
    name = "hireline",
    version,
    about = "Freelance marketplace engagement engine"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Log filter, e.g. `debug` or `hireline_engine=debug` (overrides HIRELINE_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP JSON API server
    Serve {
        /// Path to a hireline.toml config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Port to listen on [default: 8080]
        #[arg(long)]
        port: Option<u16>,
        /// JSON file to persist records to (in-memory when unset)
        #[arg(long)]
        data_file: Option<PathBuf>,
        /// Platform fee percentage applied on acceptance [default: 5]
        #[arg(long)]
        fee_percent: Option<Decimal>,
        /// Require this API key on every route except /health
        #[arg(long)]
        api_key: Option<String>,
        /// Requests per minute per client IP [default: 120]
        #[arg(long)]
        rate_limit: Option<u64>,
    },

    /// Preview the escrow split for an accepted budget
    Fees {
        /// Accepted budget, e.g. 900 or 1250.50
        amount: Decimal,
        /// Platform fee percentage [default: 5]
        #[arg(long)]
        percent: Option<Decimal>,
    },

    /// Summarize the contents of a JSON record store
    Inspect {
        /// Path to the data file written by `serve --data-file`
        data_file: PathBuf,
        /// Show one project with its proposals, milestones and deliverables
        #[arg(long)]
        project: Option<String>,
    },
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(l) => EnvFilter::new(l),
        None => EnvFilter::try_from_env("HIRELINE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn runtime() -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match cli.command {
        Commands::Serve {
            config,
            port,
            data_file,
            fee_percent,
            api_key,
            rate_limit,
        } => {
            let mut settings = match Config::load(config.as_deref()) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error: {}", e);
                    process::exit(1);
                }
            };
            if let Err(e) = settings.apply_process_env() {
                eprintln!("error: {}", e);
                process::exit(1);
            }
            settings.apply_overrides(Overrides {
                port,
                fee_percent,
                data_file,
                api_key,
                rate_limit,
            });

            if let Err(e) = runtime().block_on(serve::start_server(settings)) {
                eprintln!("error: {}", e);
                process::exit(1);
            }
        }
        Commands::Fees { amount, percent } => {
            commands::fees::cmd_fees(amount, percent, cli.output);
        }
        Commands::Inspect { data_file, project } => {
            runtime().block_on(commands::inspect::cmd_inspect(
                &data_file,
                project.as_deref(),
                cli.output,
            ));
        }
    }
}
