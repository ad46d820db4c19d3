//! logvault CLI - multi-tenant log ingestion server and admin tool.

use anyhow::Result;
use clap::{Parser, Subcommand};
use logvault_core::config::LogFormat;
use logvault_core::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, bad values)
    ConfigError = 1,
    /// Hot store error (SQLite, duplicate service name)
    StorageError = 2,
    /// Archive tier error (partition append, sweep)
    ArchiveError = 3,
    /// Authentication or authorization failure
    AuthError = 4,
    /// Rejected input
    ValidationError = 5,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code by inspecting its source chain.
    fn from_error(error: &anyhow::Error) -> Self {
        use logvault_core::Error;

        for cause in error.chain() {
            if let Some(err) = cause.downcast_ref::<Error>() {
                return match err {
                    Error::Config(_) => ExitCode::ConfigError,
                    Error::Storage(_) | Error::DuplicateServiceName(_) => ExitCode::StorageError,
                    Error::Archive(_) | Error::Io(_) => ExitCode::ArchiveError,
                    Error::Auth(_) => ExitCode::AuthError,
                    Error::Validation(_) | Error::BatchRejected(_) => ExitCode::ValidationError,
                    _ => ExitCode::RuntimeError,
                };
            }
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod cors;
mod rate_limit;
mod server;

/// Default config file looked up when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Parser)]
#[command(name = "logvault")]
#[command(about = "Multi-tenant log ingestion and tiered storage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and maintenance scheduler
    Serve {
        /// Override listen address
        #[arg(long)]
        bind: Option<String>,

        /// Admin API key; admin routes are disabled without one
        #[arg(long, env = "LOGVAULT_ADMIN_API_KEY", hide_env_values = true)]
        admin_api_key: Option<String>,
    },

    /// Move aged hot entries into the archive
    Archive {
        /// Minimum entry age in days
        #[arg(long, default_value_t = 1)]
        days_old: u32,
    },

    /// Delete archive partitions past retention
    Sweep,

    /// Manage services
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Show status and health
    Status {
        /// Server base URL
        #[arg(long, default_value = "http://localhost:3000")]
        url: String,
    },

    /// Validate configuration file
    Validate,
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Register a service and print its API key
    Create {
        /// Service name
        name: String,
    },
    /// List registered services
    List,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet
            eprintln!("Error: {:#}", e);
            return ExitCode::from_error(&e);
        }
    };

    // Initialize logging
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(config.monitoring.log_level.as_filter()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Configure log format based on config
    match config.monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli.command, config).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Serve {
            bind,
            admin_api_key,
        } => {
            commands::serve::run(config, bind, admin_api_key).await?;
        }

        Commands::Archive { days_old } => {
            commands::maintenance::archive(config, days_old).await?;
        }

        Commands::Sweep => {
            commands::maintenance::sweep(config).await?;
        }

        Commands::Service { action } => match action {
            ServiceAction::Create { name } => {
                commands::service::create(config, &name).await?;
            }
            ServiceAction::List => {
                commands::service::list(config).await?;
            }
        },

        Commands::Status { url } => {
            commands::status::run(&url).await?;
        }

        Commands::Validate => {
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Load the given file, else `config.toml` if present, else defaults.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Path::new(DEFAULT_CONFIG_FILE),
        None => return Ok(Config::default()),
    };

    // Unreadable files count as configuration errors, not archive I/O
    Config::from_file(path).map_err(|e| {
        logvault_core::Error::Config(format!("{}: {}", path.display(), e)).into()
    })
}
