//! marks CLI
//!
//! Command-line interface for marks - personal bookmarks kept in sync.

use std::fs::OpenOptions;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use marks_core::Config;

mod commands;
mod metadata;
mod output;
mod prompt;

use commands::session::LoginArgs;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "marks")]
#[command(about = "marks - personal bookmarks, kept in sync")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List bookmarks, newest first
    #[command(alias = "ls")]
    List,
    /// Add a bookmark
    Add {
        /// URL to save
        url: String,
        /// Title (fetched from the page when omitted)
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Delete a bookmark
    #[command(alias = "delete")]
    Rm {
        /// Bookmark ID (full UUID or prefix)
        id: String,
    },
    /// Open a bookmark in the browser
    Open {
        /// Bookmark ID (full UUID or prefix)
        id: String,
    },
    /// Keep a live session and print the list on every change
    Watch,
    /// Show backend, user and counts
    Status,
    /// Store credentials issued by the identity provider
    Login {
        /// Access token (JWT)
        #[arg(long)]
        token: Option<String>,
        /// User id (overrides the token subject)
        #[arg(long)]
        user_id: Option<String>,
        /// Email to display
        #[arg(long)]
        email: Option<String>,
    },
    /// Forget stored credentials
    Logout,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (see `marks config show`)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Commands that work on the config file alone
    match cli.command {
        Commands::Config { command } => return handle_config_command(command, &output),
        Commands::Login {
            token,
            user_id,
            email,
        } => {
            return commands::session::login(
                LoginArgs {
                    token,
                    user_id,
                    email,
                },
                &output,
            )
        }
        Commands::Logout => return commands::session::logout(&output),
        _ => {}
    }

    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config);

    match cli.command {
        Commands::List => commands::bookmark::list(&config, &output).await,
        Commands::Add { url, title } => {
            commands::bookmark::add(&config, url, title, &output).await
        }
        Commands::Rm { id } => commands::bookmark::remove(&config, id, &output).await,
        Commands::Open { id } => commands::bookmark::open(&config, id, &output).await,
        Commands::Watch => commands::watch::watch(&config, &output).await,
        Commands::Status => commands::status::show(&config, &output).await,
        // Handled above
        Commands::Config { .. } | Commands::Login { .. } | Commands::Logout => unreachable!(),
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

/// Install the tracing subscriber when MARKS_LOG is set
///
/// Logs go to `log_file` if configured, stderr otherwise.
fn init_logging(config: &Config) {
    let Ok(log_level) = std::env::var("MARKS_LOG") else {
        return;
    };

    let env_filter = EnvFilter::new(format!("marks_core={},marks={}", log_level, log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match config.log_file {
        Some(ref log_path) => {
            let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                    return;
                }
            };
            let _ = builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
}
