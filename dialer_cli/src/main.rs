//! Dialer CLI - follow a callback-driven dial from the terminal
//!
//! Usage:
//!   dialer dial <entry>   - Run a simulated dial
//!   dialer phases         - List connection phases
//!   dialer explain <code> - Describe a native error code

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::dial::{parse_phase, DialOptions};
use dialer_core::ConnectionState;
use tracing_subscriber::EnvFilter;

/// Dialer - watch a dial-up or VPN connection attempt phase by phase
#[derive(Parser)]
#[command(name = "dialer")]
#[command(author = "Dialer Team")]
#[command(version)]
#[command(about = "Drive simulated remote-access dials and inspect their outcome")]
#[command(long_about = r#"
Dialer runs a connection attempt against an in-process engine that reports
progress from its own thread, exactly like a native remote-access engine.

Dial an entry and watch every phase:
  $ dialer dial "Office VPN"

Make it fail at a given phase, or cancel it halfway:
  $ dialer dial "Office VPN" --fail-at authenticate --error 691
  $ dialer dial "Office VPN" --cancel-after 500
"#)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dial an entry and follow its progress
    Dial {
        /// Entry to dial (defaults to the configured entry)
        entry: Option<String>,

        /// Phase at which the dial fails
        #[arg(long, value_parser = parse_phase)]
        fail_at: Option<ConnectionState>,

        /// Native error code reported by the failing phase
        #[arg(short, long = "error")]
        error_code: Option<u32>,

        /// Cancel the dial after this many milliseconds
        #[arg(short, long)]
        cancel_after: Option<u64>,

        /// Milliseconds between two progress reports
        #[arg(short, long)]
        delay: Option<u64>,
    },

    /// List the connection phases and their native values
    Phases,

    /// Describe a native error code
    Explain {
        /// Native error code, e.g. 691
        code: u32,
    },

    /// Manage configuration (default entry, custom messages, etc.)
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Set the delay between simulated progress reports
    SetDelay {
        /// Delay in milliseconds
        ms: u64,
    },
    /// Set the entry dialed when none is given
    SetEntry {
        /// Entry name
        entry: String,
    },
    /// Use a custom message for a native error code
    SetMessage {
        /// Native error code
        code: u32,
        /// Message to show instead of the built-in one
        message: String,
    },
    /// Remove a custom message
    ClearMessage {
        /// Native error code
        code: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();

    match cli.command {
        Commands::Dial {
            entry,
            fail_at,
            error_code,
            cancel_after,
            delay,
        } => {
            commands::dial::run(DialOptions {
                entry,
                fail_at,
                error_code,
                cancel_after,
                delay,
            })
            .await
        }
        Commands::Phases => commands::phases::run(),
        Commands::Explain { code } => commands::explain::run(code),
        Commands::Config { action } => run_config(action),
    }
}

fn run_config(action: ConfigAction) -> Result<()> {
    use colored::Colorize;

    match action {
        ConfigAction::Show => {
            let cfg = config::Config::load()?;
            println!("{}", "Configuration:".bold());
            println!("  {} {} ms", "Phase delay:".dimmed(), cfg.phase_delay_ms);
            match &cfg.default_entry {
                Some(entry) => println!("  {} {}", "Default entry:".dimmed(), entry.cyan()),
                None => println!("  {} {}", "Default entry:".dimmed(), "none".dimmed()),
            }
            if cfg.error_messages.is_empty() {
                println!("  {} {}", "Custom messages:".dimmed(), "none".dimmed());
            } else {
                println!("  {}", "Custom messages:".dimmed());
                for (code, message) in &cfg.error_messages {
                    println!("    {} {} {}", "•".cyan(), code, message);
                }
            }
        }
        ConfigAction::Path => {
            let path = config::Config::path()?;
            println!("{}", path.display());
        }
        ConfigAction::SetDelay { ms } => {
            let mut cfg = config::Config::load()?;
            cfg.phase_delay_ms = ms;
            cfg.save()?;
            commands::success(&format!("Phase delay set to {} ms", ms));
        }
        ConfigAction::SetEntry { entry } => {
            let mut cfg = config::Config::load()?;
            cfg.default_entry = Some(entry.clone());
            cfg.save()?;
            commands::success(&format!("Default entry set to {}", entry.cyan()));
        }
        ConfigAction::SetMessage { code, message } => {
            let mut cfg = config::Config::load()?;
            if cfg.set_message(code, &message) {
                cfg.save()?;
                commands::success(&format!("Custom message set for {}", code));
            } else {
                commands::info(&format!("Message for {} is unchanged", code));
            }
        }
        ConfigAction::ClearMessage { code } => {
            let mut cfg = config::Config::load()?;
            if cfg.clear_message(code) {
                cfg.save()?;
                commands::success(&format!("Removed custom message for {}", code));
            } else {
                commands::error(&format!("No custom message for {}", code));
            }
        }
    }
    Ok(())
}
