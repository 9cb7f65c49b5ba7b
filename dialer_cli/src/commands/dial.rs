//! Dial command - Run a simulated dial and follow its progress

use anyhow::{anyhow, bail, Result};
use colored::Colorize;
use dialer_core::{
    ConnectionState, DialEvent, DialRequest, Dialer, DialerError, SimulatedEngine, DEFAULT_SCRIPT,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{error, info, success, warn};
use crate::config::Config;

/// Error injected when only `--fail-at` is given
const DEFAULT_FAILURE_CODE: u32 = 691;

/// Phase that fails when only `--error` is given
const DEFAULT_FAILURE_PHASE: ConnectionState = ConnectionState::Authenticate;

/// How long to wait for the last progress lines once the dial is over
const PROGRESS_DRAIN: Duration = Duration::from_millis(200);

/// Parse a phase name for clap
pub fn parse_phase(name: &str) -> std::result::Result<ConnectionState, String> {
    ConnectionState::from_name(name)
        .ok_or_else(|| format!("unknown phase '{}', see `dialer phases`", name))
}

/// Options for a single simulated dial
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    pub entry: Option<String>,
    pub fail_at: Option<ConnectionState>,
    pub error_code: Option<u32>,
    pub cancel_after: Option<u64>,
    pub delay: Option<u64>,
}

impl DialOptions {
    /// Phase and code to inject, if any
    fn failure(&self) -> Result<Option<(ConnectionState, u32)>> {
        let failure = match (self.fail_at, self.error_code) {
            (None, None) => return Ok(None),
            (phase, code) => (
                phase.unwrap_or(DEFAULT_FAILURE_PHASE),
                code.unwrap_or(DEFAULT_FAILURE_CODE),
            ),
        };

        if !DEFAULT_SCRIPT.contains(&failure.0) {
            bail!(
                "{} is never reported by a simulated dial, pick one of: {}",
                failure.0,
                DEFAULT_SCRIPT
                    .iter()
                    .map(|state| state.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if failure.1 == 0 {
            bail!("Error code must not be 0");
        }
        Ok(Some(failure))
    }
}

pub async fn run(options: DialOptions) -> Result<()> {
    let config = Config::load_or_default();
    let entry = options
        .entry
        .clone()
        .or_else(|| config.default_entry.clone())
        .ok_or_else(|| anyhow!("No entry given and no default entry configured"))?;

    let delay = options.delay.unwrap_or(config.phase_delay_ms);
    debug!("Simulated engine reports every {} ms", delay);
    let mut builder = SimulatedEngine::builder().delay(Duration::from_millis(delay));
    if let Some((phase, code)) = options.failure()? {
        debug!("Simulated dial fails at {} with {}", phase, code);
        builder = builder.fail_at(phase, code);
    }
    let engine = Arc::new(builder.build());
    let dialer = Dialer::new(engine, Arc::new(config.error_table()))?;

    println!();
    println!("{}", "  DIALER  ".on_bright_blue().white().bold());
    println!();
    info(&format!("Dialing {}...", entry.cyan()));
    println!();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")?,
    );
    spinner.set_message("Starting...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let progress = {
        let mut events = dialer.subscribe();
        let spinner = spinner.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DialEvent::StateChanged { state }) => {
                        spinner.println(format!("  {} {}", "•".cyan(), state));
                        spinner.set_message(format!("{}...", state));
                    }
                    Ok(DialEvent::Completed) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                }
            }
        })
    };

    let token = CancellationToken::new();
    let interrupt = {
        let token = token.clone();
        let cancel_after = options.cancel_after;
        tokio::spawn(async move {
            match cancel_after {
                Some(ms) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                        _ = tokio::signal::ctrl_c() => {}
                    }
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
            token.cancel();
        })
    };

    let outcome = dialer.dial(&DialRequest::new(&entry), &token).await;
    interrupt.abort();
    let _ = tokio::time::timeout(PROGRESS_DRAIN, progress).await;
    spinner.finish_and_clear();
    println!();

    match outcome {
        Ok(connection) => {
            success(&format!("Connected to {}", connection.entry_name.cyan().bold()));
            println!("  {} {}", "Handle:".dimmed(), connection.handle);
            println!(
                "  {} {} ({})",
                "Device:".dimmed(),
                connection.device_name,
                connection.device_type
            );
            println!("  {} {}", "Connection id:".dimmed(), connection.connection_id);
            println!();
            Ok(())
        }
        Err(DialerError::Cancelled) => {
            warn("Dial cancelled, the connection attempt was hung up");
            println!();
            Ok(())
        }
        Err(e) => {
            error(&format!("Dial failed: {}", e));
            if let Some(code) = e.code() {
                println!();
                println!("  {} {}", "Details:".dimmed(), format!("dialer explain {}", code).cyan());
            }
            println!();
            Err(anyhow!("Dial of {} failed", entry))
        }
    }
}
