//! Phases command - List the connection phases the engine reports

use anyhow::Result;
use colored::Colorize;
use dialer_core::{ConnectionState, DEFAULT_SCRIPT};

pub fn run() -> Result<()> {
    println!("{}", "Connection phases:".bold());
    println!();

    for state in ConnectionState::ALL {
        let name = format!("{:<22}", state.to_string());
        let name = if state.is_terminal_success() {
            name.green().bold()
        } else if state.is_paused() {
            name.yellow()
        } else {
            name.normal()
        };

        let scripted = if DEFAULT_SCRIPT.contains(&state) {
            "•".cyan().to_string()
        } else {
            " ".to_string()
        };

        println!("  {} {} {}", scripted, name, format!("{:#06x}", state.raw()).dimmed());
    }

    println!();
    println!(
        "{}",
        "• reported by a simulated dial, yellow phases pause for caller input".dimmed()
    );
    println!();
    Ok(())
}
