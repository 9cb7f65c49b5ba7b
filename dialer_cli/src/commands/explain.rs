//! Explain command - Describe a native error code

use anyhow::Result;
use colored::Colorize;

use super::warn;
use crate::config::Config;

pub fn run(code: u32) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let table = config.error_table();

    println!("{} {}", format!("{}:", code).bold(), table.message(code));

    if config.error_messages.contains_key(&code) {
        println!("  {}", "(custom message from config)".dimmed());
    } else if !table.is_known(code) {
        warn("This code is not in the known error table");
    }
    Ok(())
}
