//! Colorful console output for the indexer binary.
//!
//! Structured logging goes through `tracing`; these helpers only dress up
//! the startup banner and the per-market console line printed by the
//! default logging subscriber in `main`.

use colored::Colorize;

use crate::types::{Market, MarketStatus};

/// Logs indexer startup information.
pub fn log_startup(programs: &[String], rpc_url: &str, ws_url: &str, poll_interval_secs: u64) {
    println!("\n{}", "═".repeat(80).bright_blue());
    println!("{}", "  Weathervane Market Indexer".bright_cyan().bold());
    println!("{}", "═".repeat(80).bright_blue());
    println!(
        "  {} {}",
        "Programs:  ".bright_white(),
        programs.join(", ").cyan()
    );
    println!("  {} {}", "RPC URL:   ".bright_white(), rpc_url.cyan());
    println!("  {} {}", "WS URL:    ".bright_white(), ws_url.cyan());
    println!(
        "  {} {}s",
        "Health Poll:".bright_white(),
        poll_interval_secs.to_string().cyan()
    );
    println!("{}\n", "═".repeat(80).bright_blue());
}

/// Logs a normalized market update as a single console line.
pub fn log_market(market: &Market, slot: u64) {
    let status = match market.status {
        MarketStatus::Active => "active".green(),
        MarketStatus::Paused => "paused".yellow(),
        MarketStatus::Expired => "expired".bright_yellow(),
        MarketStatus::Settled => "settled".bright_green(),
        MarketStatus::Cancelled => "cancelled".red(),
    };
    let probs = market
        .outcomes
        .iter()
        .map(|o| format!("{} {:.2}", o.name, o.probability))
        .collect::<Vec<_>>()
        .join(" / ");
    println!(
        "{} {} {} {} {} {} {}",
        "✓".bright_green(),
        market.name.bright_cyan(),
        "│".bright_black(),
        status,
        "│".bright_black(),
        probs.bright_white(),
        format!("slot {slot}").bright_black()
    );
}
