//! Shared CLI helpers — reply printing, version banner.

use std::io::Write;

use colored::Colorize;

use parley_core::types::UsageStats;

/// Print a complete reply, with its token usage when known.
pub fn print_reply(reply: &str, usage: Option<&UsageStats>) {
    print_reply_header();
    if reply.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{reply}");
    }
    if let Some(usage) = usage {
        println!("{}", format_usage(usage).dimmed());
    }
    println!();
}

/// Header printed before a streamed reply.
pub fn print_reply_header() {
    println!();
    println!("{}", "Parley".cyan().bold());
}

/// Print one streamed fragment without a newline.
pub fn print_fragment(fragment: &str) {
    print!("{fragment}");
    let _ = std::io::stdout().flush();
}

/// End a streamed reply.
pub fn finish_reply() {
    println!();
    println!();
}

pub fn format_usage(usage: &UsageStats) -> String {
    format!(
        "tokens: {} in / {} out / {} total",
        usage.input_tokens, usage.output_tokens, usage.total_tokens
    )
}

/// Print the banner shown at REPL and gateway start.
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "Parley".cyan().bold(), version.dimmed());
    println!();
}

/// Print a "thinking" placeholder (for non-streamed replies).
pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

/// Clear the "thinking" placeholder.
pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_usage_line() {
        let usage = UsageStats::new(12, 30, None);
        assert_eq!(format_usage(&usage), "tokens: 12 in / 30 out / 42 total");
    }

    #[test]
    fn format_usage_zero() {
        assert_eq!(
            format_usage(&UsageStats::zero()),
            "tokens: 0 in / 0 out / 0 total"
        );
    }
}
