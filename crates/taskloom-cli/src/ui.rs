//! Terminal output helpers for subcommands.

use colored::Colorize;

/// Passed check (green checkmark).
pub fn check_ok(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

/// Failed check (red cross).
pub fn check_fail(msg: &str) {
    println!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Section header: ">> Title" in cyan.
pub fn section(title: &str) {
    println!("  {} {}", ">>".bright_cyan().bold(), title.bold());
}

/// Key-value display: "  Label:       value".
pub fn kv(label: &str, value: &str) {
    println!("  {:<13}{}", format!("{label}:"), value);
}

/// Hint line in dimmed text.
pub fn hint(msg: &str) {
    println!("  {} {}", "hint:".dimmed(), msg.dimmed());
}
