#![allow(dead_code)]

use colored::Colorize;
use declarative::{Event, Outcome, ProgressCallback, RunSummary, display_json};
use serde_json::Value;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Run Progress
// ============================================================================

/// Prints one line per resource as a run progresses
pub struct Reporter {
    verbose: u8,
}

impl Reporter {
    pub fn new(verbose: u8) -> Self {
        Self { verbose }
    }
}

impl ProgressCallback for Reporter {
    fn on_resource_start(&mut self, fqn: &str, event: Event) {
        if self.verbose > 0 {
            dim(&format!("{event} {fqn}..."));
        }
    }

    fn on_props_changed(&mut self, fqn: &str, old: Option<&Value>, new: &Value) {
        if self.verbose > 0 {
            dim(&format!("changes to {fqn}:"));
            print_props_diff(old, new);
        }
    }

    fn on_resource_complete(&mut self, fqn: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Created => println!("  {} {}", "+".green().bold(), fqn),
            Outcome::Updated => println!("  {} {}", "~".yellow().bold(), fqn),
            Outcome::Deleted => println!("  {} {}", "-".red().bold(), fqn),
            Outcome::Replaced => {
                println!("  {} {} {}", "±".magenta().bold(), fqn, "(replaced)".dimmed());
            }
            Outcome::Skipped if self.verbose > 0 => dim(&format!("= {fqn} (unchanged)")),
            Outcome::Read if self.verbose > 0 => dim(&format!("= {fqn} (read)")),
            Outcome::Skipped | Outcome::Read => {}
            Outcome::Failed { error } => {
                eprintln!("  {} {} {}", "✗".red().bold(), fqn, error.red());
            }
        }
    }
}

/// Line diff of two props values, rendered as canonical JSON
///
/// Secrets stay masked.
pub fn props_diff_lines(old: Option<&Value>, new: &Value) -> Vec<(char, String)> {
    let before = old.map(display_json).unwrap_or_default();
    let after = display_json(new);

    let diff = similar::TextDiff::from_lines(&before, &after);
    let mut lines = Vec::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => '-',
            similar::ChangeTag::Insert => '+',
            similar::ChangeTag::Equal => continue,
        };
        lines.push((sign, change.value().trim_end().to_string()));
    }
    lines
}

fn print_props_diff(old: Option<&Value>, new: &Value) {
    for (sign, line) in props_diff_lines(old, new) {
        if sign == '-' {
            println!("    {}", format!("- {line}").red());
        } else {
            println!("    {}", format!("+ {line}").green());
        }
    }
}

/// Print the outcome counts of a run
pub fn summary(summary: &RunSummary) {
    let mut parts = Vec::new();
    for (count, label) in [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.deleted, "deleted"),
        (summary.replaced, "replaced"),
        (summary.skipped, "unchanged"),
        (summary.read, "read"),
        (summary.failed, "failed"),
    ] {
        if count > 0 {
            parts.push(format!("{count} {label}"));
        }
    }

    if parts.is_empty() {
        info("Nothing to do");
    } else if summary.is_success() {
        success(&parts.join(", "));
    } else {
        error(&parts.join(", "));
    }
}
