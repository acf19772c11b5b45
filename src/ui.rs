use chrono::{DateTime, Utc};
use colored::Colorize;
use declarative::Action;
use std::time::Duration;

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

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Colored plan symbol for an action
pub fn action_symbol(action: Action) -> String {
    let symbol = action.symbol();
    match action {
        Action::Create => symbol.green().to_string(),
        Action::Update => symbol.yellow().to_string(),
        Action::Replace => symbol.magenta().to_string(),
        Action::Destroy => symbol.red().to_string(),
        Action::NoOp => symbol.dimmed().to_string(),
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Format an elapsed time as `1m 05s` or `3.2s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

/// Format how long ago a timestamp was, relative to `now`
pub fn format_age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    match secs {
        0..60 => "just now".to_string(),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}

/// Truncate a value for one-line display, keeping the start
pub fn truncate_value(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        value.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = value.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(3200)), "3.2s");
        assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_elapsed(Duration::from_secs(600)), "10m 00s");
    }

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "just now");
        assert_eq!(format_age(now - chrono::Duration::minutes(5), now), "5m ago");
        assert_eq!(format_age(now - chrono::Duration::hours(3), now), "3h ago");
        assert_eq!(format_age(now - chrono::Duration::days(2), now), "2d ago");
        assert_eq!(format_age(now + chrono::Duration::minutes(1), now), "just now");
    }

    #[test]
    fn test_truncate_value() {
        assert_eq!(truncate_value("short", 10), "short");
        assert_eq!(truncate_value("ru-central1-a", 8), "ru-ce...");
        assert_eq!(truncate_value("anything", 2), "...");
        assert_eq!(truncate_value("", 5), "");
    }
}
