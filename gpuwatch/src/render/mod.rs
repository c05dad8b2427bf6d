//! Renderers for the aggregate state
//!
//! - `tui`: full-screen dashboard (ratatui + crossterm), two host panels per row
//! - `plain`: line-oriented table for pipes and dumb terminals
//!
//! Both share the thresholds and hints below.

pub mod plain;
pub mod tui;

pub use plain::PlainRenderer;
pub use tui::TuiRenderer;

/// Severity bucket used for colors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    Medium,
    High,
}

pub fn usage_level(percent: f64) -> Level {
    if percent < 30.0 {
        Level::Low
    } else if percent < 80.0 {
        Level::Medium
    } else {
        Level::High
    }
}

pub fn temperature_level(celsius: i32) -> Level {
    if celsius < 60 {
        Level::Low
    } else if celsius < 80 {
        Level::Medium
    } else {
        Level::High
    }
}

/// `█` for the used part, `░` for the rest
pub fn bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64) as usize;
    let mut out = String::with_capacity(width * 3);
    out.extend(std::iter::repeat('█').take(filled));
    out.extend(std::iter::repeat('░').take(width - filled));
    out
}

/// Operator hint for a failure reason, if one applies
pub fn advice(reason: &str) -> Option<&'static str> {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("timed out") {
        Some("Check firewall or IP")
    } else if lower.contains("connection refused") {
        Some("Check Port in ~/.ssh/config")
    } else if lower.contains("could not resolve") {
        Some("Check Hostname/DNS")
    } else if lower.contains("permission denied") {
        Some("Check ssh keys / agent")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(usage_level(0.0), Level::Low);
        assert_eq!(usage_level(30.0), Level::Medium);
        assert_eq!(usage_level(80.0), Level::High);
        assert_eq!(temperature_level(59), Level::Low);
        assert_eq!(temperature_level(60), Level::Medium);
        assert_eq!(temperature_level(85), Level::High);
    }

    #[test]
    fn test_bar() {
        assert_eq!(bar(0.0, 4), "░░░░");
        assert_eq!(bar(50.0, 8), "████░░░░");
        assert_eq!(bar(100.0, 4), "████");
        assert_eq!(bar(250.0, 2), "██");
    }

    #[test]
    fn test_advice() {
        assert_eq!(advice("SSH timed out after 20s"), Some("Check firewall or IP"));
        assert_eq!(
            advice("ssh: connect to host x port 22: Connection refused"),
            Some("Check Port in ~/.ssh/config")
        );
        assert_eq!(
            advice("ssh: Could not resolve hostname x: Name or service not known"),
            Some("Check Hostname/DNS")
        );
        assert_eq!(advice("exit code 9"), None);
    }
}
