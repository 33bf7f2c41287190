//! # Duration Parsing
//!
//! Parses the Kubernetes duration strings used by `rotationPollInterval`.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;

static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").expect("duration pattern must compile")
});

/// Parse a Kubernetes duration string into a `std::time::Duration`.
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d".
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let trimmed = duration_str.trim();

    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("duration string cannot be empty"));
    }

    let lowered = trimmed.to_lowercase();
    let captures = DURATION_PATTERN.captures(&lowered).ok_or_else(|| {
        anyhow::anyhow!(
            "invalid duration format '{}'. Expected format: <number><unit> (e.g., '30s', '2m', '1h')",
            trimmed
        )
    })?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid duration number in '{}': {}", trimmed, e))?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "duration must be greater than 0, got '{}'",
            trimmed
        ));
    }

    let seconds = match &captures["unit"] {
        "s" => number,
        "m" => number * 60,
        "h" => number * 3600,
        "d" => number * 86400,
        unit => {
            return Err(anyhow::anyhow!(
                "invalid unit '{}' in duration '{}'. Expected: s, m, h, or d",
                unit,
                trimmed
            ));
        }
    };

    Ok(Duration::from_secs(seconds))
}
