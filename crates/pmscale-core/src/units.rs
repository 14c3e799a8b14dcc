//! Unit conversions and wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Bytes per megabyte (MiB).
pub const MEMORY_MB: u64 = 1_048_576;

/// Convert bytes to whole megabytes, rounding to nearest.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    (bytes as f64 / MEMORY_MB as f64).round()
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Human-readable byte size, e.g. `1.5 GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_mb_rounds() {
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(MEMORY_MB), 1.0);
        assert_eq!(bytes_to_mb(MEMORY_MB * 3 / 2), 2.0);
        assert_eq!(bytes_to_mb(MEMORY_MB / 4), 0.0);
    }

    #[test]
    fn format_bytes_values() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * MEMORY_MB / 2), "1.5 MB");
        assert_eq!(format_bytes(4 * 1024 * MEMORY_MB), "4.0 GB");
    }
}
