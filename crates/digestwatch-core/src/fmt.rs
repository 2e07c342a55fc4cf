//! Shared formatting helpers for log fields.

/// Format byte count with binary units and two decimals.
///
/// `"0B"`, `"512B"`, `"1.00KiB"`, `"1.13MiB"`, `"5.00GiB"`
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const SUFFIXES: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < UNIT {
        return format!("{}B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp + 1 < SUFFIXES.len() {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!("{:.2}{}", bytes as f64 / div as f64, SUFFIXES[exp])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1024), "1.00KiB");
        assert_eq!(format_bytes(1_180_000), "1.13MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00GiB");
    }

    #[test]
    fn format_bytes_huge_stays_in_table() {
        assert!(format_bytes(u64::MAX).ends_with("PiB"));
    }
}
