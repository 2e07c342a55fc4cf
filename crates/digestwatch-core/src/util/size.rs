use super::ParseError;

const SUFFIXES: [(&str, f64); 10] = [
    ("KIB", 1024.0),
    ("MIB", 1024.0 * 1024.0),
    ("GIB", 1024.0 * 1024.0 * 1024.0),
    ("KB", 1024.0),
    ("MB", 1024.0 * 1024.0),
    ("GB", 1024.0 * 1024.0 * 1024.0),
    ("K", 1000.0),
    ("M", 1000.0 * 1000.0),
    ("G", 1000.0 * 1000.0 * 1000.0),
    ("B", 1.0),
];

/// Parses a human-readable size into bytes.
///
/// `KB`/`MB`/`GB` and `KiB`/`MiB`/`GiB` are binary (×1024), bare `K`/`M`/`G`
/// are decimal (×1000). Fractions are accepted and truncated after scaling:
/// `"1.5MB"` is 1572864 bytes. Case-insensitive.
pub fn parse_size(input: &str) -> Result<u64, ParseError> {
    let s = input.trim().to_ascii_uppercase();
    if s.is_empty() {
        return Err(ParseError::new(input, "empty size string"));
    }

    let (num, multiplier) = SUFFIXES
        .iter()
        .find_map(|&(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, mult)))
        .unwrap_or((s.as_str(), 1.0));

    let value: f64 = num
        .trim()
        .parse()
        .map_err(|e| ParseError::new(input, format!("invalid number: {e}")))?;

    if !value.is_finite() || value < 0.0 {
        return Err(ParseError::new(input, "size must be a non-negative number"));
    }

    Ok((value * multiplier) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_bytes() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size(" 512B ").unwrap(), 512);
    }

    #[test]
    fn binary_suffixes() {
        assert_eq!(parse_size("1MB").unwrap(), 1 << 20);
        assert_eq!(parse_size("5GB").unwrap(), 5 << 30);
        assert_eq!(parse_size("2KiB").unwrap(), 2048);
        assert_eq!(parse_size("1mib").unwrap(), 1 << 20);
    }

    #[test]
    fn decimal_suffixes() {
        assert_eq!(parse_size("500M").unwrap(), 500_000_000);
        assert_eq!(parse_size("5k").unwrap(), 5000);
        assert_eq!(parse_size("1G").unwrap(), 1_000_000_000);
    }

    #[test]
    fn fractions() {
        assert_eq!(parse_size("1.5MB").unwrap(), 1_572_864);
        assert_eq!(parse_size("0.5K").unwrap(), 500);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("ten MB").is_err());
        assert!(parse_size("-1MB").is_err());
        let err = parse_size("1XB").unwrap_err();
        assert_eq!(err.input, "1XB");
    }
}
