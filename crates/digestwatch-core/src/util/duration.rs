use std::time::Duration;

use super::ParseError;

/// Parses a Go-style duration: one or more `<number><unit>` groups.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Fractions are allowed
/// per group, e.g. `"1.5s"`, `"1m30s"`, `"250ms"`. A bare `"0"` is zero.
pub fn parse_duration(input: &str) -> Result<Duration, ParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseError::new(input, "empty duration"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0f64;
    let mut rest = s;

    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_len == 0 {
            return Err(ParseError::new(input, "expected a number"));
        }
        let (num, tail) = rest.split_at(num_len);
        let value: f64 = num
            .parse()
            .map_err(|_| ParseError::new(input, format!("invalid number '{num}'")))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(ParseError::new(input, "missing unit")),
            other => return Err(ParseError::new(input, format!("unknown unit '{other}'"))),
        };

        total_nanos += value * nanos_per_unit;
        rest = next;
    }

    if total_nanos > u64::MAX as f64 {
        return Err(ParseError::new(input, "duration out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
