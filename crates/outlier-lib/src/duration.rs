//! Parsing of `TimeAgo` / `TimeStep` duration strings such as `30m`, `24h`, `7d`

use chrono::Duration;

use crate::anomaly::DetectionError;

/// Parse `<positive integer><unit>` where unit is one of `m`, `h`, `d`, `w`
pub fn parse_duration(raw: &str) -> Result<Duration, DetectionError> {
    let invalid = |reason: &str| DetectionError::InvalidDurationConfig {
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    let raw_trimmed = raw.trim();
    let unit = raw_trimmed
        .chars()
        .last()
        .ok_or_else(|| invalid("empty duration"))?;
    let amount = &raw_trimmed[..raw_trimmed.len() - unit.len_utf8()];

    if amount.is_empty() {
        return Err(invalid("missing amount"));
    }

    let amount: i64 = amount
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(&e.to_string()))?;

    if amount <= 0 {
        return Err(invalid("duration must be positive"));
    }

    let unit_secs: i64 = match unit {
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        'w' => 7 * 24 * 60 * 60,
        _ => return Err(invalid("expected one of m, h, d, w")),
    };

    amount
        .checked_mul(unit_secs)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| invalid("duration out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_duration("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_duration("2w").unwrap(), Duration::weeks(2));
    }

    #[test]
    fn test_rejects_malformed() {
        for raw in ["", "h", "1", "1x", "abch", "-1h", "0h", "1.5h"] {
            let err = parse_duration(raw).unwrap_err();
            assert!(
                matches!(err, DetectionError::InvalidDurationConfig { .. }),
                "{} should be rejected",
                raw
            );
        }
    }
}
