//! Validity window parsing.
//!
//! Accepts a sequence of `<integer><unit>` terms with units `h`, `m`, `s`
//! and `ms`, e.g. `"10m"`, `"1h30m"`, `"90s"`.

use chrono::Duration;

/// Error for an unparsable validity window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid duration {input:?}: {reason}")]
pub struct DurationError {
    pub input: String,
    pub reason: &'static str,
}

/// Parse a validity window.
pub fn parse_validity(input: &str) -> Result<Duration, DurationError> {
    let fail = |reason| DurationError {
        input: input.to_string(),
        reason,
    };

    let s = input.trim();
    if s.is_empty() {
        return Err(fail("empty duration"));
    }

    let mut total = Duration::zero();
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(fail("expected a number"));
        }
        let value: i64 = rest[..digits].parse().map_err(|_| fail("number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let term = match &rest[..unit_len] {
            "h" => Duration::try_hours(value),
            "m" => Duration::try_minutes(value),
            "s" => Duration::try_seconds(value),
            "ms" => Duration::try_milliseconds(value),
            "" => return Err(fail("missing unit")),
            _ => return Err(fail("unknown unit")),
        }
        .ok_or_else(|| fail("number out of range"))?;
        rest = &rest[unit_len..];

        total = total
            .checked_add(&term)
            .ok_or_else(|| fail("number out of range"))?;
    }

    Ok(total)
}
