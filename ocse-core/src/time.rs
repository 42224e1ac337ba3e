use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};

use crate::error::CseError;

/// oneM2M basic-format timestamp: `YYYYMMDDTHHMMSS[,ffffff]`, always UTC.
///
/// The format is fixed-width, so lexicographic string comparison orders
/// timestamps correctly; storage backends rely on that.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%S,%6f").to_string()
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn now_timestamp() -> String {
    format_timestamp(now())
}

/// Parse a basic-format timestamp, with or without the fractional part.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, CseError> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S,%f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S"))
        .map_err(|_| CseError::bad_request(format!("invalid timestamp: {s}")))?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Parse an ISO-8601 period (`PnYnMnDTnHnMnS`, `PnW`) into a duration.
///
/// Years and months are approximated as 365 and 30 days, matching common
/// service-layer practice.
pub fn parse_duration(s: &str) -> Result<Duration, CseError> {
    let body = s
        .strip_prefix('P')
        .ok_or_else(|| CseError::bad_request(format!("invalid duration: {s}")))?;
    if body.is_empty() {
        return Err(CseError::bad_request(format!("invalid duration: {s}")));
    }

    let (date_part, time_part) = match body.split_once('T') {
        Some((d, t)) => (d, t),
        None => (body, ""),
    };

    let mut total = Duration::zero();
    let mut number = String::new();

    for ch in date_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let n: i64 = number
            .parse()
            .map_err(|_| CseError::bad_request(format!("invalid duration: {s}")))?;
        number.clear();
        total = total
            + match ch {
                'Y' => Duration::days(n * 365),
                'M' => Duration::days(n * 30),
                'W' => Duration::weeks(n),
                'D' => Duration::days(n),
                _ => return Err(CseError::bad_request(format!("invalid duration: {s}"))),
            };
    }
    if !number.is_empty() {
        return Err(CseError::bad_request(format!("invalid duration: {s}")));
    }

    for ch in time_part.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let n: i64 = number
            .parse()
            .map_err(|_| CseError::bad_request(format!("invalid duration: {s}")))?;
        number.clear();
        total = total
            + match ch {
                'H' => Duration::hours(n),
                'M' => Duration::minutes(n),
                'S' => Duration::seconds(n),
                _ => return Err(CseError::bad_request(format!("invalid duration: {s}"))),
            };
    }
    if !number.is_empty() {
        return Err(CseError::bad_request(format!("invalid duration: {s}")));
    }

    Ok(total)
}

/// Compute the effective expiration timestamp for a resource.
///
/// A missing request value defaults to `now + max_delta`; a requested value
/// further out than the maximum is clamped down to it; a value in the past is
/// rejected.
pub fn clamp_expiration(
    requested: Option<&str>,
    max_delta_secs: u64,
) -> Result<String, CseError> {
    let now = self::now();
    let ceiling = now + Duration::seconds(max_delta_secs as i64);
    match requested {
        None => Ok(format_timestamp(ceiling)),
        Some(et) => {
            let parsed = parse_timestamp(et)?;
            if parsed <= now {
                return Err(CseError::bad_request(format!(
                    "expiration time already past: {et}"
                )));
            }
            if parsed > ceiling {
                Ok(format_timestamp(ceiling))
            } else {
                Ok(format_timestamp(parsed))
            }
        }
    }
}

/// True when the timestamp lies in the past.
pub fn is_past(ts: &str) -> Result<bool, CseError> {
    Ok(parse_timestamp(ts)? <= now())
}
