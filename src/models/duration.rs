//! Duration strings as written in HelmRelease specs and the config file.
//!
//! Accepts a sequence of `<integer><unit>` terms with units `h`, `m`, `s`
//! and `ms`, e.g. `"300s"`, `"5m"`, `"1h30m"` or `"5m0s"`.

use std::time::Duration;

use crate::error::{Error, Result};

pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::validation("empty duration"));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(Error::validation(format!("invalid duration format: {}", s)));
        }
        let (number, tail) = rest.split_at(digits);
        let value: u64 = number
            .parse()
            .map_err(|_| Error::validation(format!("invalid duration: {}", s)))?;

        let (term, tail) = if let Some(t) = tail.strip_prefix("ms") {
            (Duration::from_millis(value), t)
        } else if let Some(t) = tail.strip_prefix('h') {
            (Duration::from_secs(value * 3600), t)
        } else if let Some(t) = tail.strip_prefix('m') {
            (Duration::from_secs(value * 60), t)
        } else if let Some(t) = tail.strip_prefix('s') {
            (Duration::from_secs(value), t)
        } else {
            return Err(Error::validation(format!("invalid duration format: {}", s)));
        };

        total += term;
        rest = tail;
    }

    Ok(total)
}

/// Render a duration the way the helm binary expects its `--timeout` flag.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}
