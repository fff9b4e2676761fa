//! Timecode and offset handling for VAST `HH:MM:SS(.mmm)` values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parse a `HH:MM:SS` or `HH:MM:SS.mmm` timecode into seconds
///
/// Returns `None` when the value is not a timecode at all.
pub fn parse_timecode(value: &str) -> Option<f64> {
    let value = value.trim();
    if !value.contains(':') {
        return None;
    }

    let mut total = 0.0;
    for part in value.split(':') {
        let part: f64 = part.trim().parse().ok()?;
        total = total * 60.0 + part;
    }
    Some(total)
}

/// Format seconds as `HH:MM:SS`, adding `.mmm` when there is a fractional part
pub fn format_timecode(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let millis = (seconds * 1000.0).round() as u64;
    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let secs = (millis % 60_000) / 1000;
    let frac = millis % 1000;

    if frac == 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, frac)
    }
}

/// A position inside a creative: absolute seconds or a percentage of its duration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Offset {
    Seconds(f64),
    Percent(f64),
}

impl Offset {
    /// Percentage of `duration` this offset represents
    pub fn as_percent(&self, duration: Option<f64>) -> Option<f64> {
        match *self {
            Offset::Percent(p) => Some(p),
            Offset::Seconds(s) => match duration {
                Some(d) if d > 0.0 => Some(s / d * 100.0),
                _ => None,
            },
        }
    }
}

impl FromStr for Offset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(pct) = s.strip_suffix('%') {
            return pct
                .trim()
                .parse()
                .map(Offset::Percent)
                .map_err(|_| format!("invalid percentage offset '{}'", s));
        }
        if let Some(secs) = parse_timecode(s) {
            return Ok(Offset::Seconds(secs));
        }
        s.parse()
            .map(Offset::Seconds)
            .map_err(|_| format!("invalid offset '{}'", s))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Seconds(s) => write!(f, "{}", format_timecode(*s)),
            Offset::Percent(p) => write!(f, "{}%", p),
        }
    }
}
