use std::fmt;
use std::time::Instant;

use thiserror::Error;

/// Key of the downward sensor field on the wire.
pub const BOTTOM_KEY: &str = "S1";
/// Key of the forward sensor field on the wire.
pub const FRONT_KEY: &str = "S2";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed telemetry line {line:?}: {reason}")]
    Malformed { line: String, reason: &'static str },
}

/// One sensor snapshot as delivered by the range-sensor board.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    pub bottom_distance_cm: f64,
    pub front_distance_cm: f64,
    pub received_at: Instant,
}

impl TelemetryRecord {
    /// Both distances inside `(min_cm, max_cm]`.
    pub fn within_range(&self, min_cm: f64, max_cm: f64) -> bool {
        let ok = |d: f64| d > min_cm && d <= max_cm;
        ok(self.bottom_distance_cm) && ok(self.front_distance_cm)
    }

    pub fn age_at(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.received_at)
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bottom={:.2}cm front={:.2}cm", self.bottom_distance_cm, self.front_distance_cm)
    }
}

/// Parse one `S1=<float>&S2=<float>` line. Surrounding whitespace (including
/// the trailing newline) is ignored; anything else that deviates is `Malformed`.
pub fn parse(line: &str, received_at: Instant) -> Result<TelemetryRecord, ParseError> {
    let s = line.trim();
    let malformed = |reason| ParseError::Malformed { line: s.to_string(), reason };

    let (first, second) = s.split_once('&').ok_or_else(|| malformed("missing '&'"))?;
    let bottom = field(first, BOTTOM_KEY).map_err(malformed)?;
    let front = field(second, FRONT_KEY).map_err(malformed)?;

    Ok(TelemetryRecord {
        bottom_distance_cm: bottom,
        front_distance_cm: front,
        received_at,
    })
}

fn field(part: &str, key: &str) -> Result<f64, &'static str> {
    let (k, v) = part.split_once('=').ok_or("missing '='")?;
    if k != key {
        return Err("unexpected field name");
    }
    let v: f64 = v.parse().map_err(|_| "non-numeric value")?;
    // "NaN" and "inf" parse as f64 but no sensor reports them
    if !v.is_finite() {
        return Err("non-finite value");
    }
    Ok(v)
}

/// Render a line in the sensor board's wire format.
pub fn format_line(bottom_cm: f64, front_cm: f64) -> String {
    format!("{}={}&{}={}\n", BOTTOM_KEY, bottom_cm, FRONT_KEY, front_cm)
}
