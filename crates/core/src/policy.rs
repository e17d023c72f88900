//! Grace-period policy parsing.
//!
//! Policy annotations are free-form strings owned by volume owners. Parsing
//! is total: every input maps to a [`PolicySetting`], and anything that is
//! not a usable duration maps to `Disabled` with the reason attached so the
//! caller can report it.
//!
//! Durations use the Go grammar the annotations have always been written in:
//! an optional sign followed by `<decimal><unit>` groups, e.g. `1h`, `90m`,
//! `1h30m`, `1.5h`, `-5h`. The bare string `0` is zero.

use std::fmt;

use chrono::Duration;
use serde::Serialize;

use crate::error::PolicyParseError;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;

/// Recognised units and their size in nanoseconds.
const UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", NANOS_PER_MICRO),
    ("µs", NANOS_PER_MICRO), // U+00B5 micro sign
    ("μs", NANOS_PER_MICRO), // U+03BC greek mu
    ("ms", NANOS_PER_MILLI),
    ("s", NANOS_PER_SECOND),
    ("m", NANOS_PER_MINUTE),
    ("h", NANOS_PER_HOUR),
];

// ---------------------------------------------------------------------------
// Duration parsing
// ---------------------------------------------------------------------------

/// Parse a Go-style duration string.
pub fn parse_duration(raw: &str) -> Result<Duration, PolicyParseError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(PolicyParseError::Empty);
    }

    let (negative, mut rest) = if let Some(stripped) = value.strip_prefix('-') {
        (true, stripped)
    } else if let Some(stripped) = value.strip_prefix('+') {
        (false, stripped)
    } else {
        (false, value)
    };

    if rest == "0" {
        return Ok(Duration::zero());
    }
    if rest.is_empty() {
        return Err(PolicyParseError::InvalidNumber(value.to_string()));
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let int_part = &rest[..int_len];
        rest = &rest[int_len..];

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_len = after_dot.bytes().take_while(u8::is_ascii_digit).count();
            frac_part = &after_dot[..frac_len];
            rest = &after_dot[frac_len..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(PolicyParseError::InvalidNumber(value.to_string()));
        }

        let unit_len = rest
            .find(|c: char| c == '.' || c.is_ascii_digit())
            .unwrap_or(rest.len());
        if unit_len == 0 {
            return Err(PolicyParseError::MissingUnit(value.to_string()));
        }
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| PolicyParseError::UnknownUnit {
                unit: unit.to_string(),
                value: value.to_string(),
            })?;

        let group = group_nanos(int_part, frac_part, scale)
            .ok_or_else(|| PolicyParseError::Overflow(value.to_string()))?;
        total = total
            .checked_add(group)
            .ok_or_else(|| PolicyParseError::Overflow(value.to_string()))?;
    }

    if total > i64::MAX as u128 {
        return Err(PolicyParseError::Overflow(value.to_string()));
    }
    let nanos = total as i64;
    Ok(Duration::nanoseconds(if negative { -nanos } else { nanos }))
}

/// Nanoseconds contributed by one `<int>.<frac><unit>` group. Fractional
/// digits finer than one nanosecond are truncated.
fn group_nanos(int_part: &str, frac_part: &str, scale: u128) -> Option<u128> {
    let whole = int_part.bytes().try_fold(0u128, |acc, digit| {
        acc.checked_mul(10)?.checked_add(u128::from(digit - b'0'))
    })?;
    let mut nanos = whole.checked_mul(scale)?;

    let mut place = scale;
    for digit in frac_part.bytes() {
        place /= 10;
        if place == 0 {
            break;
        }
        nanos = nanos.checked_add(u128::from(digit - b'0') * place)?;
    }
    Some(nanos)
}

// ---------------------------------------------------------------------------
// Policy settings
// ---------------------------------------------------------------------------

/// Why a policy input does not enable its branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    /// The annotation is not set.
    Absent,
    /// The annotation is set but is not a duration.
    Unparseable(PolicyParseError),
    /// The annotation parsed to a negative duration.
    Negative,
    /// The annotation parsed to zero where zero means "off".
    Zero,
}

impl DisabledReason {
    /// Whether the owner should hear about it. Absent and zero values are
    /// deliberate configurations, not mistakes.
    pub fn is_reportable(&self) -> bool {
        matches!(self, Self::Unparseable(_) | Self::Negative)
    }
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("not set"),
            Self::Unparseable(e) => write!(f, "{e}"),
            Self::Negative => f.write_str("negative duration"),
            Self::Zero => f.write_str("zero duration"),
        }
    }
}

/// Outcome of reading one duration-valued policy annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySetting {
    Disabled(DisabledReason),
    Enabled(Duration),
}

impl PolicySetting {
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Enabled(duration) => Some(*duration),
            Self::Disabled(_) => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

/// Grace period after release. Zero is valid and means "reclaim at the
/// evaluation that sets the marker".
pub fn parse_grace_period(raw: Option<&str>) -> PolicySetting {
    match classify(raw) {
        Ok(duration) => PolicySetting::Enabled(duration),
        Err(reason) => PolicySetting::Disabled(reason),
    }
}

/// Immediate-reclaim age threshold. Only a strictly positive value enables
/// the immediate-reclaim path.
pub fn parse_immediate_reclaim_threshold(raw: Option<&str>) -> PolicySetting {
    match classify(raw) {
        Ok(duration) if duration == Duration::zero() => {
            PolicySetting::Disabled(DisabledReason::Zero)
        }
        Ok(duration) => PolicySetting::Enabled(duration),
        Err(reason) => PolicySetting::Disabled(reason),
    }
}

fn classify(raw: Option<&str>) -> Result<Duration, DisabledReason> {
    let raw = raw.ok_or(DisabledReason::Absent)?;
    let duration = parse_duration(raw).map_err(DisabledReason::Unparseable)?;
    if duration < Duration::zero() {
        return Err(DisabledReason::Negative);
    }
    Ok(duration)
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// A recoverable problem with a volume's policy annotations. Reported by the
/// reconciliation loop, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyWarning {
    pub key: String,
    pub value: String,
    pub reason: String,
}

impl PolicyWarning {
    pub fn new(key: &str, value: &str, reason: impl fmt::Display) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for PolicyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}='{}': {}", self.key, self.value, self.reason)
    }
}
