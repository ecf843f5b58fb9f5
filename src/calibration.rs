//! Pace and speed conversions.
//!
//! The speed parameter carried in commands and telemetry is the pace in seconds
//! per 100 m. The motor level is a separate physical value; its relation to pace
//! is approximated from measured anchor points.

use crate::{
    error::{PoolError, Result},
    types::round_to,
};

/// Fastest commandable pace, 1:14 per 100 m
pub const PACE_FASTEST_SEC: u8 = 74;

/// Slowest commandable pace, 4:03 per 100 m
pub const PACE_SLOWEST_SEC: u8 = 243;

/// Measured (motor level, seconds per 100 m) anchors, ordered by level
pub const CALIBRATION_TABLE: [(u8, f64); 8] = [
    (40, 243.0),
    (45, 219.0),
    (51, 194.0),
    (61, 162.0),
    (67, 148.0),
    (77, 129.0),
    (91, 109.0),
    (180, 74.0),
];

/// Pace in seconds per 100 m for a speed parameter
#[must_use]
pub fn speed_param_to_pace(param: u8) -> f64 {
    f64::from(param)
}

/// Speed parameter for a pace, rounded and clamped to the commandable range
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn pace_to_speed_param(pace_sec: f64) -> u8 {
    if pace_sec.is_nan() {
        return PACE_SLOWEST_SEC;
    }
    pace_sec
        .round()
        .clamp(f64::from(PACE_FASTEST_SEC), f64::from(PACE_SLOWEST_SEC)) as u8
}

/// Estimate pace from a motor level.
///
/// Levels of 1 and below have no pace. Levels outside the table are
/// extrapolated from the nearest anchor pair.
#[must_use]
pub fn speed_level_to_pace(level: u8) -> Option<f64> {
    if level <= 1 {
        return None;
    }

    let level = f64::from(level);
    let last = CALIBRATION_TABLE.len() - 1;
    let segment = CALIBRATION_TABLE
        .windows(2)
        .position(|pair| level <= f64::from(pair[1].0))
        .unwrap_or(last - 1);

    let (l1, p1) = CALIBRATION_TABLE[segment];
    let (l2, p2) = CALIBRATION_TABLE[segment + 1];
    let (l1, l2) = (f64::from(l1), f64::from(l2));
    let slope = (p2 - p1) / (l2 - l1);

    Some(round_to(p1 + slope * (level - l1), 1))
}

/// Format a pace as `M:SS`, or `--:--` when there is none
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_pace(seconds_per_100m: Option<f64>) -> String {
    match seconds_per_100m {
        Some(pace) if pace > 0.0 => {
            let whole = pace as u64;
            format!("{}:{:02}", whole / 60, whole % 60)
        }
        _ => "--:--".to_string(),
    }
}

/// Format a timer as `MM:SS`
#[must_use]
pub fn format_timer(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Parse a `M:SS` pace string into seconds per 100 m
///
/// # Errors
///
/// Returns [`PoolError::InvalidParameters`] if the string is not `M:SS`.
pub fn parse_pace(pace: &str) -> Result<f64> {
    let invalid = || PoolError::InvalidParameters(format!("Pace must be M:SS, got {pace:?}"));

    let (minutes, seconds) = pace.trim().split_once(':').ok_or_else(invalid)?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    let seconds: u32 = seconds.parse().map_err(|_| invalid())?;
    if seconds >= 60 {
        return Err(invalid());
    }

    Ok(f64::from(minutes).mul_add(60.0, f64::from(seconds)))
}
