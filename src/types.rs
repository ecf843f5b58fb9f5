use crate::{
    calibration::{speed_level_to_pace, speed_param_to_pace},
    CLIENT_PORT, POOL_IP, POOL_PORT,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};
use uuid::Uuid;

/// Bit of the status flag byte set while the machine is changing state
const TRANSITIONING_BIT: u8 = 0x40;

/// Coarse lifecycle state derived from the status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    /// Current is flowing
    Running,
    /// Fully stopped
    Idle,
    /// Settings accepted, waiting for start
    Ready,
    /// Ramping up
    Starting,
    /// Decelerating
    Stopping,
    /// Speed change in progress
    Changing,
}

impl PoolState {
    /// Derive the state from the raw flag byte and the running flag.
    ///
    /// Unrecognised flag combinations fall back to [`PoolState::Idle`].
    #[must_use]
    pub const fn classify(status_flags: u8, running: bool) -> Self {
        let transitioning = status_flags & TRANSITIONING_BIT != 0;
        let lower = status_flags & 0x0F;

        if running {
            return Self::Running;
        }

        match (transitioning, lower) {
            (true, 0x08) => Self::Ready,
            (true, 0x09 | 0x0B) => Self::Starting,
            (true, 0x0A) => Self::Stopping,
            (true, 0x0F) => Self::Changing,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Idle => write!(f, "idle"),
            Self::Ready => write!(f, "ready"),
            Self::Starting => write!(f, "starting"),
            Self::Stopping => write!(f, "stopping"),
            Self::Changing => write!(f, "changing"),
        }
    }
}

/// Decoded telemetry broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Echo of the last command's transaction
    pub state_id: u8,
    /// Raw status flag byte
    pub status_flags: u8,
    /// Current is flowing
    pub is_running: bool,
    /// Motor level right now, ramps toward the target
    pub current_speed: u8,
    /// Motor level being ramped to
    pub target_speed: u8,
    /// Commanded pace in seconds per 100 m
    pub speed_param: u8,
    /// Configured timer in seconds
    pub set_timer: u16,
    /// Seconds left on the timer
    pub remaining_timer: u16,
    /// Distance of the current segment in meters
    pub segment_distance: f64,
    /// Cumulative distance in meters
    pub total_distance: f64,
    /// Device clock, Unix seconds
    pub timestamp: u32,
    /// Device name as broadcast
    pub device_name: String,
}

impl PoolStatus {
    /// Lifecycle state of the machine
    #[must_use]
    pub const fn state(&self) -> PoolState {
        PoolState::classify(self.status_flags, self.is_running)
    }

    /// Pace estimated from the current motor level
    #[must_use]
    pub fn current_pace(&self) -> Option<f64> {
        speed_level_to_pace(self.current_speed)
    }

    /// Pace estimated from the target motor level
    #[must_use]
    pub fn target_pace(&self) -> Option<f64> {
        speed_level_to_pace(self.target_speed)
    }

    /// Pace the machine was commanded to, if any
    #[must_use]
    pub fn commanded_pace(&self) -> Option<f64> {
        (self.speed_param > 0).then(|| speed_param_to_pace(self.speed_param))
    }

    /// Build the consumer facing report for this status
    #[must_use]
    pub fn report(&self, recording: bool) -> StatusReport {
        StatusReport {
            status: self.clone(),
            current_pace: self.current_pace(),
            target_pace: self.target_pace(),
            commanded_pace: self.commanded_pace(),
            pool_state: self.state(),
            recording,
        }
    }
}

/// Status plus derived values, ready to push to a front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Raw decoded status
    #[serde(flatten)]
    pub status: PoolStatus,
    /// Pace from the current motor level
    pub current_pace: Option<f64>,
    /// Pace from the target motor level
    pub target_pace: Option<f64>,
    /// Commanded pace
    pub commanded_pace: Option<f64>,
    /// Derived lifecycle state
    pub pool_state: PoolState,
    /// Whether a workout is being recorded
    pub recording: bool,
}

/// Kind of workout interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    /// Swimming against the current
    Swim,
}

/// One contiguous segment of a workout at constant commanded speed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// When the interval began
    pub start_time: DateTime<Utc>,
    /// Whole seconds
    pub duration: u32,
    /// Meters, one decimal
    pub distance: f64,
    /// Commanded pace during the interval
    pub speed_param: u8,
    /// Measured pace in seconds per 100 m, 0 when no distance was covered
    pub avg_pace: f64,
    /// Interval kind
    #[serde(rename = "type")]
    pub kind: IntervalKind,
}

/// A recorded swim session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    /// Unique identifier
    pub id: Uuid,
    /// User the workout is attributed to
    pub user_id: String,
    /// When recording began
    pub start_time: DateTime<Utc>,
    /// Sum of interval distances in meters
    pub total_distance: f64,
    /// Sum of interval durations in seconds
    pub total_time: u32,
    /// Intervals in order
    pub intervals: Vec<Interval>,
}

impl Workout {
    pub(crate) fn new(user_id: String, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            start_time,
            total_distance: 0.0,
            total_time: 0,
            intervals: Vec::new(),
        }
    }

    pub(crate) fn push_interval(&mut self, interval: Interval) {
        self.total_distance = round_to(self.total_distance + interval.distance, 1);
        self.total_time += interval.duration;
        self.intervals.push(interval);
    }
}

/// Network endpoints used to reach the machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Where command packets are sent
    pub pool_addr: SocketAddr,
    /// Where telemetry broadcasts are received
    pub listen_addr: SocketAddr,
    /// Retry and timing behavior
    pub timing: TimingConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_addr: SocketAddr::from((POOL_IP, POOL_PORT)),
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, CLIENT_PORT)),
            timing: TimingConfig::default(),
        }
    }
}

/// Retry, confirmation and recorder timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause between packets of one burst
    pub inter_send_delay: Duration,
    /// Wait for a telemetry cycle before checking confirmation
    pub confirm_cycle: Duration,
    /// How long a verified command keeps retrying
    pub verify_timeout: Duration,
    /// Packets per retry burst
    pub verify_burst: u32,
    /// Packets in the closing burst
    pub final_burst: u32,
    /// Bound on a single receive wait
    pub recv_timeout: Duration,
    /// How long a stop must last before the workout is finalized
    pub auto_finalize_after: Duration,
    /// Period of the auto-finalize check
    pub finalize_check_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inter_send_delay: Duration::from_millis(50),
            confirm_cycle: Duration::from_millis(600),
            verify_timeout: Duration::from_secs(5),
            verify_burst: 2,
            final_burst: 3,
            recv_timeout: Duration::from_secs(1),
            auto_finalize_after: Duration::from_secs(5),
            finalize_check_interval: Duration::from_secs(1),
        }
    }
}

/// Round half away from zero to the given number of decimals
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
