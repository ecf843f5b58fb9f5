//! Automatic workout recording.
//!
//! [`WorkoutRecorder`] is fed every accepted telemetry sample in arrival order.
//! It opens a workout when the current starts, splits intervals on speed
//! changes and closes the workout once the machine has been stopped for longer
//! than the configured threshold. Short stops, such as the pause the machine
//! makes while changing speed, do not end the workout.

use crate::types::{round_to, Interval, IntervalKind, PoolStatus, Workout};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct OpenInterval {
    start: DateTime<Utc>,
    distance_baseline: f64,
    speed_param: u8,
}

#[derive(Debug, Clone, Copy)]
struct PendingStop {
    at: DateTime<Utc>,
    total_distance: f64,
}

#[derive(Debug)]
struct Session {
    workout: Workout,
    interval: Option<OpenInterval>,
    stopped: Option<PendingStop>,
    last_total_distance: f64,
}

impl Session {
    fn open_interval(&mut self, status: &PoolStatus, now: DateTime<Utc>) {
        self.interval = Some(OpenInterval {
            start: now,
            distance_baseline: status.total_distance,
            speed_param: status.speed_param,
        });
    }

    /// Close the open interval at `end`, appending it unless it has no duration
    fn close_interval(&mut self, end: DateTime<Utc>, total_distance: f64) {
        let Some(open) = self.interval.take() else {
            return;
        };

        let duration = (end - open.start).num_seconds();
        let Ok(duration) = u32::try_from(duration) else {
            return;
        };
        if duration == 0 {
            debug!("Dropping zero length interval");
            return;
        }

        let distance = (total_distance - open.distance_baseline).max(0.0);
        let avg_pace = if distance > 0.0 {
            round_to(100.0 * f64::from(duration) / distance, 1)
        } else {
            0.0
        };

        let interval = Interval {
            start_time: open.start,
            duration,
            distance: round_to(distance, 1),
            speed_param: open.speed_param,
            avg_pace,
            kind: IntervalKind::Swim,
        };

        debug!(
            "Closed interval: {}s, {:.1}m at speed {}",
            interval.duration, interval.distance, interval.speed_param
        );
        self.workout.push_interval(interval);
    }
}

/// Workout segmentation state machine
#[derive(Debug)]
pub struct WorkoutRecorder {
    owner: Option<String>,
    auto_finalize_after: Duration,
    was_running: bool,
    session: Option<Session>,
}

impl WorkoutRecorder {
    /// Create a recorder that finalizes after `auto_finalize_after` of stop
    #[must_use]
    pub const fn new(auto_finalize_after: Duration) -> Self {
        Self {
            owner: None,
            auto_finalize_after,
            was_running: false,
            session: None,
        }
    }

    /// Attribute future workouts to `owner`, or stop recording new ones with `None`
    ///
    /// A workout already in progress keeps its owner.
    pub fn set_owner(&mut self, owner: Option<String>) {
        self.owner = owner;
    }

    /// User new workouts are attributed to
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Whether a workout is open
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the open workout is waiting out a stop
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.stopped.is_some())
    }

    /// Feed a telemetry sample received now
    pub fn update(&mut self, status: &PoolStatus) -> Option<Workout> {
        self.update_at(status, Utc::now())
    }

    /// Feed a telemetry sample received at `now`.
    ///
    /// Returns a finished workout when a restart arrives after a stop that
    /// already outlasted the finalize threshold.
    pub fn update_at(&mut self, status: &PoolStatus, now: DateTime<Utc>) -> Option<Workout> {
        let started = status.is_running && !self.was_running;
        let stopped = !status.is_running && self.was_running;
        self.was_running = status.is_running;

        let finished = if started {
            self.on_start(status, now)
        } else {
            if stopped {
                self.on_stop(status, now);
            } else if status.is_running {
                self.on_running(status, now);
            }
            None
        };

        if let Some(session) = self.session.as_mut() {
            session.last_total_distance = status.total_distance;
        }

        finished
    }

    /// Finalize if the machine has been stopped for longer than the threshold
    pub fn check_auto_finalize(&mut self) -> Option<Workout> {
        self.check_auto_finalize_at(Utc::now())
    }

    /// Finalize if the stop recorded before `now` outlasted the threshold
    pub fn check_auto_finalize_at(&mut self, now: DateTime<Utc>) -> Option<Workout> {
        let stopped_at = self.session.as_ref()?.stopped?.at;
        if self.stop_expired(stopped_at, now) {
            info!("Machine stopped for more than {:?}, finishing workout", self.auto_finalize_after);
            self.finalize_at(now)
        } else {
            None
        }
    }

    /// Finish the open workout now
    pub fn finalize(&mut self) -> Option<Workout> {
        self.finalize_at(Utc::now())
    }

    /// Finish the open workout at `now`.
    ///
    /// Any open interval is closed first. Workouts without intervals are
    /// discarded and `None` is returned.
    pub fn finalize_at(&mut self, now: DateTime<Utc>) -> Option<Workout> {
        let mut session = self.session.take()?;

        match session.stopped.take() {
            Some(stop) => session.close_interval(stop.at, stop.total_distance),
            None => session.close_interval(now, session.last_total_distance),
        }

        if session.workout.intervals.is_empty() {
            info!("Discarding workout {} without intervals", session.workout.id);
            return None;
        }

        let workout = session.workout;
        info!(
            "Workout {} finished: {} interval(s), {:.1}m in {}s",
            workout.id,
            workout.intervals.len(),
            workout.total_distance,
            workout.total_time
        );
        Some(workout)
    }

    fn stop_expired(&self, stopped_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - stopped_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed > self.auto_finalize_after)
    }

    fn on_start(&mut self, status: &PoolStatus, now: DateTime<Utc>) -> Option<Workout> {
        let mut finished = None;

        let pending = self.session.as_ref().and_then(|s| s.stopped);
        if let Some(stop) = pending {
            if self.stop_expired(stop.at, now) {
                finished = self.finalize_at(now);
            }
        }

        if let Some(session) = self.session.as_mut() {
            if let Some(stop) = session.stopped.take() {
                match session.interval {
                    Some(open)
                        if open.speed_param == status.speed_param || open.speed_param == 0 =>
                    {
                        debug!("Resuming after a {}s pause", (now - stop.at).num_seconds());
                        if open.speed_param == 0 {
                            session.interval = Some(OpenInterval {
                                speed_param: status.speed_param,
                                ..open
                            });
                        }
                    }
                    _ => {
                        session.close_interval(stop.at, stop.total_distance);
                        session.open_interval(status, now);
                    }
                }
            } else if session.interval.is_none() {
                session.open_interval(status, now);
            }
            return finished;
        }

        let Some(owner) = self.owner.clone() else {
            debug!("Machine started without an owner, not recording");
            return finished;
        };

        let workout = Workout::new(owner, now);
        info!("Recording workout {} for {}", workout.id, workout.user_id);
        let mut session = Session {
            workout,
            interval: None,
            stopped: None,
            last_total_distance: status.total_distance,
        };
        session.open_interval(status, now);
        self.session = Some(session);

        finished
    }

    fn on_stop(&mut self, status: &PoolStatus, now: DateTime<Utc>) {
        if let Some(session) = self.session.as_mut() {
            debug!("Machine stopped, holding workout {} open", session.workout.id);
            session.stopped = Some(PendingStop {
                at: now,
                total_distance: status.total_distance,
            });
        }
    }

    fn on_running(&mut self, status: &PoolStatus, now: DateTime<Utc>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.stopped = None;

        let Some(open) = session.interval else {
            session.open_interval(status, now);
            return;
        };

        if open.speed_param == 0 {
            session.interval = Some(OpenInterval {
                speed_param: status.speed_param,
                ..open
            });
        } else if status.speed_param != open.speed_param {
            info!(
                "Speed changed from {} to {}, starting new interval",
                open.speed_param, status.speed_param
            );
            session.close_interval(now, status.total_distance);
            session.open_interval(status, now);
        }
    }
}

impl Default for WorkoutRecorder {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
