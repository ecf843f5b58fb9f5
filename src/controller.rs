use crate::{
    calibration::pace_to_speed_param,
    dispatcher::{
        speed_confirmed, start_confirmed, stop_confirmed, timer_confirmed, CommandDispatcher,
        CommandSink, Confirmation, UdpCommandSink,
    },
    error::Result,
    listener::{deliver_workout, StatusReceiver, TelemetryListener, TelemetryPipeline},
    protocol::CommandKind,
    recorder::WorkoutRecorder,
    types::{PoolConfig, PoolStatus, StatusReport, TimingConfig, Workout},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info};

/// Receives every workout the controller finalizes
pub type WorkoutReceiver = mpsc::UnboundedReceiver<Workout>;

/// Main interface to a counter-current swim machine
///
/// `PoolController` owns the telemetry listener, the workout recorder and the
/// command dispatcher. Telemetry is received on a background task and
/// published as the latest status; finished workouts are delivered on the
/// [`WorkoutReceiver`] returned from [`PoolController::start`].
///
/// # Examples
///
/// ```no_run
/// use poolctl::{PoolConfig, PoolController};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (pool, mut workouts) = PoolController::start(PoolConfig::default()).await?;
///     pool.set_owner(Some("alice".to_string())).await;
///
///     pool.request_start().await;
///     pool.request_speed(120.0).await;
///
///     if let Some(status) = pool.latest_status() {
///         println!("{} at {:.1} m", status.state(), status.total_distance);
///     }
///
///     pool.request_stop().await;
///     if let Some(workout) = workouts.recv().await {
///         println!("Swam {:.1} m", workout.total_distance);
///     }
///     Ok(())
/// }
/// ```
pub struct PoolController<S = UdpCommandSink> {
    dispatcher: Arc<CommandDispatcher<S>>,
    status: StatusReceiver,
    recorder: Arc<Mutex<WorkoutRecorder>>,
    workouts: mpsc::UnboundedSender<Workout>,
    listener: TelemetryListener,
    finalizer: JoinHandle<()>,
    timing: TimingConfig,
}

impl PoolController<UdpCommandSink> {
    /// Start listening for telemetry and sending commands over UDP
    ///
    /// # Errors
    ///
    /// Returns [`crate::PoolError::Io`] if either socket cannot be bound.
    pub async fn start(config: PoolConfig) -> Result<(Self, WorkoutReceiver)> {
        let sink = UdpCommandSink::bind(config.pool_addr).await?;
        Self::with_sink(config, sink).await
    }
}

impl<S: CommandSink + 'static> PoolController<S> {
    /// Start with a custom command transport
    ///
    /// # Errors
    ///
    /// Returns [`crate::PoolError::Io`] if the telemetry socket cannot be bound.
    pub async fn with_sink(config: PoolConfig, sink: S) -> Result<(Self, WorkoutReceiver)> {
        let PoolConfig {
            listen_addr,
            timing,
            ..
        } = config;

        let (status_tx, status_rx) = watch::channel(None);
        let (workout_tx, workout_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Mutex::new(WorkoutRecorder::new(timing.auto_finalize_after)));

        let pipeline = TelemetryPipeline::new(status_tx, Arc::clone(&recorder), workout_tx.clone());
        let listener = TelemetryListener::spawn(listen_addr, timing.recv_timeout, pipeline).await?;

        let finalizer = tokio::spawn(auto_finalize_loop(
            Arc::clone(&recorder),
            workout_tx.clone(),
            timing.finalize_check_interval,
        ));

        let dispatcher = Arc::new(CommandDispatcher::new(sink, status_rx.clone(), timing.clone()));

        info!("Pool controller started on {}", listener.local_addr());

        Ok((
            Self {
                dispatcher,
                status: status_rx,
                recorder,
                workouts: workout_tx,
                listener,
                finalizer,
                timing,
            },
            workout_rx,
        ))
    }

    /// Most recent accepted status, `None` before the first broadcast
    #[must_use]
    pub fn latest_status(&self) -> Option<Arc<PoolStatus>> {
        self.status.borrow().clone()
    }

    /// Latest status with derived values and the recording flag
    pub async fn status_report(&self) -> Option<StatusReport> {
        let status = self.latest_status()?;
        let recording = self.recorder.lock().await.is_recording();
        Some(status.report(recording))
    }

    /// Receiver notified on every accepted status
    #[must_use]
    pub fn subscribe_status(&self) -> StatusReceiver {
        self.status.clone()
    }

    /// Address telemetry is received on
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Whether the telemetry listener is still running
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.is_active()
    }

    /// Whether a workout is being recorded
    pub async fn is_recording(&self) -> bool {
        self.recorder.lock().await.is_recording()
    }

    /// Attribute workouts started from now on to `owner`
    ///
    /// With no owner, swims are not recorded.
    pub async fn set_owner(&self, owner: Option<String>) {
        match &owner {
            Some(user) => info!("Recording workouts for {user}"),
            None => info!("Workout recording disabled"),
        }
        self.recorder.lock().await.set_owner(owner);
    }

    /// Finish the open workout now, delivering it on the workout channel.
    ///
    /// Returns whether a workout was delivered.
    pub async fn finish_workout(&self) -> bool {
        let finished = self.recorder.lock().await.finalize();
        if let Some(workout) = finished {
            deliver_workout(&self.workouts, workout);
            true
        } else {
            false
        }
    }

    /// Start the current
    pub async fn request_start(&self) -> Confirmation {
        self.dispatch(CommandKind::Start, 0, start_confirmed).await
    }

    /// Stop the current and finish the open workout
    pub async fn request_stop(&self) -> Confirmation {
        let outcome = self.dispatch(CommandKind::Stop, 0, stop_confirmed).await;
        self.finish_workout().await;
        outcome
    }

    /// Set the pace in seconds per 100 m, clamped to what the machine accepts
    pub async fn request_speed(&self, pace_sec: f64) -> Confirmation {
        let speed_param = pace_to_speed_param(pace_sec);
        self.dispatch(
            CommandKind::SetSpeed,
            u16::from(speed_param),
            speed_confirmed(speed_param),
        )
        .await
    }

    /// Set the timer in seconds
    pub async fn request_timer(&self, seconds: u16) -> Confirmation {
        self.dispatch(CommandKind::SetTimer, seconds, timer_confirmed(seconds))
            .await
    }

    async fn dispatch<P>(&self, kind: CommandKind, parameter: u16, confirmed: P) -> Confirmation
    where
        P: Fn(&PoolStatus) -> bool + Send + Sync + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        let within = self.timing.verify_timeout;

        let task = tokio::spawn(async move {
            dispatcher
                .send_verified(kind, parameter, confirmed, within)
                .await
        });

        task.await.unwrap_or_else(|e| {
            error!("{kind:?} dispatch task failed: {e}");
            Confirmation::Unconfirmed
        })
    }

    /// Stop background tasks, delivering any open workout first
    pub async fn shutdown(mut self) {
        self.finalizer.abort();
        self.finish_workout().await;
        self.listener.shutdown().await;
        info!("Pool controller stopped");
    }
}

impl<S> Drop for PoolController<S> {
    fn drop(&mut self) {
        self.listener.stop();
        self.finalizer.abort();
    }
}

async fn auto_finalize_loop(
    recorder: Arc<Mutex<WorkoutRecorder>>,
    workouts: mpsc::UnboundedSender<Workout>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let finished = recorder.lock().await.check_auto_finalize();
        if let Some(workout) = finished {
            deliver_workout(&workouts, workout);
        }
    }
}
