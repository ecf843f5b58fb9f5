use bytes::Bytes;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, trace, warn};

use crate::{
    error::Result,
    protocol::{decode_telemetry, TELEMETRY_SIZE},
    recorder::WorkoutRecorder,
    types::{PoolStatus, Workout},
};

/// Shared latest-status slot, `None` until the first packet is accepted
pub type StatusSender = watch::Sender<Option<Arc<PoolStatus>>>;

/// Read side of the latest-status slot
pub type StatusReceiver = watch::Receiver<Option<Arc<PoolStatus>>>;

/// Drops malformed and repeated telemetry packets
#[derive(Debug, Default)]
pub struct PacketFilter {
    last_accepted: Option<Bytes>,
}

impl PacketFilter {
    /// Create an empty filter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_accepted: None,
        }
    }

    /// Decode `data` unless it is malformed or identical to the last accepted packet
    pub fn accept(&mut self, data: &[u8]) -> Option<PoolStatus> {
        if data.len() != TELEMETRY_SIZE {
            trace!("Dropping {} byte packet", data.len());
            return None;
        }

        if self.last_accepted.as_deref() == Some(data) {
            trace!("Dropping duplicate telemetry");
            return None;
        }

        match decode_telemetry(data) {
            Ok(status) => {
                self.last_accepted = Some(Bytes::copy_from_slice(data));
                Some(status)
            }
            Err(e) => {
                trace!("Dropping telemetry: {e}");
                None
            }
        }
    }
}

/// Per packet processing: filter, publish, record
pub struct TelemetryPipeline {
    filter: PacketFilter,
    status: StatusSender,
    recorder: Arc<Mutex<WorkoutRecorder>>,
    workouts: mpsc::UnboundedSender<Workout>,
}

impl TelemetryPipeline {
    /// Create a pipeline publishing to `status` and feeding `recorder`
    #[must_use]
    pub const fn new(
        status: StatusSender,
        recorder: Arc<Mutex<WorkoutRecorder>>,
        workouts: mpsc::UnboundedSender<Workout>,
    ) -> Self {
        Self {
            filter: PacketFilter::new(),
            status,
            recorder,
            workouts,
        }
    }

    /// Handle one datagram, returning whether it was accepted
    pub async fn process(&mut self, data: &[u8]) -> bool {
        let Some(status) = self.filter.accept(data) else {
            return false;
        };

        let status = Arc::new(status);
        self.status.send_replace(Some(Arc::clone(&status)));

        let finished = self.recorder.lock().await.update(&status);
        if let Some(workout) = finished {
            deliver_workout(&self.workouts, workout);
        }

        true
    }
}

/// Hand a finished workout to the consumer
pub(crate) fn deliver_workout(workouts: &mpsc::UnboundedSender<Workout>, workout: Workout) {
    let id = workout.id;
    if workouts.send(workout).is_err() {
        warn!("Workout {id} finished but nobody is listening");
    }
}

/// Background task receiving telemetry broadcasts
pub struct TelemetryListener {
    local_addr: SocketAddr,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl TelemetryListener {
    /// Bind `listen_addr` with broadcast enabled and start receiving
    ///
    /// # Errors
    ///
    /// Returns [`crate::PoolError::Io`] if the socket cannot be bound.
    pub async fn spawn(
        listen_addr: SocketAddr,
        recv_timeout: Duration,
        pipeline: TelemetryPipeline,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(listen_addr).await?;
        socket.set_broadcast(true)?;
        let local_addr = socket.local_addr()?;
        info!("Listening for telemetry on {local_addr}");

        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(receive_loop(
            socket,
            recv_timeout,
            pipeline,
            Arc::clone(&active),
        ));

        Ok(Self {
            local_addr,
            active,
            task: Some(task),
        })
    }

    /// Address the listener is bound to
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the receive loop is still running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Ask the receive loop to exit after its current wait
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Stop and wait for the receive loop to exit
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Telemetry listener ended abnormally: {e}");
            }
        }
        info!("Telemetry listener on {} stopped", self.local_addr);
    }
}

impl Drop for TelemetryListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn receive_loop(
    socket: UdpSocket,
    recv_timeout: Duration,
    mut pipeline: TelemetryPipeline,
    active: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; 2048];

    while active.load(Ordering::Acquire) {
        match timeout(recv_timeout, socket.recv_from(&mut buf)).await {
            Err(_) => continue,
            Ok(Err(e)) => {
                warn!("Telemetry receive failed: {e}");
                tokio::time::sleep(recv_timeout).await;
            }
            Ok(Ok((len, from))) => {
                if pipeline.process(&buf[..len]).await {
                    trace!("Accepted telemetry from {from}");
                }
            }
        }
    }

    debug!("Telemetry receive loop exiting");
}
