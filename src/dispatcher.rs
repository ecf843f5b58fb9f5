//! Reliable command delivery.
//!
//! The machine answers nothing directly; the only acknowledgement is a change
//! in the broadcast telemetry. Commands are therefore sent in short bursts and
//! confirmed by watching the latest status.

use async_trait::async_trait;
use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::UdpSocket,
    time::{sleep, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    listener::StatusReceiver,
    protocol::{encode_command, CommandKind},
    types::{PoolState, PoolStatus, TimingConfig},
};

/// Transport for outgoing command packets
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Transmit one encoded packet
    async fn send(&self, packet: &[u8]) -> Result<()>;
}

#[async_trait]
impl<T: CommandSink + ?Sized> CommandSink for Arc<T> {
    async fn send(&self, packet: &[u8]) -> Result<()> {
        (**self).send(packet).await
    }
}

/// Sends command packets to the machine over UDP
#[derive(Debug)]
pub struct UdpCommandSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpCommandSink {
    /// Bind an ephemeral broadcast-capable socket aimed at `target`
    ///
    /// # Errors
    ///
    /// Returns [`crate::PoolError::Io`] if the socket cannot be created.
    pub async fn bind(target: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        debug!("Command socket {} targeting {target}", socket.local_addr()?);
        Ok(Self { socket, target })
    }

    /// Machine address commands are sent to
    #[must_use]
    pub const fn target(&self) -> SocketAddr {
        self.target
    }
}

#[async_trait]
impl CommandSink for UdpCommandSink {
    async fn send(&self, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, self.target).await?;
        Ok(())
    }
}

/// Outcome of a verified command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Telemetry showed the requested effect
    Confirmed,
    /// Timed out without seeing the effect
    Unconfirmed,
}

impl Confirmation {
    /// Whether the effect was observed
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// Start took effect once the machine has left idle and ready
#[must_use]
pub const fn start_confirmed(status: &PoolStatus) -> bool {
    !matches!(status.state(), PoolState::Idle | PoolState::Ready)
}

/// Stop took effect once the machine is idle or stopping
#[must_use]
pub const fn stop_confirmed(status: &PoolStatus) -> bool {
    matches!(status.state(), PoolState::Idle | PoolState::Stopping)
}

/// Predicate matching a reported speed parameter
pub fn speed_confirmed(speed_param: u8) -> impl Fn(&PoolStatus) -> bool + Send + Sync + Copy {
    move |status: &PoolStatus| status.speed_param == speed_param
}

/// Predicate matching a reported timer setting
pub fn timer_confirmed(seconds: u16) -> impl Fn(&PoolStatus) -> bool + Send + Sync + Copy {
    move |status: &PoolStatus| status.set_timer == seconds
}

/// Burst sender with telemetry based confirmation
pub struct CommandDispatcher<S> {
    sink: S,
    status: StatusReceiver,
    timing: TimingConfig,
}

impl<S: CommandSink> CommandDispatcher<S> {
    /// Create a dispatcher sending through `sink` and confirming against `status`
    #[must_use]
    pub const fn new(sink: S, status: StatusReceiver, timing: TimingConfig) -> Self {
        Self {
            sink,
            status,
            timing,
        }
    }

    /// Underlying transport
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Send `repeat` freshly built packets, pausing between them
    ///
    /// # Errors
    ///
    /// Returns the first transport error; packets after it are not sent.
    pub async fn send_raw(&self, kind: CommandKind, parameter: u16, repeat: u32) -> Result<()> {
        for i in 0..repeat {
            if i > 0 {
                sleep(self.timing.inter_send_delay).await;
            }
            let packet = encode_command(kind, parameter);
            debug!("Sending {kind:?}({parameter}): {:02X?}", &packet[..]);
            self.sink.send(&packet).await?;
        }
        Ok(())
    }

    /// Repeat bursts until telemetry satisfies `confirmed` or `within` elapses.
    ///
    /// A closing burst is always sent afterwards. Transport errors are logged
    /// and never abort the exchange.
    pub async fn send_verified<P>(
        &self,
        kind: CommandKind,
        parameter: u16,
        confirmed: P,
        within: Duration,
    ) -> Confirmation
    where
        P: Fn(&PoolStatus) -> bool + Send + Sync,
    {
        let deadline = Instant::now() + within;
        let mut outcome = Confirmation::Unconfirmed;
        let mut cycles = 0u32;

        while Instant::now() < deadline {
            cycles += 1;
            if let Err(e) = self
                .send_raw(kind, parameter, self.timing.verify_burst)
                .await
            {
                warn!("Failed to send {kind:?}: {e}");
            }

            sleep(self.timing.confirm_cycle).await;

            let observed = self.status.borrow().as_deref().is_some_and(&confirmed);
            if observed {
                outcome = Confirmation::Confirmed;
                break;
            }
        }

        match outcome {
            Confirmation::Confirmed => info!("{kind:?}({parameter}) confirmed after {cycles} cycle(s)"),
            Confirmation::Unconfirmed => {
                warn!("{kind:?}({parameter}) not confirmed within {within:?}");
            }
        }

        if let Err(e) = self
            .send_raw(kind, parameter, self.timing.final_burst)
            .await
        {
            warn!("Failed to send closing burst for {kind:?}: {e}");
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::PoolError,
        listener::StatusSender,
        protocol::{CommandPacket, COMMAND_SIZE},
    };
    use std::sync::Mutex;
    use tokio::sync::watch;

    #[derive(Default)]
    struct RecordingSink {
        packets: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl RecordingSink {
        fn packets(&self) -> Vec<CommandPacket> {
            self.packets
                .lock()
                .unwrap()
                .iter()
                .map(|p| CommandPacket::from_bytes(p).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn send(&self, packet: &[u8]) -> Result<()> {
            if self.fail {
                return Err(PoolError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "network unreachable",
                )));
            }
            self.packets.lock().unwrap().push(packet.to_vec());
            Ok(())
        }
    }

    fn status(running: bool, speed_param: u8) -> PoolStatus {
        PoolStatus {
            state_id: 0,
            status_flags: if running { 0x0F } else { 0x08 },
            is_running: running,
            current_speed: 0,
            target_speed: 0,
            speed_param,
            set_timer: 0,
            remaining_timer: 0,
            segment_distance: 0.0,
            total_distance: 0.0,
            timestamp: 0,
            device_name: String::new(),
        }
    }

    fn dispatcher(
        sink: RecordingSink,
        initial: Option<PoolStatus>,
    ) -> (CommandDispatcher<RecordingSink>, StatusSender) {
        let (tx, rx) = watch::channel(initial.map(Arc::new));
        (CommandDispatcher::new(sink, rx, TimingConfig::default()), tx)
    }

    #[test]
    fn test_predicates() {
        assert!(start_confirmed(&status(true, 130)));
        assert!(!start_confirmed(&status(false, 130)));
        assert!(stop_confirmed(&status(false, 130)));
        assert!(!stop_confirmed(&status(true, 130)));

        let mut ready = status(false, 130);
        ready.status_flags = 0x48;
        assert!(!start_confirmed(&ready));
        assert!(!stop_confirmed(&ready));

        assert!(speed_confirmed(130)(&status(true, 130)));
        assert!(!speed_confirmed(90)(&status(true, 130)));

        let mut timed = status(true, 130);
        timed.set_timer = 600;
        assert!(timer_confirmed(600)(&timed));
        assert!(!timer_confirmed(300)(&timed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_raw_builds_fresh_packets() {
        let (dispatcher, _tx) = dispatcher(RecordingSink::default(), None);
        let started = Instant::now();
        tokio_test::assert_ok!(dispatcher.send_raw(CommandKind::SetTimer, 600, 3).await);

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(150));
        let sent = dispatcher.sink().packets.lock().unwrap().clone();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|p| p.len() == COMMAND_SIZE));

        for packet in dispatcher.sink().packets() {
            assert_eq!(packet.kind, CommandKind::SetTimer);
            assert_eq!(packet.parameter, 600);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_confirmed_returns_after_one_cycle() {
        let (dispatcher, _tx) = dispatcher(RecordingSink::default(), Some(status(true, 130)));
        let started = Instant::now();

        let outcome = dispatcher
            .send_verified(CommandKind::Start, 0, start_confirmed, Duration::from_secs(5))
            .await;

        assert_eq!(outcome, Confirmation::Confirmed);
        // one burst of two, then the closing burst of three
        assert_eq!(dispatcher.sink().packets().len(), 5);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_after_timeout() {
        let (dispatcher, _tx) = dispatcher(RecordingSink::default(), Some(status(false, 130)));
        let started = Instant::now();

        let outcome = dispatcher
            .send_verified(
                CommandKind::SetSpeed,
                90,
                speed_confirmed(90),
                Duration::from_secs(5),
            )
            .await;

        assert_eq!(outcome, Confirmation::Unconfirmed);
        assert!(started.elapsed() >= Duration::from_secs(5));
        // eight 650 ms cycles fit before the deadline
        assert_eq!(dispatcher.sink().packets().len(), 8 * 2 + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_seen_mid_exchange() {
        let (dispatcher, tx) = dispatcher(RecordingSink::default(), None);

        let device = tokio::spawn(async move {
            sleep(Duration::from_millis(1_000)).await;
            tx.send_replace(Some(Arc::new(status(true, 90))));
            tx
        });

        let outcome = dispatcher
            .send_verified(CommandKind::SetSpeed, 90, speed_confirmed(90), Duration::from_secs(5))
            .await;
        let _tx = device.await.unwrap();

        assert!(outcome.is_confirmed());
        assert_eq!(dispatcher.sink().packets().len(), 2 * 2 + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_ids_are_fresh_per_send() {
        let (dispatcher, _tx) = dispatcher(RecordingSink::default(), None);
        for _ in 0..20 {
            tokio_test::assert_ok!(dispatcher.send_raw(CommandKind::Stop, 0, 3).await);
        }

        let mut ids: Vec<u8> = dispatcher
            .sink()
            .packets()
            .iter()
            .map(|p| p.transaction_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert!(ids.len() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_do_not_abort() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let (dispatcher, _tx) = dispatcher(sink, Some(status(false, 130)));

        assert!(dispatcher.send_raw(CommandKind::Stop, 0, 1).await.is_err());
        let outcome = dispatcher
            .send_verified(CommandKind::Stop, 0, stop_confirmed, Duration::from_secs(5))
            .await;
        assert_eq!(outcome, Confirmation::Confirmed);
    }
}
