#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # poolctl
//!
//! A Rust library for controlling counter-current swim machines over the local
//! network and recording workouts from their telemetry.
//!
//! The machine broadcasts a 111-byte status packet roughly every 500 ms and
//! accepts 44-byte command packets over UDP. It never acknowledges a command
//! directly, so this crate sends commands in bursts and treats the next
//! telemetry broadcasts as the acknowledgement.
//!
//! ## Overview
//!
//! - **Packet codec**: CRC32-protected telemetry and command frames ([`protocol`])
//! - **Calibration**: pace, speed parameter and motor level conversions ([`calibration`])
//! - **Telemetry listener**: filters duplicate broadcasts and publishes the latest status ([`listener`])
//! - **Command dispatcher**: burst sending with telemetry confirmation ([`dispatcher`])
//! - **Workout recorder**: splits a swim into intervals by commanded pace ([`recorder`])
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library drives physical exercise equipment. A command
//! that was not confirmed may still take effect later, and a stop request can
//! be lost on a busy network. Keep the machine's own stop button within reach.
//!
//! ## Quick Start
//!
//! ```no_run
//! use poolctl::{PoolConfig, PoolController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (pool, mut workouts) = PoolController::start(PoolConfig::default()).await?;
//!     pool.set_owner(Some("alice".to_string())).await;
//!
//!     // 2:00 per 100 m
//!     pool.request_speed(120.0).await;
//!     pool.request_start().await;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!
//!     pool.request_stop().await;
//!     if let Some(workout) = workouts.recv().await {
//!         println!("{:.1} m in {} s", workout.total_distance, workout.total_time);
//!     }
//!
//!     Ok(())
//! }
//! ```

use std::net::Ipv4Addr;

/// Pace conversions and calibration
pub mod calibration;
/// High level machine control
pub mod controller;
/// Burst command sending and confirmation
pub mod dispatcher;
/// Error types and handling
pub mod error;
/// Telemetry reception
pub mod listener;
/// Wire formats
pub mod protocol;
/// Workout segmentation
pub mod recorder;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use calibration::{format_pace, format_timer, pace_to_speed_param, parse_pace};
pub use controller::{PoolController, WorkoutReceiver};
pub use dispatcher::{CommandDispatcher, CommandSink, Confirmation, UdpCommandSink};
pub use error::{PoolError, Result};
pub use listener::{StatusReceiver, TelemetryListener};
pub use protocol::{CommandKind, CommandPacket, CommandRequest};
pub use recorder::WorkoutRecorder;
pub use types::{
    Interval, IntervalKind, PoolConfig, PoolState, PoolStatus, StatusReport, TimingConfig, Workout,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default address of the machine on its access point network
pub const POOL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 232);

/// UDP port the machine accepts commands on
pub const POOL_PORT: u16 = 9750;

/// UDP port telemetry is broadcast to
pub const CLIENT_PORT: u16 = 45654;

/// First two bytes of every packet in either direction
pub const MAGIC: [u8; 2] = [0x0A, 0xF0];
