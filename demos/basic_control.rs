use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use poolctl::{format_pace, parse_pace, PoolConfig, PoolController, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🏊 poolctl Basic Control Example");

    let (pool, mut workouts) = match PoolController::start(PoolConfig::default()).await {
        Ok(started) => started,
        Err(e) => {
            error!("❌ Failed to bind sockets: {}", e);
            return Err(e);
        }
    };

    pool.set_owner(Some("demo".to_string())).await;

    // Wait for the first broadcast so we know the machine is there
    let mut updates = pool.subscribe_status();
    if timeout(Duration::from_secs(5), updates.changed()).await.is_err() {
        warn!("⚠️ No telemetry yet, sending commands anyway");
    }
    if let Some(report) = pool.status_report().await {
        info!("📊 Initial Status:");
        info!("  Device: {}", report.status.device_name);
        info!("  State: {}", report.pool_state);
        info!("  Commanded pace: {}", format_pace(report.commanded_pace));
    }

    let pace = parse_pace("2:10")?;
    info!("⚡ Setting pace to {}/100m...", format_pace(Some(pace)));
    if !pool.request_speed(pace).await.is_confirmed() {
        warn!("⚠️ Pace change not confirmed");
    }

    info!("⏱️ Setting timer to 10 minutes...");
    if !pool.request_timer(600).await.is_confirmed() {
        warn!("⚠️ Timer not confirmed");
    }

    info!("▶️ Starting...");
    if pool.request_start().await.is_confirmed() {
        info!("✅ Current is running");
    } else {
        warn!("⚠️ Start not confirmed");
    }

    sleep(Duration::from_secs(30)).await;

    info!("📈 Speeding up to 1:50/100m...");
    if !pool.request_speed(110.0).await.is_confirmed() {
        warn!("⚠️ Pace change not confirmed");
    }

    sleep(Duration::from_secs(30)).await;

    info!("🛑 Stopping...");
    if pool.request_stop().await.is_confirmed() {
        info!("✅ Stopped");
    } else {
        error!("❌ Stop not confirmed, use the machine's stop button");
    }

    match timeout(Duration::from_secs(1), workouts.recv()).await {
        Ok(Some(workout)) => {
            println!("\n🏁 Workout {}", workout.id);
            for (i, interval) in workout.intervals.iter().enumerate() {
                println!(
                    "  #{}: {:4} s {:7.1} m  pace {}",
                    i + 1,
                    interval.duration,
                    interval.distance,
                    format_pace(Some(interval.avg_pace))
                );
            }
            println!(
                "  Total: {:.1} m in {} s",
                workout.total_distance, workout.total_time
            );
        }
        _ => info!("No workout was recorded"),
    }

    pool.shutdown().await;
    info!("🎉 Basic control example completed!");
    Ok(())
}
