use poolctl::{format_pace, format_timer, PoolConfig, PoolController, Result};
use tokio::time::Instant;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("📊 poolctl Status Monitor Example");

    let (pool, _workouts) = match PoolController::start(PoolConfig::default()).await {
        Ok(started) => started,
        Err(e) => {
            error!("❌ Failed to bind sockets: {}", e);
            return Err(e);
        }
    };

    info!("🔍 Listening for telemetry on {}", pool.local_addr());
    info!("Press Ctrl+C to stop monitoring");

    let mut updates = pool.subscribe_status();
    let start_time = Instant::now();
    let mut packets = 0u64;
    let mut max_distance = 0.0f64;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("❌ Telemetry listener stopped");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        let Some(status) = updates.borrow_and_update().clone() else {
            continue;
        };
        packets += 1;
        max_distance = max_distance.max(status.total_distance);

        let elapsed = start_time.elapsed().as_secs();
        println!("\n📊 Status Update ({:02}:{:02})", elapsed / 60, elapsed % 60);
        println!("┌─────────────────────────────────────────┐");
        println!("│ Device:  {:30} │", status.device_name);
        println!("│ State:   {:30} │", status.state().to_string());
        println!(
            "│ Pace:    {:>6} now {:>6} target      │",
            format_pace(status.current_pace()),
            format_pace(status.target_pace())
        );
        println!("│ Command: {:>6} /100m                    │", format_pace(status.commanded_pace()));
        println!(
            "│ Timer:   {} of {}                  │",
            format_timer(u32::from(status.remaining_timer)),
            format_timer(u32::from(status.set_timer))
        );
        println!("│ Segment: {:8.2} m                     │", status.segment_distance);
        println!("│ Total:   {:8.2} m                     │", status.total_distance);
        println!("└─────────────────────────────────────────┘");
    }

    info!("🔌 Shutting down...");
    pool.shutdown().await;

    println!("\n📊 Final Summary:");
    println!("  Packets accepted: {packets}");
    println!("  Total Distance: {max_distance:.2} m");

    info!("🎉 Status monitoring completed!");
    Ok(())
}
