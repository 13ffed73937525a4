use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use shaver_gateway::invites::InviteRotator;

/// Background task that replaces invite codes older than the rotation period.
///
/// Runs on an interval; each pass rotates every group that is due, so a
/// stalled or restarted server catches up on its first tick.
pub async fn run_rotation_loop(invites: InviteRotator, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match invites.rotate_due(Utc::now()).await {
            Ok(0) => {}
            Ok(count) => info!("Rotation: replaced {} invite codes", count),
            Err(e) => warn!("Rotation error: {}", e),
        }
    }
}
