use crate::controller::FleetController;
use std::sync::Arc;

/// job-capacity: periodic capacity pass, for fleets where acquire/release
/// traffic alone is too sparse to keep the gap filled.
pub async fn run(controller: Arc<FleetController>, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    // first tick fires immediately; initialize already ran a pass
    interval.tick().await;
    tracing::info!("⏱️ [job-capacity] started (every {:?})", every);

    loop {
        interval.tick().await;
        match controller.start_or_create_machines().await {
            Ok(report) if !report.started.is_empty() || !report.allocated.is_empty() => {
                tracing::info!(
                    "⏱️ [job-capacity] started={:?} allocated={:?}",
                    report.started,
                    report.allocated
                )
            }
            Ok(_) => {}
            Err(e) => tracing::error!("❌ [job-capacity] error: {}", e),
        }
    }
}
