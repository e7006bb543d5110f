use std::time::Duration;

use escrow_engine::{helpers::SystemClock, traits::ExpiryResult, AnnouncementApi, SqliteDatabase};
use log::*;
use tokio::task::JoinHandle;

/// Starts the announcement expiry sweeper. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Every `interval`, requests that the traveler has left unanswered for longer than the API's window are declined and
/// the payer refunded. Running several instances side by side is safe; each request is latched exactly once.
pub fn start_announcement_sweeper(api: AnnouncementApi<SqliteDatabase>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Announcement expiry sweeper started. Requests expire after {}h", api.window().num_hours());
        loop {
            timer.tick().await;
            trace!("🕰️ Running announcement expiry sweep");
            match api.expire_stale_at(&SystemClock).await {
                Ok(result) if result.is_empty() => trace!("🕰️ Nothing to expire"),
                Ok(result) => {
                    info!("🕰️ {} booking(s) expired", result.declined_count());
                    debug!("🕰️ {}", sweep_summary(&result));
                },
                Err(e) => {
                    error!("🕰️ Error running announcement expiry sweep: {e}");
                },
            }
        }
    })
}

pub fn sweep_summary(result: &ExpiryResult) -> String {
    let declined = result.declined.iter().map(|r| format!("#{}", r.booking.id)).collect::<Vec<String>>().join(", ");
    let skipped = result.skipped.iter().map(|id| format!("#{id}")).collect::<Vec<String>>().join(", ");
    let failed = result.failed.iter().map(|(id, e)| format!("#{id} ({e})")).collect::<Vec<String>>().join(", ");
    format!("Declined: [{declined}] Answered meanwhile: [{skipped}] Failed: [{failed}]")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn summary_of_an_empty_sweep() {
        let failed = vec![(9, "database is locked".into())];
        let result = ExpiryResult { skipped: vec![4], failed, ..Default::default() };
        assert_eq!(
            sweep_summary(&result),
            "Declined: [] Answered meanwhile: [#4] Failed: [#9 (database is locked)]"
        );
    }
}
