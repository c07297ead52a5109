use anyhow::Result;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use shiva_core::ShivaContext;
use shiva_support::SupportRegistry;

use crate::queue::{NotificationQueue, QueueReport};

/// Drives the notification queue on a timer. At most one pass runs at a
/// time; a tick that finds a pass in flight is dropped.
pub struct NotificationRunner {
    ctx: ShivaContext,
    queue: NotificationQueue,
    registry: SupportRegistry,
    in_flight: Mutex<()>,
}

impl NotificationRunner {
    pub fn new(ctx: ShivaContext) -> Self {
        Self {
            queue: NotificationQueue::new(ctx.clone()),
            registry: SupportRegistry::new(ctx.clone()),
            ctx,
            in_flight: Mutex::new(()),
        }
    }

    /// One pass, or `None` when another pass holds the guard.
    pub async fn tick(&self) -> Option<QueueReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::info!("Notification run still in progress, skipping tick");
            return None;
        };

        let report = self.queue.run_once(self.ctx.now()).await;
        if !report.paused {
            tracing::info!(
                "Notification run complete: {} sent, {} retried, {} pages archived, {} stage errors",
                report.total_sent(),
                report.retry.sent,
                report.pages_archived,
                report.stage_errors
            );
        }

        match self.registry.archive_expired().await {
            Ok(0) => {}
            Ok(count) => tracing::info!("Archived {} expired support pages", count),
            Err(e) => tracing::error!("Failed to archive expired support pages: {}", e),
        }

        Some(report)
    }
}

pub async fn run(ctx: ShivaContext) -> Result<()> {
    if !ctx.config.notify.enabled {
        tracing::info!("Notification runner disabled");
        return Ok(());
    }

    let period = Duration::from_secs(ctx.config.notify.interval_secs.max(1));
    tracing::info!(
        "Starting notification runner (every {}s, timezone {})",
        period.as_secs(),
        ctx.config.notify.timezone
    );

    let runner = NotificationRunner::new(ctx);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        runner.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiva_core::types::PageStatus;
    use shiva_test_utils::{date, new_page, seed_page, toronto, TestHarness};

    #[tokio::test]
    async fn overlapping_tick_is_skipped() {
        let h = TestHarness::new(toronto(2026, 3, 3, 10, 0));
        let runner = NotificationRunner::new(h.ctx.clone());

        let held = runner.in_flight.lock().await;
        assert!(runner.tick().await.is_none());
        drop(held);

        assert!(runner.tick().await.is_some());
    }

    #[tokio::test]
    async fn tick_archives_long_finished_pages() {
        let h = TestHarness::new(toronto(2026, 4, 20, 10, 0));
        let old = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let recent = seed_page(h.store.as_ref(), new_page(date("2026-04-10"), date("2026-04-16"))).await;
        let runner = NotificationRunner::new(h.ctx.clone());

        runner.tick().await;
        assert_eq!(h.store.page(old.id).unwrap().status, PageStatus::Archived);
        assert_eq!(h.store.page(recent.id).unwrap().status, PageStatus::Active);
    }
}
