//! Shared test utilities for the shiva crates.
//!
//! - [`MemoryStore`] - in-memory store with the Postgres store's atomicity
//! - [`FixedClock`] - settable clock
//! - [`RecordingProvider`] - delivery provider that records and can fail
//! - [`TestHarness`] - a wired context over the three above

mod clock;
pub use clock::{toronto, FixedClock};

mod delivery;
pub use delivery::RecordingProvider;

mod memory;
pub use memory::MemoryStore;

mod fixtures;
pub use fixtures::{date, new_page, new_signup, seed_page, seed_signup, test_config, TestHarness};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shiva_core::audit::{run_audit_worker, AuditEvent, AuditSink};
    use shiva_core::store::{SignupInsert, Store};
    use shiva_core::LocalClock;
    use std::sync::Arc;
    use shiva_core::types::MealSlot;
    use shiva_core::{Clock, DeliveryProvider, OutgoingEmail};

    fn email(to: &str) -> OutgoingEmail {
        OutgoingEmail {
            to: to.to_string(),
            subject: "s".to_string(),
            html: "<p>h</p>".to_string(),
            text: "t".to_string(),
        }
    }

    #[test]
    fn fixed_clock_moves_only_when_told() {
        let clock = FixedClock::toronto(2026, 3, 2, 9, 0);
        let start = clock.now();
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(15));
        assert_eq!(clock.now() - start, Duration::minutes(15));
    }

    #[tokio::test]
    async fn recording_provider_scripts_failures() {
        let provider = RecordingProvider::new();
        provider.fail_next(1, "mailbox full");

        assert!(!provider.send(&email("a@example.com")).await.success);
        assert!(provider.send(&email("a@example.com")).await.success);
        assert_eq!(provider.attempts(), 2);
        assert_eq!(provider.sent().len(), 1);
    }

    #[tokio::test]
    async fn memory_store_rejects_second_confirmed_signup() {
        let store = MemoryStore::new();
        let page = seed_page(&store, new_page(date("2026-03-01"), date("2026-03-05"))).await;

        let first = new_signup(&page, date("2026-03-02"), MealSlot::Dinner, "Ari", "ari@example.com");
        let second = new_signup(&page, date("2026-03-02"), MealSlot::Dinner, "Ben", "ben@example.com");

        assert!(matches!(store.insert_signup(first).await.unwrap(), SignupInsert::Inserted(_)));
        assert!(matches!(store.insert_signup(second).await.unwrap(), SignupInsert::SlotTaken));
    }

    #[tokio::test]
    async fn audit_counters_roll_over_at_local_midnight() {
        let store = Arc::new(MemoryStore::new());
        let local = LocalClock::new("America/Toronto").unwrap();
        let (sink, rx) = AuditSink::channel(8);

        // 21:00 Monday in Toronto is already Tuesday in UTC.
        sink.record(AuditEvent::PageView, None, toronto(2026, 3, 2, 21, 0));
        sink.record(AuditEvent::PageView, None, toronto(2026, 3, 3, 0, 30));
        drop(sink);
        run_audit_worker(store.clone(), local, rx).await;

        assert_eq!(store.counter("page_view", None, date("2026-03-02")), 1);
        assert_eq!(store.counter("page_view", None, date("2026-03-03")), 1);
    }
}
