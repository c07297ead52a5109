//! Fire-and-forget usage counters.
//!
//! Request paths call [`AuditSink::record`], which never waits: events go onto
//! a bounded channel and a single worker folds them into daily counters.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::calendar::LocalClock;
use crate::store::Store;
use crate::types::PageId;

pub const AUDIT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditEvent {
    PageView,
    OrganizeStart,
    OrganizeComplete,
    MealSignup,
    MealSignupMulti,
    AccessRequest,
    CoOrganizerInvite,
    Report,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::PageView => "page_view",
            AuditEvent::OrganizeStart => "organize_start",
            AuditEvent::OrganizeComplete => "organize_complete",
            AuditEvent::MealSignup => "meal_signup",
            AuditEvent::MealSignupMulti => "meal_signup_multi",
            AuditEvent::AccessRequest => "access_request",
            AuditEvent::CoOrganizerInvite => "co_organizer_invite",
            AuditEvent::Report => "report",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event: AuditEvent,
    pub page_id: Option<PageId>,
    pub at: DateTime<Utc>,
}

pub type AuditReceiver = mpsc::Receiver<AuditRecord>;

#[derive(Debug, Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditSink {
    pub fn channel(capacity: usize) -> (Self, AuditReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn record(&self, event: AuditEvent, page_id: Option<PageId>, at: DateTime<Utc>) {
        match self.tx.try_send(AuditRecord { event, page_id, at }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                tracing::warn!("Audit channel full, dropping {} event", record.event.as_str());
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                tracing::debug!("Audit worker gone, dropping {} event", record.event.as_str());
            }
        }
    }
}

/// Drains the channel until every sender is dropped. Counters roll over at
/// local midnight in `local`'s zone.
pub async fn run_audit_worker(store: Arc<dyn Store>, local: LocalClock, mut rx: AuditReceiver) {
    tracing::info!("Starting audit worker");

    while let Some(record) = rx.recv().await {
        let day = local.today(record.at);
        if let Err(e) = store
            .increment_counter(record.event.as_str(), record.page_id, day)
            .await
        {
            tracing::error!("Failed to record {} event: {}", record.event.as_str(), e);
        }
    }

    tracing::info!("Audit worker stopped");
}

pub fn spawn_audit_worker(store: Arc<dyn Store>, local: LocalClock, rx: AuditReceiver) -> JoinHandle<()> {
    tokio::spawn(run_audit_worker(store, local, rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (sink, mut rx) = AuditSink::channel(1);
        let now = Utc::now();

        sink.record(AuditEvent::PageView, None, now);
        sink.record(AuditEvent::Report, None, now);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, AuditEvent::PageView);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_is_ignored() {
        let (sink, rx) = AuditSink::channel(4);
        drop(rx);
        sink.record(AuditEvent::MealSignup, None, Utc::now());
    }
}
