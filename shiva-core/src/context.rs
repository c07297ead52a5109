use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::audit::{AuditReceiver, AuditSink, AUDIT_CHANNEL_CAPACITY};
use crate::calendar::LocalClock;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::delivery::DeliveryProvider;
use crate::store::{PgStore, Store};

/// Shared handles cloned into every request handler and background task.
#[derive(Clone)]
pub struct ShivaContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub delivery: Arc<dyn DeliveryProvider>,
    pub clock: Arc<dyn Clock>,
    pub local: LocalClock,
    pub audit: AuditSink,
}

impl ShivaContext {
    /// Assembles a context from already-built parts. The returned receiver
    /// must be handed to the audit worker.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        delivery: Arc<dyn DeliveryProvider>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<(Self, AuditReceiver)> {
        let local = LocalClock::new(&config.notify.timezone)?;
        let (audit, audit_rx) = AuditSink::channel(AUDIT_CHANNEL_CAPACITY);

        Ok((
            ShivaContext {
                config: Arc::new(config),
                store,
                delivery,
                clock,
                local,
                audit,
            },
            audit_rx,
        ))
    }

    /// Connects to Postgres, applies migrations when enabled and wires the
    /// Postgres store with the system clock.
    pub async fn connect(
        config: Config,
        delivery: Arc<dyn DeliveryProvider>,
    ) -> anyhow::Result<(Self, AuditReceiver)> {
        if config.database.run_migrations {
            run_migrations(&config.database).await?;
        }
        let pool = create_pool(&config.database).await?;
        let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

        Self::new(config, store, delivery, Arc::new(SystemClock))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
