use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use shiva_core::{DeliveryOutcome, DeliveryProvider, OutgoingEmail};

/// Provider that records every email and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingProvider {
    sent: Mutex<Vec<OutgoingEmail>>,
    scripted_failures: Mutex<VecDeque<String>>,
    fail_all: Mutex<Option<String>>,
    counter: AtomicUsize,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` sends fail with `error`.
    pub fn fail_next(&self, times: usize, error: &str) {
        let mut failures = self.scripted_failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.extend(std::iter::repeat(error.to_string()).take(times));
    }

    /// Every send fails until cleared with `None`.
    pub fn fail_always(&self, error: Option<&str>) {
        *self.fail_all.lock().unwrap_or_else(|e| e.into_inner()) = error.map(str::to_string);
    }

    /// Successfully delivered emails, in send order.
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<OutgoingEmail> {
        self.sent().into_iter().filter(|e| e.to == recipient).collect()
    }

    /// Every call, successful or not.
    pub fn attempts(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryProvider for RecordingProvider {
    async fn send(&self, email: &OutgoingEmail) -> DeliveryOutcome {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(error) = self.fail_all.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return DeliveryOutcome::failed(error);
        }
        if let Some(error) = self
            .scripted_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            return DeliveryOutcome::failed(error);
        }

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email.clone());
        DeliveryOutcome::sent(format!("rec-{n}"))
    }
}
