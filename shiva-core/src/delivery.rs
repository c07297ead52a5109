use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One rendered email ready for a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn sent(provider_message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_message_id: Some(provider_message_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }
}

/// A bounded call to an outbound email provider. Implementations report
/// failure in the outcome rather than as an error so one bad address never
/// aborts a batch.
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> DeliveryOutcome;
}
