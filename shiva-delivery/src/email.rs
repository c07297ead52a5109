use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use shiva_core::config::DeliveryConfig;
use shiva_core::{DeliveryOutcome, DeliveryProvider, OutgoingEmail};

const RESEND_API_URL: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Message id reported when no provider is configured.
pub const LOG_ONLY_MESSAGE_ID: &str = "test-mode";

#[derive(Debug, Serialize)]
struct ResendEmailRequest {
    from: String,
    to: Vec<String>,
    subject: String,
    html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResendEmailResponse {
    id: String,
}

struct ResendClient {
    http: Arc<reqwest::Client>,
    api_key: String,
    from: String,
}

/// Sends through the Resend HTTP API. Without an API key and sender it runs
/// log-only: nothing leaves the process and every send reports success.
pub struct ResendDelivery {
    client: Option<ResendClient>,
}

fn sender(from_email: &str, from_name: &str) -> String {
    if from_name.trim().is_empty() || from_email.contains('<') {
        from_email.to_string()
    } else {
        format!("{} <{}>", from_name.trim(), from_email)
    }
}

impl ResendDelivery {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = match (&config.resend_api_key, &config.resend_from_email) {
            (Some(api_key), Some(from_email)) if !api_key.is_empty() && !from_email.is_empty() => {
                tracing::info!("Initializing Resend email client");

                let http = reqwest::Client::builder()
                    .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
                    .build()
                    .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

                Some(ResendClient {
                    http: Arc::new(http),
                    api_key: api_key.clone(),
                    from: sender(from_email, &config.from_name),
                })
            }
            _ => {
                tracing::warn!("Email delivery in log-only mode (missing Resend configuration)");
                None
            }
        };

        Ok(Self { client })
    }

    pub fn is_log_only(&self) -> bool {
        self.client.is_none()
    }

    async fn post(&self, client: &ResendClient, email: &OutgoingEmail) -> Result<String> {
        let request = ResendEmailRequest {
            from: client.from.clone(),
            to: vec![email.to.clone()],
            subject: email.subject.clone(),
            html: email.html.clone(),
            text: Some(email.text.clone()).filter(|t| !t.is_empty()),
        };

        let response = client
            .http
            .post(RESEND_API_URL)
            .header("Authorization", format!("Bearer {}", client.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send HTTP request to Resend: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("Resend API returned error status {}: {}", status, error_text));
        }

        let parsed: ResendEmailResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Resend API response: {}", e))?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl DeliveryProvider for ResendDelivery {
    async fn send(&self, email: &OutgoingEmail) -> DeliveryOutcome {
        let Some(client) = &self.client else {
            tracing::info!("[log-only] email to {}: {}", email.to, email.subject);
            return DeliveryOutcome::sent(LOG_ONLY_MESSAGE_ID);
        };

        match self.post(client, email).await {
            Ok(id) => {
                tracing::debug!("Email sent via Resend to {} (email_id: {})", email.to, id);
                DeliveryOutcome::sent(id)
            }
            Err(e) => {
                tracing::warn!("Resend delivery to {} failed: {}", email.to, e);
                DeliveryOutcome::failed(e.to_string())
            }
        }
    }
}
