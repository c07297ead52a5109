//! Read access to private pages, granted by the organizer per requester.

use serde::Deserialize;

use shiva_core::store::NewAccessRequest;
use shiva_core::types::{AccessRequestStatus, PageId, Visibility};
use shiva_core::{generate_token, AuditEvent, ShivaContext, ShivaError, ShivaResult};

use crate::validate::{self, NAME_MAX, TEXT_MAX};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessRequestInput {
    #[serde(alias = "support_id")]
    pub page_id: Option<PageId>,
    #[serde(alias = "requester_name")]
    pub name: Option<String>,
    #[serde(alias = "requester_email")]
    pub email: Option<String>,
    pub message: Option<String>,
}

/// Details for the organizer's approve/deny email.
#[derive(Debug, Clone)]
pub struct RequestIssued {
    pub request_id: i64,
    pub page_id: PageId,
    pub organizer_key: String,
    pub organizer_name: String,
    pub organizer_email: String,
    pub family_name: String,
    pub requester_name: String,
    pub requester_email: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RequestOutcome {
    Requested(RequestIssued),
    /// Re-requesting after approval hands back the existing grant.
    AlreadyApproved { access_token: String },
}

/// Details for the requester's follow-up email.
#[derive(Debug, Clone)]
pub struct Decision {
    pub request_id: i64,
    pub page_id: PageId,
    pub status: AccessRequestStatus,
    pub requester_name: String,
    pub requester_email: String,
    pub family_name: String,
    pub access_token: Option<String>,
}

pub struct AccessBroker {
    ctx: ShivaContext,
}

impl AccessBroker {
    pub fn new(ctx: ShivaContext) -> Self {
        Self { ctx }
    }

    pub async fn request(&self, input: AccessRequestInput) -> ShivaResult<RequestOutcome> {
        let page_id = input
            .page_id
            .ok_or_else(|| ShivaError::validation("Missing required field: page_id"))?;
        let name = validate::required_text(input.name.as_deref(), "name", NAME_MAX)?;
        let email = validate::required_email(input.email.as_deref(), "email")?;
        let message = validate::optional_text(input.message.as_deref(), TEXT_MAX);

        let store = self.ctx.store.as_ref();
        let page = store
            .get_page(page_id)
            .await?
            .ok_or(ShivaError::NotFound("Support page"))?;

        if page.visibility == Visibility::Public {
            return Err(ShivaError::validation("This page is public"));
        }

        for existing in store.access_requests_from(page_id, &email).await? {
            match existing.status {
                AccessRequestStatus::Pending => {
                    return Err(ShivaError::conflict(
                        "You already have a pending request for this page",
                    ))
                }
                AccessRequestStatus::Approved => {
                    if let Some(access_token) = existing.access_token {
                        return Ok(RequestOutcome::AlreadyApproved { access_token });
                    }
                }
                AccessRequestStatus::Denied => {}
            }
        }

        let now = self.ctx.now();
        let request = store
            .insert_access_request(NewAccessRequest {
                page_id,
                requester_name: name,
                requester_email: email,
                message,
                organizer_key: generate_token(),
                created_at: now,
            })
            .await?;

        tracing::info!("Access request {} created for support page {}", request.id, page_id);
        self.ctx.audit.record(AuditEvent::AccessRequest, Some(page_id), now);

        Ok(RequestOutcome::Requested(RequestIssued {
            request_id: request.id,
            page_id,
            organizer_key: request.organizer_key,
            organizer_name: page.organizer_name,
            organizer_email: page.organizer_email,
            family_name: page.family_name,
            requester_name: request.requester_name,
            requester_email: request.requester_email,
            message: request.message,
        }))
    }

    pub async fn approve(&self, request_id: i64, organizer_key: &str) -> ShivaResult<Decision> {
        self.decide(request_id, organizer_key, AccessRequestStatus::Approved).await
    }

    pub async fn deny(&self, request_id: i64, organizer_key: &str) -> ShivaResult<Decision> {
        self.decide(request_id, organizer_key, AccessRequestStatus::Denied).await
    }

    async fn decide(
        &self,
        request_id: i64,
        organizer_key: &str,
        status: AccessRequestStatus,
    ) -> ShivaResult<Decision> {
        let store = self.ctx.store.as_ref();
        let request = store
            .get_access_request(request_id)
            .await?
            .ok_or(ShivaError::NotFound("Access request"))?;

        let organizer_key = organizer_key.trim();
        if organizer_key.is_empty() || request.organizer_key != organizer_key {
            return Err(ShivaError::Unauthorized);
        }
        if request.status != AccessRequestStatus::Pending {
            return Err(ShivaError::conflict(format!(
                "This request has already been {}",
                request.status
            )));
        }

        let access_token = match status {
            AccessRequestStatus::Approved => Some(generate_token()),
            _ => None,
        };
        if !store
            .decide_access_request(request_id, status, access_token.clone(), self.ctx.now())
            .await?
        {
            return Err(ShivaError::conflict("This request has already been decided"));
        }

        let page = store
            .get_page(request.page_id)
            .await?
            .ok_or(ShivaError::NotFound("Support page"))?;

        tracing::info!("Access request {} {}", request_id, status);
        Ok(Decision {
            request_id,
            page_id: request.page_id,
            status,
            requester_name: request.requester_name,
            requester_email: request.requester_email,
            family_name: page.family_name,
            access_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiva_core::types::SupportPage;
    use shiva_test_utils::{date, new_page, seed_page, toronto, TestHarness};

    async fn setup(visibility: Visibility) -> (TestHarness, SupportPage, AccessBroker) {
        let h = TestHarness::new(toronto(2026, 3, 1, 10, 0));
        let mut new = new_page(date("2026-03-01"), date("2026-03-07"));
        new.visibility = visibility;
        let page = seed_page(h.store.as_ref(), new).await;
        let broker = AccessBroker::new(h.ctx.clone());
        (h, page, broker)
    }

    fn input(page_id: PageId) -> AccessRequestInput {
        AccessRequestInput {
            page_id: Some(page_id),
            name: Some("Rachel Levy".into()),
            email: Some("rachel@example.com".into()),
            message: Some("Family friend from shul".into()),
        }
    }

    #[tokio::test]
    async fn public_page_rejects_requests() {
        let (_h, page, broker) = setup(Visibility::Public).await;
        match broker.request(input(page.id)).await {
            Err(ShivaError::Validation(message)) => assert_eq!(message, "This page is public"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn approve_grants_access_and_rerequest_returns_it() {
        let (h, page, broker) = setup(Visibility::Private).await;

        let issued = match broker.request(input(page.id)).await.unwrap() {
            RequestOutcome::Requested(issued) => issued,
            other => panic!("expected Requested, got {other:?}"),
        };
        assert_eq!(issued.organizer_email, "sarah@example.com");

        assert!(matches!(broker.request(input(page.id)).await, Err(ShivaError::Conflict(_))));

        let decision = broker.approve(issued.request_id, &issued.organizer_key).await.unwrap();
        let access_token = decision.access_token.clone().unwrap();
        assert!(h.ctx.store.has_approved_access(page.id, &access_token).await.unwrap());

        match broker.request(input(page.id)).await.unwrap() {
            RequestOutcome::AlreadyApproved { access_token: again } => assert_eq!(again, access_token),
            other => panic!("expected AlreadyApproved, got {other:?}"),
        }

        assert!(matches!(
            broker.deny(issued.request_id, &issued.organizer_key).await,
            Err(ShivaError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn wrong_organizer_key_is_unauthorized() {
        let (_h, page, broker) = setup(Visibility::Private).await;
        let RequestOutcome::Requested(issued) = broker.request(input(page.id)).await.unwrap() else {
            panic!("expected Requested");
        };

        assert!(matches!(
            broker.approve(issued.request_id, "not-the-key").await,
            Err(ShivaError::Unauthorized)
        ));
        let denied = broker.deny(issued.request_id, &issued.organizer_key).await.unwrap();
        assert_eq!(denied.status, AccessRequestStatus::Denied);
        assert!(denied.access_token.is_none());
    }
}
