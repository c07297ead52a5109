//! Logged delivery: every email gets an email-log row before the provider is
//! called, and the row records how the call went.

use shiva_core::store::{EmailResult, NewEmailLog};
use shiva_core::types::{EmailKind, EmailLogEntry, EmailStatus, MealSignup, OrganizerUpdate, PageId, SupportPage};
use shiva_core::{OutgoingEmail, ShivaContext, ShivaError, ShivaResult};
use shiva_support::{Decision, InviteIssued, RequestIssued, ThankYouDispatch, Volunteer};

use crate::templates::{Rendered, Templates};

/// Retries after the first attempt. A failure on attempt `MAX_RETRIES + 1`
/// is final.
pub const MAX_RETRIES: i32 = 3;

/// One email to log and send.
#[derive(Debug, Clone)]
pub struct Letter {
    pub page_id: PageId,
    pub kind: EmailKind,
    pub to: String,
    pub to_name: Option<String>,
    pub signup_id: Option<i64>,
    pub content: Rendered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    pub log_id: i64,
    pub status: EmailStatus,
}

impl Delivered {
    pub fn is_sent(&self) -> bool {
        self.status == EmailStatus::Sent
    }
}

#[derive(Clone)]
pub struct Mailer {
    ctx: ShivaContext,
    templates: Templates,
}

impl Mailer {
    pub fn new(ctx: ShivaContext) -> Self {
        let templates = Templates::new(&ctx.config.server.base_url, &ctx.config.delivery.from_name);
        Self { ctx, templates }
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    async fn attempt(&self, log_id: i64, to: &str, content: &Rendered, attempts: i32) -> ShivaResult<EmailStatus> {
        let outcome = self
            .ctx
            .delivery
            .send(&OutgoingEmail {
                to: to.to_string(),
                subject: content.subject.clone(),
                html: content.html.clone(),
                text: content.text.clone(),
            })
            .await;

        let result = if outcome.success {
            EmailResult {
                status: EmailStatus::Sent,
                attempts,
                provider_message_id: outcome.provider_message_id,
                error_message: None,
                sent_at: Some(self.ctx.now()),
            }
        } else {
            let error = outcome.error.unwrap_or_else(|| "unknown delivery error".to_string());
            tracing::warn!("Email {} to {} failed on attempt {}: {}", log_id, to, attempts, error);
            EmailResult {
                status: if attempts > MAX_RETRIES {
                    EmailStatus::Skipped
                } else {
                    EmailStatus::Failed
                },
                attempts,
                provider_message_id: None,
                error_message: Some(error),
                sent_at: None,
            }
        };

        self.ctx.store.record_email_result(log_id, &result).await?;
        Ok(result.status)
    }

    /// Inserts a pending log row, sends, and records the outcome. A provider
    /// failure is not an error here; it shows up in the returned status.
    pub async fn deliver(&self, letter: Letter) -> ShivaResult<Delivered> {
        let entry = self
            .ctx
            .store
            .insert_email_log(NewEmailLog {
                page_id: letter.page_id,
                kind: letter.kind,
                recipient_email: letter.to.clone(),
                recipient_name: letter.to_name,
                related_signup_id: letter.signup_id,
                created_at: self.ctx.now(),
            })
            .await?;

        let status = self.attempt(entry.id, &letter.to, &letter.content, 1).await?;
        if status == EmailStatus::Sent {
            tracing::debug!("Sent {} email {} to {}", letter.kind, entry.id, letter.to);
        }
        Ok(Delivered {
            log_id: entry.id,
            status,
        })
    }

    /// Sends a failed row again with freshly built content.
    pub async fn redeliver(&self, entry: &EmailLogEntry, content: &Rendered) -> ShivaResult<EmailStatus> {
        self.attempt(entry.id, &entry.recipient_email, content, entry.attempts + 1).await
    }

    /// Gives up on a row without another attempt.
    pub async fn skip(&self, entry: &EmailLogEntry, reason: &str) -> ShivaResult<()> {
        self.ctx
            .store
            .record_email_result(
                entry.id,
                &EmailResult {
                    status: EmailStatus::Skipped,
                    attempts: entry.attempts,
                    provider_message_id: None,
                    error_message: Some(reason.to_string()),
                    sent_at: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn send_now(&self, letter: Letter) -> ShivaResult<()> {
        let kind = letter.kind;
        let delivered = self.deliver(letter).await?;
        if delivered.is_sent() {
            Ok(())
        } else {
            Err(ShivaError::TransientProvider(format!(
                "{} email {} queued for retry",
                kind, delivered.log_id
            )))
        }
    }

    /// Confirmation to the volunteer and, when the organizer wants instant
    /// alerts, a heads-up to the organizer. `signups` share one volunteer.
    pub async fn signup_emails(&self, page: &SupportPage, signups: &[MealSignup]) -> ShivaResult<()> {
        let Some(first) = signups.first() else {
            return Ok(());
        };

        let confirmation = self
            .send_now(Letter {
                page_id: page.id,
                kind: EmailKind::SignupConfirmation,
                to: first.volunteer_email.clone(),
                to_name: Some(first.volunteer_name.clone()),
                signup_id: Some(first.id),
                content: self.templates.signup_confirmation(page, signups),
            })
            .await;

        if page.notification_prefs.instant {
            self.send_now(Letter {
                page_id: page.id,
                kind: EmailKind::NewSignupAlert,
                to: page.organizer_email.clone(),
                to_name: Some(page.organizer_name.clone()),
                signup_id: Some(first.id),
                content: self.templates.new_signup_alert(page, signups),
            })
            .await?;
        }
        confirmation
    }

    pub async fn verification(&self, page: &SupportPage, verification_token: &str) -> ShivaResult<()> {
        self.send_now(Letter {
            page_id: page.id,
            kind: EmailKind::EmailVerification,
            to: page.organizer_email.clone(),
            to_name: Some(page.organizer_name.clone()),
            signup_id: None,
            content: self.templates.email_verification(page, verification_token),
        })
        .await
    }

    pub async fn invite(&self, issued: &InviteIssued) -> ShivaResult<()> {
        self.send_now(Letter {
            page_id: issued.page_id,
            kind: EmailKind::CoOrganizerInvite,
            to: issued.invitee_email.clone(),
            to_name: Some(issued.invitee_name.clone()),
            signup_id: None,
            content: self.templates.co_organizer_invite(
                &issued.inviter_name,
                &issued.invitee_name,
                &issued.family_name,
                &issued.token,
            ),
        })
        .await
    }

    pub async fn access_request(&self, issued: &RequestIssued) -> ShivaResult<()> {
        self.send_now(Letter {
            page_id: issued.page_id,
            kind: EmailKind::AccessRequest,
            to: issued.organizer_email.clone(),
            to_name: Some(issued.organizer_name.clone()),
            signup_id: None,
            content: self.templates.access_request(
                issued.request_id,
                &issued.organizer_key,
                &issued.family_name,
                &issued.requester_name,
                &issued.requester_email,
                issued.message.as_deref(),
            ),
        })
        .await
    }

    pub async fn access_decision(&self, decision: &Decision) -> ShivaResult<()> {
        let (kind, content) = match &decision.access_token {
            Some(token) => (
                EmailKind::AccessApproved,
                self.templates
                    .access_approved(&decision.page_id.to_string(), &decision.family_name, token),
            ),
            None => (EmailKind::AccessDenied, self.templates.access_denied(&decision.family_name)),
        };
        self.send_now(Letter {
            page_id: decision.page_id,
            kind,
            to: decision.requester_email.clone(),
            to_name: Some(decision.requester_name.clone()),
            signup_id: None,
            content,
        })
        .await
    }

    /// Returns how many of `recipients` were sent to right away.
    pub async fn organizer_update(
        &self,
        page: &SupportPage,
        update: &OrganizerUpdate,
        recipients: &[Volunteer],
    ) -> ShivaResult<usize> {
        let content = self.templates.organizer_update(page, update);
        let mut sent = 0;
        for volunteer in recipients {
            let delivered = self
                .deliver(Letter {
                    page_id: page.id,
                    kind: EmailKind::OrganizerUpdate,
                    to: volunteer.email.clone(),
                    to_name: Some(volunteer.name.clone()),
                    signup_id: None,
                    content: content.clone(),
                })
                .await?;
            if delivered.is_sent() {
                sent += 1;
            }
        }
        Ok(sent)
    }

    pub async fn thank_you(&self, dispatch: &ThankYouDispatch) -> ShivaResult<usize> {
        let mut sent = 0;
        for volunteer in &dispatch.volunteers {
            let delivered = self
                .deliver(Letter {
                    page_id: dispatch.page.id,
                    kind: EmailKind::ThankYou,
                    to: volunteer.email.clone(),
                    to_name: Some(volunteer.name.clone()),
                    signup_id: None,
                    content: self.templates.thank_you(&dispatch.page, Some(&volunteer.name)),
                })
                .await?;
            if delivered.is_sent() {
                sent += 1;
            }
        }
        tracing::info!(
            "Thank-you notes for support page {}: {}/{} sent",
            dispatch.page.id,
            sent,
            dispatch.volunteers.len()
        );
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiva_core::types::MealSlot;
    use shiva_test_utils::{date, new_page, new_signup, seed_page, seed_signup, toronto, TestHarness};

    fn letter(page_id: PageId, to: &str) -> Letter {
        Letter {
            page_id,
            kind: EmailKind::ThankYou,
            to: to.to_string(),
            to_name: None,
            signup_id: None,
            content: Rendered {
                subject: "Thank you".into(),
                html: "<p>Thank you</p>".into(),
                text: "Thank you".into(),
            },
        }
    }

    #[tokio::test]
    async fn successful_delivery_is_logged_as_sent() {
        let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let mailer = Mailer::new(h.ctx.clone());

        let delivered = mailer.deliver(letter(page.id, "ari@example.com")).await.unwrap();
        assert!(delivered.is_sent());

        let log = h.store.email_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, EmailStatus::Sent);
        assert_eq!(log[0].attempts, 1);
        assert_eq!(log[0].provider_message_id.as_deref(), Some("rec-1"));
        assert!(log[0].sent_at.is_some());
    }

    #[tokio::test]
    async fn failure_is_recorded_and_final_attempt_is_skipped() {
        let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let mailer = Mailer::new(h.ctx.clone());
        h.provider.fail_always(Some("rate limited"));

        let delivered = mailer.deliver(letter(page.id, "ari@example.com")).await.unwrap();
        assert_eq!(delivered.status, EmailStatus::Failed);

        let content = letter(page.id, "ari@example.com").content;
        for expected in [EmailStatus::Failed, EmailStatus::Failed, EmailStatus::Skipped] {
            let entry = h.store.email_log().remove(0);
            assert_eq!(mailer.redeliver(&entry, &content).await.unwrap(), expected);
        }
        let entry = h.store.email_log().remove(0);
        assert_eq!(entry.attempts, 4);
        assert_eq!(entry.error_message.as_deref(), Some("rate limited"));
        assert_eq!(h.provider.attempts(), 4);
    }

    #[tokio::test]
    async fn instant_alert_follows_organizer_preference() {
        let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
        let mut new = new_page(date("2026-03-01"), date("2026-03-05"));
        new.notification_prefs.instant = false;
        let page = seed_page(h.store.as_ref(), new).await;
        let signup = seed_signup(
            h.store.as_ref(),
            new_signup(&page, date("2026-03-03"), MealSlot::Dinner, "Ari Gold", "ari@example.com"),
        )
        .await;
        let mailer = Mailer::new(h.ctx.clone());

        mailer.signup_emails(&page, &[signup.clone()]).await.unwrap();
        assert_eq!(h.provider.sent().len(), 1);
        assert!(h.provider.sent_to("sarah@example.com").is_empty());

        let mut instant = page.clone();
        instant.notification_prefs.instant = true;
        mailer.signup_emails(&instant, &[signup]).await.unwrap();
        assert_eq!(h.provider.sent_to("sarah@example.com").len(), 1);
    }

    #[tokio::test]
    async fn immediate_send_failure_surfaces_as_transient() {
        let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let mailer = Mailer::new(h.ctx.clone());
        h.provider.fail_next(1, "timeout");

        assert!(matches!(
            mailer.verification(&page, "verify-me").await,
            Err(ShivaError::TransientProvider(_))
        ));
        assert_eq!(h.store.email_log()[0].status, EmailStatus::Failed);
    }
}
