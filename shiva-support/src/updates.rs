//! Organizer updates board and the manual thank-you round.

use serde::Serialize;

use shiva_core::store::NewUpdate;
use shiva_core::types::{OrganizerUpdate, PageId, SupportPage};
use shiva_core::{authorize, Privilege, ShivaContext, ShivaError, ShivaResult};

use crate::validate::{self, TEXT_MAX};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Volunteer {
    pub name: String,
    pub email: String,
}

/// Page and recipients of a manual thank-you round.
#[derive(Debug, Clone)]
pub struct ThankYouDispatch {
    pub page: SupportPage,
    pub volunteers: Vec<Volunteer>,
}

pub struct UpdateBoard {
    ctx: ShivaContext,
}

impl UpdateBoard {
    pub fn new(ctx: ShivaContext) -> Self {
        Self { ctx }
    }

    pub async fn post_update(&self, page_id: PageId, token: &str, message: Option<&str>) -> ShivaResult<OrganizerUpdate> {
        let store = self.ctx.store.as_ref();
        let auth = authorize(store, page_id, token).await?;
        auth.capability
            .require(Privilege::PostUpdates, "You cannot post updates on this page")?;
        let message = validate::required_text(message, "message", TEXT_MAX)?;

        let update = store
            .insert_update(NewUpdate {
                page_id,
                message,
                author_name: auth.actor_name().to_string(),
                created_at: self.ctx.now(),
            })
            .await?;
        tracing::info!("Update {} posted on support page {}", update.id, page_id);
        Ok(update)
    }

    /// Newest first.
    pub async fn list_updates(&self, page_id: PageId) -> ShivaResult<Vec<OrganizerUpdate>> {
        Ok(self.ctx.store.updates_for_page(page_id).await?)
    }

    pub async fn delete_update(&self, page_id: PageId, token: &str, update_id: i64) -> ShivaResult<()> {
        let store = self.ctx.store.as_ref();
        let auth = authorize(store, page_id, token).await?;
        auth.capability
            .require(Privilege::PostUpdates, "You cannot remove updates on this page")?;

        if !store.delete_update(page_id, update_id).await? {
            return Err(ShivaError::NotFound("Update"));
        }
        Ok(())
    }

    /// Distinct confirmed volunteers of a page, keyed by lowercased email.
    pub async fn confirmed_volunteers(&self, page_id: PageId) -> ShivaResult<Vec<Volunteer>> {
        let mut volunteers: Vec<Volunteer> = Vec::new();
        for signup in self.ctx.store.signups_for_page(page_id).await? {
            if !signup.is_confirmed() {
                continue;
            }
            let email = signup.volunteer_email.to_lowercase();
            if volunteers.iter().any(|v| v.email == email) {
                continue;
            }
            volunteers.push(Volunteer {
                name: signup.volunteer_name,
                email,
            });
        }
        Ok(volunteers)
    }

    /// Claims the page's one-shot thank-you flag and returns every distinct
    /// confirmed volunteer, keyed by email.
    pub async fn dispatch_thank_you(&self, page_id: PageId, token: &str) -> ShivaResult<ThankYouDispatch> {
        let store = self.ctx.store.as_ref();
        let auth = authorize(store, page_id, token).await?;
        auth.capability
            .require(Privilege::SendThankYou, "You cannot send thank-you notes for this page")?;

        if auth.page.thank_you_sent {
            return Err(ShivaError::conflict("thank-you notes have already been sent"));
        }

        let volunteers = self.confirmed_volunteers(page_id).await?;
        if volunteers.is_empty() {
            return Err(ShivaError::validation("No volunteers"));
        }

        // Lost race with the scheduled pass or a second click.
        if !store.claim_thank_you(page_id).await? {
            return Err(ShivaError::conflict("thank-you notes have already been sent"));
        }

        tracing::info!(
            "Thank-you dispatch claimed for support page {} ({} volunteers)",
            page_id,
            volunteers.len()
        );
        Ok(ThankYouDispatch {
            page: auth.page,
            volunteers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiva_core::types::MealSlot;
    use shiva_test_utils::{date, new_page, new_signup, seed_page, seed_signup, toronto, TestHarness};

    async fn setup() -> (TestHarness, SupportPage, UpdateBoard) {
        let h = TestHarness::new(toronto(2026, 3, 3, 10, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-07"))).await;
        let board = UpdateBoard::new(h.ctx.clone());
        (h, page, board)
    }

    #[tokio::test]
    async fn updates_are_listed_newest_first() {
        let (h, page, board) = setup().await;
        board.post_update(page.id, &page.magic_token, Some("Shiva minyan at 7pm")).await.unwrap();
        h.clock.advance(chrono::Duration::minutes(5));
        board.post_update(page.id, &page.magic_token, Some("Thank you all")).await.unwrap();

        let listed = board.list_updates(page.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message, "Thank you all");
        assert_eq!(listed[0].author_name, "Sarah Cohen");
    }

    #[tokio::test]
    async fn long_messages_are_truncated() {
        let (_h, page, board) = setup().await;
        let long = "x".repeat(2500);
        let update = board.post_update(page.id, &page.magic_token, Some(&long)).await.unwrap();
        assert_eq!(update.message.chars().count(), 2000);
    }

    #[tokio::test]
    async fn empty_message_and_bad_token_are_rejected() {
        let (_h, page, board) = setup().await;
        assert!(matches!(
            board.post_update(page.id, &page.magic_token, Some("  ")).await,
            Err(ShivaError::Validation(_))
        ));
        assert!(matches!(
            board.post_update(page.id, "wrong", Some("hello")).await,
            Err(ShivaError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn delete_missing_update_is_not_found() {
        let (_h, page, board) = setup().await;
        let update = board.post_update(page.id, &page.magic_token, Some("hello")).await.unwrap();
        board.delete_update(page.id, &page.magic_token, update.id).await.unwrap();
        assert!(matches!(
            board.delete_update(page.id, &page.magic_token, update.id).await,
            Err(ShivaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn thank_you_is_one_shot_and_deduplicates_volunteers() {
        let (h, page, board) = setup().await;
        let store = h.store.as_ref();

        assert!(matches!(
            board.dispatch_thank_you(page.id, &page.magic_token).await,
            Err(ShivaError::Validation(_))
        ));

        seed_signup(store, new_signup(&page, date("2026-03-02"), MealSlot::Lunch, "Ari Gold", "ari@example.com")).await;
        seed_signup(store, new_signup(&page, date("2026-03-03"), MealSlot::Dinner, "Ari Gold", "ARI@example.com")).await;
        seed_signup(store, new_signup(&page, date("2026-03-04"), MealSlot::Dinner, "Ben Katz", "ben@example.com")).await;

        let dispatch = board.dispatch_thank_you(page.id, &page.magic_token).await.unwrap();
        assert_eq!(dispatch.volunteers.len(), 2);
        assert!(h.store.page(page.id).unwrap().thank_you_sent);

        match board.dispatch_thank_you(page.id, &page.magic_token).await {
            Err(ShivaError::Conflict(m)) => assert_eq!(m, "thank-you notes have already been sent"),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }
}
