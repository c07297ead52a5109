//! Co-organizer invitations and the privileges an accepted invite grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shiva_core::store::NewInvite;
use shiva_core::types::{CoOrganizerInvite, InviteStatus, PageId};
use shiva_core::{authorize, generate_token, AuditEvent, Privilege, ShivaContext, ShivaError, ShivaResult};

use crate::validate::{self, NAME_MAX};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InviteRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Everything the invitation email needs.
#[derive(Debug, Clone)]
pub struct InviteIssued {
    pub invite_id: i64,
    pub page_id: PageId,
    pub token: String,
    pub invitee_name: String,
    pub invitee_email: String,
    pub inviter_name: String,
    pub family_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted { page_id: PageId, family_name: String, token: String },
    AlreadyAccepted { page_id: PageId, family_name: String, token: String },
}

/// Invite as listed to organizers; the token stays private to the invitee.
#[derive(Debug, Clone, Serialize)]
pub struct CoOrganizerSummary {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub status: InviteStatus,
    pub invited_by: String,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl From<CoOrganizerInvite> for CoOrganizerSummary {
    fn from(invite: CoOrganizerInvite) -> Self {
        CoOrganizerSummary {
            id: invite.id,
            name: invite.name,
            email: invite.email,
            status: invite.status,
            invited_by: invite.invited_by,
            created_at: invite.created_at,
            accepted_at: invite.accepted_at,
            revoked_at: invite.revoked_at,
        }
    }
}

pub struct CoOrganizerDirectory {
    ctx: ShivaContext,
}

impl CoOrganizerDirectory {
    pub fn new(ctx: ShivaContext) -> Self {
        Self { ctx }
    }

    pub async fn invite(&self, page_id: PageId, token: &str, req: InviteRequest) -> ShivaResult<InviteIssued> {
        let store = self.ctx.store.as_ref();
        let auth = authorize(store, page_id, token).await?;
        auth.capability.require(
            Privilege::InviteCoOrganizers,
            "Only the primary organizer can invite co-organizers",
        )?;

        let name = validate::required_text(req.name.as_deref(), "name", NAME_MAX)?;
        let email = validate::required_email(req.email.as_deref(), "email")?;

        if email == auth.page.organizer_email.to_lowercase() {
            return Err(ShivaError::validation("You cannot invite yourself as a co-organizer"));
        }

        let mut replacing = None;
        for existing in store.invites_for_page(page_id).await? {
            if existing.email.to_lowercase() != email {
                continue;
            }
            match existing.status {
                InviteStatus::Pending => {
                    return Err(ShivaError::conflict("An invitation is already pending for this email"))
                }
                InviteStatus::Accepted => {
                    return Err(ShivaError::conflict("This person is already a co-organizer"))
                }
                InviteStatus::Revoked => replacing = Some(existing.id),
            }
        }

        let now = self.ctx.now();
        let invite = store
            .insert_invite(
                NewInvite {
                    page_id,
                    name,
                    email,
                    token: generate_token(),
                    invited_by: auth.page.organizer_name.clone(),
                    created_at: now,
                },
                replacing,
            )
            .await?;

        tracing::info!("Co-organizer invite {} created for support page {}", invite.id, page_id);
        self.ctx.audit.record(AuditEvent::CoOrganizerInvite, Some(page_id), now);

        Ok(InviteIssued {
            invite_id: invite.id,
            page_id,
            token: invite.token,
            invitee_name: invite.name,
            invitee_email: invite.email,
            inviter_name: auth.page.organizer_name,
            family_name: auth.page.family_name,
        })
    }

    /// Accepting twice is not an error; the token keeps working.
    pub async fn accept(&self, token: &str) -> ShivaResult<AcceptOutcome> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ShivaError::NotFound("Invitation"));
        }
        let store = self.ctx.store.as_ref();
        let invite = store
            .invite_by_token(token)
            .await?
            .ok_or(ShivaError::NotFound("Invitation"))?;
        let page = store
            .get_page(invite.page_id)
            .await?
            .ok_or(ShivaError::NotFound("Invitation"))?;

        match invite.status {
            InviteStatus::Revoked => Err(ShivaError::NotFound("Invitation")),
            InviteStatus::Accepted => Ok(AcceptOutcome::AlreadyAccepted {
                page_id: page.id,
                family_name: page.family_name,
                token: invite.token,
            }),
            InviteStatus::Pending => {
                store
                    .set_invite_status(invite.id, InviteStatus::Accepted, self.ctx.now())
                    .await?;
                tracing::info!("Co-organizer invite {} accepted", invite.id);
                Ok(AcceptOutcome::Accepted {
                    page_id: page.id,
                    family_name: page.family_name,
                    token: invite.token,
                })
            }
        }
    }

    pub async fn revoke(&self, page_id: PageId, token: &str, invite_id: i64) -> ShivaResult<()> {
        let store = self.ctx.store.as_ref();
        let auth = authorize(store, page_id, token).await?;
        auth.capability.require(
            Privilege::RevokeCoOrganizers,
            "Only the primary organizer can remove co-organizers",
        )?;

        let invite = store
            .invites_for_page(page_id)
            .await?
            .into_iter()
            .find(|i| i.id == invite_id)
            .ok_or(ShivaError::NotFound("Invitation"))?;

        if invite.status != InviteStatus::Revoked {
            store
                .set_invite_status(invite.id, InviteStatus::Revoked, self.ctx.now())
                .await?;
            tracing::info!("Co-organizer invite {} revoked on support page {}", invite.id, page_id);
        }
        Ok(())
    }

    pub async fn list(&self, page_id: PageId, token: &str) -> ShivaResult<Vec<CoOrganizerSummary>> {
        let store = self.ctx.store.as_ref();
        let auth = authorize(store, page_id, token).await?;
        auth.capability
            .require(Privilege::ViewPrivate, "You cannot view co-organizers")?;
        Ok(store
            .invites_for_page(page_id)
            .await?
            .into_iter()
            .map(CoOrganizerSummary::from)
            .collect())
    }
}
