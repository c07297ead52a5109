//! Bearer tokens and the capability they resolve to.
//!
//! Tokens are opaque: 32 random bytes, URL-safe base64. Possession is the
//! whole grant, so every organizer operation goes through [`authorize`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{ShivaError, ShivaResult};
use crate::store::Store;
use crate::types::{CoOrganizerInvite, InviteStatus, PageId, SupportPage};

const TOKEN_BYTES: usize = 32;

pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    ManagePage,
    ViewPrivate,
    ManageSignups,
    PostUpdates,
    SendThankYou,
    InviteCoOrganizers,
    RevokeCoOrganizers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Primary,
    CoOrganizer { invite_id: i64 },
}

impl Capability {
    pub fn can(&self, privilege: Privilege) -> bool {
        match self {
            Capability::Primary => true,
            Capability::CoOrganizer { .. } => !matches!(
                privilege,
                Privilege::InviteCoOrganizers | Privilege::RevokeCoOrganizers
            ),
        }
    }

    pub fn require(&self, privilege: Privilege, message: &'static str) -> ShivaResult<()> {
        if self.can(privilege) {
            Ok(())
        } else {
            Err(ShivaError::Forbidden(message))
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Capability::Primary)
    }
}

/// A resolved organizer together with the page it acts on.
#[derive(Debug, Clone)]
pub struct Authorized {
    pub page: SupportPage,
    pub capability: Capability,
    pub invite: Option<CoOrganizerInvite>,
}

impl Authorized {
    /// Display name of whoever holds the token.
    pub fn actor_name(&self) -> &str {
        match &self.invite {
            Some(invite) => &invite.name,
            None => &self.page.organizer_name,
        }
    }
}

/// Resolves `token` against `page_id`. Every failure, whether the page is
/// missing, the token is empty or it belongs to a pending or revoked invite,
/// yields the same `Unauthorized`.
pub async fn authorize(store: &dyn Store, page_id: PageId, token: &str) -> ShivaResult<Authorized> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ShivaError::Unauthorized);
    }

    let page = store.get_page(page_id).await?.ok_or(ShivaError::Unauthorized)?;

    if page.magic_token == token {
        return Ok(Authorized {
            page,
            capability: Capability::Primary,
            invite: None,
        });
    }

    match store.invite_by_token(token).await? {
        Some(invite) if invite.page_id == page_id && invite.status == InviteStatus::Accepted => {
            Ok(Authorized {
                page,
                capability: Capability::CoOrganizer { invite_id: invite.id },
                invite: Some(invite),
            })
        }
        _ => Err(ShivaError::Unauthorized),
    }
}
