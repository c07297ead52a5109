//! Support page lifecycle: creation with duplicate and similarity checks,
//! public and organizer views, organizer edits, email verification,
//! archival and abuse reports.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shiva_core::store::{NewPage, NewReport, PageInsert, PagePatch};
use shiva_core::types::{
    NotificationPrefs, PageId, PageReport, PageStatus, SupportPage, VerificationStatus, Visibility,
};
use shiva_core::{authorize, generate_token, AuditEvent, Capability, Privilege, ShivaContext, ShivaError, ShivaResult};

use crate::validate::{self, ADDRESS_MAX, NAME_MAX, PHONE_MAX, TEXT_MAX};

/// Window searched for pages that look like the same family.
pub const SIMILARITY_WINDOW_DAYS: i64 = 60;
pub const MAX_SIMILAR_CANDIDATES: usize = 5;
/// Pages are archived this many days after their last shiva date.
pub const ARCHIVE_AFTER_DAYS: i64 = 30;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPageRequest {
    pub obituary_id: Option<String>,
    pub organizer_name: Option<String>,
    pub organizer_email: Option<String>,
    pub organizer_phone: Option<String>,
    pub organizer_relationship: Option<String>,
    pub family_name: Option<String>,
    #[serde(alias = "shiva_address")]
    pub address: Option<String>,
    #[serde(alias = "shiva_city")]
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    #[serde(alias = "shiva_start_date")]
    pub start_date: Option<String>,
    #[serde(alias = "shiva_end_date")]
    pub end_date: Option<String>,
    #[serde(default = "default_true")]
    pub pause_shabbat: bool,
    pub guest_count: Option<i32>,
    pub dietary_notes: Option<String>,
    pub special_instructions: Option<String>,
    pub family_notes: Option<String>,
    pub donation_url: Option<String>,
    pub donation_label: Option<String>,
    pub visibility: Option<String>,
    pub notification_prefs: Option<serde_json::Value>,
    #[serde(default)]
    pub privacy_consent: bool,
    #[serde(default)]
    pub force_create: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarPage {
    pub id: PageId,
    pub family_name: String,
    pub city: Option<String>,
    pub start_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created {
        page: SupportPage,
        magic_token: String,
        verification_token: String,
    },
    Duplicate {
        existing_id: PageId,
        organizer_first_name: String,
        created_at: DateTime<Utc>,
    },
    SimilarFound {
        candidates: Vec<SimilarPage>,
    },
}

/// Organizer edit. Absent fields are left alone; an empty string clears an
/// optional text field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageUpdateRequest {
    pub family_name: Option<String>,
    #[serde(alias = "shiva_address")]
    pub address: Option<String>,
    #[serde(alias = "shiva_city")]
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    #[serde(alias = "shiva_start_date")]
    pub start_date: Option<String>,
    #[serde(alias = "shiva_end_date")]
    pub end_date: Option<String>,
    pub pause_shabbat: Option<bool>,
    pub guest_count: Option<i32>,
    pub dietary_notes: Option<String>,
    pub special_instructions: Option<String>,
    pub family_notes: Option<String>,
    pub donation_url: Option<String>,
    pub donation_label: Option<String>,
    pub visibility: Option<String>,
    pub notification_prefs: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NoOp,
}

/// What anyone may see of a page. Never carries the address or any token.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "access", rename_all = "snake_case")]
pub enum PublicPage {
    Full(PublicPageView),
    Limited(LimitedPageView),
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicPageView {
    pub id: PageId,
    pub obituary_id: Option<String>,
    pub organizer_name: String,
    pub organizer_relationship: String,
    pub family_name: String,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pause_shabbat: bool,
    pub guest_count: Option<i32>,
    pub dietary_notes: Option<String>,
    pub special_instructions: Option<String>,
    pub family_notes: Option<String>,
    pub donation_url: Option<String>,
    pub donation_label: Option<String>,
    pub visibility: Visibility,
    pub verification_status: VerificationStatus,
    pub status: PageStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimitedPageView {
    pub id: PageId,
    pub organizer_name: String,
    pub organizer_relationship: String,
    pub family_name: String,
    pub city: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub visibility: Visibility,
    pub status: PageStatus,
}

impl PublicPage {
    fn full(page: &SupportPage) -> Self {
        PublicPage::Full(PublicPageView {
            id: page.id,
            obituary_id: page.obituary_id.clone(),
            organizer_name: page.organizer_name.clone(),
            organizer_relationship: page.organizer_relationship.clone(),
            family_name: page.family_name.clone(),
            city: page.city.clone(),
            neighborhood: page.neighborhood.clone(),
            start_date: page.start_date,
            end_date: page.end_date,
            pause_shabbat: page.pause_shabbat,
            guest_count: page.guest_count,
            dietary_notes: page.dietary_notes.clone(),
            special_instructions: page.special_instructions.clone(),
            family_notes: page.family_notes.clone(),
            donation_url: page.donation_url.clone(),
            donation_label: page.donation_label.clone(),
            visibility: page.visibility,
            verification_status: page.verification_status,
            status: page.status,
            created_at: page.created_at,
        })
    }

    fn limited(page: &SupportPage) -> Self {
        PublicPage::Limited(LimitedPageView {
            id: page.id,
            organizer_name: page.organizer_name.clone(),
            organizer_relationship: page.organizer_relationship.clone(),
            family_name: page.family_name.clone(),
            city: page.city.clone(),
            start_date: page.start_date,
            end_date: page.end_date,
            visibility: page.visibility,
            status: page.status,
        })
    }

    pub fn is_limited(&self) -> bool {
        matches!(self, PublicPage::Limited(_))
    }
}

/// Full record for organizers, tokens excluded.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizerPage {
    pub id: PageId,
    pub obituary_id: Option<String>,
    pub organizer_name: String,
    pub organizer_email: String,
    pub organizer_phone: Option<String>,
    pub organizer_relationship: String,
    pub family_name: String,
    pub address: String,
    pub city: Option<String>,
    pub neighborhood: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub pause_shabbat: bool,
    pub guest_count: Option<i32>,
    pub dietary_notes: Option<String>,
    pub special_instructions: Option<String>,
    pub family_notes: Option<String>,
    pub donation_url: Option<String>,
    pub donation_label: Option<String>,
    pub visibility: Visibility,
    pub verification_status: VerificationStatus,
    pub verified_at: Option<DateTime<Utc>>,
    pub notification_prefs: NotificationPrefs,
    pub status: PageStatus,
    pub thank_you_sent: bool,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub is_primary_organizer: bool,
}

impl OrganizerPage {
    fn new(page: SupportPage, capability: Capability) -> Self {
        OrganizerPage {
            id: page.id,
            obituary_id: page.obituary_id,
            organizer_name: page.organizer_name,
            organizer_email: page.organizer_email,
            organizer_phone: page.organizer_phone,
            organizer_relationship: page.organizer_relationship,
            family_name: page.family_name,
            address: page.address,
            city: page.city,
            neighborhood: page.neighborhood,
            start_date: page.start_date,
            end_date: page.end_date,
            pause_shabbat: page.pause_shabbat,
            guest_count: page.guest_count,
            dietary_notes: page.dietary_notes,
            special_instructions: page.special_instructions,
            family_notes: page.family_notes,
            donation_url: page.donation_url,
            donation_label: page.donation_label,
            visibility: page.visibility,
            verification_status: page.verification_status,
            verified_at: page.verified_at,
            notification_prefs: page.notification_prefs,
            status: page.status,
            thank_you_sent: page.thank_you_sent,
            created_at: page.created_at,
            archived_at: page.archived_at,
            is_primary_organizer: capability.is_primary(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified { page_id: PageId, family_name: String },
    AlreadyVerified { page_id: PageId, family_name: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportRequest {
    pub reason: Option<String>,
    pub details: Option<String>,
    pub reporter_email: Option<String>,
}

fn parse_visibility(value: Option<&str>) -> ShivaResult<Option<Visibility>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .to_ascii_lowercase()
            .parse::<Visibility>()
            .map(Some)
            .map_err(|_| ShivaError::validation("Visibility must be public or private")),
    }
}

/// Empty input clears the column, anything else is trimmed and capped.
fn clearable(value: &Option<String>, max: usize) -> Option<Option<String>> {
    value.as_deref().map(|v| validate::optional_text(Some(v), max))
}

pub struct SupportRegistry {
    ctx: ShivaContext,
}

impl SupportRegistry {
    pub fn new(ctx: ShivaContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, req: NewPageRequest) -> ShivaResult<CreateOutcome> {
        let organizer_name = validate::required_text(req.organizer_name.as_deref(), "organizer_name", NAME_MAX)?;
        let organizer_email = validate::required_email(req.organizer_email.as_deref(), "organizer_email")?;
        let organizer_relationship =
            validate::required_text(req.organizer_relationship.as_deref(), "organizer_relationship", NAME_MAX)?;
        let family_name = validate::required_text(req.family_name.as_deref(), "family_name", NAME_MAX)?;
        let address = validate::required_text(req.address.as_deref(), "address", ADDRESS_MAX)?;
        let start_date = validate::date(req.start_date.as_deref(), "start_date")?;
        let end_date = validate::date(req.end_date.as_deref(), "end_date")?;

        if !req.privacy_consent {
            return Err(ShivaError::validation("Privacy consent is required"));
        }

        validate::date_range(start_date, end_date)?;
        let donation_url = validate::donation_url(req.donation_url.as_deref())?;
        let visibility = parse_visibility(req.visibility.as_deref())?.unwrap_or(Visibility::Public);
        let notification_prefs = req
            .notification_prefs
            .as_ref()
            .map(NotificationPrefs::from_json)
            .unwrap_or_default();
        let obituary_id = validate::optional_text(req.obituary_id.as_deref(), NAME_MAX);

        let now = self.ctx.now();
        let store = self.ctx.store.as_ref();

        match obituary_id.as_deref() {
            Some(obituary_id) => {
                if let Some(existing) = store.active_page_for_obituary(obituary_id).await? {
                    return Ok(duplicate_of(&existing));
                }
            }
            None if !req.force_create => {
                let since = now - Duration::days(SIMILARITY_WINDOW_DAYS);
                let candidates: Vec<SimilarPage> = store
                    .pages_created_since(since)
                    .await?
                    .into_iter()
                    .filter(|p| validate::family_names_similar(&p.family_name, &family_name))
                    .take(MAX_SIMILAR_CANDIDATES)
                    .map(|p| SimilarPage {
                        id: p.id,
                        family_name: p.family_name,
                        city: p.city,
                        start_date: p.start_date,
                    })
                    .collect();
                if !candidates.is_empty() {
                    tracing::info!(
                        "Found {} similar support pages for family {}",
                        candidates.len(),
                        family_name
                    );
                    return Ok(CreateOutcome::SimilarFound { candidates });
                }
            }
            None => {}
        }

        let magic_token = generate_token();
        let verification_token = generate_token();
        let new_page = NewPage {
            id: Uuid::new_v4(),
            obituary_id,
            organizer_name,
            organizer_email,
            organizer_phone: validate::optional_text(req.organizer_phone.as_deref(), PHONE_MAX),
            organizer_relationship,
            family_name,
            address,
            city: validate::optional_text(req.city.as_deref(), NAME_MAX),
            neighborhood: validate::optional_text(req.neighborhood.as_deref(), NAME_MAX),
            start_date,
            end_date,
            pause_shabbat: req.pause_shabbat,
            guest_count: req.guest_count.map(validate::guest_count),
            dietary_notes: validate::optional_text(req.dietary_notes.as_deref(), TEXT_MAX),
            special_instructions: validate::optional_text(req.special_instructions.as_deref(), TEXT_MAX),
            family_notes: validate::optional_text(req.family_notes.as_deref(), TEXT_MAX),
            donation_url,
            donation_label: validate::optional_text(req.donation_label.as_deref(), NAME_MAX),
            visibility,
            magic_token: magic_token.clone(),
            verification_token: verification_token.clone(),
            notification_prefs,
            created_at: now,
        };

        match store.insert_page(new_page).await? {
            PageInsert::Inserted(page) => {
                tracing::info!("Created support page {} for the {} family", page.id, page.family_name);
                self.ctx.audit.record(AuditEvent::OrganizeComplete, Some(page.id), now);
                Ok(CreateOutcome::Created {
                    page,
                    magic_token,
                    verification_token,
                })
            }
            PageInsert::Duplicate(existing) => Ok(duplicate_of(&existing)),
        }
    }

    pub async fn update(&self, page_id: PageId, token: &str, req: PageUpdateRequest) -> ShivaResult<UpdateOutcome> {
        let auth = authorize(self.ctx.store.as_ref(), page_id, token).await?;
        auth.capability
            .require(Privilege::ManagePage, "You cannot edit this page")?;

        let mut patch = PagePatch::default();

        if let Some(name) = req.family_name.as_deref() {
            patch.family_name = Some(validate::required_text(Some(name), "family_name", NAME_MAX)?);
        }
        if let Some(address) = req.address.as_deref() {
            patch.address = Some(validate::required_text(Some(address), "address", ADDRESS_MAX)?);
        }
        patch.city = clearable(&req.city, NAME_MAX);
        patch.neighborhood = clearable(&req.neighborhood, NAME_MAX);
        if let Some(start) = req.start_date.as_deref() {
            patch.start_date = Some(validate::date(Some(start), "start_date")?);
        }
        if let Some(end) = req.end_date.as_deref() {
            patch.end_date = Some(validate::date(Some(end), "end_date")?);
        }
        if patch.start_date.is_some() || patch.end_date.is_some() {
            let start = patch.start_date.unwrap_or(auth.page.start_date);
            let end = patch.end_date.unwrap_or(auth.page.end_date);
            validate::date_range(start, end)?;
        }
        patch.pause_shabbat = req.pause_shabbat;
        patch.guest_count = req.guest_count.map(|g| Some(validate::guest_count(g)));
        patch.dietary_notes = clearable(&req.dietary_notes, TEXT_MAX);
        patch.special_instructions = clearable(&req.special_instructions, TEXT_MAX);
        patch.family_notes = clearable(&req.family_notes, TEXT_MAX);
        if let Some(url) = req.donation_url.as_deref() {
            patch.donation_url = Some(validate::donation_url(Some(url))?);
        }
        patch.donation_label = clearable(&req.donation_label, NAME_MAX);
        patch.visibility = parse_visibility(req.visibility.as_deref())?;
        patch.notification_prefs = req.notification_prefs.as_ref().map(NotificationPrefs::from_json);

        if patch.is_empty() {
            return Ok(UpdateOutcome::NoOp);
        }

        if !self.ctx.store.update_page(page_id, &patch).await? {
            return Err(ShivaError::NotFound("Support page"));
        }
        tracing::info!("Support page {} updated by {}", page_id, auth.actor_name());
        Ok(UpdateOutcome::Updated)
    }

    pub async fn get_public(&self, page_id: PageId, access_token: Option<&str>) -> ShivaResult<PublicPage> {
        let page = self
            .ctx
            .store
            .get_page(page_id)
            .await?
            .ok_or(ShivaError::NotFound("Support page"))?;

        self.ctx.audit.record(AuditEvent::PageView, Some(page.id), self.ctx.now());

        if page.visibility == Visibility::Public {
            return Ok(PublicPage::full(&page));
        }

        let granted = match access_token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => self.ctx.store.has_approved_access(page.id, token).await?,
            None => false,
        };
        Ok(if granted {
            PublicPage::full(&page)
        } else {
            PublicPage::limited(&page)
        })
    }

    pub async fn get_by_obituary(&self, obituary_id: &str, access_token: Option<&str>) -> ShivaResult<PublicPage> {
        let page = self
            .ctx
            .store
            .active_page_for_obituary(obituary_id.trim())
            .await?
            .ok_or(ShivaError::NotFound("Support page"))?;
        self.get_public(page.id, access_token).await
    }

    pub async fn get_for_organizer(&self, page_id: PageId, token: &str) -> ShivaResult<OrganizerPage> {
        let auth = authorize(self.ctx.store.as_ref(), page_id, token).await?;
        auth.capability
            .require(Privilege::ViewPrivate, "You cannot view this page")?;
        Ok(OrganizerPage::new(auth.page, auth.capability))
    }

    pub async fn verify_email(&self, token: &str) -> ShivaResult<VerifyOutcome> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ShivaError::NotFound("Verification link"));
        }
        let page = self
            .ctx
            .store
            .page_by_verification_token(token)
            .await?
            .ok_or(ShivaError::NotFound("Verification link"))?;

        let now = self.ctx.now();
        if page.verification_status != VerificationStatus::Pending {
            self.ctx
                .store
                .set_verification(page.id, page.verification_status, now)
                .await?;
            return Ok(VerifyOutcome::AlreadyVerified {
                page_id: page.id,
                family_name: page.family_name,
            });
        }

        self.ctx
            .store
            .set_verification(page.id, VerificationStatus::Verified, now)
            .await?;
        tracing::info!("Organizer email verified for support page {}", page.id);
        Ok(VerifyOutcome::Verified {
            page_id: page.id,
            family_name: page.family_name,
        })
    }

    pub async fn admin_verify(&self, page_id: PageId) -> ShivaResult<()> {
        if self.ctx.store.get_page(page_id).await?.is_none() {
            return Err(ShivaError::NotFound("Support page"));
        }
        self.ctx
            .store
            .set_verification(page_id, VerificationStatus::AdminApproved, self.ctx.now())
            .await?;
        tracing::info!("Support page {} approved by an administrator", page_id);
        Ok(())
    }

    /// Archives every active page whose shiva ended more than
    /// [`ARCHIVE_AFTER_DAYS`] days before today.
    pub async fn archive_expired(&self) -> ShivaResult<u64> {
        let now = self.ctx.now();
        let cutoff = self.ctx.local.today(now) - Duration::days(ARCHIVE_AFTER_DAYS);
        let archived = self.ctx.store.archive_pages_ended_before(cutoff, now).await?;
        if archived > 0 {
            tracing::info!("Archived {} expired support page(s)", archived);
        }
        Ok(archived)
    }

    pub async fn report(&self, page_id: PageId, req: ReportRequest) -> ShivaResult<PageReport> {
        if self.ctx.store.get_page(page_id).await?.is_none() {
            return Err(ShivaError::NotFound("Support page"));
        }
        let reason = validate::required_text(req.reason.as_deref(), "reason", NAME_MAX)?;
        let reporter_email = match validate::optional_text(req.reporter_email.as_deref(), validate::EMAIL_MAX) {
            Some(email) => Some(validate::required_email(Some(&email), "reporter_email")?),
            None => None,
        };
        let now = self.ctx.now();

        let report = self
            .ctx
            .store
            .insert_report(NewReport {
                page_id,
                reason,
                details: validate::optional_text(req.details.as_deref(), TEXT_MAX),
                reporter_email,
                created_at: now,
            })
            .await?;

        tracing::warn!("Support page {} reported: {}", page_id, report.reason);
        self.ctx.audit.record(AuditEvent::Report, Some(page_id), now);
        Ok(report)
    }
}

fn duplicate_of(existing: &SupportPage) -> CreateOutcome {
    CreateOutcome::Duplicate {
        existing_id: existing.id,
        organizer_first_name: existing.organizer_first_name().to_string(),
        created_at: existing.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiva_test_utils::{date, new_page, seed_page, toronto, TestHarness};

    fn request() -> NewPageRequest {
        NewPageRequest {
            organizer_name: Some("Sarah Cohen".into()),
            organizer_email: Some("Sarah@Example.com".into()),
            organizer_relationship: Some("Daughter".into()),
            family_name: Some("Cohen".into()),
            address: Some("12 Bathurst St".into()),
            city: Some("Toronto".into()),
            start_date: Some("2026-03-01".into()),
            end_date: Some("2026-03-05".into()),
            pause_shabbat: true,
            privacy_consent: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_returns_tokens_and_records_audit() {
        let mut h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let registry = SupportRegistry::new(h.ctx.clone());

        let (page, magic_token, verification_token) = match registry.create(request()).await.unwrap() {
            CreateOutcome::Created { page, magic_token, verification_token } => (page, magic_token, verification_token),
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(page.organizer_email, "sarah@example.com");
        assert_eq!(page.magic_token, magic_token);
        assert_eq!(page.verification_token.as_deref(), Some(verification_token.as_str()));
        assert_eq!(page.verification_status, VerificationStatus::Pending);
        assert_eq!(h.audit_events(), vec![AuditEvent::OrganizeComplete]);
    }

    #[tokio::test]
    async fn create_requires_consent_and_valid_range() {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let registry = SupportRegistry::new(h.ctx.clone());

        let mut no_consent = request();
        no_consent.privacy_consent = false;
        assert!(matches!(registry.create(no_consent).await, Err(ShivaError::Validation(_))));

        let mut backwards = request();
        backwards.end_date = Some("2026-02-20".into());
        assert!(matches!(registry.create(backwards).await, Err(ShivaError::Validation(_))));

        let mut too_long = request();
        too_long.end_date = Some("2026-04-15".into());
        assert!(matches!(registry.create(too_long).await, Err(ShivaError::Validation(_))));

        let mut bad_link = request();
        bad_link.donation_url = Some("javascript:void(0)".into());
        assert!(matches!(registry.create(bad_link).await, Err(ShivaError::Validation(_))));
    }

    #[tokio::test]
    async fn linked_page_is_unique_per_obituary() {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let registry = SupportRegistry::new(h.ctx.clone());

        let mut first = request();
        first.obituary_id = Some("obit-42".into());
        assert!(matches!(registry.create(first).await.unwrap(), CreateOutcome::Created { .. }));

        let mut second = request();
        second.obituary_id = Some("obit-42".into());
        second.organizer_name = Some("David Cohen".into());
        match registry.create(second).await.unwrap() {
            CreateOutcome::Duplicate { organizer_first_name, .. } => assert_eq!(organizer_first_name, "Sarah"),
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unlinked_similar_family_needs_force_create() {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let registry = SupportRegistry::new(h.ctx.clone());
        assert!(matches!(registry.create(request()).await.unwrap(), CreateOutcome::Created { .. }));

        let mut again = request();
        again.family_name = Some("The Cohen Family".into());
        match registry.create(again.clone()).await.unwrap() {
            CreateOutcome::SimilarFound { candidates } => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(candidates[0].family_name, "Cohen");
            }
            other => panic!("expected SimilarFound, got {other:?}"),
        }

        again.force_create = true;
        assert!(matches!(registry.create(again).await.unwrap(), CreateOutcome::Created { .. }));
    }

    #[tokio::test]
    async fn public_view_never_exposes_address_or_tokens() {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let registry = SupportRegistry::new(h.ctx.clone());

        let view = registry.get_public(page.id, None).await.unwrap();
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["access"], "full");
        assert!(json.get("address").is_none());
        assert!(json.get("magic_token").is_none());
        assert!(!json.to_string().contains(&page.magic_token));
    }

    #[tokio::test]
    async fn private_page_is_limited_without_access_token() {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let mut new = new_page(date("2026-03-01"), date("2026-03-05"));
        new.visibility = Visibility::Private;
        let page = seed_page(h.store.as_ref(), new).await;
        let registry = SupportRegistry::new(h.ctx.clone());

        let view = registry.get_public(page.id, Some("guess")).await.unwrap();
        assert!(view.is_limited());
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["access"], "limited");
        assert!(json.get("dietary_notes").is_none());
    }

    #[tokio::test]
    async fn update_sanitizes_and_rechecks_dates() {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let registry = SupportRegistry::new(h.ctx.clone());

        let bad = PageUpdateRequest {
            end_date: Some("2026-02-01".into()),
            ..Default::default()
        };
        assert!(matches!(
            registry.update(page.id, &page.magic_token, bad).await,
            Err(ShivaError::Validation(_))
        ));

        let good = PageUpdateRequest {
            dietary_notes: Some("".into()),
            guest_count: Some(9000),
            notification_prefs: Some(serde_json::json!({ "daily_summary": false, "extra": 1 })),
            ..Default::default()
        };
        assert_eq!(
            registry.update(page.id, &page.magic_token, good).await.unwrap(),
            UpdateOutcome::Updated
        );

        let stored = h.store.page(page.id).unwrap();
        assert_eq!(stored.dietary_notes, None);
        assert_eq!(stored.guest_count, Some(500));
        assert!(!stored.notification_prefs.daily_summary);
        assert!(stored.notification_prefs.instant);

        assert_eq!(
            registry
                .update(page.id, &page.magic_token, PageUpdateRequest::default())
                .await
                .unwrap(),
            UpdateOutcome::NoOp
        );
        assert!(matches!(
            registry.update(page.id, "wrong", PageUpdateRequest::default()).await,
            Err(ShivaError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn verification_token_is_single_use() {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let token = page.verification_token.clone().unwrap();
        let registry = SupportRegistry::new(h.ctx.clone());

        assert!(matches!(
            registry.verify_email(&token).await.unwrap(),
            VerifyOutcome::Verified { .. }
        ));
        assert!(matches!(registry.verify_email(&token).await, Err(ShivaError::NotFound(_))));
        assert_eq!(
            h.store.page(page.id).unwrap().verification_status,
            VerificationStatus::Verified
        );
    }

    #[tokio::test]
    async fn archive_expired_is_idempotent() {
        let h = TestHarness::new(toronto(2026, 4, 10, 12, 0));
        let old = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let recent = seed_page(h.store.as_ref(), new_page(date("2026-03-20"), date("2026-03-25"))).await;
        let registry = SupportRegistry::new(h.ctx.clone());

        assert_eq!(registry.archive_expired().await.unwrap(), 1);
        assert_eq!(registry.archive_expired().await.unwrap(), 0);
        assert_eq!(h.store.page(old.id).unwrap().status, PageStatus::Archived);
        assert!(h.store.page(old.id).unwrap().archived_at.is_some());
        assert_eq!(h.store.page(recent.id).unwrap().status, PageStatus::Active);
    }

    #[tokio::test]
    async fn report_requires_reason() {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let registry = SupportRegistry::new(h.ctx.clone());

        assert!(matches!(
            registry.report(page.id, ReportRequest::default()).await,
            Err(ShivaError::Validation(_))
        ));
        let report = registry
            .report(
                page.id,
                ReportRequest {
                    reason: Some("spam".into()),
                    details: Some("not a real family".into()),
                    reporter_email: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(report.reason, "spam");
        assert_eq!(h.store.reports().len(), 1);
    }
}
