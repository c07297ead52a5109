//! Meal slot scheduling.
//!
//! Each date in a page's range has a Lunch and a Dinner slot. At most one
//! confirmed signup holds a slot; alternative contributions (gift cards,
//! baskets, vendor meals) never occupy one. The occupancy check and the
//! insert happen inside a single store call.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shiva_core::calendar::{self, is_shabbat_day, weekday_name};
use shiva_core::store::{NewSignup, SignupInsert};
use shiva_core::types::{first_name, AlternativeType, MealSignup, MealSlot, PageId, SignupStatus, SupportPage};
use shiva_core::{authorize, AuditEvent, Privilege, ShivaContext, ShivaError, ShivaResult};

use crate::validate::{self, DESCRIPTION_MAX, NAME_MAX, PHONE_MAX, TEXT_MAX};

pub const MAX_DATES_PER_SUBMISSION: usize = 14;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupRequest {
    pub volunteer_name: Option<String>,
    pub volunteer_email: Option<String>,
    pub volunteer_phone: Option<String>,
    pub meal_date: Option<String>,
    #[serde(alias = "meal_type")]
    pub slot: Option<String>,
    #[serde(alias = "num_servings")]
    pub servings: Option<i32>,
    #[serde(alias = "meal_description")]
    pub description: Option<String>,
    #[serde(default)]
    pub will_serve: bool,
    pub alternative_type: Option<String>,
    pub alternative_note: Option<String>,
    #[serde(default)]
    pub privacy_consent: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MultiSignupRequest {
    #[serde(flatten)]
    pub volunteer: SignupRequest,
    #[serde(default, alias = "dates")]
    pub meal_dates: Vec<String>,
}

/// Reasons a single date cannot be booked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignupRejection {
    #[error("Invalid date format. Use YYYY-MM-DD.")]
    InvalidDate,
    #[error("Support page not found or is no longer active")]
    PageUnavailable,
    #[error("Selected date is outside the shiva period")]
    OutOfRange,
    #[error("This date falls on Shabbat and is not available for meal coordination")]
    ShabbatBlocked,
    #[error("Someone has already signed up for this meal slot")]
    SlotTaken,
}

impl SignupRejection {
    pub fn code(&self) -> &'static str {
        match self {
            SignupRejection::InvalidDate => "invalid_date",
            SignupRejection::PageUnavailable => "page_unavailable",
            SignupRejection::OutOfRange => "out_of_range",
            SignupRejection::ShabbatBlocked => "shabbat_blocked",
            SignupRejection::SlotTaken => "slot_taken",
        }
    }
}

impl From<SignupRejection> for ShivaError {
    fn from(rejection: SignupRejection) -> Self {
        match rejection {
            SignupRejection::PageUnavailable => ShivaError::NotFound("Support page"),
            SignupRejection::SlotTaken => ShivaError::conflict(rejection.to_string()),
            other => ShivaError::validation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignupConfirmed {
    pub signup: MealSignup,
    pub page: SupportPage,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateError {
    pub date: String,
    pub code: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct MultiSignupOutcome {
    pub page: SupportPage,
    pub group_id: Uuid,
    pub signups: Vec<MealSignup>,
    pub errors: Vec<DateError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySlots {
    pub date: NaiveDate,
    pub weekday: &'static str,
    pub is_shabbat: bool,
    pub paused: bool,
    pub lunch_taken: bool,
    pub dinner_taken: bool,
}

/// Signup as shown to the public: first name only, no contact details.
#[derive(Debug, Clone, Serialize)]
pub struct PublicSignup {
    pub id: i64,
    pub meal_date: NaiveDate,
    pub slot: MealSlot,
    pub volunteer_name: String,
    pub description: Option<String>,
    pub servings: i32,
    pub status: SignupStatus,
    pub alternative_type: Option<AlternativeType>,
    pub created_at: DateTime<Utc>,
}

impl From<&MealSignup> for PublicSignup {
    fn from(s: &MealSignup) -> Self {
        PublicSignup {
            id: s.id,
            meal_date: s.meal_date,
            slot: s.slot,
            volunteer_name: first_name(&s.volunteer_name).to_string(),
            description: s.description.clone(),
            servings: s.servings,
            status: s.status,
            alternative_type: s.alternative_type,
            created_at: s.created_at,
        }
    }
}

/// Volunteer fields that apply to every date of a submission.
struct Volunteer {
    name: String,
    email: String,
    phone: Option<String>,
    slot: MealSlot,
    servings: i32,
    description: Option<String>,
    will_serve: bool,
    alternative_type: Option<AlternativeType>,
    alternative_note: Option<String>,
}

fn parse_slot(value: Option<&str>) -> ShivaResult<MealSlot> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ShivaError::validation("Missing required field: meal_type"))?;
    match raw.to_ascii_lowercase().as_str() {
        "lunch" => Ok(MealSlot::Lunch),
        "dinner" => Ok(MealSlot::Dinner),
        _ => Err(ShivaError::validation("Meal type must be Lunch or Dinner")),
    }
}

fn parse_alternative(value: Option<&str>) -> ShivaResult<Option<AlternativeType>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse::<AlternativeType>()
            .map(Some)
            .map_err(|_| ShivaError::validation("Unknown alternative contribution type")),
    }
}

impl Volunteer {
    fn from_request(req: &SignupRequest) -> ShivaResult<Self> {
        let name = validate::required_text(req.volunteer_name.as_deref(), "volunteer_name", NAME_MAX)?;
        let email = validate::required_email(req.volunteer_email.as_deref(), "volunteer_email")?;
        let slot = parse_slot(req.slot.as_deref())?;
        Ok(Volunteer {
            name,
            email,
            phone: validate::optional_text(req.volunteer_phone.as_deref(), PHONE_MAX),
            slot,
            servings: validate::servings(req.servings),
            description: validate::optional_text(req.description.as_deref(), DESCRIPTION_MAX),
            will_serve: req.will_serve,
            alternative_type: parse_alternative(req.alternative_type.as_deref())?,
            alternative_note: validate::optional_text(req.alternative_note.as_deref(), TEXT_MAX),
        })
    }
}

pub struct MealScheduler {
    ctx: ShivaContext,
}

impl MealScheduler {
    pub fn new(ctx: ShivaContext) -> Self {
        Self { ctx }
    }

    async fn active_page(&self, page_id: PageId) -> ShivaResult<SupportPage> {
        match self.ctx.store.get_page(page_id).await? {
            Some(page) if page.is_active() => Ok(page),
            _ => Err(SignupRejection::PageUnavailable.into()),
        }
    }

    async fn book(
        &self,
        page: &SupportPage,
        volunteer: &Volunteer,
        meal_date: NaiveDate,
        group_id: Option<Uuid>,
    ) -> ShivaResult<Result<MealSignup, SignupRejection>> {
        if !page.contains(meal_date) {
            return Ok(Err(SignupRejection::OutOfRange));
        }
        if page.pause_shabbat && is_shabbat_day(meal_date) {
            return Ok(Err(SignupRejection::ShabbatBlocked));
        }

        let status = match volunteer.alternative_type {
            Some(_) => SignupStatus::Alternative,
            None => SignupStatus::Confirmed,
        };
        let inserted = self
            .ctx
            .store
            .insert_signup(NewSignup {
                page_id: page.id,
                volunteer_name: volunteer.name.clone(),
                volunteer_email: volunteer.email.clone(),
                volunteer_phone: volunteer.phone.clone(),
                meal_date,
                slot: volunteer.slot,
                servings: volunteer.servings,
                description: volunteer.description.clone(),
                will_serve: volunteer.will_serve,
                status,
                alternative_type: volunteer.alternative_type,
                alternative_note: volunteer.alternative_note.clone(),
                signup_group_id: group_id,
                created_at: self.ctx.now(),
            })
            .await?;

        Ok(match inserted {
            SignupInsert::Inserted(signup) => Ok(signup),
            SignupInsert::SlotTaken => Err(SignupRejection::SlotTaken),
            SignupInsert::PageUnavailable => Err(SignupRejection::PageUnavailable),
        })
    }

    pub async fn signup_single(&self, page_id: PageId, req: SignupRequest) -> ShivaResult<SignupConfirmed> {
        let volunteer = Volunteer::from_request(&req)?;
        let meal_date = validate::date(req.meal_date.as_deref(), "meal_date")?;
        if !req.privacy_consent {
            return Err(ShivaError::validation("Privacy consent is required"));
        }

        let page = self.active_page(page_id).await?;
        let signup = self.book(&page, &volunteer, meal_date, None).await??;

        tracing::info!(
            "Meal signup {} for support page {} on {} ({})",
            signup.id,
            page.id,
            signup.meal_date,
            signup.slot
        );
        self.ctx.audit.record(AuditEvent::MealSignup, Some(page.id), self.ctx.now());
        Ok(SignupConfirmed { signup, page })
    }

    /// Books each date independently under one group id. Succeeds when at
    /// least one date is booked; otherwise returns the first date's error.
    pub async fn signup_multi(&self, page_id: PageId, req: MultiSignupRequest) -> ShivaResult<MultiSignupOutcome> {
        let mut dates: Vec<String> = Vec::new();
        for raw in req.meal_dates.iter().map(|d| d.trim().to_string()) {
            if !raw.is_empty() && !dates.contains(&raw) {
                dates.push(raw);
            }
        }
        if dates.is_empty() || dates.len() > MAX_DATES_PER_SUBMISSION {
            return Err(ShivaError::validation(format!(
                "Please select between 1 and {} dates",
                MAX_DATES_PER_SUBMISSION
            )));
        }

        let volunteer = Volunteer::from_request(&req.volunteer)?;
        if !req.volunteer.privacy_consent {
            return Err(ShivaError::validation("Privacy consent is required"));
        }

        let page = self.active_page(page_id).await?;
        let group_id = Uuid::new_v4();
        let mut signups = Vec::new();
        let mut errors = Vec::new();
        let mut first_rejection = None;

        for raw in dates {
            let outcome = match calendar::parse_date(&raw) {
                Some(meal_date) => self.book(&page, &volunteer, meal_date, Some(group_id)).await?,
                None => Err(SignupRejection::InvalidDate),
            };
            match outcome {
                Ok(signup) => signups.push(signup),
                Err(rejection) => {
                    first_rejection.get_or_insert(rejection);
                    errors.push(DateError {
                        date: raw,
                        code: rejection.code(),
                        reason: rejection.to_string(),
                    });
                }
            }
        }

        if signups.is_empty() {
            return Err(first_rejection
                .map(ShivaError::from)
                .unwrap_or_else(|| ShivaError::validation("No dates could be booked")));
        }

        tracing::info!(
            "Multi-date signup {} for support page {}: {} booked, {} rejected",
            group_id,
            page.id,
            signups.len(),
            errors.len()
        );
        self.ctx
            .audit
            .record(AuditEvent::MealSignupMulti, Some(page.id), self.ctx.now());

        Ok(MultiSignupOutcome {
            page,
            group_id,
            signups,
            errors,
        })
    }

    /// Occupancy per date of the range. Only confirmed signups take a slot.
    pub async fn list_slots(&self, page_id: PageId) -> ShivaResult<Vec<DaySlots>> {
        let page = self
            .ctx
            .store
            .get_page(page_id)
            .await?
            .ok_or(ShivaError::NotFound("Support page"))?;
        let signups = self.ctx.store.signups_for_page(page_id).await?;

        let taken = |date: NaiveDate, slot: MealSlot| {
            signups
                .iter()
                .any(|s| s.is_confirmed() && s.meal_date == date && s.slot == slot)
        };

        Ok(calendar::dates_between(page.start_date, page.end_date)
            .map(|date| {
                let is_shabbat = is_shabbat_day(date);
                DaySlots {
                    date,
                    weekday: weekday_name(date),
                    is_shabbat,
                    paused: is_shabbat && page.pause_shabbat,
                    lunch_taken: taken(date, MealSlot::Lunch),
                    dinner_taken: taken(date, MealSlot::Dinner),
                }
            })
            .collect())
    }

    pub async fn list_signups_public(&self, page_id: PageId) -> ShivaResult<Vec<PublicSignup>> {
        if self.ctx.store.get_page(page_id).await?.is_none() {
            return Err(ShivaError::NotFound("Support page"));
        }
        let signups = self.ctx.store.signups_for_page(page_id).await?;
        Ok(signups
            .iter()
            .filter(|s| s.status != SignupStatus::Cancelled)
            .map(PublicSignup::from)
            .collect())
    }

    pub async fn list_signups_for_organizer(&self, page_id: PageId, token: &str) -> ShivaResult<Vec<MealSignup>> {
        let auth = authorize(self.ctx.store.as_ref(), page_id, token).await?;
        auth.capability
            .require(Privilege::ViewPrivate, "You cannot view volunteer details")?;
        Ok(self.ctx.store.signups_for_page(page_id).await?)
    }

    pub async fn remove_signup(&self, page_id: PageId, token: &str, signup_id: i64) -> ShivaResult<()> {
        let auth = authorize(self.ctx.store.as_ref(), page_id, token).await?;
        auth.capability
            .require(Privilege::ManageSignups, "You cannot manage signups on this page")?;

        if !self.ctx.store.delete_signup(page_id, signup_id).await? {
            return Err(ShivaError::NotFound("Meal signup"));
        }
        tracing::info!(
            "Meal signup {} removed from support page {} by {}",
            signup_id,
            page_id,
            auth.actor_name()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiva_test_utils::{date, new_page, seed_page, toronto, TestHarness};

    fn request(meal_date: &str, slot: &str, name: &str, email: &str) -> SignupRequest {
        SignupRequest {
            volunteer_name: Some(name.into()),
            volunteer_email: Some(email.into()),
            meal_date: Some(meal_date.into()),
            slot: Some(slot.into()),
            privacy_consent: true,
            ..Default::default()
        }
    }

    async fn setup(pause_shabbat: bool) -> (TestHarness, SupportPage, MealScheduler) {
        let h = TestHarness::new(toronto(2026, 2, 28, 10, 0));
        let mut new = new_page(date("2026-03-01"), date("2026-03-07"));
        new.pause_shabbat = pause_shabbat;
        let page = seed_page(h.store.as_ref(), new).await;
        let scheduler = MealScheduler::new(h.ctx.clone());
        (h, page, scheduler)
    }

    #[tokio::test]
    async fn confirmed_signup_returns_address_once_booked() {
        let (_h, page, scheduler) = setup(true).await;
        let confirmed = scheduler
            .signup_single(page.id, request("2026-03-02", "Dinner", "Ari Gold", "ari@example.com"))
            .await
            .unwrap();
        assert_eq!(confirmed.page.address, "12 Bathurst St");
        assert_eq!(confirmed.signup.status, SignupStatus::Confirmed);
        assert_eq!(confirmed.signup.servings, 4);
    }

    #[tokio::test]
    async fn out_of_range_and_shabbat_dates_are_rejected() {
        let (_h, page, scheduler) = setup(true).await;

        match scheduler
            .signup_single(page.id, request("2026-03-09", "Lunch", "Ari", "ari@example.com"))
            .await
        {
            Err(ShivaError::Validation(m)) => assert_eq!(m, SignupRejection::OutOfRange.to_string()),
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        // 2026-03-06 is a Friday.
        match scheduler
            .signup_single(page.id, request("2026-03-06", "Lunch", "Ari", "ari@example.com"))
            .await
        {
            Err(ShivaError::Validation(m)) => assert_eq!(m, SignupRejection::ShabbatBlocked.to_string()),
            other => panic!("expected ShabbatBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shabbat_dates_open_when_not_paused() {
        let (_h, page, scheduler) = setup(false).await;
        assert!(scheduler
            .signup_single(page.id, request("2026-03-06", "Lunch", "Ari", "ari@example.com"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn missing_consent_or_bad_slot_is_validation() {
        let (_h, page, scheduler) = setup(true).await;
        let mut no_consent = request("2026-03-02", "Dinner", "Ari", "ari@example.com");
        no_consent.privacy_consent = false;
        assert!(matches!(
            scheduler.signup_single(page.id, no_consent).await,
            Err(ShivaError::Validation(_))
        ));
        assert!(matches!(
            scheduler
                .signup_single(page.id, request("2026-03-02", "Breakfast", "Ari", "ari@example.com"))
                .await,
            Err(ShivaError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn alternatives_do_not_occupy_slots() {
        let (_h, page, scheduler) = setup(true).await;
        scheduler
            .signup_single(page.id, request("2026-03-02", "Dinner", "Ari", "ari@example.com"))
            .await
            .unwrap();

        for (i, kind) in ["gift_card", "vendor_meal"].iter().enumerate() {
            let mut alt = request("2026-03-02", "Dinner", "Ben", &format!("ben{i}@example.com"));
            alt.alternative_type = Some(kind.to_string());
            let confirmed = scheduler.signup_single(page.id, alt).await.unwrap();
            assert_eq!(confirmed.signup.status, SignupStatus::Alternative);
        }

        let slots = scheduler.list_slots(page.id).await.unwrap();
        let day = slots.iter().find(|d| d.date == date("2026-03-02")).unwrap();
        assert!(day.dinner_taken);
        assert!(!day.lunch_taken);
    }

    #[tokio::test]
    async fn archived_page_refuses_signups() {
        let (h, page, scheduler) = setup(true).await;
        h.ctx.store.archive_page(page.id, h.ctx.now()).await.unwrap();
        assert!(matches!(
            scheduler
                .signup_single(page.id, request("2026-03-02", "Dinner", "Ari", "ari@example.com"))
                .await,
            Err(ShivaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn multi_signup_caps_dates() {
        let (_h, page, scheduler) = setup(false).await;
        let req = MultiSignupRequest {
            volunteer: request("", "Dinner", "Ari", "ari@example.com"),
            meal_dates: (1..=15).map(|d| format!("2026-03-{d:02}")).collect(),
        };
        match scheduler.signup_multi(page.id, req).await {
            Err(ShivaError::Validation(m)) => assert!(m.contains("14")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn multi_signup_all_failed_returns_first_error() {
        let (_h, page, scheduler) = setup(true).await;
        let req = MultiSignupRequest {
            volunteer: request("", "Dinner", "Ari", "ari@example.com"),
            meal_dates: vec!["2026-03-06".into(), "2026-03-20".into()],
        };
        match scheduler.signup_multi(page.id, req).await {
            Err(ShivaError::Validation(m)) => assert_eq!(m, SignupRejection::ShabbatBlocked.to_string()),
            other => panic!("expected ShabbatBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn public_listing_shows_first_names_only() {
        let (_h, page, scheduler) = setup(true).await;
        scheduler
            .signup_single(page.id, request("2026-03-02", "Dinner", "Ari Gold", "ari@example.com"))
            .await
            .unwrap();

        let listed = scheduler.list_signups_public(page.id).await.unwrap();
        assert_eq!(listed[0].volunteer_name, "Ari");
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("ari@example.com"));
    }

    #[tokio::test]
    async fn remove_signup_requires_organizer_and_matching_page() {
        let (h, page, scheduler) = setup(true).await;
        let confirmed = scheduler
            .signup_single(page.id, request("2026-03-02", "Dinner", "Ari", "ari@example.com"))
            .await
            .unwrap();
        let other = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-07"))).await;

        assert!(matches!(
            scheduler.remove_signup(page.id, "nope", confirmed.signup.id).await,
            Err(ShivaError::Unauthorized)
        ));
        assert!(matches!(
            scheduler
                .remove_signup(other.id, &other.magic_token, confirmed.signup.id)
                .await,
            Err(ShivaError::NotFound(_))
        ));
        scheduler
            .remove_signup(page.id, &page.magic_token, confirmed.signup.id)
            .await
            .unwrap();
        assert!(h.store.signups().is_empty());
    }
}
