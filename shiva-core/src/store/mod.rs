//! Persistence boundary.
//!
//! Every method is one logical unit of work against the shared store. The
//! methods that guard an invariant (`insert_page`, `insert_signup`,
//! `claim_thank_you`, `decide_access_request`) perform their check and their
//! write atomically, so callers never do read-then-write across two calls for
//! those invariants.

pub mod pg;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::types::{
    AccessRequest, AccessRequestStatus, AlternativeType, CoOrganizerInvite, EmailKind, EmailLogEntry,
    EmailStatus, InviteStatus, MealSignup, MealSlot, NotificationPrefs, OrganizerUpdate, PageId,
    PageReport, SignupStatus, SupportPage, VerificationStatus, Visibility,
};

pub use pg::PgStore;

#[derive(Debug, Clone)]
pub struct NewPage {
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
    pub magic_token: String,
    pub verification_token: String,
    pub notification_prefs: NotificationPrefs,
    pub created_at: DateTime<Utc>,
}

impl NewPage {
    /// The row as it reads back right after insertion.
    pub fn into_page(self) -> SupportPage {
        SupportPage {
            id: self.id,
            obituary_id: self.obituary_id,
            organizer_name: self.organizer_name,
            organizer_email: self.organizer_email,
            organizer_phone: self.organizer_phone,
            organizer_relationship: self.organizer_relationship,
            family_name: self.family_name,
            address: self.address,
            city: self.city,
            neighborhood: self.neighborhood,
            start_date: self.start_date,
            end_date: self.end_date,
            pause_shabbat: self.pause_shabbat,
            guest_count: self.guest_count,
            dietary_notes: self.dietary_notes,
            special_instructions: self.special_instructions,
            family_notes: self.family_notes,
            donation_url: self.donation_url,
            donation_label: self.donation_label,
            visibility: self.visibility,
            magic_token: self.magic_token,
            verification_token: Some(self.verification_token),
            verification_status: VerificationStatus::Pending,
            verified_at: None,
            notification_prefs: self.notification_prefs,
            status: crate::types::PageStatus::Active,
            thank_you_sent: false,
            created_at: self.created_at,
            archived_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PageInsert {
    Inserted(SupportPage),
    /// An active page already exists for the same obituary.
    Duplicate(SupportPage),
}

/// Sparse update of the organizer-editable fields. `Some(None)` clears a
/// nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePatch {
    pub family_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<Option<String>>,
    pub neighborhood: Option<Option<String>>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub pause_shabbat: Option<bool>,
    pub guest_count: Option<Option<i32>>,
    pub dietary_notes: Option<Option<String>>,
    pub special_instructions: Option<Option<String>>,
    pub family_notes: Option<Option<String>>,
    pub donation_url: Option<Option<String>>,
    pub donation_label: Option<Option<String>>,
    pub visibility: Option<Visibility>,
    pub notification_prefs: Option<NotificationPrefs>,
}

impl PagePatch {
    pub fn is_empty(&self) -> bool {
        *self == PagePatch::default()
    }

    pub fn apply(&self, page: &mut SupportPage) {
        if let Some(v) = &self.family_name {
            page.family_name = v.clone();
        }
        if let Some(v) = &self.address {
            page.address = v.clone();
        }
        if let Some(v) = &self.city {
            page.city = v.clone();
        }
        if let Some(v) = &self.neighborhood {
            page.neighborhood = v.clone();
        }
        if let Some(v) = self.start_date {
            page.start_date = v;
        }
        if let Some(v) = self.end_date {
            page.end_date = v;
        }
        if let Some(v) = self.pause_shabbat {
            page.pause_shabbat = v;
        }
        if let Some(v) = self.guest_count {
            page.guest_count = v;
        }
        if let Some(v) = &self.dietary_notes {
            page.dietary_notes = v.clone();
        }
        if let Some(v) = &self.special_instructions {
            page.special_instructions = v.clone();
        }
        if let Some(v) = &self.family_notes {
            page.family_notes = v.clone();
        }
        if let Some(v) = &self.donation_url {
            page.donation_url = v.clone();
        }
        if let Some(v) = &self.donation_label {
            page.donation_label = v.clone();
        }
        if let Some(v) = self.visibility {
            page.visibility = v;
        }
        if let Some(v) = self.notification_prefs {
            page.notification_prefs = v;
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewInvite {
    pub page_id: PageId,
    pub name: String,
    pub email: String,
    pub token: String,
    pub invited_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccessRequest {
    pub page_id: PageId,
    pub requester_name: String,
    pub requester_email: String,
    pub message: Option<String>,
    pub organizer_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSignup {
    pub page_id: PageId,
    pub volunteer_name: String,
    pub volunteer_email: String,
    pub volunteer_phone: Option<String>,
    pub meal_date: NaiveDate,
    pub slot: MealSlot,
    pub servings: i32,
    pub description: Option<String>,
    pub will_serve: bool,
    pub status: SignupStatus,
    pub alternative_type: Option<AlternativeType>,
    pub alternative_note: Option<String>,
    pub signup_group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SignupInsert {
    Inserted(MealSignup),
    /// A confirmed signup already holds (page, date, slot).
    SlotTaken,
    /// The page is missing or no longer active.
    PageUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderFlag {
    DayBefore,
    MorningOf,
}

#[derive(Debug, Clone)]
pub struct NewEmailLog {
    pub page_id: PageId,
    pub kind: EmailKind,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub related_signup_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Terminal bookkeeping for one delivery attempt.
#[derive(Debug, Clone)]
pub struct EmailResult {
    pub status: EmailStatus,
    pub attempts: i32,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Filter over the email log. `None` fields are not constrained.
#[derive(Debug, Clone)]
pub struct EmailLogQuery {
    pub page_id: PageId,
    pub kind: EmailKind,
    pub recipient_email: Option<String>,
    pub related_signup_id: Option<i64>,
    pub created_since: Option<DateTime<Utc>>,
}

impl EmailLogQuery {
    pub fn new(page_id: PageId, kind: EmailKind) -> Self {
        Self {
            page_id,
            kind,
            recipient_email: None,
            related_signup_id: None,
            created_since: None,
        }
    }

    pub fn recipient(mut self, email: impl Into<String>) -> Self {
        self.recipient_email = Some(email.into());
        self
    }

    pub fn signup(mut self, signup_id: i64) -> Self {
        self.related_signup_id = Some(signup_id);
        self
    }

    pub fn since(mut self, at: DateTime<Utc>) -> Self {
        self.created_since = Some(at);
        self
    }

    pub fn matches(&self, entry: &EmailLogEntry) -> bool {
        entry.page_id == self.page_id
            && entry.kind == self.kind
            && self
                .recipient_email
                .as_deref()
                .map_or(true, |r| entry.recipient_email == r)
            && self
                .related_signup_id
                .map_or(true, |id| entry.related_signup_id == Some(id))
            && self.created_since.map_or(true, |t| entry.created_at >= t)
    }
}

#[derive(Debug, Clone)]
pub struct NewUpdate {
    pub page_id: PageId,
    pub message: String,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub page_id: PageId,
    pub reason: String,
    pub details: Option<String>,
    pub reporter_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Support pages
    async fn insert_page(&self, page: NewPage) -> Result<PageInsert>;
    async fn get_page(&self, id: PageId) -> Result<Option<SupportPage>>;
    async fn active_page_for_obituary(&self, obituary_id: &str) -> Result<Option<SupportPage>>;
    async fn pages_created_since(&self, since: DateTime<Utc>) -> Result<Vec<SupportPage>>;
    async fn active_pages(&self) -> Result<Vec<SupportPage>>;
    async fn update_page(&self, id: PageId, patch: &PagePatch) -> Result<bool>;
    async fn archive_page(&self, id: PageId, at: DateTime<Utc>) -> Result<bool>;
    /// Archives active pages whose end date is strictly before `cutoff`.
    async fn archive_pages_ended_before(&self, cutoff: NaiveDate, at: DateTime<Utc>) -> Result<u64>;
    /// Flips `thank_you_sent` from false to true. Returns false when it was
    /// already set.
    async fn claim_thank_you(&self, id: PageId) -> Result<bool>;
    async fn page_by_verification_token(&self, token: &str) -> Result<Option<SupportPage>>;
    /// Sets the verification status and clears the verification token.
    async fn set_verification(&self, id: PageId, status: VerificationStatus, at: DateTime<Utc>) -> Result<()>;

    // Co-organizers
    async fn invites_for_page(&self, page_id: PageId) -> Result<Vec<CoOrganizerInvite>>;
    async fn invite_by_token(&self, token: &str) -> Result<Option<CoOrganizerInvite>>;
    /// Inserts an invite, deleting `replacing` first in the same unit of work.
    async fn insert_invite(&self, invite: NewInvite, replacing: Option<i64>) -> Result<CoOrganizerInvite>;
    async fn set_invite_status(&self, id: i64, status: InviteStatus, at: DateTime<Utc>) -> Result<bool>;

    // Access requests
    async fn access_requests_from(&self, page_id: PageId, email: &str) -> Result<Vec<AccessRequest>>;
    async fn get_access_request(&self, id: i64) -> Result<Option<AccessRequest>>;
    async fn insert_access_request(&self, request: NewAccessRequest) -> Result<AccessRequest>;
    /// Moves a pending request to `status`. Returns false when the request
    /// was no longer pending.
    async fn decide_access_request(
        &self,
        id: i64,
        status: AccessRequestStatus,
        access_token: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn has_approved_access(&self, page_id: PageId, access_token: &str) -> Result<bool>;

    // Meal signups
    async fn insert_signup(&self, signup: NewSignup) -> Result<SignupInsert>;
    async fn signups_for_page(&self, page_id: PageId) -> Result<Vec<MealSignup>>;
    async fn get_signup(&self, id: i64) -> Result<Option<MealSignup>>;
    async fn delete_signup(&self, page_id: PageId, id: i64) -> Result<bool>;
    /// Confirmed signups on `date` that belong to active pages.
    async fn confirmed_signups_on(&self, date: NaiveDate) -> Result<Vec<MealSignup>>;
    async fn mark_reminder_sent(&self, id: i64, flag: ReminderFlag) -> Result<()>;

    // Email log
    async fn insert_email_log(&self, entry: NewEmailLog) -> Result<EmailLogEntry>;
    async fn record_email_result(&self, id: i64, result: &EmailResult) -> Result<()>;
    async fn email_log_matching(&self, query: &EmailLogQuery) -> Result<Vec<EmailLogEntry>>;
    async fn failed_emails_since(&self, since: DateTime<Utc>) -> Result<Vec<EmailLogEntry>>;

    // Organizer updates
    async fn insert_update(&self, update: NewUpdate) -> Result<OrganizerUpdate>;
    async fn updates_for_page(&self, page_id: PageId) -> Result<Vec<OrganizerUpdate>>;
    async fn delete_update(&self, page_id: PageId, id: i64) -> Result<bool>;

    // Reports and counters
    async fn insert_report(&self, report: NewReport) -> Result<PageReport>;
    async fn increment_counter(&self, event: &str, page_id: Option<PageId>, day: NaiveDate) -> Result<()>;
}
