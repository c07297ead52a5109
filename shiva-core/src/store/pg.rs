//! Postgres store over a deadpool of `AsyncPgConnection`s.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    EmailLogQuery, EmailResult, NewAccessRequest, NewEmailLog, NewInvite, NewPage, NewReport,
    NewSignup, NewUpdate, PageInsert, PagePatch, ReminderFlag, SignupInsert, Store,
};
use crate::db::{DbConnection, DbPool};
use crate::schema::{
    access_requests, audit_counters, co_organizer_invites, email_log, meal_signups,
    organizer_updates, page_reports, support_pages,
};
use crate::types::{
    AccessRequest, AccessRequestStatus, CoOrganizerInvite, EmailLogEntry, EmailStatus, InviteStatus,
    MealSignup, NotificationPrefs, OrganizerUpdate, PageId, PageReport, PageStatus, SignupStatus,
    SupportPage, UnknownVariant, VerificationStatus,
};

fn parse_text<T: FromStr<Err = UnknownVariant>>(value: &str) -> Result<T> {
    Ok(value.parse::<T>()?)
}

fn is_unique_violation(e: &DieselError) -> bool {
    matches!(e, DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = support_pages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct PageRow {
    id: Uuid,
    obituary_id: Option<String>,
    organizer_name: String,
    organizer_email: String,
    organizer_phone: Option<String>,
    organizer_relationship: String,
    family_name: String,
    address: String,
    city: Option<String>,
    neighborhood: Option<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    pause_shabbat: bool,
    guest_count: Option<i32>,
    dietary_notes: Option<String>,
    special_instructions: Option<String>,
    family_notes: Option<String>,
    donation_url: Option<String>,
    donation_label: Option<String>,
    visibility: String,
    magic_token: String,
    verification_token: Option<String>,
    verification_status: String,
    verified_at: Option<DateTime<Utc>>,
    notification_prefs: serde_json::Value,
    status: String,
    thank_you_sent: bool,
    created_at: DateTime<Utc>,
    archived_at: Option<DateTime<Utc>>,
}

impl TryFrom<PageRow> for SupportPage {
    type Error = anyhow::Error;

    fn try_from(row: PageRow) -> Result<Self> {
        Ok(SupportPage {
            id: row.id,
            obituary_id: row.obituary_id,
            organizer_name: row.organizer_name,
            organizer_email: row.organizer_email,
            organizer_phone: row.organizer_phone,
            organizer_relationship: row.organizer_relationship,
            family_name: row.family_name,
            address: row.address,
            city: row.city,
            neighborhood: row.neighborhood,
            start_date: row.start_date,
            end_date: row.end_date,
            pause_shabbat: row.pause_shabbat,
            guest_count: row.guest_count,
            dietary_notes: row.dietary_notes,
            special_instructions: row.special_instructions,
            family_notes: row.family_notes,
            donation_url: row.donation_url,
            donation_label: row.donation_label,
            visibility: parse_text(&row.visibility)?,
            magic_token: row.magic_token,
            verification_token: row.verification_token,
            verification_status: parse_text(&row.verification_status)?,
            verified_at: row.verified_at,
            notification_prefs: NotificationPrefs::from_json(&row.notification_prefs),
            status: parse_text(&row.status)?,
            thank_you_sent: row.thank_you_sent,
            created_at: row.created_at,
            archived_at: row.archived_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = support_pages)]
struct NewPageRow {
    id: Uuid,
    obituary_id: Option<String>,
    organizer_name: String,
    organizer_email: String,
    organizer_phone: Option<String>,
    organizer_relationship: String,
    family_name: String,
    address: String,
    city: Option<String>,
    neighborhood: Option<String>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    pause_shabbat: bool,
    guest_count: Option<i32>,
    dietary_notes: Option<String>,
    special_instructions: Option<String>,
    family_notes: Option<String>,
    donation_url: Option<String>,
    donation_label: Option<String>,
    visibility: String,
    magic_token: String,
    verification_token: Option<String>,
    verification_status: String,
    notification_prefs: serde_json::Value,
    status: String,
    thank_you_sent: bool,
    created_at: DateTime<Utc>,
}

impl From<NewPage> for NewPageRow {
    fn from(page: NewPage) -> Self {
        NewPageRow {
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
            visibility: page.visibility.as_str().to_string(),
            magic_token: page.magic_token,
            verification_token: Some(page.verification_token),
            verification_status: VerificationStatus::Pending.as_str().to_string(),
            notification_prefs: page.notification_prefs.to_json(),
            status: PageStatus::Active.as_str().to_string(),
            thank_you_sent: false,
            created_at: page.created_at,
        }
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = support_pages)]
struct PageChangeset {
    family_name: Option<String>,
    address: Option<String>,
    city: Option<Option<String>>,
    neighborhood: Option<Option<String>>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    pause_shabbat: Option<bool>,
    guest_count: Option<Option<i32>>,
    dietary_notes: Option<Option<String>>,
    special_instructions: Option<Option<String>>,
    family_notes: Option<Option<String>>,
    donation_url: Option<Option<String>>,
    donation_label: Option<Option<String>>,
    visibility: Option<String>,
    notification_prefs: Option<serde_json::Value>,
}

impl From<&PagePatch> for PageChangeset {
    fn from(patch: &PagePatch) -> Self {
        PageChangeset {
            family_name: patch.family_name.clone(),
            address: patch.address.clone(),
            city: patch.city.clone(),
            neighborhood: patch.neighborhood.clone(),
            start_date: patch.start_date,
            end_date: patch.end_date,
            pause_shabbat: patch.pause_shabbat,
            guest_count: patch.guest_count,
            dietary_notes: patch.dietary_notes.clone(),
            special_instructions: patch.special_instructions.clone(),
            family_notes: patch.family_notes.clone(),
            donation_url: patch.donation_url.clone(),
            donation_label: patch.donation_label.clone(),
            visibility: patch.visibility.map(|v| v.as_str().to_string()),
            notification_prefs: patch.notification_prefs.map(|p| p.to_json()),
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = co_organizer_invites)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct InviteRow {
    id: i64,
    page_id: Uuid,
    name: String,
    email: String,
    token: String,
    invited_by: String,
    status: String,
    created_at: DateTime<Utc>,
    accepted_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
}

impl TryFrom<InviteRow> for CoOrganizerInvite {
    type Error = anyhow::Error;

    fn try_from(row: InviteRow) -> Result<Self> {
        Ok(CoOrganizerInvite {
            id: row.id,
            page_id: row.page_id,
            name: row.name,
            email: row.email,
            token: row.token,
            invited_by: row.invited_by,
            status: parse_text(&row.status)?,
            created_at: row.created_at,
            accepted_at: row.accepted_at,
            revoked_at: row.revoked_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = co_organizer_invites)]
struct NewInviteRow {
    page_id: Uuid,
    name: String,
    email: String,
    token: String,
    invited_by: String,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = access_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct AccessRequestRow {
    id: i64,
    page_id: Uuid,
    requester_name: String,
    requester_email: String,
    message: Option<String>,
    organizer_key: String,
    status: String,
    access_token: Option<String>,
    created_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
}

impl TryFrom<AccessRequestRow> for AccessRequest {
    type Error = anyhow::Error;

    fn try_from(row: AccessRequestRow) -> Result<Self> {
        Ok(AccessRequest {
            id: row.id,
            page_id: row.page_id,
            requester_name: row.requester_name,
            requester_email: row.requester_email,
            message: row.message,
            organizer_key: row.organizer_key,
            status: parse_text(&row.status)?,
            access_token: row.access_token,
            created_at: row.created_at,
            decided_at: row.decided_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = access_requests)]
struct NewAccessRequestRow {
    page_id: Uuid,
    requester_name: String,
    requester_email: String,
    message: Option<String>,
    organizer_key: String,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = meal_signups)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SignupRow {
    id: i64,
    page_id: Uuid,
    volunteer_name: String,
    volunteer_email: String,
    volunteer_phone: Option<String>,
    meal_date: NaiveDate,
    slot: String,
    servings: i32,
    description: Option<String>,
    will_serve: bool,
    status: String,
    alternative_type: Option<String>,
    alternative_note: Option<String>,
    signup_group_id: Option<Uuid>,
    reminder_day_before_sent: bool,
    reminder_morning_of_sent: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<SignupRow> for MealSignup {
    type Error = anyhow::Error;

    fn try_from(row: SignupRow) -> Result<Self> {
        Ok(MealSignup {
            id: row.id,
            page_id: row.page_id,
            volunteer_name: row.volunteer_name,
            volunteer_email: row.volunteer_email,
            volunteer_phone: row.volunteer_phone,
            meal_date: row.meal_date,
            slot: parse_text(&row.slot)?,
            servings: row.servings,
            description: row.description,
            will_serve: row.will_serve,
            status: parse_text(&row.status)?,
            alternative_type: row.alternative_type.as_deref().map(parse_text).transpose()?,
            alternative_note: row.alternative_note,
            signup_group_id: row.signup_group_id,
            reminder_day_before_sent: row.reminder_day_before_sent,
            reminder_morning_of_sent: row.reminder_morning_of_sent,
            created_at: row.created_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = meal_signups)]
struct NewSignupRow {
    page_id: Uuid,
    volunteer_name: String,
    volunteer_email: String,
    volunteer_phone: Option<String>,
    meal_date: NaiveDate,
    slot: String,
    servings: i32,
    description: Option<String>,
    will_serve: bool,
    status: String,
    alternative_type: Option<String>,
    alternative_note: Option<String>,
    signup_group_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<NewSignup> for NewSignupRow {
    fn from(s: NewSignup) -> Self {
        NewSignupRow {
            page_id: s.page_id,
            volunteer_name: s.volunteer_name,
            volunteer_email: s.volunteer_email,
            volunteer_phone: s.volunteer_phone,
            meal_date: s.meal_date,
            slot: s.slot.as_str().to_string(),
            servings: s.servings,
            description: s.description,
            will_serve: s.will_serve,
            status: s.status.as_str().to_string(),
            alternative_type: s.alternative_type.map(|t| t.as_str().to_string()),
            alternative_note: s.alternative_note,
            signup_group_id: s.signup_group_id,
            created_at: s.created_at,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = email_log)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct EmailLogRow {
    id: i64,
    page_id: Uuid,
    kind: String,
    recipient_email: String,
    recipient_name: Option<String>,
    related_signup_id: Option<i64>,
    status: String,
    error_message: Option<String>,
    provider_message_id: Option<String>,
    attempts: i32,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<EmailLogRow> for EmailLogEntry {
    type Error = anyhow::Error;

    fn try_from(row: EmailLogRow) -> Result<Self> {
        Ok(EmailLogEntry {
            id: row.id,
            page_id: row.page_id,
            kind: parse_text(&row.kind)?,
            recipient_email: row.recipient_email,
            recipient_name: row.recipient_name,
            related_signup_id: row.related_signup_id,
            status: parse_text(&row.status)?,
            error_message: row.error_message,
            provider_message_id: row.provider_message_id,
            attempts: row.attempts,
            created_at: row.created_at,
            sent_at: row.sent_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = email_log)]
struct NewEmailLogRow {
    page_id: Uuid,
    kind: String,
    recipient_email: String,
    recipient_name: Option<String>,
    related_signup_id: Option<i64>,
    status: String,
    attempts: i32,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = organizer_updates)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct UpdateRow {
    id: i64,
    page_id: Uuid,
    message: String,
    author_name: String,
    created_at: DateTime<Utc>,
}

impl From<UpdateRow> for OrganizerUpdate {
    fn from(row: UpdateRow) -> Self {
        OrganizerUpdate {
            id: row.id,
            page_id: row.page_id,
            message: row.message,
            author_name: row.author_name,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = page_reports)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ReportRow {
    id: i64,
    page_id: Uuid,
    reason: String,
    details: Option<String>,
    reporter_email: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ReportRow> for PageReport {
    fn from(row: ReportRow) -> Self {
        PageReport {
            id: row.id,
            page_id: row.page_id,
            reason: row.reason,
            details: row.details,
            reporter_email: row.reporter_email,
            created_at: row.created_at,
        }
    }
}

enum SignupTx {
    Inserted(SignupRow),
    SlotTaken,
    PageUnavailable,
}

fn rows_into<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = anyhow::Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<DbConnection> {
        self.pool
            .get()
            .await
            .map_err(|e| anyhow!("Failed to get database connection: {}", e))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_page(&self, page: NewPage) -> Result<PageInsert> {
        let obituary_id = page.obituary_id.clone();
        if let Some(obituary_id) = obituary_id.as_deref() {
            if let Some(existing) = self.active_page_for_obituary(obituary_id).await? {
                return Ok(PageInsert::Duplicate(existing));
            }
        }

        let mut conn = self.conn().await?;
        let inserted = diesel::insert_into(support_pages::table)
            .values(NewPageRow::from(page))
            .returning(PageRow::as_returning())
            .get_result(&mut conn)
            .await;

        match inserted {
            Ok(row) => Ok(PageInsert::Inserted(row.try_into()?)),
            // Lost the race against a concurrent create for the same obituary.
            Err(e) if is_unique_violation(&e) => {
                let existing = match obituary_id.as_deref() {
                    Some(id) => self.active_page_for_obituary(id).await?,
                    None => None,
                };
                existing
                    .map(PageInsert::Duplicate)
                    .ok_or_else(|| anyhow!("Support page insert conflicted: {}", e))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_page(&self, id: PageId) -> Result<Option<SupportPage>> {
        let mut conn = self.conn().await?;
        let row = support_pages::table
            .find(id)
            .select(PageRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(SupportPage::try_from).transpose()
    }

    async fn active_page_for_obituary(&self, obituary_id: &str) -> Result<Option<SupportPage>> {
        let mut conn = self.conn().await?;
        let row = support_pages::table
            .filter(support_pages::obituary_id.eq(obituary_id))
            .filter(support_pages::status.eq(PageStatus::Active.as_str()))
            .select(PageRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(SupportPage::try_from).transpose()
    }

    async fn pages_created_since(&self, since: DateTime<Utc>) -> Result<Vec<SupportPage>> {
        let mut conn = self.conn().await?;
        let rows: Vec<PageRow> = support_pages::table
            .filter(support_pages::created_at.ge(since))
            .filter(support_pages::status.eq(PageStatus::Active.as_str()))
            .order(support_pages::created_at.desc())
            .select(PageRow::as_select())
            .load(&mut conn)
            .await?;
        rows_into(rows)
    }

    async fn active_pages(&self) -> Result<Vec<SupportPage>> {
        let mut conn = self.conn().await?;
        let rows: Vec<PageRow> = support_pages::table
            .filter(support_pages::status.eq(PageStatus::Active.as_str()))
            .order(support_pages::start_date.asc())
            .select(PageRow::as_select())
            .load(&mut conn)
            .await?;
        rows_into(rows)
    }

    async fn update_page(&self, id: PageId, patch: &PagePatch) -> Result<bool> {
        if patch.is_empty() {
            return Ok(self.get_page(id).await?.is_some());
        }
        let mut conn = self.conn().await?;
        let updated = diesel::update(support_pages::table.find(id))
            .set(PageChangeset::from(patch))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }

    async fn archive_page(&self, id: PageId, at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            support_pages::table
                .find(id)
                .filter(support_pages::status.eq(PageStatus::Active.as_str())),
        )
        .set((
            support_pages::status.eq(PageStatus::Archived.as_str()),
            support_pages::archived_at.eq(Some(at)),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    async fn archive_pages_ended_before(&self, cutoff: NaiveDate, at: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            support_pages::table
                .filter(support_pages::status.eq(PageStatus::Active.as_str()))
                .filter(support_pages::end_date.lt(cutoff)),
        )
        .set((
            support_pages::status.eq(PageStatus::Archived.as_str()),
            support_pages::archived_at.eq(Some(at)),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated as u64)
    }

    async fn claim_thank_you(&self, id: PageId) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            support_pages::table
                .find(id)
                .filter(support_pages::thank_you_sent.eq(false)),
        )
        .set(support_pages::thank_you_sent.eq(true))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn page_by_verification_token(&self, token: &str) -> Result<Option<SupportPage>> {
        let mut conn = self.conn().await?;
        let row = support_pages::table
            .filter(support_pages::verification_token.eq(token))
            .select(PageRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(SupportPage::try_from).transpose()
    }

    async fn set_verification(&self, id: PageId, status: VerificationStatus, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(support_pages::table.find(id))
            .set((
                support_pages::verification_status.eq(status.as_str()),
                support_pages::verified_at.eq(Some(at)),
                support_pages::verification_token.eq(None::<String>),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn invites_for_page(&self, page_id: PageId) -> Result<Vec<CoOrganizerInvite>> {
        let mut conn = self.conn().await?;
        let rows: Vec<InviteRow> = co_organizer_invites::table
            .filter(co_organizer_invites::page_id.eq(page_id))
            .order(co_organizer_invites::created_at.asc())
            .select(InviteRow::as_select())
            .load(&mut conn)
            .await?;
        rows_into(rows)
    }

    async fn invite_by_token(&self, token: &str) -> Result<Option<CoOrganizerInvite>> {
        let mut conn = self.conn().await?;
        let row = co_organizer_invites::table
            .filter(co_organizer_invites::token.eq(token))
            .select(InviteRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(CoOrganizerInvite::try_from).transpose()
    }

    async fn insert_invite(&self, invite: NewInvite, replacing: Option<i64>) -> Result<CoOrganizerInvite> {
        let row = NewInviteRow {
            page_id: invite.page_id,
            name: invite.name,
            email: invite.email,
            token: invite.token,
            invited_by: invite.invited_by,
            status: InviteStatus::Pending.as_str().to_string(),
            created_at: invite.created_at,
        };

        let mut conn = self.conn().await?;
        let inserted = conn
            .transaction::<_, DieselError, _>(|conn| {
                async move {
                    if let Some(old_id) = replacing {
                        diesel::delete(co_organizer_invites::table.find(old_id))
                            .execute(conn)
                            .await?;
                    }
                    diesel::insert_into(co_organizer_invites::table)
                        .values(&row)
                        .returning(InviteRow::as_returning())
                        .get_result(conn)
                        .await
                }
                .scope_boxed()
            })
            .await?;
        inserted.try_into()
    }

    async fn set_invite_status(&self, id: i64, status: InviteStatus, at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn().await?;
        let target = co_organizer_invites::table.find(id);
        let updated = match status {
            InviteStatus::Accepted => {
                diesel::update(target)
                    .set((
                        co_organizer_invites::status.eq(status.as_str()),
                        co_organizer_invites::accepted_at.eq(Some(at)),
                    ))
                    .execute(&mut conn)
                    .await?
            }
            InviteStatus::Revoked => {
                diesel::update(target)
                    .set((
                        co_organizer_invites::status.eq(status.as_str()),
                        co_organizer_invites::revoked_at.eq(Some(at)),
                    ))
                    .execute(&mut conn)
                    .await?
            }
            InviteStatus::Pending => {
                diesel::update(target)
                    .set(co_organizer_invites::status.eq(status.as_str()))
                    .execute(&mut conn)
                    .await?
            }
        };
        Ok(updated > 0)
    }

    async fn access_requests_from(&self, page_id: PageId, email: &str) -> Result<Vec<AccessRequest>> {
        let mut conn = self.conn().await?;
        let rows: Vec<AccessRequestRow> = access_requests::table
            .filter(access_requests::page_id.eq(page_id))
            .filter(access_requests::requester_email.eq(email))
            .order(access_requests::created_at.desc())
            .select(AccessRequestRow::as_select())
            .load(&mut conn)
            .await?;
        rows_into(rows)
    }

    async fn get_access_request(&self, id: i64) -> Result<Option<AccessRequest>> {
        let mut conn = self.conn().await?;
        let row = access_requests::table
            .find(id)
            .select(AccessRequestRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(AccessRequest::try_from).transpose()
    }

    async fn insert_access_request(&self, request: NewAccessRequest) -> Result<AccessRequest> {
        let mut conn = self.conn().await?;
        let row = diesel::insert_into(access_requests::table)
            .values(NewAccessRequestRow {
                page_id: request.page_id,
                requester_name: request.requester_name,
                requester_email: request.requester_email,
                message: request.message,
                organizer_key: request.organizer_key,
                status: AccessRequestStatus::Pending.as_str().to_string(),
                created_at: request.created_at,
            })
            .returning(AccessRequestRow::as_returning())
            .get_result(&mut conn)
            .await?;
        row.try_into()
    }

    async fn decide_access_request(
        &self,
        id: i64,
        status: AccessRequestStatus,
        access_token: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            access_requests::table
                .find(id)
                .filter(access_requests::status.eq(AccessRequestStatus::Pending.as_str())),
        )
        .set((
            access_requests::status.eq(status.as_str()),
            access_requests::access_token.eq(access_token),
            access_requests::decided_at.eq(Some(at)),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated == 1)
    }

    async fn has_approved_access(&self, page_id: PageId, access_token: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let found = diesel::select(exists(
            access_requests::table
                .filter(access_requests::page_id.eq(page_id))
                .filter(access_requests::access_token.eq(access_token))
                .filter(access_requests::status.eq(AccessRequestStatus::Approved.as_str())),
        ))
        .get_result::<bool>(&mut conn)
        .await?;
        Ok(found)
    }

    async fn insert_signup(&self, signup: NewSignup) -> Result<SignupInsert> {
        let row = NewSignupRow::from(signup);
        let confirmed = row.status == SignupStatus::Confirmed.as_str();

        let mut conn = self.conn().await?;
        let outcome = conn
            .transaction::<_, DieselError, _>(|conn| {
                async move {
                    // Serializes signups per page for the duration of the check.
                    let status: Option<String> = support_pages::table
                        .find(row.page_id)
                        .select(support_pages::status)
                        .for_update()
                        .first(conn)
                        .await
                        .optional()?;
                    if status.as_deref() != Some(PageStatus::Active.as_str()) {
                        return Ok(SignupTx::PageUnavailable);
                    }

                    if confirmed {
                        let taken = diesel::select(exists(
                            meal_signups::table
                                .filter(meal_signups::page_id.eq(row.page_id))
                                .filter(meal_signups::meal_date.eq(row.meal_date))
                                .filter(meal_signups::slot.eq(&row.slot))
                                .filter(meal_signups::status.eq(SignupStatus::Confirmed.as_str())),
                        ))
                        .get_result::<bool>(conn)
                        .await?;
                        if taken {
                            return Ok(SignupTx::SlotTaken);
                        }
                    }

                    let inserted = diesel::insert_into(meal_signups::table)
                        .values(&row)
                        .returning(SignupRow::as_returning())
                        .get_result(conn)
                        .await?;
                    Ok(SignupTx::Inserted(inserted))
                }
                .scope_boxed()
            })
            .await;

        match outcome {
            Ok(SignupTx::Inserted(row)) => Ok(SignupInsert::Inserted(row.try_into()?)),
            Ok(SignupTx::SlotTaken) => Ok(SignupInsert::SlotTaken),
            Ok(SignupTx::PageUnavailable) => Ok(SignupInsert::PageUnavailable),
            Err(e) if is_unique_violation(&e) => Ok(SignupInsert::SlotTaken),
            Err(e) => Err(e.into()),
        }
    }

    async fn signups_for_page(&self, page_id: PageId) -> Result<Vec<MealSignup>> {
        let mut conn = self.conn().await?;
        let rows: Vec<SignupRow> = meal_signups::table
            .filter(meal_signups::page_id.eq(page_id))
            .order((meal_signups::meal_date.asc(), meal_signups::slot.asc(), meal_signups::id.asc()))
            .select(SignupRow::as_select())
            .load(&mut conn)
            .await?;
        rows_into(rows)
    }

    async fn get_signup(&self, id: i64) -> Result<Option<MealSignup>> {
        let mut conn = self.conn().await?;
        let row = meal_signups::table
            .find(id)
            .select(SignupRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(MealSignup::try_from).transpose()
    }

    async fn delete_signup(&self, page_id: PageId, id: i64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            meal_signups::table
                .find(id)
                .filter(meal_signups::page_id.eq(page_id)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted > 0)
    }

    async fn confirmed_signups_on(&self, date: NaiveDate) -> Result<Vec<MealSignup>> {
        let mut conn = self.conn().await?;
        let rows: Vec<SignupRow> = meal_signups::table
            .inner_join(support_pages::table)
            .filter(meal_signups::meal_date.eq(date))
            .filter(meal_signups::status.eq(SignupStatus::Confirmed.as_str()))
            .filter(support_pages::status.eq(PageStatus::Active.as_str()))
            .order(meal_signups::id.asc())
            .select(SignupRow::as_select())
            .load(&mut conn)
            .await?;
        rows_into(rows)
    }

    async fn mark_reminder_sent(&self, id: i64, flag: ReminderFlag) -> Result<()> {
        let mut conn = self.conn().await?;
        let target = meal_signups::table.find(id);
        match flag {
            ReminderFlag::DayBefore => {
                diesel::update(target)
                    .set(meal_signups::reminder_day_before_sent.eq(true))
                    .execute(&mut conn)
                    .await?
            }
            ReminderFlag::MorningOf => {
                diesel::update(target)
                    .set(meal_signups::reminder_morning_of_sent.eq(true))
                    .execute(&mut conn)
                    .await?
            }
        };
        Ok(())
    }

    async fn insert_email_log(&self, entry: NewEmailLog) -> Result<EmailLogEntry> {
        let mut conn = self.conn().await?;
        let row = diesel::insert_into(email_log::table)
            .values(NewEmailLogRow {
                page_id: entry.page_id,
                kind: entry.kind.as_str().to_string(),
                recipient_email: entry.recipient_email,
                recipient_name: entry.recipient_name,
                related_signup_id: entry.related_signup_id,
                status: EmailStatus::Pending.as_str().to_string(),
                attempts: 0,
                created_at: entry.created_at,
            })
            .returning(EmailLogRow::as_returning())
            .get_result(&mut conn)
            .await?;
        row.try_into()
    }

    async fn record_email_result(&self, id: i64, result: &EmailResult) -> Result<()> {
        let mut conn = self.conn().await?;
        diesel::update(email_log::table.find(id))
            .set((
                email_log::status.eq(result.status.as_str()),
                email_log::attempts.eq(result.attempts),
                email_log::provider_message_id.eq(result.provider_message_id.clone()),
                email_log::error_message.eq(result.error_message.clone()),
                email_log::sent_at.eq(result.sent_at),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn email_log_matching(&self, query: &EmailLogQuery) -> Result<Vec<EmailLogEntry>> {
        let mut conn = self.conn().await?;
        let mut q = email_log::table
            .filter(email_log::page_id.eq(query.page_id))
            .filter(email_log::kind.eq(query.kind.as_str()))
            .into_boxed();
        if let Some(recipient) = &query.recipient_email {
            q = q.filter(email_log::recipient_email.eq(recipient.clone()));
        }
        if let Some(signup_id) = query.related_signup_id {
            q = q.filter(email_log::related_signup_id.eq(signup_id));
        }
        if let Some(since) = query.created_since {
            q = q.filter(email_log::created_at.ge(since));
        }
        let rows: Vec<EmailLogRow> = q
            .order(email_log::created_at.asc())
            .select(EmailLogRow::as_select())
            .load(&mut conn)
            .await?;
        rows_into(rows)
    }

    async fn failed_emails_since(&self, since: DateTime<Utc>) -> Result<Vec<EmailLogEntry>> {
        let mut conn = self.conn().await?;
        let rows: Vec<EmailLogRow> = email_log::table
            .filter(email_log::status.eq(EmailStatus::Failed.as_str()))
            .filter(email_log::created_at.ge(since))
            .order(email_log::created_at.asc())
            .select(EmailLogRow::as_select())
            .load(&mut conn)
            .await?;
        rows_into(rows)
    }

    async fn insert_update(&self, update: NewUpdate) -> Result<OrganizerUpdate> {
        let mut conn = self.conn().await?;
        let row = diesel::insert_into(organizer_updates::table)
            .values((
                organizer_updates::page_id.eq(update.page_id),
                organizer_updates::message.eq(update.message),
                organizer_updates::author_name.eq(update.author_name),
                organizer_updates::created_at.eq(update.created_at),
            ))
            .returning(UpdateRow::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(row.into())
    }

    async fn updates_for_page(&self, page_id: PageId) -> Result<Vec<OrganizerUpdate>> {
        let mut conn = self.conn().await?;
        let rows: Vec<UpdateRow> = organizer_updates::table
            .filter(organizer_updates::page_id.eq(page_id))
            .order((organizer_updates::created_at.desc(), organizer_updates::id.desc()))
            .select(UpdateRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(OrganizerUpdate::from).collect())
    }

    async fn delete_update(&self, page_id: PageId, id: i64) -> Result<bool> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            organizer_updates::table
                .find(id)
                .filter(organizer_updates::page_id.eq(page_id)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted > 0)
    }

    async fn insert_report(&self, report: NewReport) -> Result<PageReport> {
        let mut conn = self.conn().await?;
        let row = diesel::insert_into(page_reports::table)
            .values((
                page_reports::page_id.eq(report.page_id),
                page_reports::reason.eq(report.reason),
                page_reports::details.eq(report.details),
                page_reports::reporter_email.eq(report.reporter_email),
                page_reports::created_at.eq(report.created_at),
            ))
            .returning(ReportRow::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(row.into())
    }

    async fn increment_counter(&self, event: &str, page_id: Option<PageId>, day: NaiveDate) -> Result<()> {
        let page_key = page_id.map(|id| id.to_string()).unwrap_or_default();
        let mut conn = self.conn().await?;
        diesel::insert_into(audit_counters::table)
            .values((
                audit_counters::event.eq(event),
                audit_counters::page_key.eq(&page_key),
                audit_counters::day.eq(day),
                audit_counters::count.eq(1_i64),
            ))
            .on_conflict((audit_counters::event, audit_counters::page_key, audit_counters::day))
            .do_update()
            .set(audit_counters::count.eq(audit_counters::count + 1_i64))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
