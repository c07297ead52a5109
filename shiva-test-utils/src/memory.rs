//! In-memory [`Store`] with the same atomicity as the Postgres store: every
//! method runs under one lock, so check-and-write pairs cannot interleave.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use shiva_core::store::{
    EmailLogQuery, EmailResult, NewAccessRequest, NewEmailLog, NewInvite, NewPage, NewReport,
    NewSignup, NewUpdate, PageInsert, PagePatch, ReminderFlag, SignupInsert, Store,
};
use shiva_core::types::{
    AccessRequest, AccessRequestStatus, CoOrganizerInvite, EmailLogEntry, EmailStatus, InviteStatus,
    MealSignup, OrganizerUpdate, PageId, PageReport, PageStatus, SignupStatus, SupportPage,
    VerificationStatus,
};

#[derive(Default)]
struct State {
    pages: Vec<SupportPage>,
    invites: Vec<CoOrganizerInvite>,
    access_requests: Vec<AccessRequest>,
    signups: Vec<MealSignup>,
    email_log: Vec<EmailLogEntry>,
    updates: Vec<OrganizerUpdate>,
    reports: Vec<PageReport>,
    counters: HashMap<(String, Option<PageId>, NaiveDate), i64>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn page_mut(&mut self, id: PageId) -> Option<&mut SupportPage> {
        self.pages.iter_mut().find(|p| p.id == id)
    }

    fn active_for_obituary(&self, obituary_id: &str) -> Option<&SupportPage> {
        self.pages
            .iter()
            .find(|p| p.is_active() && p.obituary_id.as_deref() == Some(obituary_id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn peek(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of `Store` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn page(&self, id: PageId) -> Option<SupportPage> {
        self.peek().pages.iter().find(|p| p.id == id).cloned()
    }

    /// Replaces a stored page wholesale, for arranging test state.
    pub fn put_page(&self, page: SupportPage) {
        let mut state = self.peek();
        state.pages.retain(|p| p.id != page.id);
        state.pages.push(page);
    }

    pub fn signups(&self) -> Vec<MealSignup> {
        self.peek().signups.clone()
    }

    pub fn email_log(&self) -> Vec<EmailLogEntry> {
        self.peek().email_log.clone()
    }

    /// Replaces a stored email log row, for arranging retry scenarios.
    pub fn put_email_entry(&self, entry: EmailLogEntry) {
        let mut state = self.peek();
        state.email_log.retain(|e| e.id != entry.id);
        state.email_log.push(entry);
    }

    pub fn invites(&self) -> Vec<CoOrganizerInvite> {
        self.peek().invites.clone()
    }

    pub fn reports(&self) -> Vec<PageReport> {
        self.peek().reports.clone()
    }

    pub fn counter(&self, event: &str, page_id: Option<PageId>, day: NaiveDate) -> i64 {
        self.peek()
            .counters
            .get(&(event.to_string(), page_id, day))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_page(&self, page: NewPage) -> Result<PageInsert> {
        let mut state = self.state();
        if let Some(obituary_id) = page.obituary_id.as_deref() {
            if let Some(existing) = state.active_for_obituary(obituary_id) {
                return Ok(PageInsert::Duplicate(existing.clone()));
            }
        }
        if state.pages.iter().any(|p| p.id == page.id) {
            return Err(anyhow!("duplicate page id {}", page.id));
        }
        let page = page.into_page();
        state.pages.push(page.clone());
        Ok(PageInsert::Inserted(page))
    }

    async fn get_page(&self, id: PageId) -> Result<Option<SupportPage>> {
        Ok(self.state().pages.iter().find(|p| p.id == id).cloned())
    }

    async fn active_page_for_obituary(&self, obituary_id: &str) -> Result<Option<SupportPage>> {
        Ok(self.state().active_for_obituary(obituary_id).cloned())
    }

    async fn pages_created_since(&self, since: DateTime<Utc>) -> Result<Vec<SupportPage>> {
        let mut pages: Vec<SupportPage> = self
            .state()
            .pages
            .iter()
            .filter(|p| p.is_active() && p.created_at >= since)
            .cloned()
            .collect();
        pages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pages)
    }

    async fn active_pages(&self) -> Result<Vec<SupportPage>> {
        let mut pages: Vec<SupportPage> = self
            .state()
            .pages
            .iter()
            .filter(|p| p.is_active())
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.start_date);
        Ok(pages)
    }

    async fn update_page(&self, id: PageId, patch: &PagePatch) -> Result<bool> {
        let mut state = self.state();
        match state.page_mut(id) {
            Some(page) => {
                patch.apply(page);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn archive_page(&self, id: PageId, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state();
        match state.page_mut(id) {
            Some(page) if page.is_active() => {
                page.status = PageStatus::Archived;
                page.archived_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn archive_pages_ended_before(&self, cutoff: NaiveDate, at: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state();
        let mut archived = 0;
        for page in state.pages.iter_mut().filter(|p| p.is_active() && p.end_date < cutoff) {
            page.status = PageStatus::Archived;
            page.archived_at = Some(at);
            archived += 1;
        }
        Ok(archived)
    }

    async fn claim_thank_you(&self, id: PageId) -> Result<bool> {
        let mut state = self.state();
        match state.page_mut(id) {
            Some(page) if !page.thank_you_sent => {
                page.thank_you_sent = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn page_by_verification_token(&self, token: &str) -> Result<Option<SupportPage>> {
        Ok(self
            .state()
            .pages
            .iter()
            .find(|p| p.verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn set_verification(&self, id: PageId, status: VerificationStatus, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        if let Some(page) = state.page_mut(id) {
            page.verification_status = status;
            page.verified_at = Some(at);
            page.verification_token = None;
        }
        Ok(())
    }

    async fn invites_for_page(&self, page_id: PageId) -> Result<Vec<CoOrganizerInvite>> {
        Ok(self
            .state()
            .invites
            .iter()
            .filter(|i| i.page_id == page_id)
            .cloned()
            .collect())
    }

    async fn invite_by_token(&self, token: &str) -> Result<Option<CoOrganizerInvite>> {
        Ok(self.state().invites.iter().find(|i| i.token == token).cloned())
    }

    async fn insert_invite(&self, invite: NewInvite, replacing: Option<i64>) -> Result<CoOrganizerInvite> {
        let mut state = self.state();
        if let Some(old_id) = replacing {
            state.invites.retain(|i| i.id != old_id);
        }
        let id = state.next_id();
        let invite = CoOrganizerInvite {
            id,
            page_id: invite.page_id,
            name: invite.name,
            email: invite.email,
            token: invite.token,
            invited_by: invite.invited_by,
            status: InviteStatus::Pending,
            created_at: invite.created_at,
            accepted_at: None,
            revoked_at: None,
        };
        state.invites.push(invite.clone());
        Ok(invite)
    }

    async fn set_invite_status(&self, id: i64, status: InviteStatus, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state();
        let Some(invite) = state.invites.iter_mut().find(|i| i.id == id) else {
            return Ok(false);
        };
        invite.status = status;
        match status {
            InviteStatus::Accepted => invite.accepted_at = Some(at),
            InviteStatus::Revoked => invite.revoked_at = Some(at),
            InviteStatus::Pending => {}
        }
        Ok(true)
    }

    async fn access_requests_from(&self, page_id: PageId, email: &str) -> Result<Vec<AccessRequest>> {
        let mut requests: Vec<AccessRequest> = self
            .state()
            .access_requests
            .iter()
            .filter(|r| r.page_id == page_id && r.requester_email == email)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn get_access_request(&self, id: i64) -> Result<Option<AccessRequest>> {
        Ok(self.state().access_requests.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_access_request(&self, request: NewAccessRequest) -> Result<AccessRequest> {
        let mut state = self.state();
        let id = state.next_id();
        let request = AccessRequest {
            id,
            page_id: request.page_id,
            requester_name: request.requester_name,
            requester_email: request.requester_email,
            message: request.message,
            organizer_key: request.organizer_key,
            status: AccessRequestStatus::Pending,
            access_token: None,
            created_at: request.created_at,
            decided_at: None,
        };
        state.access_requests.push(request.clone());
        Ok(request)
    }

    async fn decide_access_request(
        &self,
        id: i64,
        status: AccessRequestStatus,
        access_token: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state();
        match state.access_requests.iter_mut().find(|r| r.id == id) {
            Some(request) if request.status == AccessRequestStatus::Pending => {
                request.status = status;
                request.access_token = access_token;
                request.decided_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn has_approved_access(&self, page_id: PageId, access_token: &str) -> Result<bool> {
        Ok(self.state().access_requests.iter().any(|r| {
            r.page_id == page_id
                && r.status == AccessRequestStatus::Approved
                && r.access_token.as_deref() == Some(access_token)
        }))
    }

    async fn insert_signup(&self, signup: NewSignup) -> Result<SignupInsert> {
        let mut state = self.state();
        let page_active = state
            .pages
            .iter()
            .any(|p| p.id == signup.page_id && p.is_active());
        if !page_active {
            return Ok(SignupInsert::PageUnavailable);
        }
        if signup.status == SignupStatus::Confirmed {
            let taken = state.signups.iter().any(|s| {
                s.page_id == signup.page_id
                    && s.meal_date == signup.meal_date
                    && s.slot == signup.slot
                    && s.is_confirmed()
            });
            if taken {
                return Ok(SignupInsert::SlotTaken);
            }
        }
        let id = state.next_id();
        let row = MealSignup {
            id,
            page_id: signup.page_id,
            volunteer_name: signup.volunteer_name,
            volunteer_email: signup.volunteer_email,
            volunteer_phone: signup.volunteer_phone,
            meal_date: signup.meal_date,
            slot: signup.slot,
            servings: signup.servings,
            description: signup.description,
            will_serve: signup.will_serve,
            status: signup.status,
            alternative_type: signup.alternative_type,
            alternative_note: signup.alternative_note,
            signup_group_id: signup.signup_group_id,
            reminder_day_before_sent: false,
            reminder_morning_of_sent: false,
            created_at: signup.created_at,
        };
        state.signups.push(row.clone());
        Ok(SignupInsert::Inserted(row))
    }

    async fn signups_for_page(&self, page_id: PageId) -> Result<Vec<MealSignup>> {
        let mut signups: Vec<MealSignup> = self
            .state()
            .signups
            .iter()
            .filter(|s| s.page_id == page_id)
            .cloned()
            .collect();
        signups.sort_by_key(|s| (s.meal_date, s.slot, s.id));
        Ok(signups)
    }

    async fn get_signup(&self, id: i64) -> Result<Option<MealSignup>> {
        Ok(self.state().signups.iter().find(|s| s.id == id).cloned())
    }

    async fn delete_signup(&self, page_id: PageId, id: i64) -> Result<bool> {
        let mut state = self.state();
        let before = state.signups.len();
        state.signups.retain(|s| !(s.id == id && s.page_id == page_id));
        Ok(state.signups.len() < before)
    }

    async fn confirmed_signups_on(&self, date: NaiveDate) -> Result<Vec<MealSignup>> {
        let state = self.state();
        Ok(state
            .signups
            .iter()
            .filter(|s| s.meal_date == date && s.is_confirmed())
            .filter(|s| state.pages.iter().any(|p| p.id == s.page_id && p.is_active()))
            .cloned()
            .collect())
    }

    async fn mark_reminder_sent(&self, id: i64, flag: ReminderFlag) -> Result<()> {
        let mut state = self.state();
        if let Some(signup) = state.signups.iter_mut().find(|s| s.id == id) {
            match flag {
                ReminderFlag::DayBefore => signup.reminder_day_before_sent = true,
                ReminderFlag::MorningOf => signup.reminder_morning_of_sent = true,
            }
        }
        Ok(())
    }

    async fn insert_email_log(&self, entry: NewEmailLog) -> Result<EmailLogEntry> {
        let mut state = self.state();
        let id = state.next_id();
        let entry = EmailLogEntry {
            id,
            page_id: entry.page_id,
            kind: entry.kind,
            recipient_email: entry.recipient_email,
            recipient_name: entry.recipient_name,
            related_signup_id: entry.related_signup_id,
            status: EmailStatus::Pending,
            error_message: None,
            provider_message_id: None,
            attempts: 0,
            created_at: entry.created_at,
            sent_at: None,
        };
        state.email_log.push(entry.clone());
        Ok(entry)
    }

    async fn record_email_result(&self, id: i64, result: &EmailResult) -> Result<()> {
        let mut state = self.state();
        if let Some(entry) = state.email_log.iter_mut().find(|e| e.id == id) {
            entry.status = result.status;
            entry.attempts = result.attempts;
            entry.provider_message_id = result.provider_message_id.clone();
            entry.error_message = result.error_message.clone();
            entry.sent_at = result.sent_at;
        }
        Ok(())
    }

    async fn email_log_matching(&self, query: &EmailLogQuery) -> Result<Vec<EmailLogEntry>> {
        Ok(self
            .state()
            .email_log
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect())
    }

    async fn failed_emails_since(&self, since: DateTime<Utc>) -> Result<Vec<EmailLogEntry>> {
        Ok(self
            .state()
            .email_log
            .iter()
            .filter(|e| e.status == EmailStatus::Failed && e.created_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_update(&self, update: NewUpdate) -> Result<OrganizerUpdate> {
        let mut state = self.state();
        let id = state.next_id();
        let update = OrganizerUpdate {
            id,
            page_id: update.page_id,
            message: update.message,
            author_name: update.author_name,
            created_at: update.created_at,
        };
        state.updates.push(update.clone());
        Ok(update)
    }

    async fn updates_for_page(&self, page_id: PageId) -> Result<Vec<OrganizerUpdate>> {
        let mut updates: Vec<OrganizerUpdate> = self
            .state()
            .updates
            .iter()
            .filter(|u| u.page_id == page_id)
            .cloned()
            .collect();
        updates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(updates)
    }

    async fn delete_update(&self, page_id: PageId, id: i64) -> Result<bool> {
        let mut state = self.state();
        let before = state.updates.len();
        state.updates.retain(|u| !(u.id == id && u.page_id == page_id));
        Ok(state.updates.len() < before)
    }

    async fn insert_report(&self, report: NewReport) -> Result<PageReport> {
        let mut state = self.state();
        let id = state.next_id();
        let report = PageReport {
            id,
            page_id: report.page_id,
            reason: report.reason,
            details: report.details,
            reporter_email: report.reporter_email,
            created_at: report.created_at,
        };
        state.reports.push(report.clone());
        Ok(report)
    }

    async fn increment_counter(&self, event: &str, page_id: Option<PageId>, day: NaiveDate) -> Result<()> {
        *self
            .state()
            .counters
            .entry((event.to_string(), page_id, day))
            .or_insert(0) += 1;
        Ok(())
    }
}
