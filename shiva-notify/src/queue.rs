//! Scheduled notification pass.
//!
//! One call to [`NotificationQueue::run_once`] evaluates every scheduled
//! email kind against the current local time and sends what is due. Each
//! kind dedups against the email log (and the per-signup reminder flags), so
//! running the pass twice in the same window sends nothing new. Failed rows
//! are owned by the retry stage for 24 hours; the other stages leave them
//! alone.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use std::collections::{HashMap, HashSet};

use shiva_core::calendar::{dates_between, is_shabbat_day};
use shiva_core::store::{EmailLogQuery, ReminderFlag};
use shiva_core::types::{
    AccessRequestStatus, EmailKind, EmailLogEntry, EmailStatus, InviteStatus, MealSignup, PageId, SupportPage,
};
use shiva_core::{ShivaContext, ShivaResult};

use crate::mailer::{Letter, Mailer, MAX_RETRIES};
use crate::templates::Rendered;

pub const DAY_BEFORE_HOUR: u32 = 19;
pub const MORNING_OF_HOUR: u32 = 8;
pub const UNCOVERED_HOUR: u32 = 19;
pub const DAILY_SUMMARY_HOUR: u32 = 20;
/// Failed rows younger than this are retried; older ones are left as is.
pub const RETRY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCount {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StageCount {
    fn tally(&mut self, status: EmailStatus) {
        match status {
            EmailStatus::Sent => self.sent += 1,
            EmailStatus::Failed => self.failed += 1,
            EmailStatus::Skipped | EmailStatus::Pending => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub paused: bool,
    pub day_before: StageCount,
    pub morning_of: StageCount,
    pub uncovered: StageCount,
    pub daily_summary: StageCount,
    pub thank_you: StageCount,
    pub retry: StageCount,
    pub pages_archived: usize,
    pub stage_errors: usize,
}

impl QueueReport {
    pub fn paused() -> Self {
        Self {
            paused: true,
            ..Default::default()
        }
    }

    pub fn total_sent(&self) -> usize {
        [
            self.day_before,
            self.morning_of,
            self.uncovered,
            self.daily_summary,
            self.thank_you,
            self.retry,
        ]
        .iter()
        .map(|s| s.sent)
        .sum()
    }
}

/// What the email log already holds for a dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prior {
    Nothing,
    Sent,
    /// Pending, skipped, or a failure the retry stage still owns.
    Blocked,
}

/// Mutable state of a single pass.
struct Run {
    now: DateTime<Utc>,
    today: NaiveDate,
    /// Log rows written by this pass; the retry stage leaves them for the
    /// next one.
    fresh: HashSet<i64>,
    pages: HashMap<PageId, Option<SupportPage>>,
    report: QueueReport,
}

/// Dates from `max(start, tomorrow)` through the end with no confirmed
/// signup in either slot. Paused Shabbat days are not counted.
pub fn uncovered_dates(page: &SupportPage, signups: &[MealSignup], today: NaiveDate) -> Vec<NaiveDate> {
    let Some(tomorrow) = today.succ_opt() else {
        return Vec::new();
    };
    let from = page.start_date.max(tomorrow);
    dates_between(from, page.end_date)
        .filter(|d| !(page.pause_shabbat && is_shabbat_day(*d)))
        .filter(|d| !signups.iter().any(|s| s.is_confirmed() && s.meal_date == *d))
        .collect()
}

pub struct NotificationQueue {
    ctx: ShivaContext,
    mailer: Mailer,
}

impl NotificationQueue {
    pub fn new(ctx: ShivaContext) -> Self {
        let mailer = Mailer::new(ctx.clone());
        Self { ctx, mailer }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> QueueReport {
        let local = self.ctx.local;
        if local.in_shabbat_pause(now) {
            tracing::info!("Shabbat pause in effect, skipping notification run");
            return QueueReport::paused();
        }

        let local_now = local.local(now);
        let hour = local_now.hour();
        let mut run = Run {
            now,
            today: local_now.date(),
            fresh: HashSet::new(),
            pages: HashMap::new(),
            report: QueueReport::default(),
        };

        if hour >= DAY_BEFORE_HOUR {
            let result = self.reminders(&mut run, ReminderFlag::DayBefore).await;
            self.finish_stage("day-before reminders", result, &mut run);
        }
        if hour >= MORNING_OF_HOUR {
            let result = self.reminders(&mut run, ReminderFlag::MorningOf).await;
            self.finish_stage("morning-of reminders", result, &mut run);
        }
        if hour >= UNCOVERED_HOUR {
            let result = self.uncovered_alerts(&mut run).await;
            self.finish_stage("uncovered alerts", result, &mut run);
        }
        if hour >= DAILY_SUMMARY_HOUR {
            let result = self.daily_summaries(&mut run).await;
            self.finish_stage("daily summaries", result, &mut run);
        }
        let result = self.thank_you_notes(&mut run).await;
        self.finish_stage("thank-you notes", result, &mut run);
        let result = self.retry_failed(&mut run).await;
        self.finish_stage("retries", result, &mut run);

        run.report
    }

    fn finish_stage(&self, stage: &str, result: ShivaResult<()>, run: &mut Run) {
        if let Err(e) = result {
            tracing::error!("Notification stage {} failed: {}", stage, e);
            run.report.stage_errors += 1;
        }
    }

    async fn page(&self, run: &mut Run, page_id: PageId) -> ShivaResult<Option<SupportPage>> {
        if let Some(cached) = run.pages.get(&page_id) {
            return Ok(cached.clone());
        }
        let page = self.ctx.store.get_page(page_id).await?;
        run.pages.insert(page_id, page.clone());
        Ok(page)
    }

    async fn prior(&self, query: &EmailLogQuery, now: DateTime<Utc>) -> ShivaResult<Prior> {
        let rows = self.ctx.store.email_log_matching(query).await?;
        if rows.iter().any(|e| e.status == EmailStatus::Sent) {
            return Ok(Prior::Sent);
        }
        let retry_since = now - Duration::hours(RETRY_WINDOW_HOURS);
        if rows
            .iter()
            .any(|e| e.status != EmailStatus::Failed || e.created_at >= retry_since)
        {
            return Ok(Prior::Blocked);
        }
        Ok(Prior::Nothing)
    }

    async fn send(&self, run: &mut Run, letter: Letter) -> ShivaResult<EmailStatus> {
        let delivered = self.mailer.deliver(letter).await?;
        run.fresh.insert(delivered.log_id);
        Ok(delivered.status)
    }

    async fn reminders(&self, run: &mut Run, flag: ReminderFlag) -> ShivaResult<()> {
        let (kind, date) = match flag {
            ReminderFlag::DayBefore => (EmailKind::DayBeforeReminder, run.today.succ_opt().unwrap_or(run.today)),
            ReminderFlag::MorningOf => (EmailKind::MorningOfReminder, run.today),
        };

        for signup in self.ctx.store.confirmed_signups_on(date).await? {
            let already = match flag {
                ReminderFlag::DayBefore => signup.reminder_day_before_sent,
                ReminderFlag::MorningOf => signup.reminder_morning_of_sent,
            };
            if already {
                continue;
            }

            let query = EmailLogQuery::new(signup.page_id, kind).signup(signup.id);
            match self.prior(&query, run.now).await? {
                Prior::Sent => {
                    // Sent but the flag write was lost.
                    self.ctx.store.mark_reminder_sent(signup.id, flag).await?;
                    continue;
                }
                Prior::Blocked => continue,
                Prior::Nothing => {}
            }

            let Some(page) = self.page(run, signup.page_id).await?.filter(|p| p.is_active()) else {
                continue;
            };
            let templates = self.mailer.templates();
            let content = match flag {
                ReminderFlag::DayBefore => templates.day_before_reminder(&page, &signup),
                ReminderFlag::MorningOf => templates.morning_of_reminder(&page, &signup),
            };
            let status = self
                .send(
                    run,
                    Letter {
                        page_id: page.id,
                        kind,
                        to: signup.volunteer_email.clone(),
                        to_name: Some(signup.volunteer_name.clone()),
                        signup_id: Some(signup.id),
                        content,
                    },
                )
                .await?;
            if status == EmailStatus::Sent {
                self.ctx.store.mark_reminder_sent(signup.id, flag).await?;
            }
            match flag {
                ReminderFlag::DayBefore => run.report.day_before.tally(status),
                ReminderFlag::MorningOf => run.report.morning_of.tally(status),
            }
        }
        Ok(())
    }

    /// True when a row of `kind` for this page was already written today.
    async fn organizer_email_done_today(&self, run: &Run, page_id: PageId, kind: EmailKind) -> ShivaResult<bool> {
        let start_of_day = self.ctx.local.start_of_day(run.today);
        let query = EmailLogQuery::new(page_id, kind).since(start_of_day);
        Ok(!self.ctx.store.email_log_matching(&query).await?.is_empty())
    }

    async fn uncovered_alerts(&self, run: &mut Run) -> ShivaResult<()> {
        for page in self.ctx.store.active_pages().await? {
            if !page.notification_prefs.uncovered_alert || page.end_date < run.today {
                continue;
            }
            let signups = self.ctx.store.signups_for_page(page.id).await?;
            let uncovered = uncovered_dates(&page, &signups, run.today);
            if uncovered.is_empty() {
                continue;
            }
            if self
                .organizer_email_done_today(run, page.id, EmailKind::UncoveredAlert)
                .await?
            {
                continue;
            }

            let content = self.mailer.templates().uncovered_alert(&page, &uncovered);
            let status = self
                .send(
                    run,
                    Letter {
                        page_id: page.id,
                        kind: EmailKind::UncoveredAlert,
                        to: page.organizer_email.clone(),
                        to_name: Some(page.organizer_name.clone()),
                        signup_id: None,
                        content,
                    },
                )
                .await?;
            run.report.uncovered.tally(status);
        }
        Ok(())
    }

    async fn daily_summaries(&self, run: &mut Run) -> ShivaResult<()> {
        for page in self.ctx.store.active_pages().await? {
            if !page.notification_prefs.daily_summary || !page.contains(run.today) {
                continue;
            }
            if self
                .organizer_email_done_today(run, page.id, EmailKind::DailySummary)
                .await?
            {
                continue;
            }

            let signups = self.ctx.store.signups_for_page(page.id).await?;
            let content = self.mailer.templates().daily_summary(&page, run.today, &signups);
            let status = self
                .send(
                    run,
                    Letter {
                        page_id: page.id,
                        kind: EmailKind::DailySummary,
                        to: page.organizer_email.clone(),
                        to_name: Some(page.organizer_name.clone()),
                        signup_id: None,
                        content,
                    },
                )
                .await?;
            run.report.daily_summary.tally(status);
        }
        Ok(())
    }

    /// Pages whose shiva ended yesterday get one note per distinct volunteer
    /// email and are then archived. A page whose flag is already claimed
    /// (manual dispatch or an interrupted pass) still gets archived; the
    /// email log decides which volunteers are already covered.
    async fn thank_you_notes(&self, run: &mut Run) -> ShivaResult<()> {
        let Some(yesterday) = run.today.pred_opt() else {
            return Ok(());
        };

        for page in self.ctx.store.active_pages().await? {
            if page.end_date != yesterday {
                continue;
            }
            if !page.thank_you_sent && !self.ctx.store.claim_thank_you(page.id).await? {
                tracing::debug!("Thank-you flag for support page {} claimed elsewhere", page.id);
            }

            let mut seen = HashSet::new();
            for signup in self.ctx.store.signups_for_page(page.id).await? {
                let email = signup.volunteer_email.to_lowercase();
                if !signup.is_confirmed() || !seen.insert(email.clone()) {
                    continue;
                }
                let query = EmailLogQuery::new(page.id, EmailKind::ThankYou).recipient(email.clone());
                if self.prior(&query, run.now).await? != Prior::Nothing {
                    continue;
                }

                let content = self.mailer.templates().thank_you(&page, Some(&signup.volunteer_name));
                let status = self
                    .send(
                        run,
                        Letter {
                            page_id: page.id,
                            kind: EmailKind::ThankYou,
                            to: email,
                            to_name: Some(signup.volunteer_name.clone()),
                            signup_id: None,
                            content,
                        },
                    )
                    .await?;
                run.report.thank_you.tally(status);
            }

            if self.ctx.store.archive_page(page.id, run.now).await? {
                run.report.pages_archived += 1;
                tracing::info!("Support page {} archived after thank-you notes", page.id);
            }
        }
        Ok(())
    }

    async fn retry_failed(&self, run: &mut Run) -> ShivaResult<()> {
        let since = run.now - Duration::hours(RETRY_WINDOW_HOURS);
        for entry in self.ctx.store.failed_emails_since(since).await? {
            if run.fresh.contains(&entry.id) {
                continue;
            }
            if entry.attempts > MAX_RETRIES {
                self.mailer.skip(&entry, "retry limit reached").await?;
                run.report.retry.skipped += 1;
                continue;
            }

            let Some(content) = self.rebuild(run, &entry).await? else {
                self.mailer.skip(&entry, "content no longer available").await?;
                run.report.retry.skipped += 1;
                continue;
            };

            let status = self.mailer.redeliver(&entry, &content).await?;
            if status == EmailStatus::Sent {
                if let Some(signup_id) = entry.related_signup_id {
                    match entry.kind {
                        EmailKind::DayBeforeReminder => {
                            self.ctx.store.mark_reminder_sent(signup_id, ReminderFlag::DayBefore).await?
                        }
                        EmailKind::MorningOfReminder => {
                            self.ctx.store.mark_reminder_sent(signup_id, ReminderFlag::MorningOf).await?
                        }
                        _ => {}
                    }
                }
            }
            run.report.retry.tally(status);
        }
        Ok(())
    }

    async fn signup(&self, entry: &EmailLogEntry) -> ShivaResult<Option<MealSignup>> {
        match entry.related_signup_id {
            Some(id) => Ok(self.ctx.store.get_signup(id).await?),
            None => Ok(None),
        }
    }

    /// Builds the content of a failed row again from current state. `None`
    /// when the thing it was about no longer exists or no longer applies.
    async fn rebuild(&self, run: &mut Run, entry: &EmailLogEntry) -> ShivaResult<Option<Rendered>> {
        let Some(page) = self.page(run, entry.page_id).await? else {
            return Ok(None);
        };
        let store = self.ctx.store.as_ref();
        let templates = self.mailer.templates();

        let content = match entry.kind {
            EmailKind::DayBeforeReminder | EmailKind::MorningOfReminder => {
                match self.signup(entry).await?.filter(|s| s.is_confirmed() && page.is_active()) {
                    Some(signup) if entry.kind == EmailKind::DayBeforeReminder => {
                        Some(templates.day_before_reminder(&page, &signup))
                    }
                    Some(signup) => Some(templates.morning_of_reminder(&page, &signup)),
                    None => None,
                }
            }
            EmailKind::SignupConfirmation => self
                .signup(entry)
                .await?
                .map(|s| templates.signup_confirmation(&page, &[s])),
            EmailKind::NewSignupAlert => self
                .signup(entry)
                .await?
                .map(|s| templates.new_signup_alert(&page, &[s])),
            EmailKind::UncoveredAlert => {
                let signups = store.signups_for_page(page.id).await?;
                let uncovered = uncovered_dates(&page, &signups, run.today);
                (page.is_active() && !uncovered.is_empty()).then(|| templates.uncovered_alert(&page, &uncovered))
            }
            EmailKind::DailySummary => {
                let signups = store.signups_for_page(page.id).await?;
                (page.is_active() && page.contains(run.today))
                    .then(|| templates.daily_summary(&page, run.today, &signups))
            }
            EmailKind::ThankYou => Some(templates.thank_you(&page, entry.recipient_name.as_deref())),
            EmailKind::EmailVerification => page
                .verification_token
                .as_deref()
                .map(|token| templates.email_verification(&page, token)),
            EmailKind::CoOrganizerInvite => store
                .invites_for_page(page.id)
                .await?
                .into_iter()
                .find(|i| i.status == InviteStatus::Pending && i.email.eq_ignore_ascii_case(&entry.recipient_email))
                .map(|i| templates.co_organizer_invite(&i.invited_by, &i.name, &page.family_name, &i.token)),
            EmailKind::AccessApproved => store
                .access_requests_from(page.id, &entry.recipient_email)
                .await?
                .into_iter()
                .filter(|r| r.status == AccessRequestStatus::Approved)
                .find_map(|r| r.access_token)
                .map(|token| templates.access_approved(&page.id.to_string(), &page.family_name, &token)),
            EmailKind::AccessDenied => Some(templates.access_denied(&page.family_name)),
            EmailKind::OrganizerUpdate => store
                .updates_for_page(page.id)
                .await?
                .first()
                .map(|u| templates.organizer_update(&page, u)),
            // The log row does not identify which request it announced.
            EmailKind::AccessRequest => None,
        };
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiva_core::types::MealSlot;
    use shiva_test_utils::{date, new_page, new_signup, seed_page, seed_signup, toronto, TestHarness};

    fn page_with(start: &str, end: &str, pause_shabbat: bool) -> SupportPage {
        let mut new = new_page(date(start), date(end));
        new.pause_shabbat = pause_shabbat;
        new.into_page()
    }

    fn confirmed(page: &SupportPage, day: &str) -> MealSignup {
        MealSignup {
            id: 1,
            page_id: page.id,
            volunteer_name: "Ari".into(),
            volunteer_email: "ari@example.com".into(),
            volunteer_phone: None,
            meal_date: date(day),
            slot: MealSlot::Lunch,
            servings: 4,
            description: None,
            will_serve: false,
            status: shiva_core::types::SignupStatus::Confirmed,
            alternative_type: None,
            alternative_note: None,
            signup_group_id: None,
            reminder_day_before_sent: false,
            reminder_morning_of_sent: false,
            created_at: page.created_at,
        }
    }

    #[test]
    fn uncovered_dates_start_tomorrow_and_skip_paused_shabbat() {
        // 2026-03-06 is a Friday.
        let page = page_with("2026-03-01", "2026-03-08", true);
        let signups = vec![confirmed(&page, "2026-03-05")];
        let uncovered = uncovered_dates(&page, &signups, date("2026-03-03"));
        assert_eq!(uncovered, vec![date("2026-03-04"), date("2026-03-08")]);
    }

    #[test]
    fn uncovered_dates_respect_page_start() {
        let page = page_with("2026-03-10", "2026-03-11", false);
        assert_eq!(
            uncovered_dates(&page, &[], date("2026-03-01")),
            vec![date("2026-03-10"), date("2026-03-11")]
        );
    }

    #[tokio::test]
    async fn shabbat_pause_touches_nothing() {
        // Friday 2026-03-06 19:30 Toronto.
        let h = TestHarness::new(toronto(2026, 3, 6, 19, 30));
        let queue = NotificationQueue::new(h.ctx.clone());
        let calls = h.store.calls();

        let report = queue.run_once(h.ctx.now()).await;
        assert_eq!(report, QueueReport::paused());
        assert_eq!(h.store.calls(), calls);
        assert_eq!(h.provider.attempts(), 0);
    }

    #[tokio::test]
    async fn morning_reminder_waits_for_its_window() {
        let h = TestHarness::new(toronto(2026, 3, 3, 7, 45));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        seed_signup(
            h.store.as_ref(),
            new_signup(&page, date("2026-03-03"), MealSlot::Lunch, "Ari Gold", "ari@example.com"),
        )
        .await;
        let queue = NotificationQueue::new(h.ctx.clone());

        assert_eq!(queue.run_once(h.ctx.now()).await.morning_of.sent, 0);

        h.clock.set(toronto(2026, 3, 3, 8, 0));
        let report = queue.run_once(h.ctx.now()).await;
        assert_eq!(report.morning_of.sent, 1);
        assert!(h.store.signups()[0].reminder_morning_of_sent);
    }

    #[tokio::test]
    async fn sent_row_without_flag_is_reconciled_not_resent() {
        let h = TestHarness::new(toronto(2026, 3, 3, 9, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        let signup = seed_signup(
            h.store.as_ref(),
            new_signup(&page, date("2026-03-03"), MealSlot::Lunch, "Ari Gold", "ari@example.com"),
        )
        .await;
        let mailer = Mailer::new(h.ctx.clone());
        mailer
            .deliver(Letter {
                page_id: page.id,
                kind: EmailKind::MorningOfReminder,
                to: signup.volunteer_email.clone(),
                to_name: None,
                signup_id: Some(signup.id),
                content: mailer.templates().morning_of_reminder(&page, &signup),
            })
            .await
            .unwrap();

        let queue = NotificationQueue::new(h.ctx.clone());
        let report = queue.run_once(h.ctx.now()).await;
        assert_eq!(report.morning_of.sent, 0);
        assert_eq!(h.provider.attempts(), 1);
        assert!(h.store.signups()[0].reminder_morning_of_sent);
    }

    #[tokio::test]
    async fn reminders_skip_archived_pages() {
        let h = TestHarness::new(toronto(2026, 3, 3, 9, 0));
        let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
        seed_signup(
            h.store.as_ref(),
            new_signup(&page, date("2026-03-03"), MealSlot::Lunch, "Ari Gold", "ari@example.com"),
        )
        .await;
        h.ctx.store.archive_page(page.id, h.ctx.now()).await.unwrap();

        let queue = NotificationQueue::new(h.ctx.clone());
        assert_eq!(queue.run_once(h.ctx.now()).await.total_sent(), 0);
    }
}
