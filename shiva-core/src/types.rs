use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type PageId = Uuid;

/// A stored or submitted string that names no known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}
text_enum!(Visibility { Public => "public", Private => "private" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    AdminApproved,
}
text_enum!(VerificationStatus {
    Pending => "pending",
    Verified => "verified",
    AdminApproved => "admin_approved",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Active,
    Archived,
}
text_enum!(PageStatus { Active => "active", Archived => "archived" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Revoked,
}
text_enum!(InviteStatus {
    Pending => "pending",
    Accepted => "accepted",
    Revoked => "revoked",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRequestStatus {
    Pending,
    Approved,
    Denied,
}
text_enum!(AccessRequestStatus {
    Pending => "pending",
    Approved => "approved",
    Denied => "denied",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MealSlot {
    Lunch,
    Dinner,
}
text_enum!(MealSlot { Lunch => "Lunch", Dinner => "Dinner" });

impl MealSlot {
    pub const ALL: [MealSlot; 2] = [MealSlot::Lunch, MealSlot::Dinner];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignupStatus {
    Confirmed,
    Alternative,
    Cancelled,
}
text_enum!(SignupStatus {
    Confirmed => "confirmed",
    Alternative => "alternative",
    Cancelled => "cancelled",
});

/// Non-meal gestures logged next to meal signups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativeType {
    GiftCard,
    GiftBasket,
    VendorMeal,
}
text_enum!(AlternativeType {
    GiftCard => "gift_card",
    GiftBasket => "gift_basket",
    VendorMeal => "vendor_meal",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}
text_enum!(EmailStatus {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
    Skipped => "skipped",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    DayBeforeReminder,
    MorningOfReminder,
    UncoveredAlert,
    DailySummary,
    ThankYou,
    SignupConfirmation,
    NewSignupAlert,
    CoOrganizerInvite,
    AccessRequest,
    AccessApproved,
    AccessDenied,
    EmailVerification,
    OrganizerUpdate,
}
text_enum!(EmailKind {
    DayBeforeReminder => "day_before_reminder",
    MorningOfReminder => "morning_of_reminder",
    UncoveredAlert => "uncovered_alert",
    DailySummary => "daily_summary",
    ThankYou => "thank_you",
    SignupConfirmation => "signup_confirmation",
    NewSignupAlert => "new_signup_alert",
    CoOrganizerInvite => "co_organizer_invite",
    AccessRequest => "access_request",
    AccessApproved => "access_approved",
    AccessDenied => "access_denied",
    EmailVerification => "email_verification",
    OrganizerUpdate => "organizer_update",
});

/// Organizer notification toggles.
///
/// Persisted as an object with exactly these three keys. Reading fills any
/// missing key with `true` and ignores unknown keys; writing always stores
/// the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    #[serde(default = "enabled")]
    pub instant: bool,
    #[serde(default = "enabled")]
    pub daily_summary: bool,
    #[serde(default = "enabled")]
    pub uncovered_alert: bool,
}

fn enabled() -> bool {
    true
}

impl Default for NotificationPrefs {
    fn default() -> Self {
        Self {
            instant: true,
            daily_summary: true,
            uncovered_alert: true,
        }
    }
}

impl NotificationPrefs {
    /// Lenient read of a stored or submitted value. Non-boolean values for a
    /// known key fall back to the default rather than failing the record.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let flag = |key: &str| value.get(key).and_then(|v| v.as_bool()).unwrap_or(true);
        Self {
            instant: flag("instant"),
            daily_summary: flag("daily_summary"),
            uncovered_alert: flag("uncovered_alert"),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "instant": self.instant,
            "daily_summary": self.daily_summary,
            "uncovered_alert": self.uncovered_alert,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportPage {
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
    pub verification_token: Option<String>,
    pub verification_status: VerificationStatus,
    pub verified_at: Option<DateTime<Utc>>,
    pub notification_prefs: NotificationPrefs,
    pub status: PageStatus,
    pub thank_you_sent: bool,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl SupportPage {
    pub fn is_active(&self) -> bool {
        self.status == PageStatus::Active
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }

    pub fn organizer_first_name(&self) -> &str {
        first_name(&self.organizer_name)
    }

    /// Street address joined with the city, as handed to volunteers.
    pub fn full_address(&self) -> String {
        match self.city.as_deref() {
            Some(city) if !city.is_empty() => format!("{}, {}", self.address, city),
            _ => self.address.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoOrganizerInvite {
    pub id: i64,
    pub page_id: PageId,
    pub name: String,
    pub email: String,
    pub token: String,
    pub invited_by: String,
    pub status: InviteStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: i64,
    pub page_id: PageId,
    pub requester_name: String,
    pub requester_email: String,
    pub message: Option<String>,
    pub organizer_key: String,
    pub status: AccessRequestStatus,
    pub access_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealSignup {
    pub id: i64,
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
    pub reminder_day_before_sent: bool,
    pub reminder_morning_of_sent: bool,
    pub created_at: DateTime<Utc>,
}

impl MealSignup {
    pub fn is_confirmed(&self) -> bool {
        self.status == SignupStatus::Confirmed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailLogEntry {
    pub id: i64,
    pub page_id: PageId,
    pub kind: EmailKind,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub related_signup_id: Option<i64>,
    pub status: EmailStatus,
    pub error_message: Option<String>,
    pub provider_message_id: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizerUpdate {
    pub id: i64,
    pub page_id: PageId,
    pub message: String,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageReport {
    pub id: i64,
    pub page_id: PageId,
    pub reason: String,
    pub details: Option<String>,
    pub reporter_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// First whitespace-separated word of a name, or "Friend" when empty.
pub fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("Friend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefs_fill_missing_keys_and_drop_unknown_ones() {
        let stored = serde_json::json!({ "instant": false, "guestbook_digest": false });
        let prefs = NotificationPrefs::from_json(&stored);

        assert!(!prefs.instant);
        assert!(prefs.daily_summary);
        assert!(prefs.uncovered_alert);

        let written = prefs.to_json();
        let keys: Vec<&String> = written.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 3);
        assert!(written.get("guestbook_digest").is_none());
    }

    #[test]
    fn prefs_from_garbage_fall_back_to_defaults() {
        let prefs = NotificationPrefs::from_json(&serde_json::json!("not an object"));
        assert_eq!(prefs, NotificationPrefs::default());
    }

    #[test]
    fn text_enums_reject_unknown_values() {
        assert_eq!("gift_card".parse::<AlternativeType>(), Ok(AlternativeType::GiftCard));
        assert_eq!("Dinner".parse::<MealSlot>(), Ok(MealSlot::Dinner));

        let err = "breakfast".parse::<MealSlot>().unwrap_err();
        assert_eq!(err.kind, "MealSlot");
        assert_eq!(err.value, "breakfast");
    }

    #[test]
    fn email_kind_names_match_stored_text() {
        assert_eq!(EmailKind::DayBeforeReminder.as_str(), "day_before_reminder");
        assert_eq!("thank_you".parse::<EmailKind>(), Ok(EmailKind::ThankYou));
    }

    #[test]
    fn first_name_takes_leading_word() {
        assert_eq!(first_name("Sarah Cohen"), "Sarah");
        assert_eq!(first_name("   "), "Friend");
    }
}
