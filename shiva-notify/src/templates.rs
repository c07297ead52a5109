//! Subject, HTML and plain-text bodies for every email kind.

use chrono::NaiveDate;

use shiva_core::types::{MealSignup, OrganizerUpdate, SupportPage};

/// A rendered email, not yet addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub html: String,
    pub text: String,
}

fn html_escape(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            '\'' => "&#x27;".to_string(),
            _ => c.to_string(),
        })
        .collect()
}

pub fn display_date(date: NaiveDate) -> String {
    date.format("%A, %B %-d").to_string()
}

/// Paragraphs are escaped; a link, when given, is rendered as a button.
fn layout(heading: &str, paragraphs: &[String], link: Option<(&str, &str)>, from_name: &str) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| {
            format!(
                r#"        <p style="margin: 0 0 12px 0; font-size: 16px; color: #495057;">{}</p>
"#,
                html_escape(p)
            )
        })
        .collect();
    let button = link
        .map(|(label, url)| {
            format!(
                r#"        <p style="margin: 20px 0 0 0;"><a href="{}" style="background-color: #3e2723; color: #ffffff; padding: 10px 18px; border-radius: 6px; text-decoration: none;">{}</a></p>
"#,
                html_escape(url),
                html_escape(label)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="font-family: Georgia, 'Times New Roman', serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="background-color: #faf7f2; border-radius: 8px; padding: 24px; margin-bottom: 20px;">
        <h1 style="margin: 0 0 16px 0; font-size: 22px; color: #3e2723;">{}</h1>
{}{}    </div>
    <p style="font-size: 14px; color: #6c757d; margin-top: 20px;">
        Sent with care by {}.
    </p>
</body>
</html>"#,
        html_escape(heading),
        body,
        button,
        html_escape(from_name)
    )
}

fn plain(heading: &str, paragraphs: &[String], link: Option<(&str, &str)>, from_name: &str) -> String {
    let mut text = format!("{}\n\n", heading);
    for p in paragraphs {
        text.push_str(p);
        text.push_str("\n\n");
    }
    if let Some((label, url)) = link {
        text.push_str(&format!("{}: {}\n\n", label, url));
    }
    text.push_str(&format!("Sent with care by {}.", from_name));
    text
}

/// Builds emails with the sender name and public site address baked in.
#[derive(Debug, Clone)]
pub struct Templates {
    base_url: String,
    from_name: String,
}

impl Templates {
    pub fn new(base_url: &str, from_name: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            from_name: from_name.to_string(),
        }
    }

    fn render(&self, subject: String, heading: &str, paragraphs: Vec<String>, link: Option<(&str, String)>) -> Rendered {
        let link = link.as_ref().map(|(label, url)| (*label, url.as_str()));
        Rendered {
            subject,
            html: layout(heading, &paragraphs, link, &self.from_name),
            text: plain(heading, &paragraphs, link, &self.from_name),
        }
    }

    pub fn page_url(&self, page: &SupportPage) -> String {
        format!("{}/shiva/{}", self.base_url, page.id)
    }

    pub fn organizer_url(&self, page_id: &str, token: &str) -> String {
        format!("{}/shiva/{}?token={}", self.base_url, page_id, token)
    }

    fn drop_off(page: &SupportPage) -> Vec<String> {
        let mut lines = vec![format!("Address: {}", page.full_address())];
        if let Some(instructions) = &page.special_instructions {
            lines.push(format!("Drop-off instructions: {}", instructions));
        }
        if let Some(dietary) = &page.dietary_notes {
            lines.push(format!("Dietary notes: {}", dietary));
        }
        lines
    }

    fn meal_line(signup: &MealSignup) -> String {
        format!("{} ({}) for {} people", display_date(signup.meal_date), signup.slot, signup.servings)
    }

    pub fn signup_confirmation(&self, page: &SupportPage, signups: &[MealSignup]) -> Rendered {
        let volunteer = signups
            .first()
            .map(|s| s.volunteer_name.as_str())
            .unwrap_or("Friend");
        let mut paragraphs = vec![format!(
            "Thank you, {}. You are signed up to bring a meal to the {} family.",
            shiva_core::types::first_name(volunteer),
            page.family_name
        )];
        paragraphs.extend(signups.iter().map(Self::meal_line));
        paragraphs.extend(Self::drop_off(page));
        self.render(
            format!("Your meal signup for the {} family", page.family_name),
            "Thank you for signing up",
            paragraphs,
            Some(("View the support page", self.page_url(page))),
        )
    }

    pub fn new_signup_alert(&self, page: &SupportPage, signups: &[MealSignup]) -> Rendered {
        let volunteer = signups
            .first()
            .map(|s| s.volunteer_name.as_str())
            .unwrap_or("A volunteer");
        let mut paragraphs = vec![format!("{} signed up to bring a meal.", volunteer)];
        paragraphs.extend(signups.iter().map(Self::meal_line));
        if let Some(description) = signups.first().and_then(|s| s.description.as_ref()) {
            paragraphs.push(format!("They plan to bring: {}", description));
        }
        self.render(
            format!("New meal signup from {}", volunteer),
            "A new meal is on the way",
            paragraphs,
            Some(("Open your dashboard", self.organizer_url(&page.id.to_string(), &page.magic_token))),
        )
    }

    pub fn day_before_reminder(&self, page: &SupportPage, signup: &MealSignup) -> Rendered {
        let mut paragraphs = vec![format!(
            "A reminder that you are bringing {} to the {} family tomorrow, {}.",
            signup.slot.as_str().to_lowercase(),
            page.family_name,
            display_date(signup.meal_date)
        )];
        paragraphs.extend(Self::drop_off(page));
        self.render(
            format!("Reminder: your meal for the {} family is tomorrow", page.family_name),
            "Your meal is tomorrow",
            paragraphs,
            Some(("View the support page", self.page_url(page))),
        )
    }

    pub fn morning_of_reminder(&self, page: &SupportPage, signup: &MealSignup) -> Rendered {
        let mut paragraphs = vec![format!(
            "Today you are bringing {} to the {} family.",
            signup.slot.as_str().to_lowercase(),
            page.family_name
        )];
        paragraphs.extend(Self::drop_off(page));
        self.render(
            format!("Today: {} for the {} family", signup.slot, page.family_name),
            "Your meal is today",
            paragraphs,
            Some(("View the support page", self.page_url(page))),
        )
    }

    pub fn uncovered_alert(&self, page: &SupportPage, uncovered: &[NaiveDate]) -> Rendered {
        let mut paragraphs = vec![format!(
            "{} upcoming {} no meals yet:",
            uncovered.len(),
            if uncovered.len() == 1 { "day has" } else { "days have" }
        )];
        paragraphs.extend(uncovered.iter().map(|d| display_date(*d)));
        paragraphs.push("Sharing the page with friends and community often fills these quickly.".to_string());
        self.render(
            format!("{} days still need meals", uncovered.len()),
            "Some days still need meals",
            paragraphs,
            Some(("Share the support page", self.page_url(page))),
        )
    }

    pub fn daily_summary(&self, page: &SupportPage, today: NaiveDate, signups: &[MealSignup]) -> Rendered {
        let tomorrow = today.succ_opt().unwrap_or(today);
        let mut paragraphs = vec![format!("Meals for the {} family today and tomorrow.", page.family_name)];
        for (label, day) in [("Today", today), ("Tomorrow", tomorrow)] {
            let on_day: Vec<&MealSignup> = signups
                .iter()
                .filter(|s| s.is_confirmed() && s.meal_date == day)
                .collect();
            if on_day.is_empty() {
                paragraphs.push(format!("{}: no meals scheduled", label));
            }
            for s in on_day {
                paragraphs.push(format!("{}: {} from {}", label, s.slot, s.volunteer_name));
            }
        }
        self.render(
            format!("Daily meal summary for {}", display_date(today)),
            "Today's meal summary",
            paragraphs,
            Some(("Open your dashboard", self.organizer_url(&page.id.to_string(), &page.magic_token))),
        )
    }

    pub fn thank_you(&self, page: &SupportPage, volunteer_name: Option<&str>) -> Rendered {
        let name = volunteer_name.map(shiva_core::types::first_name).unwrap_or("Friend");
        self.render(
            format!("Thank you from the {} family", page.family_name),
            "Thank you",
            vec![
                format!("Dear {},", name),
                format!(
                    "The {} family is grateful for the meal you brought during the shiva. Your kindness made a hard week easier.",
                    page.family_name
                ),
                format!("With gratitude, {}", page.organizer_name),
            ],
            None,
        )
    }

    pub fn email_verification(&self, page: &SupportPage, verification_token: &str) -> Rendered {
        self.render(
            "Please verify your email".to_string(),
            "Confirm your support page",
            vec![
                format!("Thank you for organizing support for the {} family.", page.family_name),
                "Please confirm your email address so we know the page is in good hands.".to_string(),
                format!(
                    "Keep this email. Your private dashboard link is {}",
                    self.organizer_url(&page.id.to_string(), &page.magic_token)
                ),
            ],
            Some((
                "Verify email",
                format!("{}/api/shiva/verify?token={}", self.base_url, verification_token),
            )),
        )
    }

    pub fn co_organizer_invite(
        &self,
        inviter_name: &str,
        invitee_name: &str,
        family_name: &str,
        token: &str,
    ) -> Rendered {
        self.render(
            format!("{} invited you to help organize support for the {} family", inviter_name, family_name),
            "You're invited to co-organize",
            vec![
                format!("Hi {},", shiva_core::types::first_name(invitee_name)),
                format!(
                    "{} asked you to help coordinate meals for the {} family during the shiva.",
                    inviter_name, family_name
                ),
            ],
            Some((
                "Accept invitation",
                format!("{}/api/shiva/co-organizer/accept?token={}", self.base_url, token),
            )),
        )
    }

    pub fn access_request(
        &self,
        request_id: i64,
        organizer_key: &str,
        family_name: &str,
        requester_name: &str,
        requester_email: &str,
        message: Option<&str>,
    ) -> Rendered {
        let mut paragraphs = vec![format!(
            "{} ({}) asked to see the support page for the {} family.",
            requester_name, requester_email, family_name
        )];
        if let Some(message) = message {
            paragraphs.push(format!("Their message: {}", message));
        }
        let approve = format!(
            "{}/api/shiva/access/approve?request_id={}&organizer_key={}",
            self.base_url, request_id, organizer_key
        );
        paragraphs.push(format!(
            "To decline, visit {}/api/shiva/access/deny?request_id={}&organizer_key={}",
            self.base_url, request_id, organizer_key
        ));
        self.render(
            format!("{} requested access to the {} support page", requester_name, family_name),
            "New access request",
            paragraphs,
            Some(("Approve access", approve)),
        )
    }

    pub fn access_approved(&self, page_id: &str, family_name: &str, access_token: &str) -> Rendered {
        self.render(
            format!("You can now view the {} support page", family_name),
            "Access approved",
            vec![format!("The organizer approved your request to view the {} family's page.", family_name)],
            Some((
                "View the support page",
                format!("{}/shiva/{}?access={}", self.base_url, page_id, access_token),
            )),
        )
    }

    pub fn access_denied(&self, family_name: &str) -> Rendered {
        self.render(
            format!("About your request for the {} support page", family_name),
            "Access request",
            vec![format!(
                "The organizer of the {} family's page was not able to approve your request. Thank you for thinking of them.",
                family_name
            )],
            None,
        )
    }

    pub fn organizer_update(&self, page: &SupportPage, update: &OrganizerUpdate) -> Rendered {
        self.render(
            format!("An update from the {} family", page.family_name),
            "A message from the organizers",
            vec![update.message.clone(), format!("From {}", update.author_name)],
            Some(("View the support page", self.page_url(page))),
        )
    }
}
