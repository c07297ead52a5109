use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    support_pages (id) {
        id -> Uuid,
        obituary_id -> Nullable<Text>,
        organizer_name -> Text,
        organizer_email -> Text,
        organizer_phone -> Nullable<Text>,
        organizer_relationship -> Text,
        family_name -> Text,
        address -> Text,
        city -> Nullable<Text>,
        neighborhood -> Nullable<Text>,
        start_date -> Date,
        end_date -> Date,
        pause_shabbat -> Bool,
        guest_count -> Nullable<Integer>,
        dietary_notes -> Nullable<Text>,
        special_instructions -> Nullable<Text>,
        family_notes -> Nullable<Text>,
        donation_url -> Nullable<Text>,
        donation_label -> Nullable<Text>,
        visibility -> Text,
        magic_token -> Text,
        verification_token -> Nullable<Text>,
        verification_status -> Text,
        verified_at -> Nullable<Timestamptz>,
        notification_prefs -> Jsonb,
        status -> Text,
        thank_you_sent -> Bool,
        created_at -> Timestamptz,
        archived_at -> Nullable<Timestamptz>,
    }
}

table! {
    co_organizer_invites (id) {
        id -> BigInt,
        page_id -> Uuid,
        name -> Text,
        email -> Text,
        token -> Text,
        invited_by -> Text,
        status -> Text,
        created_at -> Timestamptz,
        accepted_at -> Nullable<Timestamptz>,
        revoked_at -> Nullable<Timestamptz>,
    }
}

table! {
    access_requests (id) {
        id -> BigInt,
        page_id -> Uuid,
        requester_name -> Text,
        requester_email -> Text,
        message -> Nullable<Text>,
        organizer_key -> Text,
        status -> Text,
        access_token -> Nullable<Text>,
        created_at -> Timestamptz,
        decided_at -> Nullable<Timestamptz>,
    }
}

table! {
    meal_signups (id) {
        id -> BigInt,
        page_id -> Uuid,
        volunteer_name -> Text,
        volunteer_email -> Text,
        volunteer_phone -> Nullable<Text>,
        meal_date -> Date,
        slot -> Text,
        servings -> Integer,
        description -> Nullable<Text>,
        will_serve -> Bool,
        status -> Text,
        alternative_type -> Nullable<Text>,
        alternative_note -> Nullable<Text>,
        signup_group_id -> Nullable<Uuid>,
        reminder_day_before_sent -> Bool,
        reminder_morning_of_sent -> Bool,
        created_at -> Timestamptz,
    }
}

table! {
    email_log (id) {
        id -> BigInt,
        page_id -> Uuid,
        kind -> Text,
        recipient_email -> Text,
        recipient_name -> Nullable<Text>,
        related_signup_id -> Nullable<BigInt>,
        status -> Text,
        error_message -> Nullable<Text>,
        provider_message_id -> Nullable<Text>,
        attempts -> Integer,
        created_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
    }
}

table! {
    organizer_updates (id) {
        id -> BigInt,
        page_id -> Uuid,
        message -> Text,
        author_name -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    page_reports (id) {
        id -> BigInt,
        page_id -> Uuid,
        reason -> Text,
        details -> Nullable<Text>,
        reporter_email -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    audit_counters (event, page_key, day) {
        event -> Text,
        page_key -> Text,
        day -> Date,
        count -> BigInt,
    }
}

joinable!(co_organizer_invites -> support_pages (page_id));
joinable!(access_requests -> support_pages (page_id));
joinable!(meal_signups -> support_pages (page_id));
joinable!(email_log -> support_pages (page_id));
joinable!(organizer_updates -> support_pages (page_id));
joinable!(page_reports -> support_pages (page_id));

allow_tables_to_appear_in_same_query!(
    support_pages,
    co_organizer_invites,
    access_requests,
    meal_signups,
    email_log,
    organizer_updates,
    page_reports,
    audit_counters,
);
