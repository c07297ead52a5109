use std::collections::HashSet;
use std::sync::Arc;

use shiva_core::types::{MealSlot, SignupStatus};
use shiva_core::{AuditEvent, ShivaError};
use shiva_support::{
    AccessBroker, AccessRequestInput, CreateOutcome, MealScheduler, MultiSignupRequest, NewPageRequest,
    SignupRejection, SignupRequest, SupportRegistry,
};
use shiva_test_utils::{date, new_page, new_signup, seed_page, seed_signup, toronto, TestHarness};

fn page_request(start: &str, end: &str) -> NewPageRequest {
    NewPageRequest {
        organizer_name: Some("Sarah Cohen".into()),
        organizer_email: Some("sarah@example.com".into()),
        organizer_relationship: Some("Daughter".into()),
        family_name: Some("Cohen".into()),
        address: Some("12 Bathurst St".into()),
        city: Some("Toronto".into()),
        start_date: Some(start.into()),
        end_date: Some(end.into()),
        pause_shabbat: true,
        privacy_consent: true,
        ..Default::default()
    }
}

fn volunteer(name: &str, email: &str) -> SignupRequest {
    SignupRequest {
        volunteer_name: Some(name.into()),
        volunteer_email: Some(email.into()),
        slot: Some("Dinner".into()),
        privacy_consent: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn paused_shabbat_dates_are_marked_in_slot_listing() {
    let mut h = TestHarness::new(toronto(2026, 2, 25, 12, 0));
    let registry = SupportRegistry::new(h.ctx.clone());
    let scheduler = MealScheduler::new(h.ctx.clone());

    let CreateOutcome::Created { page, .. } = registry.create(page_request("2026-03-01", "2026-03-07")).await.unwrap()
    else {
        panic!("expected Created");
    };

    let slots = scheduler.list_slots(page.id).await.unwrap();
    assert_eq!(slots.len(), 7);

    let friday = slots.iter().find(|d| d.date == date("2026-03-06")).unwrap();
    assert_eq!(friday.weekday, "Friday");
    assert!(friday.is_shabbat);
    assert!(friday.paused);
    assert!(!friday.lunch_taken);

    let sunday = &slots[0];
    assert_eq!(sunday.weekday, "Sunday");
    assert!(!sunday.paused);

    assert!(h.audit_events().contains(&AuditEvent::OrganizeComplete));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_signups_for_one_slot_confirm_exactly_one() {
    let h = TestHarness::new(toronto(2026, 2, 28, 12, 0));
    let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
    let scheduler = Arc::new(MealScheduler::new(h.ctx.clone()));
    let page_id = page.id;

    let mut handles = Vec::new();
    for (name, email) in [("Ari Gold", "ari@example.com"), ("Ben Katz", "ben@example.com")] {
        let scheduler = scheduler.clone();
        let mut req = volunteer(name, email);
        req.meal_date = Some("2026-03-02".into());
        handles.push(tokio::spawn(async move { scheduler.signup_single(page_id, req).await }));
    }

    let mut confirmed = 0;
    let mut taken = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(ShivaError::Conflict(m)) => {
                assert_eq!(m, SignupRejection::SlotTaken.to_string());
                taken += 1;
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!((confirmed, taken), (1, 1));

    let stored: Vec<_> = h.store.signups().into_iter().filter(|s| s.is_confirmed()).collect();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn multi_date_signup_books_free_dates_under_one_group() {
    let mut h = TestHarness::new(toronto(2026, 2, 28, 12, 0));
    let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
    seed_signup(
        h.store.as_ref(),
        new_signup(&page, date("2026-03-03"), MealSlot::Dinner, "Ben Katz", "ben@example.com"),
    )
    .await;
    let scheduler = MealScheduler::new(h.ctx.clone());

    let outcome = scheduler
        .signup_multi(
            page.id,
            MultiSignupRequest {
                volunteer: volunteer("Ari Gold", "ari@example.com"),
                meal_dates: vec!["2026-03-02".into(), "2026-03-03".into(), "2026-03-04".into(), "2026-03-02".into()],
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.signups.len(), 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].date, "2026-03-03");
    assert_eq!(outcome.errors[0].code, "slot_taken");

    let groups: HashSet<_> = outcome.signups.iter().map(|s| s.signup_group_id).collect();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups.into_iter().next().flatten(), Some(outcome.group_id));
    assert!(outcome.signups.iter().all(|s| s.status == SignupStatus::Confirmed));

    assert_eq!(h.audit_events(), vec![AuditEvent::MealSignupMulti]);
}

#[tokio::test]
async fn existing_signups_on_shabbat_survive_turning_the_pause_on() {
    let h = TestHarness::new(toronto(2026, 2, 28, 12, 0));
    let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-07"))).await;
    let scheduler = MealScheduler::new(h.ctx.clone());

    let mut friday = volunteer("Ari Gold", "ari@example.com");
    friday.meal_date = Some("2026-03-06".into());
    scheduler.signup_single(page.id, friday).await.unwrap();

    let mut paused = h.store.page(page.id).unwrap();
    paused.pause_shabbat = true;
    h.store.put_page(paused);

    let mut another = volunteer("Ben Katz", "ben@example.com");
    another.meal_date = Some("2026-03-07".into());
    assert!(matches!(scheduler.signup_single(page.id, another).await, Err(ShivaError::Validation(_))));

    let slots = scheduler.list_slots(page.id).await.unwrap();
    let friday = slots.iter().find(|d| d.date == date("2026-03-06")).unwrap();
    assert!(friday.paused);
    assert!(friday.dinner_taken);
}

#[tokio::test]
async fn access_request_for_public_page_is_rejected() {
    let h = TestHarness::new(toronto(2026, 2, 28, 12, 0));
    let page = seed_page(h.store.as_ref(), new_page(date("2026-03-01"), date("2026-03-05"))).await;
    let broker = AccessBroker::new(h.ctx.clone());

    let result = broker
        .request(AccessRequestInput {
            page_id: Some(page.id),
            name: Some("Rachel Levy".into()),
            email: Some("rachel@example.com".into()),
            message: None,
        })
        .await;
    match result {
        Err(ShivaError::Validation(m)) => assert_eq!(m, "This page is public"),
        other => panic!("expected Validation, got {other:?}"),
    }
}
