use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use shiva_api::router;
use shiva_core::store::NewPage;
use shiva_core::types::{MealSlot, SupportPage, Visibility};
use shiva_core::AuditEvent;
use shiva_test_utils::{date, new_page, new_signup, seed_page, seed_signup, toronto, TestHarness};

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn seeded(h: &TestHarness, page: NewPage) -> (Router, SupportPage) {
    let page = seed_page(h.store.as_ref(), page).await;
    (router(h.ctx.clone()), page)
}

#[tokio::test]
async fn health_reports_ok() {
    let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let (status, body) = call(&router(h.ctx.clone()), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn created_page_is_private_to_its_token() {
    let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let app = router(h.ctx.clone());

    let (status, created) = call(
        &app,
        Method::POST,
        "/api/shiva",
        Some(json!({
            "organizer_name": "Sarah Cohen",
            "organizer_email": "sarah@example.com",
            "organizer_relationship": "Daughter",
            "family_name": "Cohen",
            "shiva_address": "12 Bathurst St",
            "shiva_city": "Toronto",
            "shiva_start_date": "2026-03-03",
            "shiva_end_date": "2026-03-09",
            "privacy_consent": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "success");
    let id = created["id"].as_str().unwrap().to_string();
    let token = created["magic_token"].as_str().unwrap().to_string();

    // The verification email goes out immediately.
    assert_eq!(h.provider.sent_to("sarah@example.com").len(), 1);

    let (status, organizer) = call(&app, Method::GET, &format!("/api/shiva/{id}?token={token}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(organizer["view"], "organizer");
    assert_eq!(organizer["data"]["address"], "12 Bathurst St");
    assert!(organizer["data"].get("magic_token").is_none());

    let (status, public) = call(&app, Method::GET, &format!("/api/shiva/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(public["view"], "public");
    assert_eq!(public["data"]["access"], "full");
    assert!(public["data"].get("address").is_none());

    let (status, denied) = call(&app, Method::GET, &format!("/api/shiva/{id}?token=not-the-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(denied["status"], "error");
    assert_eq!(denied["code"], "unauthorized");
}

#[tokio::test]
async fn public_view_is_counted_once() {
    let mut h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let listed = NewPage {
        obituary_id: Some("obit-42".to_string()),
        ..new_page(date("2026-03-01"), date("2026-03-07"))
    };
    let (app, page) = seeded(&h, listed).await;

    let (status, _) = call(&app, Method::GET, &format!("/api/shiva/{}", page.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.audit_events(), vec![AuditEvent::PageView]);

    let (status, _) = call(&app, Method::GET, "/api/shiva/obituary/obit-42", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.audit_events(), vec![AuditEvent::PageView]);

    // Organizer views are not counted.
    let uri = format!("/api/shiva/{}?token={}", page.id, page.magic_token);
    let (status, _) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.audit_events().is_empty());
}

#[tokio::test]
async fn unknown_page_is_not_found() {
    let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let app = router(h.ctx.clone());

    let (status, body) = call(&app, Method::GET, "/api/shiva/not-a-page", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = call(
        &app,
        Method::GET,
        "/api/shiva/00000000-0000-0000-0000-000000000000/dates",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_signup_for_a_slot_is_a_conflict() {
    let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let (app, page) = seeded(&h, new_page(date("2026-03-01"), date("2026-03-07"))).await;
    let uri = format!("/api/shiva/{}/signup", page.id);

    let request = |name: &str, email: &str| {
        json!({
            "volunteer_name": name,
            "volunteer_email": email,
            "meal_date": "2026-03-03",
            "meal_type": "Dinner",
            "privacy_consent": true,
        })
    };

    let (status, body) = call(&app, Method::POST, &uri, Some(request("Ari Gold", "ari@example.com"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["address"], "12 Bathurst St");
    assert_eq!(h.provider.sent_to("ari@example.com").len(), 1);

    let (status, body) = call(&app, Method::POST, &uri, Some(request("Ben Katz", "ben@example.com"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (_, meals) = call(&app, Method::GET, &format!("/api/shiva/{}/meals", page.id), None).await;
    let meals = meals["data"].as_array().unwrap();
    assert_eq!(meals.len(), 1);
    assert_eq!(meals[0]["volunteer_name"], "Ari");
    assert!(meals[0].get("volunteer_email").is_none());
}

#[tokio::test]
async fn edits_need_a_token() {
    let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let (app, page) = seeded(&h, new_page(date("2026-03-01"), date("2026-03-07"))).await;
    let uri = format!("/api/shiva/{}", page.id);

    let (status, _) = call(&app, Method::PUT, &uri, Some(json!({ "guest_count": 30 }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        Method::PUT,
        &uri,
        Some(json!({ "magic_token": page.magic_token, "guest_count": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(h.store.page(page.id).unwrap().guest_count, Some(30));
}

#[tokio::test]
async fn updates_can_be_posted_and_deleted() {
    let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let (app, page) = seeded(&h, new_page(date("2026-03-01"), date("2026-03-07"))).await;
    seed_signup(
        h.store.as_ref(),
        new_signup(&page, date("2026-03-03"), MealSlot::Lunch, "Ari Gold", "ari@example.com"),
    )
    .await;
    let uri = format!("/api/shiva/{}/updates", page.id);

    let (status, posted) = call(
        &app,
        Method::POST,
        &uri,
        Some(json!({
            "token": page.magic_token,
            "message": "Minyan moved to 7pm",
            "email_volunteers": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(posted["emailed"], 1);
    assert_eq!(posted["data"]["author_name"], "Sarah Cohen");
    assert_eq!(h.provider.sent_to("ari@example.com").len(), 1);

    let (_, listed) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let (status, _) = call(
        &app,
        Method::POST,
        &uri,
        Some(json!({
            "token": page.magic_token,
            "_action": "delete",
            "update_id": posted["data"]["id"],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = call(&app, Method::GET, &uri, None).await;
    assert!(listed["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn thank_you_is_one_shot_and_rate_limited() {
    let h = TestHarness::new(toronto(2026, 3, 9, 10, 0));
    let (app, page) = seeded(&h, new_page(date("2026-03-01"), date("2026-03-07"))).await;
    seed_signup(
        h.store.as_ref(),
        new_signup(&page, date("2026-03-03"), MealSlot::Lunch, "Ari Gold", "ari@example.com"),
    )
    .await;
    let uri = format!("/api/shiva/{}/thank-you?token={}", page.id, page.magic_token);

    let (status, body) = call(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sent"], 1);

    let (status, body) = call(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "thank-you notes have already been sent");

    let (status, body) = call(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "rate_limited");

    assert_eq!(h.provider.sent_to("ari@example.com").len(), 1);
}

#[tokio::test]
async fn verification_link_works_once() {
    let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let (app, page) = seeded(&h, new_page(date("2026-03-01"), date("2026-03-07"))).await;
    let uri = format!("/api/shiva/verify?token={}", page.verification_token.clone().unwrap());

    let (status, body) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["family_name"], "Cohen");

    let (status, _) = call(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn access_decision_needs_the_organizer_key() {
    let h = TestHarness::new(toronto(2026, 3, 2, 10, 0));
    let private = NewPage {
        visibility: Visibility::Private,
        ..new_page(date("2026-03-01"), date("2026-03-07"))
    };
    let (app, page) = seeded(&h, private).await;

    let (status, limited) = call(&app, Method::GET, &format!("/api/shiva/{}", page.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(limited["data"]["access"], "limited");

    let (status, requested) = call(
        &app,
        Method::POST,
        "/api/shiva/access-request",
        Some(json!({
            "support_id": page.id,
            "requester_name": "Dana Levi",
            "requester_email": "dana@example.com",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let request_id = requested["request_id"].as_i64().unwrap();
    assert_eq!(h.provider.sent_to("sarah@example.com").len(), 1);

    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/api/shiva/access/approve?request_id={request_id}&organizer_key=guess"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
}
