use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use shiva_core::types::PageId;
use shiva_core::{AuditEvent, ShivaContext, ShivaError};
use shiva_notify::Mailer;
use shiva_support::{
    AcceptOutcome, AccessBroker, AccessRequestInput, CoOrganizerDirectory, CreateOutcome, InviteRequest,
    MealScheduler, MultiSignupRequest, NewPageRequest, PageUpdateRequest, ReportRequest, RequestOutcome,
    SignupRequest, SupportRegistry, UpdateBoard, UpdateOutcome, VerifyOutcome,
};

use crate::auth::{self, TokenQuery};
use crate::error::ApiResult;
use crate::rate_limit::RateLimits;

type JsonResult = ApiResult<Json<Value>>;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "shiva-api"
    }))
}

fn parse_page_id(raw: &str) -> ApiResult<PageId> {
    Uuid::parse_str(raw.trim()).map_err(|_| ShivaError::NotFound("Support page").into())
}

/// An empty body reads as `{}` so every field falls back to its default.
fn json_body(bytes: &Bytes) -> ApiResult<Value> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(bytes).map_err(|_| ShivaError::validation("Invalid JSON body").into())
}

fn decode<T: DeserializeOwned>(value: Value) -> ApiResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ShivaError::validation(format!("Invalid request body: {}", e)).into())
}

pub async fn create_page(Extension(ctx): Extension<ShivaContext>, body: Bytes) -> ApiResult<(StatusCode, Json<Value>)> {
    ctx.audit.record(AuditEvent::OrganizeStart, None, ctx.now());
    let req: NewPageRequest = decode(json_body(&body)?)?;

    match SupportRegistry::new(ctx.clone()).create(req).await? {
        CreateOutcome::Created {
            page,
            magic_token,
            verification_token,
        } => {
            let mailer = Mailer::new(ctx);
            if let Err(e) = mailer.verification(&page, &verification_token).await {
                tracing::warn!("Verification email for support page {} not sent: {}", page.id, e);
            }
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "status": "success",
                    "id": page.id,
                    "magic_token": magic_token,
                    "organizer_url": mailer.templates().organizer_url(&page.id.to_string(), &magic_token),
                    "message": "Support page created. Check your email to verify it.",
                })),
            ))
        }
        CreateOutcome::Duplicate {
            existing_id,
            organizer_first_name,
            created_at,
        } => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "duplicate",
                "existing_id": existing_id,
                "organizer_first_name": organizer_first_name,
                "created_at": created_at,
            })),
        )),
        CreateOutcome::SimilarFound { candidates } => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "similar_found",
                "candidates": candidates,
            })),
        )),
    }
}

pub async fn get_by_obituary(
    Extension(ctx): Extension<ShivaContext>,
    Path(obituary_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> JsonResult {
    let page = SupportRegistry::new(ctx)
        .get_by_obituary(&obituary_id, query.access.as_deref())
        .await?;
    Ok(Json(json!({ "status": "success", "view": "public", "data": page })))
}

/// Organizer view when a token is presented, public view otherwise.
pub async fn get_page(
    Extension(ctx): Extension<ShivaContext>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let registry = SupportRegistry::new(ctx.clone());

    if let Some(token) = auth::organizer_token(&headers, &query, None) {
        let page = registry.get_for_organizer(page_id, &token).await?;
        return Ok(Json(json!({ "status": "success", "view": "organizer", "data": page })));
    }

    let page = registry.get_public(page_id, query.access.as_deref()).await?;
    Ok(Json(json!({ "status": "success", "view": "public", "data": page })))
}

pub async fn update_page(
    Extension(ctx): Extension<ShivaContext>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let body = json_body(&body)?;
    let token = auth::require_token(&headers, &query, Some(&body))?;
    let req: PageUpdateRequest = decode(body)?;

    let message = match SupportRegistry::new(ctx).update(page_id, &token, req).await? {
        UpdateOutcome::Updated => "Support page updated",
        UpdateOutcome::NoOp => "No changes to save",
    };
    Ok(Json(json!({ "status": "success", "message": message })))
}

pub async fn list_dates(Extension(ctx): Extension<ShivaContext>, Path(id): Path<String>) -> JsonResult {
    let slots = MealScheduler::new(ctx).list_slots(parse_page_id(&id)?).await?;
    Ok(Json(json!({ "status": "success", "data": slots })))
}

pub async fn list_meals(
    Extension(ctx): Extension<ShivaContext>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let scheduler = MealScheduler::new(ctx);

    let data = match auth::organizer_token(&headers, &query, None) {
        Some(token) => {
            let signups = scheduler.list_signups_for_organizer(page_id, &token).await?;
            json!(signups)
        }
        None => {
            let signups = scheduler.list_signups_public(page_id).await?;
            json!(signups)
        }
    };
    Ok(Json(json!({ "status": "success", "data": data })))
}

pub async fn signup(Extension(ctx): Extension<ShivaContext>, Path(id): Path<String>, body: Bytes) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let req: SignupRequest = decode(json_body(&body)?)?;

    let confirmed = MealScheduler::new(ctx.clone()).signup_single(page_id, req).await?;
    let (page, signup) = (confirmed.page, confirmed.signup);

    if let Err(e) = Mailer::new(ctx).signup_emails(&page, std::slice::from_ref(&signup)).await {
        tracing::warn!("Signup emails for signup {} not sent: {}", signup.id, e);
    }

    Ok(Json(json!({
        "status": "success",
        "signup_id": signup.id,
        "meal_date": signup.meal_date,
        "slot": signup.slot,
        "family_name": page.family_name,
        "address": page.address,
        "city": page.city,
        "special_instructions": page.special_instructions,
    })))
}

pub async fn signup_multi(Extension(ctx): Extension<ShivaContext>, Path(id): Path<String>, body: Bytes) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let req: MultiSignupRequest = decode(json_body(&body)?)?;

    let outcome = MealScheduler::new(ctx.clone()).signup_multi(page_id, req).await?;
    if let Err(e) = Mailer::new(ctx).signup_emails(&outcome.page, &outcome.signups).await {
        tracing::warn!("Signup emails for group {} not sent: {}", outcome.group_id, e);
    }

    let booked: Vec<Value> = outcome
        .signups
        .iter()
        .map(|s| json!({ "id": s.id, "date": s.meal_date, "slot": s.slot }))
        .collect();
    Ok(Json(json!({
        "status": "success",
        "signup_group_id": outcome.group_id,
        "signups": booked,
        "errors": outcome.errors,
        "family_name": outcome.page.family_name,
        "address": outcome.page.address,
        "city": outcome.page.city,
        "special_instructions": outcome.page.special_instructions,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct RemoveSignupBody {
    signup_id: Option<i64>,
}

pub async fn remove_signup(
    Extension(ctx): Extension<ShivaContext>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let body = json_body(&body)?;
    let token = auth::require_token(&headers, &query, Some(&body))?;
    let signup_id = decode::<RemoveSignupBody>(body)?
        .signup_id
        .ok_or_else(|| ShivaError::validation("Missing required field: signup_id"))?;

    MealScheduler::new(ctx).remove_signup(page_id, &token, signup_id).await?;
    Ok(Json(json!({ "status": "success", "message": "Signup removed" })))
}

pub async fn report_page(Extension(ctx): Extension<ShivaContext>, Path(id): Path<String>, body: Bytes) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let req: ReportRequest = decode(json_body(&body)?)?;

    let report = SupportRegistry::new(ctx).report(page_id, req).await?;
    Ok(Json(json!({
        "status": "success",
        "report_id": report.id,
        "message": "Thank you. We will review this page.",
    })))
}

pub async fn list_updates(Extension(ctx): Extension<ShivaContext>, Path(id): Path<String>) -> JsonResult {
    let updates = UpdateBoard::new(ctx).list_updates(parse_page_id(&id)?).await?;
    Ok(Json(json!({ "status": "success", "data": updates })))
}

#[derive(Debug, Default, Deserialize)]
struct UpdateBody {
    message: Option<String>,
    #[serde(rename = "_action")]
    action: Option<String>,
    update_id: Option<i64>,
    #[serde(default)]
    email_volunteers: bool,
}

/// Posts an update, or removes one when `_action` is `"delete"`.
pub async fn post_update(
    Extension(ctx): Extension<ShivaContext>,
    Extension(limits): Extension<Arc<RateLimits>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let body = json_body(&body)?;
    let token = auth::require_token(&headers, &query, Some(&body))?;
    let req: UpdateBody = decode(body)?;
    let board = UpdateBoard::new(ctx.clone());

    if req.action.as_deref() == Some("delete") {
        let update_id = req
            .update_id
            .ok_or_else(|| ShivaError::validation("Missing required field: update_id"))?;
        board.delete_update(page_id, &token, update_id).await?;
        return Ok(Json(json!({ "status": "success", "message": "Update removed" })));
    }

    if req.email_volunteers {
        limits
            .update_emails
            .check(&auth::client_key(&headers, &token), ctx.now())?;
    }

    let update = board.post_update(page_id, &token, req.message.as_deref()).await?;

    let mut emailed = 0;
    if req.email_volunteers {
        let volunteers = board.confirmed_volunteers(page_id).await?;
        if let Some(page) = ctx.store.get_page(page_id).await.map_err(ShivaError::from)? {
            match Mailer::new(ctx).organizer_update(&page, &update, &volunteers).await {
                Ok(sent) => emailed = sent,
                Err(e) => tracing::warn!("Update {} emails not sent: {}", update.id, e),
            }
        }
    }

    Ok(Json(json!({ "status": "success", "data": update, "emailed": emailed })))
}

pub async fn send_thank_you(
    Extension(ctx): Extension<ShivaContext>,
    Extension(limits): Extension<Arc<RateLimits>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let body = json_body(&body)?;
    let token = auth::require_token(&headers, &query, Some(&body))?;
    limits
        .thank_you
        .check(&auth::client_key(&headers, &token), ctx.now())?;

    let dispatch = UpdateBoard::new(ctx.clone()).dispatch_thank_you(page_id, &token).await?;
    let sent = match Mailer::new(ctx).thank_you(&dispatch).await {
        Ok(sent) => sent,
        Err(e) => {
            tracing::warn!("Thank-you notes for support page {} not sent: {}", page_id, e);
            0
        }
    };

    Ok(Json(json!({
        "status": "success",
        "sent": sent,
        "volunteers": dispatch.volunteers.len(),
    })))
}

pub async fn invite_co_organizer(
    Extension(ctx): Extension<ShivaContext>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let body = json_body(&body)?;
    let token = auth::require_token(&headers, &query, Some(&body))?;
    let req: InviteRequest = decode(body)?;

    let issued = CoOrganizerDirectory::new(ctx.clone()).invite(page_id, &token, req).await?;
    if let Err(e) = Mailer::new(ctx).invite(&issued).await {
        tracing::warn!("Invitation {} email not sent: {}", issued.invite_id, e);
    }

    Ok(Json(json!({
        "status": "success",
        "invite_id": issued.invite_id,
        "invitee_email": issued.invitee_email,
    })))
}

pub async fn list_co_organizers(
    Extension(ctx): Extension<ShivaContext>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let token = auth::require_token(&headers, &query, None)?;
    let invites = CoOrganizerDirectory::new(ctx).list(page_id, &token).await?;
    Ok(Json(json!({ "status": "success", "data": invites })))
}

pub async fn revoke_co_organizer(
    Extension(ctx): Extension<ShivaContext>,
    Path((id, invite_id)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> JsonResult {
    let page_id = parse_page_id(&id)?;
    let invite_id: i64 = invite_id
        .parse()
        .map_err(|_| ShivaError::NotFound("Invitation"))?;
    let body = json_body(&body)?;
    let token = auth::require_token(&headers, &query, Some(&body))?;

    CoOrganizerDirectory::new(ctx).revoke(page_id, &token, invite_id).await?;
    Ok(Json(json!({ "status": "success", "message": "Co-organizer access revoked" })))
}

fn query_token(query: &TokenQuery) -> ApiResult<&str> {
    query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ShivaError::validation("Missing token").into())
}

pub async fn accept_invite(Extension(ctx): Extension<ShivaContext>, Query(query): Query<TokenQuery>) -> JsonResult {
    let token = query_token(&query)?;
    let mailer = Mailer::new(ctx.clone());

    let (status, page_id, family_name, token) = match CoOrganizerDirectory::new(ctx).accept(token).await? {
        AcceptOutcome::Accepted {
            page_id,
            family_name,
            token,
        } => ("success", page_id, family_name, token),
        AcceptOutcome::AlreadyAccepted {
            page_id,
            family_name,
            token,
        } => ("already_accepted", page_id, family_name, token),
    };

    Ok(Json(json!({
        "status": status,
        "page_id": page_id,
        "family_name": family_name,
        "organizer_url": mailer.templates().organizer_url(&page_id.to_string(), &token),
    })))
}

pub async fn verify_email(Extension(ctx): Extension<ShivaContext>, Query(query): Query<TokenQuery>) -> JsonResult {
    let token = query_token(&query)?;

    let (status, page_id, family_name) = match SupportRegistry::new(ctx).verify_email(token).await? {
        VerifyOutcome::Verified { page_id, family_name } => ("success", page_id, family_name),
        VerifyOutcome::AlreadyVerified { page_id, family_name } => ("already_verified", page_id, family_name),
    };
    Ok(Json(json!({
        "status": status,
        "page_id": page_id,
        "family_name": family_name,
    })))
}

pub async fn request_access(Extension(ctx): Extension<ShivaContext>, body: Bytes) -> JsonResult {
    let input: AccessRequestInput = decode(json_body(&body)?)?;

    match AccessBroker::new(ctx.clone()).request(input).await? {
        RequestOutcome::Requested(issued) => {
            if let Err(e) = Mailer::new(ctx).access_request(&issued).await {
                tracing::warn!("Access request {} email not sent: {}", issued.request_id, e);
            }
            Ok(Json(json!({
                "status": "success",
                "request_id": issued.request_id,
                "message": "Your request has been sent to the family's organizer.",
            })))
        }
        RequestOutcome::AlreadyApproved { access_token } => Ok(Json(json!({
            "status": "already_approved",
            "access_token": access_token,
        }))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionQuery {
    pub request_id: Option<i64>,
    pub organizer_key: Option<String>,
}

async fn decide(ctx: ShivaContext, query: DecisionQuery, approve: bool) -> JsonResult {
    let request_id = query
        .request_id
        .ok_or_else(|| ShivaError::validation("Missing required field: request_id"))?;
    let key = query
        .organizer_key
        .filter(|k| !k.trim().is_empty())
        .ok_or(ShivaError::Unauthorized)?;

    let broker = AccessBroker::new(ctx.clone());
    let decision = if approve {
        broker.approve(request_id, &key).await?
    } else {
        broker.deny(request_id, &key).await?
    };

    if let Err(e) = Mailer::new(ctx).access_decision(&decision).await {
        tracing::warn!("Access decision email for request {} not sent: {}", request_id, e);
    }

    Ok(Json(json!({
        "status": "success",
        "request_status": decision.status,
        "requester_name": decision.requester_name,
        "family_name": decision.family_name,
    })))
}

pub async fn approve_access(Extension(ctx): Extension<ShivaContext>, Query(query): Query<DecisionQuery>) -> JsonResult {
    decide(ctx, query, true).await
}

pub async fn deny_access(Extension(ctx): Extension<ShivaContext>, Query(query): Query<DecisionQuery>) -> JsonResult {
    decide(ctx, query, false).await
}
