//! HTTP routes over a [`Vault`].

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use sealvault::core::{CapabilityId, ContentHash, PrincipalId, RequestId, SubmissionId};
use sealvault::{FileScope, NewRequest, Operation, Upload, Vault, Verdict};

use crate::error::{json_body, ApiError};

/// Header naming the caller.
pub const PRINCIPAL_HEADER: &str = "x-principal";
/// Header carrying the display name of an upload.
pub const FILE_NAME_HEADER: &str = "x-file-name";

const DEFAULT_MIME: &str = "application/octet-stream";

type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<Vault>,
}

impl AppState {
    pub fn new(vault: Vault) -> Self {
        Self { vault: Arc::new(vault) }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files", post(upload_file).get(list_files))
        .route("/files/:hash", get(read_file))
        .route("/submissions/:id", get(submission_status).delete(cancel_submission))
        .route("/requests", post(submit_request).get(list_requests))
        .route("/requests/:id", get(get_request))
        .route("/requests/:id/decision", post(decide))
        .route("/capabilities", post(grant).get(list_capabilities))
        .route("/capabilities/:id", get(get_capability))
        .route("/capabilities/:id/revoke", post(revoke))
        .route("/capabilities/:id/renew", post(renew))
        .route("/capabilities/:id/check/:hash", get(check_access))
        .route("/audit", get(audit))
        .route("/audit/verify", get(verify_audit))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse<T>(operation: Operation, what: &str, raw: &str) -> ApiResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| ApiError::invalid_input(operation, format!("bad {what} {raw:?}: {e}")))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn caller(operation: Operation, headers: &HeaderMap) -> ApiResult<PrincipalId> {
    let raw = header(headers, PRINCIPAL_HEADER).ok_or_else(|| {
        ApiError::invalid_input(operation, format!("missing {PRINCIPAL_HEADER} header"))
    })?;
    parse(operation, "principal", raw)
}

fn found<T>(operation: Operation, what: impl Display, value: Option<T>) -> ApiResult<T> {
    value.ok_or_else(|| ApiError::not_found(operation, format!("{what} not found")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Files
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UploadParams {
    #[serde(default = "wait_by_default")]
    wait: bool,
}

fn wait_by_default() -> bool {
    true
}

async fn upload_file(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let op = Operation::Seal;
    let owner = caller(op, &headers)?;
    let name = header(&headers, FILE_NAME_HEADER).unwrap_or("untitled");
    let mime = header(&headers, CONTENT_TYPE.as_str()).unwrap_or(DEFAULT_MIME);

    let mut upload = Upload::new(owner, name, mime);
    if let Some(len) = header(&headers, CONTENT_LENGTH.as_str()).and_then(|v| v.parse().ok()) {
        upload = upload.with_size_hint(len);
    }
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other))
        .boxed();

    let handle = state.vault.submit(upload, stream);
    if !params.wait {
        let body = json!({ "submission": handle.id(), "progress": handle.current() });
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }
    let file = handle.wait().await?;
    Ok((StatusCode::CREATED, Json(file)).into_response())
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    capability: Option<String>,
}

async fn read_file(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(params): Query<ReadParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let op = Operation::ReadFile;
    let reader = caller(op, &headers)?;
    let hash: ContentHash = parse(op, "file hash", &hash)?;
    let capability = params
        .capability
        .as_deref()
        .map(|raw| parse::<CapabilityId>(op, "capability id", raw))
        .transpose()?;

    let bytes = state.vault.read_file(&reader, &hash, capability).await?;
    let mime = state
        .vault
        .file(&hash)
        .map(|f| f.mime)
        .unwrap_or_else(|| DEFAULT_MIME.to_string());
    Ok(([(CONTENT_TYPE, mime)], bytes).into_response())
}

#[derive(Debug, Deserialize)]
struct OwnerParams {
    owner: String,
}

async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<OwnerParams>,
) -> ApiResult<Response> {
    let owner: PrincipalId = parse(Operation::Query, "owner", &params.owner)?;
    Ok(Json(state.vault.files_of(&owner)).into_response())
}

async fn submission_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let op = Operation::Seal;
    let id: SubmissionId = parse(op, "submission id", &id)?;
    let progress = found(op, format!("submission {id}"), state.vault.submission(&id))?;
    Ok(Json(progress).into_response())
}

async fn cancel_submission(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let op = Operation::Seal;
    let id: SubmissionId = parse(op, "submission id", &id)?;
    let cancelled = found(op, format!("submission {id}"), state.vault.cancel_submission(&id))?;
    Ok(Json(json!({ "submission": id, "cancelled": cancelled })).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody {
    requester: PrincipalId,
    owner: PrincipalId,
    purpose: String,
    scope: FileScope,
    duration_seconds: u64,
}

async fn submit_request(
    State(state): State<AppState>,
    body: Result<Json<RequestBody>, JsonRejection>,
) -> ApiResult<Response> {
    let body = json_body(Operation::SubmitRequest, body)?;
    let request = state
        .vault
        .submit_request(NewRequest {
            requester: body.requester,
            owner: body.owner,
            purpose: body.purpose,
            scope: body.scope,
            duration_secs: body.duration_seconds,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(request)).into_response())
}

#[derive(Debug, Deserialize)]
struct RequestListParams {
    owner: String,
    #[serde(default)]
    pending: bool,
}

async fn list_requests(
    State(state): State<AppState>,
    Query(params): Query<RequestListParams>,
) -> ApiResult<Response> {
    let owner: PrincipalId = parse(Operation::Query, "owner", &params.owner)?;
    Ok(Json(state.vault.requests_for(&owner, params.pending)).into_response())
}

async fn get_request(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let op = Operation::Query;
    let id: RequestId = parse(op, "request id", &id)?;
    let request = found(op, format!("request {id}"), state.vault.request(&id))?;
    Ok(Json(request).into_response())
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DecisionWord {
    Approve,
    Decline,
}

#[derive(Debug, Deserialize)]
struct DecisionBody {
    owner: PrincipalId,
    decision: DecisionWord,
    #[serde(default)]
    reason: Option<String>,
}

async fn decide(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<DecisionBody>, JsonRejection>,
) -> ApiResult<Response> {
    let op = Operation::Decide;
    let id: RequestId = parse(op, "request id", &id)?;
    let body = json_body(op, body)?;
    let verdict = match body.decision {
        DecisionWord::Approve => Verdict::Approve,
        DecisionWord::Decline => Verdict::Decline {
            reason: body.reason.unwrap_or_default(),
        },
    };
    let outcome = state.vault.decide(id, &body.owner, verdict).await?;
    Ok(Json(outcome).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Capabilities
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantBody {
    owner: PrincipalId,
    grantee: PrincipalId,
    scope: FileScope,
    duration_seconds: u64,
}

async fn grant(
    State(state): State<AppState>,
    body: Result<Json<GrantBody>, JsonRejection>,
) -> ApiResult<Response> {
    let body = json_body(Operation::Grant, body)?;
    let capability = state
        .vault
        .grant(&body.owner, body.grantee, body.scope, body.duration_seconds)
        .await?;
    Ok((StatusCode::CREATED, Json(capability)).into_response())
}

#[derive(Debug, Deserialize)]
struct CapabilityListParams {
    owner: Option<String>,
    grantee: Option<String>,
}

async fn list_capabilities(
    State(state): State<AppState>,
    Query(params): Query<CapabilityListParams>,
) -> ApiResult<Response> {
    let op = Operation::Query;
    let capabilities = match (params.owner, params.grantee) {
        (Some(owner), None) => state.vault.capabilities_of(&parse(op, "owner", &owner)?),
        (None, Some(grantee)) => state.vault.capabilities_held_by(&parse(op, "grantee", &grantee)?),
        _ => return Err(ApiError::invalid_input(op, "give exactly one of owner or grantee")),
    };
    Ok(Json(capabilities).into_response())
}

async fn get_capability(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let op = Operation::Query;
    let id: CapabilityId = parse(op, "capability id", &id)?;
    let capability = found(op, format!("capability {id}"), state.vault.capability(&id))?;
    Ok(Json(capability).into_response())
}

#[derive(Debug, Deserialize)]
struct RevokeBody {
    owner: PrincipalId,
}

async fn revoke(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<RevokeBody>, JsonRejection>,
) -> ApiResult<Response> {
    let op = Operation::Revoke;
    let id: CapabilityId = parse(op, "capability id", &id)?;
    let body = json_body(op, body)?;
    Ok(Json(state.vault.revoke(id, &body.owner).await?).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewBody {
    owner: PrincipalId,
    duration_seconds: u64,
}

async fn renew(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<RenewBody>, JsonRejection>,
) -> ApiResult<Response> {
    let op = Operation::Renew;
    let id: CapabilityId = parse(op, "capability id", &id)?;
    let body = json_body(op, body)?;
    let capability = state.vault.renew(id, &body.owner, body.duration_seconds).await?;
    Ok((StatusCode::CREATED, Json(capability)).into_response())
}

async fn check_access(
    State(state): State<AppState>,
    Path((id, hash)): Path<(String, String)>,
) -> ApiResult<Response> {
    let op = Operation::CheckAccess;
    let id: CapabilityId = parse(op, "capability id", &id)?;
    let hash: ContentHash = parse(op, "file hash", &hash)?;
    Ok(Json(state.vault.check_access(id, &hash).await?).into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit and status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RangeParams {
    #[serde(default)]
    from: u64,
    to: Option<u64>,
}

impl RangeParams {
    fn bounds(&self) -> (u64, u64) {
        (self.from, self.to.unwrap_or(u64::MAX))
    }
}

async fn audit(
    State(state): State<AppState>,
    Query(range): Query<RangeParams>,
) -> ApiResult<Response> {
    let (from, to) = range.bounds();
    Ok(Json(state.vault.audit(from, to).await?).into_response())
}

async fn verify_audit(
    State(state): State<AppState>,
    Query(range): Query<RangeParams>,
) -> ApiResult<Response> {
    let (from, to) = range.bounds();
    let to = to.min(state.vault.audit_len().await);
    let valid = state.vault.verify_chain(from, to).await?;
    Ok(Json(json!({ "from": from, "to": to, "valid": valid })).into_response())
}

async fn stats(
    State(state): State<AppState>,
    Query(params): Query<OwnerParams>,
) -> ApiResult<Response> {
    let owner: PrincipalId = parse(Operation::Query, "owner", &params.owner)?;
    Ok(Json(state.vault.stats(&owner)).into_response())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "events": state.vault.audit_len().await,
        "ledger_key": state.vault.ledger_key().to_hex(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use sealvault::VaultConfig;
    use serde_json::Value;
    use tower::ServiceExt;

    const ALICE: &str = "0xalice";
    const DOCTOR: &str = "0xdoctor";

    async fn app() -> Router {
        let vault = Vault::in_memory(VaultConfig::default()).await.unwrap();
        build_router(AppState::new(vault))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_as(uri: &str, principal: &str) -> Request<Body> {
        Request::get(uri).header(PRINCIPAL_HEADER, principal).body(Body::empty()).unwrap()
    }

    async fn upload(app: &Router, owner: &str, data: &'static [u8]) -> String {
        let request = Request::post("/files")
            .header(PRINCIPAL_HEADER, owner)
            .header(FILE_NAME_HEADER, "report-A")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from(data))
            .unwrap();
        let (status, body) = send_json(app, request).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["status"], "sealed");
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_upload_then_owner_reads() {
        let app = app().await;
        let hash = upload(&app, ALICE, b"report-A").await;

        let response = app.clone().oneshot(get_as(&format!("/files/{hash}"), ALICE)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"report-A");

        let (status, listed) = send_json(&app, get_as(&format!("/files?owner={ALICE}"), ALICE)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_request_approve_read_revoke() {
        let app = app().await;
        let hash = upload(&app, ALICE, b"report-A").await;

        let (status, request) = send_json(
            &app,
            post_json(
                "/requests",
                json!({
                    "requester": DOCTOR,
                    "owner": ALICE,
                    "purpose": "second opinion",
                    "scope": { "type": "file_set", "files": [hash] },
                    "durationSeconds": 86_400,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{request}");
        let request_id = request["id"].as_str().unwrap().to_string();

        let (status, outcome) = send_json(
            &app,
            post_json(
                &format!("/requests/{request_id}/decision"),
                json!({ "owner": ALICE, "decision": "approve" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{outcome}");
        assert_eq!(outcome["request"]["decision"]["state"], "approved");
        let cap = outcome["capability"]["id"].as_str().unwrap().to_string();

        let (status, decision) =
            send_json(&app, get_as(&format!("/capabilities/{cap}/check/{hash}"), DOCTOR)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decision["result"], "authorized");

        let (status, bytes) =
            send(&app, get_as(&format!("/files/{hash}?capability={cap}"), DOCTOR)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"report-A");

        let revoke = || post_json(&format!("/capabilities/{cap}/revoke"), json!({ "owner": ALICE }));
        let (status, revoked) = send_json(&app, revoke()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(revoked["status"], "revoked");

        let (status, err) = send_json(&app, revoke()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["kind"], "invalid_state");
        assert_eq!(err["operation"], "revoke");

        let (status, err) =
            send_json(&app, get_as(&format!("/files/{hash}?capability={cap}"), DOCTOR)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["kind"], "authorization");
        assert_eq!(err["operation"], "read_file");
    }

    #[tokio::test]
    async fn test_non_owner_without_capability_is_forbidden() {
        let app = app().await;
        let hash = upload(&app, ALICE, b"private").await;
        let (status, err) = send_json(&app, get_as(&format!("/files/{hash}"), DOCTOR)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["kind"], "authorization");
    }

    #[tokio::test]
    async fn test_unknown_file_is_not_found() {
        let app = app().await;
        let missing = ContentHash::from_bytes([9; 32]);
        let (status, err) = send_json(&app, get_as(&format!("/files/{missing}"), ALICE)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["kind"], "not_found");
    }

    #[tokio::test]
    async fn test_bad_input_is_rejected() {
        let app = app().await;

        let request = Request::post("/files").body(Body::from("data")).unwrap();
        let (status, err) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["operation"], "seal");
        assert_eq!(err["kind"], "invalid_input");

        let (status, err) = send_json(&app, get_as("/files/not-hex", ALICE)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["operation"], "read_file");

        let (status, err) = send_json(&app, post_json("/requests", json!({ "owner": ALICE }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["operation"], "submit_request");

        let (status, _) = send_json(&app, get_as("/capabilities", ALICE)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_background_upload_can_be_polled() {
        let app = app().await;
        let request = Request::post("/files?wait=false")
            .header(PRINCIPAL_HEADER, ALICE)
            .body(Body::from(&b"later"[..]))
            .unwrap();
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let submission = body["submission"].as_str().unwrap().to_string();

        let mut last = Value::Null;
        for _ in 0..200 {
            let (status, progress) =
                send_json(&app, get_as(&format!("/submissions/{submission}"), ALICE)).await;
            assert_eq!(status, StatusCode::OK);
            if progress["state"] == "sealed" {
                assert_eq!(progress["percent"], 100);
                return;
            }
            last = progress;
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("submission never sealed, last progress: {last}");
    }

    #[tokio::test]
    async fn test_audit_and_verify() {
        let app = app().await;
        upload(&app, ALICE, b"one").await;
        upload(&app, ALICE, b"two").await;

        let (status, events) = send_json(&app, get_as("/audit", ALICE)).await;
        assert_eq!(status, StatusCode::OK);
        let events = events.as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["prior_hash"], events[0]["this_hash"]);

        let (_, tail) = send_json(&app, get_as("/audit?from=1", ALICE)).await;
        assert_eq!(tail.as_array().unwrap().len(), 1);

        let (status, verdict) = send_json(&app, get_as("/audit/verify", ALICE)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verdict["valid"], true);
        assert_eq!(verdict["to"], 2);

        let (_, stats) = send_json(&app, get_as(&format!("/stats?owner={ALICE}"), ALICE)).await;
        assert_eq!(stats["files"], 2);

        let (_, health) = send_json(&app, get_as("/health", ALICE)).await;
        assert_eq!(health["events"], 2);
    }

    #[tokio::test]
    async fn test_grant_decline_and_listing() {
        let app = app().await;
        upload(&app, ALICE, b"x").await;

        let (status, cap) = send_json(
            &app,
            post_json(
                "/capabilities",
                json!({
                    "owner": ALICE,
                    "grantee": DOCTOR,
                    "scope": { "type": "all_files" },
                    "durationSeconds": 3_600,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{cap}");
        assert_eq!(cap["status"], "active");

        let (_, held) = send_json(&app, get_as(&format!("/capabilities?grantee={DOCTOR}"), DOCTOR)).await;
        assert_eq!(held.as_array().unwrap().len(), 1);

        let (_, request) = send_json(
            &app,
            post_json(
                "/requests",
                json!({
                    "requester": DOCTOR,
                    "owner": ALICE,
                    "purpose": "more",
                    "scope": { "type": "all_files" },
                    "durationSeconds": 60,
                }),
            ),
        )
        .await;
        let id = request["id"].as_str().unwrap().to_string();

        let (_, pending) =
            send_json(&app, get_as(&format!("/requests?owner={ALICE}&pending=true"), ALICE)).await;
        assert_eq!(pending.as_array().unwrap().len(), 1);

        let decline = json!({ "owner": ALICE, "decision": "decline", "reason": "not needed" });
        let (status, outcome) = send_json(&app, post_json(&format!("/requests/{id}/decision"), decline)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["request"]["decision"]["state"], "declined");
        assert!(outcome["capability"].is_null());

        let forged = json!({ "owner": DOCTOR, "decision": "approve" });
        let (status, err) = send_json(&app, post_json(&format!("/requests/{id}/decision"), forged)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{err}");

        let (_, pending) =
            send_json(&app, get_as(&format!("/requests?owner={ALICE}&pending=true"), ALICE)).await;
        assert!(pending.as_array().unwrap().is_empty());
    }
}
