//! # Command & Query API
//!
//! Builds the axum router that exposes the relief core's command surface.
//! All endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                      | Description                          |
//! |--------|---------------------------|--------------------------------------|
//! | GET    | `/health`                 | Liveness probe                       |
//! | GET    | `/status`                 | Node status summary                  |
//! | POST   | `/zones`                  | Create a disaster zone               |
//! | GET    | `/zones/:id`              | Zone snapshot                        |
//! | GET    | `/zones/:id/activity`     | Read-side zone view (projection)     |
//! | POST   | `/zones/:id/funding`      | Add funding to a zone                |
//! | POST   | `/zones/:id/deactivate`   | Suspend a zone                       |
//! | POST   | `/zones/:id/complete`     | End a zone's response (terminal)     |
//! | POST   | `/vendors`                | Register an unverified vendor        |
//! | GET    | `/vendors/:id`            | Vendor snapshot                      |
//! | POST   | `/vendors/:id/verify`     | Verify a vendor for its zone         |
//! | POST   | `/vendors/:id/suspend`    | Suspend a vendor                     |
//! | POST   | `/vouchers`               | Issue a voucher                      |
//! | GET    | `/vouchers/:id`           | Voucher snapshot                     |
//! | POST   | `/redemptions`            | Redeem a voucher                     |
//! | GET    | `/redemptions`            | Confirmed redemption log             |
//! | GET    | `/redemptions/:id`        | One confirmed redemption             |
//! | POST   | `/proofs`                 | Attach proof-of-aid evidence         |
//! | GET    | `/proofs/:id`             | Proof snapshot                       |
//! | POST   | `/proofs/:id/review`      | Verify or reject a pending proof     |
//! | GET    | `/alerts`                 | Fraud alerts raised so far           |
//! | GET    | `/ws`                     | Live event + alert stream            |
//!
//! Every rejected command returns the specific typed reason — validation
//! failures as 400, missing entities as 404, capability failures as 403,
//! state conflicts as 409, chain-boundary failures as 502/504. Operators
//! can always tell "retry with corrected intent" from "this will never
//! succeed" from "you lack permission".

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use amparo_custody::proof::{ProofError, ReviewDecision};
use amparo_custody::redemption::{EngineError, RedemptionEngine, RedemptionRequest};
use amparo_custody::vendor::VendorError;
use amparo_custody::voucher::VoucherError;
use amparo_custody::zone::ZoneError;
use amparo_ledger::config::DEFAULT_VOUCHER_EXPIRY_SECS;
use amparo_ledger::event::{EventBus, GeoPoint};
use amparo_ledger::fraud::FraudAlert;
use amparo_ledger::projection::{ProjectionStore, RedemptionRow, ZoneRow};
use amparo_ledger::submit::SubmitError;

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc` or a channel handle.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// When this node came up.
    pub started_at: DateTime<Utc>,
    /// The custody orchestrator.
    pub engine: Arc<RedemptionEngine>,
    /// Prometheus metrics for in-handler recording.
    pub metrics: SharedMetrics,
    /// The event bus, for WebSocket subscribers.
    pub bus: EventBus,
    /// Live fraud-alert feed, for WebSocket subscribers.
    pub alert_feed: broadcast::Sender<FraudAlert>,
    /// Alerts collected since startup, for `/alerts`.
    pub alerts: Arc<RwLock<Vec<FraudAlert>>>,
    /// Read-side projection fed by the event monitor. Reporting only —
    /// never consulted for a correctness decision.
    pub projections: Arc<dyn ProjectionStore>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/zones", post(create_zone_handler))
        .route("/zones/:id", get(zone_handler))
        .route("/zones/:id/activity", get(zone_activity_handler))
        .route("/zones/:id/funding", post(add_funding_handler))
        .route("/zones/:id/deactivate", post(deactivate_zone_handler))
        .route("/zones/:id/complete", post(complete_zone_handler))
        .route("/vendors", post(register_vendor_handler))
        .route("/vendors/:id", get(vendor_handler))
        .route("/vendors/:id/verify", post(verify_vendor_handler))
        .route("/vendors/:id/suspend", post(suspend_vendor_handler))
        .route("/vouchers", post(issue_voucher_handler))
        .route("/vouchers/:id", get(voucher_handler))
        .route("/redemptions", post(redeem_handler).get(redemptions_handler))
        .route("/redemptions/:id", get(redemption_handler))
        .route("/proofs", post(attach_proof_handler))
        .route("/proofs/:id", get(proof_handler))
        .route("/proofs/:id/review", post(review_proof_handler))
        .route("/alerts", get(alerts_handler))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateZoneRequest {
    pub name: String,
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub initial_funding: u64,
    /// Acting identity; must hold the zone-creation capability.
    pub creator: String,
}

#[derive(Debug, Deserialize)]
pub struct AddFundingRequest {
    pub amount: u64,
    pub actor: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FundingResponse {
    pub zone_id: String,
    pub current_funding: u64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterVendorRequest {
    pub vendor_id: String,
    pub name: String,
    pub location: GeoPoint,
    pub zone_id: String,
    pub kyc_evidence_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyVendorRequest {
    pub zone_id: String,
    /// Acting identity; must hold the vendor-verification capability.
    pub verifier: String,
}

#[derive(Debug, Deserialize)]
pub struct IssueVoucherRequest {
    pub beneficiary: String,
    pub amount: u64,
    pub zone_id: String,
    pub categories: Vec<String>,
    /// Validity window in seconds; defaults to the configured standard
    /// window when omitted.
    pub expiry_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub voucher_id: String,
    pub vendor_id: String,
    pub amount: u64,
    pub category: String,
    pub geo: Option<GeoPoint>,
}

#[derive(Debug, Deserialize)]
pub struct AttachProofRequest {
    pub redemption_id: String,
    pub evidence_hash: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewProofRequest {
    /// Acting identity; must hold the proof-review capability.
    pub reviewer: String,
    pub decision: ReviewDecision,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_secs: i64,
    pub zones: usize,
    pub vendors: usize,
    pub vouchers: usize,
    pub redemptions: usize,
    pub alerts: usize,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Generic error body returned on failure. The `error` string is always
/// the specific typed reason, never a generic failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

/// Maps an engine rejection onto the HTTP taxonomy: 400 for malformed
/// input, 403 for missing capability, 404 for missing entities, 409 for
/// state conflicts the caller may resolve, 502/504 for the chain boundary.
fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Zone(e) => match e {
            ZoneError::ZoneNotFound(_) => StatusCode::NOT_FOUND,
            ZoneError::InvalidGeometry { .. }
            | ZoneError::InvalidAmount(_)
            | ZoneError::FundingOverflow { .. } => StatusCode::BAD_REQUEST,
            ZoneError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            ZoneError::ZoneInactive { .. }
            | ZoneError::ZoneCompleted(_)
            | ZoneError::InsufficientFunds { .. } => StatusCode::CONFLICT,
        },
        EngineError::Vendor(e) => match e {
            VendorError::VendorNotFound(_) => StatusCode::NOT_FOUND,
            VendorError::InvalidKycEvidence(_) => StatusCode::BAD_REQUEST,
            VendorError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            VendorError::DuplicateVendor(_)
            | VendorError::ZoneMismatch { .. }
            | VendorError::VendorNotVerified(_) => StatusCode::CONFLICT,
        },
        EngineError::Voucher(e) => match e {
            VoucherError::VoucherNotFound(_) => StatusCode::NOT_FOUND,
            VoucherError::InvalidAmount(_) | VoucherError::EmptyCategories => {
                StatusCode::BAD_REQUEST
            }
            VoucherError::VoucherExpired { .. }
            | VoucherError::VoucherAlreadyUsed { .. }
            | VoucherError::CategoryNotAllowed { .. }
            | VoucherError::AmountMismatch { .. } => StatusCode::CONFLICT,
        },
        EngineError::Proof(e) => match e {
            ProofError::RedemptionNotFound(_) | ProofError::ProofNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ProofError::InvalidEvidenceHash(_) | ProofError::DescriptionTooLong { .. } => {
                StatusCode::BAD_REQUEST
            }
            ProofError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            ProofError::DuplicateProof { .. }
            | ProofError::ProofNotPending { .. }
            | ProofError::EvidenceMissing { .. } => StatusCode::CONFLICT,
        },
        EngineError::Submit(e) => match e {
            SubmitError::Rejected { .. } => StatusCode::BAD_GATEWAY,
            SubmitError::Timeout
            | SubmitError::Transient { .. }
            | SubmitError::RetriesExhausted { .. } => StatusCode::GATEWAY_TIMEOUT,
        },
    }
}

fn reject(err: EngineError) -> Response {
    let status = status_for(&err);
    let body = ErrorResponse {
        error: err.to_string(),
    };
    (status, Json(body)).into_response()
}

fn not_found(what: &str, id: &str) -> Response {
    let body = ErrorResponse {
        error: format!("{} not found: {}", what, id),
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive. Liveness only;
/// subsystem health belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — node status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let resp = StatusResponse {
        version: state.version.clone(),
        uptime_secs: (now - state.started_at).num_seconds(),
        zones: state.engine.zone_count(),
        vendors: state.engine.vendor_count(),
        vouchers: state.engine.voucher_count(),
        redemptions: state.engine.record_count(),
        alerts: state.alerts.read().len(),
        timestamp: now.to_rfc3339(),
    };
    Json(resp)
}

/// `POST /zones` — create a disaster zone.
async fn create_zone_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateZoneRequest>,
) -> Response {
    match state
        .engine
        .create_zone(
            &req.name,
            req.center,
            req.radius_meters,
            req.initial_funding,
            &req.creator,
        )
        .await
    {
        Ok(zone) => {
            state.metrics.zones_created_total.inc();
            (StatusCode::CREATED, Json(zone)).into_response()
        }
        Err(err) => reject(err),
    }
}

/// `GET /zones/:id` — zone snapshot.
async fn zone_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.engine.zone(&id) {
        Some(zone) => Json(zone).into_response(),
        None => not_found("zone", &id),
    }
}

/// Response payload for `GET /zones/:id/activity`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ZoneActivityResponse {
    /// Projected zone row, absent until the monitor has observed the
    /// zone's creation event.
    pub zone: Option<ZoneRow>,
    /// Redemptions the monitor has projected for this zone, in stream
    /// order.
    pub redemptions: Vec<RedemptionRow>,
}

/// `GET /zones/:id/activity` — the read-side view of a zone, straight
/// from the projection. May trail the engine by however far the monitor
/// is behind the bus.
async fn zone_activity_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    Json(ZoneActivityResponse {
        zone: state.projections.zone(&id),
        redemptions: state.projections.redemptions_for_zone(&id),
    })
}

/// `POST /zones/:id/funding` — add funding to a zone.
async fn add_funding_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<AddFundingRequest>,
) -> Response {
    match state.engine.add_funding(&id, req.amount, &req.actor).await {
        Ok(current_funding) => Json(FundingResponse {
            zone_id: id,
            current_funding,
        })
        .into_response(),
        Err(err) => reject(err),
    }
}

/// `POST /zones/:id/deactivate` — suspend a zone. Idempotent.
async fn deactivate_zone_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.engine.deactivate_zone(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => reject(err),
    }
}

/// `POST /zones/:id/complete` — end a zone's response (terminal).
async fn complete_zone_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.engine.complete_zone(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => reject(err),
    }
}

/// `POST /vendors` — register an unverified vendor.
async fn register_vendor_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterVendorRequest>,
) -> Response {
    match state
        .engine
        .register_vendor(
            &req.vendor_id,
            &req.name,
            req.location,
            &req.zone_id,
            &req.kyc_evidence_hash,
        )
        .await
    {
        Ok(vendor) => (StatusCode::CREATED, Json(vendor)).into_response(),
        Err(err) => reject(err),
    }
}

/// `GET /vendors/:id` — vendor snapshot.
async fn vendor_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.engine.vendor(&id) {
        Some(vendor) => Json(vendor).into_response(),
        None => not_found("vendor", &id),
    }
}

/// `POST /vendors/:id/verify` — verify a vendor for its zone.
async fn verify_vendor_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<VerifyVendorRequest>,
) -> Response {
    match state
        .engine
        .verify_vendor(&id, &req.zone_id, &req.verifier)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => reject(err),
    }
}

/// `POST /vendors/:id/suspend` — suspend a vendor.
async fn suspend_vendor_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.engine.suspend_vendor(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => reject(err),
    }
}

/// `POST /vouchers` — issue a voucher against an active zone.
async fn issue_voucher_handler(
    State(state): State<AppState>,
    Json(req): Json<IssueVoucherRequest>,
) -> Response {
    let expiry = Duration::seconds(req.expiry_secs.unwrap_or(DEFAULT_VOUCHER_EXPIRY_SECS));
    match state
        .engine
        .issue_voucher(&req.beneficiary, req.amount, &req.zone_id, req.categories, expiry)
        .await
    {
        Ok(voucher) => {
            state.metrics.vouchers_issued_total.inc();
            (StatusCode::CREATED, Json(voucher)).into_response()
        }
        Err(err) => reject(err),
    }
}

/// `GET /vouchers/:id` — voucher snapshot.
async fn voucher_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.engine.voucher(&id) {
        Some(voucher) => Json(voucher).into_response(),
        None => not_found("voucher", &id),
    }
}

/// `POST /redemptions` — redeem a voucher.
async fn redeem_handler(
    State(state): State<AppState>,
    Json(req): Json<RedeemRequest>,
) -> Response {
    let started = std::time::Instant::now();
    let result = state
        .engine
        .redeem(RedemptionRequest {
            voucher_id: req.voucher_id,
            vendor_id: req.vendor_id,
            amount: req.amount,
            category: req.category,
            geo: req.geo,
        })
        .await;
    state
        .metrics
        .redemption_latency_seconds
        .observe(started.elapsed().as_secs_f64());

    match result {
        Ok(record) => {
            state.metrics.redemptions_confirmed_total.inc();
            state
                .metrics
                .funds_disbursed_cents_total
                .inc_by(record.amount);
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(err) => {
            state.metrics.redemptions_rejected_total.inc();
            reject(err)
        }
    }
}

/// `GET /redemptions` — the confirmed redemption log, oldest first.
async fn redemptions_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.records())
}

/// `GET /redemptions/:id` — one confirmed redemption.
async fn redemption_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.engine.record(&id) {
        Some(record) => Json(record).into_response(),
        None => not_found("redemption", &id),
    }
}

/// `POST /proofs` — attach proof-of-aid evidence to a redemption.
async fn attach_proof_handler(
    State(state): State<AppState>,
    Json(req): Json<AttachProofRequest>,
) -> Response {
    match state
        .engine
        .attach_proof(&req.redemption_id, &req.evidence_hash, &req.description)
        .await
    {
        Ok(proof) => {
            state.metrics.proofs_attached_total.inc();
            (StatusCode::CREATED, Json(proof)).into_response()
        }
        Err(err) => reject(err),
    }
}

/// `GET /proofs/:id` — proof snapshot.
async fn proof_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.engine.proof(&id) {
        Some(proof) => Json(proof).into_response(),
        None => not_found("proof", &id),
    }
}

/// `POST /proofs/:id/review` — verify or reject a pending proof.
async fn review_proof_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<ReviewProofRequest>,
) -> Response {
    match state
        .engine
        .review_proof(&id, &req.reviewer, req.decision)
        .await
    {
        Ok(proof) => Json(proof).into_response(),
        Err(err) => reject(err),
    }
}

/// `GET /alerts` — fraud alerts collected since startup, oldest first.
async fn alerts_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.alerts.read().clone())
}

/// `GET /ws` — WebSocket upgrade for the live operator feed.
///
/// Clients receive JSON frames tagged by channel: `event` frames carry
/// ledger event envelopes, `alert` frames carry fraud alerts. The
/// connection is push-only; client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

/// Drives a single WebSocket connection until the client disconnects or
/// both upstream channels close.
async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut events = state.bus.subscribe();
    let mut alerts = state.alert_feed.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(envelope) => {
                        let frame = serde_json::json!({ "channel": "event", "payload": envelope });
                        if send_json(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            alert = alerts.recv() => {
                match alert {
                    Ok(alert) => {
                        let frame = serde_json::json!({ "channel": "alert", "payload": alert });
                        if send_json(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} alerts", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {
                        // Push-only channel; client messages are ignored.
                    }
                    _ => break, // Disconnected or error.
                }
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, frame: &serde_json::Value) -> Result<(), ()> {
    let payload = match serde_json::to_string(frame) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("failed to serialize ws frame: {}", e);
            return Ok(());
        }
    };
    socket
        .send(Message::Text(payload))
        .await
        .map_err(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
