use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use super::broadcaster::EventBroadcaster;
use super::models::*;
use super::seed::SeedSource;
use super::simulation::{SimulationConfig, SimulationEngine};
use super::store::TransactionStore;
use super::stream::sse_response;
use crate::errors::RelayError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: Arc<TransactionStore>,
    pub engine: SimulationEngine,
    pub seed: SeedSource,
    pub keep_alive: Duration,
    pub dev_mode: bool,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Load the seed and wire store, broadcaster and engine together.
    pub fn from_seed(
        seed: SeedSource,
        simulation: SimulationConfig,
        keep_alive: Duration,
        dev_mode: bool,
    ) -> Result<Self> {
        let data = seed.load()?;
        let store = Arc::new(
            TransactionStore::with_data(EventBroadcaster::new(), data.transactions, data.prompts)
                .context("Failed to build transaction store")?,
        );
        let engine = SimulationEngine::new(Arc::clone(&store), simulation);
        Ok(Self {
            store,
            engine,
            seed,
            keep_alive,
            dev_mode,
        })
    }

    /// Manual status changes wait for an active run to finish, except a
    /// revert when reverts cancel runs.
    fn admit_manual(&self, id: &str, status: TransactionStatus) -> Result<(), RelayError> {
        let cancels = status == TransactionStatus::Reverted && self.engine.config().cancel_on_revert;
        if self.engine.is_active(id) && !cancels {
            return Err(RelayError::SimulationActive { id: id.to_string() });
        }
        Ok(())
    }

    fn after_revert(&self, id: &str) {
        if self.engine.config().cancel_on_revert {
            self.engine.cancel(id);
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    15
}

impl ListQuery {
    /// Empty and `all` mean no status filter.
    fn status_filter(&self) -> Result<Option<TransactionStatus>, ApiError> {
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
            Some(s) => s.parse().map(Some).map_err(ApiError::BadRequest),
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Internal(String),
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        let msg = e.to_string();
        if e.is_not_found() {
            ApiError::NotFound(msg)
        } else if e.is_conflict() {
            ApiError::Conflict(msg)
        } else {
            ApiError::Internal(msg)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route(
            "/api/transactions",
            get(list_transactions).post(create_transaction),
        )
        .route("/api/transactions/bulk", post(bulk_update))
        .route("/api/transactions/{id}", get(get_transaction))
        .route("/api/transactions/{id}/status", patch(update_status))
        .route("/api/transactions/{id}/files/reapply", post(reapply_file))
        .route("/api/transactions/{id}/reapply-failed", post(reapply_failed))
        .route("/api/prompts", get(list_prompts))
        .route("/api/events", get(events))
        .route("/api/version", get(version))
        .route("/api/dev/reset", post(reset_seed))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn version(State(state): State<SharedState>) -> impl IntoResponse {
    let environment = if state.dev_mode { "development" } else { "stable" };
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "environment": environment,
    }))
}

async fn list_transactions(
    State(state): State<SharedState>,
    Query(params): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = params.status_filter()?;
    let transactions = state.store.list(
        params.page.max(1),
        params.limit,
        params.search.as_deref(),
        status,
    )?;
    Ok(Json(transactions))
}

async fn create_transaction(
    State(state): State<SharedState>,
    Json(transaction): Json<Transaction>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = state.store.insert(transaction)?;
    info!(transaction_id = %stored.id, "transaction proposed");
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn get_transaction(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.get(&id)?))
}

/// APPLYING starts a simulation and returns the transaction as it stands
/// right after the call; later transitions arrive on the event stream.
async fn update_status(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction = if req.status == TransactionStatus::Applying {
        state.engine.start_simulation(&id, req.scenario)?.transaction
    } else {
        state.admit_manual(&id, req.status)?;
        let updated = state.store.update_status(&id, req.status)?;
        if req.status == TransactionStatus::Reverted {
            state.after_revert(&id);
        }
        updated
    };
    info!(transaction_id = %id, status = %transaction.status, "status change accepted");
    Ok(Json(transaction))
}

async fn bulk_update(
    State(state): State<SharedState>,
    Json(req): Json<BulkActionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated_ids = if req.action == TransactionStatus::Applying {
        let mut started = Vec::with_capacity(req.ids.len());
        for id in &req.ids {
            match state.engine.start_simulation(id, None) {
                Ok(_) => started.push(id.clone()),
                Err(e) => warn!(transaction_id = %id, error = %e, "skipping bulk apply"),
            }
        }
        started
    } else {
        let admitted: Vec<String> = req
            .ids
            .iter()
            .filter(|id| match state.admit_manual(id, req.action) {
                Ok(()) => true,
                Err(e) => {
                    warn!(transaction_id = %id, error = %e, "skipping bulk update");
                    false
                }
            })
            .cloned()
            .collect();
        let updated = state.store.update_status_bulk(&admitted, req.action)?;
        if req.action == TransactionStatus::Reverted {
            for id in &updated {
                state.after_revert(id);
            }
        }
        updated
    };
    info!(
        action = %req.action,
        requested = req.ids.len(),
        updated = updated_ids.len(),
        "bulk action applied"
    );
    Ok(Json(BulkActionResponse {
        success: true,
        updated_ids,
    }))
}

async fn reapply_file(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ReapplyFileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.reapply_file(&id, &req.file_path)?;
    Ok(Json(serde_json::json!({"success": true})))
}

async fn reapply_failed(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.reapply_all_failed(&id)?;
    Ok(Json(serde_json::json!({"success": true})))
}

async fn list_prompts(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.prompts()?))
}

async fn events(State(state): State<SharedState>) -> impl IntoResponse {
    sse_response(state.store.broadcaster(), state.keep_alive)
}

async fn reset_seed(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let data = state
        .seed
        .load()
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    state.engine.cancel_all();
    state.store.replace_all(data.transactions, data.prompts)?;
    info!(source = %state.seed, "seed data reset");
    Ok(Json(serde_json::json!({"success": true, "message": "Seed data reset"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::models::fixtures::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(transactions: Vec<Transaction>, prompts: Vec<Prompt>) -> SharedState {
        let store = Arc::new(
            TransactionStore::with_data(EventBroadcaster::new(), transactions, prompts).unwrap(),
        );
        let engine = SimulationEngine::new(Arc::clone(&store), SimulationConfig::default());
        Arc::new(AppState {
            store,
            engine,
            seed: SeedSource::Builtin,
            keep_alive: Duration::from_secs(5),
            dev_mode: false,
        })
    }

    fn test_app(transactions: Vec<Transaction>) -> Router {
        api_router().with_state(test_state(transactions, vec![]))
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn send_json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn failed_tx(id: &str) -> Transaction {
        let mut t = tx_with_files(id, &["a.rs", "b.rs"]);
        t.status = TransactionStatus::PartiallyApplied;
        t.set_file_apply_status("b.rs", FileApplyStatus::Failed, Some("conflict".into()));
        t.set_file_apply_status("a.rs", FileApplyStatus::Applied, None);
        t
    }

    // 1. Health check
    #[tokio::test]
    async fn test_health_check() {
        let app = test_app(vec![]);
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].is_string());
    }

    // 2. Version
    #[tokio::test]
    async fn test_version() {
        let app = test_app(vec![]);
        let response = app.oneshot(get("/api/version")).await.unwrap();
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["environment"], "stable");
    }

    // 3. List uses default page size
    #[tokio::test]
    async fn test_list_default_pagination() {
        let txs = (1..=20)
            .map(|i| tx(&format!("tx-{}", i), TransactionStatus::Pending))
            .collect();
        let app = test_app(txs);

        let response = app.clone().oneshot(get("/api/transactions")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page1: Vec<Transaction> = body_json(response.into_body()).await;
        assert_eq!(page1.len(), 15);

        let response = app
            .oneshot(get("/api/transactions?page=2&limit=15"))
            .await
            .unwrap();
        let page2: Vec<Transaction> = body_json(response.into_body()).await;
        assert_eq!(page2.len(), 5);
        assert_eq!(page2[0].id, "tx-16");
    }

    // 4. List filters
    #[tokio::test]
    async fn test_list_filters() {
        let mut b = tx("tx-b", TransactionStatus::Applied);
        b.description = "Tune the scheduler".into();
        let app = test_app(vec![tx("tx-a", TransactionStatus::Pending), b]);

        let response = app
            .clone()
            .oneshot(get("/api/transactions?status=APPLIED"))
            .await
            .unwrap();
        let applied: Vec<Transaction> = body_json(response.into_body()).await;
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id, "tx-b");

        let response = app
            .clone()
            .oneshot(get("/api/transactions?search=SCHEDULER"))
            .await
            .unwrap();
        let found: Vec<Transaction> = body_json(response.into_body()).await;
        assert_eq!(found.len(), 1);

        let response = app
            .oneshot(get("/api/transactions?status=all&search=nothing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let none: Vec<Transaction> = body_json(response.into_body()).await;
        assert!(none.is_empty());
    }

    // 5. Invalid status filter
    #[tokio::test]
    async fn test_list_invalid_status() {
        let app = test_app(vec![]);
        let response = app
            .oneshot(get("/api/transactions?status=SHIPPED"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert!(body["error"].as_str().unwrap().contains("SHIPPED"));
    }

    // 6. Get transaction
    #[tokio::test]
    async fn test_get_transaction() {
        let app = test_app(vec![tx("tx-1", TransactionStatus::Pending)]);

        let response = app.clone().oneshot(get("/api/transactions/tx-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let t: Transaction = body_json(response.into_body()).await;
        assert_eq!(t.id, "tx-1");

        let response = app.oneshot(get("/api/transactions/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // 6b. Proposing a transaction
    #[tokio::test]
    async fn test_create_transaction() {
        let app = test_app(vec![tx("tx-1", TransactionStatus::Pending)]);
        let body = serde_json::json!({
            "id": "tx-new",
            "status": "APPLIED",
            "description": "Add retry",
            "createdAt": "2024-06-01T10:00:00Z",
            "promptId": "p-1",
            "author": "dev",
        });

        let response = app
            .clone()
            .oneshot(send_json("POST", "/api/transactions", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let t: Transaction = body_json(response.into_body()).await;
        assert_eq!(t.status, TransactionStatus::Pending);

        let response = app
            .oneshot(send_json("POST", "/api/transactions", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    // 7. APPLYING starts a simulation; a second request conflicts
    #[tokio::test]
    async fn test_apply_starts_simulation_once() {
        let state = test_state(vec![tx("tx-1", TransactionStatus::Pending)], vec![]);
        let app = api_router().with_state(Arc::clone(&state));
        let body = serde_json::json!({"status": "APPLYING", "scenario": "long-running"});

        let response = app
            .clone()
            .oneshot(send_json("PATCH", "/api/transactions/tx-1/status", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let t: Transaction = body_json(response.into_body()).await;
        assert_eq!(t.status, TransactionStatus::Applying);
        assert!(state.engine.is_active("tx-1"));

        let response = app
            .oneshot(send_json("PATCH", "/api/transactions/tx-1/status", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    // 7b. Manual changes are refused while a run is resolving files
    #[tokio::test(start_paused = true)]
    async fn test_manual_change_refused_during_run() {
        let state = test_state(
            vec![
                tx_with_files("tx-1", &["a.rs", "b.rs", "c.rs"]),
                tx("tx-2", TransactionStatus::Applied),
            ],
            vec![],
        );
        let app = api_router().with_state(Arc::clone(&state));
        let run = state
            .engine
            .start_simulation("tx-1", Some(SimulationScenario::PartialFailure))
            .unwrap();

        for status in ["APPLIED", "FAILED", "REVERTED"] {
            let response = app
                .clone()
                .oneshot(send_json(
                    "PATCH",
                    "/api/transactions/tx-1/status",
                    serde_json::json!({ "status": status }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CONFLICT, "{} accepted", status);
        }

        let response = app
            .oneshot(send_json(
                "POST",
                "/api/transactions/bulk",
                serde_json::json!({"ids": ["tx-1", "tx-2"], "action": "REVERTED"}),
            ))
            .await
            .unwrap();
        let body: BulkActionResponse = body_json(response.into_body()).await;
        assert_eq!(body.updated_ids, vec!["tx-2"]);

        let during = state.store.get("tx-1").unwrap();
        assert_eq!(during.status, TransactionStatus::Applying);

        let settled = run.wait().await.unwrap();
        assert!(
            settled
                .file_set()
                .iter()
                .all(|f| f.apply_status.is_terminal())
        );
        assert_eq!(settled.aggregate_file_status(), Some(settled.status));
    }

    // 8. Administrative status changes
    #[tokio::test]
    async fn test_admin_status_change() {
        let app = test_app(vec![tx("tx-1", TransactionStatus::Applied)]);

        let response = app
            .clone()
            .oneshot(send_json(
                "PATCH",
                "/api/transactions/tx-1/status",
                serde_json::json!({"status": "COMMITTED"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let t: Transaction = body_json(response.into_body()).await;
        assert_eq!(t.status, TransactionStatus::Committed);

        let response = app
            .oneshot(send_json(
                "PATCH",
                "/api/transactions/tx-1/status",
                serde_json::json!({"status": "PENDING"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    // 9. Status change on unknown id
    #[tokio::test]
    async fn test_status_change_not_found() {
        let app = test_app(vec![]);
        let response = app
            .oneshot(send_json(
                "PATCH",
                "/api/transactions/ghost/status",
                serde_json::json!({"status": "REVERTED"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // 10. Bulk skips unknown ids
    #[tokio::test]
    async fn test_bulk_update() {
        let app = test_app(vec![tx("tx-1", TransactionStatus::Applied)]);
        let response = app
            .oneshot(send_json(
                "POST",
                "/api/transactions/bulk",
                serde_json::json!({"ids": ["tx-1", "tx-missing"], "action": "COMMITTED"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: BulkActionResponse = body_json(response.into_body()).await;
        assert!(body.success);
        assert_eq!(body.updated_ids, vec!["tx-1"]);
    }

    // 11. Bulk apply goes through the engine
    #[tokio::test]
    async fn test_bulk_apply_starts_simulations() {
        let state = test_state(
            vec![
                tx("tx-1", TransactionStatus::Pending),
                tx("tx-2", TransactionStatus::Applied),
            ],
            vec![],
        );
        let app = api_router().with_state(Arc::clone(&state));
        let response = app
            .oneshot(send_json(
                "POST",
                "/api/transactions/bulk",
                serde_json::json!({"ids": ["tx-1", "tx-2"], "action": "APPLYING"}),
            ))
            .await
            .unwrap();
        let body: BulkActionResponse = body_json(response.into_body()).await;
        assert_eq!(body.updated_ids, vec!["tx-1"]);
        assert!(state.engine.is_active("tx-1"));
        assert!(!state.engine.is_active("tx-2"));
    }

    // 12. Reapply error mapping
    #[tokio::test]
    async fn test_reapply_errors() {
        let app = test_app(vec![failed_tx("tx-1"), tx("tx-2", TransactionStatus::Applied)]);

        let response = app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/transactions/tx-1/files/reapply",
                serde_json::json!({"filePath": "a.rs"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(send_json(
                "POST",
                "/api/transactions/tx-1/files/reapply",
                serde_json::json!({"filePath": "zzz.rs"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(send_json("POST", "/api/transactions/tx-2/reapply-failed", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .oneshot(send_json("POST", "/api/transactions/ghost/reapply-failed", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    // 13. Reapply a failed file
    #[tokio::test]
    async fn test_reapply_failed_file_accepted() {
        let state = test_state(vec![failed_tx("tx-1")], vec![]);
        let app = api_router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(send_json(
                "POST",
                "/api/transactions/tx-1/files/reapply",
                serde_json::json!({"filePath": "b.rs"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(body["success"], true);

        let t = state.store.get("tx-1").unwrap();
        assert_eq!(t.file("b.rs").unwrap().apply_status, FileApplyStatus::Applying);
        assert!(state.engine.is_active("tx-1"));
    }

    // 14. Prompts
    #[tokio::test]
    async fn test_list_prompts() {
        let prompt = Prompt {
            id: "p-1".into(),
            title: "Refactor".into(),
            content: String::new(),
            timestamp: String::new(),
            status: PromptStatus::Active,
        };
        let app = api_router().with_state(test_state(vec![], vec![prompt]));
        let response = app.oneshot(get("/api/prompts")).await.unwrap();
        let prompts: Vec<Prompt> = body_json(response.into_body()).await;
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].title, "Refactor");
    }

    // 15. Dev reset restores the seed
    #[tokio::test]
    async fn test_dev_reset() {
        let state = test_state(vec![tx("tx-temp", TransactionStatus::Pending)], vec![]);
        let app = api_router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/dev/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.store.get("tx-temp").is_err());
        let seed = SeedSource::Builtin.load().unwrap();
        assert_eq!(state.store.snapshot().unwrap().len(), seed.transactions.len());
    }

    // 16. Event stream opens with a connected frame and unsubscribes on drop
    #[tokio::test]
    async fn test_events_stream() {
        let state = test_state(vec![tx("tx-1", TransactionStatus::Applied)], vec![]);
        let app = api_router().with_state(Arc::clone(&state));

        let response = app.oneshot(get("/api/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        assert_eq!(state.store.broadcaster().subscriber_count(), 1);

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.contains(r#"data: {"type":"connected"}"#), "got {:?}", text);

        state
            .store
            .update_status("tx-1", TransactionStatus::Committed)
            .unwrap();
        let next = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let text = String::from_utf8(next.to_vec()).unwrap();
        assert!(text.contains(r#""type":"transaction""#));
        assert!(text.contains(r#""status":"COMMITTED""#));

        drop(body);
        assert_eq!(state.store.broadcaster().subscriber_count(), 0);
    }
}
