use crate::state::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use bloom_core::analytics::PerformanceReport;
use bloom_core::frames::{self, FrameAction, FrameScreen};
use bloom_core::llm::{self, CompletionBackend, LlmOutcome};
use bloom_core::models::{AgentStatus, BountyStatus, NewAgent, NewBounty, TransactionType};
use bloom_core::staking::{self, RoiEstimate};
use bloom_core::store::Store;
use bloom_core::wallet;
use bloom_core::BloomError;
use bloom_schema::{
    validate_create_agent, validate_create_bounty, validate_create_user, CreateAgentV1,
    CreateBountyV1, CreateUserV1,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Credits charged for one agent run.
pub const AGENT_RUN_COST: f64 = 10.0;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user))
        .route("/users/:id/agents", get(list_agents))
        .route("/users/:id/transactions", get(list_transactions))
        .route("/users/:id/credits", post(purchase_credits))
        .route("/users/:id/stake", post(stake))
        .route("/users/:id/analytics", get(analytics))
        .route("/users/:id/insights", get(insights))
        .route("/agents", post(create_agent))
        .route("/agents/:id", delete(delete_agent))
        .route("/agents/:id/status", patch(set_agent_status))
        .route("/agents/:id/run", post(run_agent))
        .route("/agents/:id/optimize", post(optimize_agent))
        .route("/bounties", get(list_bounties).post(create_bounty))
        .route("/bounties/:id", delete(delete_bounty))
        .route("/bounties/:id/claim", post(claim_bounty))
        .route("/bounties/:id/close", post(close_bounty))
        .route("/bounties/:id/score", post(score_bounty))
        .route("/roi", get(roi))
        .route("/frames/action", post(frame_action))
        .route("/frames/:screen", get(frame))
        .route("/frames/:screen/image.svg", get(frame_image))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Core(BloomError),
    BadRequest(String),
    LlmDisabled,
    Rejected(StatusCode, String),
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Rejected(rejection.status(), rejection.body_text())
    }
}

/// `Json` whose rejections use the API's error body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query` whose rejections use the API's error body.
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

impl From<BloomError> for ApiError {
    fn from(err: BloomError) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Core(err) => {
                let status = match &err {
                    BloomError::NotFound { .. } => StatusCode::NOT_FOUND,
                    BloomError::Validation { .. } => StatusCode::BAD_REQUEST,
                    BloomError::Conflict(_) => StatusCode::CONFLICT,
                    BloomError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
                    BloomError::Llm(_) | BloomError::Wallet(_) => StatusCode::BAD_GATEWAY,
                    BloomError::Unimplemented(_) => StatusCode::NOT_IMPLEMENTED,
                    BloomError::Database(_) | BloomError::Io(_) | BloomError::Serialization(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::LlmDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "completion backend not configured".to_string(),
            ),
            ApiError::Rejected(status, msg) => (status, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        if status.is_server_error() {
            tracing::error!(%status, %message, "request failed");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Runs blocking core work (SQLite, completion calls) off the async workers.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> bloom_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {e}")))?
        .map_err(ApiError::from)
}

fn completion_backend(state: &AppState) -> ApiResult<Arc<dyn CompletionBackend>> {
    state.llm.clone().ok_or(ApiError::LlmDisabled)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Generated<T> {
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub result: T,
}

impl<T> From<LlmOutcome<T>> for Generated<T> {
    fn from(outcome: LlmOutcome<T>) -> Self {
        match outcome {
            LlmOutcome::Parsed(result) => Generated {
                fallback: false,
                fallback_reason: None,
                result,
            },
            LlmOutcome::Fallback { value, reason } => Generated {
                fallback: true,
                fallback_reason: Some(reason),
                result: value,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: AgentStatus,
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub submission: String,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct BountyFilter {
    pub status: Option<BountyStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoiQuery {
    pub staked: f64,
    pub credits_used: f64,
    pub days: f64,
}

#[derive(Debug, Deserialize)]
pub struct ScreenQuery {
    pub screen: FrameScreen,
}

// users

async fn create_user(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateUserV1>,
) -> ApiResult<impl IntoResponse> {
    validate_create_user(&payload).map_err(ApiError::BadRequest)?;
    let user = blocking(move || {
        state
            .db
            .upsert_user(&payload.wallet_address.to_lowercase(), payload.fid)
    })
    .await?;
    Ok(Json(user))
}

async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(move || state.db.user(&id)).await?))
}

async fn list_agents(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(move || state.db.agents_for_user(&user_id)).await?))
}

async fn list_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        blocking(move || state.db.transactions_for_user(&user_id)).await?,
    ))
}

async fn purchase_credits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiJson(payload): ApiJson<AmountRequest>,
) -> ApiResult<impl IntoResponse> {
    let purchase = blocking(move || {
        state.db.user(&user_id)?;
        wallet::purchase_credits(
            &state.db,
            state.custody.as_ref(),
            state.chain.as_ref(),
            &user_id,
            payload.amount,
        )
    })
    .await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

async fn stake(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ApiJson(payload): ApiJson<AmountRequest>,
) -> ApiResult<impl IntoResponse> {
    let grant = blocking(move || state.db.stake(&user_id, payload.amount)).await?;
    Ok((StatusCode::CREATED, Json(grant)))
}

async fn analytics(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(report_for(state, user_id).await?))
}

async fn insights(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let backend = completion_backend(&state)?;
    let report = report_for(state, user_id).await?;
    let outcome = blocking(move || llm::performance_insights(backend.as_ref(), &report)).await?;
    Ok(Json(Generated::from(outcome)))
}

async fn report_for(state: AppState, user_id: String) -> ApiResult<PerformanceReport> {
    blocking(move || Store::hydrate(&state.db, &user_id)?.performance_report()).await
}

// agents

async fn create_agent(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateAgentV1>,
) -> ApiResult<impl IntoResponse> {
    validate_create_agent(&payload).map_err(ApiError::BadRequest)?;
    let new = NewAgent {
        user_id: payload.user_id,
        name: payload.name,
        description: payload.description,
        prompt_template: payload.prompt_template,
    };
    let agent = blocking(move || state.db.insert_agent(&new)).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn delete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    blocking(move || state.db.delete_agent(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_agent_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<StatusUpdate>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        blocking(move || state.db.update_agent_status(&id, payload.status)).await?,
    ))
}

/// Charges the run cost, then prompts the agent. The charge is not refunded
/// when the completion call fails; the run is recorded as failed instead.
async fn run_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<RunRequest>,
) -> ApiResult<impl IntoResponse> {
    let backend = completion_backend(&state)?;
    let output = blocking(move || {
        let agent = state.db.agent(&id)?;
        state.db.record_transaction(
            &agent.user_id,
            TransactionType::Spend,
            AGENT_RUN_COST,
            Some(format!("Run agent {}", agent.name)),
        )?;
        match llm::run_agent(backend.as_ref(), &agent, &payload.input) {
            Ok(output) => {
                state.db.record_run(&agent.id, true, 0.0)?;
                Ok(output)
            }
            Err(err) => {
                state.db.record_run(&agent.id, false, 0.0)?;
                Err(err)
            }
        }
    })
    .await?;
    Ok(Json(output))
}

async fn optimize_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let backend = completion_backend(&state)?;
    let outcome = blocking(move || {
        let agent = state.db.agent(&id)?;
        llm::optimize_prompt(backend.as_ref(), &agent.prompt_template, &agent.performance)
    })
    .await?;
    Ok(Json(Generated::from(outcome)))
}

// bounties

async fn list_bounties(
    State(state): State<AppState>,
    ApiQuery(filter): ApiQuery<BountyFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(blocking(move || state.db.bounties(filter.status)).await?))
}

async fn delete_bounty(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    blocking(move || state.db.delete_bounty(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_bounty(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateBountyV1>,
) -> ApiResult<impl IntoResponse> {
    validate_create_bounty(&payload).map_err(ApiError::BadRequest)?;
    let new = NewBounty {
        creator_id: payload.creator_id,
        title: payload.title,
        description: payload.description,
        reward: payload.reward,
    };
    let bounty = blocking(move || state.db.insert_bounty(&new)).await?;
    Ok((StatusCode::CREATED, Json(bounty)))
}

async fn claim_bounty(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<ClaimRequest>,
) -> ApiResult<impl IntoResponse> {
    let bounty = blocking(move || {
        if !state.db.claim_bounty(&id, &payload.agent_id)? {
            return Err(BloomError::Conflict(format!("bounty {id} is not open")));
        }
        state.db.bounty(&id)
    })
    .await?;
    Ok(Json(bounty))
}

async fn close_bounty(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let bounty = blocking(move || {
        if !state.db.close_bounty(&id)? {
            return Err(BloomError::Conflict(format!("bounty {id} is not in progress")));
        }
        state.db.bounty(&id)
    })
    .await?;
    Ok(Json(bounty))
}

async fn score_bounty(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<ScoreRequest>,
) -> ApiResult<impl IntoResponse> {
    if payload.submission.trim().is_empty() {
        return Err(ApiError::BadRequest("submission is required".into()));
    }
    let backend = completion_backend(&state)?;
    let outcome = blocking(move || {
        let bounty = state.db.bounty(&id)?;
        llm::score_submission(backend.as_ref(), &bounty, &payload.submission)
    })
    .await?;
    Ok(Json(Generated::from(outcome)))
}

// analytics

async fn roi(ApiQuery(query): ApiQuery<RoiQuery>) -> ApiResult<Json<RoiEstimate>> {
    if [query.staked, query.credits_used, query.days]
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        return Err(ApiError::BadRequest(
            "staked, creditsUsed and days must be non-negative numbers".into(),
        ));
    }
    Ok(Json(staking::estimate_roi(
        query.staked,
        query.credits_used,
        query.days,
    )))
}

// frames

async fn frame(State(state): State<AppState>, Path(screen): Path<String>) -> ApiResult<Html<String>> {
    let screen: FrameScreen = screen.parse()?;
    Ok(Html(frames::render_html(screen, &state.public_url)))
}

async fn frame_image(
    Path(screen): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let screen: FrameScreen = screen.parse()?;
    Ok((
        [(header::CONTENT_TYPE, "image/svg+xml")],
        frames::render_image(screen),
    ))
}

async fn frame_action(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ScreenQuery>,
    ApiJson(action): ApiJson<FrameAction>,
) -> ApiResult<Html<String>> {
    let next = frames::validate_action(query.screen, &action)?;
    tracing::debug!(
        fid = action.untrusted_data.fid,
        from = query.screen.as_str(),
        to = next.as_str(),
        "frame action"
    );
    Ok(Html(frames::render_html(next, &state.public_url)))
}
