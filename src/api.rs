use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::app::App;
use crate::error::AppError;
use crate::model::order::OrderAck;
use crate::model::position::Position;
use crate::model::trade::Trade;
use crate::model::user::{User, UserSettings};

const RECENT_TRADES_DEFAULT: usize = 50;

/// JSON error body with a status derived from the error kind.
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Broker(_) | AppError::Ingest(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Storage(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
struct StreamStartRequest {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

#[derive(Debug, Deserialize)]
struct OrderBody {
    symbol: String,
    qty: f64,
    side: String,
}

#[derive(Debug, Deserialize)]
struct RecentTradesQuery {
    limit: Option<usize>,
}

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/greet/{name}", get(greet))
        .route("/api/account/balance", get(account_balance))
        .route("/api/stream/start", post(start_stream))
        .route("/api/stream/stats", get(stream_stats))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/settings/{user_id}", get(get_settings).put(put_settings))
        .route("/api/stocks/search", get(search_stocks))
        .route("/api/orders", post(place_order))
        .route("/api/portfolio", get(portfolio))
        .route("/api/trades/recent", get(recent_trades))
        .with_state(app)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn greet(State(app): State<Arc<App>>, Path(name): Path<String>) -> impl IntoResponse {
    Json(json!({ "message": app.greet(&name) }))
}

async fn account_balance(State(app): State<Arc<App>>) -> ApiResult<serde_json::Value> {
    let equity = app.account_balance().await?;
    Ok(Json(json!({ "equity": equity })))
}

async fn start_stream(
    State(app): State<Arc<App>>,
    Json(body): Json<StreamStartRequest>,
) -> impl IntoResponse {
    let status = app.start_market_stream(&body.symbol).await;
    Json(json!({ "status": status }))
}

async fn stream_stats(State(app): State<Arc<App>>) -> impl IntoResponse {
    Json(app.stream_stats())
}

async fn register(
    State(app): State<Arc<App>>,
    Json(body): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = app.register(&body.email, &body.password)?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(app): State<Arc<App>>,
    Json(body): Json<CredentialsRequest>,
) -> ApiResult<User> {
    Ok(Json(app.login(&body.email, &body.password)?))
}

async fn get_settings(
    State(app): State<Arc<App>>,
    Path(user_id): Path<i64>,
) -> ApiResult<UserSettings> {
    Ok(Json(app.settings(user_id)?))
}

async fn put_settings(
    State(app): State<Arc<App>>,
    Path(user_id): Path<i64>,
    Json(mut settings): Json<UserSettings>,
) -> ApiResult<UserSettings> {
    settings.user_id = user_id;
    app.save_settings(&settings)?;
    Ok(Json(settings))
}

async fn search_stocks(
    State(app): State<Arc<App>>,
    Query(query): Query<SearchQuery>,
) -> impl IntoResponse {
    Json(app.search_stocks(&query.q))
}

async fn place_order(
    State(app): State<Arc<App>>,
    Json(body): Json<OrderBody>,
) -> ApiResult<OrderAck> {
    Ok(Json(app.place_order(&body.symbol, body.qty, &body.side).await?))
}

async fn portfolio(State(app): State<Arc<App>>) -> ApiResult<Vec<Position>> {
    Ok(Json(app.portfolio().await?))
}

async fn recent_trades(
    State(app): State<Arc<App>>,
    Query(query): Query<RecentTradesQuery>,
) -> ApiResult<Vec<Trade>> {
    let limit = query.limit.unwrap_or(RECENT_TRADES_DEFAULT).min(1000);
    Ok(Json(app.recent_trades(limit)?))
}
