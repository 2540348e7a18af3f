// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! REST API for the loyalty engine.
//!
//! ## Endpoints
//!
//! - `GET /health` - Liveness probe
//! - `GET /tenants` - List participating businesses (no auth)
//! - `POST /auth/login` - Exchange phone number and password for a token
//! - `GET /auth/profile` - Current customer
//! - `POST /auth/change-password` - Replace the current customer's password
//! - `GET /rewards?tenantId=` - Active rewards, cheapest first
//! - `POST /rewards/redeem` - Spend points on a reward
//! - `GET /balance?tenantId=` - Balance with one tenant
//! - `GET /transactions` - Full history across tenants, newest first
//! - `GET /transactions/recent` - The 10 most recent entries
//!
//! Every JSON body carries `success`; failures also carry `message`.
//!
//! ## Example Usage
//!
//! ```bash
//! TOKEN=$(curl -s -X POST http://localhost:8081/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"phoneNumber": "+5511900000001", "password": "changeme1"}' | jq -r .token)
//!
//! curl -X POST http://localhost:8081/rewards/redeem \
//!   -H "Authorization: Bearer $TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"rewardId": "33333333-3333-4333-8333-333333333333"}'
//! ```

use crate::auth::AccessGate;
use crate::base::{CustomerId, RewardId, TenantId};
use crate::catalog::CatalogEntry;
use crate::customer::Customer;
use crate::engine::{BalanceSummary, Engine};
use crate::error::Entity;
use crate::tenant::Tenant;
use crate::transaction::Transaction;
use crate::LedgerError;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Query, Request, State, rejection::JsonRejection},
    http::{HeaderName, Method, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use validator::{Validate, ValidationErrors};

/// Header carrying the shared application signature.
pub const APP_SIGNATURE_HEADER: &str = "x-awd-app-signature";

/// Entries returned by `GET /transactions/recent`.
pub const RECENT_LIMIT: usize = 10;

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gate: Arc<AccessGate>,
    /// Coarse request gate; `None` disables it.
    pub app_signature: Option<Arc<str>>,
}

// === Error Handling ===

/// Wrapper for converting [`LedgerError`] into HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(LedgerError::InvalidInput(rejection.body_text()))
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .values()
            .flat_map(|errs| errs.iter())
            .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| errors.to_string());
        ApiError(LedgerError::InvalidInput(message))
    }
}

/// Body of every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl ErrorResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            LedgerError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Invalid or missing token".to_string()),
            LedgerError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()),
            LedgerError::NotFound(entity) => (StatusCode::NOT_FOUND, not_found_message(*entity).to_string()),
            LedgerError::InsufficientPoints { shortfall } => (
                StatusCode::BAD_REQUEST,
                format!("Insufficient points: {shortfall} more points required"),
            ),
            LedgerError::InvalidPoints | LedgerError::BalanceOverflow => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            LedgerError::InvalidInput(message) => (StatusCode::BAD_REQUEST, message.clone()),
            LedgerError::Conflict => (
                StatusCode::CONFLICT,
                "Balance changed concurrently, please retry".to_string(),
            ),
            LedgerError::Internal(detail) => {
                tracing::error!("internal error: {detail}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

fn not_found_message(entity: Entity) -> &'static str {
    match entity {
        Entity::Tenant => "Tenant not found",
        Entity::Customer => "User not found",
        Entity::Reward => "Reward not found",
    }
}

// === Authentication ===

/// Customer resolved from the `Authorization: Bearer` header.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedCustomer(pub CustomerId);

impl FromRequestParts<AppState> for AuthenticatedCustomer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(LedgerError::Unauthenticated)?;

        let customer_id = state.gate.authenticate(token).inspect_err(|_| {
            tracing::debug!(uri = %parts.uri, "rejected bearer token");
        })?;
        Ok(AuthenticatedCustomer(customer_id))
    }
}

async fn require_app_signature(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = state.app_signature.as_deref() {
        let provided = request
            .headers()
            .get(APP_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        let valid = provided.is_some_and(|provided| constant_time_eq(provided.as_bytes(), expected.as_bytes()));
        if !valid {
            tracing::warn!(uri = %request.uri(), "request without a valid app signature");
            return (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new("Forbidden: Invalid app signature")),
            )
                .into_response();
        }
    }
    next.run(request).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (left, right) in a.iter().zip(b.iter()) {
        diff |= left ^ right;
    }
    diff == 0
}

/// Runs CPU-heavy credential work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LedgerError::Internal(format!("blocking task failed: {e}")))?
        .map_err(ApiError)
}

fn parse_id<T: std::str::FromStr>(raw: &str, field: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError(LedgerError::InvalidInput(format!("Invalid {field}"))))
}

// === Request/Response DTOs ===

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Phone number and password are required"))]
    pub phone_number: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "Phone number and password are required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: Customer,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: Customer,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    #[validate(length(min = 8, message = "Password must be at least 8 characters long"))]
    pub new_password: String,
}

/// Response body for operations that only report an outcome.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct TenantSummary {
    pub id: TenantId,
    pub name: String,
}

impl From<Tenant> for TenantSummary {
    fn from(tenant: Tenant) -> Self {
        Self {
            id: tenant.id,
            name: tenant.name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TenantsResponse {
    pub success: bool,
    pub tenants: Vec<TenantSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantQuery {
    pub tenant_id: Option<String>,
}

impl TenantQuery {
    fn tenant_id(&self) -> Result<Option<TenantId>, ApiError> {
        self.tenant_id
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_id(raw, "tenant ID"))
            .transpose()
    }
}

#[derive(Debug, Serialize)]
pub struct RewardsResponse {
    pub success: bool,
    pub rewards: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    #[validate(required(message = "Reward ID is required"))]
    pub reward_id: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    pub success: bool,
    pub message: String,
    pub transaction: Transaction,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub success: bool,
    #[serde(flatten)]
    pub summary: BalanceSummary,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub success: bool,
    pub transactions: Vec<Transaction>,
}

// === Handlers ===

async fn health() -> &'static str {
    "OK"
}

/// GET /tenants - Participating businesses ordered by name.
async fn list_tenants(State(state): State<AppState>) -> Json<TenantsResponse> {
    let tenants = state
        .engine
        .tenants()
        .list()
        .into_iter()
        .map(TenantSummary::from)
        .collect();
    Json(TenantsResponse {
        success: true,
        tenants,
    })
}

/// POST /auth/login
async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(request) = payload?;
    request.validate()?;

    let gate = Arc::clone(&state.gate);
    let session = blocking(move || gate.login(&request.phone_number, &request.password)).await?;
    Ok(Json(LoginResponse {
        success: true,
        token: session.token,
        user: session.customer,
    }))
}

/// GET /auth/profile
async fn profile(
    State(state): State<AppState>,
    AuthenticatedCustomer(customer_id): AuthenticatedCustomer,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = state
        .engine
        .customers()
        .get(&customer_id)
        .ok_or(LedgerError::NotFound(Entity::Customer))?;
    Ok(Json(ProfileResponse { success: true, user }))
}

/// POST /auth/change-password
async fn change_password(
    State(state): State<AppState>,
    AuthenticatedCustomer(customer_id): AuthenticatedCustomer,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload?;
    request.validate()?;

    let gate = Arc::clone(&state.gate);
    blocking(move || gate.change_password(customer_id, &request.new_password)).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Password updated successfully".into(),
    }))
}

/// GET /rewards?tenantId=
async fn list_rewards(
    State(state): State<AppState>,
    _customer: AuthenticatedCustomer,
    Query(query): Query<TenantQuery>,
) -> Result<Json<RewardsResponse>, ApiError> {
    let rewards = state.engine.list_active_rewards(query.tenant_id()?)?;
    Ok(Json(RewardsResponse {
        success: true,
        rewards,
    }))
}

/// POST /rewards/redeem
async fn redeem(
    State(state): State<AppState>,
    AuthenticatedCustomer(customer_id): AuthenticatedCustomer,
    payload: Result<Json<RedeemRequest>, JsonRejection>,
) -> Result<Json<RedeemResponse>, ApiError> {
    let Json(request) = payload?;
    request.validate()?;

    let raw_reward = request.reward_id.as_deref().unwrap_or_default();
    let reward_id: RewardId = parse_id(raw_reward, "reward ID")?;
    let tenant_id = match request.tenant_id.as_deref().filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => parse_id(raw, "tenant ID")?,
        None => state.engine.redeemable_reward(reward_id)?.tenant_id,
    };

    let transaction = state.engine.redeem(tenant_id, customer_id, reward_id)?;
    Ok(Json(RedeemResponse {
        success: true,
        message: "Reward redeemed successfully".into(),
        balance: transaction.resulting_balance,
        transaction,
    }))
}

/// GET /balance?tenantId=
async fn balance(
    State(state): State<AppState>,
    AuthenticatedCustomer(customer_id): AuthenticatedCustomer,
    Query(query): Query<TenantQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let tenant_id = query
        .tenant_id()?
        .ok_or_else(|| LedgerError::InvalidInput("Tenant ID is required".into()))?;
    let summary = state.engine.balance_summary(tenant_id, customer_id)?;
    Ok(Json(BalanceResponse {
        success: true,
        summary,
    }))
}

/// GET /transactions
async fn transactions(
    State(state): State<AppState>,
    AuthenticatedCustomer(customer_id): AuthenticatedCustomer,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let transactions = state.engine.transactions(customer_id)?;
    Ok(Json(TransactionsResponse {
        success: true,
        transactions,
    }))
}

/// GET /transactions/recent
async fn recent_transactions(
    State(state): State<AppState>,
    AuthenticatedCustomer(customer_id): AuthenticatedCustomer,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let transactions = state.engine.recent_transactions(customer_id, RECENT_LIMIT)?;
    Ok(Json(TransactionsResponse {
        success: true,
        transactions,
    }))
}

// === Router ===

/// Builds the API router. `/health` bypasses the app signature gate.
pub fn create_router(state: AppState) -> Router {
    // Outermost, so preflight requests are answered before the signature check.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(APP_SIGNATURE_HEADER),
        ]);

    Router::new()
        .route("/tenants", get(list_tenants))
        .route("/auth/login", post(login))
        .route("/auth/profile", get(profile))
        .route("/auth/change-password", post(change_password))
        .route("/rewards", get(list_rewards))
        .route("/rewards/redeem", post(redeem))
        .route("/balance", get(balance))
        .route("/transactions", get(transactions))
        .route("/transactions/recent", get(recent_transactions))
        .layer(middleware::from_fn_with_state(state.clone(), require_app_signature))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}
