//! Typed bindings for each backend endpoint.
//!
//! Thin wrappers over [`Gateway`] that fix the method, path and body type
//! of every call. Inputs with client-side rules ([`search`],
//! [`submit_feedback`]) are validated here, before the gateway is touched.

use rag_client_core::models::{
    FeedbackRequest, FeedbackResponse, HealthResponse, HistoryResponse, LoginRequest,
    LoginResponse, LogoutResponse, SearchRequest, SearchResponse,
};
use rag_client_core::validate::{FeedbackValidationError, MAX_RATING, MIN_RATING};

use crate::error::{ApiResult, HttpError};
use crate::gateway::Gateway;

pub const LOGIN_PATH: &str = "/api/v1/auth/login";
pub const LOGOUT_PATH: &str = "/api/v1/auth/logout";
pub const SEARCH_PATH: &str = "/api/v1/search";
pub const HISTORY_PATH: &str = "/api/v1/users/me/history";
pub const FEEDBACK_PATH: &str = "/api/v1/feedback";
pub const HEALTH_PATH: &str = "/health";

pub async fn login(gateway: &Gateway, request: &LoginRequest) -> Result<LoginResponse, HttpError> {
    gateway.post(LOGIN_PATH, Some(request)).await
}

pub async fn logout(gateway: &Gateway) -> Result<LogoutResponse, HttpError> {
    gateway.post::<(), _>(LOGOUT_PATH, None).await
}

/// Ask a question. The query length is checked before any request is sent.
pub async fn search(gateway: &Gateway, request: &SearchRequest) -> ApiResult<SearchResponse> {
    request.validate()?;
    Ok(gateway.post(SEARCH_PATH, Some(request)).await?)
}

pub async fn history(
    gateway: &Gateway,
    page: u32,
    page_size: u32,
) -> Result<HistoryResponse, HttpError> {
    gateway
        .get(
            HISTORY_PATH,
            &[("page", page.to_string()), ("page_size", page_size.to_string())],
        )
        .await
}

/// Rate an answer. The rating range is re-checked here so that a request
/// built by hand cannot bypass [`FeedbackDraft`](rag_client_core::validate::FeedbackDraft).
pub async fn submit_feedback(
    gateway: &Gateway,
    request: &FeedbackRequest,
) -> ApiResult<FeedbackResponse> {
    if request.rating < MIN_RATING {
        return Err(FeedbackValidationError::MissingRating.into());
    }
    if request.rating > MAX_RATING {
        return Err(FeedbackValidationError::RatingOutOfRange(request.rating).into());
    }
    Ok(gateway.post(FEEDBACK_PATH, Some(request)).await?)
}

pub async fn health(gateway: &Gateway) -> Result<HealthResponse, HttpError> {
    gateway.get(HEALTH_PATH, &[]).await
}
