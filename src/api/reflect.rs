//! Reflection endpoint: classify, reply, remember

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};

use super::{ApiError, ApiState};
use crate::reflection::{ReflectRequest, ReflectResponse};

const TEXT_REQUIRED: &str = "Text is required";
const REFLECTION_FAILED: &str = "Failed to process reflection";

async fn reflect(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<ReflectRequest>, JsonRejection>,
) -> Result<Json<ReflectResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(error = %e, "rejected reflect body");
        ApiError::BadRequest(TEXT_REQUIRED)
    })?;

    let text = request.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest(TEXT_REQUIRED));
    }

    let Some(engine) = state.engine.as_ref() else {
        tracing::error!("reflection requested but no engine is configured");
        return Err(ApiError::Internal(REFLECTION_FAILED));
    };

    // Users are only created once there is a turn to store for them
    let reflection = engine.reflect(text).await.map_err(|e| {
        tracing::error!(error = %e, "reflection failed");
        ApiError::Internal(REFLECTION_FAILED)
    })?;

    let user = state
        .users
        .resolve(request.user_id.as_deref())
        .map_err(|e| {
            tracing::error!(error = %e, "failed to resolve user");
            ApiError::Internal(REFLECTION_FAILED)
        })?;

    state
        .turns
        .add(&user.id, text, reflection.tone, &reflection.response)
        .map_err(|e| {
            tracing::error!(user_id = %user.id, error = %e, "failed to store turn");
            ApiError::Internal(REFLECTION_FAILED)
        })?;

    tracing::info!(user_id = %user.id, tone = %reflection.tone, "reflection served");

    Ok(Json(ReflectResponse {
        response: reflection.response,
        tone: reflection.tone,
        user_id: user.id,
    }))
}

/// Build reflection router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/reflect", post(reflect))
        .with_state(state)
}
