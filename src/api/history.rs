//! Mood history endpoint

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ApiError, ApiState};
use crate::db::StoredTurn;
use crate::tone::Tone;

/// One history entry
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub text: String,
    pub tone: Tone,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredTurn> for HistoryEntry {
    fn from(turn: StoredTurn) -> Self {
        Self {
            id: turn.id,
            text: turn.input_text,
            tone: turn.tone,
            response: turn.response,
            created_at: turn.created_at,
        }
    }
}

async fn history(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let turns = state.turns.list_for_user(&user_id).map_err(|e| {
        tracing::error!(user_id = %user_id, error = %e, "failed to load history");
        ApiError::Internal("Failed to load history")
    })?;

    Ok(Json(turns.into_iter().map(HistoryEntry::from).collect()))
}

/// Build history router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/history/{user_id}", get(history))
        .with_state(state)
}
