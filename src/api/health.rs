//! Liveness and readiness probes

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use super::ApiState;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct Readiness {
    status: &'static str,
    database: Probe,
    engine: Probe,
}

/// Outcome of one dependency probe
#[derive(Serialize)]
struct Probe {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Probe {
    const fn up() -> Self {
        Self {
            status: "ok",
            detail: None,
        }
    }

    const fn down(detail: String) -> Self {
        Self {
            status: "fail",
            detail: Some(detail),
        }
    }

    fn absent() -> Self {
        Self {
            status: "unavailable",
            detail: Some("no LLM key configured".to_string()),
        }
    }

    fn is_up(&self) -> bool {
        self.status == "ok"
    }
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Ready when the database answers; the engine is reported but optional
async fn ready(State(state): State<Arc<ApiState>>) -> (StatusCode, Json<Readiness>) {
    let database = probe_database(&state);
    let engine = if state.engine.is_some() {
        Probe::up()
    } else {
        Probe::absent()
    };

    let (code, status) = if database.is_up() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(Readiness {
            status,
            database,
            engine,
        }),
    )
}

fn probe_database(state: &ApiState) -> Probe {
    let conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => return Probe::down(format!("pool: {e}")),
    };

    conn.query_row("SELECT 1", [], |_| Ok(()))
        .map_or_else(|e| Probe::down(format!("query: {e}")), |()| Probe::up())
}

/// Build health router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}
