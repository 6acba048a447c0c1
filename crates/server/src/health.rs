use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use relaydesk_db::repositories::WorkspaceRepository;
use relaydesk_db::DbPool;
use relaydesk_transport::{SessionHealth, SessionRegistry};
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub workspaces: Arc<dyn WorkspaceRepository>,
    pub registry: Arc<SessionRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstanceCheck {
    pub instance: String,
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub instances: Vec<InstanceCheck>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let instances = instance_checks(&state).await;
    let ready = database.status == "ready"
        && instances.iter().all(|instance| instance.status != "degraded");

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "relaydesk-server runtime initialized".to_string(),
        },
        database,
        instances,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

/// Sessions are opened lazily, so an instance without one is `idle`, not degraded.
async fn instance_checks(state: &HealthState) -> Vec<InstanceCheck> {
    let instances = match state.workspaces.list_instances().await {
        Ok(instances) => instances,
        Err(_) => return Vec::new(),
    };

    let mut checks = Vec::with_capacity(instances.len());
    for instance in instances {
        let (status, detail) = match state.registry.health(&instance.key).await {
            None => ("idle", "no session opened yet".to_string()),
            Some(SessionHealth::Starting) => ("starting", "session is connecting".to_string()),
            Some(SessionHealth::Running { restarts }) => {
                ("ready", format!("session running after {restarts} restart(s)"))
            }
            Some(SessionHealth::Failed { reason }) => ("degraded", reason),
        };
        checks.push(InstanceCheck { instance: instance.key.0, status, detail });
    }
    checks
}
