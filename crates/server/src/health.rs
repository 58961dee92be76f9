use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use dealdesk_core::DealIntake;
use dealdesk_store::DealStore;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api;

#[derive(Clone)]
pub struct HttpState {
    pub intake: Arc<DealIntake>,
    pub store: Arc<dyn DealStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub store: HealthCheck,
    pub checked_at: String,
}

pub struct HttpServer {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl HttpServer {
    /// Stops accepting connections and waits for in-flight requests.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/deals/validate", post(api::validate_deals))
        .with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HttpState) -> std::io::Result<HttpServer> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "http endpoint started"
    );

    let (shutdown, signal) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            let _ = signal.await;
        });
        if let Err(error) = served.await {
            error!(
                event_name = "system.http.error",
                correlation_id = "bootstrap",
                error = %error,
                "http endpoint terminated unexpectedly"
            );
        }
    });

    Ok(HttpServer { shutdown, handle })
}

pub async fn health(State(state): State<HttpState>) -> (StatusCode, Json<HealthResponse>) {
    let store = store_check(state.store.as_ref()).await;
    let ready = store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "dealdesk-server runtime initialized".to_string(),
        },
        store,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn store_check(store: &dyn DealStore) -> HealthCheck {
    match store.health().await {
        Ok(()) => HealthCheck {
            status: "ready",
            detail: format!("{} store reachable", store.backend()),
        },
        Err(error) => HealthCheck {
            status: "degraded",
            detail: format!("{} store check failed: {error}", store.backend()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use dealdesk_core::{DealIntake, IntakeConfig};
    use dealdesk_store::InMemoryDealStore;

    use crate::health::{health, HttpState};

    fn state(store: Arc<InMemoryDealStore>) -> HttpState {
        HttpState {
            intake: Arc::new(DealIntake::new(IntakeConfig::default()).expect("intake")),
            store,
        }
    }

    #[tokio::test]
    async fn health_returns_ready_when_store_is_reachable() {
        let store = Arc::new(InMemoryDealStore::default());

        let (status, Json(payload)) = health(State(state(store))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.store.status, "ready");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_store_is_down() {
        let store = Arc::new(InMemoryDealStore::default());
        store.set_unavailable(true).await;

        let (status, Json(payload)) = health(State(state(store))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert!(payload.store.detail.starts_with("memory store check failed"));
        assert_eq!(payload.service.status, "ready");
    }
}
