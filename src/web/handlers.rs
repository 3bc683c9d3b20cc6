//! HTTP request handlers.

use super::AppState;
use crate::delivery::DeliveryError;
use crate::model::Destination;
use crate::session::SessionError;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

// ============================================================================
// API: Status
// ============================================================================

pub async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.status())
}

pub async fn handle_reset_status(State(state): State<AppState>) -> impl IntoResponse {
    state.session.dispatcher().reset_counters();
    Json(state.session.status())
}

pub async fn handle_get_destinations(State(state): State<AppState>) -> impl IntoResponse {
    let destinations: Vec<Destination> = state.session.dispatcher().registry().iter().cloned().collect();
    Json(destinations)
}

pub async fn handle_get_latency(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.dispatcher().latency_summary())
}

// ============================================================================
// API: Session
// ============================================================================

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn session_error_response(e: SessionError) -> Response {
    let status = match &e {
        SessionError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        SessionError::NoDestinations => StatusCode::CONFLICT,
        SessionError::Delivery(DeliveryError::InvalidSample) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Delivery(DeliveryError::NetworkUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

pub async fn handle_get_session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.snapshot().await)
}

pub async fn handle_start_session(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.start_tracking().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => session_error_response(e),
    }
}

pub async fn handle_stop_session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.stop_tracking().await)
}

// ============================================================================
// API: Diagnostics
// ============================================================================

pub async fn handle_test_destinations(State(state): State<AppState>) -> impl IntoResponse {
    state.session.test_all_destinations().await;
    Json(state.session.status())
}

pub async fn handle_send_diagnostic(State(state): State<AppState>) -> impl IntoResponse {
    match state.session.send_diagnostic_sample().await {
        Ok(_) => Json(state.session.status()).into_response(),
        Err(e) => session_error_response(e),
    }
}

pub async fn handle_health() -> impl IntoResponse {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::delivery::testing::*;
    use crate::delivery::Dispatcher;
    use crate::session::{SessionConfig, SimulatedProducer, StaticPermissions, TrackingSession};
    use crate::transport::SendOutcome;
    use std::sync::Arc;

    fn state(transport: ScriptedTransport, permissions: StaticPermissions) -> AppState {
        let dispatcher = Arc::new(Dispatcher::new(
            four_servers(),
            Arc::new(transport),
            FakeNetwork::up(),
            fast_policy(1),
        ));
        let session = TrackingSession::new(
            dispatcher,
            Arc::new(SimulatedProducer::new(52.52, 13.405)),
            Arc::new(permissions),
            SessionConfig::default(),
        );
        AppState {
            config: TrackerConfig::default(),
            session: Arc::new(session),
        }
    }

    #[tokio::test]
    async fn test_start_without_permissions_is_forbidden() {
        let state = state(ScriptedTransport::default(), StaticPermissions::none_granted());
        let response = handle_start_session(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let state = state(ScriptedTransport::default(), StaticPermissions::all_granted());

        let response = handle_start_session(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.session.is_active().await);

        let response = handle_stop_session(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.session.is_active().await);
    }

    #[tokio::test]
    async fn test_diagnostic_updates_status() {
        let state = state(
            ScriptedTransport::new([("2", SendOutcome::Timeout)]),
            StaticPermissions::all_granted(),
        );

        let response = handle_send_diagnostic(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let report = state.session.status();
        assert_eq!(report.active_connections, 3);
        assert!(!report.all_connected);
        assert_eq!(report.success_rate, 100.0);

        handle_reset_status(State(state.clone())).await;
        let report = state.session.status();
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.active_connections, 3);
    }

    #[tokio::test]
    async fn test_health() {
        let response = handle_health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
