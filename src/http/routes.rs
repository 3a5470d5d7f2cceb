use crate::app_state::AppState;
use crate::error::{RelayError, RelayResult};
use crate::relay::manager::DestinationSummary;
use crate::statuspage::models::PushNotification;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use tracing::{error, warn};

/// Marker the status source sends on its outbound webhook requests.
const PUSH_USER_AGENT_MARKER: &str = "statuspage.io/webhooks/";

/// Registration handshake probe: sources verify the endpoint exists before
/// they start pushing to it.
pub async fn hook_probe(
    State(state): State<AppState>,
    Path((id, token)): Path<(String, String)>,
) -> RelayResult<StatusCode> {
    let hook_path = format!("{}/{}", id, token);
    if state.manager.has_hook(&hook_path).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(RelayError::UnknownHook)
    }
}

/// Inbound push notification: either a full incident object or a
/// component-status delta. Accepted pushes are acknowledged immediately and
/// processed asynchronously through the same delivery machinery as polling.
pub async fn receive_push(
    State(state): State<AppState>,
    Path((id, token)): Path<(String, String)>,
    headers: HeaderMap,
    Json(payload): Json<PushNotification>,
) -> RelayResult<StatusCode> {
    let from_source = headers
        .get(header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .is_some_and(|ua| ua.contains(PUSH_USER_AGENT_MARKER));
    if !from_source {
        return Err(RelayError::UnauthorizedPush);
    }

    let hook_path = format!("{}/{}", id, token);
    if !state.manager.has_hook(&hook_path).await {
        warn!("Got push for unknown hook {}", id);
        return Err(RelayError::InvalidPushTarget);
    }

    if payload.incident.is_none() && payload.component_update.is_none() {
        return Err(RelayError::MalformedPayload(
            "expected incident or component_update".to_string(),
        ));
    }

    let manager = state.manager.clone();
    tokio::spawn(async move {
        if let Err(e) = manager.handle_push(&hook_path, payload).await {
            error!("Failed to process push for {}: {}", id, e);
        }
    });

    Ok(StatusCode::NO_CONTENT)
}

/// Read-only snapshot of registered destinations.
pub async fn list_destinations(
    State(state): State<AppState>,
) -> Json<Vec<DestinationSummary>> {
    Json(state.manager.list_destinations().await)
}
