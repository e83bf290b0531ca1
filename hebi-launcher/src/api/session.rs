use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use crate::LauncherState;
use crate::directory::DirectoryRecord;
use crate::extract::Requester;
use crate::fedid::Fedid;
use crate::http::HttpError;
use crate::lifecycle::{self, StartOutcome, StopOutcome};

#[derive(Serialize)]
pub(crate) struct SessionInfoResponse {
    username: Fedid,
    is_session_currently_running: bool,
}

/// Reports whether the requester already has a running session
pub(super) async fn session_info(
    State(state): State<LauncherState>,
    Requester(fedid): Requester,
) -> Result<Json<SessionInfoResponse>, HttpError> {
    let is_running = state
        .orchestrator
        .is_pod_running(&fedid)
        .await
        .map_err(HttpError::internal().err())?;

    Ok(Json(SessionInfoResponse {
        username: fedid,
        is_session_currently_running: is_running,
    }))
}

#[derive(Deserialize)]
pub(crate) struct StartQuery {
    uid: Option<i64>,
}

#[derive(Serialize)]
pub(crate) struct StartResponse {
    username: Fedid,
    was_session_launched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_hebi_pod_running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_ldap_info: Option<DirectoryRecord>,
}

/// Creates the session resources for the requester
pub(super) async fn start_hebi(
    State(state): State<LauncherState>,
    Requester(fedid): Requester,
    Query(query): Query<StartQuery>,
) -> Json<StartResponse> {
    let outcome = lifecycle::start_session(&state, &fedid, query.uid).await;

    let response = match outcome {
        StartOutcome::Launched => StartResponse {
            username: fedid,
            was_session_launched: true,
            is_hebi_pod_running: Some(true),
            message: None,
            user_ldap_info: None,
        },
        StartOutcome::AlreadyRunning => StartResponse {
            username: fedid,
            was_session_launched: false,
            is_hebi_pod_running: Some(true),
            message: Some("session exists".to_owned()),
            user_ldap_info: None,
        },
        StartOutcome::Ineligible(record) => StartResponse {
            username: fedid,
            was_session_launched: false,
            is_hebi_pod_running: None,
            message: Some("Invalid user, see user_ldap_info for more info".to_owned()),
            user_ldap_info: Some(record),
        },
        StartOutcome::DirectoryUnavailable(message) => StartResponse {
            username: fedid,
            was_session_launched: false,
            is_hebi_pod_running: None,
            message: Some(message),
            user_ldap_info: None,
        },
        StartOutcome::ProvisioningFailed(message) => StartResponse {
            username: fedid,
            was_session_launched: false,
            is_hebi_pod_running: None,
            message: Some(message.to_owned()),
            user_ldap_info: None,
        },
        StartOutcome::ReadyTimeout => StartResponse {
            username: fedid,
            was_session_launched: false,
            is_hebi_pod_running: None,
            message: Some("pod did not become ready".to_owned()),
            user_ldap_info: None,
        },
    };

    Json(response)
}

#[derive(Serialize)]
pub(crate) struct StopResponse {
    username: Fedid,
    was_session_stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    did_session_exist: Option<bool>,
}

/// Destroys the requester's session resources
pub(super) async fn stop_hebi(
    State(state): State<LauncherState>,
    Requester(fedid): Requester,
) -> Json<StopResponse> {
    let outcome = lifecycle::destroy_session(&state, &fedid).await;

    let response = match outcome {
        StopOutcome::Stopped => StopResponse {
            username: fedid,
            was_session_stopped: true,
            did_session_exist: Some(true),
        },
        StopOutcome::NotFound => StopResponse {
            username: fedid,
            was_session_stopped: false,
            did_session_exist: Some(false),
        },
        StopOutcome::Failed => StopResponse {
            username: fedid,
            was_session_stopped: false,
            did_session_exist: None,
        },
    };

    Json(response)
}
