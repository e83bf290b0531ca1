//! Session lifecycle orchestration: the create and destroy sequences shared
//! by the HTTP handlers and the reaper.

use crate::LauncherState;
use crate::directory::DirectoryRecord;
use crate::fedid::Fedid;
use crate::kubernetes::OrchestratorError;
use crate::manifest::WorkloadSpec;

#[derive(Debug)]
pub enum StartOutcome {
    /// Resources created and the pod reported phase `Running`.
    Launched,
    /// Pod and service already exist for this user; nothing was created.
    AlreadyRunning,
    /// The directory record fails the eligibility predicate.
    Ineligible(DirectoryRecord),
    /// The directory could not answer; no resources were touched.
    DirectoryUnavailable(String),
    /// A create step failed; the presence guard lets the next call retry.
    ProvisioningFailed(&'static str),
    /// The pod never reached `Running` within the configured timeout; the
    /// partially created resources were destroyed again.
    ReadyTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The full destroy sequence ran.
    Stopped,
    /// There was no deployment for this user; nothing else was attempted.
    NotFound,
    /// A step failed; later steps were skipped and residual state may remain.
    Failed,
}

pub async fn start_session(state: &LauncherState, fedid: &Fedid, uid_override: Option<i64>) -> StartOutcome {
    let conf = state.conf_handle.get_conf();

    let record = match state.directory.lookup(fedid).await {
        Ok(record) => record,
        Err(error) => {
            error!(%fedid, error = format!("{error:#}"), "Directory lookup failed");
            return StartOutcome::DirectoryUnavailable(format!("directory lookup failed: {error}"));
        }
    };

    info!(%fedid, ?record, "Directory record");

    if !record.is_eligible() {
        return StartOutcome::Ineligible(record);
    }

    let uid = uid_override.unwrap_or(record.uid);

    let pod_present = match state.orchestrator.pod_exists(fedid).await {
        Ok(present) => present,
        Err(error) => {
            error!(%fedid, error = format!("{error:#}"), "Failed to query pods");
            return StartOutcome::ProvisioningFailed("failed to query existing resources");
        }
    };

    let service_present = match state.orchestrator.service_exists(fedid).await {
        Ok(present) => present,
        Err(error) => {
            error!(%fedid, error = format!("{error:#}"), "Failed to query services");
            return StartOutcome::ProvisioningFailed("failed to query existing resources");
        }
    };

    if pod_present && service_present {
        return StartOutcome::AlreadyRunning;
    }

    let service = state.renderer.service(fedid);
    if let Err(error) = state.orchestrator.create_service(service).await {
        error!(%fedid, error = format!("{error:#}"), "Failed to create service");
        return StartOutcome::ProvisioningFailed("failed to create service");
    }
    info!(%fedid, "Service created");

    if let Err(error) = state.ingress.add_route(fedid).await {
        error!(%fedid, error = format!("{error:#}"), "Failed to add ingress route");
        return StartOutcome::ProvisioningFailed("failed to add ingress route");
    }

    let workload = WorkloadSpec::builder()
        .fedid(fedid.clone())
        .uid(uid)
        .gid(uid)
        .service_url(format!("https://{}/{}/", conf.ingress_host, fedid))
        .cas_server(conf.cas_server.to_string())
        .websocket_server(format!("https://{}", conf.ingress_host))
        .build();

    let deployment = state.renderer.deployment(&workload);
    if let Err(error) = state.orchestrator.create_deployment(deployment).await {
        error!(%fedid, error = format!("{error:#}"), "Failed to create deployment");
        return StartOutcome::ProvisioningFailed("failed to create deployment");
    }
    info!(%fedid, "Deployment created");

    match tokio::time::timeout(conf.pod_ready_timeout, state.orchestrator.wait_pod_running(fedid)).await {
        Ok(Ok(())) => {
            info!(%fedid, "Session pod is now running");

            // Seed the activity record so a session whose browser tab never
            // connects still ages towards the inactivity threshold.
            state.activity.touch(fedid);

            StartOutcome::Launched
        }
        Ok(Err(error)) => {
            error!(%fedid, error = format!("{error:#}"), "Pod watch failed; rolling back");
            let outcome = destroy_session(state, fedid).await;
            debug!(%fedid, ?outcome, "Rollback finished");
            StartOutcome::ProvisioningFailed("failed to watch pod start-up")
        }
        Err(_) => {
            warn!(
                %fedid,
                timeout = ?conf.pod_ready_timeout,
                "Pod did not become ready in time; rolling back",
            );
            let outcome = destroy_session(state, fedid).await;
            debug!(%fedid, ?outcome, "Rollback finished");
            StartOutcome::ReadyTimeout
        }
    }
}

/// Destroys a user's session resources, in order: deployment, service,
/// ingress route, activity entry.
///
/// A missing deployment short-circuits the sequence: the session never
/// existed as far as the caller is concerned. A missing service later on is
/// success-of-absence and the sequence continues.
pub async fn destroy_session(state: &LauncherState, fedid: &Fedid) -> StopOutcome {
    match state.orchestrator.delete_deployment(fedid).await {
        Ok(()) => info!(%fedid, "Deployment deleted"),
        Err(OrchestratorError::NotFound) => {
            info!(%fedid, "No deployment for this user");
            return StopOutcome::NotFound;
        }
        Err(error) => {
            error!(%fedid, error = format!("{error:#}"), "Failed to delete deployment");
            return StopOutcome::Failed;
        }
    }

    match state.orchestrator.delete_service(fedid).await {
        Ok(()) => info!(%fedid, "Service deleted"),
        Err(OrchestratorError::NotFound) => debug!(%fedid, "Service was already gone"),
        Err(error) => {
            error!(%fedid, error = format!("{error:#}"), "Failed to delete service");
            return StopOutcome::Failed;
        }
    }

    if let Err(error) = state.ingress.remove_route(fedid).await {
        error!(%fedid, error = format!("{error:#}"), "Failed to remove ingress route");
        return StopOutcome::Failed;
    }

    state.activity.remove(fedid);
    debug!(%fedid, "Activity entry removed");

    StopOutcome::Stopped
}
