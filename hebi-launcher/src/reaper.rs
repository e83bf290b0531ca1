//! Garbage collection of sessions whose liveness signal has lapsed.

use async_trait::async_trait;
use hebi_task::{ShutdownSignal, Task};
use time::OffsetDateTime;

use crate::LauncherState;
use crate::lifecycle::{self, StopOutcome};

pub struct ReaperTask {
    pub state: LauncherState,
}

#[async_trait]
impl Task for ReaperTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "session reaper";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        let conf = self.state.conf_handle.get_conf();

        let mut interval = tokio::time::interval(conf.reap_interval);
        interval.tick().await; // Consume the immediate first tick.

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // One bad pass must not kill the reaper.
                    if let Err(error) = reap_once(&self.state).await {
                        error!(error = format!("{error:#}"), "Reap pass failed");
                    }
                }
                () = shutdown_signal.wait() => {
                    break;
                }
            }
        }

        debug!("Task terminated");

        Ok(())
    }
}

/// One reaper pass over all running session pods.
///
/// A user with no activity record is skipped, not reaped: the launcher may
/// have just restarted and not yet absorbed a heartbeat response.
pub async fn reap_once(state: &LauncherState) -> anyhow::Result<()> {
    let conf = state.conf_handle.get_conf();
    let threshold = time::Duration::try_from(conf.inactivity_threshold)
        .unwrap_or(time::Duration::MAX);

    let users = state
        .orchestrator
        .running_session_users()
        .await
        .map_err(|error| anyhow::anyhow!(error).context("failed to enumerate running session pods"))?;

    trace!(running = users.len(), "Reaper pass");

    for fedid in users {
        let Some(last_seen) = state.activity.get(&fedid) else {
            warn!(
                %fedid,
                "Running session has no activity record; skipping this tick",
            );
            continue;
        };

        let age = OffsetDateTime::now_utc() - last_seen;

        if age < threshold {
            continue;
        }

        info!(
            %fedid,
            ?age,
            threshold = ?conf.inactivity_threshold,
            "Session inactive beyond the threshold; destroying its resources",
        );

        match lifecycle::destroy_session(state, &fedid).await {
            StopOutcome::Stopped => info!(%fedid, "Inactive session destroyed"),
            StopOutcome::NotFound => debug!(%fedid, "Session resources were already gone"),
            StopOutcome::Failed => warn!(%fedid, "Destroy sequence left residual state"),
        }
    }

    Ok(())
}
