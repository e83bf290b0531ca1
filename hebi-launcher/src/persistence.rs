//! Durable snapshots of the activity map.
//!
//! The snapshot is rewritten on a fixed interval and read back once at
//! start-up, so inactivity is still detected correctly across launcher
//! restarts. Writes go to a sibling temporary file first and are renamed into
//! place, so a crashed writer never leaves a torn snapshot behind.

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use hebi_task::{ShutdownSignal, Task};

use crate::activity::{ActivitySnapshot, ActivityTracker};

pub fn load(path: &Utf8Path) -> anyhow::Result<Option<ActivitySnapshot>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .with_context(|| format!("invalid activity snapshot at {path}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!(e).context(format!("couldn't read activity snapshot at {path}"))),
    }
}

pub fn store(path: &Utf8Path, snapshot: &ActivitySnapshot) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(snapshot).context("failed JSON serialization of activity snapshot")?;

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, json).with_context(|| format!("failed to write file at {tmp_path}"))?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("failed to move {tmp_path} into place"))?;

    Ok(())
}

pub struct ActivityFlushTask {
    pub activity: ActivityTracker,
    pub path: Utf8PathBuf,
    pub interval: Duration,
}

impl ActivityFlushTask {
    fn flush(&self) -> anyhow::Result<()> {
        let snapshot = self.activity.snapshot();
        store(&self.path, &snapshot)?;
        debug!(entries = snapshot.len(), path = %self.path, "Activity snapshot written");
        Ok(())
    }
}

#[async_trait]
impl Task for ActivityFlushTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "activity flush";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!("Task started");

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // Consume the immediate first tick.

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // A failed write is retried on the next tick.
                    if let Err(error) = self.flush() {
                        error!(error = format!("{error:#}"), "Failed to write activity snapshot");
                    }
                }
                () = shutdown_signal.wait() => {
                    break;
                }
            }
        }

        debug!("Task is stopping; writing one final snapshot");

        if let Err(error) = self.flush() {
            warn!(error = format!("{error:#}"), "Failed to write final activity snapshot");
        }

        Ok(())
    }
}
