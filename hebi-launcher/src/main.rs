#[macro_use]
extern crate tracing;

mod service;

use anyhow::Context as _;
use hebi_launcher::config::ConfHandle;
use tap::prelude::*;

use crate::service::LauncherService;

fn main() -> anyhow::Result<()> {
    let conf_handle = ConfHandle::init().context("unable to initialize configuration")?;
    let mut service = LauncherService::load(conf_handle).context("service loading failed")?;

    service
        .start()
        .tap_err(|error| error!(error = format!("{error:#}"), "Failed to start"))?;

    // Waiting for some stop signal (CTRL-C…)
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("failed to build the async runtime")?;
    rt.block_on(build_signals_fut())?;

    service.stop();

    Ok(())
}

#[cfg(unix)]
async fn build_signals_fut() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate_signal = signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    let mut quit_signal = signal(SignalKind::quit()).context("failed to create quit signal stream failed")?;
    let mut interrupt_signal =
        signal(SignalKind::interrupt()).context("failed to create interrupt signal stream failed")?;

    futures::future::select_all(vec![
        Box::pin(terminate_signal.recv()),
        Box::pin(quit_signal.recv()),
        Box::pin(interrupt_signal.recv()),
    ])
    .await;

    Ok(())
}

#[cfg(not(unix))]
async fn build_signals_fut() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}
