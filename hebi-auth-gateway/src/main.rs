#[macro_use]
extern crate tracing;

use std::sync::Arc;

use anyhow::Context as _;
use hebi_auth_gateway::cas::HttpCasValidator;
use hebi_auth_gateway::config::ConfHandle;
use hebi_auth_gateway::{GatewayState, make_http_service};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"));

    let conf_handle = ConfHandle::init().context("unable to initialize configuration")?;
    let conf = conf_handle.get_conf();

    let cas = HttpCasValidator::new(&conf.cas_server, conf.service_url.clone())
        .context("failed to initialise the CAS client")?;

    let state = GatewayState {
        conf_handle: conf_handle.clone(),
        cas: Arc::new(cas),
    };

    let listener = tokio::net::TcpListener::bind(conf.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", conf.bind_addr))?;

    info!(addr = %conf.bind_addr, "Auth gateway listening");

    axum::serve(listener, make_http_service(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server")?;

    info!("Auth gateway stopped");

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to create terminate signal stream");

    tokio::select! {
        _ = terminate.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
