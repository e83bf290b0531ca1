use std::net::SocketAddr;

use anyhow::Context as _;
use async_trait::async_trait;
use hebi_task::{ShutdownSignal, Task};
use tokio::net::TcpListener;

use crate::LauncherState;

pub struct HttpListener {
    addr: SocketAddr,
    listener: TcpListener,
    state: LauncherState,
}

impl HttpListener {
    pub async fn init_and_bind(addr: SocketAddr, state: LauncherState) -> anyhow::Result<Self> {
        info!(%addr, "Initiating listener…");

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        info!(%addr, "Listener started successfully");

        Ok(Self { addr, listener, state })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Task for HttpListener {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "http listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let app = crate::make_http_service(self.state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown_signal.wait().await })
            .await
            .context("HTTP server")
    }
}
