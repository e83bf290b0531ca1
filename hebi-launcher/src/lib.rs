#[macro_use]
extern crate tracing;

pub mod activity;
pub mod api;
pub mod config;
pub mod directory;
pub mod events;
pub mod extract;
pub mod fedid;
pub mod http;
pub mod ingress;
pub mod kubernetes;
pub mod lifecycle;
pub mod listener;
pub mod manifest;
pub mod middleware;
pub mod naming;
pub mod persistence;
pub mod reaper;
#[doc(hidden)]
pub mod testing;

use std::sync::Arc;

use hebi_task::{ShutdownHandle, ShutdownSignal};

use crate::activity::ActivityTracker;
use crate::config::{Conf, ConfHandle};
use crate::directory::Directory;
use crate::events::EventBroadcaster;
use crate::ingress::IngressMutator;
use crate::kubernetes::Orchestrator;
use crate::manifest::{BuiltinRenderer, ManifestRenderer};

/// Shared context threaded through HTTP handlers and background tasks.
///
/// Everything mutable lives behind its own synchronisation primitive so the
/// state itself is cheap to clone per request.
#[derive(Clone)]
pub struct LauncherState {
    pub conf_handle: ConfHandle,
    pub activity: ActivityTracker,
    pub events: EventBroadcaster,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub directory: Arc<dyn Directory>,
    pub renderer: Arc<dyn ManifestRenderer>,
    pub ingress: IngressMutator,
    pub shutdown_signal: ShutdownSignal,
}

impl LauncherState {
    #[doc(hidden)]
    pub fn mock(
        conf: Conf,
        orchestrator: Arc<dyn Orchestrator>,
        directory: Arc<dyn Directory>,
    ) -> (Self, ShutdownHandle) {
        let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

        let renderer = Arc::new(BuiltinRenderer {
            image: conf.session_image.clone(),
        });

        let ingress = IngressMutator::new(Arc::clone(&orchestrator), conf.ingress_host.clone());

        let state = Self {
            conf_handle: ConfHandle::mock(conf),
            activity: ActivityTracker::new(),
            events: EventBroadcaster::new(),
            orchestrator,
            directory,
            renderer,
            ingress,
            shutdown_signal,
        };

        (state, shutdown_handle)
    }
}

pub fn make_http_service(state: LauncherState) -> axum::Router {
    api::make_router(state)
        .layer(axum::middleware::from_fn(middleware::log::log_middleware))
        .layer(middleware::cors::make_middleware())
}
