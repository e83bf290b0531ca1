#[macro_use]
extern crate tracing;

pub mod api;
pub mod cas;
pub mod config;

use std::sync::Arc;

use axum::http::{Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::cas::CasValidator;
use crate::config::ConfHandle;

#[derive(Clone)]
pub struct GatewayState {
    pub conf_handle: ConfHandle,
    pub cas: Arc<dyn CasValidator>,
}

pub fn make_http_service(state: GatewayState) -> axum::Router {
    // Browser calls carry the session token cookie, so the origin is
    // mirrored rather than wildcarded.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true);

    api::make_router(state).layer(cors)
}
