use axum::http::{Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// The launcher web app calls both services with credentials (the session
/// token cookie), so the origin is mirrored rather than wildcarded.
pub fn make_middleware() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::mirror_request())
        .max_age(std::time::Duration::from_secs(7200))
        .allow_credentials(true)
}
