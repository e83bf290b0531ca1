use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub(crate) struct Health {
    version: &'static str,
}

/// Performs a liveness check
pub(super) async fn get_health() -> Json<Health> {
    Json(Health {
        version: env!("CARGO_PKG_VERSION"),
    })
}
