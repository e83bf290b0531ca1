pub mod events;
pub mod health;
pub mod session;

use crate::LauncherState;

pub fn make_router<S>(state: LauncherState) -> axum::Router<S> {
    axum::Router::new()
        .route("/k8s/health", axum::routing::get(health::get_health))
        .route("/k8s/session_info", axum::routing::get(session::session_info))
        .route("/k8s/start_hebi", axum::routing::get(session::start_hebi))
        .route("/k8s/stop_hebi", axum::routing::get(session::stop_hebi))
        .route("/k8s/events", axum::routing::get(events::events_handler))
        .with_state(state)
}
