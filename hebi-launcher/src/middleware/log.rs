use std::time::Instant;

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument as _;

use crate::http::HttpError;

pub async fn log_middleware(request: Request<Body>, next: Next) -> Result<Response, HttpError> {
    let uri_path = request.uri().path();
    let method = request.method();

    let is_health_check = uri_path.ends_with("health");

    let span = info_span!("request", %method, path = %uri_path);

    async move {
        let start_time = Instant::now();

        debug!("Received request");

        let response = next.run(request).await;

        let status = response.status();

        if is_health_check {
            debug!(duration = ?start_time.elapsed(), %status);
        } else {
            info!(duration = ?start_time.elapsed(), %status);
        }

        Ok(response)
    }
    .instrument(span)
    .await
}
