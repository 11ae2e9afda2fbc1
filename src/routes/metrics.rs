use std::time::Instant;

use axum::{
    Router,
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::state::SharedState;

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "health",
    responses((status = 200, description = "Prometheus text exposition of request metrics", body = String, content_type = "text/plain"))
)]
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics().render_prometheus(),
    )
}

/// Count every request and time it until its response head is ready.
pub async fn track_requests(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    state
        .metrics()
        .record(&method, response.status().as_u16(), started.elapsed());
    response
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/metrics", get(metrics))
}
