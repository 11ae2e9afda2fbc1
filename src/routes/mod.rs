use axum::{Router, middleware};

use crate::state::SharedState;

pub mod admin;
pub mod chat;
pub mod docs;
pub mod events;
pub mod health;
pub mod metrics;

/// Compose all route trees and wire in the shared state.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(events::router())
        .merge(chat::router())
        .merge(admin::router())
        .merge(metrics::router())
        .merge(docs::router());

    api_router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            metrics::track_requests,
        ))
        .with_state(state)
}
