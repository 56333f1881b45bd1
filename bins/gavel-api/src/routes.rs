// Route definitions for the Gavel API

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::{handlers, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/submissions", post(handlers::submit))
        .route("/submissions/:id", get(handlers::get_submission))
        .route("/submissions/:id/cancel", post(handlers::cancel_submission))
        .route(
            "/problems/:id",
            put(handlers::put_problem).get(handlers::get_problem),
        )
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::get_metrics))
}
