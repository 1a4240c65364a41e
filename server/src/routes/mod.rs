mod events;
mod groups;
mod notify;
mod runners;
mod state_doc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_basic_auth;
use crate::state::AppState;

pub fn build(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/state", get(state_doc::get_state))
        .route("/api/status", get(state_doc::get_status))
        .route("/api/export", get(state_doc::export))
        .route("/api/runners/:id/log", get(runners::get_log))
        .route("/api/notifications", get(notify::list_notifications))
        .route("/api/events", get(events::sse_handler));

    let protected = Router::new()
        .route("/api/state", post(state_doc::post_state))
        .route("/api/import", post(state_doc::import))
        .route("/api/runners/:id/run", post(runners::run_runner))
        .route("/api/runners/:id/stop", post(runners::stop_runner))
        .route("/api/runners/:id/clone", post(runners::clone_runner))
        .route("/api/runners/:id/log/clear", post(runners::clear_log))
        .route("/api/groups/:id/run", post(groups::run_group))
        .route("/api/groups/:id/stop", post(groups::stop_group))
        .route("/api/notify-profiles/:id/test", post(notify::test_profile))
        .route("/api/notifications/clear", post(notify::clear_notifications))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
