use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod manifest;
pub mod metrics;
pub mod middleware;
pub mod session;
pub mod state;
pub mod sync;
pub mod tours;
pub mod worker;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let v1 = Router::new()
        .route("/tours/{tour_code}/manifest", get(manifest::get_manifest))
        .route(
            "/tours/{tour_code}/manifest/{booking_ref}",
            post(manifest::update_booking),
        )
        .route("/tours/{tour_id}/join", post(tours::join_tour))
        .route(
            "/tours/{tour_id}/participants/reconcile",
            post(tours::reconcile_participants),
        )
        .route("/sync/replay", post(sync::replay))
        .route("/sync/retry-failed", post(sync::retry_failed))
        .route("/sync/actions", get(sync::list_actions))
        .route("/sync/stream", get(sync::stream))
        .route("/session/connectivity", put(session::set_connectivity))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::operator_auth_middleware,
        ));

    Router::new()
        .nest("/v1", v1)
        .route("/metrics", get(metrics::export_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
