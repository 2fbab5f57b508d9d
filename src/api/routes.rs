//! Endpoint table for the gateway's HTTP surface.

use axum::routing::{get, post};
use axum::Router;

use super::{handlers, middleware, AppState};

/// `/api/health`, `/api/docs`, and `/api/openapi.json` stay outside the
/// `X-API-Key` layer so a reverse proxy or uptime checker can reach them
/// without a credential.
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/docs", get(handlers::docs))
        .route("/api/openapi.json", get(handlers::openapi))
}

fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/data", post(handlers::post_data))
        .route("/api/data/latest", get(handlers::get_data_latest))
        .route("/api/commands", get(handlers::get_commands))
        .route(
            "/api/rules",
            get(handlers::get_rules).post(handlers::post_rule),
        )
        .route(
            "/api/rules/:id",
            get(handlers::get_rule)
                .put(handlers::put_rule)
                .delete(handlers::delete_rule),
        )
        .route("/api/notifications", get(handlers::get_notifications))
        .route("/api/notifications/test", post(handlers::post_notifications_test))
        .route("/api/notifications/ack", post(handlers::post_notifications_ack))
        .route("/api/ac", get(handlers::get_ac).post(handlers::post_ac))
        .route(
            "/api/crops",
            get(handlers::get_crops).post(handlers::post_crop),
        )
        .route("/api/crops/:id/conditions", get(handlers::get_crop_conditions))
        .route("/api/crops/:id/rules", get(handlers::get_crop_rules))
        .route("/api/crops/:id/advance", post(handlers::post_crop_advance))
        .route("/api/crops/:id/harvest", post(handlers::post_crop_harvest))
        .route("/api/calibrations/due", get(handlers::get_calibrations_due))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::require_api_key,
        ))
}

pub fn api_routes(state: AppState) -> Router {
    public_routes()
        .merge(protected_routes(state.clone()))
        .with_state(state)
}
