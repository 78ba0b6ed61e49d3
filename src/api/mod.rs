pub mod dto;
pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::registry::Registry;
use handlers::ApiDoc;

pub fn router(registry: Arc<Registry>) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/devices", get(handlers::list_devices))
        .route(
            "/devices/{address}",
            put(handlers::register_device)
                .get(handlers::get_device)
                .delete(handlers::unregister_device),
        )
        .route("/devices/{address}/toggle", post(handlers::toggle_device))
        .route(
            "/devices/{address}/schedules",
            get(handlers::list_schedules).post(handlers::create_schedule),
        )
        .route(
            "/devices/{address}/schedules/{id}",
            delete(handlers::delete_schedule),
        )
        .with_state(registry)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
