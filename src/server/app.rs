use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::api::{
    api_routes, get_connection, list_connections, terminate_connection, terminate_connections,
};

use super::{api_key_auth, AppState};

/// Upper bound on HTTP request bodies
const MAX_BODY_BYTES: usize = 64 * 1024;

/// HTTP routes served next to the upgrade endpoints on the shared listener.
pub fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/admin/connections", get(list_connections))
        .route("/admin/connections/terminate", post(terminate_connections))
        .route(
            "/admin/connections/{id}",
            get(get_connection).delete(terminate_connection),
        )
        .layer(middleware::from_fn_with_state(state.clone(), api_key_auth));

    Router::new()
        .merge(api_routes())
        .merge(admin)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
