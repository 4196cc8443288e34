use axum::{http::HeaderValue, middleware, Router};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::api::{api_routes, public_routes};
use crate::smssync::smssync_routes;

use super::{api_key_auth, AppState};

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.server.cors_origins);

    let api = api_routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        api_key_auth,
    ));

    let mut app = Router::new()
        .merge(public_routes())
        .merge(api)
        .with_state(state.clone());

    // The device authenticates with the shared secret, not the API key
    if state.settings.smssync.enabled {
        app = app.merge(smssync_routes(state.smssync.clone()));
    }

    app.layer(RequestBodyLimitLayer::new(state.settings.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
