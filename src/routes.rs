use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::{AppConfig, StorageBackend};
use crate::handlers::{elevated, functions, protected, public};
use crate::middleware::{jwt_auth_middleware, validate_user_middleware};
use crate::state::AppState;

/// Full application router
pub fn app(state: AppState, config: &AppConfig) -> Router {
    // Layers added last run first: JWT validation, then user resolution
    let authenticated = Router::new()
        .merge(auth_routes())
        .merge(client_routes())
        .merge(protocol_routes())
        .merge(template_routes())
        .merge(settings_routes())
        .merge(user_routes())
        .merge(function_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), validate_user_middleware))
        .route_layer(middleware::from_fn(jwt_auth_middleware));

    let mut app = Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .merge(authenticated);

    if config.storage.backend == StorageBackend::Local {
        app = app.route("/storage/:bucket/*path", get(public::storage_get));
    }

    let mut app = app
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.api.max_request_size_bytes));

    if config.security.enable_cors {
        app = app.layer(cors_layer(&config.security.cors_origins));
    }
    if config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }

    app.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

fn auth_routes() -> Router<AppState> {
    Router::new().route("/api/auth/me", get(protected::auth_me))
}

fn client_routes() -> Router<AppState> {
    use protected::clients;

    Router::new()
        .route("/api/clients", get(clients::list).post(clients::post))
        .route("/api/clients/:id", get(clients::get).put(clients::put))
        .route("/api/clients/:id/status", put(clients::put_status))
}

fn protocol_routes() -> Router<AppState> {
    use protected::protocols;

    Router::new()
        .route("/api/protocols", get(protocols::list).post(protocols::post))
        .route(
            "/api/protocols/:id",
            get(protocols::get).put(protocols::put).delete(protocols::delete),
        )
        .route("/api/protocols/:id/items/order", put(protocols::put_item_order))
        .route("/api/protocols/:id/signatures", put(protocols::put_signatures))
        .route("/api/protocols/:id/send", post(protocols::post_send))
        .route("/api/protocols/:id/complete", post(protocols::post_complete))
        .route("/api/protocols/:id/document", get(protocols::get_document))
}

fn template_routes() -> Router<AppState> {
    use protected::{predefined, templates};

    Router::new()
        .route("/api/templates/:kind", get(templates::list).post(templates::post))
        .route(
            "/api/templates/:kind/:id",
            get(templates::get).put(templates::put).delete(templates::delete),
        )
        .route("/api/templates/:kind/:id/lock", put(templates::put_lock))
        .route("/api/templates/:kind/:id/status", put(templates::put_status))
        .route("/api/templates/:kind/:id/file", put(templates::put_file))
        .route("/api/templates/:kind/:id/preview", put(templates::put_preview))
        .route("/api/predefined-templates", get(predefined::list))
        .route("/api/predefined-templates/:id/copy", post(predefined::post_copy))
}

fn settings_routes() -> Router<AppState> {
    use protected::settings;

    Router::new()
        .route("/api/settings", get(settings::get).put(settings::put))
        .route("/api/settings/logo", put(settings::put_logo))
        .route("/api/settings/template", put(settings::put_template))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(elevated::users_list))
        .route("/api/users/:id/role", put(elevated::users_put_role))
}

fn function_routes() -> Router<AppState> {
    Router::new()
        .route("/functions/v1/process-and-send-protocol", post(functions::process_and_send_protocol))
        .route("/functions/v1/process-document", post(functions::process_document))
}
