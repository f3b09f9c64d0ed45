//! HTTP surface of storyreel: routes plus the middleware every request
//! passes through.
//!
//! The binary and the integration tests both go through
//! [`build_app_router`], so tests exercise the same stack that serves
//! traffic.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{InvalidHeaderValue, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, Span};

use crate::config::ServerConfig;
use crate::routes;
use crate::state::AppState;

/// Header carrying the id that ties a request to its log lines. A caller
/// supplied value is kept; otherwise a UUID is generated.
pub const REQUEST_ID: &str = "x-request-id";

/// A configured CORS origin that is not a valid header value.
#[derive(Debug, thiserror::Error)]
#[error("Invalid CORS origin '{origin}': {source}")]
pub struct InvalidOrigin {
    pub origin: String,
    #[source]
    pub source: InvalidHeaderValue,
}

/// Build the application [`Router`].
///
/// Layers run outermost first: CORS, request id assignment, the request
/// span, request id echo, timeout, and panic recovery closest to the
/// handlers.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Result<Router, InvalidOrigin> {
    let request_id = HeaderName::from_static(REQUEST_ID);
    let middleware = ServiceBuilder::new()
        .layer(cors_layer(&config.cors_origins)?)
        // CORS needs a `Default` response body; the trace body is not one.
        .layer(MapResponseBodyLayer::new(Body::new))
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span as fn(&Request<Body>) -> Span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(CatchPanicLayer::new());

    Ok(Router::new()
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes())
        .layer(middleware)
        .with_state(state))
}

/// One span per request, keyed by its request id so pipeline logs emitted
/// while handling it can be correlated.
fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id
    )
}

/// CORS for the browser front end: the configured origins may read
/// responses, send JSON, and use the methods the API exposes.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, InvalidOrigin> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|source| InvalidOrigin {
                origin: origin.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([HeaderName::from_static(REQUEST_ID)])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn origins_with_control_characters_are_rejected() {
        let err = cors_layer(&["http://ok.example".into(), "http://bad\n.example".into()])
            .unwrap_err();
        assert_eq!(err.origin, "http://bad\n.example");
        assert!(err.to_string().starts_with("Invalid CORS origin"));
    }

    #[test]
    fn valid_origins_build_a_layer() {
        assert_matches!(cors_layer(&["http://localhost:5173".into()]), Ok(_));
        assert_matches!(cors_layer(&[]), Ok(_));
    }
}
