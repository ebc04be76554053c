//! Self-service identity portal for an LDAP directory.
//!
//! Users sign in with their directory credentials, finish a short
//! onboarding, change their directory password and upload a profile photo.

#![forbid(unsafe_code)]

pub mod config;
mod database;
pub mod error;
pub mod ldap;
pub mod photo;
pub mod profile;
mod router;
pub mod telemetry;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

pub use error::ServerError;

use crate::ldap::{
    AttributeWriter, CredentialVerifier, ExistenceChecker, Ldap, LdapConnector,
};
use crate::photo::{ImageThumbnailEncoder, PhotoLimits, ThumbnailEncoder};
use crate::profile::{PostgresProfileStore, ProfileStore};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub verifier: CredentialVerifier,
    pub writer: AttributeWriter,
    pub existence: ExistenceChecker,
    pub profiles: Arc<dyn ProfileStore>,
    pub token: token::TokenManager,
    pub encoder: Arc<dyn ThumbnailEncoder>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the directory workflows on top of `ldap`.
    pub fn new(
        config: Arc<config::Configuration>,
        ldap: Ldap,
        profiles: Arc<dyn ProfileStore>,
        token: token::TokenManager,
    ) -> Self {
        Self {
            verifier: ldap.verifier(),
            writer: ldap.writer(config.admin_groups.clone()),
            existence: ldap.existence(),
            config,
            profiles,
            token,
            encoder: Arc::new(ImageThumbnailEncoder),
            metrics: None,
        }
    }

    pub fn photo_limits(&self) -> PhotoLimits {
        self.config.photo.into()
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Directory calls are bounded on their own; this only caps stuck requests.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let metrics = match state.metrics.clone() {
        Some(handle) => Router::new().route(
            "/metrics",
            get(move || std::future::ready(handle.render())),
        ),
        None => Router::new(),
    };

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::handler))
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .nest("/users", router::users::router(state.clone()))
        .with_state(state)
        .merge(metrics)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;

    let ldap = Ldap::new(Arc::new(LdapConnector), config.ldap()?);
    tracing::info!(
        url = %ldap.config().endpoint.url,
        base_dn = %ldap.config().base_dn,
        "directory configured"
    );

    let Some(postgres) = &config.postgres else {
        return Err(config::ConfigError::Missing("postgres").into());
    };
    let profiles = Arc::new(PostgresProfileStore::new(
        database::connect(postgres).await?,
    ));

    // handle jwt.
    let Some(token_config) = &config.token else {
        return Err(config::ConfigError::Missing("token").into());
    };
    let mut token = token::TokenManager::new(
        &config.url,
        token_config.key_id.clone(),
        &token_config.public_key_pem,
        &token_config.private_key_pem,
    )?;
    if let Some(audience) = &token_config.audience {
        token.audience(audience);
    }

    Ok(AppState::new(config, ldap, profiles, token))
}
