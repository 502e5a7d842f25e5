//! Notedly is a multi-user note service with ownership-gated writes and
//! favorites.

#![forbid(unsafe_code)]

mod crypto;
mod database;
pub mod error;
mod guard;
mod identity;
mod note;
mod router;
pub mod telemetry;
mod token;
mod user;

pub mod config;

use std::path::PathBuf;
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

pub use database::Database;
use note::NoteService;
use user::UserService;

const CONFIG_PATH_VAR: &str = "NOTEDLY_CONFIG";

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, token);
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State on memory, with cheap password hashing.
#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let pwd =
        crypto::PasswordManager::new(Some(crypto::light_params())).unwrap();

    AppState::new(
        Arc::new(config::Configuration::default()),
        Database::memory(),
        pwd,
        token::TokenManager::new("notedly", "test secret"),
    )
}

/// Create an account and return a bearer credential for it.
#[cfg(test)]
pub(crate) async fn sign_up(state: &AppState, username: &str) -> String {
    let token = state
        .users
        .sign_up(&user::SignUp {
            username: username.to_owned(),
            email: format!("{username}@example.com"),
            password: "StRoNg_PaSsWoRd".to_owned(),
        })
        .await
        .unwrap();

    format!("Bearer {token}")
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: Database,
    pub token: token::TokenManager,
    pub notes: NoteService,
    pub users: UserService,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire services on top of the store.
    pub fn new(
        config: Arc<config::Configuration>,
        db: Database,
        pwd: crypto::PasswordManager,
        token: token::TokenManager,
    ) -> Self {
        Self {
            notes: NoteService::new(Arc::clone(&db.notes)),
            users: UserService::new(
                Arc::clone(&db.users),
                Arc::new(pwd),
                token.clone(),
            ),
            config,
            db,
            token,
            metrics: None,
        }
    }

    /// Serve metrics from `handle` on `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(10),
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .route("/metrics", get(telemetry::metrics))
        // `POST /signup` goes to `signup`.
        .route("/signup", post(router::signup::handler))
        // `POST /signin` goes to `signin`.
        .route("/signin", post(router::signin::handler))
        .nest("/notes", router::notes::router())
        .nest("/users", router::users::router())
        // Every route sees the caller identity.
        .layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            identity::identify,
        ))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let mut config = config::Configuration::default();
    if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
        config = config.path(PathBuf::from(path));
    }
    let config = config.read()?;

    // handle jwt.
    let Some(jwt) = &config.token else {
        return Err("missing `token` entry on `config.yaml` file".into());
    };
    if jwt.secret.is_empty() {
        return Err("`token.secret` must not be empty".into());
    }
    let token = token::TokenManager::new(&config.name, &jwt.secret)
        .expiration(jwt.expires_in.unwrap_or(token::EXPIRATION_TIME));

    let db = match config.postgres {
        Some(ref config) => {
            let db = Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?;

            // execute migrations scripts on start.
            if let Some(pool) = db.pool() {
                sqlx::migrate!().run(pool).await?;
            }
            db
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, data is kept in memory"
            );
            Database::memory()
        },
    };

    let pwd = crypto::PasswordManager::new(config.argon2.clone())?;

    Ok(AppState::new(config, db, pwd, token))
}
