//! HTTP server
//!
//! `app` builds the full service: page and JSON routers, `/health`, the
//! uploads directory, request tracing, and the `_method` override that runs
//! before routing.

use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::Method,
    routing,
};
use thiserror::Error;
use tower::{Layer, util::MapRequestLayer};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    analytics::Analytics,
    api,
    auth::Accounts,
    catalog::Catalog,
    config::Config,
    database::{Database, DatabaseError},
    lifecycle::Lifecycle,
    spheres::Spheres,
    uploads::ImageStore,
    web,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Accounts,
    pub catalog: Catalog,
    pub lifecycle: Lifecycle,
    pub spheres: Spheres,
    pub analytics: Analytics,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        let accounts = Accounts::new(db.clone(), config.session_ttl());
        let catalog = Catalog::new(db.clone(), ImageStore::new(config.uploads_dir.clone()));
        let lifecycle = Lifecycle::new(db.clone());
        let analytics = Analytics::new(db.clone(), accounts.clone(), catalog.clone(), lifecycle.clone());

        Self {
            config: Arc::new(config),
            spheres: Spheres::new(db),
            accounts,
            catalog,
            lifecycle,
            analytics,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("Database unavailable: {0}")]
    Database(#[from] DatabaseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type App = tower::util::MapRequest<Router, fn(Request) -> Request>;

/// Browsers only send GET and POST; a POST to `...?_method=PUT` is routed as a PUT.
pub fn method_override(mut req: Request) -> Request {
    if req.method() != Method::POST {
        return req;
    }

    let wanted = req.uri().query().and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "_method")
            .map(|(_, value)| value.to_ascii_uppercase())
    });

    match wanted.as_deref() {
        Some("PUT") => *req.method_mut() = Method::PUT,
        Some("PATCH") => *req.method_mut() = Method::PATCH,
        Some("DELETE") => *req.method_mut() = Method::DELETE,
        _ => {}
    }
    req
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(web::routes())
        .merge(api::routes())
        .route("/health", routing::get(|| async { "OK" }))
}

pub fn app(state: AppState) -> App {
    let router = routes()
        .nest_service("/uploads", ServeDir::new(&state.config.uploads_dir))
        .layer(DefaultBodyLimit::max(state.config.max_item_body_bytes()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    MapRequestLayer::new(method_override as fn(Request) -> Request).layer(router)
}

pub async fn serve(config: Config) -> Result<(), ServeError> {
    info!(
        database = config.database_url.as_str(),
        bind_address = config.bind_address.as_str(),
        uploads = %config.uploads_dir.display(),
        "Starting Analog Society"
    );

    tokio::fs::create_dir_all(&config.uploads_dir).await?;
    let db = Database::new(&config.database_url).await?;
    let bind_address = config.bind_address.clone();
    let state = AppState::new(db, config);

    match state.accounts.sessions().prune_expired().await {
        Ok(pruned) => info!(pruned, "Expired sessions removed"),
        Err(e) => warn!(error = %e, "Could not prune expired sessions"),
    }

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(bind_address = bind_address.as_str(), "Listening");

    axum::serve(listener, axum::ServiceExt::<Request>::into_make_service(app(state)))
        .with_graceful_shutdown(signal())
        .await?;
    Ok(())
}

async fn signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for CTRL+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, terminating...");
}

#[cfg(test)]
pub(crate) mod fixtures {
    use axum::{
        body::{Body, to_bytes},
        http::{self, Response, header},
    };
    use tower::ServiceExt;

    use super::*;

    pub struct TestApp {
        pub db: Database,
        pub state: AppState,
    }

    impl TestApp {
        pub async fn new() -> Self {
            let db = Database::in_memory().await.unwrap();
            let config = Config {
                uploads_dir: std::env::temp_dir().join(format!("analog-uploads-{}", uuid::Uuid::new_v4())),
                ..Config::default()
            };
            Self {
                state: AppState::new(db.clone(), config),
                db,
            }
        }

        pub async fn send(&self, req: Request) -> Response<Body> {
            app(self.state.clone()).oneshot(req).await.unwrap()
        }

        /// Registers and signs in `name`, returning the `Cookie` header value.
        pub async fn sign_in(&self, name: &str) -> String {
            crate::auth::fixtures::user(&self.state.accounts, name).await;
            let signed_in = self.state.accounts.authenticate(name, "p4ss").await.unwrap();
            format!("{}={}", crate::auth::session::SESSION_COOKIE, signed_in.session_id)
        }
    }

    pub fn json_request(method: Method, uri: &str, cookie: Option<&str>, body: serde_json::Value) -> Request {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    pub fn get(uri: &str, cookie: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    pub async fn body_text(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
