use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Error;
use crate::store::rocks::RocksStore;
use crate::sync::history::BlockHistory;

pub mod address;
pub mod error;
mod routes;
mod utils;

pub static DEFAULT_BIND_API: &str = "localhost:8000";

const ALLOWED_METHODS: &str = "GET, OPTIONS";

/// How long in-flight requests get to finish once shutdown is signalled.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RocksStore>,
    pub history: Arc<BlockHistory>,
    pub cors_origin: String,
}

/// Runs the read API until the shutdown flag flips, then drains gracefully.
pub async fn run(
    state: AppState,
    bind: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/balance", get(routes::balance))
        .route("/utxo", get(routes::utxo))
        .route("/height", get(routes::height))
        .route("/blocks", get(routes::blocks))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            refresh_and_cors,
        ))
        .with_state(state);

    let addr = resolve_bind(bind)?;

    let handle = axum_server::Handle::new();
    let watcher = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
        watcher.graceful_shutdown(Some(SHUTDOWN_DEADLINE));
    });

    info!("api listening on {addr}...");

    axum_server::Server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(Error::config)?;

    Ok(())
}

fn resolve_bind(bind: &str) -> Result<SocketAddr, Error> {
    bind.to_socket_addrs()
        .map_err(|e| Error::Config(format!("cannot resolve bind address '{bind}': {e}")))?
        .next()
        .ok_or_else(|| Error::Config(format!("bind address '{bind}' resolved to nothing")))
}

/// Outermost middleware: refreshes read-only secondary instances so they see
/// the primary's latest commits, short-circuits OPTIONS, and stamps the CORS
/// headers on every response.
async fn refresh_and_cors(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.store.is_read_only() {
        if let Err(err) = state.store.try_refresh() {
            // continue with possibly stale data
            warn!("failed to refresh read-only store: {err}");
        }
    }

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(&mut response, &state.cors_origin);
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors(&mut response, &state.cors_origin);
    response
}

fn apply_cors(response: &mut Response, origin: &str) {
    let headers = response.headers_mut();

    let origin = HeaderValue::from_str(origin).unwrap_or(HeaderValue::from_static("*"));

    headers.insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert("Access-Control-Allow-Origin", origin);
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type"),
    );
}
