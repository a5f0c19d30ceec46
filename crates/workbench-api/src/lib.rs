//! HTTP and websocket surface.
//!
//! Every handler is a thin decode → engine call → JSON step over a shared
//! [`Context`]. Failures render as `{ok:false, error}`.

pub mod error;
mod params;
pub mod routes;

use axum::http::header::{HeaderValue, CACHE_CONTROL};
use axum::routing::{delete, get, post};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use workbench_engine::Context;

pub use error::{ApiError, ApiResult};

/// Build the application router.
pub fn router(ctx: Context) -> Router {
    let api = Router::new()
        .route("/fetch", get(routes::market::fetch))
        .route("/fetch_bulk", post(routes::market::fetch_bulk))
        .route("/data", get(routes::market::data))
        .route("/tick", get(routes::market::tick))
        .route("/positions", get(routes::market::positions))
        .route("/stl", get(routes::stl::read))
        .route("/stl/compute", post(routes::stl::compute))
        .route("/stl/run/{id}", delete(routes::stl::delete_run))
        .route("/health/freshness", get(routes::health::basic))
        .route("/health/runs", get(routes::health::runs))
        .route("/tech/freshness", get(routes::health::technical))
        .route("/account/balance_series", get(routes::account::balance))
        .route("/account/closed_deals", get(routes::account::closed_deals))
        .route("/account/closed_deals_sync", post(routes::account::closed_deals_sync))
        .route("/preferences", get(routes::prefs::get).post(routes::prefs::save))
        .route("/config", get(routes::prefs::config))
        .route("/news", get(routes::news::list))
        .route("/news/refresh", post(routes::news::refresh))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    Router::new()
        .route("/", get(routes::market::index))
        .route("/ws/updates", get(routes::ws::updates))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(ctx)
}

/// Serve until the listener fails.
pub async fn serve(ctx: Context, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(ctx)).await
}
