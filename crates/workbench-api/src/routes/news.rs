//! News listing and on-demand refresh.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use workbench_core::{NewsArticle, WorkbenchError};
use workbench_engine::{jobs, Context};

use crate::error::ApiResult;
use crate::params;

#[derive(Debug, Default, Deserialize)]
pub struct NewsParams {
    pub symbol: Option<String>,
    pub since: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NewsResponse {
    pub ok: bool,
    pub symbol: String,
    pub items: Vec<NewsArticle>,
}

/// `GET /api/news`, newest first.
pub async fn list(State(ctx): State<Context>, Query(p): Query<NewsParams>) -> ApiResult<Json<NewsResponse>> {
    let symbol = params::symbol(p.symbol.as_deref(), &ctx.settings.default_symbol());
    let since = params::timestamp("since", p.since.as_deref())?;
    let limit = params::integer("limit", p.limit.as_deref(), 50i64)?;
    let items = ctx
        .store
        .fetch_news_db(&symbol, since, limit)
        .await
        .map_err(WorkbenchError::from)?;
    Ok(Json(NewsResponse { ok: true, symbol, items }))
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub ok: bool,
    pub symbol: String,
    pub items: usize,
}

/// `POST /api/news/refresh?symbol=`
pub async fn refresh(State(ctx): State<Context>, Query(p): Query<NewsParams>) -> ApiResult<Json<RefreshResponse>> {
    let symbol = params::symbol(p.symbol.as_deref(), &ctx.settings.default_symbol());
    let items = jobs::refresh_news(&ctx, &symbol).await?;
    Ok(Json(RefreshResponse { ok: true, symbol, items }))
}
