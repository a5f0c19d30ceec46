//! Freshness checks and the analysis-run log.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use workbench_core::{classify_symbol, AnalysisKind, AnalysisRun, AnalysisRunFilter, WorkbenchError};
use workbench_engine::{Context, NewsFreshness, TechFreshness};

use crate::error::ApiResult;
use crate::params;

#[derive(Debug, Default, Deserialize)]
pub struct FreshnessParams {
    pub symbol: Option<String>,
    pub strategy: Option<String>,
    pub tf: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Freshness<T> {
    pub ok: bool,
    #[serde(flatten)]
    pub report: T,
}

/// `GET /api/health/freshness`
pub async fn basic(
    State(ctx): State<Context>,
    Query(p): Query<FreshnessParams>,
) -> ApiResult<Json<Freshness<NewsFreshness>>> {
    let symbol = params::symbol(p.symbol.as_deref(), &ctx.settings.default_symbol());
    let strategy = p.strategy.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let report = ctx.freshness().basic(&symbol, strategy).await?;
    Ok(Json(Freshness { ok: true, report }))
}

/// `GET /api/tech/freshness`
pub async fn technical(
    State(ctx): State<Context>,
    Query(p): Query<FreshnessParams>,
) -> ApiResult<Json<Freshness<TechFreshness>>> {
    let symbol = params::symbol(p.symbol.as_deref(), &ctx.settings.default_symbol());
    let timeframe = params::timeframe(p.tf.as_deref(), ctx.settings.default_timeframe())?;
    let report = ctx.freshness().technical(&symbol, timeframe).await?;
    Ok(Json(Freshness { ok: true, report }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RunsParams {
    pub kind: Option<String>,
    pub symbol: Option<String>,
    pub strategy: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub ok: bool,
    pub runs: Vec<AnalysisRun>,
}

/// `GET /api/health/runs`, newest first.
pub async fn runs(State(ctx): State<Context>, Query(p): Query<RunsParams>) -> ApiResult<Json<RunsResponse>> {
    let mut filter = AnalysisRunFilter {
        kind: params::optional_parsed::<AnalysisKind>("kind", p.kind.as_deref())?,
        strategy: p.strategy.filter(|s| !s.trim().is_empty()),
        ..Default::default()
    };
    if let Some(symbol) = p.symbol.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let class = classify_symbol(symbol);
        filter.symbol = Some(class.symbol);
        filter.base = class.base;
        filter.quote = class.quote;
    }
    let limit = params::integer("limit", p.limit.as_deref(), 50i64)?;
    let offset = params::integer("offset", p.offset.as_deref(), 0i64)?;

    let runs = ctx
        .store
        .list_health_runs(&filter, limit, offset)
        .await
        .map_err(WorkbenchError::from)?;
    Ok(Json(RunsResponse { ok: true, runs }))
}
