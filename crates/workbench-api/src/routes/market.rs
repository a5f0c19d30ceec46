//! Bar fetches, stored bars and broker read surfaces.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use workbench_core::prefs::{PREF_LAST_COUNT, PREF_LAST_SYMBOL, PREF_LAST_TF};
use workbench_core::{BarView, Timeframe, WorkbenchError};
use workbench_engine::{
    BulkOutcome, BulkRequest, BulkScope, Context, FetchMode, FetchOutcome, FetchRequest, DEFAULT_FETCH_COUNT,
};

use crate::error::{ApiError, ApiResult};
use crate::params;

#[derive(Debug, Default, Deserialize)]
pub struct IndexParams {
    pub reset: Option<String>,
}

/// Selection the UI opens with.
#[derive(Debug, Serialize)]
pub struct Shell {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub count: usize,
    pub symbols: Vec<String>,
    pub trading_enabled: bool,
}

/// `GET /`: defaults seeded from the last stored selection unless `reset=1`
/// or the defaults are pinned.
pub async fn index(State(ctx): State<Context>, Query(p): Query<IndexParams>) -> ApiResult<Json<Shell>> {
    let settings = &ctx.settings;
    let mut shell = Shell {
        symbol: settings.default_symbol(),
        timeframe: settings.default_timeframe(),
        count: DEFAULT_FETCH_COUNT,
        symbols: settings.symbols.clone(),
        trading_enabled: settings.server.trading_enabled,
    };
    if params::flag("reset", p.reset.as_deref())? || settings.server.pin_defaults_to_xau_h1 {
        return Ok(Json(shell));
    }

    let prefs = ctx
        .store
        .get_prefs(&[PREF_LAST_SYMBOL, PREF_LAST_TF, PREF_LAST_COUNT])
        .await
        .map_err(WorkbenchError::from)?;
    if let Some(symbol) = prefs.get(PREF_LAST_SYMBOL).filter(|s| settings.is_supported(s)) {
        shell.symbol = symbol.to_uppercase();
    }
    if let Some(tf) = prefs.get(PREF_LAST_TF).and_then(|tf| tf.parse().ok()) {
        shell.timeframe = tf;
    }
    if let Some(count) = prefs.get(PREF_LAST_COUNT).and_then(|c| c.parse().ok()).filter(|c| *c > 0) {
        shell.count = count;
    }
    Ok(Json(shell))
}

#[derive(Debug, Default, Deserialize)]
pub struct FetchParams {
    pub symbol: Option<String>,
    pub tf: Option<String>,
    pub count: Option<String>,
    pub mode: Option<String>,
    pub background: Option<String>,
    pub persist: Option<String>,
}

fn positive_count(value: Option<&str>) -> ApiResult<usize> {
    let count = params::integer("count", value, DEFAULT_FETCH_COUNT)?;
    if count == 0 {
        return Err(ApiError::bad_request("count must be >= 1"));
    }
    Ok(count)
}

/// `GET /api/fetch`
pub async fn fetch(State(ctx): State<Context>, Query(p): Query<FetchParams>) -> ApiResult<Json<FetchOutcome>> {
    let mut req = FetchRequest::new(
        params::symbol(p.symbol.as_deref(), &ctx.settings.default_symbol()),
        params::timeframe(p.tf.as_deref(), ctx.settings.default_timeframe())?,
    )
    .with_count(positive_count(p.count.as_deref())?)
    .with_mode(params::parsed("mode", p.mode.as_deref(), FetchMode::Inc)?);
    req.deferred = params::flag("background", p.background.as_deref())?;
    req.persist = params::flag("persist", p.persist.as_deref())?;

    Ok(Json(ctx.ingestor().fetch(req).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkBody {
    pub scope: Option<String>,
    pub symbol: Option<String>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub timeframes: Vec<String>,
    pub mode: Option<String>,
    pub count: Option<usize>,
}

/// `POST /api/fetch_bulk`
pub async fn fetch_bulk(State(ctx): State<Context>, body: Bytes) -> ApiResult<Json<BulkOutcome>> {
    let body: BulkBody = params::json_body(&body)?;
    let scope = params::parsed("scope", body.scope.as_deref(), BulkScope::SymbolTf)?;
    let mut symbols = body.symbols;
    if let Some(symbol) = body.symbol {
        symbols.insert(0, symbol);
    }
    let timeframes = body
        .timeframes
        .iter()
        .map(|tf| params::timeframe(Some(tf), Timeframe::H1))
        .collect::<ApiResult<Vec<_>>>()?;
    let count = body.count.unwrap_or(DEFAULT_FETCH_COUNT);
    if count == 0 {
        return Err(ApiError::bad_request("count must be >= 1"));
    }

    let req = BulkRequest {
        scope,
        symbols: symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
        timeframes,
        mode: params::parsed("mode", body.mode.as_deref(), FetchMode::Inc)?,
        count,
    };
    Ok(Json(ctx.ingestor().bulk(req)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct DataParams {
    pub symbol: Option<String>,
    pub tf: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BarsResponse {
    pub ok: bool,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub rows: Vec<BarView>,
}

/// `GET /api/data`
pub async fn data(State(ctx): State<Context>, Query(p): Query<DataParams>) -> ApiResult<Json<BarsResponse>> {
    let symbol = params::symbol(p.symbol.as_deref(), &ctx.settings.default_symbol());
    let timeframe = params::timeframe(p.tf.as_deref(), ctx.settings.default_timeframe())?;
    let limit = params::integer("limit", p.limit.as_deref(), DEFAULT_FETCH_COUNT as i64)?;
    let bars = ctx
        .store
        .fetch_bars(&symbol, timeframe, limit)
        .await
        .map_err(|e| ApiError::from(WorkbenchError::from(e)))?;
    Ok(Json(BarsResponse {
        ok: true,
        symbol,
        timeframe,
        rows: bars.iter().map(|b| b.to_view()).collect(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SymbolParams {
    pub symbol: Option<String>,
}

/// `GET /api/tick`
pub async fn tick(State(ctx): State<Context>, Query(p): Query<SymbolParams>) -> ApiResult<Json<Value>> {
    let symbol = params::symbol(p.symbol.as_deref(), &ctx.settings.default_symbol());
    let tick = ctx
        .broker
        .tick(&symbol)
        .await
        .map_err(|e| ApiError::account(e.into()))?;
    Ok(Json(json!({"ok": true, "tick": tick})))
}

/// `GET /api/positions`
pub async fn positions(State(ctx): State<Context>, Query(p): Query<SymbolParams>) -> ApiResult<Json<Value>> {
    let symbol = p
        .symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase);
    let positions = ctx
        .broker
        .list_positions(symbol.as_deref())
        .await
        .map_err(|e| ApiError::account(e.into()))?;
    Ok(Json(json!({"ok": true, "positions": positions})))
}
