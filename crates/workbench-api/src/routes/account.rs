//! Balance series and closed-deal endpoints.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use workbench_engine::account::{
    balance_series, closed_deals_report, sync_closed_deals, BalanceSeries, ClosedDealsReport,
    DEFAULT_SYNC_STEP_DAYS, MAX_SYNC_STEP_DAYS, SYNC_YEARS,
};
use workbench_engine::Context;

use crate::error::{ApiError, ApiResult};
use crate::params;

const DEFAULT_DEAL_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct SeriesParams {
    pub account: Option<String>,
    pub since: Option<String>,
    pub limit: Option<String>,
    pub refresh: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub series: BalanceSeries,
}

/// `GET /api/account/balance_series`
pub async fn balance(State(ctx): State<Context>, Query(p): Query<SeriesParams>) -> ApiResult<Json<SeriesResponse>> {
    let account = params::optional_integer::<i64>("account", p.account.as_deref())?;
    let since = params::timestamp("since", p.since.as_deref())?;
    let limit = params::integer("limit", p.limit.as_deref(), 1000i64)?;
    let refresh = params::flag("refresh", p.refresh.as_deref())?;

    let series = balance_series(&ctx, account, since, limit, refresh).await?;
    Ok(Json(SeriesResponse { ok: true, series }))
}

#[derive(Debug, Default, Deserialize)]
pub struct DealsParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub baseline: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DealsResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub report: ClosedDealsReport,
}

/// `GET /api/account/closed_deals`, the last 30 days by default.
pub async fn closed_deals(State(ctx): State<Context>, Query(p): Query<DealsParams>) -> ApiResult<Json<DealsResponse>> {
    let to = params::timestamp("to", p.to.as_deref())?.unwrap_or_else(Utc::now);
    let from = params::timestamp("from", p.from.as_deref())?
        .unwrap_or(to - Duration::days(DEFAULT_DEAL_WINDOW_DAYS));
    let baseline = params::flag("baseline", p.baseline.as_deref())?;

    let report = closed_deals_report(&ctx, from, to, baseline)
        .await
        .map_err(ApiError::account)?;
    Ok(Json(DealsResponse { ok: true, report }))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncParams {
    pub step: Option<String>,
}

/// `POST /api/account/closed_deals_sync`
pub async fn closed_deals_sync(State(ctx): State<Context>, Query(p): Query<SyncParams>) -> ApiResult<Json<Value>> {
    let step = params::integer("step", p.step.as_deref(), DEFAULT_SYNC_STEP_DAYS)?;
    if !(1..=MAX_SYNC_STEP_DAYS).contains(&step) {
        return Err(ApiError::bad_request(format!(
            "step must be between 1 and {} days",
            MAX_SYNC_STEP_DAYS
        )));
    }

    let job_ctx = ctx.clone();
    ctx.scheduler.spawn_callback("closed_deals_sync", async move {
        sync_closed_deals(&job_ctx, Utc::now(), step).await.map(|_| ())
    });
    Ok(Json(json!({"ok": true, "scheduled": true, "step_days": step, "years": SYNC_YEARS})))
}
