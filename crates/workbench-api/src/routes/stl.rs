//! STL read, compute and delete endpoints.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use workbench_engine::{ComputeOutcome, Context, StlRequest, StlScope, StlView};

use crate::error::{ApiError, ApiResult};
use crate::params;

#[derive(Debug, Default, Deserialize)]
pub struct StlParams {
    pub symbol: Option<String>,
    pub tf: Option<String>,
    pub all_data: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StlResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub view: StlView,
}

/// `GET /api/stl`. Without a window the whole stored dataset is checked.
pub async fn read(State(ctx): State<Context>, Query(p): Query<StlParams>) -> ApiResult<Json<StlResponse>> {
    let symbol = params::symbol(p.symbol.as_deref(), &ctx.settings.default_symbol());
    let timeframe = params::timeframe(p.tf.as_deref(), ctx.settings.default_timeframe())?;
    let start = params::timestamp("start", p.start.as_deref())?;
    let end = params::timestamp("end", p.end.as_deref())?;
    let run_id = params::optional_integer::<i64>("run_id", p.run_id.as_deref())?;

    let window = match (start, end) {
        (Some(start), Some(end)) if end < start => {
            return Err(ApiError::bad_request("end is before start"));
        }
        (Some(start), Some(end)) => Some((start, end)),
        (None, None) => None,
        _ => return Err(ApiError::bad_request("start and end must be given together")),
    };
    let all_data = match p.all_data.as_deref() {
        Some(raw) => params::flag("all_data", Some(raw))?,
        None => window.is_none(),
    };

    let view = ctx.stl().read(&symbol, timeframe, all_data, window, run_id).await?;
    Ok(Json(StlResponse { ok: true, view }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ComputeBody {
    pub symbol: Option<String>,
    #[serde(alias = "timeframe")]
    pub tf: Option<String>,
    pub scope: Option<String>,
    pub period: Option<usize>,
    pub start: Option<String>,
    pub end: Option<String>,
}

/// `POST /api/stl/compute`. An optional `start`/`end` restricts the
/// decomposed range; it is clamped to the stored bars.
pub async fn compute(State(ctx): State<Context>, body: Bytes) -> ApiResult<Json<ComputeOutcome>> {
    let body: ComputeBody = params::json_body(&body)?;
    let scope = params::parsed("scope", body.scope.as_deref(), StlScope::Current)?;
    let symbol = params::symbol(body.symbol.as_deref(), &ctx.settings.default_symbol());
    let timeframe = params::timeframe(body.tf.as_deref(), ctx.settings.default_timeframe())?;
    if body.period == Some(0) {
        return Err(ApiError::bad_request("period must be >= 1"));
    }
    let start = params::timestamp("start", body.start.as_deref())?;
    let end = params::timestamp("end", body.end.as_deref())?;
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(ApiError::bad_request("end is before start"));
        }
    }

    let req = StlRequest {
        symbol,
        timeframe,
        period: body.period,
        start,
        end,
    };
    Ok(Json(ctx.stl().schedule(scope, req)))
}

/// `DELETE /api/stl/run/{id}`
pub async fn delete_run(State(ctx): State<Context>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let id: i64 = id
        .parse()
        .map_err(|_| ApiError::bad_request(format!("run id must be an integer, got {:?}", id)))?;
    ctx.stl().delete(id).await?;
    Ok(Json(json!({"ok": true, "deleted": id})))
}
