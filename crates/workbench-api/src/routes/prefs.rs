//! Preferences and the public configuration.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::info;
use workbench_core::prefs::{
    parse_flag, PREF_AUTO_NEWS_BACKFILL, PREF_BALANCE_POLL_MIN, PREF_CLOSED_ORDERS_POLL_MIN,
    PREF_NEWS_BACKFILL_MIN, WHITELISTED_PREFS,
};
use workbench_core::WorkbenchError;
use workbench_engine::{jobs, Context};

use crate::error::{ApiError, ApiResult};
use crate::params;

#[derive(Debug, Serialize)]
pub struct PrefsResponse {
    pub ok: bool,
    pub prefs: BTreeMap<String, String>,
}

/// `GET /api/preferences`
pub async fn get(State(ctx): State<Context>) -> ApiResult<Json<PrefsResponse>> {
    let prefs = ctx
        .store
        .get_prefs(WHITELISTED_PREFS)
        .await
        .map_err(WorkbenchError::from)?;
    Ok(Json(PrefsResponse {
        ok: true,
        prefs: prefs.into_iter().collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub ok: bool,
    pub saved: Vec<String>,
    pub ignored: Vec<String>,
    pub rearmed: Vec<&'static str>,
}

fn as_pref_value(key: &str, value: &Value) -> ApiResult<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Null => String::new(),
        _ => return Err(ApiError::bad_request(format!("{} must be a scalar", key))),
    };

    match key {
        PREF_BALANCE_POLL_MIN | PREF_CLOSED_ORDERS_POLL_MIN | PREF_NEWS_BACKFILL_MIN => {
            match text.parse::<u64>() {
                Ok(n) if n >= 1 => Ok(n.to_string()),
                _ => Err(ApiError::bad_request(format!("{} must be a positive integer, got {:?}", key, text))),
            }
        }
        PREF_AUTO_NEWS_BACKFILL => match parse_flag(&text) {
            Some(flag) => Ok(if flag { "1" } else { "0" }.to_string()),
            None => Err(ApiError::bad_request(format!("{} must be a flag, got {:?}", key, text))),
        },
        _ => Ok(text),
    }
}

/// `POST /api/preferences`: stores whitelisted keys and re-arms the timers
/// they drive. Unknown keys are reported and skipped.
pub async fn save(State(ctx): State<Context>, body: Bytes) -> ApiResult<Json<SaveResponse>> {
    let body: Map<String, Value> = params::json_body(&body)?;

    let mut prefs = HashMap::new();
    let mut ignored = Vec::new();
    for (key, value) in &body {
        if WHITELISTED_PREFS.contains(&key.as_str()) {
            prefs.insert(key.clone(), as_pref_value(key, value)?);
        } else {
            ignored.push(key.clone());
        }
    }

    if !prefs.is_empty() {
        ctx.store.set_prefs(&prefs).await.map_err(WorkbenchError::from)?;
    }
    let mut saved: Vec<String> = prefs.into_keys().collect();
    saved.sort();
    let rearmed = jobs::reconfigure(&ctx, &saved).await;
    info!(saved = ?saved, ignored = ?ignored, rearmed = ?rearmed, "Preferences saved");

    Ok(Json(SaveResponse {
        ok: true,
        saved,
        ignored,
        rearmed,
    }))
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub trading_enabled: bool,
    pub symbols: Vec<String>,
    pub default_symbol: String,
}

/// `GET /api/config`
pub async fn config(State(ctx): State<Context>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        trading_enabled: ctx.settings.server.trading_enabled,
        symbols: ctx.settings.symbols.clone(),
        default_symbol: ctx.settings.default_symbol(),
    })
}
