//! Strict parsing of query and body values.
//!
//! Parameters arrive as optional strings so malformed input becomes a JSON
//! 400 rather than an extractor rejection.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use workbench_core::{parse_utc, prefs::parse_flag, Timeframe};

use crate::error::{ApiError, ApiResult};

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn symbol(value: Option<&str>, default: &str) -> String {
    present(value).unwrap_or(default).to_uppercase()
}

pub fn required_symbol(value: Option<&str>) -> ApiResult<String> {
    present(value)
        .map(str::to_uppercase)
        .ok_or_else(|| ApiError::bad_request("symbol is required"))
}

pub fn timeframe(value: Option<&str>, default: Timeframe) -> ApiResult<Timeframe> {
    match present(value) {
        Some(raw) => Timeframe::from_str(raw).map_err(ApiError::bad_request),
        None => Ok(default),
    }
}

pub fn integer<T: FromStr>(name: &str, value: Option<&str>, default: T) -> ApiResult<T> {
    match present(value) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request(format!("{} must be an integer, got {:?}", name, raw))),
        None => Ok(default),
    }
}

pub fn optional_integer<T: FromStr>(name: &str, value: Option<&str>) -> ApiResult<Option<T>> {
    present(value)
        .map(|raw| {
            raw.parse()
                .map_err(|_| ApiError::bad_request(format!("{} must be an integer, got {:?}", name, raw)))
        })
        .transpose()
}

pub fn flag(name: &str, value: Option<&str>) -> ApiResult<bool> {
    match present(value) {
        Some(raw) => parse_flag(raw).ok_or_else(|| ApiError::bad_request(format!("{} must be a flag, got {:?}", name, raw))),
        None => Ok(false),
    }
}

pub fn timestamp(name: &str, value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    present(value)
        .map(|raw| parse_utc(raw).ok_or_else(|| ApiError::bad_request(format!("{} is not a timestamp: {:?}", name, raw))))
        .transpose()
}

pub fn parsed<T>(name: &str, value: Option<&str>, default: T) -> ApiResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match present(value) {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ApiError::bad_request(format!("invalid {}: {}", name, e))),
        None => Ok(default),
    }
}

pub fn optional_parsed<T>(name: &str, value: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    present(value)
        .map(|raw| {
            raw.parse()
                .map_err(|e: T::Err| ApiError::bad_request(format!("invalid {}: {}", name, e)))
        })
        .transpose()
}

/// Decode a JSON body; an empty body yields the default.
pub fn json_body<T: DeserializeOwned + Default>(body: &[u8]) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values() {
        assert_eq!(symbol(Some(" eurusd "), "XAUUSD"), "EURUSD");
        assert_eq!(symbol(None, "XAUUSD"), "XAUUSD");
        assert_eq!(timeframe(Some("h4"), Timeframe::H1).unwrap(), Timeframe::H4);
        assert_eq!(timeframe(Some(""), Timeframe::H1).unwrap(), Timeframe::H1);
        assert_eq!(timeframe(Some("H2"), Timeframe::H1).unwrap_err().status, 400);
        assert_eq!(integer("count", Some("25"), 500usize).unwrap(), 25);
        assert!(integer("count", Some("25x"), 500usize).is_err());
        assert_eq!(optional_integer::<i64>("limit", None).unwrap(), None);
        assert!(flag("persist", Some("1")).unwrap());
        assert!(flag("persist", Some("perhaps")).is_err());
        assert!(timestamp("start", Some("2025-01-01")).unwrap().is_some());
        assert!(timestamp("start", Some("yesterday")).is_err());

        let body: Vec<String> = json_body(b"  ").unwrap();
        assert!(body.is_empty());
        assert!(json_body::<Vec<String>>(b"{").is_err());
    }
}
