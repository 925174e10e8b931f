//! Latest Measurements Endpoint
//!
//! `GET /?n=3&columns=time,name,temperature&name=Kitchen&tz=Europe/Helsinki`
//!
//! `columns`, `name` and `names` may be repeated and may hold comma-separated
//! lists of word characters and spaces. Timestamps are rendered as RFC 3339 in
//! the requested zone.

use axum::{
    extract::{Query, State},
    http::header::CACHE_CONTROL,
    response::{IntoResponse, Response},
    Json,
};
use chrono::SecondsFormat;
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::deadline::Deadline;
use crate::error::{ApiError, ApiResult};
use crate::service::Measurements;
use crate::state::AppState;
use ruuvi_core::Record;

// ============================================================================
// QUERY PARAMETERS
// ============================================================================

/// Word characters, spaces and commas, ending in a word character.
static LIST_VALUE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[\w\s,]*\w$"));

#[derive(Debug, Clone, PartialEq)]
pub struct LatestParams {
    pub n: i64,
    pub columns: Vec<String>,
    pub names: Vec<String>,
    pub tz: Tz,
}

impl LatestParams {
    /// Fold raw query pairs into parameters, rejecting bad `n`, `tz` and
    /// malformed lists.
    pub fn parse(pairs: &[(String, String)], max_n: i64) -> ApiResult<Self> {
        let mut n = 1;
        let mut columns = Vec::new();
        let mut names = Vec::new();
        let mut tz = Tz::UTC;

        for (key, value) in pairs {
            match key.as_str() {
                "n" if !value.is_empty() => {
                    n = value
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| ApiError::invalid_input("Invalid n"))?;
                    if n < 1 || n > max_n {
                        return Err(ApiError::invalid_range("n", 1, max_n));
                    }
                }
                "columns" => columns.extend(split_list(value, "Invalid columns")?),
                "name" | "names" => names.extend(split_list(value, "Invalid names")?),
                "tz" if !value.is_empty() => {
                    tz = value
                        .trim()
                        .parse::<Tz>()
                        .map_err(|_| ApiError::invalid_input(format!("Invalid timezone: {}", value)))?;
                }
                _ => {}
            }
        }

        Ok(Self {
            n,
            columns,
            names,
            tz,
        })
    }
}

/// Split a comma-separated list. An empty value contributes nothing.
fn split_list(value: &str, invalid: &'static str) -> ApiResult<Vec<String>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    let well_formed = match &*LIST_VALUE {
        Ok(re) => re.is_match(value),
        Err(_) => false,
    };
    if !well_formed {
        return Err(ApiError::invalid_input(invalid));
    }
    Ok(value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

// ============================================================================
// RENDERING
// ============================================================================

fn render_record(record: &Record, tz: &Tz) -> ApiResult<JsonValue> {
    let mut value = serde_json::to_value(record)?;
    if let JsonValue::Object(fields) = &mut value {
        let time = record
            .timestamp
            .with_timezone(tz)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        fields.insert("time".to_string(), JsonValue::String(time));
    }
    Ok(value)
}

/// Shape the response body. With `n == 1` every device maps straight to its
/// newest record and devices without rows are left out.
pub fn render(measurements: &Measurements, n: i64, tz: &Tz) -> ApiResult<JsonValue> {
    let mut body = Map::new();
    for (identity, records) in measurements {
        if n == 1 {
            if let Some(record) = records.first() {
                body.insert(identity.clone(), render_record(record, tz)?);
            }
        } else {
            let rendered = records
                .iter()
                .map(|record| render_record(record, tz))
                .collect::<ApiResult<Vec<_>>>()?;
            body.insert(identity.clone(), JsonValue::Array(rendered));
        }
    }
    Ok(JsonValue::Object(body))
}

// ============================================================================
// HANDLER
// ============================================================================

pub async fn latest(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> ApiResult<Response> {
    let params = LatestParams::parse(&pairs, state.config.max_n)?;
    tracing::debug!(
        n = params.n,
        columns = ?params.columns,
        names = ?params.names,
        "Latest measurements requested"
    );

    let deadline = Deadline::after(state.config.request_timeout);
    let measurements = state
        .service
        .latest(params.n, &params.columns, &params.names, deadline)
        .await?;

    let body = render(&measurements, params.n, &params.tz)?;
    Ok(([(CACHE_CONTROL, "no-store, max-age=0")], Json(body)).into_response())
}
