// =============================================================================
// Bar Feed — historical OHLCV retrieval (HTTP data service or CSV file)
// =============================================================================
//
// Supplies the chronologically-ordered bar sequence the detector consumes.
// Two sources:
//
//   - an HTTP market-data service exposing
//     GET {base}/api/forex/{symbol}/{granularity}?start=...&end=...
//     returning a JSON array of bar records (numeric fields may arrive as
//     JSON numbers or strings),
//   - a local CSV file with header `t,open,high,low,close,volume`.
//
// Both sort ascending by timestamp and reject duplicates — the detector
// requires strictly increasing time.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::types::Bar;

/// Parse an ISO-8601 datetime, or a plain date taken as midnight UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(DateTime::from_naive_utc_and_offset(
            d.and_hms_opt(0, 0, 0).expect("midnight is always valid"),
            Utc,
        ));
    }
    bail!("unrecognised timestamp format: {raw}")
}

/// Data services disagree on whether prices are numbers or strings.
fn parse_value_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        serde_json::Value::Null => Ok(f64::NAN),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

/// Parse one bar object from the data-service response.
fn parse_bar_record(record: &serde_json::Value) -> Result<Bar> {
    let t_raw = record["t"]
        .as_str()
        .context("missing or non-string field t")?;
    let t = parse_timestamp(t_raw)?;

    Ok(Bar {
        t,
        open: parse_value_f64(&record["open"], "open")?,
        high: parse_value_f64(&record["high"], "high")?,
        low: parse_value_f64(&record["low"], "low")?,
        close: parse_value_f64(&record["close"], "close")?,
        volume: parse_value_f64(&record["volume"], "volume").unwrap_or(0.0),
    })
}

/// Sort ascending by timestamp and reject duplicates.
fn finalise(mut bars: Vec<Bar>) -> Result<Vec<Bar>> {
    bars.sort_by_key(|b| b.t);
    for pair in bars.windows(2) {
        if pair[1].t == pair[0].t {
            bail!("duplicate bar timestamp: {}", pair[0].t);
        }
    }
    Ok(bars)
}

/// Fetch bars from the market-data service.
pub async fn fetch_bars(
    base_url: &str,
    symbol: &str,
    granularity: &str,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Vec<Bar>> {
    let url = format!(
        "{}/api/forex/{}/{}",
        base_url.trim_end_matches('/'),
        symbol,
        granularity
    );
    info!(url = %url, symbol = %symbol, "fetching bars from data service");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("failed to build HTTP client")?;

    let mut request = client.get(&url);
    if let Some(s) = start {
        request = request.query(&[("start", s)]);
    }
    if let Some(e) = end {
        request = request.query(&[("end", e)]);
    }

    let resp = request
        .send()
        .await
        .with_context(|| format!("GET {url} failed"))?;

    let status = resp.status();
    if !status.is_success() {
        bail!("data service returned {status} for {url}");
    }

    let body: serde_json::Value = resp
        .json()
        .await
        .context("failed to decode data service response as JSON")?;

    let records = body
        .as_array()
        .context("expected a JSON array of bar records")?;

    let mut bars = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        bars.push(parse_bar_record(record).with_context(|| format!("bad bar record at index {i}"))?);
    }

    debug!(count = bars.len(), "bars fetched");
    finalise(bars)
}

/// Raw CSV row; timestamps parsed in a second step.
#[derive(Debug, Deserialize)]
struct CsvBarRecord {
    t: String,
    #[serde(default)]
    open: Option<f64>,
    #[serde(default)]
    high: Option<f64>,
    #[serde(default)]
    low: Option<f64>,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
}

/// Load bars from a local CSV file with header `t,open,high,low,close,volume`.
pub fn load_bars_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open bar CSV at {}", path.display()))?;

    let mut bars = Vec::new();
    for (i, result) in reader.deserialize::<CsvBarRecord>().enumerate() {
        let record = result.with_context(|| format!("bad CSV row {} in {}", i + 1, path.display()))?;
        let t = parse_timestamp(&record.t)
            .with_context(|| format!("bad timestamp in CSV row {}", i + 1))?;
        bars.push(Bar {
            t,
            open: record.open.unwrap_or(f64::NAN),
            high: record.high.unwrap_or(f64::NAN),
            low: record.low.unwrap_or(f64::NAN),
            close: record.close,
            volume: record.volume.unwrap_or(0.0),
        });
    }

    info!(path = %path.display(), count = bars.len(), "bars loaded from CSV");
    finalise(bars)
}
