use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::observation::{read_raw_csv, write_raw_csv, Cell, Observation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal GET seam shared by the fetcher and the publish verifier.
pub trait HttpSource {
    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        timeout: Duration,
    ) -> Result<HttpResponse>;
}

pub struct ReqwestSource {
    client: reqwest::blocking::Client,
}

impl ReqwestSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("weather-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpSource for ReqwestSource {
    fn get(
        &self,
        url: &str,
        query: &[(String, String)],
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(timeout)
            .send()
            .with_context(|| format!("GET {url} failed"))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .with_context(|| format!("failed to read body from {url}"))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl FetchRequest {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            endpoint: config.api_url.clone(),
            query: vec![
                ("latitude".to_string(), config.latitude.to_string()),
                ("longitude".to_string(), config.longitude.to_string()),
                ("hourly".to_string(), config.hourly_fields.clone()),
            ],
            max_attempts: config.fetch_max_attempts,
            base_delay: config.fetch_base_delay,
            timeout: config.http_timeout,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: Option<OpenMeteoHourly>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    temperature_2m: Vec<JsonValue>,
    #[serde(rename = "relativehumidity_2m", alias = "relative_humidity_2m")]
    humidity: Vec<JsonValue>,
}

/// Hourly arrays from one successful API response, already checked for equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub time: Vec<String>,
    pub temperature: Vec<Cell>,
    pub humidity: Vec<Cell>,
}

impl RawPayload {
    pub fn parse(body: &[u8]) -> Result<Self> {
        let response: OpenMeteoResponse =
            serde_json::from_slice(body).context("response is not valid Open-Meteo JSON")?;
        let hourly = response
            .hourly
            .context("response has no hourly block")?;
        let n = hourly.time.len();
        if hourly.temperature_2m.len() != n || hourly.humidity.len() != n {
            anyhow::bail!(
                "hourly arrays differ in length (time={}, temperature={}, humidity={})",
                n,
                hourly.temperature_2m.len(),
                hourly.humidity.len()
            );
        }
        Ok(Self {
            time: hourly.time,
            temperature: hourly.temperature_2m.iter().map(json_cell).collect(),
            humidity: hourly.humidity.iter().map(json_cell).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn into_series(self) -> Vec<Observation> {
        self.time
            .into_iter()
            .zip(self.temperature)
            .zip(self.humidity)
            .map(|((time, temp), humidity)| Observation {
                time,
                temp,
                humidity,
            })
            .collect()
    }
}

fn json_cell(value: &JsonValue) -> Cell {
    match value {
        JsonValue::Null => Cell::Missing,
        JsonValue::Number(number) => number.as_f64().map(Cell::Number).unwrap_or(Cell::Missing),
        JsonValue::String(text) => Cell::from_text(text),
        other => Cell::Text(other.to_string()),
    }
}

fn fetch_once<S: HttpSource + ?Sized>(source: &S, request: &FetchRequest) -> Result<RawPayload> {
    let response = source.get(&request.endpoint, &request.query, request.timeout)?;
    if !response.is_success() {
        anyhow::bail!("{} returned HTTP {}", request.endpoint, response.status);
    }
    RawPayload::parse(&response.body)
}

/// Bounded retry with linear backoff (`base_delay * attempt`); no sleep after the last attempt.
pub fn fetch_with_retry<S: HttpSource + ?Sized>(
    source: &S,
    request: &FetchRequest,
    sleep: &mut dyn FnMut(Duration),
) -> PipelineResult<RawPayload> {
    let max_attempts = request.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=max_attempts {
        match fetch_once(source, request) {
            Ok(payload) => {
                tracing::info!(attempt, rows = payload.len(), "fetched hourly series");
                return Ok(payload);
            }
            Err(err) => {
                let delay = request.base_delay.saturating_mul(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %format!("{err:#}"),
                    "fetch attempt failed"
                );
                last_error = Some(err);
                if attempt < max_attempts {
                    sleep(delay);
                }
            }
        }
    }
    Err(PipelineError::FetchExhausted {
        attempts: max_attempts,
        cause: last_error
            .map(|err| format!("{err:#}"))
            .unwrap_or_else(|| "no attempt made".to_string()),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fresh(Vec<Observation>),
    Cached {
        series: Vec<Observation>,
        cause: String,
    },
}

impl FetchOutcome {
    pub fn series(&self) -> &[Observation] {
        match self {
            FetchOutcome::Fresh(series) => series,
            FetchOutcome::Cached { series, .. } => series,
        }
    }

    pub fn into_series(self) -> Vec<Observation> {
        match self {
            FetchOutcome::Fresh(series) => series,
            FetchOutcome::Cached { series, .. } => series,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, FetchOutcome::Cached { .. })
    }

    /// The recovered warning for a cached run.
    pub fn degradation(&self) -> Option<PipelineError> {
        match self {
            FetchOutcome::Fresh(_) => None,
            FetchOutcome::Cached { cause, .. } => Some(PipelineError::FetchDegraded {
                cause: cause.clone(),
            }),
        }
    }
}

/// Live fetch, refreshing the raw cache on success; falls back to the cache on exhaustion.
pub fn fetch_or_recover<S: HttpSource + ?Sized>(
    source: &S,
    request: &FetchRequest,
    cache_path: &Path,
    sleep: &mut dyn FnMut(Duration),
) -> PipelineResult<FetchOutcome> {
    match fetch_with_retry(source, request, sleep) {
        Ok(payload) => {
            let series = payload.into_series();
            match write_raw_csv(cache_path, &series) {
                Ok(()) => tracing::info!(path = %cache_path.display(), "saved raw cache"),
                Err(err) => tracing::warn!(
                    path = %cache_path.display(),
                    error = %err,
                    "failed to refresh raw cache"
                ),
            }
            Ok(FetchOutcome::Fresh(series))
        }
        Err(PipelineError::FetchExhausted { attempts, cause }) => {
            if !cache_path.exists() {
                return Err(PipelineError::FetchExhausted { attempts, cause });
            }
            let series = read_raw_csv(cache_path)?;
            tracing::warn!(
                path = %cache_path.display(),
                rows = series.len(),
                cause = %cause,
                "live fetch exhausted; using cached raw series"
            );
            Ok(FetchOutcome::Cached { series, cause })
        }
        Err(other) => Err(other),
    }
}
