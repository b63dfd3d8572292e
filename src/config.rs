use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PipelineError;

const DEFAULT_API_URL: &str = "https://api.open-meteo.com/v1/forecast";
const DEFAULT_HOURLY_FIELDS: &str = "temperature_2m,relativehumidity_2m";
const DEFAULT_BUCKET: &str = "mihah-weather-data";
const DEFAULT_REGION: &str = "eu-north-1";
const DEFAULT_KEY: &str = "processed/weather_lju_anomalies.csv";
const DEFAULT_TABLE: &str = "weather_lju";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub api_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub hourly_fields: String,
    pub fetch_max_attempts: u32,
    pub fetch_base_delay: Duration,
    pub http_timeout: Duration,
    pub data_root: PathBuf,
    pub raw_csv_path: PathBuf,
    pub db_path: PathBuf,
    pub table: String,
    pub processed_csv_path: PathBuf,
    pub contamination: f64,
    pub seed: u64,
    pub bucket: String,
    pub region: String,
    pub key: String,
    pub endpoint_url: Option<String>,
}

/// Command-line values that win over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_root: Option<PathBuf>,
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub key: Option<String>,
    pub endpoint_url: Option<String>,
    pub contamination: Option<f64>,
    pub seed: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl PipelineConfig {
    /// Defaults rooted at `data_root`, with no environment lookups.
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            latitude: 46.05,
            longitude: 14.51,
            hourly_fields: DEFAULT_HOURLY_FIELDS.to_string(),
            fetch_max_attempts: 4,
            fetch_base_delay: Duration::from_secs(2),
            http_timeout: Duration::from_secs(15),
            raw_csv_path: default_raw_csv(&data_root),
            db_path: default_db_path(&data_root),
            table: DEFAULT_TABLE.to_string(),
            processed_csv_path: default_processed_csv(&data_root),
            contamination: 0.05,
            seed: 42,
            bucket: DEFAULT_BUCKET.to_string(),
            region: DEFAULT_REGION.to_string(),
            key: DEFAULT_KEY.to_string(),
            endpoint_url: None,
            data_root,
        }
    }

    pub fn from_env(overrides: ConfigOverrides) -> Result<Self> {
        dotenvy::dotenv().ok();

        let data_root = match overrides.data_root.clone() {
            Some(path) => path,
            None => env_path("WEATHER_DATA_ROOT", "data")?,
        };
        let defaults = Self::with_data_root(data_root.clone());

        let mut config = Self {
            api_url: env_string("WEATHER_API_URL", &defaults.api_url),
            latitude: env_f64("WEATHER_LATITUDE", defaults.latitude),
            longitude: env_f64("WEATHER_LONGITUDE", defaults.longitude),
            hourly_fields: env_string("WEATHER_HOURLY_FIELDS", &defaults.hourly_fields),
            fetch_max_attempts: env_u32("WEATHER_FETCH_MAX_ATTEMPTS", defaults.fetch_max_attempts),
            fetch_base_delay: Duration::from_secs(env_u64(
                "WEATHER_FETCH_BASE_DELAY_SECONDS",
                defaults.fetch_base_delay.as_secs(),
            )),
            http_timeout: Duration::from_secs(env_u64(
                "WEATHER_HTTP_TIMEOUT_SECONDS",
                defaults.http_timeout.as_secs(),
            )),
            raw_csv_path: env_path(
                "WEATHER_RAW_CSV",
                &defaults.raw_csv_path.to_string_lossy(),
            )?,
            db_path: env_path("WEATHER_DB_PATH", &defaults.db_path.to_string_lossy())?,
            table: env_string("WEATHER_TABLE", &defaults.table),
            processed_csv_path: env_path(
                "WEATHER_PROCESSED_CSV",
                &defaults.processed_csv_path.to_string_lossy(),
            )?,
            contamination: env_f64("WEATHER_CONTAMINATION", defaults.contamination),
            seed: env_u64("WEATHER_SEED", defaults.seed),
            bucket: env_string("WEATHER_S3_BUCKET", &defaults.bucket),
            region: env_string("WEATHER_S3_REGION", &defaults.region),
            key: env_string("WEATHER_S3_KEY", &defaults.key),
            endpoint_url: env_optional_string("WEATHER_S3_ENDPOINT_URL"),
            data_root,
        };
        config.apply_overrides(overrides);
        config.validate().context("weather pipeline configuration rejected")?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(bucket) = non_empty(overrides.bucket) {
            self.bucket = bucket;
        }
        if let Some(region) = non_empty(overrides.region) {
            self.region = region;
        }
        if let Some(key) = non_empty(overrides.key) {
            self.key = key;
        }
        if let Some(endpoint) = non_empty(overrides.endpoint_url) {
            self.endpoint_url = Some(endpoint);
        }
        if let Some(rate) = overrides.contamination {
            self.contamination = rate;
        }
        if let Some(seed) = overrides.seed {
            self.seed = seed;
        }
        if let Some(attempts) = overrides.max_attempts {
            self.fetch_max_attempts = attempts;
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let required = [
            ("bucket", self.bucket.as_str()),
            ("region", self.region.as_str()),
            ("key", self.key.as_str()),
            ("api_url", self.api_url.as_str()),
        ];
        for (label, value) in required {
            if value.trim().is_empty() {
                return Err(PipelineError::InvalidConfig(format!("{label} must not be empty")));
            }
        }
        url::Url::parse(&self.api_url).map_err(|err| {
            PipelineError::InvalidConfig(format!("api_url {:?} is not a URL: {err}", self.api_url))
        })?;
        if let Some(endpoint) = self.endpoint_url.as_deref() {
            url::Url::parse(endpoint).map_err(|err| {
                PipelineError::InvalidConfig(format!("endpoint_url {endpoint:?} is not a URL: {err}"))
            })?;
        }
        if self.http_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "http timeout must be greater than zero".to_string(),
            ));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(PipelineError::InvalidConfig(format!(
                "contamination rate {} must be in (0, 0.5]",
                self.contamination
            )));
        }
        crate::store::validate_table_name(&self.table)?;
        Ok(())
    }
}

fn default_raw_csv(data_root: &Path) -> PathBuf {
    data_root.join("raw").join("weather_lju.csv")
}

fn default_db_path(data_root: &Path) -> PathBuf {
    data_root.join("proto.db")
}

fn default_processed_csv(data_root: &Path) -> PathBuf {
    data_root.join("processed").join("weather_lju_anomalies.csv")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
}

fn env_path(key: &str, default: &str) -> Result<PathBuf> {
    let value = env_optional_string(key).unwrap_or_else(|| default.to_string());
    let path = PathBuf::from(value);
    if path.as_os_str().is_empty() {
        anyhow::bail!("{key} resolved to an empty path");
    }
    Ok(path)
}
