use crate::error::AppError;
use crate::market::batch::{DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE};
use crate::market::finnhub::{DEFAULT_REQUEST_TIMEOUT_MS, FINNHUB_BASE_URL};
use crate::market::retry::{
    RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_RETRIES, DEFAULT_MULTIPLIER,
};
use crate::market::types::{SegmentId, StartupMode};
use reqwest::Url;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_SEGMENT: SegmentId = SegmentId::Foreign;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const MAX_RETRIES: u32 = 5;
pub const MIN_RETRY_BASE_DELAY_MS: u64 = 1;
pub const MAX_RETRY_BASE_DELAY_MS: u64 = 30_000;
pub const MIN_RETRY_MULTIPLIER: f64 = 1.0;
pub const MAX_RETRY_MULTIPLIER: f64 = 4.0;
pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 50;
pub const MAX_BATCH_DELAY_MS: u64 = 10_000;
pub const MIN_TICK_INTERVAL_MS: u64 = 250;
pub const MAX_TICK_INTERVAL_MS: u64 = 60_000;

/// Raw settings as read from the environment; every field is optional.
#[derive(Debug, Clone, Default)]
pub struct AppConfigArgs {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_multiplier: Option<f64>,
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
    pub tick_interval_ms: Option<u64>,
    pub simulate_only: Option<bool>,
    pub default_segment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub tick_interval: Duration,
    pub startup_mode: StartupMode,
    pub default_segment: SegmentId,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match env_value(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{key} has an unparseable value '{raw}'"))),
        None => Ok(None),
    }
}

fn parse_flag(key: &str) -> Result<Option<bool>, AppError> {
    match env_value(key).map(|raw| raw.to_ascii_lowercase()) {
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(AppError::Config(format!(
                "{key} must be a boolean, got '{raw}'"
            ))),
        },
        None => Ok(None),
    }
}

impl AppConfigArgs {
    /// Reads `.env` (when present) and the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(error) = dotenvy::dotenv() {
            if !error.not_found() {
                return Err(AppError::Config(format!("failed to load .env: {error}")));
            }
        }

        Ok(Self {
            api_key: env_value("FINNHUB_API_KEY"),
            base_url: env_value("FINNHUB_BASE_URL"),
            request_timeout_ms: env_parsed("QUOTE_REQUEST_TIMEOUT_MS")?,
            max_retries: env_parsed("QUOTE_MAX_RETRIES")?,
            retry_base_delay_ms: env_parsed("QUOTE_RETRY_BASE_DELAY_MS")?,
            retry_multiplier: env_parsed("QUOTE_RETRY_MULTIPLIER")?,
            batch_size: env_parsed("QUOTE_BATCH_SIZE")?,
            batch_delay_ms: env_parsed("QUOTE_BATCH_DELAY_MS")?,
            tick_interval_ms: env_parsed("QUOTE_TICK_INTERVAL_MS")?,
            simulate_only: parse_flag("QUOTE_SIMULATE_ONLY")?,
            default_segment: env_value("QUOTE_DEFAULT_SEGMENT"),
        })
    }

    pub fn normalize(self) -> Result<AppConfig, AppError> {
        let api_key = self.api_key.map(|key| key.trim().to_string());
        if api_key.as_deref() == Some("") {
            return Err(AppError::InvalidArgument(
                "api key must not be blank when provided".to_string(),
            ));
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| FINNHUB_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        match Url::parse(&base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(AppError::InvalidArgument(format!(
                    "baseUrl '{base_url}' must be an http(s) URL"
                )))
            }
        }

        let request_timeout_ms = self
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if !(MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS).contains(&request_timeout_ms) {
            return Err(AppError::InvalidArgument(format!(
                "requestTimeoutMs must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS}"
            )));
        }

        let max_retries = self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        if max_retries > MAX_RETRIES {
            return Err(AppError::InvalidArgument(format!(
                "maxRetries must be at most {MAX_RETRIES}"
            )));
        }

        let retry_base_delay_ms = self.retry_base_delay_ms.unwrap_or(DEFAULT_BASE_DELAY_MS);
        if !(MIN_RETRY_BASE_DELAY_MS..=MAX_RETRY_BASE_DELAY_MS).contains(&retry_base_delay_ms) {
            return Err(AppError::InvalidArgument(format!(
                "retryBaseDelayMs must be between {MIN_RETRY_BASE_DELAY_MS} and {MAX_RETRY_BASE_DELAY_MS}"
            )));
        }

        let retry_multiplier = self.retry_multiplier.unwrap_or(DEFAULT_MULTIPLIER);
        if !retry_multiplier.is_finite()
            || !(MIN_RETRY_MULTIPLIER..=MAX_RETRY_MULTIPLIER).contains(&retry_multiplier)
        {
            return Err(AppError::InvalidArgument(format!(
                "retryMultiplier must be between {MIN_RETRY_MULTIPLIER} and {MAX_RETRY_MULTIPLIER}"
            )));
        }

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
            return Err(AppError::InvalidArgument(format!(
                "batchSize must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}"
            )));
        }

        let batch_delay_ms = self.batch_delay_ms.unwrap_or(DEFAULT_BATCH_DELAY_MS);
        if batch_delay_ms > MAX_BATCH_DELAY_MS {
            return Err(AppError::InvalidArgument(format!(
                "batchDelayMs must be at most {MAX_BATCH_DELAY_MS}"
            )));
        }

        let tick_interval_ms = self.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS);
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&tick_interval_ms) {
            return Err(AppError::InvalidArgument(format!(
                "tickIntervalMs must be between {MIN_TICK_INTERVAL_MS} and {MAX_TICK_INTERVAL_MS}"
            )));
        }

        let default_segment = match self.default_segment {
            Some(raw) => raw.parse::<SegmentId>()?,
            None => DEFAULT_SEGMENT,
        };

        let startup_mode = if self.simulate_only.unwrap_or(false) {
            StartupMode::SimulatedOnly
        } else if api_key.is_none() {
            warn!("no FINNHUB_API_KEY configured, quotes will be simulated");
            StartupMode::SimulatedOnly
        } else {
            StartupMode::LiveFirst
        };

        Ok(AppConfig {
            api_key,
            base_url,
            request_timeout: Duration::from_millis(request_timeout_ms),
            retry: RetryPolicy {
                max_retries,
                base_delay: Duration::from_millis(retry_base_delay_ms),
                multiplier: retry_multiplier,
            },
            batch_size,
            batch_delay: Duration::from_millis(batch_delay_ms),
            tick_interval: Duration::from_millis(tick_interval_ms),
            startup_mode,
            default_segment,
        })
    }
}
