use crate::config::AppConfig;
use crate::error::AppError;
use crate::market::retry::RetryPolicy;
use crate::market::types::{
    parse_candle_payload, parse_quote_payload, Candle, CandleResolution, Quote,
};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

pub const FINNHUB_BASE_URL: &str = "https://finnhub.io/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, AppError>;

    async fn fetch_candles(
        &self,
        symbol: &str,
        resolution: CandleResolution,
        from: i64,
        to: i64,
    ) -> Result<Candle, AppError>;
}

fn endpoint(
    base_url: &str,
    path: &str,
    params: &[(&str, String)],
    token: Option<&str>,
) -> Result<Url, AppError> {
    let raw = format!("{}/{path}", base_url.trim_end_matches('/'));
    let mut url = Url::parse(&raw)
        .map_err(|error| AppError::InvalidArgument(format!("invalid endpoint '{raw}': {error}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
        if let Some(token) = token {
            pairs.append_pair("token", token);
        }
    }
    Ok(url)
}

fn quote_endpoint(base_url: &str, symbol: &str, token: Option<&str>) -> Result<Url, AppError> {
    endpoint(base_url, "quote", &[("symbol", symbol.to_string())], token)
}

fn candles_endpoint(
    base_url: &str,
    symbol: &str,
    resolution: CandleResolution,
    from: i64,
    to: i64,
    token: Option<&str>,
) -> Result<Url, AppError> {
    endpoint(
        base_url,
        "stock/candle",
        &[
            ("symbol", symbol.to_string()),
            ("resolution", resolution.as_str().to_string()),
            ("from", from.to_string()),
            ("to", to.to_string()),
        ],
        token,
    )
}

#[derive(Debug, Clone)]
pub struct QuoteClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
    retry: RetryPolicy,
}

impl QuoteClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = Client::builder().build()?;
        Ok(Self::with_http(
            http,
            config.base_url.clone(),
            config.api_key.clone(),
            config.request_timeout,
            config.retry,
        ))
    }

    pub fn with_http(
        http: Client,
        base_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token,
            request_timeout,
            retry,
        }
    }

    async fn get_payload(&self, symbol: &str, url: Url) -> Result<Vec<u8>, AppError> {
        debug!(symbol, path = url.path(), "requesting upstream market data");

        let request = async {
            let response = self
                .http
                .get(url)
                .header(ACCEPT, "application/json")
                .send()
                .await?;
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                warn!(symbol, "provider rate limit reached");
            }
            let response = response.error_for_status()?;
            let payload = response.bytes().await?;
            Ok::<_, AppError>(payload.to_vec())
        };

        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                symbol: symbol.to_string(),
                after_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl QuoteSource for QuoteClient {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, AppError> {
        let url = quote_endpoint(&self.base_url, symbol, self.token.as_deref())?;
        let label = format!("quote {symbol}");

        self.retry
            .run(&label, move || {
                let url = url.clone();
                async move {
                    let mut payload = self.get_payload(symbol, url).await?;
                    parse_quote_payload(symbol, &mut payload)
                }
            })
            .await
            .inspect_err(|error| warn!(symbol, %error, "quote request failed"))
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        resolution: CandleResolution,
        from: i64,
        to: i64,
    ) -> Result<Candle, AppError> {
        if from > to {
            return Err(AppError::InvalidArgument(format!(
                "candle range start {from} is after end {to}"
            )));
        }
        let url = candles_endpoint(
            &self.base_url,
            symbol,
            resolution,
            from,
            to,
            self.token.as_deref(),
        )?;
        let label = format!("candles {symbol}");

        self.retry
            .run(&label, move || {
                let url = url.clone();
                async move {
                    let mut payload = self.get_payload(symbol, url).await?;
                    parse_candle_payload(symbol, &mut payload)
                }
            })
            .await
            .inspect_err(|error| warn!(symbol, %error, "candle request failed"))
    }
}
