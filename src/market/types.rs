use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DOMESTIC_SYMBOLS: [&str; 5] = [
    "RELIANCE.NS",
    "TCS.NS",
    "HDFCBANK.NS",
    "INFY.NS",
    "ICICIBANK.NS",
];
pub const FOREIGN_SYMBOLS: [&str; 5] = ["AAPL", "TSLA", "MSFT", "AMZN", "NVDA"];

pub type QuoteMap = BTreeMap<String, Quote>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SegmentId {
    Domestic,
    Foreign,
}

impl SegmentId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domestic => "domestic",
            Self::Foreign => "foreign",
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "domestic" => Ok(Self::Domestic),
            "foreign" => Ok(Self::Foreign),
            other => Err(AppError::InvalidArgument(format!(
                "unknown market segment '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MarketSegment {
    pub id: SegmentId,
    pub label: String,
    pub symbols: Vec<String>,
    pub currency_symbol: String,
}

impl MarketSegment {
    pub fn new(id: SegmentId, label: &str, symbols: &[&str], currency_symbol: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            symbols: symbols.iter().map(|symbol| symbol.to_string()).collect(),
            currency_symbol: currency_symbol.to_string(),
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(SegmentId::Domestic, "NSE", &DOMESTIC_SYMBOLS, "₹"),
            Self::new(SegmentId::Foreign, "NASDAQ", &FOREIGN_SYMBOLS, "$"),
        ]
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarketMode {
    Live,
    Simulated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartupMode {
    LiveFirst,
    SimulatedOnly,
}

/// Point-in-time price record. `timestamp` is unix seconds, as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub current_price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub previous_close: f64,
    pub timestamp: i64,
}

impl Quote {
    pub fn is_valid(&self) -> bool {
        self.current_price.is_finite() && self.current_price > 0.0
    }

    pub fn is_settled(&self) -> bool {
        [self.open, self.current_price, self.previous_close]
            .iter()
            .all(|value| self.low <= *value && *value <= self.high)
    }
}

#[derive(Debug, Deserialize)]
pub struct QuoteWire {
    pub c: Option<f64>,
    pub d: Option<f64>,
    pub dp: Option<f64>,
    pub h: Option<f64>,
    pub l: Option<f64>,
    pub o: Option<f64>,
    pub pc: Option<f64>,
    pub t: Option<i64>,
}

impl QuoteWire {
    pub fn into_quote(self, symbol: &str) -> Result<Quote, AppError> {
        let current_price = match self.c {
            Some(price) if price.is_finite() => price,
            _ => {
                return Err(AppError::data_invalid(
                    symbol,
                    "price field missing or non-numeric",
                ))
            }
        };

        Ok(Quote {
            symbol: symbol.to_string(),
            current_price,
            change: self.d.unwrap_or_default(),
            change_percent: self.dp.unwrap_or_default(),
            high: self.h.unwrap_or_default(),
            low: self.l.unwrap_or_default(),
            open: self.o.unwrap_or_default(),
            previous_close: self.pc.unwrap_or_default(),
            timestamp: self.t.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum CandleResolution {
    #[serde(rename = "1")]
    Min1,
    #[serde(rename = "5")]
    Min5,
    #[serde(rename = "15")]
    Min15,
    #[serde(rename = "30")]
    Min30,
    #[serde(rename = "60")]
    Min60,
    #[default]
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "W")]
    Week,
    #[serde(rename = "M")]
    Month,
}

impl CandleResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1",
            Self::Min5 => "5",
            Self::Min15 => "15",
            Self::Min30 => "30",
            Self::Min60 => "60",
            Self::Day => "D",
            Self::Week => "W",
            Self::Month => "M",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub closes: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub opens: Vec<f64>,
    pub volumes: Vec<f64>,
    pub timestamps: Vec<i64>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandleBar {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

impl Candle {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn bars(&self) -> Vec<CandleBar> {
        self.timestamps
            .iter()
            .zip(&self.opens)
            .zip(&self.highs)
            .zip(&self.lows)
            .zip(&self.closes)
            .zip(&self.volumes)
            .map(|(((((&t, &o), &h), &l), &c), &v)| CandleBar { t, o, h, l, c, v })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct CandleWire {
    #[serde(default)]
    pub c: Vec<f64>,
    #[serde(default)]
    pub h: Vec<f64>,
    #[serde(default)]
    pub l: Vec<f64>,
    #[serde(default)]
    pub o: Vec<f64>,
    #[serde(default)]
    pub s: Option<String>,
    #[serde(default)]
    pub t: Vec<i64>,
    #[serde(default)]
    pub v: Vec<f64>,
}

impl CandleWire {
    pub fn into_candle(self, symbol: &str) -> Result<Candle, AppError> {
        let status = self.s.unwrap_or_default();
        if status != "ok" {
            return Err(AppError::data_invalid(
                symbol,
                format!("candle status '{status}'"),
            ));
        }

        let expected = self.t.len();
        let lengths = [
            self.c.len(),
            self.h.len(),
            self.l.len(),
            self.o.len(),
            self.v.len(),
        ];
        if lengths.iter().any(|length| *length != expected) {
            return Err(AppError::data_invalid(
                symbol,
                "candle series have mismatched lengths",
            ));
        }

        Ok(Candle {
            closes: self.c,
            highs: self.h,
            lows: self.l,
            opens: self.o,
            volumes: self.v,
            timestamps: self.t,
            status,
        })
    }
}

pub fn parse_quote_payload(symbol: &str, payload: &mut [u8]) -> Result<Quote, AppError> {
    let wire: QuoteWire = simd_json::serde::from_slice(payload)?;
    wire.into_quote(symbol)
}

pub fn parse_candle_payload(symbol: &str, payload: &mut [u8]) -> Result<Candle, AppError> {
    let wire: CandleWire = simd_json::serde::from_slice(payload)?;
    wire.into_candle(symbol)
}
