use crate::market::types::{Quote, QuoteMap, SegmentId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

const SEED_TIMESTAMP: i64 = 1_718_000_000;

// symbol, price, change, change %, high, low, open, previous close
type SeedRow = (&'static str, f64, f64, f64, f64, f64, f64, f64);

const DOMESTIC_SEED: [SeedRow; 5] = [
    ("RELIANCE.NS", 2935.40, 18.65, 0.64, 2941.80, 2910.15, 2918.00, 2916.75),
    ("TCS.NS", 3912.75, -24.30, -0.62, 3944.20, 3905.10, 3935.50, 3937.05),
    ("HDFCBANK.NS", 1532.10, 7.85, 0.51, 1536.40, 1521.60, 1525.00, 1524.25),
    ("INFY.NS", 1468.20, -11.40, -0.77, 1482.90, 1463.35, 1479.10, 1479.60),
    ("ICICIBANK.NS", 1089.55, 5.20, 0.48, 1092.70, 1081.90, 1084.00, 1084.35),
];

const FOREIGN_SEED: [SeedRow; 5] = [
    ("AAPL", 188.42, 1.25, 0.67, 189.10, 186.90, 187.30, 187.17),
    ("TSLA", 178.21, -3.71, -2.04, 182.50, 177.60, 181.40, 181.92),
    ("MSFT", 432.63, 4.27, 1.00, 433.90, 427.80, 428.90, 428.36),
    ("AMZN", 178.12, 1.32, 0.75, 178.85, 176.40, 176.95, 176.80),
    ("NVDA", 924.78, -12.55, -1.34, 940.10, 921.30, 936.00, 937.33),
];

fn seed_map(rows: &[SeedRow]) -> QuoteMap {
    rows.iter()
        .map(
            |&(symbol, current_price, change, change_percent, high, low, open, previous_close)| {
                (
                    symbol.to_string(),
                    Quote {
                        symbol: symbol.to_string(),
                        current_price,
                        change,
                        change_percent,
                        high,
                        low,
                        open,
                        previous_close,
                        timestamp: SEED_TIMESTAMP,
                    },
                )
            },
        )
        .collect()
}

#[derive(Debug, Default)]
pub struct BaselineStore {
    segments: RwLock<HashMap<SegmentId, QuoteMap>>,
}

impl BaselineStore {
    pub fn new(segments: HashMap<SegmentId, QuoteMap>) -> Self {
        Self {
            segments: RwLock::new(segments),
        }
    }

    pub fn seeded() -> Self {
        let mut segments = HashMap::new();
        segments.insert(SegmentId::Domestic, seed_map(&DOMESTIC_SEED));
        segments.insert(SegmentId::Foreign, seed_map(&FOREIGN_SEED));
        Self::new(segments)
    }

    pub fn get(&self, segment: SegmentId) -> QuoteMap {
        self.segments
            .read()
            .get(&segment)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_quote(&self, segment: SegmentId, symbol: &str) -> Option<Quote> {
        self.segments
            .read()
            .get(&segment)
            .and_then(|quotes| quotes.get(symbol))
            .cloned()
    }

    pub fn upgrade(&self, segment: SegmentId, symbol: &str, quote: &Quote) -> bool {
        if !quote.is_valid() {
            return false;
        }

        let mut record = quote.clone();
        record.symbol = symbol.to_string();
        self.segments
            .write()
            .entry(segment)
            .or_default()
            .insert(symbol.to_string(), record);
        debug!(segment = %segment, symbol, price = quote.current_price, "baseline upgraded");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::{MarketSegment, DOMESTIC_SYMBOLS, FOREIGN_SYMBOLS};

    #[test]
    fn seeds_cover_every_segment_symbol() {
        let store = BaselineStore::seeded();
        for segment in MarketSegment::defaults() {
            let baselines = store.get(segment.id);
            assert_eq!(baselines.len(), segment.symbols.len());
            for symbol in &segment.symbols {
                assert!(baselines.contains_key(symbol), "missing seed for {symbol}");
            }
        }
        assert_eq!(DOMESTIC_SEED.len(), DOMESTIC_SYMBOLS.len());
        assert_eq!(FOREIGN_SEED.len(), FOREIGN_SYMBOLS.len());
    }

    #[test]
    fn seeds_are_settled_and_valid() {
        let store = BaselineStore::seeded();
        for segment in [SegmentId::Domestic, SegmentId::Foreign] {
            for quote in store.get(segment).values() {
                assert!(quote.is_valid(), "{} must be valid", quote.symbol);
                assert!(quote.is_settled(), "{} must be settled", quote.symbol);
            }
        }
    }

    #[test]
    fn repeated_reads_are_equal_and_isolated() {
        let store = BaselineStore::seeded();
        let mut first = store.get(SegmentId::Foreign);
        let second = store.get(SegmentId::Foreign);
        assert_eq!(first, second);

        if let Some(quote) = first.get_mut("AAPL") {
            quote.current_price = 1.0;
            quote.change = 99.0;
        }
        first.remove("MSFT");

        assert_eq!(store.get(SegmentId::Foreign), second);
    }

    #[test]
    fn upgrade_replaces_whole_record() {
        let store = BaselineStore::seeded();
        let mut verified = store
            .get_quote(SegmentId::Foreign, "AAPL")
            .expect("seeded AAPL");
        verified.current_price = 190.0;
        verified.change = 2.83;
        verified.change_percent = 1.51;
        verified.high = 190.5;
        verified.low = 187.0;

        assert!(store.upgrade(SegmentId::Foreign, "AAPL", &verified));
        assert_eq!(
            store.get_quote(SegmentId::Foreign, "AAPL"),
            Some(verified.clone())
        );
    }

    #[test]
    fn upgrade_ignores_quotes_without_price() {
        let store = BaselineStore::seeded();
        let before = store.get(SegmentId::Domestic);
        let mut empty = before
            .get("TCS.NS")
            .cloned()
            .expect("seeded TCS");
        empty.current_price = 0.0;
        empty.change = 0.0;

        assert!(!store.upgrade(SegmentId::Domestic, "TCS.NS", &empty));
        assert_eq!(store.get(SegmentId::Domestic), before);
    }

    #[test]
    fn unknown_segment_reads_empty() {
        let store = BaselineStore::default();
        assert!(store.get(SegmentId::Domestic).is_empty());
    }
}
