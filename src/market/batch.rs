use crate::market::finnhub::QuoteSource;
use crate::market::types::QuoteMap;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 500;

#[derive(Clone)]
pub struct BatchFetcher {
    source: Arc<dyn QuoteSource>,
    batch_size: usize,
    batch_delay: Duration,
}

impl BatchFetcher {
    pub fn new(source: Arc<dyn QuoteSource>, batch_size: usize, batch_delay: Duration) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    pub fn source(&self) -> &Arc<dyn QuoteSource> {
        &self.source
    }

    pub async fn fetch_many(&self, symbols: &[String]) -> QuoteMap {
        let mut quotes = QuoteMap::new();
        let batches: Vec<&[String]> = symbols.chunks(self.batch_size).collect();
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            debug!(batch = index + 1, of = batch_count, size = batch.len(), "fetching quote batch");

            let results = join_all(batch.iter().map(|symbol| async move {
                (symbol, self.source.fetch_quote(symbol).await)
            }))
            .await;

            for (symbol, result) in results {
                match result {
                    Ok(quote) if quote.is_valid() => {
                        quotes.insert(symbol.clone(), quote);
                    }
                    Ok(quote) => {
                        warn!(
                            symbol = %symbol,
                            price = quote.current_price,
                            "dropping quote without a positive price"
                        );
                    }
                    Err(error) => {
                        warn!(symbol = %symbol, %error, "dropping symbol after failed fetch");
                    }
                }
            }
        }

        quotes
    }
}
