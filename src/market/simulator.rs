use crate::market::types::{Quote, QuoteMap};
use rand::Rng;

pub const DEFAULT_MAX_MAGNITUDE: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluctuationSimulator {
    max_magnitude: f64,
}

impl Default for FluctuationSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MAGNITUDE)
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl FluctuationSimulator {
    /// Non-finite magnitudes collapse to zero, which freezes prices.
    pub fn new(max_magnitude: f64) -> Self {
        let max_magnitude = if max_magnitude.is_finite() {
            max_magnitude.abs()
        } else {
            0.0
        };
        Self { max_magnitude }
    }

    pub fn max_magnitude(&self) -> f64 {
        self.max_magnitude
    }

    fn within_bound(&self, candidate: f64, base_price: f64) -> bool {
        (candidate - base_price).abs() <= base_price * self.max_magnitude
    }

    /// Moves `base_price` by a random fraction in `[0, max_magnitude)` in a
    /// random direction, rounded to cents. When cent rounding would overshoot
    /// the bound the move is truncated toward the base, and dropped entirely
    /// if even that overshoots.
    pub fn next_price<R: Rng>(&self, base_price: f64, rng: &mut R) -> f64 {
        if self.max_magnitude == 0.0 {
            return base_price;
        }
        let magnitude = rng.random_range(0.0..self.max_magnitude);
        let direction = if rng.random_bool(0.5) { 1.0 } else { -1.0 };
        let raw = base_price * (1.0 + direction * magnitude);

        let rounded = round_cents(raw);
        if self.within_bound(rounded, base_price) {
            return rounded;
        }

        let truncated = if direction > 0.0 {
            (raw * 100.0).floor() / 100.0
        } else {
            (raw * 100.0).ceil() / 100.0
        };
        if self.within_bound(truncated, base_price) {
            truncated
        } else {
            base_price
        }
    }

    pub fn next_quote<R: Rng>(
        &self,
        current: Option<&Quote>,
        baseline: &Quote,
        rng: &mut R,
        now_secs: i64,
    ) -> Quote {
        let current = current.filter(|quote| quote.is_valid());
        if current.is_none() && !baseline.is_valid() {
            // No data stays no data until a refresh brings a real price.
            return baseline.clone();
        }

        let base_price = current.map_or(baseline.current_price, |quote| quote.current_price);
        let new_price = self.next_price(base_price, rng);

        let previous = current.unwrap_or(baseline);
        let previous_high = if previous.high > 0.0 {
            previous.high
        } else {
            new_price
        };
        let previous_low = if previous.low > 0.0 {
            previous.low
        } else {
            new_price
        };

        Quote {
            symbol: baseline.symbol.clone(),
            current_price: new_price,
            change: baseline.change,
            change_percent: baseline.change_percent,
            high: previous_high.max(new_price),
            low: previous_low.min(new_price),
            open: previous.open,
            previous_close: previous.previous_close,
            timestamp: now_secs,
        }
    }

    pub fn tick<R: Rng>(
        &self,
        current: &QuoteMap,
        baselines: &QuoteMap,
        rng: &mut R,
        now_secs: i64,
    ) -> QuoteMap {
        baselines
            .iter()
            .map(|(symbol, baseline)| {
                let next = self.next_quote(current.get(symbol), baseline, rng, now_secs);
                (symbol.clone(), next)
            })
            .collect()
    }
}
