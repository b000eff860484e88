use crate::market::types::{MarketMode, MarketSegment, Quote, QuoteMap};

pub const NOT_AVAILABLE: &str = "N/A";

pub fn price_label(price: f64, currency_symbol: &str) -> String {
    if price.is_finite() && price > 0.0 {
        format!("{currency_symbol}{price:.2}")
    } else {
        NOT_AVAILABLE.to_string()
    }
}

pub fn change_badge(change: f64, change_percent: f64) -> String {
    let arrow = if change < 0.0 || (change == 0.0 && change_percent < 0.0) {
        '▼'
    } else {
        '▲'
    };
    format!("{arrow} {:.2} ({:.2}%)", change.abs(), change_percent.abs())
}

pub fn quote_line(quote: &Quote, currency_symbol: &str) -> String {
    if !quote.is_valid() {
        return format!("{:<14}{:>12}", quote.symbol, NOT_AVAILABLE);
    }
    format!(
        "{:<14}{:>12}  {}",
        quote.symbol,
        price_label(quote.current_price, currency_symbol),
        change_badge(quote.change, quote.change_percent)
    )
}

pub fn mode_label(mode: Option<MarketMode>) -> &'static str {
    match mode {
        Some(MarketMode::Live) => "Live",
        Some(MarketMode::Simulated) => "Simulated",
        None => "Loading",
    }
}

pub fn render_board(
    segment: &MarketSegment,
    quotes: &QuoteMap,
    mode: Option<MarketMode>,
    last_updated_ms: Option<i64>,
) -> String {
    let mut lines = Vec::with_capacity(segment.symbols.len() + 1);
    let updated = last_updated_ms.map_or_else(|| "never".to_string(), |ms| ms.to_string());
    lines.push(format!(
        "{} [{}] updated={updated}",
        segment.label,
        mode_label(mode)
    ));
    for symbol in &segment.symbols {
        match quotes.get(symbol) {
            Some(quote) => lines.push(quote_line(quote, &segment.currency_symbol)),
            None => lines.push(format!("{symbol:<14}{NOT_AVAILABLE:>12}")),
        }
    }
    lines.join("\n")
}
