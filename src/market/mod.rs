pub mod baseline;
pub mod batch;
pub mod controller;
pub mod display;
pub mod finnhub;
pub mod retry;
pub mod simulator;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

pub fn now_unix_secs() -> i64 {
    now_unix_ms() / 1_000
}
