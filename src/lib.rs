pub mod config;
pub mod error;
pub mod market;
pub mod state;
pub mod telemetry;

use config::AppConfigArgs;
use error::AppError;
use market::baseline::BaselineStore;
use market::batch::BatchFetcher;
use market::controller::{ControllerSettings, MarketController};
use market::display::render_board;
use market::finnhub::{QuoteClient, QuoteSource};
use market::types::MarketSegment;
use std::sync::Arc;
use tracing::info;

/// Headless dashboard: selects the configured segment and prints the quote
/// board after every update until Ctrl-C.
pub async fn run() -> Result<(), AppError> {
    telemetry::init_tracing(telemetry::DEFAULT_LOG_FILTER);

    let config = AppConfigArgs::from_env()?.normalize()?;
    info!(
        segment = %config.default_segment,
        startup_mode = ?config.startup_mode,
        "starting market dashboard"
    );

    let client: Arc<dyn QuoteSource> = Arc::new(QuoteClient::new(&config)?);
    let fetcher = BatchFetcher::new(client, config.batch_size, config.batch_delay);
    let controller = MarketController::new(
        fetcher,
        Arc::new(BaselineStore::seeded()),
        MarketSegment::defaults(),
        ControllerSettings::from(&config),
    );

    let mut updates = controller.subscribe();
    controller.select_segment(config.default_segment).await?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                info!("shutdown requested");
                break;
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let update = *updates.borrow_and_update();
                let Some(segment_id) = update.segment else {
                    continue;
                };
                if let Some(segment) = controller.segment(segment_id) {
                    let quotes = controller.get_quotes(segment_id);
                    let board = render_board(
                        segment,
                        &quotes,
                        controller.mode(segment_id),
                        controller.last_updated(),
                    );
                    println!("{board}\n");
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(())
}
