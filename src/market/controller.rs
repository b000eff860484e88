use crate::config::AppConfig;
use crate::error::AppError;
use crate::market::baseline::BaselineStore;
use crate::market::batch::BatchFetcher;
use crate::market::finnhub::QuoteSource;
use crate::market::simulator::FluctuationSimulator;
use crate::market::types::{
    Candle, CandleResolution, MarketMode, MarketSegment, QuoteMap, SegmentId, StartupMode,
};
use crate::market::{now_unix_ms, now_unix_secs};
use crate::state::{QuoteUpdate, SegmentPhase, SessionState, TickLoopHandle};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Live { symbols: usize },
    Simulated,
    FellBack,
    Skipped,
    Discarded,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub tick_interval: Duration,
    pub startup_mode: StartupMode,
}

impl From<&AppConfig> for ControllerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            startup_mode: config.startup_mode,
        }
    }
}

struct Shared {
    segments: Vec<MarketSegment>,
    baselines: Arc<BaselineStore>,
    simulator: FluctuationSimulator,
    session: RwLock<SessionState>,
    fallen_back: Mutex<HashSet<SegmentId>>,
    updates: watch::Sender<QuoteUpdate>,
}

impl Shared {
    fn segment(&self, id: SegmentId) -> Option<&MarketSegment> {
        self.segments.iter().find(|segment| segment.id == id)
    }

    fn publish(&self, session: &SessionState) {
        self.updates.send_modify(|update| {
            update.segment = session.active_segment;
            update.revision = update.revision.wrapping_add(1);
            update.phase = session.phase;
        });
    }

    /// Installs a live fetch result, or falls back to simulation when the
    /// fetch produced nothing. `None` means the session moved on meanwhile.
    fn apply_fetch(
        &self,
        segment: SegmentId,
        epoch: u64,
        quotes: QuoteMap,
    ) -> Option<RefreshOutcome> {
        let mut session = self.session.write();
        if !session.is_current(segment, epoch) {
            debug!(segment = %segment, epoch, "discarding stale live quotes");
            return None;
        }

        session.refreshing = false;
        session.last_updated = Some(now_unix_ms());

        if quotes.is_empty() {
            warn!(segment = %segment, "no live quotes available, switching to simulated mode");
            self.fallen_back.lock().insert(segment);
            session.quotes = Arc::new(self.baselines.get(segment));
            session.phase = SegmentPhase::Simulated;
            self.publish(&session);
            return Some(RefreshOutcome::FellBack);
        }

        for (symbol, quote) in &quotes {
            self.baselines.upgrade(segment, symbol, quote);
        }
        let symbols = quotes.len();
        if session.phase.mode() != Some(MarketMode::Live) {
            info!(segment = %segment, symbols, "market segment is live");
        }
        session.quotes = Arc::new(quotes);
        session.phase = SegmentPhase::Live;
        self.publish(&session);
        Some(RefreshOutcome::Live { symbols })
    }

    fn end_refresh(&self, segment: SegmentId, epoch: u64) {
        let mut session = self.session.write();
        if !session.is_current(segment, epoch) || !session.refreshing {
            return;
        }
        session.refreshing = false;
        if let SegmentPhase::Refreshing(mode) = session.phase {
            session.phase = match mode {
                MarketMode::Live => SegmentPhase::Live,
                MarketMode::Simulated => SegmentPhase::Simulated,
            };
        }
        debug!(segment = %segment, epoch, "refresh ended without new quotes");
        self.publish(&session);
    }

    fn apply_tick(&self, segment: SegmentId, epoch: u64, rng: &mut StdRng) -> bool {
        let mut session = self.session.write();
        if !session.is_current(segment, epoch)
            || session.phase != SegmentPhase::Simulated
            || session.refreshing
        {
            return false;
        }

        let baselines = self.baselines.get(segment);
        let next = self
            .simulator
            .tick(&session.quotes, &baselines, rng, now_unix_secs());
        session.quotes = Arc::new(next);
        self.publish(&session);
        true
    }
}

// Runs on every exit from a live refresh, including a dropped future.
struct RefreshGuard<'a> {
    shared: &'a Shared,
    segment: SegmentId,
    epoch: u64,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.shared.end_refresh(self.segment, self.epoch);
    }
}

struct SegmentTask {
    shared: Arc<Shared>,
    fetcher: BatchFetcher,
    segment: SegmentId,
    epoch: u64,
    symbols: Vec<String>,
    needs_load: bool,
    tick_interval: Duration,
    cancel_token: CancellationToken,
}

impl SegmentTask {
    async fn run(self) {
        let Self {
            shared,
            fetcher,
            segment,
            epoch,
            symbols,
            needs_load,
            tick_interval,
            cancel_token,
        } = self;

        if needs_load {
            let quotes = tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!(segment = %segment, "initial load cancelled");
                    return;
                }
                quotes = fetcher.fetch_many(&symbols) => quotes,
            };
            if shared.apply_fetch(segment, epoch, quotes).is_none() {
                return;
            }
        }

        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + tick_interval, tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    shared.apply_tick(segment, epoch, &mut rng);
                }
            }
        }
        debug!(segment = %segment, epoch, "tick loop stopped");
    }
}

pub struct MarketController {
    shared: Arc<Shared>,
    fetcher: BatchFetcher,
    settings: ControllerSettings,
    tick_loop: tokio::sync::Mutex<Option<TickLoopHandle>>,
}

impl MarketController {
    pub fn new(
        fetcher: BatchFetcher,
        baselines: Arc<BaselineStore>,
        segments: Vec<MarketSegment>,
        settings: ControllerSettings,
    ) -> Self {
        let (updates, _) = watch::channel(QuoteUpdate::initial());
        Self {
            shared: Arc::new(Shared {
                segments,
                baselines,
                simulator: FluctuationSimulator::default(),
                session: RwLock::new(SessionState::idle()),
                fallen_back: Mutex::new(HashSet::new()),
                updates,
            }),
            fetcher,
            settings,
            tick_loop: tokio::sync::Mutex::new(None),
        }
    }

    pub fn segments(&self) -> &[MarketSegment] {
        &self.shared.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&MarketSegment> {
        self.shared.segment(id)
    }

    pub fn subscribe(&self) -> watch::Receiver<QuoteUpdate> {
        self.shared.updates.subscribe()
    }

    pub async fn select_segment(&self, segment: SegmentId) -> Result<(), AppError> {
        let symbols = self
            .shared
            .segment(segment)
            .map(|definition| definition.symbols.clone())
            .ok_or_else(|| {
                AppError::InvalidArgument(format!("segment '{segment}' is not configured"))
            })?;

        let mut slot = self.tick_loop.lock().await;
        if let Some(handle) = slot.take() {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
            debug!(segment = %handle.segment, "previous tick loop joined");
        }

        let fallen_back = self.shared.fallen_back.lock().contains(&segment);
        let needs_load = self.settings.startup_mode == StartupMode::LiveFirst && !fallen_back;
        let phase = if needs_load {
            SegmentPhase::Loading
        } else {
            SegmentPhase::Simulated
        };

        let cancellation_token = CancellationToken::new();
        let epoch = {
            let mut session = self.shared.session.write();
            session.cancellation_token.cancel();
            let epoch = session.epoch.wrapping_add(1);
            *session = SessionState::for_segment(
                segment,
                epoch,
                phase,
                self.shared.baselines.get(segment),
                now_unix_ms(),
                cancellation_token.clone(),
            );
            self.shared.publish(&session);
            epoch
        };
        info!(segment = %segment, epoch, phase = ?phase, "market segment selected");

        let task = SegmentTask {
            shared: Arc::clone(&self.shared),
            fetcher: self.fetcher.clone(),
            segment,
            epoch,
            symbols,
            needs_load,
            tick_interval: self.settings.tick_interval,
            cancel_token: cancellation_token.clone(),
        };
        let join_handle = tokio::spawn(task.run());
        *slot = Some(TickLoopHandle {
            segment,
            cancellation_token,
            join_handle,
        });
        Ok(())
    }

    /// Live segments re-fetch; simulated segments snap back to baselines.
    pub async fn refresh(&self, segment: SegmentId) -> Result<RefreshOutcome, AppError> {
        let started = {
            let mut session = self.shared.session.write();
            if session.active_segment != Some(segment) {
                return Err(AppError::InvalidArgument(format!(
                    "segment '{segment}' is not active"
                )));
            }
            match session.phase.mode() {
                Some(mode) if !session.refreshing => {
                    session.refreshing = true;
                    session.phase = SegmentPhase::Refreshing(mode);
                    self.shared.publish(&session);
                    Some((session.epoch, session.cancellation_token.clone(), mode))
                }
                _ => None,
            }
        };
        let Some((epoch, cancel_token, mode)) = started else {
            return Ok(RefreshOutcome::Skipped);
        };

        match mode {
            MarketMode::Simulated => {
                let mut session = self.shared.session.write();
                if !session.is_current(segment, epoch) {
                    return Ok(RefreshOutcome::Discarded);
                }
                session.quotes = Arc::new(self.shared.baselines.get(segment));
                session.phase = SegmentPhase::Simulated;
                session.refreshing = false;
                session.last_updated = Some(now_unix_ms());
                self.shared.publish(&session);
                info!(segment = %segment, "simulated quotes reset to baselines");
                Ok(RefreshOutcome::Simulated)
            }
            MarketMode::Live => {
                let _guard = RefreshGuard {
                    shared: &self.shared,
                    segment,
                    epoch,
                };
                let symbols = self
                    .shared
                    .segment(segment)
                    .map(|definition| definition.symbols.clone())
                    .unwrap_or_default();
                let quotes = tokio::select! {
                    _ = cancel_token.cancelled() => return Ok(RefreshOutcome::Discarded),
                    quotes = self.fetcher.fetch_many(&symbols) => quotes,
                };
                Ok(self
                    .shared
                    .apply_fetch(segment, epoch, quotes)
                    .unwrap_or(RefreshOutcome::Discarded))
            }
        }
    }

    pub fn get_quotes(&self, segment: SegmentId) -> Arc<QuoteMap> {
        {
            let session = self.shared.session.read();
            if session.active_segment == Some(segment) {
                return Arc::clone(&session.quotes);
            }
        }
        Arc::new(self.shared.baselines.get(segment))
    }

    pub fn mode(&self, segment: SegmentId) -> Option<MarketMode> {
        {
            let session = self.shared.session.read();
            if session.active_segment == Some(segment) {
                return session.phase.mode();
            }
        }
        if self.shared.fallen_back.lock().contains(&segment) {
            Some(MarketMode::Simulated)
        } else {
            None
        }
    }

    /// Unix milliseconds of the last load, refresh or reset.
    pub fn last_updated(&self) -> Option<i64> {
        self.shared.session.read().last_updated
    }

    pub fn active_segment(&self) -> Option<SegmentId> {
        self.shared.session.read().active_segment
    }

    pub fn phase(&self) -> SegmentPhase {
        self.shared.session.read().phase
    }

    pub fn is_refreshing(&self) -> bool {
        self.shared.session.read().refreshing
    }

    pub async fn fetch_candles(
        &self,
        symbol: &str,
        resolution: CandleResolution,
        from: i64,
        to: i64,
    ) -> Result<Candle, AppError> {
        let source: &Arc<dyn QuoteSource> = self.fetcher.source();
        source.fetch_candles(symbol, resolution, from, to).await
    }

    pub async fn shutdown(&self) {
        let mut slot = self.tick_loop.lock().await;
        if let Some(handle) = slot.take() {
            handle.cancellation_token.cancel();
            let _ = handle.join_handle.await;
        }

        let mut session = self.shared.session.write();
        session.cancellation_token.cancel();
        let epoch = session.epoch.wrapping_add(1);
        *session = SessionState::idle();
        session.epoch = epoch;
        self.shared.publish(&session);
        info!("market controller stopped");
    }
}

impl Drop for MarketController {
    fn drop(&mut self) {
        if let Some(handle) = self.tick_loop.get_mut().take() {
            handle.cancellation_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::market::batch::tests::ScriptedSource;
    use crate::market::types::{DOMESTIC_SYMBOLS, FOREIGN_SYMBOLS};
    use std::sync::atomic::Ordering;
    use tokio::time::{sleep, timeout, timeout_at, Instant};

    const TICK: Duration = Duration::from_secs(5);

    struct Harness {
        controller: Arc<MarketController>,
        source: Arc<ScriptedSource>,
        baselines: Arc<BaselineStore>,
    }

    impl Harness {
        fn subscribe_revision(&self) -> u64 {
            self.controller.subscribe().borrow().revision
        }
    }

    fn harness(source: ScriptedSource, startup_mode: StartupMode) -> Harness {
        let source = Arc::new(source);
        let baselines = Arc::new(BaselineStore::seeded());
        let fetcher = BatchFetcher::new(
            Arc::clone(&source) as Arc<dyn QuoteSource>,
            5,
            Duration::from_millis(500),
        );
        let controller = MarketController::new(
            fetcher,
            Arc::clone(&baselines),
            MarketSegment::defaults(),
            ControllerSettings {
                tick_interval: TICK,
                startup_mode,
            },
        );
        Harness {
            controller: Arc::new(controller),
            source,
            baselines,
        }
    }

    fn all_valid(symbols: &[&'static str], price: f64) -> Vec<(&'static str, Option<f64>)> {
        symbols.iter().map(|symbol| (*symbol, Some(price))).collect()
    }

    async fn wait_for_phase(controller: &MarketController, phase: SegmentPhase) {
        let mut updates = controller.subscribe();
        let reached = timeout(Duration::from_secs(120), async {
            loop {
                if updates.borrow_and_update().phase == phase {
                    return;
                }
                if updates.changed().await.is_err() {
                    return;
                }
            }
        })
        .await;
        assert!(reached.is_ok(), "phase {phase:?} never reached");
        assert_eq!(controller.phase(), phase);
    }

    #[tokio::test(start_paused = true)]
    async fn live_first_installs_live_quotes_and_upgrades_baselines() {
        let h = harness(
            ScriptedSource::with(&all_valid(&FOREIGN_SYMBOLS, 200.0)),
            StartupMode::LiveFirst,
        );
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        assert_eq!(h.controller.mode(SegmentId::Foreign), None);

        wait_for_phase(&h.controller, SegmentPhase::Live).await;

        let quotes = h.controller.get_quotes(SegmentId::Foreign);
        assert_eq!(quotes.len(), FOREIGN_SYMBOLS.len());
        assert_eq!(quotes["AAPL"].current_price, 200.0);
        assert_eq!(h.controller.mode(SegmentId::Foreign), Some(MarketMode::Live));
        assert!(h.controller.last_updated().is_some());
        let upgraded = h
            .baselines
            .get_quote(SegmentId::Foreign, "AAPL")
            .expect("baseline exists");
        assert_eq!(upgraded.current_price, 200.0);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_live_fetch_keeps_sparse_quotes() {
        let h = harness(
            ScriptedSource::with(&[
                ("AAPL", Some(188.42)),
                ("TSLA", None),
                ("MSFT", Some(432.63)),
                ("AMZN", None),
                ("NVDA", Some(924.78)),
            ]),
            StartupMode::LiveFirst,
        );
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        wait_for_phase(&h.controller, SegmentPhase::Live).await;

        let quotes = h.controller.get_quotes(SegmentId::Foreign);
        assert_eq!(quotes.len(), 3);
        assert!(!quotes.contains_key("TSLA"));
        assert!(!quotes.contains_key("AMZN"));
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_falls_back_to_baselines() {
        let h = harness(ScriptedSource::default(), StartupMode::LiveFirst);
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        wait_for_phase(&h.controller, SegmentPhase::Simulated).await;

        assert_eq!(
            h.controller.mode(SegmentId::Foreign),
            Some(MarketMode::Simulated)
        );
        let quotes = h.controller.get_quotes(SegmentId::Foreign);
        let baselines = h.baselines.get(SegmentId::Foreign);
        assert_eq!(
            quotes.keys().collect::<Vec<_>>(),
            baselines.keys().collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_ticks_move_prices_but_pin_change_badges() {
        let h = harness(ScriptedSource::default(), StartupMode::SimulatedOnly);
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        let initial = h.controller.get_quotes(SegmentId::Foreign);
        let baselines = h.baselines.get(SegmentId::Foreign);
        assert_eq!(*initial, baselines);

        sleep(TICK * 3 + Duration::from_secs(1)).await;

        let ticked = h.controller.get_quotes(SegmentId::Foreign);
        assert_ne!(*ticked, *initial);
        for (symbol, quote) in ticked.iter() {
            assert_eq!(quote.change, baselines[symbol].change);
            assert_eq!(quote.change_percent, baselines[symbol].change_percent);
            assert!(quote.high >= baselines[symbol].high);
            assert!(quote.low <= baselines[symbol].low);
        }
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
        assert!(h.subscribe_revision() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_segments_stops_previous_tick_loop() {
        let h = harness(ScriptedSource::default(), StartupMode::SimulatedOnly);
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        sleep(TICK * 2 + Duration::from_secs(1)).await;

        h.controller
            .select_segment(SegmentId::Domestic)
            .await
            .expect("domestic is configured");
        assert_eq!(h.controller.active_segment(), Some(SegmentId::Domestic));
        let domestic_start = h.controller.get_quotes(SegmentId::Domestic);
        assert_eq!(*domestic_start, h.baselines.get(SegmentId::Domestic));

        let mut updates = h.controller.subscribe();
        let _ = updates.borrow_and_update();
        let deadline = Instant::now() + TICK * 4;
        let mut seen = 0;
        while let Ok(Ok(())) = timeout_at(deadline, updates.changed()).await {
            assert_eq!(updates.borrow_and_update().segment, Some(SegmentId::Domestic));
            seen += 1;
        }

        assert!(seen >= 3);
        assert_eq!(
            *h.controller.get_quotes(SegmentId::Foreign),
            h.baselines.get(SegmentId::Foreign)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_refresh_snaps_back_to_baselines() {
        let h = harness(ScriptedSource::default(), StartupMode::SimulatedOnly);
        h.controller
            .select_segment(SegmentId::Domestic)
            .await
            .expect("domestic is configured");
        sleep(TICK * 4 + Duration::from_secs(1)).await;
        assert_ne!(
            *h.controller.get_quotes(SegmentId::Domestic),
            h.baselines.get(SegmentId::Domestic)
        );

        let outcome = h
            .controller
            .refresh(SegmentId::Domestic)
            .await
            .expect("domestic is active");

        assert_eq!(outcome, RefreshOutcome::Simulated);
        assert_eq!(
            *h.controller.get_quotes(SegmentId::Domestic),
            h.baselines.get(SegmentId::Domestic)
        );
        assert!(!h.controller.is_refreshing());
        assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn live_refresh_replaces_quotes() {
        let h = harness(
            ScriptedSource::with(&all_valid(&DOMESTIC_SYMBOLS, 1_000.0)),
            StartupMode::LiveFirst,
        );
        h.controller
            .select_segment(SegmentId::Domestic)
            .await
            .expect("domestic is configured");
        wait_for_phase(&h.controller, SegmentPhase::Live).await;
        let first = h.controller.get_quotes(SegmentId::Domestic);

        sleep(TICK * 3).await;
        assert!(Arc::ptr_eq(&first, &h.controller.get_quotes(SegmentId::Domestic)));

        h.source.script(&all_valid(&DOMESTIC_SYMBOLS, 1_100.0));
        let outcome = h
            .controller
            .refresh(SegmentId::Domestic)
            .await
            .expect("domestic is active");

        assert_eq!(outcome, RefreshOutcome::Live { symbols: 5 });
        assert_eq!(
            h.controller.get_quotes(SegmentId::Domestic)["TCS.NS"].current_price,
            1_100.0
        );
        assert_eq!(h.controller.phase(), SegmentPhase::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_is_one_directional() {
        let h = harness(
            ScriptedSource::with(&all_valid(&FOREIGN_SYMBOLS, 150.0)),
            StartupMode::LiveFirst,
        );
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        wait_for_phase(&h.controller, SegmentPhase::Live).await;

        h.source.script(&[]);
        let outcome = h
            .controller
            .refresh(SegmentId::Foreign)
            .await
            .expect("foreign is active");
        assert_eq!(outcome, RefreshOutcome::FellBack);
        assert_eq!(
            h.controller.mode(SegmentId::Foreign),
            Some(MarketMode::Simulated)
        );

        h.source.script(&all_valid(&FOREIGN_SYMBOLS, 150.0));
        let calls_before = h.source.calls.load(Ordering::SeqCst);
        let outcome = h
            .controller
            .refresh(SegmentId::Foreign)
            .await
            .expect("foreign is active");
        assert_eq!(outcome, RefreshOutcome::Simulated);
        assert_eq!(h.source.calls.load(Ordering::SeqCst), calls_before);

        h.controller
            .select_segment(SegmentId::Domestic)
            .await
            .expect("domestic is configured");
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        assert_eq!(h.controller.phase(), SegmentPhase::Simulated);
        assert_eq!(
            h.controller.mode(SegmentId::Foreign),
            Some(MarketMode::Simulated)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn late_load_for_previous_segment_is_discarded() {
        let mut entries = all_valid(&FOREIGN_SYMBOLS, 500.0);
        entries.extend(all_valid(&DOMESTIC_SYMBOLS, 2_000.0));
        let source = ScriptedSource::with(&entries);
        for symbol in FOREIGN_SYMBOLS {
            source.delay(symbol, Duration::from_secs(10));
        }
        let h = harness(source, StartupMode::LiveFirst);

        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        sleep(Duration::from_secs(1)).await;
        h.controller
            .select_segment(SegmentId::Domestic)
            .await
            .expect("domestic is configured");
        wait_for_phase(&h.controller, SegmentPhase::Live).await;

        sleep(Duration::from_secs(30)).await;

        assert_eq!(h.controller.active_segment(), Some(SegmentId::Domestic));
        let quotes = h.controller.get_quotes(SegmentId::Domestic);
        assert!(quotes.keys().all(|symbol| symbol.ends_with(".NS")));
        let aapl = h
            .baselines
            .get_quote(SegmentId::Foreign, "AAPL")
            .expect("baseline exists");
        assert_eq!(aapl.current_price, 188.42);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_in_flight_is_discarded_on_switch() {
        let h = harness(
            ScriptedSource::with(&all_valid(&DOMESTIC_SYMBOLS, 1_000.0)),
            StartupMode::LiveFirst,
        );
        h.controller
            .select_segment(SegmentId::Domestic)
            .await
            .expect("domestic is configured");
        wait_for_phase(&h.controller, SegmentPhase::Live).await;

        for symbol in DOMESTIC_SYMBOLS {
            h.source.delay(symbol, Duration::from_secs(10));
        }
        let controller = Arc::clone(&h.controller);
        let refresh =
            tokio::spawn(async move { controller.refresh(SegmentId::Domestic).await });
        sleep(Duration::from_secs(1)).await;
        assert!(h.controller.is_refreshing());

        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");

        let outcome = refresh
            .await
            .expect("refresh task completes")
            .expect("segment was active when refresh started");
        assert_eq!(outcome, RefreshOutcome::Discarded);
        assert_eq!(h.controller.active_segment(), Some(SegmentId::Foreign));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_refresh_leaves_segment_refreshable() {
        let h = harness(
            ScriptedSource::with(&all_valid(&DOMESTIC_SYMBOLS, 1_000.0)),
            StartupMode::LiveFirst,
        );
        h.controller
            .select_segment(SegmentId::Domestic)
            .await
            .expect("domestic is configured");
        wait_for_phase(&h.controller, SegmentPhase::Live).await;

        for symbol in DOMESTIC_SYMBOLS {
            h.source.delay(symbol, Duration::from_secs(10));
        }
        let attempt = timeout(
            Duration::from_secs(1),
            h.controller.refresh(SegmentId::Domestic),
        )
        .await;
        assert!(attempt.is_err(), "refresh should outlive the outer timeout");
        assert!(!h.controller.is_refreshing());
        assert_eq!(h.controller.phase(), SegmentPhase::Live);

        h.source.delays.lock().clear();
        let outcome = h
            .controller
            .refresh(SegmentId::Domestic)
            .await
            .expect("domestic is active");
        assert_eq!(outcome, RefreshOutcome::Live { symbols: 5 });
        assert_eq!(h.controller.phase(), SegmentPhase::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_refresh_restores_current_session() {
        let h = harness(
            ScriptedSource::with(&all_valid(&DOMESTIC_SYMBOLS, 1_000.0)),
            StartupMode::LiveFirst,
        );
        h.controller
            .select_segment(SegmentId::Domestic)
            .await
            .expect("domestic is configured");
        wait_for_phase(&h.controller, SegmentPhase::Live).await;

        for symbol in DOMESTIC_SYMBOLS {
            h.source.delay(symbol, Duration::from_secs(10));
        }
        let controller = Arc::clone(&h.controller);
        let refresh =
            tokio::spawn(async move { controller.refresh(SegmentId::Domestic).await });
        sleep(Duration::from_secs(1)).await;
        assert!(h.controller.is_refreshing());

        h.controller
            .shared
            .session
            .read()
            .cancellation_token
            .cancel();

        let outcome = refresh
            .await
            .expect("refresh task completes")
            .expect("domestic is active");
        assert_eq!(outcome, RefreshOutcome::Discarded);
        assert_eq!(h.controller.active_segment(), Some(SegmentId::Domestic));
        assert!(!h.controller.is_refreshing());
        assert_eq!(h.controller.phase(), SegmentPhase::Live);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_while_loading_is_skipped() {
        let source = ScriptedSource::with(&all_valid(&FOREIGN_SYMBOLS, 300.0));
        source.delay("AAPL", Duration::from_secs(10));
        let h = harness(source, StartupMode::LiveFirst);
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");

        let outcome = h
            .controller
            .refresh(SegmentId::Foreign)
            .await
            .expect("foreign is active");
        assert_eq!(outcome, RefreshOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_of_inactive_segment_is_rejected() {
        let h = harness(ScriptedSource::default(), StartupMode::SimulatedOnly);
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");

        let error = h
            .controller
            .refresh(SegmentId::Domestic)
            .await
            .expect_err("domestic is not active");
        assert_eq!(error.kind(), ErrorKind::Usage);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_segment_cannot_be_selected() {
        let source: Arc<dyn QuoteSource> = Arc::new(ScriptedSource::default());
        let controller = MarketController::new(
            BatchFetcher::new(source, 5, Duration::ZERO),
            Arc::new(BaselineStore::seeded()),
            vec![MarketSegment::new(SegmentId::Foreign, "NASDAQ", &FOREIGN_SYMBOLS, "$")],
            ControllerSettings {
                tick_interval: TICK,
                startup_mode: StartupMode::SimulatedOnly,
            },
        );

        assert!(controller.select_segment(SegmentId::Domestic).await.is_err());
        assert_eq!(controller.active_segment(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_ticking() {
        let h = harness(ScriptedSource::default(), StartupMode::SimulatedOnly);
        h.controller
            .select_segment(SegmentId::Foreign)
            .await
            .expect("foreign is configured");
        sleep(TICK + Duration::from_secs(1)).await;

        h.controller.shutdown().await;
        let revision = h.subscribe_revision();
        sleep(TICK * 4).await;

        assert_eq!(h.subscribe_revision(), revision);
        assert_eq!(h.controller.active_segment(), None);
        assert_eq!(h.controller.phase(), SegmentPhase::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn candles_pass_through_to_source() {
        let h = harness(ScriptedSource::default(), StartupMode::SimulatedOnly);
        let error = h
            .controller
            .fetch_candles("AAPL", CandleResolution::Day, 1, 2)
            .await
            .expect_err("scripted source has no candles");
        assert_eq!(error.kind(), ErrorKind::DataInvalid);
    }
}
