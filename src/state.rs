use crate::market::types::{MarketMode, QuoteMap, SegmentId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Running tick loop for the active segment.
pub struct TickLoopHandle {
    pub segment: SegmentId,
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentPhase {
    Uninitialized,
    Loading,
    Live,
    Simulated,
    Refreshing(MarketMode),
}

impl SegmentPhase {
    pub fn mode(self) -> Option<MarketMode> {
        match self {
            Self::Live => Some(MarketMode::Live),
            Self::Simulated => Some(MarketMode::Simulated),
            Self::Refreshing(mode) => Some(mode),
            Self::Uninitialized | Self::Loading => None,
        }
    }
}

/// Session owned by the market controller. Rebuilt from scratch whenever the
/// active segment changes; `epoch` identifies the build so late writers can
/// tell they are stale.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub active_segment: Option<SegmentId>,
    pub epoch: u64,
    pub phase: SegmentPhase,
    pub quotes: Arc<QuoteMap>,
    pub last_updated: Option<i64>,
    pub refreshing: bool,
    pub cancellation_token: CancellationToken,
}

impl SessionState {
    pub fn idle() -> Self {
        Self {
            active_segment: None,
            epoch: 0,
            phase: SegmentPhase::Uninitialized,
            quotes: Arc::new(QuoteMap::new()),
            last_updated: None,
            refreshing: false,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn for_segment(
        segment: SegmentId,
        epoch: u64,
        phase: SegmentPhase,
        quotes: QuoteMap,
        now_ms: i64,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            active_segment: Some(segment),
            epoch,
            phase,
            quotes: Arc::new(quotes),
            last_updated: Some(now_ms),
            refreshing: false,
            cancellation_token,
        }
    }

    pub fn is_current(&self, segment: SegmentId, epoch: u64) -> bool {
        self.active_segment == Some(segment) && self.epoch == epoch
    }
}

/// Change notification published after every replacement of the active quotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteUpdate {
    pub segment: Option<SegmentId>,
    pub revision: u64,
    pub phase: SegmentPhase,
}

impl QuoteUpdate {
    pub fn initial() -> Self {
        Self {
            segment: None,
            revision: 0,
            phase: SegmentPhase::Uninitialized,
        }
    }
}
