/// Crossover alerting
///
/// - [`AlertDeduper`]: decides whether an accepted state transition is a new crossover
/// - [`AlertFeed`]: time-limited list of alerts shown to the user

use crate::shared::types::{AlertEvent, SignalState, Symbol, Timeframe, TrendStatus};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};

/// How long an alert stays on screen
pub const ALERT_DISPLAY_SECS: i64 = 30;

/// Alerts are drawn as fading during this final slice of their lifetime
pub const ALERT_FADE_MILLIS: i64 = 500;

/// Maximum alerts kept in the feed
pub const ALERT_FEED_CAPACITY: usize = 50;

/// Last-seen status per (symbol, timeframe)
#[derive(Debug, Clone, Default)]
pub struct AlertDeduper {
    last_seen: HashMap<(Symbol, Timeframe), TrendStatus>,
}

impl AlertDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff `state` is a freshly confirmed directional crossover whose
    /// status differs from the last one recorded for this cell.
    ///
    /// Always records `state.status` as the new last-seen status.
    pub fn should_alert(&mut self, symbol: &Symbol, timeframe: Timeframe, state: &SignalState) -> bool {
        let previous = self
            .last_seen
            .insert((symbol.clone(), timeframe), state.status);
        state.is_fresh_crossover() && previous != Some(state.status)
    }

    pub fn last_seen(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<TrendStatus> {
        self.last_seen.get(&(symbol.clone(), timeframe)).copied()
    }

    /// Forget every timeframe of `symbol`
    pub fn forget(&mut self, symbol: &Symbol) {
        self.last_seen.retain(|(s, _), _| s != symbol);
    }

    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}

#[derive(Debug, Clone)]
struct FeedEntry {
    alert: AlertEvent,
    expires_at: DateTime<Utc>,
}

/// Alert shown to the user, with its fade state
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedAlert {
    pub alert: AlertEvent,
    pub fading: bool,
}

/// Newest-first list of alerts with a fixed display lifetime
#[derive(Debug, Clone)]
pub struct AlertFeed {
    entries: VecDeque<FeedEntry>,
    lifetime: ChronoDuration,
}

impl Default for AlertFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertFeed {
    pub fn new() -> Self {
        Self::with_lifetime(ChronoDuration::seconds(ALERT_DISPLAY_SECS))
    }

    pub fn with_lifetime(lifetime: ChronoDuration) -> Self {
        Self {
            entries: VecDeque::with_capacity(ALERT_FEED_CAPACITY),
            lifetime,
        }
    }

    pub fn push(&mut self, alert: AlertEvent) {
        let expires_at = alert.fired_at + self.lifetime;
        self.entries.push_front(FeedEntry { alert, expires_at });
        self.entries.truncate(ALERT_FEED_CAPACITY);
    }

    /// Drop alerts whose lifetime has elapsed
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|entry| entry.expires_at > now);
    }

    /// Alerts still alive at `now`, newest first
    pub fn visible(&self, now: DateTime<Utc>) -> Vec<DisplayedAlert> {
        let fade = ChronoDuration::milliseconds(ALERT_FADE_MILLIS);
        self.entries
            .iter()
            .filter(|entry| entry.expires_at > now)
            .map(|entry| DisplayedAlert {
                alert: entry.alert.clone(),
                fading: entry.expires_at - now <= fade,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
