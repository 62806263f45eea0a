//! Dashboard state: wires the reconciler, watchlist, settings, alert feed and
//! encoder together behind the handlers the event loop calls.
//!
//! Every handler runs to completion without awaiting, so store writes and
//! deduper updates are never interleaved with another handler. Network calls
//! happen outside, between [`Dashboard::begin_snapshot`] and
//! [`Dashboard::finish_snapshot`].

use crate::shared::{
    alerts::{AlertFeed, DisplayedAlert},
    api::ScreenerApi,
    encoding::{EncodingStrategy, TrendEncoder, VisualEncoding},
    error::ScreenerError,
    reconciler::{SnapshotOutcome, UpdateReconciler},
    settings::SettingsManager,
    store::SignalRow,
    types::{AlertEvent, ScreenerSnapshot, Sequence, Settings, SignalState, Symbol},
    watchlist::{WatchlistController, WatchlistReply},
    websocket::{ConnectionState, PushMessage},
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Snapshot fetch to run off the event loop
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRequest {
    pub symbols: Vec<Symbol>,
    pub settings: Settings,
    /// Issued when the request is built, not when the response lands
    pub sequence: Sequence,
}

impl SnapshotRequest {
    pub async fn fetch(&self, api: &dyn ScreenerApi) -> Result<ScreenerSnapshot, ScreenerError> {
        api.screener_data(&self.symbols, &self.settings).await
    }
}

#[derive(Debug)]
pub struct Dashboard {
    reconciler: UpdateReconciler,
    watchlist: WatchlistController,
    settings: SettingsManager,
    alerts: AlertFeed,
    encoder: TrendEncoder,
    connection: ConnectionState,
    banner: Option<String>,
}

impl Dashboard {
    pub fn new(settings: SettingsManager) -> Self {
        Self {
            reconciler: UpdateReconciler::new(settings.settings().visible()),
            watchlist: WatchlistController::new(),
            settings,
            alerts: AlertFeed::new(),
            encoder: TrendEncoder::new(EncodingStrategy::default()),
            connection: ConnectionState::Disconnected,
            banner: None,
        }
    }

    pub fn reconciler(&self) -> &UpdateReconciler {
        &self.reconciler
    }

    pub fn watchlist(&self) -> &[Symbol] {
        self.watchlist.list(&self.reconciler)
    }

    pub fn watchlist_controller(&self) -> &WatchlistController {
        &self.watchlist
    }

    pub fn watchlist_controller_mut(&mut self) -> &mut WatchlistController {
        &mut self.watchlist
    }

    pub fn settings(&self) -> &Settings {
        self.settings.settings()
    }

    pub fn settings_manager(&self) -> &SettingsManager {
        &self.settings
    }

    pub fn encoder(&self) -> &TrendEncoder {
        &self.encoder
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn rows(&self) -> Vec<SignalRow> {
        self.reconciler.rows()
    }

    pub fn encode(&self, state: &SignalState) -> VisualEncoding {
        self.encoder.encode(state.status, state.bars_since)
    }

    pub fn toggle_encoding(&mut self) -> EncodingStrategy {
        self.encoder.toggle();
        self.encoder.strategy()
    }

    /// Drop expired alerts and return the rest, newest first
    pub fn alerts(&mut self, now: DateTime<Utc>) -> Vec<DisplayedAlert> {
        self.alerts.expire(now);
        self.alerts.visible(now)
    }

    /// Build the next snapshot request, stamped now
    ///
    /// None when the watchlist is empty.
    pub fn begin_snapshot(&mut self) -> Option<SnapshotRequest> {
        let symbols = self.watchlist().to_vec();
        if symbols.is_empty() {
            return None;
        }
        Some(SnapshotRequest {
            symbols,
            settings: self.settings().clone(),
            sequence: self.reconciler.issue_sequence(),
        })
    }

    /// Apply a completed snapshot fetch
    pub fn finish_snapshot(
        &mut self,
        sequence: Sequence,
        result: Result<ScreenerSnapshot, ScreenerError>,
    ) -> Option<SnapshotOutcome> {
        match result {
            Ok(snapshot) => {
                let outcome = self.reconciler.apply_snapshot(&snapshot, sequence);
                self.raise(outcome.alerts.iter().cloned());
                self.banner = None;
                Some(outcome)
            }
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    /// Route one push message; unrecognised messages are ignored
    pub fn handle_push(&mut self, message: PushMessage, now: DateTime<Utc>) {
        let confirmed_at = message.confirmed_at();
        match message {
            PushMessage::LiveUpdate {
                symbol,
                timeframe,
                signal,
            } => {
                let sequence = self.reconciler.issue_sequence();
                match self
                    .reconciler
                    .apply_incremental(&symbol, timeframe, signal, sequence)
                {
                    Ok(alert) => self.raise(alert),
                    Err(rejection) => {
                        debug!(%symbol, %timeframe, ?rejection, "live update rejected")
                    }
                }
            }
            PushMessage::CrossoverAlert {
                symbol,
                timeframe,
                status,
                ..
            } => {
                let alert = AlertEvent {
                    symbol,
                    timeframe,
                    status,
                    fired_at: now,
                    confirmed_at,
                };
                self.alerts.push(alert);
            }
            PushMessage::Unknown => {}
        }
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        let dropped = matches!(
            (self.connection, state),
            (ConnectionState::Connected | ConnectionState::Closing, ConnectionState::Disconnected)
        );
        if state == ConnectionState::Failed || dropped {
            self.banner = Some("Live updates disconnected, reconnecting...".to_string());
        } else if state == ConnectionState::Connected && self.connection != state {
            self.banner = None;
        }
        self.connection = state;
    }

    /// Validate and apply new settings
    ///
    /// On success all signal state is discarded and the returned request is
    /// the new baseline snapshot.
    pub fn update_settings(&mut self, settings: Settings) -> Option<SnapshotRequest> {
        match self.settings.update(settings, &mut self.reconciler) {
            Ok(_) => {
                self.banner = None;
                self.begin_snapshot()
            }
            Err(error) => {
                self.report(error);
                None
            }
        }
    }

    /// Apply the reply to a watchlist refresh or mutation
    ///
    /// Returns true when a server list was adopted, in which case the caller
    /// should request a snapshot for it.
    pub fn finish_watchlist(&mut self, reply: WatchlistReply) -> bool {
        let adopted = reply.symbols.is_some();
        if let Err(error) = self.watchlist.apply_reply(reply, &mut self.reconciler) {
            self.report(error);
        }
        adopted
    }

    /// Optimistically drop `symbol` ahead of the server round-trip
    pub fn begin_remove(&mut self, symbol: &Symbol) {
        self.watchlist.begin_remove(symbol, &mut self.reconciler);
    }

    /// Surface an error on the banner; protocol errors are only logged
    pub fn report(&mut self, error: ScreenerError) {
        match error {
            ScreenerError::Protocol(reason) => debug!(%reason, "dropped malformed message"),
            error => {
                warn!(%error, transient = error.is_transient(), "screener error");
                self.banner = Some(error.to_string());
            }
        }
    }

    fn raise(&mut self, alerts: impl IntoIterator<Item = AlertEvent>) {
        for alert in alerts {
            self.alerts.push(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::{
        api::fake::FakeScreenerApi,
        types::{AssetSignals, Timeframe, TrendStatus},
        watchlist::{fetch_watchlist, request_remove},
    };
    use std::collections::BTreeMap;

    fn dashboard(name: &str) -> Dashboard {
        let dir = std::env::temp_dir().join(format!("signal-screener-dash-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        let _ = std::fs::remove_file(&path);
        Dashboard::new(SettingsManager::load(path))
    }

    fn live(symbol: &str, timeframe: Timeframe, status: TrendStatus, bars: u32) -> PushMessage {
        PushMessage::LiveUpdate {
            symbol: Symbol::new(symbol),
            timeframe,
            signal: SignalState::new(status, Some(bars)),
        }
    }

    fn snapshot(symbol: &str, timeframe: Timeframe, status: TrendStatus, bars: u32) -> ScreenerSnapshot {
        ScreenerSnapshot {
            assets: vec![AssetSignals {
                name: Symbol::new(symbol),
                timeframes: BTreeMap::from([(timeframe, SignalState::new(status, Some(bars)))]),
            }],
        }
    }

    fn adopt(dashboard: &mut Dashboard, symbols: Vec<Symbol>) {
        dashboard.finish_watchlist(WatchlistReply {
            symbols: Some(symbols),
            error: None,
        });
    }

    #[test]
    fn test_empty_watchlist_skips_snapshot() {
        let mut dashboard = dashboard("empty");
        assert_eq!(dashboard.begin_snapshot(), None);
    }

    #[test]
    fn test_push_newer_than_in_flight_snapshot_wins() {
        let mut dashboard = dashboard("inflight");
        adopt(&mut dashboard, vec![Symbol::new("BTCUSD")]);

        let request = dashboard.begin_snapshot().unwrap();
        dashboard.handle_push(live("BTCUSD", Timeframe::H1, TrendStatus::Bullish, 0), Utc::now());

        // snapshot response computed before the push lands afterwards
        let outcome = dashboard
            .finish_snapshot(
                request.sequence,
                Ok(snapshot("BTCUSD", Timeframe::H1, TrendStatus::Bearish, 12)),
            )
            .unwrap();

        assert_eq!(outcome.written, 0);
        let rows = dashboard.rows();
        assert_eq!(rows[0].cells[&Timeframe::H1].status, TrendStatus::Bullish);
        assert_eq!(dashboard.alerts(Utc::now()).len(), 1);
    }

    #[test]
    fn test_both_alert_paths_feed_the_alert_list() {
        let mut dashboard = dashboard("alerts");
        adopt(&mut dashboard, vec![Symbol::new("ETHUSD")]);
        let now = Utc::now();

        dashboard.handle_push(live("ETHUSD", Timeframe::H4, TrendStatus::Bearish, 0), now);
        dashboard.handle_push(
            PushMessage::CrossoverAlert {
                symbol: Symbol::new("ETHUSD"),
                timeframe: Timeframe::H4,
                status: TrendStatus::Bearish,
                crossover_timestamp: 1_700_000_000,
            },
            now,
        );
        // same state again: deduped, no third alert
        dashboard.handle_push(live("ETHUSD", Timeframe::H4, TrendStatus::Bearish, 0), now);

        let alerts = dashboard.alerts(now);
        assert_eq!(alerts.len(), 2);
        assert!(alerts[0].alert.confirmed_at.is_some());
        assert!(alerts[1].alert.confirmed_at.is_none());
    }

    #[test]
    fn test_unknown_push_is_noop() {
        let mut dashboard = dashboard("unknown");
        adopt(&mut dashboard, vec![Symbol::new("BTCUSD")]);
        dashboard.handle_push(PushMessage::Unknown, Utc::now());

        assert!(dashboard.reconciler().store().is_empty());
        assert!(dashboard.alerts(Utc::now()).is_empty());
        assert_eq!(dashboard.banner(), None);
    }

    #[test]
    fn test_network_error_sets_banner_until_next_success() {
        let mut dashboard = dashboard("banner");
        adopt(&mut dashboard, vec![Symbol::new("BTCUSD")]);
        dashboard.handle_push(live("BTCUSD", Timeframe::D1, TrendStatus::Bullish, 3), Utc::now());

        let request = dashboard.begin_snapshot().unwrap();
        assert!(dashboard
            .finish_snapshot(request.sequence, Err(ScreenerError::Network("connection refused".to_string())))
            .is_none());
        assert!(dashboard.banner().is_some());
        // stale but consistent
        assert_eq!(dashboard.rows()[0].cells[&Timeframe::D1].status, TrendStatus::Bullish);

        let request = dashboard.begin_snapshot().unwrap();
        dashboard.finish_snapshot(request.sequence, Ok(snapshot("BTCUSD", Timeframe::D1, TrendStatus::Bullish, 4)));
        assert_eq!(dashboard.banner(), None);
    }

    #[test]
    fn test_invalid_settings_are_reported_not_applied() {
        let mut dashboard = dashboard("settings");
        let candidate = Settings {
            short_period: 30,
            long_period: 20,
            ..Settings::default()
        };

        assert_eq!(dashboard.update_settings(candidate), None);
        assert!(dashboard.banner().is_some());
        assert_eq!(dashboard.settings(), &Settings::default());
    }

    #[test]
    fn test_hiding_timeframe_rejects_its_pushes() {
        let mut dashboard = dashboard("hide");
        adopt(&mut dashboard, vec![Symbol::new("BTCUSD")]);

        let candidate = dashboard
            .settings_manager()
            .with_timeframe_toggled(Timeframe::M1);
        let request = dashboard.update_settings(candidate).unwrap();
        assert!(!request.settings.visible_timeframes.contains(&Timeframe::M1));

        dashboard.handle_push(live("BTCUSD", Timeframe::M1, TrendStatus::Bullish, 0), Utc::now());
        assert!(dashboard.reconciler().store().is_empty());
        assert!(dashboard.rows()[0].cells.get(&Timeframe::M1).is_none());
    }

    #[test]
    fn test_remove_clears_row_immediately() {
        let mut dashboard = dashboard("remove");
        adopt(&mut dashboard, vec![Symbol::new("BTCUSD"), Symbol::new("ETHUSD")]);
        dashboard.handle_push(live("ETHUSD", Timeframe::H1, TrendStatus::Bearish, 2), Utc::now());

        dashboard.begin_remove(&Symbol::new("ETHUSD"));
        dashboard.handle_push(live("ETHUSD", Timeframe::H1, TrendStatus::Bullish, 0), Utc::now());

        let rows = dashboard.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, Symbol::new("BTCUSD"));
        assert!(dashboard.alerts(Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_through_api() {
        let api = FakeScreenerApi::default();
        *api.watchlist.lock().unwrap() = vec![Symbol::new("BTCUSD")];
        api.assets
            .lock()
            .unwrap()
            .extend(snapshot("BTCUSD", Timeframe::M15, TrendStatus::Bullish, 0).assets);

        let mut dashboard = dashboard("api");
        assert!(dashboard.finish_watchlist(fetch_watchlist(&api).await));

        let request = dashboard.begin_snapshot().unwrap();
        let result = request.fetch(&api).await;
        let outcome = dashboard.finish_snapshot(request.sequence, result).unwrap();

        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(api.snapshot_requests.lock().unwrap()[0], vec![Symbol::new("BTCUSD")]);
    }

    #[tokio::test]
    async fn test_rejected_removal_reports_and_restores_row() {
        let api = FakeScreenerApi::default();
        *api.watchlist.lock().unwrap() = vec![Symbol::new("BTCUSD"), Symbol::new("ETHUSD")];
        *api.reject_next.lock().unwrap() = Some(ScreenerError::ServerRejection {
            status: 400,
            reason: "Symbol is locked".to_string(),
        });
        api.assets.lock().unwrap().extend(
            snapshot("ETHUSD", Timeframe::H1, TrendStatus::Bearish, 2).assets,
        );

        let mut dashboard = dashboard("remove-rejected");
        assert!(dashboard.finish_watchlist(fetch_watchlist(&api).await));

        let eth = Symbol::new("ETHUSD");
        dashboard.begin_remove(&eth);
        assert_eq!(dashboard.watchlist(), &[Symbol::new("BTCUSD")]);

        assert!(dashboard.finish_watchlist(request_remove(&api, &eth).await));
        assert!(dashboard.banner().is_some());
        assert_eq!(dashboard.watchlist(), &[Symbol::new("BTCUSD"), eth.clone()]);

        let request = dashboard.begin_snapshot().unwrap();
        assert!(request.symbols.contains(&eth));
        let result = request.fetch(&api).await;
        dashboard.finish_snapshot(request.sequence, result).unwrap();
        assert_eq!(
            dashboard.reconciler().store().get(&eth, Timeframe::H1).map(|s| s.status),
            Some(TrendStatus::Bearish)
        );
    }

    #[test]
    fn test_connection_drop_sets_banner_until_reconnected() {
        let mut dashboard = dashboard("connection");
        let mut banners = Vec::new();
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Failed,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ] {
            dashboard.set_connection(state);
            banners.push(dashboard.banner().is_some());
        }

        assert_eq!(banners, vec![false, false, true, true, true, false]);
        assert_eq!(dashboard.connection(), ConnectionState::Connected);
    }
}
