//! Update reconciler: merges full snapshots and push updates into the [`SignalStore`].
//!
//! One merge law applies to both channels: per (symbol, timeframe) cell the
//! update with the highest [`Sequence`] wins, regardless of arrival order.
//! Watchlist membership and timeframe visibility are checked before ordering.
//!
//! A settings invalidation wipes the store, opens a new sequence epoch and
//! lets the first snapshot of that epoch through unconditionally. Anything
//! stamped in an older epoch (e.g. a slow pre-invalidation snapshot) is dropped.

use crate::shared::{
    alerts::AlertDeduper,
    store::{SignalRow, SignalStore},
    types::{
        AlertEvent, AssetSignals, ScreenerSnapshot, Sequence, SignalState, Symbol, Timeframe,
    },
};
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, info};

/// Issues monotonic [`Sequence`] values
#[derive(Debug, Clone, Default)]
pub struct SequenceClock {
    epoch: u32,
    tick: u64,
}

impl SequenceClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence in the current epoch
    pub fn next(&mut self) -> Sequence {
        self.tick += 1;
        Sequence::new(self.epoch, self.tick)
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Open a new epoch; the returned baseline outranks everything issued so far
    pub fn advance_epoch(&mut self) -> Sequence {
        self.epoch += 1;
        self.tick = 0;
        Sequence::new(self.epoch, self.tick)
    }

    /// Keep the clock ahead of externally supplied sequences
    fn observe(&mut self, sequence: Sequence) {
        if sequence.epoch == self.epoch && sequence.tick > self.tick {
            self.tick = sequence.tick;
        }
    }
}

/// Why an update was dropped without side effects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Stamped before the latest settings invalidation
    ExpiredEpoch,
    NotOnWatchlist,
    TimeframeHidden,
    /// Not newer than the stored state for this cell
    Stale { stored: Sequence, incoming: Sequence },
}

/// Result of applying a snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotOutcome {
    pub written: usize,
    pub rejected: usize,
    pub pruned: Vec<Symbol>,
    pub alerts: Vec<AlertEvent>,
}

/// Single writer of the [`SignalStore`] and [`AlertDeduper`]
#[derive(Debug, Clone, Default)]
pub struct UpdateReconciler {
    store: SignalStore,
    deduper: AlertDeduper,
    clock: SequenceClock,
    watchlist: Vec<Symbol>,
    visible: Vec<Timeframe>,
    awaiting_baseline: bool,
}

impl UpdateReconciler {
    pub fn new(visible: Vec<Timeframe>) -> Self {
        Self {
            visible,
            ..Self::default()
        }
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    pub fn deduper(&self) -> &AlertDeduper {
        &self.deduper
    }

    pub fn watchlist(&self) -> &[Symbol] {
        &self.watchlist
    }

    pub fn visible(&self) -> &[Timeframe] {
        &self.visible
    }

    /// Rows for rendering, in watchlist order
    pub fn rows(&self) -> Vec<SignalRow> {
        self.store.rows(&self.watchlist, &self.visible)
    }

    /// Stamp an outgoing snapshot request or an arriving push
    pub fn issue_sequence(&mut self) -> Sequence {
        self.clock.next()
    }

    /// Replace the watchlist with an authoritative list, pruning dropped symbols
    pub fn set_watchlist(&mut self, symbols: Vec<Symbol>) -> Vec<Symbol> {
        let keep: HashSet<&Symbol> = symbols.iter().collect();
        let dropped: Vec<Symbol> = self
            .watchlist
            .iter()
            .chain(self.store.symbols())
            .filter(|s| !keep.contains(s))
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        for symbol in &dropped {
            self.purge(symbol);
        }
        self.watchlist = symbols;
        dropped
    }

    /// Remove `symbol` from the watchlist and drop all of its state
    pub fn forget_symbol(&mut self, symbol: &Symbol) {
        self.watchlist.retain(|s| s != symbol);
        self.purge(symbol);
    }

    /// Discard all stored state after a settings change
    ///
    /// Returns the baseline of the new epoch.
    pub fn invalidate(&mut self, visible: Vec<Timeframe>) -> Sequence {
        self.store.clear();
        self.deduper.clear();
        self.visible = visible;
        self.awaiting_baseline = true;
        let baseline = self.clock.advance_epoch();
        info!(%baseline, "signal store invalidated");
        baseline
    }

    /// Apply a full snapshot stamped with `sequence`
    ///
    /// Symbols with stored state that the snapshot omits are pruned, unless
    /// their state is newer than the snapshot itself.
    pub fn apply_snapshot(&mut self, snapshot: &ScreenerSnapshot, sequence: Sequence) -> SnapshotOutcome {
        let mut outcome = SnapshotOutcome::default();

        if sequence.epoch < self.clock.epoch() {
            outcome.rejected = snapshot.assets.iter().map(|a| a.timeframes.len()).sum();
            debug!(%sequence, "dropping snapshot from expired epoch");
            return outcome;
        }
        self.clock.observe(sequence);

        let unconditional = std::mem::take(&mut self.awaiting_baseline);

        for asset in &snapshot.assets {
            self.apply_asset(asset, sequence, unconditional, &mut outcome);
        }

        let present: HashSet<&Symbol> = snapshot.assets.iter().map(|a| &a.name).collect();
        let absent: Vec<Symbol> = self
            .store
            .symbols()
            .filter(|s| !present.contains(s))
            .cloned()
            .collect();
        for symbol in absent {
            let newer_exists = self
                .visible
                .iter()
                .filter_map(|tf| self.store.get(&symbol, *tf))
                .any(|state| state.sequence > sequence);
            if !newer_exists {
                self.purge(&symbol);
                outcome.pruned.push(symbol);
            }
        }

        debug!(
            %sequence,
            written = outcome.written,
            rejected = outcome.rejected,
            pruned = outcome.pruned.len(),
            "applied snapshot"
        );
        outcome
    }

    /// Apply a single pushed cell update stamped with `sequence`
    ///
    /// Returns the alert to raise, if the update is an accepted new crossover.
    pub fn apply_incremental(
        &mut self,
        symbol: &Symbol,
        timeframe: Timeframe,
        state: SignalState,
        sequence: Sequence,
    ) -> Result<Option<AlertEvent>, Rejection> {
        if sequence.epoch < self.clock.epoch() {
            return Err(Rejection::ExpiredEpoch);
        }
        self.check_membership(symbol, timeframe)?;
        self.clock.observe(sequence);
        self.accept(symbol, timeframe, state, sequence, false)
    }

    fn apply_asset(
        &mut self,
        asset: &AssetSignals,
        sequence: Sequence,
        unconditional: bool,
        outcome: &mut SnapshotOutcome,
    ) {
        for (timeframe, state) in &asset.timeframes {
            let result = self
                .check_membership(&asset.name, *timeframe)
                .and_then(|_| {
                    self.accept(&asset.name, *timeframe, state.clone(), sequence, unconditional)
                });

            match result {
                Ok(alert) => {
                    outcome.written += 1;
                    outcome.alerts.extend(alert);
                }
                Err(_) => outcome.rejected += 1,
            }
        }
    }

    fn check_membership(&self, symbol: &Symbol, timeframe: Timeframe) -> Result<(), Rejection> {
        if !self.watchlist.contains(symbol) {
            return Err(Rejection::NotOnWatchlist);
        }
        if !self.visible.contains(&timeframe) {
            return Err(Rejection::TimeframeHidden);
        }
        Ok(())
    }

    /// Write through the store and deduper together
    fn accept(
        &mut self,
        symbol: &Symbol,
        timeframe: Timeframe,
        state: SignalState,
        sequence: Sequence,
        unconditional: bool,
    ) -> Result<Option<AlertEvent>, Rejection> {
        if !unconditional {
            if let Some(stored) = self.store.get(symbol, timeframe) {
                if sequence <= stored.sequence {
                    let rejection = Rejection::Stale {
                        stored: stored.sequence,
                        incoming: sequence,
                    };
                    debug!(%symbol, %timeframe, ?rejection, "dropping stale update");
                    return Err(rejection);
                }
            }
        }

        let mut state = state.normalised();
        state.sequence = sequence;

        let fire = self.deduper.should_alert(symbol, timeframe, &state);
        let alert = fire.then(|| AlertEvent {
            symbol: symbol.clone(),
            timeframe,
            status: state.status,
            fired_at: Utc::now(),
            confirmed_at: None,
        });
        if let Some(alert) = &alert {
            info!(symbol = %alert.symbol, timeframe = %timeframe, status = %alert.status, "crossover alert");
        }

        self.store.put(symbol.clone(), timeframe, state);
        Ok(alert)
    }

    fn purge(&mut self, symbol: &Symbol) {
        self.store.prune(symbol);
        self.deduper.forget(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::TrendStatus;
    use std::collections::BTreeMap;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s)
    }

    fn state(status: TrendStatus, bars: u32) -> SignalState {
        SignalState::new(status, Some(bars))
    }

    fn asset(name: &str, cells: &[(Timeframe, SignalState)]) -> AssetSignals {
        AssetSignals {
            name: sym(name),
            timeframes: cells.iter().cloned().collect::<BTreeMap<_, _>>(),
        }
    }

    fn snapshot(assets: Vec<AssetSignals>) -> ScreenerSnapshot {
        ScreenerSnapshot { assets }
    }

    fn reconciler(symbols: &[&str]) -> UpdateReconciler {
        let mut reconciler = UpdateReconciler::new(Timeframe::ALL.to_vec());
        reconciler.set_watchlist(symbols.iter().map(|s| sym(s)).collect());
        reconciler
    }

    fn stored_status(r: &UpdateReconciler, symbol: &str, tf: Timeframe) -> Option<TrendStatus> {
        r.store().get(&sym(symbol), tf).map(|s| s.status)
    }

    #[test]
    fn test_sequence_clock() {
        let mut clock = SequenceClock::new();
        let a = clock.next();
        let b = clock.next();
        assert!(b > a);

        let baseline = clock.advance_epoch();
        assert!(baseline > b);
        assert!(clock.next() > baseline);
    }

    #[test]
    fn test_highest_sequence_wins_regardless_of_arrival() {
        let mut r = reconciler(&["BTCUSD"]);
        let btc = sym("BTCUSD");

        // snapshot requested first, push arrives before the response
        let snapshot_seq = r.issue_sequence();
        let push_seq = r.issue_sequence();

        r.apply_incremental(&btc, Timeframe::H1, state(TrendStatus::Bearish, 2), push_seq)
            .unwrap();
        let outcome = r.apply_snapshot(
            &snapshot(vec![asset("BTCUSD", &[(Timeframe::H1, state(TrendStatus::Bullish, 7))])]),
            snapshot_seq,
        );

        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.rejected, 1);
        assert_eq!(stored_status(&r, "BTCUSD", Timeframe::H1), Some(TrendStatus::Bearish));
        assert_eq!(r.store().get(&btc, Timeframe::H1).unwrap().sequence, push_seq);
    }

    #[test]
    fn test_last_writer_by_sequence_over_shuffled_updates() {
        let mut r = reconciler(&["BTCUSD"]);
        let btc = sym("BTCUSD");
        let updates = [
            (Sequence::new(0, 4), 4),
            (Sequence::new(0, 9), 9),
            (Sequence::new(0, 2), 2),
            (Sequence::new(0, 7), 7),
        ];

        for (seq, bars) in updates {
            let _ = r.apply_incremental(&btc, Timeframe::H4, state(TrendStatus::Bullish, bars), seq);
        }

        let stored = r.store().get(&btc, Timeframe::H4).unwrap();
        assert_eq!(stored.bars_since, Some(9));
        assert_eq!(stored.sequence, Sequence::new(0, 9));
    }

    #[test]
    fn test_snapshot_reapply_is_idempotent() {
        let mut r = reconciler(&["BTCUSD", "ETHUSD"]);
        let snap = snapshot(vec![
            asset("BTCUSD", &[(Timeframe::M15, state(TrendStatus::Bullish, 0))]),
            asset("ETHUSD", &[(Timeframe::M15, state(TrendStatus::Bearish, 3))]),
        ]);
        let seq = r.issue_sequence();

        let first = r.apply_snapshot(&snap, seq);
        assert_eq!(first.written, 2);
        assert_eq!(first.alerts.len(), 1);
        let before = r.rows();

        let second = r.apply_snapshot(&snap, seq);
        assert_eq!(second.written, 0);
        assert_eq!(second.rejected, 2);
        assert!(second.alerts.is_empty());
        assert!(second.pruned.is_empty());
        assert_eq!(r.rows(), before);
    }

    #[test]
    fn test_alert_fires_once_per_transition_across_channels() {
        let mut r = reconciler(&["BTCUSD"]);
        let btc = sym("BTCUSD");
        let mut alerts = 0;

        let snap_seq = r.issue_sequence();
        let outcome = r.apply_snapshot(
            &snapshot(vec![asset("BTCUSD", &[(Timeframe::H1, state(TrendStatus::Neutral, 5))])]),
            snap_seq,
        );
        alerts += outcome.alerts.len();

        for s in [
            state(TrendStatus::Bullish, 0),
            state(TrendStatus::Bullish, 1),
            state(TrendStatus::Bullish, 0),
            state(TrendStatus::Bearish, 0),
        ] {
            let seq = r.issue_sequence();
            if r.apply_incremental(&btc, Timeframe::H1, s, seq).unwrap().is_some() {
                alerts += 1;
            }
        }

        assert_eq!(alerts, 2);
    }

    #[test]
    fn test_rejected_push_does_not_touch_deduper() {
        let mut r = reconciler(&["BTCUSD"]);
        let btc = sym("BTCUSD");

        let newer = Sequence::new(0, 10);
        r.apply_incremental(&btc, Timeframe::H1, state(TrendStatus::Bearish, 3), newer)
            .unwrap();

        let rejected = r.apply_incremental(&btc, Timeframe::H1, state(TrendStatus::Bullish, 0), Sequence::new(0, 4));
        assert_eq!(
            rejected,
            Err(Rejection::Stale {
                stored: newer,
                incoming: Sequence::new(0, 4)
            })
        );
        assert_eq!(r.deduper().last_seen(&btc, Timeframe::H1), Some(TrendStatus::Bearish));
    }

    #[test]
    fn test_push_membership_filters() {
        let mut r = reconciler(&["BTCUSD"]);
        r.invalidate(vec![Timeframe::H1]);
        let seq = r.issue_sequence();

        assert_eq!(
            r.apply_incremental(&sym("DOGEUSD"), Timeframe::H1, state(TrendStatus::Bullish, 0), seq),
            Err(Rejection::NotOnWatchlist)
        );
        assert_eq!(
            r.apply_incremental(&sym("BTCUSD"), Timeframe::D1, state(TrendStatus::Bullish, 0), seq),
            Err(Rejection::TimeframeHidden)
        );
        assert!(r.store().is_empty());
        assert_eq!(r.deduper().last_seen(&sym("BTCUSD"), Timeframe::D1), None);
    }

    #[test]
    fn test_removed_symbol_stays_removed() {
        let mut r = reconciler(&["BTCUSD", "ETHUSD"]);
        let eth = sym("ETHUSD");
        let seq = r.issue_sequence();
        r.apply_snapshot(
            &snapshot(vec![
                asset("BTCUSD", &[(Timeframe::H1, state(TrendStatus::Bullish, 2))]),
                asset("ETHUSD", &[
                    (Timeframe::H1, state(TrendStatus::Bearish, 2)),
                    (Timeframe::D1, state(TrendStatus::Bearish, 8)),
                ]),
            ]),
            seq,
        );

        r.forget_symbol(&eth);
        let late = r.issue_sequence();
        assert_eq!(
            r.apply_incremental(&eth, Timeframe::H1, state(TrendStatus::Bullish, 0), late),
            Err(Rejection::NotOnWatchlist)
        );

        let rows = r.rows();
        assert_eq!(rows.len(), 1);
        assert!(rows.iter().all(|row| row.symbol != eth));
        assert!(r.store().get(&eth, Timeframe::H1).is_none());
    }

    #[test]
    fn test_snapshot_prunes_symbols_removed_upstream() {
        let mut r = reconciler(&["BTCUSD", "ETHUSD"]);
        let first = r.issue_sequence();
        r.apply_snapshot(
            &snapshot(vec![
                asset("BTCUSD", &[(Timeframe::H1, state(TrendStatus::Bullish, 2))]),
                asset("ETHUSD", &[(Timeframe::H1, state(TrendStatus::Bearish, 0))]),
            ]),
            first,
        );

        let second = r.issue_sequence();
        let outcome = r.apply_snapshot(
            &snapshot(vec![asset("BTCUSD", &[(Timeframe::H1, state(TrendStatus::Bullish, 3))])]),
            second,
        );

        assert_eq!(outcome.pruned, vec![sym("ETHUSD")]);
        assert!(outcome.alerts.is_empty());
        assert_eq!(stored_status(&r, "ETHUSD", Timeframe::H1), None);
        assert_eq!(r.deduper().last_seen(&sym("ETHUSD"), Timeframe::H1), None);
    }

    #[test]
    fn test_snapshot_does_not_prune_newer_push_state() {
        let mut r = reconciler(&["BTCUSD", "SOLUSD"]);
        let snap_seq = r.issue_sequence();
        let push_seq = r.issue_sequence();

        r.apply_incremental(&sym("SOLUSD"), Timeframe::M15, state(TrendStatus::Bullish, 1), push_seq)
            .unwrap();
        let outcome = r.apply_snapshot(
            &snapshot(vec![asset("BTCUSD", &[(Timeframe::M15, state(TrendStatus::Bearish, 4))])]),
            snap_seq,
        );

        assert!(outcome.pruned.is_empty());
        assert_eq!(stored_status(&r, "SOLUSD", Timeframe::M15), Some(TrendStatus::Bullish));
    }

    #[test]
    fn test_snapshot_ignores_off_watchlist_assets() {
        let mut r = reconciler(&["BTCUSD"]);
        let seq = r.issue_sequence();
        let outcome = r.apply_snapshot(
            &snapshot(vec![asset("XRPUSD", &[(Timeframe::H1, state(TrendStatus::Bullish, 0))])]),
            seq,
        );

        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.rejected, 1);
        assert!(outcome.alerts.is_empty());
        assert!(r.store().is_empty());
    }

    #[test]
    fn test_invalidation_accepts_next_snapshot_unconditionally() {
        let mut r = reconciler(&["BTCUSD"]);
        let btc = sym("BTCUSD");

        r.apply_incremental(&btc, Timeframe::H1, state(TrendStatus::Bearish, 1), Sequence::new(0, 900))
            .unwrap();

        let baseline = r.invalidate(Timeframe::ALL.to_vec());
        assert!(r.store().is_empty());
        assert!(baseline > Sequence::new(0, 900));

        // numerically lower tick than the pre-invalidation push
        let outcome = r.apply_snapshot(
            &snapshot(vec![asset("BTCUSD", &[(Timeframe::H1, state(TrendStatus::Bullish, 0))])]),
            Sequence::new(baseline.epoch, 3),
        );

        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.alerts.len(), 1);
        assert_eq!(stored_status(&r, "BTCUSD", Timeframe::H1), Some(TrendStatus::Bullish));
    }

    #[test]
    fn test_invalidation_drops_late_pre_invalidation_snapshot() {
        let mut r = reconciler(&["BTCUSD"]);
        let in_flight = r.issue_sequence();

        r.invalidate(Timeframe::ALL.to_vec());
        let outcome = r.apply_snapshot(
            &snapshot(vec![asset("BTCUSD", &[(Timeframe::H1, state(TrendStatus::Bullish, 0))])]),
            in_flight,
        );

        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.rejected, 1);
        assert!(r.store().is_empty());

        assert_eq!(
            r.apply_incremental(&sym("BTCUSD"), Timeframe::H1, state(TrendStatus::Bullish, 0), in_flight),
            Err(Rejection::ExpiredEpoch)
        );
    }

    #[test]
    fn test_unconditional_window_closes_after_one_snapshot() {
        let mut r = reconciler(&["BTCUSD"]);
        r.invalidate(Timeframe::ALL.to_vec());

        let fresh = r.issue_sequence();
        let snap = snapshot(vec![asset("BTCUSD", &[(Timeframe::H1, state(TrendStatus::Bullish, 2))])]);
        assert_eq!(r.apply_snapshot(&snap, fresh).written, 1);
        assert_eq!(r.apply_snapshot(&snap, fresh).written, 0);
    }

    #[test]
    fn test_set_watchlist_prunes_dropped_symbols() {
        let mut r = reconciler(&["BTCUSD", "ETHUSD"]);
        let seq = r.issue_sequence();
        r.apply_incremental(&sym("ETHUSD"), Timeframe::H1, state(TrendStatus::Bullish, 0), seq)
            .unwrap();

        let dropped = r.set_watchlist(vec![sym("BTCUSD"), sym("SOLUSD")]);

        assert_eq!(dropped, vec![sym("ETHUSD")]);
        assert_eq!(r.watchlist(), &[sym("BTCUSD"), sym("SOLUSD")]);
        assert!(r.store().is_empty());
        assert_eq!(r.deduper().last_seen(&sym("ETHUSD"), Timeframe::H1), None);
    }
}
