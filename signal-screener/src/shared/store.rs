//! In-memory signal table: symbol x timeframe -> current [`SignalState`].
//!
//! The store never enforces ordering; the reconciler is its only writer and
//! decides what gets written. Readers receive owned [`SignalRow`]s.

use crate::shared::types::{SignalState, Symbol, Timeframe};
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap};

/// One rendered row: watchlist symbol plus its visible cells in display order
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRow {
    pub symbol: Symbol,
    pub cells: IndexMap<Timeframe, SignalState>,
}

#[derive(Debug, Clone, Default)]
pub struct SignalStore {
    cells: HashMap<Symbol, BTreeMap<Timeframe, SignalState>>,
}

impl SignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<&SignalState> {
        self.cells.get(symbol)?.get(&timeframe)
    }

    /// Overwrite unconditionally
    pub fn put(&mut self, symbol: Symbol, timeframe: Timeframe, state: SignalState) {
        self.cells.entry(symbol).or_default().insert(timeframe, state);
    }

    /// Remove every timeframe cell of `symbol`, returning how many were dropped
    pub fn prune(&mut self, symbol: &Symbol) -> usize {
        self.cells.remove(symbol).map(|row| row.len()).unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Symbols with at least one stored cell
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.cells.keys()
    }

    /// Total number of stored cells
    pub fn len(&self) -> usize {
        self.cells.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Join watchlist order with the visible-timeframe projection
    ///
    /// Missing cells are filled with [`SignalState::unknown`].
    pub fn rows(&self, watchlist: &[Symbol], visible: &[Timeframe]) -> Vec<SignalRow> {
        watchlist
            .iter()
            .map(|symbol| {
                let stored = self.cells.get(symbol);
                let cells = visible
                    .iter()
                    .map(|tf| {
                        let state = stored
                            .and_then(|row| row.get(tf))
                            .cloned()
                            .unwrap_or_else(SignalState::unknown);
                        (*tf, state)
                    })
                    .collect();
                SignalRow {
                    symbol: symbol.clone(),
                    cells,
                }
            })
            .collect()
    }
}
