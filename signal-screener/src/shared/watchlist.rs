//! Watchlist mutations and the symbol catalogue.
//!
//! The server owns the watchlist: after every request the local view is
//! replaced with the list the server returns. Requests run off the event
//! loop and hand back a [`WatchlistReply`] that the controller applies.
//! Removal is optimistic, the symbol's signal state is dropped before the
//! server confirms.

use crate::shared::{
    api::ScreenerApi,
    error::ScreenerError,
    reconciler::UpdateReconciler,
    types::Symbol,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long a fetched `all-symbols` catalogue is reused
pub const CATALOGUE_TTL: Duration = Duration::from_secs(4 * 60 * 60);

#[derive(Debug, Clone)]
struct Catalogue {
    symbols: Vec<Symbol>,
    fetched_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct WatchlistController {
    catalogue: Option<Catalogue>,
}

/// Outcome of a watchlist request made off the event loop
#[derive(Debug, PartialEq)]
pub struct WatchlistReply {
    /// Authoritative list to adopt, when the server returned one
    pub symbols: Option<Vec<Symbol>>,
    pub error: Option<ScreenerError>,
}

impl WatchlistReply {
    fn from_result(result: Result<Vec<Symbol>, ScreenerError>) -> Self {
        match result {
            Ok(symbols) => Self {
                symbols: Some(symbols),
                error: None,
            },
            Err(error) => Self {
                symbols: None,
                error: Some(error),
            },
        }
    }
}

/// Validate raw add-symbol input
///
/// Input is trimmed and uppercased; only ASCII alphanumerics plus `-`, `_`
/// and `.` are accepted.
pub fn parse_symbol(raw: &str) -> Result<Symbol, ScreenerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScreenerError::Validation("symbol is empty".to_string()));
    }
    if let Some(bad) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(ScreenerError::Validation(format!(
            "symbol {trimmed:?} contains invalid character {bad:?}"
        )));
    }
    Ok(Symbol::new(trimmed))
}

/// Fetch the server's watchlist
pub async fn fetch_watchlist(api: &dyn ScreenerApi) -> WatchlistReply {
    WatchlistReply::from_result(api.watchlist().await)
}

/// Add a symbol; adding one already present is not an error
///
/// A failed request carries no list, so the local watchlist is left unchanged.
pub async fn request_add(api: &dyn ScreenerApi, symbol: &Symbol) -> WatchlistReply {
    let reply = WatchlistReply::from_result(api.add_to_watchlist(symbol).await);
    if reply.error.is_none() {
        info!(%symbol, "symbol added to watchlist");
    }
    reply
}

/// Remove a symbol
///
/// When the delete fails the server list is fetched again, so a symbol
/// already dropped locally comes back if the server still holds it.
pub async fn request_remove(api: &dyn ScreenerApi, symbol: &Symbol) -> WatchlistReply {
    match api.remove_from_watchlist(symbol).await {
        Ok(symbols) => {
            info!(%symbol, "symbol removed from watchlist");
            WatchlistReply {
                symbols: Some(symbols),
                error: None,
            }
        }
        Err(error) => {
            warn!(%symbol, %error, "removal failed, restoring server watchlist");
            WatchlistReply {
                symbols: api.watchlist().await.ok(),
                error: Some(error),
            }
        }
    }
}

impl WatchlistController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current watchlist in server order
    pub fn list<'a>(&self, reconciler: &'a UpdateReconciler) -> &'a [Symbol] {
        reconciler.watchlist()
    }

    /// Replace the local watchlist with the server's authoritative list
    pub fn apply_server_list(&self, symbols: Vec<Symbol>, reconciler: &mut UpdateReconciler) {
        let dropped = reconciler.set_watchlist(symbols);
        if !dropped.is_empty() {
            debug!(?dropped, "watchlist symbols pruned");
        }
    }

    /// Drop `symbol` locally ahead of the server round-trip
    ///
    /// Its signal state and alert history are cleared immediately.
    pub fn begin_remove(&self, symbol: &Symbol, reconciler: &mut UpdateReconciler) {
        reconciler.forget_symbol(symbol);
    }

    /// Adopt the list carried by `reply`, then surface its error
    pub fn apply_reply(
        &self,
        reply: WatchlistReply,
        reconciler: &mut UpdateReconciler,
    ) -> Result<(), ScreenerError> {
        if let Some(symbols) = reply.symbols {
            self.apply_server_list(symbols, reconciler);
        }
        match reply.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn catalogue_is_fresh(&self, now: Instant) -> bool {
        self.catalogue
            .as_ref()
            .is_some_and(|c| now.duration_since(c.fetched_at) < CATALOGUE_TTL)
    }

    pub fn set_catalogue(&mut self, symbols: Vec<Symbol>, fetched_at: Instant) {
        debug!(count = symbols.len(), "symbol catalogue updated");
        self.catalogue = Some(Catalogue {
            symbols,
            fetched_at,
        });
    }

    /// Catalogue symbols starting with `prefix`, case-insensitive
    pub fn suggest(&self, prefix: &str) -> Vec<Symbol> {
        let prefix = prefix.trim().to_uppercase();
        if prefix.is_empty() {
            return Vec::new();
        }
        self.catalogue
            .iter()
            .flat_map(|c| c.symbols.iter())
            .filter(|s| s.as_str().starts_with(&prefix))
            .cloned()
            .collect()
    }
}
