/// Signal Screener - Shared Library
///
/// Client-side core of the EMA crossover screener dashboard:
/// - Wire types for snapshots, push messages and settings
/// - Update reconciler merging periodic snapshots with live push updates
/// - Push channel connection manager with delayed reconnect
/// - Watchlist and settings management against the screener backend
/// - Trend colour encoding for the terminal table
pub mod shared;

// Re-export commonly used types for convenience
pub use shared::types::{
    AlertEvent, AssetSignals, CrossoverKind, CrossoverRecord, ScreenerSnapshot, Sequence,
    Settings, SignalState, Symbol, Timeframe, TrendStatus,
};

pub use shared::websocket::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState, PushMessage,
};

pub use shared::alerts::{AlertDeduper, AlertFeed, DisplayedAlert};
pub use shared::api::{HttpScreenerApi, ScreenerApi};
pub use shared::config::ScreenerConfig;
pub use shared::dashboard::{Dashboard, SnapshotRequest};
pub use shared::encoding::{EncodingStrategy, Rgb, TrendEncoder, VisualEncoding};
pub use shared::error::ScreenerError;
pub use shared::reconciler::{Rejection, SequenceClock, SnapshotOutcome, UpdateReconciler};
pub use shared::settings::SettingsManager;
pub use shared::store::{SignalRow, SignalStore};
pub use shared::watchlist::{WatchlistController, WatchlistReply};
