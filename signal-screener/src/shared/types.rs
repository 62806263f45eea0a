/// Core data types for screener signals
///
/// These types match the JSON shapes served by the screener backend at
/// http://127.0.0.1:8000 and its push channel at ws://127.0.0.1:8000/ws

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Opaque uppercase instrument identifier (e.g. "BTCUSD")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, normalising to uppercase
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

/// Bar timeframe tracked by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// Every timeframe the dashboard knows about, shortest first
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M1,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| format!("unknown timeframe: {s}"))
    }
}

/// Trend status computed by the backend from the EMA crossover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TrendStatus {
    Bullish,
    Bearish,
    Neutral,
    /// No data yet ("N/A" / "Loading..." on the wire)
    #[serde(other, rename = "N/A")]
    Unknown,
}

impl TrendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendStatus::Bullish => "Bullish",
            TrendStatus::Bearish => "Bearish",
            TrendStatus::Neutral => "Neutral",
            TrendStatus::Unknown => "N/A",
        }
    }

    /// Bullish or Bearish
    pub fn is_directional(&self) -> bool {
        matches!(self, TrendStatus::Bullish | TrendStatus::Bearish)
    }
}

impl fmt::Display for TrendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering token for a single (symbol, timeframe) cell
///
/// Compared lexicographically: a settings invalidation opens a new `epoch`, so
/// anything issued afterwards outranks everything issued before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Sequence {
    pub epoch: u32,
    pub tick: u64,
}

impl Sequence {
    pub const fn new(epoch: u32, tick: u64) -> Self {
        Self { epoch, tick }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.tick)
    }
}

/// Current signal for one (symbol, timeframe) cell
///
/// `bars_since` is only `None` when the status is [`TrendStatus::Unknown`]; a
/// value of 0 means the defining bar just closed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignalState {
    pub status: TrendStatus,
    #[serde(default)]
    pub bars_since: Option<u32>,
    /// Assigned by the reconciler when the state is accepted
    #[serde(skip)]
    pub sequence: Sequence,
}

impl SignalState {
    pub fn new(status: TrendStatus, bars_since: Option<u32>) -> Self {
        Self {
            status,
            bars_since,
            sequence: Sequence::default(),
        }
    }

    /// Placeholder rendered for cells with no stored state
    pub fn unknown() -> Self {
        Self::new(TrendStatus::Unknown, None)
    }

    /// True when the defining crossover bar just closed
    pub fn is_fresh_crossover(&self) -> bool {
        self.status.is_directional() && self.bars_since == Some(0)
    }

    /// Restore the `bars_since == None iff Unknown` invariant on wire input
    pub fn normalised(mut self) -> Self {
        match (self.status, self.bars_since) {
            (TrendStatus::Unknown, _) => self.bars_since = None,
            (_, None) => self.status = TrendStatus::Unknown,
            _ => {}
        }
        self
    }

    /// Cell text, e.g. "Bull (3 bars)", "Neutral", "N/A"
    pub fn label(&self) -> String {
        match (self.status, self.bars_since) {
            (status, Some(bars)) if status.is_directional() => {
                format!("{} ({} bars)", status.as_str()[..4].to_uppercase(), bars)
            }
            (status, _) => status.as_str().to_string(),
        }
    }
}

/// User-adjustable indicator parameters
///
/// Persisted as `{shortPeriod, longPeriod, visibleTimeframes}`. Missing
/// fields deserialise to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    #[serde(alias = "short_ema")]
    pub short_period: u32,
    #[serde(alias = "long_ema")]
    pub long_period: u32,
    pub visible_timeframes: Vec<Timeframe>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            short_period: 9,
            long_period: 20,
            visible_timeframes: Timeframe::ALL.to_vec(),
        }
    }
}

impl Settings {
    /// Visible timeframes in canonical (shortest first) order, deduplicated
    pub fn visible(&self) -> Vec<Timeframe> {
        Timeframe::ALL
            .into_iter()
            .filter(|tf| self.visible_timeframes.contains(tf))
            .collect()
    }
}

/// User-visible crossover notification
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub status: TrendStatus,
    pub fired_at: DateTime<Utc>,
    /// Crossover confirmation time reported by the server, when known
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl AlertEvent {
    pub fn message(&self) -> String {
        let fired = self.fired_at.with_timezone(&Local);
        let confirmed = self.confirmed_at.unwrap_or(self.fired_at).with_timezone(&Local);
        format!(
            "[{}] New {} crossover on {} ({}) confirmed at {}.",
            fired.format("%H:%M:%S"),
            self.status,
            self.symbol,
            self.timeframe,
            confirmed.format("%H:%M:%S"),
        )
    }
}

/// Signal map for one asset in a full snapshot
///
/// Timeframe keys the client does not recognise are ignored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssetSignals {
    pub name: Symbol,
    #[serde(default, deserialize_with = "de_timeframe_map")]
    pub timeframes: BTreeMap<Timeframe, SignalState>,
}

/// Full screener snapshot, `POST screener_data` response
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScreenerSnapshot {
    #[serde(default, alias = "crypto")]
    pub assets: Vec<AssetSignals>,
}

/// Historical crossover row, `GET historical-crossovers` response item
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CrossoverRecord {
    /// Unix seconds
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: CrossoverKind,
    pub close: f64,
}

impl CrossoverRecord {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossoverKind {
    Bullish,
    Bearish,
}

fn de_timeframe_map<'de, D>(deserializer: D) -> Result<BTreeMap<Timeframe, SignalState>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, SignalState>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(key, state)| {
            key.parse::<Timeframe>()
                .ok()
                .map(|tf| (tf, state.normalised()))
        })
        .collect())
}
