/// Trend encoder: maps (status, bars-since) to a cell colour encoding
///
/// Two strategies are supported:
/// - `Continuous`: linear RGB interpolation from a "fresh" to a "faded" colour
/// - `Bucketed`: four discrete age bands per status
///
/// Both are pure and total, and both are monotonic in bars-since.

use crate::shared::types::TrendStatus;
use std::fmt;

/// Bars-since at which the continuous gradient reaches its faded endpoint
const FADE_SPAN_BARS: f64 = 99.0;

/// Foreground flips from light to dark above this progress
const DARK_TEXT_THRESHOLD: f64 = 0.6;

/// Inclusive upper bound of each band, freshest first (the last band is open)
const BAND_UPPER_BOUNDS: [u32; 3] = [10, 40, 60];

/// 24-bit colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_hex(hex: u32) -> Self {
        Self::new((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
    }

    /// Per-channel linear interpolation, `factor` clamped to [0, 1]
    pub fn lerp(self, other: Rgb, factor: f64) -> Rgb {
        let factor = factor.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + factor * (b as f64 - a as f64)).round() as u8;
        Rgb::new(
            mix(self.r, other.r),
            mix(self.g, other.g),
            mix(self.b, other.b),
        )
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

const BULLISH_FRESH: Rgb = Rgb::from_hex(0x2E7D32);
const BULLISH_FADED: Rgb = Rgb::from_hex(0xE8F5E9);
const BEARISH_FRESH: Rgb = Rgb::from_hex(0xC62828);
const BEARISH_FADED: Rgb = Rgb::from_hex(0xFFEBEE);
const NEUTRAL_BACKGROUND: Rgb = Rgb::from_hex(0xF1FAFB);
const NEUTRAL_FOREGROUND: Rgb = Rgb::from_hex(0x161C91);
const LIGHT_TEXT: Rgb = Rgb::from_hex(0xFFFFFF);
const DARK_TEXT: Rgb = Rgb::from_hex(0x000000);

/// Age band used by the bucketed strategy, freshest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Band {
    Fresh,
    Recent,
    Aging,
    Stale,
}

impl Band {
    pub fn from_bars(bars_since: u32) -> Self {
        match BAND_UPPER_BOUNDS.iter().position(|upper| bars_since <= *upper) {
            Some(0) => Band::Fresh,
            Some(1) => Band::Recent,
            Some(2) => Band::Aging,
            _ => Band::Stale,
        }
    }

    /// Gradient position the band's colour is sampled at
    fn progress(&self) -> f64 {
        match self {
            Band::Fresh => 0.0,
            Band::Recent => 1.0 / 3.0,
            Band::Aging => 2.0 / 3.0,
            Band::Stale => 1.0,
        }
    }
}

/// Discrete style class produced by the bucketed strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleClass {
    Bullish(Band),
    Bearish(Band),
    Neutral,
}

/// Visual encoding of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualEncoding {
    Gradient { background: Rgb, foreground: Rgb },
    Banded(StyleClass),
    Neutral,
}

impl VisualEncoding {
    /// (background, foreground) colours for rendering
    pub fn colors(&self) -> (Rgb, Rgb) {
        match self {
            VisualEncoding::Gradient {
                background,
                foreground,
            } => (*background, *foreground),
            VisualEncoding::Banded(StyleClass::Bullish(band)) => {
                gradient(BULLISH_FRESH, BULLISH_FADED, band.progress())
            }
            VisualEncoding::Banded(StyleClass::Bearish(band)) => {
                gradient(BEARISH_FRESH, BEARISH_FADED, band.progress())
            }
            VisualEncoding::Banded(StyleClass::Neutral) | VisualEncoding::Neutral => {
                (NEUTRAL_BACKGROUND, NEUTRAL_FOREGROUND)
            }
        }
    }
}

/// Encoding strategy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncodingStrategy {
    #[default]
    Continuous,
    Bucketed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrendEncoder {
    strategy: EncodingStrategy,
}

impl TrendEncoder {
    pub fn new(strategy: EncodingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> EncodingStrategy {
        self.strategy
    }

    /// Switch between continuous and bucketed encoding
    pub fn toggle(&mut self) {
        self.strategy = match self.strategy {
            EncodingStrategy::Continuous => EncodingStrategy::Bucketed,
            EncodingStrategy::Bucketed => EncodingStrategy::Continuous,
        };
    }

    pub fn encode(&self, status: TrendStatus, bars_since: Option<u32>) -> VisualEncoding {
        let Some(bars) = bars_since else {
            return self.neutral();
        };

        match (self.strategy, status) {
            (EncodingStrategy::Continuous, TrendStatus::Bullish) => {
                let (background, foreground) = gradient(BULLISH_FRESH, BULLISH_FADED, progress(bars));
                VisualEncoding::Gradient { background, foreground }
            }
            (EncodingStrategy::Continuous, TrendStatus::Bearish) => {
                let (background, foreground) = gradient(BEARISH_FRESH, BEARISH_FADED, progress(bars));
                VisualEncoding::Gradient { background, foreground }
            }
            (EncodingStrategy::Bucketed, TrendStatus::Bullish) => {
                VisualEncoding::Banded(StyleClass::Bullish(Band::from_bars(bars)))
            }
            (EncodingStrategy::Bucketed, TrendStatus::Bearish) => {
                VisualEncoding::Banded(StyleClass::Bearish(Band::from_bars(bars)))
            }
            (_, TrendStatus::Neutral | TrendStatus::Unknown) => self.neutral(),
        }
    }

    fn neutral(&self) -> VisualEncoding {
        match self.strategy {
            EncodingStrategy::Continuous => VisualEncoding::Neutral,
            EncodingStrategy::Bucketed => VisualEncoding::Banded(StyleClass::Neutral),
        }
    }
}

/// Fade progress in [0, 1]; bars 0 and 1 are both the freshest endpoint
fn progress(bars_since: u32) -> f64 {
    ((bars_since as f64 - 1.0) / FADE_SPAN_BARS).clamp(0.0, 1.0)
}

fn gradient(fresh: Rgb, faded: Rgb, progress: f64) -> (Rgb, Rgb) {
    let text = if progress > DARK_TEXT_THRESHOLD {
        DARK_TEXT
    } else {
        LIGHT_TEXT
    };
    (fresh.lerp(faded, progress), text)
}
