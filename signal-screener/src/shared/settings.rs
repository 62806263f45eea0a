//! User settings: validation, persistence and invalidation of signal state.

use crate::shared::{
    error::ScreenerError,
    reconciler::UpdateReconciler,
    types::{Sequence, Settings, Timeframe},
};
use serde_json::{Map, Value};
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Namespaced key the settings live under in the settings file
pub const SETTINGS_KEY: &str = "screenerSettings";

/// Check a candidate settings value, with no side effects
pub fn validate(settings: &Settings) -> Result<(), ScreenerError> {
    if settings.short_period == 0 || settings.long_period == 0 {
        return Err(ScreenerError::Validation(
            "periods must be positive integers".to_string(),
        ));
    }
    if settings.short_period >= settings.long_period {
        return Err(ScreenerError::Validation(format!(
            "short period ({}) must be less than long period ({})",
            settings.short_period, settings.long_period
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct SettingsManager {
    path: PathBuf,
    active: Settings,
}

impl SettingsManager {
    /// Load persisted settings from `path`
    ///
    /// An absent, unreadable or invalid file yields [`Settings::default`].
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let active = read_settings(&path).unwrap_or_default();
        Self { path, active }
    }

    pub fn settings(&self) -> &Settings {
        &self.active
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate, persist and swap in `settings`, then invalidate all signal state
    ///
    /// Nothing changes if validation or persistence fails. Returns the baseline
    /// sequence of the new epoch.
    pub fn update(
        &mut self,
        settings: Settings,
        reconciler: &mut UpdateReconciler,
    ) -> Result<Sequence, ScreenerError> {
        validate(&settings)?;
        write_settings(&self.path, &settings)?;

        info!(
            short = settings.short_period,
            long = settings.long_period,
            "settings updated"
        );
        self.active = settings;
        Ok(reconciler.invalidate(self.active.visible()))
    }

    /// Candidate with the short period moved by `delta`
    pub fn with_short_period(&self, delta: i32) -> Settings {
        Settings {
            short_period: self.active.short_period.saturating_add_signed(delta),
            ..self.active.clone()
        }
    }

    /// Candidate with the long period moved by `delta`
    pub fn with_long_period(&self, delta: i32) -> Settings {
        Settings {
            long_period: self.active.long_period.saturating_add_signed(delta),
            ..self.active.clone()
        }
    }

    /// Candidate with `timeframe` shown if hidden and hidden if shown
    pub fn with_timeframe_toggled(&self, timeframe: Timeframe) -> Settings {
        let mut visible = self.active.visible();
        if visible.contains(&timeframe) {
            visible.retain(|tf| *tf != timeframe);
        } else {
            visible.push(timeframe);
        }
        let mut candidate = Settings {
            visible_timeframes: visible,
            ..self.active.clone()
        };
        candidate.visible_timeframes = candidate.visible();
        candidate
    }
}

fn read_settings(path: &Path) -> Option<Settings> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no persisted settings, using defaults");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read settings, using defaults");
            return None;
        }
    };

    let settings = serde_json::from_str::<Map<String, Value>>(&raw)
        .ok()
        .and_then(|mut root| root.remove(SETTINGS_KEY))
        .map(serde_json::from_value::<Settings>);

    match settings {
        Some(Ok(settings)) => match validate(&settings) {
            Ok(()) => Some(settings),
            Err(e) => {
                warn!(error = %e, "persisted settings invalid, using defaults");
                None
            }
        },
        Some(Err(e)) => {
            warn!(error = %e, "persisted settings corrupt, using defaults");
            None
        }
        None => {
            warn!(path = %path.display(), "settings file unreadable, using defaults");
            None
        }
    }
}

/// Write `settings` under [`SETTINGS_KEY`], keeping any other keys in the file
fn write_settings(path: &Path, settings: &Settings) -> Result<(), ScreenerError> {
    let mut root = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<Map<String, Value>>(&raw).ok())
        .unwrap_or_default();

    let value = serde_json::to_value(settings)
        .map_err(|e| ScreenerError::Persistence(e.to_string()))?;
    root.insert(SETTINGS_KEY.to_string(), value);

    let encoded = serde_json::to_string_pretty(&root)
        .map_err(|e| ScreenerError::Persistence(e.to_string()))?;
    fs::write(path, encoded)
        .map_err(|e| ScreenerError::Persistence(format!("{}: {}", path.display(), e)))
}
