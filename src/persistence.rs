use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use color_eyre::eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::market::Timeframe;
use crate::signal::alert_key;
use crate::tracker::SignalTracker;

/// Everything the scanner needs to pick up where it left off after a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerState {
    #[serde(flatten)]
    pub tracker: SignalTracker,
    /// Last alert per "SYMBOL:TF".
    #[serde(default)]
    pub last_alert: HashMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub total_scans: u64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ScannerState {
    pub fn new() -> Self {
        Self {
            last_updated: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn increment_scans(&mut self) {
        self.total_scans += 1;
        self.last_updated = Some(Utc::now());
    }

    pub fn last_alert_for(&self, symbol: &str, timeframe: Timeframe) -> Option<DateTime<Utc>> {
        self.last_alert.get(&alert_key(symbol, timeframe)).copied()
    }

    pub fn record_alert(&mut self, symbol: &str, timeframe: Timeframe, at: DateTime<Utc>) {
        self.last_alert.insert(alert_key(symbol, timeframe), at);
    }

    /// True while the last alert for the pair is younger than `cooldown_secs`.
    pub fn in_cooldown(&self, symbol: &str, timeframe: Timeframe, cooldown_secs: u64, at: DateTime<Utc>) -> bool {
        self.last_alert_for(symbol, timeframe)
            .is_some_and(|last| (at - last).num_seconds() < cooldown_secs as i64)
    }
}

/// JSON snapshot of `ScannerState` on disk.
#[derive(Debug, Clone)]
pub struct StateStore {
    file_path: PathBuf,
}

impl StateStore {
    pub fn new(file_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn load(&self) -> ScannerState {
        if !self.file_path.exists() {
            info!("📁 No existing scanner state at {}, starting fresh", self.file_path.display());
            return ScannerState::new();
        }

        match fs::read_to_string(&self.file_path) {
            Ok(content) => match serde_json::from_str::<ScannerState>(&content) {
                Ok(state) => {
                    info!(
                        "✅ Loaded scanner state: {} open, {} closed signals, {} scans",
                        state.tracker.open().len(),
                        state.tracker.closed().len(),
                        state.total_scans
                    );
                    state
                }
                Err(e) => {
                    error!("❌ Failed to parse scanner state file: {}", e);
                    warn!("🔄 Starting with a fresh scanner state");
                    ScannerState::new()
                }
            },
            Err(e) => {
                error!("❌ Failed to read scanner state file: {}", e);
                warn!("🔄 Starting with a fresh scanner state");
                ScannerState::new()
            }
        }
    }

    pub fn save(&self, state: &ScannerState) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .wrap_err_with(|| format!("Failed to create state directory {}", parent.display()))?;
            }
        }

        let json = serde_json::to_string_pretty(state).wrap_err("Failed to serialize scanner state")?;
        fs::write(&self.file_path, json)
            .wrap_err_with(|| format!("Failed to write scanner state to {}", self.file_path.display()))?;
        Ok(())
    }

    /// Copy the current snapshot next to itself with a timestamp suffix.
    pub fn backup(&self) -> Result<Option<PathBuf>> {
        if !self.file_path.exists() {
            return Ok(None);
        }
        let backup_path = PathBuf::from(format!(
            "{}.backup.{}",
            self.file_path.display(),
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        fs::copy(&self.file_path, &backup_path)
            .wrap_err_with(|| format!("Failed to back up scanner state to {}", backup_path.display()))?;
        info!("🔄 Created backup at {}", backup_path.display());
        Ok(Some(backup_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cooldown_per_pair() {
        let mut state = ScannerState::new();
        let now = Utc::now();
        state.record_alert("BTCUSD", Timeframe::M5, now);

        assert!(state.in_cooldown("BTCUSD", Timeframe::M5, 60, now + Duration::seconds(30)));
        assert!(!state.in_cooldown("BTCUSD", Timeframe::M5, 60, now + Duration::seconds(61)));
        assert!(!state.in_cooldown("BTCUSD", Timeframe::M15, 60, now));
        assert!(!state.in_cooldown("XAUUSD", Timeframe::M5, 60, now));
        assert!(state.last_alert.contains_key("BTCUSD:M5"));
    }

    #[test]
    fn test_increment_scans() {
        let mut state = ScannerState::default();
        assert!(state.last_updated.is_none());
        state.increment_scans();
        state.increment_scans();
        assert_eq!(state.total_scans, 2);
        assert!(state.last_updated.is_some());
    }
}
