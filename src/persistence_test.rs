#[cfg(test)]
mod tests {

    use crate::market::Timeframe;
    use crate::persistence::{ScannerState, StateStore};
    use crate::signal::SignalStatus;
    use crate::signal::fixtures::{buy_signal, sell_signal};
    use chrono::Utc;
    use std::fs;

    #[test]
    fn test_persistence_system() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join("scanner_state.json"));

        // Missing file gives a fresh state
        let mut state = store.load();
        assert_eq!(state.total_scans, 0);
        assert!(state.tracker.open().is_empty());

        let now = Utc::now();
        state.tracker.add(buy_signal("XAUUSD", 2000.0, 1990.0));
        state.tracker.add(sell_signal("BTCUSD", 60_000.0, 60_500.0));
        // first XAUUSD target, then the BTCUSD stop
        state.tracker.update("XAUUSD", 2015.5, now);
        state.tracker.update("BTCUSD", 60_600.0, now);
        state.record_alert("XAUUSD", Timeframe::M5, now);
        state.increment_scans();

        store.save(&state).expect("Failed to save state");

        // Flattened tracker keys sit at the top level
        let raw = fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(json.get("open_signals").is_some());
        assert!(json.get("closed_signals").is_some());
        assert_eq!(json["last_alert"].as_object().map(|m| m.len()), Some(1));

        let loaded = store.load();
        assert_eq!(loaded.total_scans, 1);
        assert_eq!(loaded.tracker.open().len(), 1);
        assert_eq!(loaded.tracker.open()[0].status, SignalStatus::Tp1Hit);
        assert_eq!(loaded.tracker.closed().len(), 1);
        assert_eq!(loaded.tracker.closed()[0].status, SignalStatus::SlHit);
        assert!(loaded.in_cooldown("XAUUSD", Timeframe::M5, 60, now));

        let backup = store.backup().unwrap().expect("backup path");
        assert!(backup.exists());
    }

    #[test]
    fn test_corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner_state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = StateStore::new(&path);
        let state: ScannerState = store.load();
        assert_eq!(state.total_scans, 0);
        assert!(state.tracker.closed().is_empty());
    }
}
