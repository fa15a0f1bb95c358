use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use color_eyre::Section;
use color_eyre::eyre::{Result, WrapErr, eyre};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::Config;
use crate::market::{MarketDataSource, Timeframe, fetch_with_retry};
use crate::notify::{AlertLevel, Notifier, format_outcome, format_performance, format_signal, format_system};
use crate::persistence::{ScannerState, StateStore};
use crate::quality::{QualityFilter, estimate_tp_probability};
use crate::risk::{DailyStats, RiskManager};
use crate::session::{SessionAction, SessionClock};
use crate::signal::{Evaluation, SignalGenerator};
use crate::tracker::Outcome;
use crate::utils::to_precision::round_to;

pub type SharedState = Arc<RwLock<ScannerState>>;

/// Open signals older than this are closed as expired.
const SIGNAL_MAX_AGE_HOURS: i64 = 24;
const MARKET_CLOSED_SLEEP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanSummary {
    pub scan: u64,
    pub evaluated: usize,
    pub signals: usize,
    pub outcomes: usize,
    pub rejected: usize,
    pub filtered: usize,
    pub blocked: usize,
    pub cooldown: usize,
    pub errors: usize,
}

/// What happened to one symbol/timeframe pair during a scan.
enum PairResult {
    NoSetup,
    Cooldown,
    Blocked,
    Rejected,
    Filtered,
    Signalled,
}

/// One scan loop over every configured symbol and timeframe.
pub struct Scanner {
    config: Arc<Config>,
    source: Arc<dyn MarketDataSource>,
    generator: SignalGenerator,
    risk: RiskManager,
    quality: QualityFilter,
    clock: SessionClock,
    notifier: Arc<dyn Notifier>,
    store: StateStore,
    state: SharedState,
    started_at: DateTime<Utc>,
    frozen_at: Option<DateTime<Utc>>,
}

impl Scanner {
    /// Restores the last snapshot from `config.state_file`, keeping a
    /// timestamped copy before it is first overwritten.
    pub fn new(config: Config, source: Arc<dyn MarketDataSource>, notifier: Arc<dyn Notifier>) -> Self {
        let store = StateStore::new(&config.state_file);
        let state = store.load();
        if let Err(e) = store.backup() {
            warn!("⚠️ Could not back up scanner state: {:#}", e);
        }
        Self {
            risk: RiskManager::from_config(&config),
            quality: QualityFilter::from_config(&config),
            config: Arc::new(config),
            source,
            generator: SignalGenerator::default(),
            clock: SessionClock,
            notifier,
            store,
            state: Arc::new(RwLock::new(state)),
            started_at: Utc::now(),
            frozen_at: None,
        }
    }

    /// Pin the scanner's clock, for replaying a given market moment.
    pub fn frozen_at(mut self, at: DateTime<Utc>) -> Self {
        self.frozen_at = Some(at);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.frozen_at.unwrap_or_else(Utc::now)
    }

    pub fn with_generator(mut self, generator: SignalGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &dyn MarketDataSource {
        self.source.as_ref()
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Evaluate a pair on demand. Nothing is tracked or sent.
    pub async fn analyze(&self, symbol: &str, timeframe: Timeframe) -> Result<Evaluation> {
        let symbol = symbol.to_uppercase();
        let candles = self
            .source
            .fetch_candles(&symbol, timeframe, self.config.history_bars)
            .await
            .wrap_err_with(|| format!("Failed to fetch {} {} from {}", symbol, timeframe, self.source.name()))?;
        Ok(self.generator.evaluate(&symbol, timeframe, &candles))
    }

    async fn notify(&self, text: &str) {
        match self.notifier.send(text).await {
            Ok(chats) => debug!("Notification delivered to {} chats", chats),
            Err(e) => warn!("⚠️ Failed to deliver notification: {:#}", e),
        }
    }

    async fn notify_outcomes(&self, outcomes: &[Outcome]) {
        for outcome in outcomes {
            self.notify(&format_outcome(outcome)).await;
        }
    }

    fn daily_stats(&self, state: &ScannerState, now: DateTime<Utc>) -> DailyStats {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);
        let pnl_pct = state.tracker.pnl_pct_since(midnight);
        DailyStats {
            pnl_pct,
            equity: self.config.account_balance * (1.0 + pnl_pct / 100.0),
        }
    }

    /// Run every symbol and timeframe once, then persist the state.
    pub async fn scan_once(&self) -> Result<ScanSummary> {
        let scan = {
            let mut state = self.state.write().await;
            state.increment_scans();
            state.total_scans
        };
        let span = info_span!("scan", scan);
        self.scan_inner(scan).instrument(span).await
    }

    async fn scan_inner(&self, scan: u64) -> Result<ScanSummary> {
        let mut summary = ScanSummary {
            scan,
            ..Default::default()
        };
        let now = self.now();

        let expired = {
            let mut state = self.state.write().await;
            state.tracker.expire(ChronoDuration::hours(SIGNAL_MAX_AGE_HOURS), now)
        };
        summary.outcomes += expired.len();
        self.notify_outcomes(&expired).await;

        let mut prices = HashMap::new();
        for symbol in self.config.symbols() {
            match self.source.current_price(&symbol).await {
                Ok(price) => {
                    prices.insert(symbol.clone(), price);
                    let outcomes = {
                        let mut state = self.state.write().await;
                        state.tracker.update(&symbol, price, now)
                    };
                    summary.outcomes += outcomes.len();
                    self.notify_outcomes(&outcomes).await;
                }
                Err(e) => {
                    warn!("⚠️ No price for {}: {:#}", symbol, e);
                    summary.errors += 1;
                }
            }
        }

        let limits = {
            let state = self.state.read().await;
            let open_count = state.tracker.open().iter().filter(|s| s.status.is_active()).count();
            self.risk
                .check_limits(&self.daily_stats(&state, now), self.config.account_balance, open_count)
        };
        if !limits.approved {
            warn!("🛑 New signals paused: {}", limits.reason);
        }

        for symbol in self.config.symbols() {
            for timeframe in self.config.timeframes() {
                let span = info_span!("symbol_scan", symbol = symbol.as_str(), timeframe = timeframe.label());
                let result = self
                    .scan_pair(&symbol, timeframe, limits.approved, prices.get(&symbol).copied())
                    .instrument(span)
                    .await;
                match result {
                    Ok(outcome) => {
                        summary.evaluated += 1;
                        match outcome {
                            PairResult::Signalled => summary.signals += 1,
                            PairResult::Rejected => summary.rejected += 1,
                            PairResult::Filtered => summary.filtered += 1,
                            PairResult::Blocked => summary.blocked += 1,
                            PairResult::Cooldown => summary.cooldown += 1,
                            PairResult::NoSetup => {}
                        }
                    }
                    Err(e) => {
                        error!("❌ Error scanning {} {}: {:#}", symbol, timeframe, e);
                        summary.errors += 1;
                    }
                }
            }
        }

        let snapshot = self.state.read().await.clone();
        self.store.save(&snapshot)?;

        if summary.evaluated == 0 && summary.errors > 0 {
            return Err(eyre!("scan #{} failed: no market data for any pair ({} errors)", scan, summary.errors));
        }
        Ok(summary)
    }

    async fn scan_pair(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        allowed: bool,
        current_price: Option<f64>,
    ) -> Result<PairResult> {
        let candles = fetch_with_retry(
            self.source.as_ref(),
            symbol,
            timeframe,
            self.config.history_bars,
            self.config.min_bars,
            self.config.fetch_retries,
            Duration::from_millis(self.config.fetch_retry_delay_ms),
        )
        .await?;

        let evaluation = self.generator.evaluate(symbol, timeframe, &candles);
        let Some(mut signal) = evaluation.signal else {
            debug!("No signal: {}", evaluation.reason.as_deref().unwrap_or("-"));
            return Ok(PairResult::NoSetup);
        };
        if !allowed {
            return Ok(PairResult::Blocked);
        }

        let now = self.now();
        if self
            .state
            .read()
            .await
            .in_cooldown(symbol, timeframe, self.config.cooldown_secs, now)
        {
            debug!("⏳ {} {} still in cooldown", symbol, timeframe);
            return Ok(PairResult::Cooldown);
        }

        let recommendation = self.clock.recommendation(symbol, now);
        if recommendation.action == SessionAction::AvoidTrading && !self.config.signal_only_mode {
            info!(
                "⏭️ Skipping {} signal, session score {:.2} (next: {:?} in {}h)",
                signal.side, recommendation.score, recommendation.next_optimal.session, recommendation.next_optimal.hours_until
            );
            return Ok(PairResult::Blocked);
        }
        signal.confidence = round_to(
            (signal.confidence + recommendation.multipliers.confidence_boost).min(1.0),
            2,
        );
        signal.session_score = Some(round_to(recommendation.score, 2));

        let open = self.state.read().await.tracker.open().to_vec();
        let decision = self.risk.validate(&signal, self.config.account_balance, &open);
        if !decision.approved {
            info!("🚫 {} signal rejected: {}", signal.side, decision.reason);
            return Ok(PairResult::Rejected);
        }
        signal.position_size = Some(self.risk.position_size(&signal, self.config.account_balance, &open));

        let estimate = {
            let state = self.state.read().await;
            estimate_tp_probability(&signal, &candles, state.tracker.closed())
        }
        .with_session(recommendation.multipliers.probability);
        signal.tp_probability = Some(estimate.probability_pct);
        signal.expected_value = Some(estimate.expected_value);
        if self.config.quality_filter {
            let verdict = self.quality.check(&signal, &estimate, current_price);
            if !verdict.passed {
                info!("🚫 {} signal filtered: {}", signal.side, verdict.failures.join("; "));
                return Ok(PairResult::Filtered);
            }
        }

        info!(
            "📣 {} {} {} entry {:.5} SL {:.5} conf {:.2}",
            signal.side, symbol, timeframe, signal.entry, signal.stop_loss, signal.confidence
        );
        self.notify(&format_signal(&signal)).await;

        let mut state = self.state.write().await;
        state.record_alert(symbol, timeframe, now);
        state.tracker.add(signal);
        Ok(PairResult::Signalled)
    }

    /// Scan until `shutdown` flips to true or the error budget runs out.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let symbols = self.config.symbols();
        let interval = Duration::from_secs(self.config.scan_interval_secs.max(1));
        self.notify(&format_system(
            AlertLevel::Info,
            &format!(
                "Scanner started: {} on {:?} via {}, every {}s",
                symbols.join(", "),
                self.config.timeframes().iter().map(|t| t.label()).collect::<Vec<_>>(),
                self.source.name(),
                interval.as_secs()
            ),
        ))
        .await;

        let mut consecutive_errors = 0usize;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let started = Instant::now();

            if !self.clock.is_market_open(&symbols, self.now()) {
                info!("💤 Market closed, checking again in {}s", MARKET_CLOSED_SLEEP.as_secs());
                if sleep_or_shutdown(&mut shutdown, MARKET_CLOSED_SLEEP).await {
                    break;
                }
                continue;
            }

            match self.scan_once().await {
                Ok(summary) => {
                    consecutive_errors = 0;
                    info!(
                        "✅ Scan #{} done: {} pairs, {} signals, {} outcomes, {} rejected, {} filtered, {} errors",
                        summary.scan,
                        summary.evaluated,
                        summary.signals,
                        summary.outcomes,
                        summary.rejected,
                        summary.filtered,
                        summary.errors
                    );
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        "❌ Scan failed ({}/{}): {:#}",
                        consecutive_errors, self.config.max_consecutive_errors, e
                    );
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        self.notify(&format_system(
                            AlertLevel::Error,
                            &format!("Scanner stopped after {} consecutive errors: {:#}", consecutive_errors, e),
                        ))
                        .await;
                        return Err(e)
                            .wrap_err("Too many consecutive scan errors")
                            .with_suggestion(|| "Check the data source and network connectivity");
                    }
                    let backoff = Duration::from_secs((10 * consecutive_errors as u64).min(60));
                    warn!("🔄 Retrying in {}s", backoff.as_secs());
                    if sleep_or_shutdown(&mut shutdown, backoff).await {
                        break;
                    }
                    continue;
                }
            }

            let wait = interval.saturating_sub(started.elapsed()).max(Duration::from_secs(1));
            if sleep_or_shutdown(&mut shutdown, wait).await {
                break;
            }
        }

        info!("🛑 Scanner shutting down");
        let snapshot = self.state.read().await.clone();
        if let Err(e) = self.store.save(&snapshot) {
            error!("❌ Failed to save scanner state on shutdown: {:#}", e);
        }
        let stopped = format_system(
            AlertLevel::Info,
            &format!("Scanner stopped after {} scans", snapshot.total_scans),
        );
        let perf = format_performance(&snapshot.tracker.performance(), self.now());
        self.notify(&format!("{}\n\n{}", stopped, perf)).await;
        Ok(())
    }
}

/// Returns true when shutdown was requested (or the sender is gone).
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::market::MockFeed;
    use crate::signal::fixtures::buy_signal;
    use crate::signal::generator::test_series::uptrend;
    use chrono::TimeZone;

    /// Tuesday, inside the London/New York overlap.
    fn overlap() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
    }

    fn uptrend_source() -> Arc<FixedSource> {
        Arc::new(FixedSource {
            candles: uptrend(80, 1_000.0),
        })
    }

    fn config(dir: &tempfile::TempDir, symbols: &str, timeframes: &str) -> Config {
        Config {
            state_file: dir.path().join("state.json").display().to_string(),
            fetch_retries: 0,
            fetch_retry_delay_ms: 1,
            max_consecutive_errors: 1,
            ..Default::default()
        }
        .with_symbols(symbols)
        .with_timeframes(timeframes)
    }

    #[tokio::test]
    async fn test_scan_emits_signal_then_cools_down() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FixedSource {
            candles: uptrend(80, 1_000.0),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let scanner = Scanner::new(config(&dir, "XAUUSD", "M5"), source, notifier.clone()).frozen_at(overlap());

        let first = scanner.scan_once().await.unwrap();
        assert_eq!(first.scan, 1);
        assert_eq!(first.evaluated, 1);
        assert_eq!(first.signals, 1);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("NEW SIGNAL: BUY XAUUSD M5"));

        {
            let state = scanner.state();
            let state = state.read().await;
            let signal = &state.tracker.open()[0];
            assert!(signal.position_size.is_some());
            assert!(signal.session_score.is_some());
            assert!(signal.tp_probability.is_some_and(|p| p >= 45.0));
            assert!(signal.expected_value.is_some_and(|ev| ev > 0.0));
            assert!(state.last_alert.contains_key("XAUUSD:M5"));
        }

        let second = scanner.scan_once().await.unwrap();
        assert_eq!(second.signals, 0);
        assert_eq!(second.cooldown, 1);

        // the snapshot survives a restart
        let restored = StateStore::new(dir.path().join("state.json")).load();
        assert_eq!(restored.total_scans, 2);
        assert_eq!(restored.tracker.open().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_with_mock_feed_runs_every_pair() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(MockFeed::seeded(11).with_trend("BTCUSD", 0.001));
        let notifier = Arc::new(RecordingNotifier::default());
        let scanner = Scanner::new(config(&dir, "BTCUSD,XAUUSD", "M5,M15"), source, notifier);

        let summary = scanner.scan_once().await.unwrap();
        assert_eq!(summary.evaluated, 4);
        assert_eq!(summary.errors, 0);
        assert!(dir.path().join("state.json").exists());
    }

    #[tokio::test]
    async fn test_scan_fails_when_source_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let scanner = Scanner::new(config(&dir, "BTCUSD", "M5"), Arc::new(DownSource), notifier);

        assert!(scanner.scan_once().await.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_after_error_budget() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let scanner = Scanner::new(config(&dir, "BTCUSD", "M5"), Arc::new(DownSource), notifier.clone());
        let (_tx, rx) = watch::channel(false);

        assert!(scanner.run(rx).await.is_err());
        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("Scanner started"));
        assert!(sent[1].starts_with("<b>ERROR</b>"));
    }

    #[tokio::test]
    async fn test_run_honours_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let source = Arc::new(FixedSource {
            candles: uptrend(80, 1_000.0),
        });
        let scanner = Scanner::new(config(&dir, "BTCUSD", "M5"), source, notifier.clone());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        scanner.run(rx).await.unwrap();
        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("Scanner stopped"));
    }

    #[tokio::test]
    async fn test_analyze_does_not_track() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FixedSource {
            candles: uptrend(80, 1_000.0),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let scanner = Scanner::new(config(&dir, "XAUUSD", "M5"), source, notifier.clone());

        let eval = scanner.analyze("xauusd", Timeframe::M5).await.unwrap();
        assert_eq!(eval.symbol, "XAUUSD");
        assert!(eval.signal.is_some());
        assert!(notifier.sent().is_empty());
        assert!(scanner.state().read().await.tracker.open().is_empty());
    }

    #[tokio::test]
    async fn test_position_size_respects_symbol_cap() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        // overlap session boosts BTCUSD, the size must still stop at 0.5 lots
        let scanner =
            Scanner::new(config(&dir, "BTCUSD", "M5"), uptrend_source(), notifier).frozen_at(overlap());

        let summary = scanner.scan_once().await.unwrap();
        assert_eq!(summary.signals, 1);
        let state = scanner.state();
        let state = state.read().await;
        assert_eq!(state.tracker.open()[0].position_size, Some(0.5));
    }

    #[tokio::test]
    async fn test_quality_gate_filters_signal() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut config = config(&dir, "BTCUSD", "M5");
        config.preferred_timeframes_only = true;
        let scanner = Scanner::new(config, uptrend_source(), notifier.clone()).frozen_at(overlap());

        let summary = scanner.scan_once().await.unwrap();
        assert_eq!(summary.filtered, 1);
        assert_eq!(summary.signals, 0);
        assert!(notifier.sent().is_empty());
        assert!(scanner.state().read().await.tracker.open().is_empty());
    }

    #[tokio::test]
    async fn test_daily_loss_pauses_new_signals() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut config = config(&dir, "XAUUSD", "M5");
        config.signal_only_mode = false;
        config.daily_loss_limit = 0.001;
        let scanner = Scanner::new(config, uptrend_source(), notifier.clone()).frozen_at(overlap());
        {
            let state = scanner.state();
            let mut state = state.write().await;
            state.tracker.add(buy_signal("XAUUSD", 2000.0, 1990.0));
            state.tracker.update("XAUUSD", 1980.0, overlap());
            assert!(state.tracker.open().is_empty());
        }

        let summary = scanner.scan_once().await.unwrap();
        assert_eq!(summary.evaluated, 1);
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.signals, 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_quiet_session_blocks_outside_signal_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut config = config(&dir, "EURUSD", "M5");
        config.signal_only_mode = false;
        // Sydney only: EURUSD scores well under 0.4
        let late = Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap();
        assert_eq!(
            SessionClock.recommendation("EURUSD", late).action,
            SessionAction::AvoidTrading
        );
        let scanner = Scanner::new(config, uptrend_source(), notifier.clone()).frozen_at(late);

        let summary = scanner.scan_once().await.unwrap();
        assert_eq!(summary.blocked, 1);
        assert_eq!(summary.signals, 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_waits_while_market_closed() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        let scanner =
            Scanner::new(config(&dir, "EURUSD", "M5"), uptrend_source(), notifier.clone()).frozen_at(saturday);
        let (tx, rx) = watch::channel(false);

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(scanner.run(rx), stop);

        result.unwrap();
        assert_eq!(scanner.state().read().await.total_scans, 0);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains("Scanner stopped after 0 scans"));
    }

    #[tokio::test]
    async fn test_restart_backs_up_existing_state() {
        let dir = tempfile::tempdir().unwrap();
        let backups = || {
            std::fs::read_dir(dir.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
                .count()
        };

        let first = Scanner::new(
            config(&dir, "XAUUSD", "M5"),
            uptrend_source(),
            Arc::new(RecordingNotifier::default()),
        );
        assert_eq!(backups(), 0);
        first.scan_once().await.unwrap();

        let restarted = Scanner::new(
            config(&dir, "XAUUSD", "M5"),
            uptrend_source(),
            Arc::new(RecordingNotifier::default()),
        );
        assert_eq!(backups(), 1);
        assert_eq!(restarted.state().read().await.total_scans, 1);
    }
}
