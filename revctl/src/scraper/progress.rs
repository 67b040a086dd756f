//! Shared progress snapshot for the running ingestion pass.
//!
//! Single writer (the scrape task), many readers (status calls). Scalar
//! fields are best-effort consistent behind one lock; the log ring is a
//! bounded append capped at 100 entries.

use chrono::{NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;

use crate::types::AppId;

const LOG_CAPACITY: usize = 100;
/// Reviews returned per upstream request
const PAGE_SIZE: f64 = 100.0;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CurrentGame {
    pub app_id: AppId,
    pub name: String,
}

/// Point-in-time view of the ingestion run, with ETAs derived from the
/// configured rate limit and the observed throughput.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub is_running: bool,
    pub current_game: Option<CurrentGame>,
    pub current_game_scraped: i64,
    pub current_game_total: i64,
    pub global_scraped: i64,
    pub global_total: i64,
    pub avg_request_seconds: f64,
    pub requests_made: i64,
    pub start_time: Option<NaiveDateTime>,
    pub start_global_scraped: i64,
    pub rate_limit_rpm: u32,
    pub stop_requested: bool,
    pub eta_seconds_current: i64,
    pub eta_seconds_global: i64,
    pub logs: Vec<String>,
}

#[derive(Debug, Default)]
struct ProgressState {
    is_running: bool,
    current_game: Option<CurrentGame>,
    current_game_scraped: i64,
    current_game_total: i64,
    global_scraped: i64,
    global_total: i64,
    avg_request_seconds: f64,
    requests_made: i64,
    start_time: Option<NaiveDateTime>,
    start_global_scraped: i64,
    rate_limit_rpm: u32,
    stop_requested: bool,
    logs: VecDeque<String>,
}

impl ProgressState {
    /// Requests/sec the configured rate limit allows at full pages.
    fn theoretical_rps(&self) -> f64 {
        f64::from(self.rate_limit_rpm) * PAGE_SIZE / 60.0
    }

    /// Reviews/sec to plan with: the observed rate when we have one,
    /// otherwise 90% of the theoretical ceiling, never above the ceiling.
    fn expected_rps(&self, now: NaiveDateTime) -> f64 {
        let theoretical = self.theoretical_rps();
        let observed = match self.start_time {
            Some(start) => {
                let elapsed = (now - start).num_milliseconds() as f64 / 1000.0;
                if elapsed > 0.0 {
                    (self.global_scraped - self.start_global_scraped) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        if observed > 0.0 {
            theoretical.min(observed)
        } else {
            0.9 * theoretical
        }
    }

    fn eta_seconds(&self, remaining: i64, now: NaiveDateTime) -> i64 {
        if remaining <= 0 {
            return 0;
        }
        let expected = self.expected_rps(now);
        if expected <= 0.0 {
            return 0;
        }
        (remaining as f64 / expected) as i64
    }
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    state: RwLock<ProgressState>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset counters for a fresh run.
    pub fn start_run(&self, rate_limit_rpm: u32) {
        let mut state = self.state.write();
        *state = ProgressState {
            is_running: true,
            rate_limit_rpm,
            start_time: Some(Utc::now().naive_utc()),
            ..ProgressState::default()
        };
    }

    /// Append an ISO-timestamped log line, dropping the oldest beyond the cap.
    pub fn log(&self, message: impl AsRef<str>) {
        let mut state = self.state.write();
        let line = format!("{} {}", Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f"), message.as_ref());
        tracing::info!(target: "revctl::scraper", "{}", message.as_ref());
        state.logs.push_back(line);
        while state.logs.len() > LOG_CAPACITY {
            state.logs.pop_front();
        }
    }

    pub fn set_current_game(&self, game: Option<CurrentGame>) {
        let mut state = self.state.write();
        state.current_game = game;
        state.current_game_scraped = 0;
        state.current_game_total = 0;
    }

    pub fn set_current_game_total(&self, total: i64) {
        self.state.write().current_game_total = total;
    }

    pub fn current_game_total(&self) -> i64 {
        self.state.read().current_game_total
    }

    pub fn add_scraped(&self, count: i64) {
        let mut state = self.state.write();
        state.current_game_scraped += count;
        state.global_scraped += count;
    }

    pub fn set_global_total(&self, total: i64) {
        self.state.write().global_total = total;
    }

    pub fn adjust_global_total(&self, delta: i64) {
        self.state.write().global_total += delta;
    }

    /// Record one upstream request and fold its latency into the running
    /// mean.
    pub fn record_request(&self, elapsed_seconds: f64) {
        let mut state = self.state.write();
        state.requests_made += 1;
        if state.avg_request_seconds <= 0.0 {
            state.avg_request_seconds = elapsed_seconds;
        } else {
            state.avg_request_seconds = (state.avg_request_seconds
                * (state.requests_made - 1) as f64
                + elapsed_seconds)
                / state.requests_made as f64;
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.read().is_running
    }

    pub fn stop_requested(&self) -> bool {
        self.state.read().stop_requested
    }

    /// Request cooperative cancellation. Returns false when no run is
    /// active.
    pub fn request_stop(&self) -> bool {
        let mut state = self.state.write();
        if !state.is_running {
            return false;
        }
        state.stop_requested = true;
        true
    }

    pub fn finish_run(&self) {
        let mut state = self.state.write();
        state.is_running = false;
        state.current_game = None;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.read();
        let now = Utc::now().naive_utc();
        let current_remaining = state.current_game_total - state.current_game_scraped;
        let global_remaining = state.global_total - state.global_scraped;
        ProgressSnapshot {
            is_running: state.is_running,
            current_game: state.current_game.clone(),
            current_game_scraped: state.current_game_scraped,
            current_game_total: state.current_game_total,
            global_scraped: state.global_scraped,
            global_total: state.global_total,
            avg_request_seconds: state.avg_request_seconds,
            requests_made: state.requests_made,
            start_time: state.start_time,
            start_global_scraped: state.start_global_scraped,
            rate_limit_rpm: state.rate_limit_rpm,
            stop_requested: state.stop_requested,
            eta_seconds_current: state.eta_seconds(current_remaining, now),
            eta_seconds_global: state.eta_seconds(global_remaining, now),
            logs: state.logs.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ring_is_capped() {
        let tracker = ProgressTracker::new();
        for i in 0..150 {
            tracker.log(format!("line {i}"));
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.logs.len(), 100);
        assert!(snapshot.logs[0].contains("line 50"));
        assert!(snapshot.logs[99].contains("line 149"));
    }

    #[test]
    fn request_latency_running_mean() {
        let tracker = ProgressTracker::new();
        tracker.record_request(1.0);
        tracker.record_request(3.0);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.requests_made, 2);
        assert!((snapshot.avg_request_seconds - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn eta_uses_discounted_theoretical_rate_before_any_progress() {
        let tracker = ProgressTracker::new();
        tracker.start_run(60);
        tracker.set_global_total(9000);
        // theoretical = 60 * 100 / 60 = 100 rps; expected = 90 rps
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.eta_seconds_global, 100);
    }

    #[test]
    fn eta_zero_when_nothing_remains() {
        let tracker = ProgressTracker::new();
        tracker.start_run(60);
        tracker.set_global_total(0);
        assert_eq!(tracker.snapshot().eta_seconds_global, 0);
    }

    #[test]
    fn stop_only_applies_to_active_runs() {
        let tracker = ProgressTracker::new();
        assert!(!tracker.request_stop());
        tracker.start_run(60);
        assert!(tracker.request_stop());
        assert!(tracker.stop_requested());
    }
}
