//! In-memory connectivity statistics
//!
//! Counts, recent round-trip times and downtime episodes for the ping probe.
//! Nothing here is persisted.

use crate::probe::PingOutcome;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Samples kept for RTT figures and the failure breakdown
const RECENT_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RttSummary {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
}

/// What a single recorded ping changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingTransition {
    /// Reply while up
    Up,
    /// Reply that ended a downtime episode of the given length
    Recovered(Duration),
    /// First loss of a new episode
    WentDown,
    /// Further loss inside an episode, down for the given time so far
    StillDown(Duration),
}

#[derive(Debug)]
pub struct ConnectivityStats {
    started: Instant,
    started_at: DateTime<Local>,
    pings: u64,
    successes: u64,
    failures: u64,
    recent_rtts: VecDeque<f64>,
    recent_failures: VecDeque<String>,
    downtime_start: Option<Instant>,
    total_downtime: Duration,
    max_downtime: Duration,
}

impl Default for ConnectivityStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Local::now(),
            pings: 0,
            successes: 0,
            failures: 0,
            recent_rtts: VecDeque::with_capacity(RECENT_WINDOW),
            recent_failures: VecDeque::with_capacity(RECENT_WINDOW),
            downtime_start: None,
            total_downtime: Duration::ZERO,
            max_downtime: Duration::ZERO,
        }
    }

    pub fn record(&mut self, outcome: &PingOutcome) -> PingTransition {
        if outcome.success {
            self.record_success(outcome.rtt_ms.unwrap_or_default())
        } else {
            self.record_failure(outcome.error.as_deref().unwrap_or("Ping failed"))
        }
    }

    pub fn record_success(&mut self, rtt_ms: f64) -> PingTransition {
        self.pings += 1;
        self.successes += 1;
        push_bounded(&mut self.recent_rtts, rtt_ms);

        match self.downtime_start.take() {
            Some(start) => {
                let downtime = start.elapsed();
                self.total_downtime += downtime;
                self.max_downtime = self.max_downtime.max(downtime);
                PingTransition::Recovered(downtime)
            }
            None => PingTransition::Up,
        }
    }

    pub fn record_failure(&mut self, error: &str) -> PingTransition {
        self.pings += 1;
        self.failures += 1;
        push_bounded(&mut self.recent_failures, error.to_string());

        match self.downtime_start {
            Some(start) => PingTransition::StillDown(start.elapsed()),
            None => {
                self.downtime_start = Some(Instant::now());
                PingTransition::WentDown
            }
        }
    }

    /// Wall-clock time the statistics started
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn pings(&self) -> u64 {
        self.pings
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn success_rate(&self) -> f64 {
        percent(self.successes, self.pings)
    }

    pub fn loss_rate(&self) -> f64 {
        percent(self.failures, self.pings)
    }

    pub fn rtt(&self) -> Option<RttSummary> {
        if self.recent_rtts.is_empty() {
            return None;
        }
        let min_ms = self.recent_rtts.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = self.recent_rtts.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg_ms = self.recent_rtts.iter().sum::<f64>() / self.recent_rtts.len() as f64;
        Some(RttSummary {
            min_ms,
            avg_ms,
            max_ms,
        })
    }

    /// Length of the ongoing downtime episode, if down
    pub fn current_downtime(&self) -> Option<Duration> {
        self.downtime_start.map(|start| start.elapsed())
    }

    /// Sum of completed downtime episodes
    pub fn total_downtime(&self) -> Duration {
        self.total_downtime
    }

    pub fn max_downtime(&self) -> Duration {
        self.max_downtime
    }

    /// Recent failures grouped by message, most frequent first
    pub fn failure_breakdown(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for failure in &self.recent_failures {
            *counts.entry(failure.as_str()).or_default() += 1;
        }
        let mut breakdown: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(msg, n)| (msg.to_string(), n))
            .collect();
        breakdown.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        breakdown
    }

    /// One-line running summary
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "Stats: {}/{} ({:.1}%)",
            self.successes,
            self.pings,
            self.success_rate()
        );
        if let Some(rtt) = self.rtt() {
            line.push_str(&format!(
                " | RTT: {:.1}ms (min: {:.1}ms, max: {:.1}ms)",
                rtt.avg_ms, rtt.min_ms, rtt.max_ms
            ));
        }
        if let Some(down) = self.current_downtime() {
            line.push_str(&format!(" | DOWNTIME: {:.1}s", down.as_secs_f64()));
        }
        line
    }

    /// Emit the final statistics block
    pub fn log_final(&self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        info!(
            "FINAL STATISTICS (since {})",
            self.started_at.format("%Y-%m-%d %H:%M:%S")
        );
        info!("Total pings: {}", self.pings);
        info!("Successful: {}", self.successes);
        info!("Failed (cumulative losses): {}", self.failures);
        info!("Success rate: {:.1}%", self.success_rate());
        info!("Loss rate: {:.1}%", self.loss_rate());
        info!("Total time: {:.1}s ({:.1} minutes)", elapsed, elapsed / 60.0);
        if let Some(rtt) = self.rtt() {
            info!(
                "RTT - Avg: {:.1}ms, Min: {:.1}ms, Max: {:.1}ms",
                rtt.avg_ms, rtt.min_ms, rtt.max_ms
            );
        }
        if self.failures > 0 {
            warn!("Total downtime: {:.1}s", self.total_downtime.as_secs_f64());
            warn!("Max downtime episode: {:.1}s", self.max_downtime.as_secs_f64());
            warn!("Failure breakdown:");
            for (failure, count) in self.failure_breakdown() {
                warn!("  - {}: {} times", failure, count);
            }
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T) {
    if queue.len() == RECENT_WINDOW {
        queue.pop_front();
    }
    queue.push_back(value);
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
