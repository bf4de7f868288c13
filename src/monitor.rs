//! Read-only connectivity monitor
//!
//! Pings a host through the wwan interface at a fixed interval, tracking
//! loss, latency and downtime. Never changes any state.

use crate::modem::ModemStatusReader;
use crate::probe::Prober;
use crate::stats::{ConnectivityStats, PingTransition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

const STATS_EVERY: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interface: String,
    pub host: String,
    pub interval: Duration,
    /// Stop after this long; `None` runs until shutdown
    pub duration: Option<Duration>,
}

pub struct PingMonitor {
    prober: Arc<dyn Prober>,
    reader: Option<Arc<ModemStatusReader>>,
    settings: MonitorSettings,
    stats: ConnectivityStats,
}

impl PingMonitor {
    /// `reader` is only used to sample signal quality on loss
    pub fn new(
        prober: Arc<dyn Prober>,
        reader: Option<Arc<ModemStatusReader>>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            prober,
            reader,
            settings,
            stats: ConnectivityStats::new(),
        }
    }

    pub fn stats(&self) -> &ConnectivityStats {
        &self.stats
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        // a duration past the clock's range means no deadline
        let deadline = self
            .settings
            .duration
            .and_then(|d| Instant::now().checked_add(d));
        info!("Starting cellular monitor");
        info!("Host: {}", self.settings.host);
        info!("Interface: {}", self.settings.interface);
        info!("Interval: {}s", self.settings.interval.as_secs());
        match self.settings.duration {
            Some(d) => info!("Duration: {} minutes", d.as_secs() / 60),
            None => info!("Duration: until interrupted"),
        }

        loop {
            if *shutdown.borrow() {
                info!("Interrupted, stopping");
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                info!("Duration reached, stopping");
                break;
            }

            self.ping_once().await;

            tokio::select! {
                _ = sleep(self.settings.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.stats.log_final();
    }

    async fn ping_once(&mut self) {
        let outcome = self
            .prober
            .ping(&self.settings.interface, &self.settings.host)
            .await;

        match self.stats.record(&outcome) {
            PingTransition::Up => info!(
                "✓ Ping #{}: {:.1}ms",
                self.stats.pings(),
                outcome.rtt_ms.unwrap_or_default()
            ),
            PingTransition::Recovered(down) => {
                info!("✓ Connection RECOVERED after {:.1}s downtime", down.as_secs_f64());
                info!(
                    "✓ Ping #{}: {:.1}ms",
                    self.stats.pings(),
                    outcome.rtt_ms.unwrap_or_default()
                );
            }
            PingTransition::WentDown => {
                let signal = self.signal().await;
                warn!(
                    "✗ Ping loss #{}: {} (signal: {})",
                    self.stats.failures(),
                    outcome.error.as_deref().unwrap_or("no reply"),
                    signal
                );
            }
            PingTransition::StillDown(down) => {
                let signal = self.signal().await;
                warn!(
                    "✗ Still down for {:.1}s (losses: {}, signal: {}): {}",
                    down.as_secs_f64(),
                    self.stats.failures(),
                    signal,
                    outcome.error.as_deref().unwrap_or("no reply")
                );
            }
        }

        if self.stats.pings() % STATS_EVERY == 0 {
            info!("{}", self.stats.summary_line());
        }
    }

    async fn signal(&self) -> String {
        let Some(reader) = &self.reader else {
            return "unknown".to_string();
        };
        let quality = match reader.select_modem().await {
            Ok(modem) => reader.signal_quality(modem).await.ok().flatten(),
            Err(_) => None,
        };
        quality
            .map(|q| format!("{}%", q))
            .unwrap_or_else(|| "unknown".to_string())
    }
}
