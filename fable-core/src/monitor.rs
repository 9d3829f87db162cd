//! Periodic resource monitoring.
//!
//! Samples the process's resident set and CPU usage on an interval and
//! compares memory against two independent ceilings: an absolute
//! megabyte limit and a percentage of system memory. A breach of either
//! fires the cleanup hook; repeated breaches inside a sliding window
//! flip the published health signal to degraded so the supervisor can
//! decide what to do. The monitor never touches the orchestrator's
//! state directly.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorError;

/// Linux USER_HZ: /proc/self/stat reports CPU time in these ticks.
const CLOCK_TICKS_PER_SEC: f32 = 100.0;

/// One resource measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// When the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Resident set size of this process, in megabytes.
    pub rss_mb: u64,
    /// Total system memory, in megabytes.
    pub total_mb: u64,
    /// Process CPU usage since the previous sample, in percent of one
    /// core. Zero on the first sample.
    pub cpu_percent: f32,
}

impl ResourceSample {
    /// Resident set as a percentage of system memory.
    pub fn percent_of_total(&self) -> f32 {
        if self.total_mb == 0 {
            return 0.0;
        }
        self.rss_mb as f32 / self.total_mb as f32 * 100.0
    }
}

/// Published monitor health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorHealth {
    Ok,
    /// Repeated ceiling breaches within the escalation window.
    Degraded,
}

/// Takes successive samples, remembering the previous CPU reading so
/// each sample reports usage over the interval since the last one.
pub struct ResourceSampler {
    last_cpu: Option<(Instant, u64)>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self { last_cpu: None }
    }

    /// Read resident set from `/proc/self/status` (VmRSS), total memory
    /// from `/proc/meminfo`, and CPU ticks from `/proc/self/stat`.
    pub fn sample(&mut self) -> Result<ResourceSample, MonitorError> {
        let rss_mb = read_kb_field(Path::new("/proc/self/status"), "VmRSS:")? / 1024;
        let total_mb = read_kb_field(Path::new("/proc/meminfo"), "MemTotal:")? / 1024;
        let ticks = read_cpu_ticks(Path::new("/proc/self/stat"))?;

        let now = Instant::now();
        let cpu_percent = match self.last_cpu {
            Some((prev_at, prev_ticks)) => {
                let elapsed = now.duration_since(prev_at).as_secs_f32();
                if elapsed > 0.0 {
                    let cpu_secs =
                        ticks.saturating_sub(prev_ticks) as f32 / CLOCK_TICKS_PER_SEC;
                    cpu_secs / elapsed * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last_cpu = Some((now, ticks));

        Ok(ResourceSample {
            timestamp: Utc::now(),
            rss_mb,
            total_mb,
            cpu_percent,
        })
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn read_cpu_ticks(path: &Path) -> Result<u64, MonitorError> {
    let content = std::fs::read_to_string(path).map_err(|e| MonitorError::SampleFailed {
        reason: format!("read {}: {e}", path.display()),
    })?;
    parse_cpu_ticks(&content).ok_or_else(|| MonitorError::SampleFailed {
        reason: format!("cpu fields not found in {}", path.display()),
    })
}

/// Sum of utime and stime from a `/proc/<pid>/stat` line. The comm
/// field may itself contain spaces and parentheses, so fields are
/// counted from after the last closing paren.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = stat.rsplit_once(')')?.1;
    let mut fields = rest.split_whitespace();
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

fn read_kb_field(path: &Path, field: &str) -> Result<u64, MonitorError> {
    let content = std::fs::read_to_string(path).map_err(|e| MonitorError::SampleFailed {
        reason: format!("read {}: {e}", path.display()),
    })?;
    parse_kb_field(&content, field).ok_or_else(|| MonitorError::SampleFailed {
        reason: format!("field {field:?} not found in {}", path.display()),
    })
}

fn parse_kb_field(content: &str, field: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with(field))?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

/// Evaluate a sample against the configured ceilings. Both triggers are
/// independent; a sample over both counts as a single breach.
pub fn check_ceilings(sample: &ResourceSample, config: &MonitorConfig) -> Option<MonitorError> {
    let over_absolute = sample.rss_mb > config.memory_ceiling_mb;
    let over_percent = sample.percent_of_total() > config.memory_ceiling_percent;
    if over_absolute || over_percent {
        Some(MonitorError::CeilingExceeded {
            used_mb: sample.rss_mb,
            limit_mb: config.memory_ceiling_mb,
        })
    } else {
        None
    }
}

/// Tracks breach timestamps within a sliding window and reports when
/// the count crosses the escalation threshold.
pub struct BreachTracker {
    breaches: VecDeque<Instant>,
    window: Duration,
    escalation_count: u32,
}

impl BreachTracker {
    pub fn new(window: Duration, escalation_count: u32) -> Self {
        Self {
            breaches: VecDeque::new(),
            window,
            escalation_count,
        }
    }

    /// Record a breach; returns true when the window now holds enough
    /// breaches to escalate.
    pub fn record(&mut self, now: Instant) -> bool {
        self.breaches.push_back(now);
        while let Some(&front) = self.breaches.front() {
            if now.duration_since(front) > self.window {
                self.breaches.pop_front();
            } else {
                break;
            }
        }
        self.breaches.len() >= self.escalation_count as usize
    }

    pub fn breach_count(&self) -> usize {
        self.breaches.len()
    }
}

/// The running monitor task plus its health channel.
pub struct ResourceMonitor {
    handle: JoinHandle<()>,
    health: watch::Receiver<MonitorHealth>,
}

impl ResourceMonitor {
    /// Spawn the sampling loop. `cleanup` runs on every ceiling breach;
    /// it should drop caches and trim conversation history, and must not
    /// block.
    pub fn spawn<F>(config: MonitorConfig, cancel: CancellationToken, cleanup: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (health_tx, health_rx) = watch::channel(MonitorHealth::Ok);
        let handle = tokio::spawn(monitor_loop(config, cancel, cleanup, health_tx));
        Self {
            handle,
            health: health_rx,
        }
    }

    /// Subscribe to health changes.
    pub fn health(&self) -> watch::Receiver<MonitorHealth> {
        self.health.clone()
    }

    /// Wait for the loop to exit after cancellation.
    pub async fn join(self) {
        let _ = self.handle.await;
    }
}

async fn monitor_loop<F>(
    config: MonitorConfig,
    cancel: CancellationToken,
    cleanup: F,
    health_tx: watch::Sender<MonitorHealth>,
) where
    F: Fn() + Send + 'static,
{
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut tracker = BreachTracker::new(
        Duration::from_secs(config.breach_window_secs),
        config.breach_escalation_count,
    );
    let mut sampler = ResourceSampler::new();

    info!(
        interval_secs = config.interval_secs,
        ceiling_mb = config.memory_ceiling_mb,
        ceiling_percent = config.memory_ceiling_percent,
        "resource monitor started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("resource monitor stopping");
                return;
            }
            _ = interval.tick() => {}
        }

        let sample = match sampler.sample() {
            Ok(sample) => sample,
            Err(e) => {
                // a failed sample is logged and skipped, never escalated
                warn!(error = %e, "resource sample failed");
                continue;
            }
        };
        debug!(
            rss_mb = sample.rss_mb,
            percent = sample.percent_of_total(),
            cpu_percent = sample.cpu_percent,
            "resource sample"
        );

        if let Some(breach) = check_ceilings(&sample, &config) {
            warn!(error = %breach, "memory ceiling breached, running cleanup");
            cleanup();
            if tracker.record(Instant::now()) {
                warn!(
                    breaches = tracker.breach_count(),
                    window_secs = config.breach_window_secs,
                    "repeated memory breaches, marking degraded"
                );
                let _ = health_tx.send(MonitorHealth::Degraded);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> MonitorConfig {
        MonitorConfig {
            interval_secs: 30,
            memory_ceiling_mb: 350,
            memory_ceiling_percent: 85.0,
            breach_escalation_count: 3,
            breach_window_secs: 300,
        }
    }

    fn sample(rss_mb: u64, total_mb: u64) -> ResourceSample {
        ResourceSample {
            timestamp: Utc::now(),
            rss_mb,
            total_mb,
            cpu_percent: 0.0,
        }
    }

    #[test]
    fn test_parse_kb_field() {
        let status = "Name:\tfable\nVmPeak:\t  201000 kB\nVmRSS:\t  102400 kB\n";
        assert_eq!(parse_kb_field(status, "VmRSS:"), Some(102_400));
        assert_eq!(parse_kb_field(status, "VmSwap:"), None);
    }

    #[test]
    fn test_parse_cpu_ticks() {
        let stat = "1234 (fable) S 1 1234 1234 0 -1 4194560 500 0 0 0 72 28 0 0 \
                    20 0 4 0 100 10000000 256 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        assert_eq!(parse_cpu_ticks(stat), Some(100));
    }

    #[test]
    fn test_parse_cpu_ticks_comm_with_spaces() {
        // comm is not escaped; field counting must start after the
        // last closing paren
        let stat = "1234 (fable (dev) worker) R 1 1234 1234 0 -1 4194560 500 0 0 0 40 20 0 0 \
                    20 0 4 0 100 10000000 256 0 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        assert_eq!(parse_cpu_ticks(stat), Some(60));
    }

    #[test]
    fn test_ceiling_absolute_and_percent_are_independent() {
        let cfg = config();

        // under both
        assert!(check_ceilings(&sample(300, 1024), &cfg).is_none());

        // over absolute only
        assert!(check_ceilings(&sample(400, 8192), &cfg).is_some());

        // over percent only (ceiling_mb not reached)
        let s = sample(345, 400);
        assert!(s.percent_of_total() > 85.0);
        assert!(check_ceilings(&s, &cfg).is_some());
    }

    #[test]
    fn test_breach_tracker_escalates_within_window() {
        let mut tracker = BreachTracker::new(Duration::from_secs(300), 3);
        let t0 = Instant::now();
        assert!(!tracker.record(t0));
        assert!(!tracker.record(t0 + Duration::from_secs(10)));
        assert!(tracker.record(t0 + Duration::from_secs(20)));
    }

    #[test]
    fn test_breach_tracker_forgets_old_breaches() {
        let mut tracker = BreachTracker::new(Duration::from_secs(300), 3);
        let t0 = Instant::now();
        tracker.record(t0);
        tracker.record(t0 + Duration::from_secs(10));
        // third breach lands after the first aged out but while the
        // second is still inside the window
        assert!(!tracker.record(t0 + Duration::from_secs(305)));
        assert_eq!(tracker.breach_count(), 2);
    }

    #[test]
    fn test_sampler_reads_proc() {
        // /proc is always present on the targets this runs on
        let mut sampler = ResourceSampler::new();
        let first = sampler.sample().unwrap();
        assert!(first.rss_mb > 0);
        assert!(first.total_mb >= first.rss_mb);
        // no previous reading to diff against
        assert_eq!(first.cpu_percent, 0.0);

        let second = sampler.sample().unwrap();
        assert!(second.cpu_percent >= 0.0);
        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_loop_runs_cleanup_on_breach() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleanups);
        let cfg = MonitorConfig {
            interval_secs: 1,
            memory_ceiling_mb: 0, // every sample breaches
            memory_ceiling_percent: 0.0,
            breach_escalation_count: 2,
            breach_window_secs: 300,
        };
        let cancel = CancellationToken::new();
        let monitor = ResourceMonitor::spawn(cfg, cancel.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut health = monitor.health();

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }

        cancel.cancel();
        monitor.join().await;

        assert!(cleanups.load(Ordering::SeqCst) >= 2);
        assert_eq!(*health.borrow_and_update(), MonitorHealth::Degraded);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let monitor = ResourceMonitor::spawn(config(), cancel.clone(), || {});
        cancel.cancel();
        monitor.join().await;
    }
}
