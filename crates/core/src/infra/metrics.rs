use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::job::JobOutcome;

/// ローカルメトリクス収集器
pub struct Metrics {
    counters: Mutex<MetricsCounters>,
    latencies: Mutex<Vec<LatencyRecord>>,
}

#[derive(Debug, Default)]
struct MetricsCounters {
    jobs_started: u64,
    jobs_skipped: u64,
    jobs_done: u64,
    jobs_failed: u64,
    jobs_cancelled: u64,
    jobs_abandoned: u64,
    conversion_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyRecord {
    pub phase: String,
    pub duration_ms: u64,
    pub timestamp: String,
}

/// メトリクスサマリー（UIに返す用）
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub jobs_started: u64,
    pub jobs_skipped: u64,
    pub jobs_done: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub jobs_abandoned: u64,
    pub conversion_failures: u64,
    pub avg_latency_ms: AvgLatency,
    pub recent_latencies: Vec<LatencyRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvgLatency {
    pub upscale: Option<f64>,
    pub convert: Option<f64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(MetricsCounters::default()),
            latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn inc_jobs_started(&self) {
        self.counters.lock().jobs_started += 1;
    }

    pub fn inc_conversion_failures(&self) {
        self.counters.lock().conversion_failures += 1;
    }

    /// 最終結果ごとのカウンタを進める
    pub fn record_outcome(&self, outcome: &JobOutcome) {
        let mut c = self.counters.lock();
        match outcome {
            JobOutcome::Skipped { .. } => c.jobs_skipped += 1,
            JobOutcome::Done { .. } => c.jobs_done += 1,
            JobOutcome::Failed { .. } => c.jobs_failed += 1,
            JobOutcome::Cancelled => c.jobs_cancelled += 1,
            JobOutcome::Abandoned => c.jobs_abandoned += 1,
        }
    }

    pub fn record_latency(&self, phase: &str, duration_ms: u64) {
        let record = LatencyRecord {
            phase: phase.to_string(),
            duration_ms,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let mut latencies = self.latencies.lock();
        latencies.push(record);
        // 最新1000件のみ保持
        if latencies.len() > 1000 {
            let excess = latencies.len() - 1000;
            latencies.drain(0..excess);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let c = self.counters.lock();
        let latencies = self.latencies.lock();

        let avg = |phase: &str| -> Option<f64> {
            let vals: Vec<f64> = latencies
                .iter()
                .filter(|r| r.phase == phase)
                .map(|r| r.duration_ms as f64)
                .collect();
            if vals.is_empty() {
                None
            } else {
                Some(vals.iter().sum::<f64>() / vals.len() as f64)
            }
        };

        let recent: Vec<LatencyRecord> = latencies.iter().rev().take(20).cloned().collect();

        MetricsSummary {
            jobs_started: c.jobs_started,
            jobs_skipped: c.jobs_skipped,
            jobs_done: c.jobs_done,
            jobs_failed: c.jobs_failed,
            jobs_cancelled: c.jobs_cancelled,
            jobs_abandoned: c.jobs_abandoned,
            conversion_failures: c.conversion_failures,
            avg_latency_ms: AvgLatency {
                upscale: avg("upscale"),
                convert: avg("convert"),
            },
            recent_latencies: recent,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
