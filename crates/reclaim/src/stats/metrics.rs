//! Swap Metrics - Export
//!
//! Flattens [`SwapStats`](super::SwapStats) into named values for
//! monitoring systems (Prometheus text format or JSON).

use super::SwapStats;
use indexmap::IndexMap;
use parking_lot::Mutex;

/// Metric value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Counter(v) => *v as f64,
            MetricValue::Gauge(v) => *v,
        }
    }
}

/// Ordered set of named metrics
pub struct SwapMetrics {
    metrics: Mutex<IndexMap<String, MetricValue>>,
}

impl SwapMetrics {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(IndexMap::new()),
        }
    }

    /// Snapshot of every counter in `stats`
    pub fn from_stats(stats: &SwapStats) -> Self {
        let metrics = Self::new();
        let counters = [
            ("reclaim_swap_ins_total", stats.swap_ins()),
            ("reclaim_kernel_swap_ins_total", stats.kernel_swap_ins()),
            ("reclaim_swap_in_failures_total", stats.swap_in_failures()),
            ("reclaim_swap_outs_total", stats.swap_outs()),
            ("reclaim_stub_accesses_total", stats.stub_accesses()),
            ("reclaim_entries_created_total", stats.entries_created()),
            ("reclaim_entries_freed_total", stats.entries_freed()),
            ("reclaim_free_notifications_total", stats.free_notifications()),
            ("reclaim_no_swap_marks_total", stats.no_swap_marks()),
            ("reclaim_unlock_all_total", stats.unlock_all_recoveries()),
        ];
        for (name, value) in counters {
            metrics.add(name, MetricValue::Counter(value));
        }

        let polls = stats.handshake_polls();
        metrics.add("reclaim_handshake_polls_p50", MetricValue::Gauge(polls.p50() as f64));
        metrics.add("reclaim_handshake_polls_max", MetricValue::Gauge(polls.max() as f64));

        let latency = stats.swap_in_latency_us();
        metrics.add("reclaim_swap_in_latency_us_mean", MetricValue::Gauge(latency.mean() as f64));
        metrics.add("reclaim_swap_in_latency_us_p99", MetricValue::Gauge(latency.p99() as f64));
        metrics
    }

    pub fn add(&self, name: impl Into<String>, value: MetricValue) {
        self.metrics.lock().insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.lock().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }

    /// Export to Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let metrics = self.metrics.lock();
        let mut output = String::new();
        for (name, value) in metrics.iter() {
            let kind = match value {
                MetricValue::Counter(_) => "counter",
                MetricValue::Gauge(_) => "gauge",
            };
            output.push_str(&format!("# TYPE {} {}\n{} {}\n", name, kind, name, value.as_f64()));
        }
        output
    }

    /// Export to JSON object, keys in insertion order
    pub fn to_json(&self) -> String {
        let metrics = self.metrics.lock();
        let pairs: Vec<String> = metrics
            .iter()
            .map(|(name, value)| {
                let json = match value {
                    MetricValue::Counter(v) => serde_json::Value::from(*v),
                    MetricValue::Gauge(v) => serde_json::Value::from(*v),
                };
                format!("{}:{}", serde_json::Value::from(name.as_str()), json)
            })
            .collect();
        format!("{{{}}}", pairs.join(","))
    }
}

impl Default for SwapMetrics {
    fn default() -> Self {
        Self::new()
    }
}
