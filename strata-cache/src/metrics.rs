//! Prometheus Metrics for the cache tiers
//!
//! Every tier operation routed through the manager produces a
//! [`CacheOperationMetric`]. Each one is exported to the default Prometheus
//! registry and appended to the manager's bounded [`OperationLog`].

use crate::types::{CacheOperationMetric, Operation};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec,
};
use std::collections::VecDeque;

lazy_static! {
    /// Total tier operations by tier, type and result (hit/miss, ok/error)
    pub static ref CACHE_OPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "strata_cache_operations_total",
        "Total number of cache tier operations",
        &["tier", "operation", "result"]
    ).unwrap();

    /// Tier operation latency in seconds
    pub static ref CACHE_OP_DURATION: HistogramVec = register_histogram_vec!(
        "strata_cache_operation_duration_seconds",
        "Cache tier operation latency in seconds",
        &["tier", "operation"],
        vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0, 5.0]
    ).unwrap();

    /// Payload sizes moved through each tier
    pub static ref CACHE_PAYLOAD_BYTES: HistogramVec = register_histogram_vec!(
        "strata_cache_payload_bytes",
        "Size of cached payloads in bytes",
        &["tier", "operation"],
        vec![64.0, 512.0, 4096.0, 32768.0, 262144.0, 2097152.0]
    ).unwrap();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn result_label(metric: &CacheOperationMetric) -> &'static str {
    match (metric.operation, metric.hit) {
        (Operation::Get, true) => "hit",
        (Operation::Get, false) => "miss",
        (_, true) => "ok",
        (_, false) => "error",
    }
}

/// Export one operation record to Prometheus
pub fn record_operation(metric: &CacheOperationMetric) {
    let operation = metric.operation.as_str();
    CACHE_OPS_TOTAL
        .with_label_values(&[metric.tier_name.as_str(), operation, result_label(metric)])
        .inc();
    CACHE_OP_DURATION
        .with_label_values(&[metric.tier_name.as_str(), operation])
        .observe(metric.latency.as_secs_f64());
    if metric.payload_size > 0 {
        CACHE_PAYLOAD_BYTES
            .with_label_values(&[metric.tier_name.as_str(), operation])
            .observe(metric.payload_size as f64);
    }
}

/// Bounded append-only log of recent operation records (oldest dropped first)
pub struct OperationLog {
    capacity: usize,
    records: Mutex<VecDeque<CacheOperationMetric>>,
}

impl OperationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn push(&self, metric: CacheOperationMetric) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(metric);
    }

    /// The last `n` records, oldest first
    pub fn recent(&self, n: usize) -> Vec<CacheOperationMetric> {
        let records = self.records.lock();
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
