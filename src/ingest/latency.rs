//! Per-snapshot apply latency, reported at the end of an ingest run.

use std::time::Duration;

/// Values stored in milliseconds.
pub struct ApplyLatency {
    inner: hdrhistogram::Histogram<u64>,
}

impl ApplyLatency {
    /// Tracks 1ms to 1h, 3 significant figures.
    pub fn new() -> Self {
        Self {
            inner: hdrhistogram::Histogram::new_with_bounds(1, 3_600_000, 3)
                .expect("valid histogram bounds"),
        }
    }

    pub fn record(&mut self, d: Duration) {
        let ms = d.as_millis().clamp(1, 3_600_000) as u64;
        let _ = self.inner.record(ms);
    }

    /// Return (p50_ms, p95_ms, p99_ms). None if no samples.
    pub fn percentiles(&self) -> Option<(u64, u64, u64)> {
        if self.inner.len() == 0 {
            return None;
        }
        Some((
            self.inner.value_at_quantile(0.5),
            self.inner.value_at_quantile(0.95),
            self.inner.value_at_quantile(0.99),
        ))
    }

    pub fn len(&self) -> u64 {
        self.inner.len()
    }
}

impl Default for ApplyLatency {
    fn default() -> Self {
        Self::new()
    }
}
