//! ---
//! campus_section: "03-persistence-logging"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Persistence abstractions and storage bindings."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::sync::Arc;

use prometheus::{self, CounterVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use crate::Result;

/// Metrics published by the durable store.
#[derive(Clone)]
pub struct PersistenceMetrics {
    writes: IntCounterVec,
    write_failures: IntCounterVec,
    bytes_written: CounterVec,
    write_duration: HistogramVec,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let writes = IntCounterVec::new(
            Opts::new(
                "campus_store_writes_total",
                "Total number of documents successfully rewritten",
            ),
            &["document"],
        )?;
        registry.register(Box::new(writes.clone()))?;

        let write_failures = IntCounterVec::new(
            Opts::new(
                "campus_store_write_failures_total",
                "Total number of document rewrites that failed",
            ),
            &["document"],
        )?;
        registry.register(Box::new(write_failures.clone()))?;

        let bytes_written = CounterVec::new(
            Opts::new(
                "campus_store_bytes_written_total",
                "Total bytes written by document rewrites",
            ),
            &["document"],
        )?;
        registry.register(Box::new(bytes_written.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "campus_store_write_duration_seconds",
            "Time spent rewriting one document",
        )
        .buckets(prometheus::exponential_buckets(0.0005, 2.0, 12)?);
        let write_duration = HistogramVec::new(histogram_opts, &["document"])?;
        registry.register(Box::new(write_duration.clone()))?;

        Ok(Self {
            writes,
            write_failures,
            bytes_written,
            write_duration,
        })
    }

    /// Record a successful rewrite.
    pub fn record_write(&self, document: &str, bytes: usize, seconds: f64) {
        self.writes.with_label_values(&[document]).inc();
        self.bytes_written
            .with_label_values(&[document])
            .inc_by(bytes as f64);
        self.write_duration
            .with_label_values(&[document])
            .observe(seconds);
    }

    /// Record a failed rewrite.
    pub fn record_failure(&self, document: &str) {
        self.write_failures.with_label_values(&[document]).inc();
    }
}

impl std::fmt::Debug for PersistenceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMetrics").finish_non_exhaustive()
    }
}
