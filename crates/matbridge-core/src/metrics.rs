//! Global atomic counters for bridge activity.
//!
//! Counters are bumped at the call site; [`Metrics::flush`] emits the current
//! values as a single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    executions: AtomicU64,
    execution_faults: AtomicU64,
    variables_serialized: AtomicU64,
    serialization_faults: AtomicU64,
    figures_exported: AtomicU64,
    sessions_opened: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            executions: AtomicU64::new(0),
            execution_faults: AtomicU64::new(0),
            variables_serialized: AtomicU64::new(0),
            serialization_faults: AtomicU64::new(0),
            figures_exported: AtomicU64::new(0),
            sessions_opened: AtomicU64::new(0),
        }
    }

    pub fn inc_executions(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions", "counter incremented");
    }

    pub fn inc_execution_faults(&self) {
        self.execution_faults.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "execution_faults", "counter incremented");
    }

    pub fn add_variables_serialized(&self, n: u64) {
        self.variables_serialized.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_serialization_faults(&self, n: u64) {
        self.serialization_faults.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_figures_exported(&self, n: u64) {
        self.figures_exported.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_sessions_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_opened", "counter incremented");
    }

    /// Emit all counters as one `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            executions = self.executions(),
            execution_faults = self.execution_faults(),
            variables_serialized = self.variables_serialized(),
            serialization_faults = self.serialization_faults(),
            figures_exported = self.figures_exported(),
            sessions_opened = self.sessions_opened(),
        );
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn execution_faults(&self) -> u64 {
        self.execution_faults.load(Ordering::Relaxed)
    }

    pub fn variables_serialized(&self) -> u64 {
        self.variables_serialized.load(Ordering::Relaxed)
    }

    pub fn serialization_faults(&self) -> u64 {
        self.serialization_faults.load(Ordering::Relaxed)
    }

    pub fn figures_exported(&self) -> u64 {
        self.figures_exported.load(Ordering::Relaxed)
    }

    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.executions,
            &self.execution_faults,
            &self.variables_serialized,
            &self.serialization_faults,
            &self.figures_exported,
            &self.sessions_opened,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_executions();
        m.inc_executions();
        m.inc_execution_faults();
        m.add_variables_serialized(7);
        m.add_figures_exported(2);
        assert_eq!(m.executions(), 2);
        assert_eq!(m.execution_faults(), 1);
        assert_eq!(m.variables_serialized(), 7);
        assert_eq!(m.figures_exported(), 2);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_sessions_opened();
        m.add_serialization_faults(3);
        m.reset();
        assert_eq!(m.sessions_opened(), 0);
        assert_eq!(m.serialization_faults(), 0);
    }
}
