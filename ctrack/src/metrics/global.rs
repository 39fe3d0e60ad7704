use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

struct GlobalMetrics {
    workload_fetches: IntCounter,
    workload_failures: IntCounter,
    conntrack_failures: IntCounter,
    dns_calls: IntCounterVec,
    dns_errors: IntCounter,
}

static METRICS: OnceLock<GlobalMetrics> = OnceLock::new();

/// Initialize process wide metrics and register them with `registry`
pub fn init(registry: &Registry) -> Result<()> {
    let metrics = GlobalMetrics {
        workload_fetches: IntCounter::with_opts(
            Opts::new("fetch_total", "Number of fetchs to discover workloads")
                .namespace("conntrack")
                .subsystem("workload"),
        )?,

        workload_failures: IntCounter::with_opts(
            Opts::new("failures_total", "Number of failures to get workloads")
                .namespace("conntrack")
                .subsystem("workload"),
        )?,

        conntrack_failures: IntCounter::with_opts(
            Opts::new("fetch_failures_total", "Number of failures to read the conntrack table")
                .namespace("conntrack")
                .subsystem("connections"),
        )?,

        dns_calls: IntCounterVec::new(
            Opts::new("conntrack_dns_cache_calls_total", "The number of hits on cache of DNS"),
            &["kind"],
        )?,

        dns_errors: IntCounter::new("conntrack_dns_error_total", "The number of errors to call DNS")?,
    };

    registry.register(Box::new(metrics.workload_fetches.clone()))?;
    registry.register(Box::new(metrics.workload_failures.clone()))?;
    registry.register(Box::new(metrics.conntrack_failures.clone()))?;
    registry.register(Box::new(metrics.dns_calls.clone()))?;
    registry.register(Box::new(metrics.dns_errors.clone()))?;

    METRICS
        .set(metrics)
        .map_err(|_| anyhow::anyhow!("Global metrics already initialized"))?;

    Ok(())
}

/// Record one workload discovery attempt
pub fn record_workload_fetch(ok: bool) {
    let Some(m) = METRICS.get() else { return };

    m.workload_fetches.inc();
    if !ok {
        m.workload_failures.inc();
    }
}

pub fn record_conntrack_failure() {
    let Some(m) = METRICS.get() else { return };
    m.conntrack_failures.inc();
}

/// Record a dns cache lookup, `kind` is either hit or miss
pub fn record_dns_call(kind: &str) {
    let Some(m) = METRICS.get() else { return };
    m.dns_calls.with_label_values(&[kind]).inc();
}

pub fn record_dns_error() {
    let Some(m) = METRICS.get() else { return };
    m.dns_errors.inc();
}
