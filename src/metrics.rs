use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register();
    Ok(handle)
}

/// Recorder that is not installed globally; used by tests that build
/// several apps in one process.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

fn register() {
    // Pre-register counters so they appear even before the first increment.
    counter!("price_ticks_total").absolute(0);
    counter!("alerts_triggered_total").absolute(0);
    counter!("alerts_executed_total").absolute(0);
    counter!("take_profits_executed_total").absolute(0);
    counter!("advisories_raised_total").absolute(0);

    gauge!("pending_alerts").set(0.0);
    gauge!("open_positions").set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!("tick_latency_seconds").record(0.0);
}
