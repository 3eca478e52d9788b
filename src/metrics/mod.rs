//! Replication metrics, keyed by peer identity.


use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::time::Instant;

lazy_static! {
    pub static ref APPEND_ENTRIES_RPC_DURATION_METRIC: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "append_entries_rpc_duration_ms",
            "Histogram of AppendEntries RPC round-trip latency in ms"
        )
        .buckets(exponential_buckets(1.0, 2.0, 12).unwrap()),
        &["peer_id"]
    )
    .expect("metric can not be created");
    pub static ref INSTALL_SNAPSHOT_RPC_DURATION_METRIC: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "install_snapshot_rpc_duration_ms",
            "Histogram of InstallSnapshot RPC round-trip latency in ms"
        )
        .buckets(exponential_buckets(1.0, 2.0, 16).unwrap()),
        &["peer_id"]
    )
    .expect("metric can not be created");
    pub static ref HEARTBEAT_RPC_DURATION_METRIC: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "heartbeat_rpc_duration_ms",
            "Histogram of heartbeat RPC round-trip latency in ms"
        )
        .buckets(exponential_buckets(1.0, 2.0, 12).unwrap()),
        &["peer_id"]
    )
    .expect("metric can not be created");
    pub static ref REPLICATED_LOG_ENTRIES_METRIC: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "replicated_log_entries",
            "Number of log entries shipped per AppendEntries request, including pipelined ones"
        ),
        &["peer_id"]
    )
    .expect("metric can not be created");
    pub static ref CUSTOM_REGISTRY: Registry =
        Registry::new_custom(Some("repl_engine".to_string()), None).unwrap();
}

/// Registers every replication metric with the given registry.
pub fn register_replication_metrics(registry: &Registry) {
    registry
        .register(Box::new(APPEND_ENTRIES_RPC_DURATION_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(INSTALL_SNAPSHOT_RPC_DURATION_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(HEARTBEAT_RPC_DURATION_METRIC.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REPLICATED_LOG_ENTRIES_METRIC.clone()))
        .expect("collector can be registered");
}

/// Records the elapsed time of one RPC against a per-peer histogram.
pub(crate) fn observe_rpc_duration(
    metric: &HistogramVec,
    peer_id: u32,
    started: Instant,
) {
    metric
        .with_label_values(&[&peer_id.to_string()])
        .observe(started.elapsed().as_secs_f64() * 1000.0);
}

/// Counts log entries shipped to a peer in one request.
pub(crate) fn count_replicated_entries(
    peer_id: u32,
    entries: usize,
) {
    REPLICATED_LOG_ENTRIES_METRIC
        .with_label_values(&[&peer_id.to_string()])
        .inc_by(entries as u64);
}
