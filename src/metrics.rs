//! Prometheus metrics registry and metric definitions.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

/// Global registry under crate namespace
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("vote_relay".into()), None)
        .expect("failed to create Prometheus registry")
});

/// Total vote events relayed into the database
pub static VOTES_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("votes_processed_total", "Total number of vote events upserted");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Queue reconnect attempts triggered by a dead handle
pub static QUEUE_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("queue_reconnects_total", "Total number of queue reconnects");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Database reconnect attempts triggered by a dead handle
pub static DB_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("db_reconnects_total", "Total number of database reconnects");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Keep-alive pings issued while the queue is idle
pub static KEEPALIVE_COUNTER: Lazy<IntCounter> = Lazy::new(|| {
    let opts = Opts::new("keepalive_pings_total", "Total number of idle keep-alive pings");
    let c = IntCounter::with_opts(opts).expect("counter opts");
    REGISTRY.register(Box::new(c.clone())).unwrap();
    c
});

/// Histogram of upsert durations
pub static UPSERT_HISTOGRAM: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "upsert_duration_seconds",
        "Duration of a vote upsert in seconds",
    );
    let h = Histogram::with_opts(opts).expect("histogram opts");
    REGISTRY.register(Box::new(h.clone())).unwrap();
    h
});

/// Encode all metrics as text
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    encoder.encode(&mf, &mut buffer).expect("failed to encode");
    String::from_utf8(buffer).expect("invalid utf8")
}
