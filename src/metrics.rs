use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

// --- Event Store ---

pub static EVENTS_APPLIED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "replicator_events_applied_total",
        "Total OrderEvents newly appended to the event store"
    )
    .expect("events_applied counter")
});

pub static EVENTS_DEDUPLICATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "replicator_events_deduplicated_total",
        "Total inbound ExecIDs that were already present and skipped"
    )
    .expect("events_deduplicated counter")
});

// --- Replication ---

pub static SHADOW_ORDERS_EMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "replicator_shadow_orders_emitted_total",
        "Total NewOrderSingle messages sent to shadow accounts"
    )
    .expect("shadow_orders_emitted counter")
});

pub static REJECTIONS_BY_REASON: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "replicator_rejections_total",
        "Rejection reports classified by free-text reason",
        &["reason"]
    )
    .expect("rejections_by_reason counter")
});

// --- Locate Protocol ---

pub static LOCATES_BY_STATUS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "replicator_locates_total",
        "Locate requests transitioned, labeled by resulting status",
        &["status"]
    )
    .expect("locates_by_status counter")
});

pub static LOCATES_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "replicator_locates_pending",
        "Locate requests currently in PENDING status"
    )
    .expect("locates_pending gauge")
});

// --- Dispatcher ---

pub static DISPATCH_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "replicator_dispatch_handler_latency_seconds",
        "Time spent inside a single execution report handler",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("dispatch_latency histogram")
});

pub static DISPATCH_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "replicator_dispatch_errors_total",
        "Handler invocations that returned an EngineError"
    )
    .expect("dispatch_errors counter")
});

pub fn inc_events_applied() {
    EVENTS_APPLIED.inc();
}

pub fn inc_events_deduplicated() {
    EVENTS_DEDUPLICATED.inc();
}

pub fn inc_shadow_orders_emitted() {
    SHADOW_ORDERS_EMITTED.inc();
}

pub fn inc_rejection(reason: &str) {
    REJECTIONS_BY_REASON.with_label_values(&[reason]).inc();
}

pub fn inc_locate_status(status: &str) {
    LOCATES_BY_STATUS.with_label_values(&[status]).inc();
}

pub fn set_locates_pending(count: i64) {
    LOCATES_PENDING.set(count);
}

pub fn observe_dispatch_latency(duration_sec: f64) {
    DISPATCH_LATENCY.observe(duration_sec);
}

pub fn inc_dispatch_errors() {
    DISPATCH_ERRORS.inc();
}
