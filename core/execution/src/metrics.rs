// tessera/core/execution/src/metrics.rs

// Prometheus metrics for message routing, precompiled calls and block commits
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

pub static EXECUTOR_MESSAGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tessera_executor_messages_total",
        "Messages produced by the executor",
        &["type"]
    )
    .expect("register tessera_executor_messages_total")
});

pub static PRECOMPILED_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tessera_precompiled_calls_total",
        "Precompiled contract calls",
        &["precompiled", "status"]
    )
    .expect("register tessera_precompiled_calls_total")
});

pub static KEY_LOCK_CONFLICTS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "tessera_key_lock_conflicts_total",
        "Contexts aborted on a key lock conflict"
    )
    .expect("register tessera_key_lock_conflicts_total")
});

pub static BLOCK_COMMITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tessera_block_commits_total",
        "Block commit attempts",
        &["result"]
    )
    .expect("register tessera_block_commits_total")
});

pub static FRAME_GAS_USED: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!("tessera_frame_gas_used", "Gas used by settled frames")
        .expect("register tessera_frame_gas_used")
});

/// Default registry in the text exposition format.
pub fn render() -> String {
    let mut buffer = Vec::new();
    if TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
