//! # Observability
//!
//! Counters, histograms and gauges for the ingestion and retrieval
//! pipelines, recorded through the `metrics` facade. When no recorder is
//! installed every call is a no-op, so metrics never become a hard
//! dependency of any component.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Registers metric descriptions. Called once at startup after the recorder
/// (if any) is installed.
pub fn register_metrics() {
    describe_counter!("tgrag_posts_ingested_total", "Posts ingested per channel");
    describe_counter!(
        "tgrag_tagging_fallback_total",
        "Tagging calls served by the fallback provider"
    );
    describe_counter!(
        "tgrag_provider_errors_total",
        "Errors per provider and error kind"
    );
    describe_counter!("tgrag_rag_queries_total", "RAG queries served");
    describe_histogram!(
        "tgrag_search_latency_seconds",
        "End-to-end retrieval latency in seconds"
    );
    describe_histogram!(
        "tgrag_embedding_latency_seconds",
        "Embedding provider latency in seconds"
    );
    describe_gauge!("tgrag_live_clients", "Connected Telegram clients");
    describe_gauge!("tgrag_parse_queue_depth", "Users awaiting a parse slot");
}

/// Records posts ingested for a channel.
pub fn record_posts_ingested(channel_id: i64, count: u64) {
    metrics::counter!("tgrag_posts_ingested_total", "channel" => channel_id.to_string())
        .increment(count);
}

/// Records a tagging call that fell back to the secondary provider.
pub fn record_tagging_fallback() {
    metrics::counter!("tgrag_tagging_fallback_total").increment(1);
}

/// Records an error attributed to a named provider.
pub fn record_provider_error(provider: &str, kind: &str) {
    metrics::counter!(
        "tgrag_provider_errors_total",
        "provider" => provider.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Records one served RAG query.
pub fn record_rag_query() {
    metrics::counter!("tgrag_rag_queries_total").increment(1);
}

/// Records end-to-end retrieval latency.
pub fn record_search_latency(seconds: f64) {
    metrics::histogram!("tgrag_search_latency_seconds").record(seconds);
}

/// Records embedding provider latency.
pub fn record_embedding_latency(seconds: f64) {
    metrics::histogram!("tgrag_embedding_latency_seconds").record(seconds);
}

/// Sets the number of connected Telegram clients.
pub fn set_live_clients(count: f64) {
    metrics::gauge!("tgrag_live_clients").set(count);
}

/// Sets the number of users queued for parsing.
pub fn set_parse_queue_depth(depth: f64) {
    metrics::gauge!("tgrag_parse_queue_depth").set(depth);
}
