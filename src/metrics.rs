use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref LOAD_CTR_RECOMMEND_CACHE_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "load_ctr_recommend_cache_seconds",
            "Time spent reading precomputed offline recommendations from the cache store"
        )
    )
    .unwrap();

    pub static ref LOAD_COLLABORATIVE_RECOMMEND_CACHE_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "load_collaborative_recommend_cache_seconds",
            "Time spent reading collaborative recommendations from the cache store"
        )
    )
    .unwrap();

    pub static ref USER_BASED_RECOMMEND_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "user_based_recommend_seconds",
            "Time spent aggregating candidates from similar users"
        )
    )
    .unwrap();

    pub static ref ITEM_BASED_RECOMMEND_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "item_based_recommend_seconds",
            "Time spent aggregating candidates from similar items"
        )
    )
    .unwrap();

    pub static ref LOAD_LATEST_RECOMMEND_CACHE_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "load_latest_recommend_cache_seconds",
            "Time spent reading latest items from the cache store"
        )
    )
    .unwrap();

    pub static ref LOAD_POPULAR_RECOMMEND_CACHE_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "load_popular_recommend_cache_seconds",
            "Time spent reading popular items from the cache store"
        )
    )
    .unwrap();

    pub static ref GET_RECOMMEND_SECONDS: Histogram = Histogram::with_opts(HistogramOpts::new(
        "get_recommend_seconds",
        "End-to-end latency of recommendation requests"
    ))
    .unwrap();
}

/// Registers all recommendation histograms with the shared registry.
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(LOAD_CTR_RECOMMEND_CACHE_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(LOAD_COLLABORATIVE_RECOMMEND_CACHE_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(USER_BASED_RECOMMEND_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(ITEM_BASED_RECOMMEND_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(LOAD_LATEST_RECOMMEND_CACHE_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(LOAD_POPULAR_RECOMMEND_CACHE_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(GET_RECOMMEND_SECONDS.clone()))
        .unwrap();
}

/// Encodes the registry in the Prometheus text exposition format.
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&REGISTRY.gather())
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to encode metrics");
            String::new()
        })
}
