use serde::Deserialize;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Data store connection URL (`postgres://` or `mem://`)
    #[serde(default = "default_data_url")]
    pub data_url: String,

    /// Cache store connection URL (`redis://` or `mem://`)
    #[serde(default = "default_cache_url")]
    pub cache_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Secret compared against the X-API-Key header; empty disables auth
    #[serde(default)]
    pub api_key: String,

    /// Dashboard mode bypasses API key checks
    #[serde(default)]
    pub dashboard: bool,

    /// Default number of returned entries when `n` is absent
    #[serde(default = "default_n")]
    pub default_n: usize,

    /// Upper bound for candidate-list fetches from the cache store
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Feedback types treated as positive signals by user-based recommendation
    #[serde(default = "default_positive_feedback_types")]
    pub positive_feedback_types: Vec<String>,

    /// Create missing users when inserting feedback through the REST surface
    #[serde(default = "default_auto_insert_user")]
    pub auto_insert_user: bool,

    /// Create missing items when inserting feedback through the REST surface
    #[serde(default)]
    pub auto_insert_item: bool,

    /// Ordered recommender chain executed after the offline stage
    #[serde(default = "default_fallback_recommend")]
    pub fallback_recommend: Vec<String>,
}

fn default_data_url() -> String {
    "mem://".to_string()
}

fn default_cache_url() -> String {
    "mem://".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8087
}

fn default_n() -> usize {
    10
}

fn default_cache_size() -> usize {
    100
}

fn default_positive_feedback_types() -> Vec<String> {
    vec!["star".to_string(), "like".to_string()]
}

fn default_auto_insert_user() -> bool {
    true
}

fn default_fallback_recommend() -> Vec<String> {
    vec!["latest".to_string()]
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }
}
