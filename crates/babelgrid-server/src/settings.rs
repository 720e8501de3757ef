use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Process configuration: flags first, environment second, defaults last.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "babelgrid-server",
    version,
    about = "Distributed image translation dispatch service"
)]
pub struct Settings {
    /// Address to listen on.
    #[arg(long, env = "BABELGRID_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Coordination store URL.
    #[arg(
        long,
        env = "BABELGRID_REDIS_URL",
        default_value = "redis://127.0.0.1:6379/0"
    )]
    pub redis_url: String,

    /// YAML file with API credentials and their limits.
    #[arg(
        long,
        env = "BABELGRID_API_KEYS_FILE",
        default_value = "config/api_keys.yaml"
    )]
    pub api_keys_file: PathBuf,

    /// YAML file mapping language names to prompt text.
    #[arg(
        long,
        env = "BABELGRID_PROMPTS_FILE",
        default_value = "config/prompts.yaml"
    )]
    pub prompts_file: PathBuf,

    /// Base URL of the translation provider.
    #[arg(
        long,
        env = "BABELGRID_PROVIDER_ENDPOINT",
        default_value = "https://generativelanguage.googleapis.com"
    )]
    pub provider_endpoint: String,

    /// Provider model name.
    #[arg(
        long,
        env = "BABELGRID_PROVIDER_MODEL",
        default_value = "gemini-2.0-flash"
    )]
    pub provider_model: String,

    /// Workers this instance keeps even when idle.
    #[arg(long, env = "BABELGRID_MIN_WORKERS", default_value_t = 1)]
    pub min_workers: usize,

    /// Cluster-wide worker ceiling.
    #[arg(long, env = "BABELGRID_MAX_WORKERS", default_value_t = 50)]
    pub max_workers: usize,

    /// Seconds between scaling cycles.
    #[arg(long, env = "BABELGRID_SCALE_CHECK_INTERVAL", default_value_t = 10)]
    pub scale_check_interval_s: u64,

    /// Ceiling on the client-requested long-poll timeout, in seconds.
    #[arg(long, env = "BABELGRID_POLLING_TIMEOUT", default_value_t = 60)]
    pub polling_timeout_s: u64,

    /// Long-poll re-read interval, in milliseconds.
    #[arg(long, env = "BABELGRID_POLLING_CHECK_INTERVAL_MS", default_value_t = 500)]
    pub polling_check_interval_ms: u64,

    /// Per-file upload limit in bytes.
    #[arg(long, env = "BABELGRID_MAX_UPLOAD_SIZE", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_size: usize,

    /// Task record retention in seconds.
    #[arg(long, env = "BABELGRID_TASK_RETENTION", default_value_t = 86400)]
    pub task_retention_s: u64,

    /// Seconds after which a claimed task is considered abandoned.
    #[arg(long, env = "BABELGRID_MAX_PROCESSING_TIME", default_value_t = 600)]
    pub max_processing_time_s: u64,

    /// Default requests-per-minute for credentials without explicit limits.
    #[arg(long, env = "BABELGRID_DEFAULT_RPM", default_value_t = 15)]
    pub default_rpm: u32,

    /// Default requests-per-day for credentials without explicit limits.
    #[arg(long, env = "BABELGRID_DEFAULT_RPD", default_value_t = 1500)]
    pub default_rpd: u32,

    /// Default tokens-per-minute for credentials without explicit limits.
    #[arg(long, env = "BABELGRID_DEFAULT_TPM", default_value_t = 1_000_000)]
    pub default_tpm: u64,
}
