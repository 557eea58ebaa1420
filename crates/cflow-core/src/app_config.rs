use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Process-level settings read from `CFLOW_*` environment variables.
///
/// Pipeline semantics (sources, windows, weights) live in
/// [`crate::PipelineConfig`]; this struct only covers where things run and
/// where state goes.
#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub pipeline_path: PathBuf,
    pub state_dir: PathBuf,
    pub sink_dir: PathBuf,
    pub dead_letter_path: PathBuf,
    pub raw_queue_capacity: usize,
    pub checkpoint_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub alert_webhook_url: Option<String>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("pipeline_path", &self.pipeline_path)
            .field("state_dir", &self.state_dir)
            .field("sink_dir", &self.sink_dir)
            .field("dead_letter_path", &self.dead_letter_path)
            .field("raw_queue_capacity", &self.raw_queue_capacity)
            .field("checkpoint_interval_secs", &self.checkpoint_interval_secs)
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field(
                "alert_webhook_url",
                &self.alert_webhook_url.as_ref().map(|_| "[redacted]"),
            )
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
