use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the real environment so it can be tested with a pure
/// `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let value = or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if value == 0 {
            return Err(invalid(var, "must be greater than zero".to_string()));
        }
        Ok(value)
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let value = or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if value == 0 {
            return Err(invalid(var, "must be greater than zero".to_string()));
        }
        Ok(value)
    };

    let env = parse_environment(&or_default("CFLOW_ENV", "development"))?;
    let bind_addr = parse_addr("CFLOW_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("CFLOW_LOG_LEVEL", "info");
    let pipeline_path = PathBuf::from(or_default("CFLOW_PIPELINE_PATH", "./config/pipeline.yaml"));
    let state_dir = PathBuf::from(or_default("CFLOW_STATE_DIR", "./state"));
    let sink_dir = PathBuf::from(or_default("CFLOW_SINK_DIR", "./out"));
    let dead_letter_path = lookup("CFLOW_DEAD_LETTER_PATH")
        .map_or_else(|_| sink_dir.join("dead_letter.jsonl"), PathBuf::from);
    let raw_queue_capacity = parse_usize("CFLOW_RAW_QUEUE_CAPACITY", "1024")?;
    let checkpoint_interval_secs = parse_u64("CFLOW_CHECKPOINT_SECS", "60")?;
    let sweep_interval_secs = parse_u64("CFLOW_SWEEP_SECS", "300")?;
    let alert_webhook_url = lookup("CFLOW_ALERT_WEBHOOK_URL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let http_timeout_secs = parse_u64("CFLOW_HTTP_TIMEOUT_SECS", "30")?;
    let user_agent = or_default("CFLOW_USER_AGENT", "contentflow/0.1 (engagement-ingest)");

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        pipeline_path,
        state_dir,
        sink_dir,
        dead_letter_path,
        raw_queue_capacity,
        checkpoint_interval_secs,
        sweep_interval_secs,
        alert_webhook_url,
        http_timeout_secs,
        user_agent,
    })
}

/// Parse a string into an `Environment` variant.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "CFLOW_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
