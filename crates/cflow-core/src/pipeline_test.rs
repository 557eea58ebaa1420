use std::collections::HashMap;
use std::env::VarError;

use super::*;

fn lookup_from_map<'a>(
    map: &'a HashMap<&'a str, &'a str>,
) -> impl Fn(&str) -> Result<String, VarError> + 'a {
    move |key| {
        map.get(key)
            .map(|v| (*v).to_string())
            .ok_or(VarError::NotPresent)
    }
}

const VALID: &str = r"
sources:
  - name: youtube-main
    platform: youtube
    base_url: https://www.googleapis.com/youtube/v3
    auth:
      kind: api_key
      api_key_env: YT_KEY
    rate_limit:
      requests_per_sec: 5
  - name: spotify-main
    platform: spotify
    base_url: https://api.spotify.com/v1
    auth:
      kind: client_credentials
      client_id_env: SP_ID
      client_secret_env: SP_SECRET
    rate_limit:
      requests_per_sec: 2
      burst: 4
    breaker:
      failure_threshold: 2
      cooldown_secs: 60
windows:
  - name: hourly
    kind: tumbling
    size_secs: 3600
    retention_secs: 86400
  - name: decayed_1h
    kind: decayed
    half_life_secs: 3600
    metric_half_lives:
      share: 7200
    retention_secs: 86400
event_weights:
  share: 10
trend:
  window: decayed_1h
recommend:
  window: decayed_1h
  weights:
    collaborative: 0.5
    content: 0.3
    popularity: 0.2
  trend_boost:
    per_score: 0.05
    max_multiplier: 1.5
";

fn credentials_env() -> HashMap<&'static str, &'static str> {
    let mut map = HashMap::new();
    map.insert("YT_KEY", "yt-secret-key");
    map.insert("SP_ID", "spotify-client");
    map.insert("SP_SECRET", "spotify-secret");
    map
}

#[test]
fn parses_valid_pipeline_with_defaults() {
    let env = credentials_env();
    let cfg = parse_pipeline_config(VALID, lookup_from_map(&env)).expect("valid config");

    assert_eq!(cfg.sources.len(), 2);
    let yt = cfg.source("youtube-main").unwrap();
    assert_eq!(yt.platform, Platform::Youtube);
    assert_eq!(yt.rate_limit.effective_burst(), 5);
    assert_eq!(yt.retry, RetryConfig::default());
    assert_eq!(yt.page_limit, 5);
    assert!(yt.enabled);
    assert_eq!(yt.credentials, Credentials::ApiKey("yt-secret-key".to_string()));

    let sp = cfg.source("spotify-main").unwrap();
    assert_eq!(sp.rate_limit.effective_burst(), 4);
    assert_eq!(sp.breaker.failure_threshold, 2);

    assert_eq!(cfg.windows.len(), 2);
    assert!(cfg.window("decayed_1h").unwrap().is_decayed());
    assert!(!cfg.window("hourly").unwrap().is_decayed());

    assert!((cfg.event_weights.weight(EventType::Share) - 10.0).abs() < f64::EPSILON);
    assert!((cfg.event_weights.weight(EventType::View) - 1.0).abs() < f64::EPSILON);
    assert_eq!(cfg.bus, BusConfig::default());
    assert_eq!(cfg.trend.baseline_samples, 24);
    assert_eq!(cfg.recommend.default_limit, 20);
}

#[test]
fn missing_credential_env_fails() {
    let mut env = credentials_env();
    env.remove("SP_SECRET");
    let err = parse_pipeline_config(VALID, lookup_from_map(&env)).unwrap_err();
    assert!(
        matches!(err, ConfigError::MissingEnvVar(ref var) if var == "SP_SECRET"),
        "got: {err:?}"
    );
}

#[test]
fn disabled_source_does_not_require_credentials() {
    let yaml = VALID.replace(
        "  - name: spotify-main\n",
        "  - name: spotify-main\n    enabled: false\n",
    );
    let mut env = credentials_env();
    env.remove("SP_ID");
    env.remove("SP_SECRET");
    let cfg = parse_pipeline_config(&yaml, lookup_from_map(&env)).expect("valid config");
    assert_eq!(cfg.source("spotify-main").unwrap().credentials, Credentials::None);
}

#[test]
fn trend_window_must_be_decayed() {
    let yaml = VALID.replace("trend:\n  window: decayed_1h", "trend:\n  window: hourly");
    let env = credentials_env();
    let err = parse_pipeline_config(&yaml, lookup_from_map(&env)).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("decayed")));
}

#[test]
fn unknown_recommend_window_fails() {
    let yaml = VALID.replace("recommend:\n  window: decayed_1h", "recommend:\n  window: daily");
    let env = credentials_env();
    let err = parse_pipeline_config(&yaml, lookup_from_map(&env)).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("daily")));
}

#[test]
fn zero_rate_limit_fails() {
    let yaml = VALID.replace("requests_per_sec: 5", "requests_per_sec: 0");
    let env = credentials_env();
    let err = parse_pipeline_config(&yaml, lookup_from_map(&env)).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("requests_per_sec")));
}

#[test]
fn duplicate_source_names_fail() {
    let yaml = VALID.replace("name: spotify-main", "name: youtube-main");
    let env = credentials_env();
    let err = parse_pipeline_config(&yaml, lookup_from_map(&env)).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("duplicate source")));
}

#[test]
fn boost_multiplier_below_one_fails() {
    let yaml = VALID.replace("max_multiplier: 1.5", "max_multiplier: 0.8");
    let env = credentials_env();
    let err = parse_pipeline_config(&yaml, lookup_from_map(&env)).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref msg) if msg.contains("max_multiplier")));
}

#[test]
fn all_zero_recommend_weights_fail() {
    let yaml = VALID
        .replace("collaborative: 0.5", "collaborative: 0")
        .replace("content: 0.3", "content: 0")
        .replace("popularity: 0.2", "popularity: 0");
    let env = credentials_env();
    let err = parse_pipeline_config(&yaml, lookup_from_map(&env)).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
}

#[test]
fn malformed_yaml_is_parse_error() {
    let env = credentials_env();
    let err = parse_pipeline_config("windows: [", lookup_from_map(&env)).unwrap_err();
    assert!(matches!(err, ConfigError::PipelineFileParse(_)));
}

#[test]
fn credentials_debug_is_redacted() {
    let creds = Credentials::ClientCredentials {
        client_id: "visible-id".to_string(),
        client_secret: "hidden-secret".to_string(),
    };
    let rendered = format!("{creds:?}");
    assert!(rendered.contains("visible-id"));
    assert!(!rendered.contains("hidden-secret"));
    assert_eq!(
        format!("{:?}", Credentials::Bearer("tok-123".into())),
        "Bearer([redacted])"
    );
}

#[test]
fn bundled_pipeline_file_is_valid() {
    let yaml = include_str!("../../../config/pipeline.yaml");
    let mut env = HashMap::new();
    env.insert("YOUTUBE_API_KEY", "k");
    env.insert("SPOTIFY_CLIENT_ID", "id");
    env.insert("SPOTIFY_CLIENT_SECRET", "secret");
    env.insert("TWITTER_BEARER_TOKEN", "t");
    env.insert("STREAMING_API_KEY", "s");
    let cfg = parse_pipeline_config(yaml, lookup_from_map(&env)).expect("bundled config");
    assert_eq!(cfg.sources.len(), 4);
}
