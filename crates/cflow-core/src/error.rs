use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read pipeline config {path}: {source}")]
    PipelineFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse pipeline config: {0}")]
    PipelineFileParse(#[from] serde_yaml::Error),

    #[error("invalid pipeline config: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint {namespace} is not valid JSON: {source}")]
    Json {
        namespace: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid checkpoint namespace \"{0}\"")]
    InvalidNamespace(String),
}
