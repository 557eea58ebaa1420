//! Platform source implementations.

mod spotify;
mod streaming;
mod twitter;
mod youtube;

use std::sync::Arc;

use cflow_core::{Platform, SourceConfig};

pub use spotify::SpotifySource;
pub use streaming::StreamingSource;
pub use twitter::TwitterSource;
pub use youtube::{parse_iso8601_duration, YoutubeSource};

use crate::error::CollectorError;
use crate::source::Source;

/// Construct the source implementation for `config.platform`.
///
/// # Errors
///
/// Returns [`CollectorError`] if the credentials do not match the platform
/// or the HTTP client cannot be built.
pub fn build_source(
    config: &SourceConfig,
    timeout_secs: u64,
    user_agent: &str,
) -> Result<Arc<dyn Source>, CollectorError> {
    Ok(match config.platform {
        Platform::Youtube => Arc::new(YoutubeSource::new(config, timeout_secs, user_agent)?),
        Platform::Spotify => Arc::new(SpotifySource::new(config, timeout_secs, user_agent)?),
        Platform::Twitter => Arc::new(TwitterSource::new(config, timeout_secs, user_agent)?),
        Platform::Streaming => Arc::new(StreamingSource::new(config, timeout_secs, user_agent)?),
    })
}
