//! Configuration types for Tracewire

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Result, TraceError};

/// Default channel name shared by the instrumented process and the collector
pub const DEFAULT_CHANNEL: &str = "tracewire";

/// Default payload ceiling in bytes
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 10 * 1024;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// What to capture and how
    #[serde(default)]
    pub recording: RecordingConfig,
    /// Transport tuning
    #[serde(default)]
    pub transport: TransportConfig,
}

/// Capture toggles and thresholds, snapshotted into every session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Record UI interactions
    pub capture_interactions: bool,
    /// Record outgoing network calls
    pub capture_network: bool,
    /// Record navigation interactions
    pub capture_navigation: bool,
    /// Body ceiling in bytes; larger bodies become a placeholder
    pub max_payload_size: usize,
    /// Window in which repeated value changes of one control are dropped
    pub debounce_ms: u64,
    /// Control names/ids that are never recorded
    pub excluded_controls: Vec<String>,
    /// URL patterns that are never recorded (`*` wildcard)
    pub excluded_url_patterns: Vec<String>,
    /// Field names whose values are masked
    pub sensitive_fields: Vec<String>,
    /// Transport channel name
    pub channel_name: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            capture_interactions: true,
            capture_network: true,
            capture_navigation: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            debounce_ms: 300,
            excluded_controls: Vec::new(),
            excluded_url_patterns: Vec::new(),
            sensitive_fields: [
                "password",
                "token",
                "secret",
                "authorization",
                "api_key",
                "apikey",
                "cookie",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            channel_name: DEFAULT_CHANNEL.to_string(),
        }
    }
}

impl RecordingConfig {
    /// Validate the recording configuration
    ///
    /// # Errors
    ///
    /// Returns error if a threshold is zero, the channel name is unusable
    /// or an excluded URL pattern does not compile
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size == 0 {
            return Err(TraceError::Config(
                "max_payload_size must be > 0".to_string(),
            ));
        }

        if self.channel_name.is_empty() {
            return Err(TraceError::Config(
                "channel_name cannot be empty".to_string(),
            ));
        }

        if self.channel_name.chars().any(char::is_whitespace) {
            return Err(TraceError::Config(format!(
                "channel_name cannot contain whitespace: {:?}",
                self.channel_name
            )));
        }

        for pattern in &self.excluded_url_patterns {
            compile_url_pattern(pattern)?;
        }

        Ok(())
    }
}

/// Transport tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bounded wait for a single connection attempt
    pub connect_timeout_ms: u64,
    /// Delay before the server re-listens after a failure
    pub retry_delay_ms: u64,
    /// Unsent messages the relay keeps while the collector is unreachable
    pub max_pending: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 2000,
            retry_delay_ms: 1000,
            max_pending: 10_000,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TraceError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TraceError::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        self.recording.validate()?;

        if self.transport.connect_timeout_ms == 0 {
            return Err(TraceError::Config(
                "connect_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.transport.retry_delay_ms == 0 {
            return Err(TraceError::Config(
                "retry_delay_ms must be > 0".to_string(),
            ));
        }

        if self.transport.max_pending == 0 {
            return Err(TraceError::Config("max_pending must be > 0".to_string()));
        }

        Ok(())
    }
}

/// Compiled view of a [`RecordingConfig`] used on the capture hot path
#[derive(Debug, Clone)]
pub struct CapturePolicy {
    config: RecordingConfig,
    url_patterns: Vec<Regex>,
    sensitive: Vec<String>,
    excluded_controls: Vec<String>,
}

impl CapturePolicy {
    /// Compile a policy from a configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration does not validate
    pub fn new(config: RecordingConfig) -> Result<Self> {
        config.validate()?;

        let url_patterns = config
            .excluded_url_patterns
            .iter()
            .map(|p| compile_url_pattern(p))
            .collect::<Result<Vec<_>>>()?;

        let sensitive = config
            .sensitive_fields
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect();

        let excluded_controls = config
            .excluded_controls
            .iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();

        Ok(Self {
            config,
            url_patterns,
            sensitive,
            excluded_controls,
        })
    }

    /// The configuration this policy was compiled from
    #[must_use]
    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }

    /// Body ceiling in bytes
    #[must_use]
    pub fn max_payload_size(&self) -> usize {
        self.config.max_payload_size
    }

    /// Whether a URL matches one of the excluded patterns
    #[must_use]
    pub fn is_url_excluded(&self, url: &str) -> bool {
        self.url_patterns.iter().any(|re| re.is_match(url))
    }

    /// Whether a header, query or body field name must be masked
    #[must_use]
    pub fn is_sensitive(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.sensitive.iter().any(|s| name.contains(s.as_str()))
    }

    /// Whether a control name or id is excluded from capture
    #[must_use]
    pub fn is_control_excluded(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.excluded_controls.iter().any(|c| *c == name)
    }
}

/// Compile an excluded-URL pattern
///
/// Patterns containing `*` match the whole URL with `*` as a wildcard;
/// other patterns match anywhere in the URL. Matching ignores case.
fn compile_url_pattern(pattern: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(TraceError::Config(
            "excluded URL pattern cannot be empty".to_string(),
        ));
    }

    let source = if pattern.contains('*') {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        format!("(?i)^{body}$")
    } else {
        format!("(?i){}", regex::escape(pattern))
    };

    Regex::new(&source)
        .map_err(|e| TraceError::Config(format!("Invalid URL pattern '{pattern}': {e}")))
}
