//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MIMEXPLODE_CONFIG` (environment variable)
//! 2. `~/.config/mimexplode/config.toml` (Linux/macOS)
//!    `%APPDATA%\mimexplode\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Parser toggles.
    pub parser: ParserConfig,
    /// Redo hook tuning.
    pub redo: RedoConfig,
    /// Where decoded bodies and scratch data live.
    pub output: OutputConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// What to do with `message/rfc822` bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NestedMessages {
    /// Parse the inner message and attach it as the only child.
    Nest,
    /// Parse the inner message and let it take the wrapper's place.
    Replace,
    /// Leave the body as an opaque leaf.
    Off,
}

/// Built-in redo hooks that can be enabled by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedoHookKind {
    /// Look for uuencoded blocks inside plain-text parts.
    UuSniff,
}

/// Parser toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Decode RFC 2047 encoded-words in header values while reading them.
    pub decode_headers: bool,
    /// Policy for nested `message/rfc822` parts.
    pub extract_nested_messages: NestedMessages,
    /// Re-parse multipart/message containers that carry a real
    /// transfer-encoding once their bytes are decoded.
    pub extract_encoded_containers: bool,
    /// Downgrade syntax and structural errors to warnings.
    pub ignore_errors: bool,
    /// Maximum multipart/message nesting depth.
    pub max_depth: usize,
    /// Redo hooks, tried in this order on every decoded leaf.
    pub redo_hooks: Vec<RedoHookKind>,
}

/// Redo hook tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedoConfig {
    /// How many lines the uuencode sniffer inspects (negative = all).
    pub uu_horizon: i64,
}

/// Body and scratch storage policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Keep decoded bodies in memory instead of writing files.
    pub to_core: bool,
    /// Directory for decoded bodies when `to_core` is false.
    pub dir: Option<PathBuf>,
    /// Keep the scratch store in memory instead of an anonymous temp file.
    pub tmp_to_core: bool,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            decode_headers: false,
            extract_nested_messages: NestedMessages::Nest,
            extract_encoded_containers: true,
            ignore_errors: true,
            max_depth: 64,
            redo_hooks: Vec::new(),
        }
    }
}

impl Default for RedoConfig {
    fn default() -> Self {
        Self { uu_horizon: 24 }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            to_core: true,
            dir: None,
            tmp_to_core: true,
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<()> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(())
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MIMEXPLODE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mimexplode").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mimexplode")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mimexplode.log")
}
