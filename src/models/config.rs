//! Configuration models for chorus.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use crate::models::GenerationParams;
use serde::{Deserialize, Serialize};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex is valid"));

/// Top-level configuration for chorus.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Gateway endpoint and credential settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Defaults applied when the caller does not override them
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

/// Gateway API configuration.
///
/// K_i: The gateway fronts many models behind one OpenAI-style contract.
/// B_i: The credential may rotate while the process is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL for the gateway API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key template; `${VAR}` placeholders are expanded on every call
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variables consulted in order when `api_key` is unset
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Vec<String>,

    /// Dotenv file re-read on every call (defaults to config/.env or .env)
    #[serde(default)]
    pub dotenv_path: Option<PathBuf>,

    /// Timeout for chat completion calls in seconds
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_secs: u64,

    /// Timeout for generation stats and catalog calls in seconds
    #[serde(default = "default_metadata_timeout")]
    pub metadata_timeout_secs: u64,

    /// Value of the HTTP-Referer header
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Value of the X-Title header
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> Vec<String> {
    vec![
        "OPENAI_API_KEY".to_string(),
        "OPENROUTER_API_KEY".to_string(),
    ]
}

fn default_chat_timeout() -> u64 {
    180
}

fn default_metadata_timeout() -> u64 {
    60
}

fn default_referer() -> String {
    "http://localhost:3000".to_string()
}

fn default_title() -> String {
    "chorus".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            dotenv_path: None,
            chat_timeout_secs: default_chat_timeout(),
            metadata_timeout_secs: default_metadata_timeout(),
            referer: default_referer(),
            title: default_title(),
        }
    }
}

impl GatewayConfig {
    /// Dotenv file to consult for credentials.
    ///
    /// An explicit path wins. Otherwise `config/.env` is used when a `config`
    /// directory exists (container mount), else `.env` in the working directory.
    pub fn resolve_dotenv_path(&self) -> PathBuf {
        match &self.dotenv_path {
            Some(path) => path.clone(),
            None => default_dotenv_path_in(Path::new("")),
        }
    }
}

/// Default dotenv location under `base`: `config/.env` when a `config`
/// directory exists, else `.env`. An empty `base` means the working directory.
pub fn default_dotenv_path_in(base: &Path) -> PathBuf {
    let config_dir = base.join("config");
    if config_dir.is_dir() {
        config_dir.join(".env")
    } else {
        base.join(".env")
    }
}

/// Request defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Load from `path` when given, otherwise use built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.chat_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gateway.chat_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.gateway.metadata_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gateway.metadata_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        // Chat calls do generation work, metadata calls don't.
        if self.gateway.chat_timeout_secs < self.gateway.metadata_timeout_secs {
            return Err(ConfigError::InvalidValue {
                field: "gateway.chat_timeout_secs".to_string(),
                message: format!(
                    "must not be shorter than metadata_timeout_secs ({})",
                    self.gateway.metadata_timeout_secs
                ),
            });
        }
        if self.gateway.api_key.is_none() && self.gateway.api_key_env.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "gateway.api_key_env".to_string(),
                message: "set api_key or at least one environment variable name".to_string(),
            });
        }
        self.default_params()
            .map_err(|e| ConfigError::InvalidValue {
                field: "defaults".to_string(),
                message: e.to_string(),
            })
            .map(|_| ())
    }

    /// Generation parameters from the `[defaults]` section.
    pub fn default_params(&self) -> crate::models::Result<GenerationParams> {
        GenerationParams::new(self.defaults.temperature, self.defaults.max_tokens as i64)
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    ENV_VAR_PATTERN.replace_all(s, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error
/// - I^B materialized: Missing required values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key ({source_name}): set it in the environment, a .env file or api_key in config")]
    MissingApiKey { source_name: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.base_url, "https://openrouter.ai/api/v1");
        assert_eq!(
            config.gateway.api_key_env,
            vec!["OPENAI_API_KEY", "OPENROUTER_API_KEY"]
        );
        assert!(config.gateway.chat_timeout_secs > config.gateway.metadata_timeout_secs);
        assert_eq!(config.defaults.max_tokens, 2048);
        assert_eq!(config.defaults.temperature, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[gateway]
base_url = "http://localhost:9999/api/v1"
api_key_env = ["MY_GATEWAY_KEY"]

[defaults]
temperature = 0.5
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.gateway.base_url, "http://localhost:9999/api/v1");
        assert_eq!(config.gateway.api_key_env, vec!["MY_GATEWAY_KEY"]);
        assert_eq!(config.gateway.chat_timeout_secs, 180);
        assert_eq!(config.defaults.temperature, 0.5);
        assert_eq!(config.defaults.system_prompt, "You are a helpful assistant.");
    }

    #[test]
    fn test_from_file_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[gateway\nbase_url = ").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.gateway.title, "chorus");
    }

    #[test]
    fn test_validate_rejects_bad_timeouts() {
        let mut config = Config::default();
        config.gateway.chat_timeout_secs = 10;
        config.gateway.metadata_timeout_secs = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));

        config.gateway.chat_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_defaults() {
        let mut config = Config::default();
        config.defaults.temperature = 1.5;
        assert!(config.validate().is_err());

        config.defaults.temperature = 1.0;
        config.defaults.max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_dotenv_path_wins() {
        let config = GatewayConfig {
            dotenv_path: Some(PathBuf::from("/tmp/secrets.env")),
            ..GatewayConfig::default()
        };
        assert_eq!(
            config.resolve_dotenv_path(),
            PathBuf::from("/tmp/secrets.env")
        );
    }

    #[test]
    fn test_default_dotenv_path_prefers_config_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(default_dotenv_path_in(dir.path()), dir.path().join(".env"));

        std::fs::create_dir(dir.path().join("config")).unwrap();
        assert_eq!(
            default_dotenv_path_in(dir.path()),
            dir.path().join("config").join(".env")
        );
    }

    #[test]
    fn test_expand_env_vars_repeated_calls() {
        let path = std::env::var("PATH").unwrap();
        for _ in 0..3 {
            assert_eq!(expand_env_vars("${PATH}:${PATH}"), format!("{path}:{path}"));
        }
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown_placeholder() {
        let expanded = expand_env_vars("Bearer ${CHORUS_TEST_SURELY_UNSET_VAR}");
        assert_eq!(expanded, "Bearer ${CHORUS_TEST_SURELY_UNSET_VAR}");
        assert_eq!(expand_env_vars("plain"), "plain");
    }
}
