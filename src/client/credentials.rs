//! Credential providers for the gateway.
//!
//! Epistemic foundation:
//! - K_i: Every request carries a bearer credential
//! - B_i: The credential may be rotated while the process runs
//! - I^R: Where the credential lives (env, .env file, config) is user-chosen
//!
//! Providers are consulted on every call, never cached at startup.

use crate::models::{ConfigError, GatewayConfig, default_dotenv_path_in, expand_env_vars};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of the gateway API key.
///
/// Implementations must be safe for concurrent reads: every in-flight
/// request resolves the key independently.
pub trait CredentialProvider: Send + Sync {
    /// Resolve the current API key.
    fn api_key(&self) -> Result<String, ConfigError>;

    /// Short description for logs and error messages (never the key).
    fn describe(&self) -> String;
}

/// Fixed API key.
#[derive(Clone)]
pub struct StaticCredential {
    key: String,
}

impl StaticCredential {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredential").finish_non_exhaustive()
    }
}

impl CredentialProvider for StaticCredential {
    fn api_key(&self) -> Result<String, ConfigError> {
        if self.key.is_empty() {
            return Err(ConfigError::MissingApiKey {
                source_name: self.describe(),
            });
        }
        Ok(self.key.clone())
    }

    fn describe(&self) -> String {
        "static key".to_string()
    }
}

/// Key template from config, `${VAR}` placeholders expanded per call.
#[derive(Debug, Clone)]
pub struct ExpandedCredential {
    template: String,
}

impl ExpandedCredential {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl CredentialProvider for ExpandedCredential {
    fn api_key(&self) -> Result<String, ConfigError> {
        let key = expand_env_vars(&self.template);
        if key.is_empty() || key.contains("${") {
            return Err(ConfigError::MissingApiKey {
                source_name: self.describe(),
            });
        }
        Ok(key)
    }

    fn describe(&self) -> String {
        "gateway.api_key in config".to_string()
    }
}

/// Key looked up by variable name in a dotenv file, then the process environment.
///
/// The dotenv file is re-read on every call and its values take precedence
/// over the process environment. Without an explicit path the default
/// location (`config/.env`, else `.env`) is resolved per call too, so a
/// file mounted after startup is picked up. Variables are tried in order;
/// the first non-empty value wins.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    vars: Vec<String>,
    dotenv_path: Option<PathBuf>,
    /// Directory the default location is resolved against; empty is the working directory
    base_dir: PathBuf,
}

impl EnvCredential {
    pub fn new(vars: Vec<String>, dotenv_path: Option<PathBuf>) -> Self {
        Self {
            vars,
            dotenv_path,
            base_dir: PathBuf::new(),
        }
    }

    /// Resolve the default dotenv location under `base_dir` instead of the working directory.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    fn dotenv_path(&self) -> PathBuf {
        match &self.dotenv_path {
            Some(path) => path.clone(),
            None => default_dotenv_path_in(&self.base_dir),
        }
    }

    fn read_dotenv(&self) -> HashMap<String, String> {
        let path = self.dotenv_path();
        let iter = match dotenvy::from_path_iter(&path) {
            Ok(iter) => iter,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No dotenv file");
                return HashMap::new();
            }
        };

        let mut values = HashMap::new();
        for item in iter {
            match item {
                Ok((key, value)) => {
                    values.insert(key, value);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping malformed dotenv line");
                }
            }
        }
        values
    }
}

impl CredentialProvider for EnvCredential {
    fn api_key(&self) -> Result<String, ConfigError> {
        let from_file = self.read_dotenv();

        for var in &self.vars {
            if let Some(value) = from_file.get(var).filter(|v| !v.is_empty()) {
                return Ok(value.clone());
            }
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }

        Err(ConfigError::MissingApiKey {
            source_name: self.describe(),
        })
    }

    fn describe(&self) -> String {
        format!("{} (env or {})", self.vars.join(", "), self.dotenv_path().display())
    }
}

/// Build the provider described by the gateway configuration.
///
/// An explicit `api_key` wins; otherwise variables are looked up.
pub fn credential_provider(config: &GatewayConfig) -> Arc<dyn CredentialProvider> {
    match &config.api_key {
        Some(template) => Arc::new(ExpandedCredential::new(template.clone())),
        None => Arc::new(EnvCredential::new(
            config.api_key_env.clone(),
            config.dotenv_path.clone(),
        )),
    }
}
