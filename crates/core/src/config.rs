//! TOML-based configuration system for HyDocPusher.
//!
//! The archive app token may be supplied through an `_env` field that names
//! an environment variable; it is resolved at runtime via
//! [`AppConfig::resolve_env_vars`] and overrides the literal token.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Archive submission envelope.
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Site constants written into every submission.
    #[serde(default)]
    pub site: SiteConfig,

    /// Classification rule store.
    #[serde(default)]
    pub classification: ClassificationConfig,

    /// Transform tuning.
    #[serde(default)]
    pub transform: TransformConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Archive envelope
// ---------------------------------------------------------------------------

/// Fixed envelope values of every archive submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Literal app token. Overridden by `app_token_env` when that resolves.
    #[serde(default = "default_app_token")]
    pub app_token: String,

    /// Environment variable holding the app token.
    #[serde(default)]
    pub app_token_env: Option<String>,

    #[serde(default = "default_company_name")]
    pub company_name: String,

    #[serde(default = "default_archive_type")]
    pub archive_type: String,
}

fn default_app_id() -> String {
    "NEWS".into()
}
fn default_app_token() -> String {
    "TmV3cytJbnRlcmZhY2U=".into()
}
fn default_company_name() -> String {
    "云南省能源投资集团有限公司".into()
}
fn default_archive_type() -> String {
    "17".into()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            app_token: default_app_token(),
            app_token_env: None,
            company_name: default_company_name(),
            archive_type: default_archive_type(),
        }
    }
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// Site constants: `wzmc` / `dn` in the archive data, and the host used to
/// absolutize relative attachment paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Website name written as `wzmc`.
    #[serde(default = "default_site_name")]
    pub name: String,

    /// Domain written as `dn`.
    #[serde(default = "default_site_domain")]
    pub domain: String,
}

fn default_site_name() -> String {
    "集团门户".into()
}
fn default_site_domain() -> String {
    "www.cnyeig.com".into()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: default_site_name(),
            domain: default_site_domain(),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Location of the channel classification rule table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,
}

fn default_rules_file() -> PathBuf {
    PathBuf::from("config/classification-rules.toml")
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            rules_file: default_rules_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Upper bound on attachments per submission (default 10).
    #[serde(default = "default_max_attachments")]
    pub max_attachments: usize,
}

fn default_max_attachments() -> usize {
    10
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_attachments: default_max_attachments(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve `*_env` fields from environment variables.
    ///
    /// A referenced variable that is unset logs a warning and leaves the
    /// literal value in place. It is an error when there is no literal to
    /// fall back on.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        if let Some(ref env_name) = self.archive.app_token_env {
            match resolve_optional_env(env_name, "archive.app_token_env") {
                Some(token) => self.archive.app_token = token,
                None if self.archive.app_token.trim().is_empty() => {
                    return Err(ConfigError::EnvVarMissing {
                        var: env_name.clone(),
                        field: "archive.app_token_env".into(),
                    });
                }
                None => {}
            }
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("archive.app_id", &self.archive.app_id),
            ("archive.app_token", &self.archive.app_token),
            ("archive.company_name", &self.archive.company_name),
            ("archive.archive_type", &self.archive.archive_type),
            ("site.name", &self.site.name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "must not be empty".into(),
                });
            }
        }
        if !is_valid_domain(&self.site.domain) {
            return Err(ConfigError::InvalidValue {
                field: "site.domain".into(),
                detail: format!("'{}' is not a valid domain name", self.site.domain),
            });
        }
        if self.classification.rules_file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "classification.rules_file".into(),
                detail: "rules file path must not be empty".into(),
            });
        }
        if self.transform.max_attachments == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transform.max_attachments".into(),
                detail: "must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Dot-separated labels of ASCII alphanumerics and inner hyphens, each at
/// most 63 characters.
fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain != domain.trim() {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
