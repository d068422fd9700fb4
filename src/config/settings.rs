//! Fingerprint service settings and configuration management.
//!
//! Settings are layered with the usual precedence: defaults, then a TOML or
//! JSON file, then `KI_FINGERPRINT_*` environment variables, then CLI
//! arguments.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::injector::InjectorOptions;
use crate::noise::NoiseLevel;
use crate::profile::{BrowserType, OsType};

const ENV_PREFIX: &str = "KI_FINGERPRINT_";

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    /// Failed to serialize TOML configuration.
    #[error("Failed to serialize TOML configuration: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// Failed to parse JSON configuration.
    #[error("Failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Unsupported file format.
    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

/// Settings for the fingerprint service and the `ki-fingerprint` binary.
///
/// # Example
///
/// ```rust
/// use ki_fingerprint::config::FingerprintSettings;
///
/// let settings = FingerprintSettings::default()
///     .with_template_dir("/var/lib/ki/templates")
///     .with_strict_validation(true);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct FingerprintSettings {
    /// Directory holding `<id>.json` template documents.
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,

    /// OS used by `generate` when none is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_os: Option<OsType>,

    /// Browser used by `generate` when none is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_browser: Option<BrowserType>,

    /// Treat foreign OS fonts as errors instead of warnings.
    #[serde(default)]
    pub strict_validation: bool,

    #[serde(default)]
    pub minify: bool,

    #[serde(default = "default_true")]
    pub include_worker_interceptor: bool,

    #[serde(default = "default_true")]
    pub include_iframe_protection: bool,

    /// Advisory ceiling for a cold script generation.
    #[serde(default = "default_performance_budget_ms")]
    pub performance_budget_ms: u64,

    /// Seed encryption secret: 64 hex characters or a passphrase.
    /// Without one, a random key is used and sealed seeds do not survive a
    /// restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_secret: Option<String>,

    /// Canvas and audio noise level of generated profiles.
    #[serde(default)]
    pub default_noise_level: NoiseLevel,
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_true() -> bool {
    true
}

fn default_performance_budget_ms() -> u64 {
    50
}

fn parse_bool(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Self {
            template_dir: default_template_dir(),
            default_os: None,
            default_browser: None,
            strict_validation: false,
            minify: false,
            include_worker_interceptor: true,
            include_iframe_protection: true,
            performance_budget_ms: default_performance_budget_ms(),
            seed_secret: None,
            default_noise_level: NoiseLevel::default(),
        }
    }
}

impl fmt::Debug for FingerprintSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintSettings")
            .field("template_dir", &self.template_dir)
            .field("default_os", &self.default_os)
            .field("default_browser", &self.default_browser)
            .field("strict_validation", &self.strict_validation)
            .field("minify", &self.minify)
            .field("include_worker_interceptor", &self.include_worker_interceptor)
            .field("include_iframe_protection", &self.include_iframe_protection)
            .field("performance_budget_ms", &self.performance_budget_ms)
            .field("seed_secret", &self.seed_secret.as_ref().map(|_| "<redacted>"))
            .field("default_noise_level", &self.default_noise_level)
            .finish()
    }
}

impl FingerprintSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a TOML or JSON file, detected by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        match extension_of(path).as_str() {
            "toml" => Ok(toml::from_str(&content)?),
            "json" => Ok(serde_json::from_str(&content)?),
            ext => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    /// Saves settings; the format follows the file extension.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = match extension_of(path).as_str() {
            "toml" => toml::to_string_pretty(self)?,
            "json" => serde_json::to_string_pretty(self)?,
            ext => return Err(ConfigError::UnsupportedFormat(ext.to_string())),
        };

        fs::write(path, content)?;
        Ok(())
    }

    /// Defaults overridden by `KI_FINGERPRINT_*` environment variables.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    fn apply_env_overrides(&mut self) {
        let var = |name: &str| env::var(format!("{}{}", ENV_PREFIX, name)).ok();

        if let Some(val) = var("TEMPLATE_DIR") {
            self.template_dir = PathBuf::from(val);
        }

        if let Some(val) = var("DEFAULT_OS") {
            if let Ok(os) = val.parse() {
                self.default_os = Some(os);
            }
        }

        if let Some(val) = var("DEFAULT_BROWSER") {
            if let Ok(browser) = val.parse() {
                self.default_browser = Some(browser);
            }
        }

        if let Some(val) = var("STRICT_VALIDATION") {
            self.strict_validation = parse_bool(&val);
        }

        if let Some(val) = var("MINIFY") {
            self.minify = parse_bool(&val);
        }

        if let Some(val) = var("INCLUDE_WORKER_INTERCEPTOR") {
            self.include_worker_interceptor = parse_bool(&val);
        }

        if let Some(val) = var("INCLUDE_IFRAME_PROTECTION") {
            self.include_iframe_protection = parse_bool(&val);
        }

        if let Some(val) = var("PERFORMANCE_BUDGET_MS") {
            if let Ok(ms) = val.parse() {
                self.performance_budget_ms = ms;
            }
        }

        if let Some(val) = var("SEED_SECRET") {
            self.seed_secret = Some(val);
        }

        if let Some(val) = var("DEFAULT_NOISE_LEVEL") {
            if let Ok(level) = val.parse() {
                self.default_noise_level = level;
            }
        }
    }

    pub fn merge_with_env(mut self) -> Self {
        self.apply_env_overrides();
        self
    }

    /// Applies CLI overrides.
    ///
    /// ```rust
    /// use ki_fingerprint::config::{CliArgs, FingerprintSettings};
    ///
    /// let args = CliArgs {
    ///     minify: Some(true),
    ///     ..Default::default()
    /// };
    /// let settings = FingerprintSettings::default().merge_with_args(&args);
    /// assert!(settings.minify);
    /// ```
    pub fn merge_with_args(mut self, args: &CliArgs) -> Self {
        if let Some(ref dir) = args.template_dir {
            self.template_dir = dir.clone();
        }
        if let Some(os) = args.default_os {
            self.default_os = Some(os);
        }
        if let Some(browser) = args.default_browser {
            self.default_browser = Some(browser);
        }
        if let Some(strict) = args.strict_validation {
            self.strict_validation = strict;
        }
        if let Some(minify) = args.minify {
            self.minify = minify;
        }
        if let Some(ms) = args.performance_budget_ms {
            self.performance_budget_ms = ms;
        }
        if let Some(ref secret) = args.seed_secret {
            self.seed_secret = Some(secret.clone());
        }
        if let Some(level) = args.noise_level {
            self.default_noise_level = level;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.template_dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "Template directory cannot be empty".to_string(),
            ));
        }

        if self.performance_budget_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Performance budget must be at least 1ms".to_string(),
            ));
        }
        if self.performance_budget_ms > 10_000 {
            return Err(ConfigError::ValidationError(
                "Performance budget cannot exceed 10000ms".to_string(),
            ));
        }

        if let Some(ref secret) = self.seed_secret {
            if secret.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Seed secret cannot be blank".to_string(),
                ));
            }
            if secret.len() < 12 {
                return Err(ConfigError::ValidationError(
                    "Seed secret passphrase must be at least 12 characters".to_string(),
                ));
            }
        }

        if let (Some(os), Some(browser)) = (self.default_os, self.default_browser) {
            if !crate::profile::catalog::traits(os).browsers.contains(&browser) {
                return Err(ConfigError::ValidationError(format!(
                    "Default browser {} is not available on {}",
                    browser, os
                )));
            }
        }

        Ok(())
    }

    /// Injector options these settings describe.
    pub fn injector_options(&self) -> InjectorOptions {
        InjectorOptions {
            minify: self.minify,
            include_worker_interceptor: self.include_worker_interceptor,
            include_iframe_protection: self.include_iframe_protection,
            performance_budget: Duration::from_millis(self.performance_budget_ms),
        }
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    pub fn with_seed_secret(mut self, secret: impl Into<String>) -> Self {
        self.seed_secret = Some(secret.into());
        self
    }

    pub fn with_default_os(mut self, os: OsType) -> Self {
        self.default_os = Some(os);
        self
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Optional overrides parsed from the command line.
#[derive(Debug, Default, Clone)]
pub struct CliArgs {
    pub template_dir: Option<PathBuf>,
    pub default_os: Option<OsType>,
    pub default_browser: Option<BrowserType>,
    pub strict_validation: Option<bool>,
    pub minify: Option<bool>,
    pub performance_budget_ms: Option<u64>,
    pub seed_secret: Option<String>,
    pub noise_level: Option<NoiseLevel>,
    /// Configuration file path.
    pub config_file: Option<PathBuf>,
}

impl CliArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves defaults, file, environment and these arguments, then
    /// validates the result.
    pub fn load_settings(&self) -> Result<FingerprintSettings, ConfigError> {
        let mut settings = if let Some(ref config_file) = self.config_file {
            FingerprintSettings::from_file(config_file)?
        } else {
            FingerprintSettings::default()
        };

        settings = settings.merge_with_env();
        settings = settings.merge_with_args(self);
        settings.validate()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = FingerprintSettings::default();
        assert_eq!(settings.template_dir, PathBuf::from("templates"));
        assert!(settings.include_worker_interceptor);
        assert!(settings.include_iframe_protection);
        assert!(!settings.minify);
        assert_eq!(settings.performance_budget_ms, 50);
        assert_eq!(settings.default_noise_level, NoiseLevel::Medium);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut settings = FingerprintSettings::default();
        settings.performance_budget_ms = 0;
        assert!(settings.validate().is_err());

        let settings = FingerprintSettings::default().with_seed_secret("short");
        assert!(settings.validate().is_err());

        let mut settings = FingerprintSettings::default().with_default_os(OsType::Linux);
        settings.default_browser = Some(BrowserType::Safari);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cli_args_merge() {
        let args = CliArgs {
            template_dir: Some(PathBuf::from("/tmp/tpl")),
            noise_level: Some(NoiseLevel::High),
            ..Default::default()
        };
        let settings = FingerprintSettings::default().merge_with_args(&args);
        assert_eq!(settings.template_dir, PathBuf::from("/tmp/tpl"));
        assert_eq!(settings.default_noise_level, NoiseLevel::High);
        assert_eq!(settings.performance_budget_ms, 50);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FingerprintSettings::default()
            .with_default_os(OsType::Macos)
            .with_seed_secret("correct horse battery staple");

        for name in ["settings.toml", "settings.json"] {
            let path = dir.path().join(name);
            settings.to_file(&path).unwrap();
            let loaded = FingerprintSettings::from_file(&path).unwrap();
            assert_eq!(loaded.default_os, Some(OsType::Macos));
            assert_eq!(loaded.seed_secret, settings.seed_secret);
        }

        let bad = dir.path().join("settings.yaml");
        fs::write(&bad, "minify: true").unwrap();
        assert!(matches!(
            FingerprintSettings::from_file(&bad),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: FingerprintSettings = toml::from_str("minify = true\ndefault_os = \"linux\"").unwrap();
        assert!(settings.minify);
        assert_eq!(settings.default_os, Some(OsType::Linux));
        assert!(settings.include_iframe_protection);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let settings = FingerprintSettings::default().with_seed_secret("super secret passphrase");
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("super secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_injector_options() {
        let mut settings = FingerprintSettings::default();
        settings.performance_budget_ms = 120;
        let options = settings.injector_options();
        assert_eq!(options.performance_budget, Duration::from_millis(120));
        assert!(options.include_worker_interceptor);
    }
}
