//! Configuration for the fingerprint service and the `ki-fingerprint` binary.
//!
//! - Loading settings from files (TOML/JSON)
//! - Environment variable overrides (`KI_FINGERPRINT_*`)
//! - CLI argument overrides
//! - Validation and defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use ki_fingerprint::config::FingerprintSettings;
//!
//! let settings = FingerprintSettings::from_file("fingerprint.toml")
//!     .unwrap()
//!     .merge_with_env();
//! settings.validate().unwrap();
//! ```

mod settings;

pub use settings::{CliArgs, ConfigError, FingerprintSettings};
