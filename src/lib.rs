//! # KI-Fingerprint
//!
//! Consistent, per-account browser fingerprints and the JavaScript that
//! makes a page see them.
//!
//! KI-Fingerprint generates realistic fingerprint profiles from a corpus of
//! real-world hardware configurations, checks them for cross-surface
//! consistency, and compiles them into injection scripts for pages, iframes
//! and workers. Every overridden property is camouflaged so it still looks
//! native to introspection.
//!
//! ## Features
//!
//! - **Profile Generation**: Weighted picks from a hardware corpus with OS/browser/GPU coherence
//! - **Consistency Validation**: Errors and warnings with suggested repairs
//! - **Deterministic Noise**: Seeded canvas, audio, WebGL and client-rect perturbation
//! - **Script Injection**: Page, preload, iframe and worker scripts with caching
//! - **Templates**: Reusable profiles persisted as JSON documents
//! - **Seed Management**: Noise seeds sealed at rest with AES-GCM
//! - **Self-Test**: Probe harness that checks a profile the way a detection page would
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ki_fingerprint::prelude::*;
//! use ki_fingerprint::generator::GenerateOptions;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = FingerprintSettings::default().with_seed_secret("correct horse battery");
//!     let service = FingerprintService::from_settings(&settings)?;
//!     service.initialize().await?;
//!
//!     service.generate_for_account("account-1", GenerateOptions::default());
//!     let script = service.injector_for("account-1", None)?.injection_script()?;
//!     println!("{} bytes of injection script", script.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`profile`]: The profile data model, OS catalog and consistency validator
//! - [`corpus`]: Real-world hardware configurations to generate from
//! - [`generator`]: Profile generation and repair
//! - [`noise`]: Seeded noise primitives
//! - [`seed`]: Noise seed generation, sealing and rotation
//! - [`stealth`]: Spoofing modules and the camouflage runtime
//! - [`injector`]: Script assembly, caching and worker interception
//! - [`template`]: Template CRUD over a pluggable store
//! - [`selftest`]: Detection probes and reports
//! - [`service`]: Per-account profile management
//! - [`config`]: Configuration loading and management
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       FingerprintService                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐         │
//! │  │  Corpus  │─▶│Generator │  │ Template │  │   Seed   │         │
//! │  └──────────┘  └────┬─────┘  └────┬─────┘  └────┬─────┘         │
//! │                     └─────────────┼─────────────┘               │
//! │                             ┌─────┴─────┐                       │
//! │                             │  Profile  │                       │
//! │                             └─────┬─────┘                       │
//! │                   ┌───────────────┼───────────────┐             │
//! │             ┌─────┴─────┐   ┌─────┴─────┐   ┌─────┴─────┐       │
//! │             │ Injector  │◀──│  Stealth  │   │ Self-Test │       │
//! │             └───────────┘   └───────────┘   └───────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//!
//! Configuration follows a precedence chain:
//! 1. Default values
//! 2. Configuration file (TOML/JSON)
//! 3. Environment variables (`KI_FINGERPRINT_*`)
//! 4. CLI arguments
//!
//! See [`config::FingerprintSettings`] for all available options.

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Full version string with name
pub const FULL_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Module Exports
// ============================================================================

/// Configuration management for loading settings from files, env, and CLI.
pub mod config;

/// Real-world hardware configurations profiles are generated from.
pub mod corpus;

/// Profile generation and repair.
pub mod generator;

/// Script assembly, caching and worker interception.
pub mod injector;

/// Seeded noise primitives shared by every noisy surface.
pub mod noise;

/// The fingerprint profile model and its consistency rules.
pub mod profile;

/// Noise seed generation, sealing and rotation.
pub mod seed;

/// Detection probes and reports.
pub mod selftest;

/// Per-account profile management.
pub mod service;

/// Spoofing modules and the camouflage runtime.
pub mod stealth;

/// Reusable fingerprint templates.
pub mod template;

// ============================================================================
// Re-exports for Convenience
// ============================================================================

// Profile types
pub use profile::{
    BrowserType, ConsistencyValidator, FingerprintProfile, OsType, ProfileError, ValidationIssue,
    ValidationReport,
};

// Generation types
pub use corpus::{BuiltinCorpus, CorpusError, ProfileCorpus};
pub use generator::{FingerprintGenerator, GenerateOptions, GeneratorError};
pub use noise::{NoiseEngine, NoiseLevel};
pub use seed::{NoiseSeed, SeedError, SeedManager};

// Injection types
pub use injector::{Injector, InjectorError, InjectorOptions, WorkerInterceptor};
pub use stealth::{ScriptContext, SpoofModule};

// Template types
pub use template::{FingerprintTemplate, TemplateError, TemplateManager};

// Self-test types
pub use selftest::{ProbeCategory, TestReport, TestRunner};

// Service and config types
pub use config::{CliArgs, ConfigError, FingerprintSettings};
pub use service::{FingerprintService, ServiceError};

// ============================================================================
// Prelude Module
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust
/// use ki_fingerprint::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{CliArgs, FingerprintSettings};
    pub use crate::injector::{Injector, InjectorOptions};
    pub use crate::profile::{BrowserType, FingerprintProfile, OsType};
    pub use crate::selftest::{RunFilter, TestRunner};
    pub use crate::service::FingerprintService;
    pub use crate::{FULL_VERSION, NAME, VERSION};
}
