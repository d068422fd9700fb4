//! Source of realistic base fingerprints.
//!
//! The generator never invents User-Agents or GPU strings on its own; it asks
//! a [`ProfileCorpus`] for entries observed in the wild. [`BuiltinCorpus`]
//! ships a small curated data set; hosts with a real-world database plug in
//! their own implementation.

mod builtin;

pub use builtin::BuiltinCorpus;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::profile::{BrowserType, OsType};

/// Errors reported by a corpus.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// Loading the corpus failed.
    #[error("Failed to initialize profile corpus: {0}")]
    Initialization(String),

    /// No entry exists for the requested combination.
    #[error("No corpus entry for {os}/{browser}")]
    NoMatch { os: OsType, browser: BrowserType },
}

/// A real-world browser configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusEntry {
    pub os: OsType,
    pub browser: BrowserType,
    pub browser_version: String,
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub device_pixel_ratio: f64,
    pub cpu_cores: u32,
    pub device_memory: f64,
    /// Relative frequency among entries of the same OS.
    pub weight: u32,
}

/// A GPU configuration as reported through `WEBGL_debug_renderer_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuConfig {
    pub unmasked_vendor: String,
    pub unmasked_renderer: String,
    pub max_texture_size: u32,
    /// Browsers reporting this pairing; empty means every browser.
    #[serde(default)]
    pub browsers: Vec<BrowserType>,
}

impl GpuConfig {
    pub fn supports(&self, browser: BrowserType) -> bool {
        self.browsers.is_empty() || self.browsers.contains(&browser)
    }
}

/// Lookup filter for [`ProfileCorpus::profile_by_criteria`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Criteria {
    pub os: Option<OsType>,
    pub browser: Option<BrowserType>,
}

/// A base fingerprint for the generator to build on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseFingerprint {
    pub entry: CorpusEntry,
    pub timezone: String,
    pub timezone_offset: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub locale: String,
}

/// Corpus statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusStats {
    pub total_entries: usize,
    pub by_os: BTreeMap<String, usize>,
    pub by_browser: BTreeMap<String, usize>,
    pub gpu_configs: usize,
    pub initialized: bool,
}

/// Read access to a real-world fingerprint corpus.
///
/// Only [`initialize`](ProfileCorpus::initialize) touches I/O; lookups are
/// synchronous and served from memory.
#[async_trait]
pub trait ProfileCorpus: Send + Sync {
    /// Loads the corpus. Safe to call more than once.
    async fn initialize(&self) -> Result<(), CorpusError>;

    fn by_os(&self, os: OsType) -> Vec<CorpusEntry>;

    fn by_os_and_browser(&self, os: OsType, browser: BrowserType) -> Vec<CorpusEntry>;

    fn available_browsers_for_os(&self, os: OsType) -> Vec<BrowserType>;

    fn random_profile(&self) -> Option<CorpusEntry>;

    fn profile_by_criteria(&self, criteria: Criteria) -> Option<CorpusEntry>;

    /// An entry combining attributes of several matching entries.
    fn synthesized_profile(&self, criteria: Criteria) -> Option<CorpusEntry>;

    /// A base fingerprint for `(os, browser)`, deterministic when `seed` is set.
    fn generate_synthetic_fingerprint(
        &self,
        os: OsType,
        browser: BrowserType,
        seed: Option<u64>,
    ) -> Result<BaseFingerprint, CorpusError>;

    fn fonts_for_os(&self, os: OsType) -> Vec<String>;

    fn webgl_configs_for_os(&self, os: OsType) -> Vec<GpuConfig>;

    fn stats(&self) -> CorpusStats;
}
