//! Curated built-in corpus of common desktop configurations.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use super::{BaseFingerprint, CorpusEntry, CorpusError, CorpusStats, Criteria, GpuConfig, ProfileCorpus};
use crate::profile::catalog::{self, TIMEZONES, UNIVERSAL_FONTS};
use crate::profile::{BrowserType, OsType};

/// Versions seen in the wild per browser family.
fn versions(browser: BrowserType) -> &'static [&'static str] {
    match browser {
        BrowserType::Chrome => &["119.0.0.0", "120.0.0.0", "121.0.0.0", "122.0.0.0"],
        BrowserType::Edge => &["120.0.0.0", "121.0.0.0"],
        BrowserType::Firefox => &["120.0", "121.0", "122.0"],
        BrowserType::Safari => &["17.1", "17.2"],
    }
}

/// Market-share weight of a browser on an OS.
fn browser_weight(os: OsType, browser: BrowserType) -> u32 {
    match (os, browser) {
        (_, BrowserType::Chrome) => 6,
        (OsType::Macos, BrowserType::Safari) => 5,
        (_, BrowserType::Edge) => 2,
        (_, BrowserType::Firefox) => 2,
        (_, BrowserType::Safari) => 0,
    }
}

/// `(cpu cores, device memory)` pairs common on an OS.
fn hardware(os: OsType) -> &'static [(u32, f64)] {
    match os {
        OsType::Windows => &[(4, 8.0), (8, 8.0), (8, 16.0), (12, 16.0), (16, 32.0), (6, 8.0)],
        OsType::Macos => &[(8, 8.0), (8, 16.0), (10, 16.0), (12, 32.0)],
        OsType::Linux => &[(4, 8.0), (8, 16.0), (16, 32.0), (12, 16.0)],
    }
}

const CROSS_PLATFORM_FONTS: [&str; 5] = [
    "Arial Black",
    "Comic Sans MS",
    "Impact",
    "Trebuchet MS",
    "Palatino",
];

fn gpu(vendor: &str, renderer: &str, max_texture_size: u32, browsers: &[BrowserType]) -> GpuConfig {
    GpuConfig {
        unmasked_vendor: vendor.to_string(),
        unmasked_renderer: renderer.to_string(),
        max_texture_size,
        browsers: browsers.to_vec(),
    }
}

fn gpu_configs(os: OsType) -> Vec<GpuConfig> {
    match os {
        OsType::Windows => vec![
            gpu("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce GTX 1660 SUPER Direct3D11 vs_5_0 ps_5_0, D3D11)", 16384, &[]),
            gpu("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)", 16384, &[]),
            gpu("Google Inc. (NVIDIA)", "ANGLE (NVIDIA, NVIDIA GeForce RTX 4070 Direct3D11 vs_5_0 ps_5_0, D3D11)", 16384, &[]),
            gpu("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 580 Series Direct3D11 vs_5_0 ps_5_0, D3D11)", 16384, &[]),
            gpu("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 6700 XT Direct3D11 vs_5_0 ps_5_0, D3D11)", 16384, &[]),
            gpu("Google Inc. (Intel)", "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)", 16384, &[]),
            gpu("Google Inc. (Intel)", "ANGLE (Intel, Intel(R) Iris(R) Xe Graphics Direct3D11 vs_5_0 ps_5_0, D3D11)", 16384, &[]),
        ],
        OsType::Macos => vec![
            gpu("Google Inc. (Apple)", "ANGLE (Apple, ANGLE Metal Renderer: Apple M1, Unspecified Version)", 16384, &[BrowserType::Chrome, BrowserType::Edge, BrowserType::Firefox]),
            gpu("Google Inc. (Apple)", "ANGLE (Apple, ANGLE Metal Renderer: Apple M2, Unspecified Version)", 16384, &[BrowserType::Chrome, BrowserType::Edge, BrowserType::Firefox]),
            gpu("Google Inc. (Apple)", "ANGLE (Apple, ANGLE Metal Renderer: Apple M1 Pro, Unspecified Version)", 16384, &[BrowserType::Chrome, BrowserType::Edge, BrowserType::Firefox]),
            gpu("Google Inc. (Intel Inc.)", "ANGLE (Intel Inc., Intel(R) Iris(TM) Plus Graphics 655, OpenGL 4.1)", 16384, &[BrowserType::Chrome, BrowserType::Edge, BrowserType::Firefox]),
            gpu("Apple Inc.", "Apple GPU", 16384, &[BrowserType::Safari]),
        ],
        OsType::Linux => vec![
            gpu("Google Inc. (Intel)", "ANGLE (Intel, Mesa Intel(R) UHD Graphics 620 (KBL GT2), OpenGL 4.6)", 16384, &[]),
            gpu("Google Inc. (Intel)", "ANGLE (Intel, Mesa Intel(R) Xe Graphics (TGL GT2), OpenGL 4.6)", 16384, &[]),
            gpu("Google Inc. (NVIDIA Corporation)", "ANGLE (NVIDIA Corporation, NVIDIA GeForce GTX 1080/PCIe/SSE2, OpenGL 4.5.0)", 32768, &[]),
            gpu("Google Inc. (AMD)", "ANGLE (AMD, AMD Radeon RX 580 Series (radeonsi, polaris10, LLVM 15.0.7), OpenGL 4.6)", 16384, &[]),
        ],
    }
}

fn build_entries() -> Vec<CorpusEntry> {
    let mut entries = Vec::new();
    for os in OsType::ALL {
        let traits = catalog::traits(*os);
        let hw = hardware(*os);
        for browser in traits.browsers {
            for version in versions(*browser) {
                for (i, (width, height, dpr)) in catalog::resolutions(*os).iter().enumerate() {
                    let (cpu_cores, device_memory) = hw[i % hw.len()];
                    entries.push(CorpusEntry {
                        os: *os,
                        browser: *browser,
                        browser_version: version.to_string(),
                        user_agent: catalog::build_user_agent(*os, *browser, version),
                        screen_width: *width,
                        screen_height: *height,
                        device_pixel_ratio: *dpr,
                        cpu_cores,
                        device_memory,
                        weight: browser_weight(*os, *browser),
                    });
                }
            }
        }
    }
    entries
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Corpus backed by a static table of common desktop configurations.
pub struct BuiltinCorpus {
    entries: Vec<CorpusEntry>,
    initialized: AtomicBool,
}

impl Default for BuiltinCorpus {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinCorpus {
    pub fn new() -> Self {
        Self {
            entries: build_entries(),
            initialized: AtomicBool::new(false),
        }
    }

    fn matching(&self, criteria: Criteria) -> Vec<&CorpusEntry> {
        self.entries
            .iter()
            .filter(|e| criteria.os.map_or(true, |os| e.os == os))
            .filter(|e| criteria.browser.map_or(true, |b| e.browser == b))
            .collect()
    }
}

#[async_trait]
impl ProfileCorpus for BuiltinCorpus {
    async fn initialize(&self) -> Result<(), CorpusError> {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            info!(entries = self.entries.len(), "Built-in profile corpus ready");
        }
        Ok(())
    }

    fn by_os(&self, os: OsType) -> Vec<CorpusEntry> {
        self.matching(Criteria {
            os: Some(os),
            browser: None,
        })
        .into_iter()
        .cloned()
        .collect()
    }

    fn by_os_and_browser(&self, os: OsType, browser: BrowserType) -> Vec<CorpusEntry> {
        self.matching(Criteria {
            os: Some(os),
            browser: Some(browser),
        })
        .into_iter()
        .cloned()
        .collect()
    }

    fn available_browsers_for_os(&self, os: OsType) -> Vec<BrowserType> {
        let mut browsers: Vec<BrowserType> = self
            .entries
            .iter()
            .filter(|e| e.os == os)
            .map(|e| e.browser)
            .collect();
        browsers.sort();
        browsers.dedup();
        browsers
    }

    fn random_profile(&self) -> Option<CorpusEntry> {
        self.entries
            .choose_weighted(&mut rand::thread_rng(), |e| e.weight)
            .ok()
            .cloned()
    }

    fn profile_by_criteria(&self, criteria: Criteria) -> Option<CorpusEntry> {
        self.matching(criteria)
            .choose_weighted(&mut rand::thread_rng(), |e| e.weight)
            .ok()
            .map(|e| (*e).clone())
    }

    fn synthesized_profile(&self, criteria: Criteria) -> Option<CorpusEntry> {
        let mut rng = rand::thread_rng();
        let mut base = self
            .matching(criteria)
            .choose_weighted(&mut rng, |e| e.weight)
            .ok()
            .map(|e| (*e).clone())?;

        // Hardware from another machine of the same OS.
        let donors = self.matching(Criteria {
            os: Some(base.os),
            browser: None,
        });
        if let Some(donor) = donors.choose(&mut rng) {
            base.cpu_cores = donor.cpu_cores;
            base.device_memory = donor.device_memory;
        }
        Some(base)
    }

    fn generate_synthetic_fingerprint(
        &self,
        os: OsType,
        browser: BrowserType,
        seed: Option<u64>,
    ) -> Result<BaseFingerprint, CorpusError> {
        let mut rng = rng_for(seed);
        let candidates = self.matching(Criteria {
            os: Some(os),
            browser: Some(browser),
        });

        let entry = candidates
            .choose(&mut rng)
            .map(|e| (*e).clone())
            .ok_or(CorpusError::NoMatch { os, browser })?;

        let zone = TIMEZONES[rng.gen_range(0..TIMEZONES.len())];

        Ok(BaseFingerprint {
            entry,
            timezone: zone.name.to_string(),
            timezone_offset: zone.offset,
            latitude: zone.latitude,
            longitude: zone.longitude,
            locale: zone.locale.to_string(),
        })
    }

    fn fonts_for_os(&self, os: OsType) -> Vec<String> {
        let mut fonts: Vec<String> = UNIVERSAL_FONTS
            .iter()
            .chain(CROSS_PLATFORM_FONTS.iter())
            .chain(catalog::traits(os).typical_fonts.iter())
            .map(|s| s.to_string())
            .collect();
        fonts.sort();
        fonts.dedup();
        fonts
    }

    fn webgl_configs_for_os(&self, os: OsType) -> Vec<GpuConfig> {
        gpu_configs(os)
    }

    fn stats(&self) -> CorpusStats {
        let mut by_os = BTreeMap::new();
        let mut by_browser = BTreeMap::new();
        for entry in &self.entries {
            *by_os.entry(entry.os.to_string()).or_insert(0) += 1;
            *by_browser.entry(entry.browser.to_string()).or_insert(0) += 1;
        }
        CorpusStats {
            total_entries: self.entries.len(),
            by_os,
            by_browser,
            gpu_configs: OsType::ALL.iter().map(|os| gpu_configs(*os).len()).sum(),
            initialized: self.initialized.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let corpus = BuiltinCorpus::new();
        assert!(!corpus.stats().initialized);
        corpus.initialize().await.unwrap();
        corpus.initialize().await.unwrap();
        assert!(corpus.stats().initialized);
    }

    #[test]
    fn test_browser_matrix() {
        let corpus = BuiltinCorpus::new();
        assert_eq!(
            corpus.available_browsers_for_os(OsType::Linux),
            vec![BrowserType::Chrome, BrowserType::Firefox]
        );
        assert!(corpus
            .available_browsers_for_os(OsType::Macos)
            .contains(&BrowserType::Safari));
        assert!(!corpus
            .available_browsers_for_os(OsType::Windows)
            .contains(&BrowserType::Safari));
    }

    #[test]
    fn test_seeded_base_is_deterministic() {
        let corpus = BuiltinCorpus::new();
        let a = corpus
            .generate_synthetic_fingerprint(OsType::Windows, BrowserType::Chrome, Some(7))
            .unwrap();
        let b = corpus
            .generate_synthetic_fingerprint(OsType::Windows, BrowserType::Chrome, Some(7))
            .unwrap();
        assert_eq!(a, b);
        assert!(a.entry.user_agent.contains("Windows"));
    }

    #[test]
    fn test_unsupported_combination() {
        let corpus = BuiltinCorpus::new();
        let err = corpus
            .generate_synthetic_fingerprint(OsType::Linux, BrowserType::Safari, None)
            .unwrap_err();
        assert!(matches!(err, CorpusError::NoMatch { .. }));
    }

    #[test]
    fn test_gpu_configs_are_native() {
        let corpus = BuiltinCorpus::new();
        for os in OsType::ALL {
            for config in corpus.webgl_configs_for_os(*os) {
                assert!(catalog::gpu_vendor_known(*os, &config.unmasked_vendor));
                assert!(catalog::foreign_gpu_marker(*os, &config.unmasked_renderer).is_none());
            }
        }
    }

    #[test]
    fn test_stats_and_lookups() {
        let corpus = BuiltinCorpus::new();
        let stats = corpus.stats();
        assert_eq!(stats.by_os.values().sum::<usize>(), stats.total_entries);
        assert!(corpus.random_profile().is_some());
        let entry = corpus
            .profile_by_criteria(Criteria {
                os: Some(OsType::Macos),
                browser: Some(BrowserType::Safari),
            })
            .unwrap();
        assert_eq!(entry.browser, BrowserType::Safari);
        let synth = corpus
            .synthesized_profile(Criteria {
                os: Some(OsType::Linux),
                browser: None,
            })
            .unwrap();
        assert_eq!(synth.os, OsType::Linux);
    }

    #[test]
    fn test_fonts_include_universal() {
        let corpus = BuiltinCorpus::new();
        let fonts = corpus.fonts_for_os(OsType::Linux);
        for font in UNIVERSAL_FONTS {
            assert!(fonts.iter().any(|f| f == font));
        }
    }
}
