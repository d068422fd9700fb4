//! Fingerprint profile generation.
//!
//! The generator draws a realistic base from a [`ProfileCorpus`], fills in
//! every other dimension, assigns a fresh identity and noise seed, and
//! finishes with [`repair`]. A generated profile always validates with zero
//! errors.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ki_fingerprint::corpus::BuiltinCorpus;
//! use ki_fingerprint::generator::{FingerprintGenerator, GenerateOptions};
//! use ki_fingerprint::profile::{BrowserType, OsType};
//!
//! let generator = FingerprintGenerator::new(Arc::new(BuiltinCorpus::new()));
//! let profile = generator
//!     .generate(GenerateOptions {
//!         os: Some(OsType::Windows),
//!         browser: Some(BrowserType::Chrome),
//!         ..Default::default()
//!     })
//!     .unwrap();
//! assert_eq!(profile.os.platform, "Win32");
//! ```

mod repair;

pub use repair::repair;

use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::corpus::{BaseFingerprint, CorpusError, GpuConfig, ProfileCorpus};
use crate::noise::NoiseLevel;
use crate::profile::catalog::{self, UNIVERSAL_FONTS};
use crate::profile::{
    BlockableMode, BrowserType, ConsistencyValidator, FingerprintProfile, OsType, ScreenInfo,
    WebGlInfo, WebGlMode,
};
use crate::seed::{generate_secure_seed, NoiseSeed};

/// OS selection weights when no OS is requested.
pub const OS_WEIGHTS: [(OsType, f64); 3] = [
    (OsType::Windows, 0.7),
    (OsType::Macos, 0.2),
    (OsType::Linux, 0.1),
];

const MIN_FONTS: usize = 10;
const MAX_FONTS: usize = 20;

/// Errors raised during generation.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// The browser is not available on the requested OS.
    #[error("Browser {browser} is not available on {os}")]
    UnsupportedBrowser { os: OsType, browser: BrowserType },

    /// The corpus could not supply a base.
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// The corpus returned no GPU configuration for the OS.
    #[error("No WebGL configuration available for {0}/{1}")]
    NoGpu(OsType, BrowserType),

    /// The repaired profile still failed validation.
    #[error("Generated profile is inconsistent: {0:?}")]
    Inconsistent(Vec<String>),
}

/// Options for [`FingerprintGenerator::generate`].
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub account_id: Option<String>,
    pub os: Option<OsType>,
    pub browser: Option<BrowserType>,
    /// Makes every choice except identity and noise seed reproducible.
    pub seed: Option<u64>,
}

/// Produces self-consistent fingerprint profiles.
pub struct FingerprintGenerator {
    corpus: Arc<dyn ProfileCorpus>,
    validator: ConsistencyValidator,
    noise_level: NoiseLevel,
}

impl FingerprintGenerator {
    pub fn new(corpus: Arc<dyn ProfileCorpus>) -> Self {
        Self {
            corpus,
            validator: ConsistencyValidator::new(),
            noise_level: NoiseLevel::default(),
        }
    }

    /// Sets the canvas and audio noise level of generated profiles.
    pub fn with_noise_level(mut self, level: NoiseLevel) -> Self {
        self.noise_level = level;
        self
    }

    pub fn corpus(&self) -> &Arc<dyn ProfileCorpus> {
        &self.corpus
    }

    /// Generates a complete, consistent profile.
    pub fn generate(&self, options: GenerateOptions) -> Result<FingerprintProfile, GeneratorError> {
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let os = match options.os {
            Some(os) => os,
            None => pick_os(&mut rng),
        };

        let browsers = self.corpus.available_browsers_for_os(os);
        let browser = match options.browser {
            Some(browser) if browsers.contains(&browser) => browser,
            Some(browser) => return Err(GeneratorError::UnsupportedBrowser { os, browser }),
            None => *browsers
                .choose(&mut rng)
                .ok_or(GeneratorError::UnsupportedBrowser {
                    os,
                    browser: BrowserType::Chrome,
                })?,
        };

        let base = self
            .corpus
            .generate_synthetic_fingerprint(os, browser, Some(rng.gen()))?;

        let gpus: Vec<GpuConfig> = self
            .corpus
            .webgl_configs_for_os(os)
            .into_iter()
            .filter(|g| g.supports(browser))
            .collect();
        let gpu = gpus.choose(&mut rng).ok_or(GeneratorError::NoGpu(os, browser))?;

        let fonts = pick_fonts(&mut rng, os, self.corpus.fonts_for_os(os));

        let mut profile = self.assemble(os, browser, &base, gpu, fonts);
        profile.reidentify(options.account_id.clone());
        profile.noise_seed = Some(NoiseSeed::plain(generate_secure_seed()));

        let profile = repair(&profile);

        let report = self.validator.validate(&profile);
        if !report.valid {
            let messages: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
            return Err(GeneratorError::Inconsistent(messages));
        }

        debug!(
            profile = %profile.id,
            label = %profile.label(),
            warnings = report.warnings.len(),
            "Generated fingerprint profile"
        );
        Ok(profile)
    }

    /// Generates a profile, falling back to the default profile on failure.
    ///
    /// The fallback still gets a fresh identity and noise seed.
    pub fn generate_or_default(&self, options: GenerateOptions) -> FingerprintProfile {
        let account_id = options.account_id.clone();
        match self.generate(options) {
            Ok(profile) => profile,
            Err(e) => {
                error!(error = %e, "Fingerprint generation failed, using default profile");
                let mut profile = FingerprintProfile::default();
                profile.reidentify(account_id);
                profile.noise_seed = Some(NoiseSeed::plain(generate_secure_seed()));
                profile
            }
        }
    }

    /// Generates `count` profiles for the same options.
    pub fn generate_batch(
        &self,
        count: usize,
        options: &GenerateOptions,
    ) -> Result<Vec<FingerprintProfile>, GeneratorError> {
        let profiles = (0..count)
            .map(|i| {
                let mut opts = options.clone();
                opts.seed = options.seed.map(|s| s.wrapping_add(i as u64));
                self.generate(opts)
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = profiles.len(), "Generated fingerprint batch");
        Ok(profiles)
    }

    fn assemble(
        &self,
        os: OsType,
        browser: BrowserType,
        base: &BaseFingerprint,
        gpu: &GpuConfig,
        fonts: Vec<String>,
    ) -> FingerprintProfile {
        let entry = &base.entry;
        let mut p = FingerprintProfile::default();

        p.browser.r#type = browser;
        p.browser.version = entry.browser_version.clone();
        p.browser.major_version = catalog::major_version(&entry.browser_version);

        let traits = catalog::traits(os);
        p.os.r#type = os;
        p.os.version = traits.default_version.to_string();
        p.os.platform = traits.platform.to_string();
        p.user_agent = entry.user_agent.clone();

        let languages = catalog::languages_for_locale(&base.locale);
        p.navigator.vendor = catalog::navigator_vendor(browser).to_string();
        p.navigator.product_sub = catalog::product_sub(browser).to_string();
        p.navigator.app_version = catalog::app_version(browser, &entry.user_agent);
        p.navigator.language = base.locale.clone();
        p.navigator.languages = languages.clone();
        p.navigator.webdriver = Some(false);

        p.hardware.cpu_cores = entry.cpu_cores;
        p.hardware.device_memory = entry.device_memory;
        p.hardware.device_pixel_ratio = entry.device_pixel_ratio;
        p.hardware.screen = ScreenInfo::new(
            entry.screen_width,
            entry.screen_height,
            catalog::reserved_screen_height(os),
        );

        p.canvas.noise_level = self.noise_level;
        p.audio.noise_level = self.noise_level;

        let (masked_vendor, masked_renderer) = catalog::masked_webgl(browser);
        let (version, shading) = catalog::webgl_versions(browser);
        p.webgl = WebGlInfo {
            mode: WebGlMode::Custom,
            vendor: masked_vendor.to_string(),
            renderer: masked_renderer.to_string(),
            unmasked_vendor: gpu.unmasked_vendor.clone(),
            unmasked_renderer: gpu.unmasked_renderer.clone(),
            version: version.to_string(),
            shading_language_version: shading.to_string(),
            max_texture_size: gpu.max_texture_size,
            ..WebGlInfo::default()
        };

        p.fonts.list = fonts;

        p.language.locale = base.locale.clone();
        p.language.accept_language = catalog::accept_language(&languages);
        p.advanced_apis.keyboard_layout = base.locale.clone();

        p.timezone.name = base.timezone.clone();
        p.timezone.offset = base.timezone_offset;
        p.geolocation.latitude = base.latitude;
        p.geolocation.longitude = base.longitude;

        p.speech.voices = catalog::speech_voices(os);

        // Firefox and Safari do not ship WebBluetooth or WebUSB.
        if matches!(browser, BrowserType::Firefox | BrowserType::Safari) {
            p.advanced_apis.bluetooth = false;
            p.advanced_apis.usb = false;
        }
        // WebKit removed the Battery Status API.
        if browser == BrowserType::Safari {
            p.battery.mode = BlockableMode::Block;
        }

        p
    }
}

fn pick_os<R: Rng>(rng: &mut R) -> OsType {
    let weights = OS_WEIGHTS.iter().map(|(_, w)| *w);
    match WeightedIndex::new(weights) {
        Ok(dist) => OS_WEIGHTS[dist.sample(rng)].0,
        Err(_) => OsType::Windows,
    }
}

/// Picks 10 to 20 fonts from `pool`, including every available universal
/// font and at least one font typical for `os`.
fn pick_fonts<R: Rng>(rng: &mut R, os: OsType, mut pool: Vec<String>) -> Vec<String> {
    let target = rng.gen_range(MIN_FONTS..=MAX_FONTS).min(pool.len());
    let typical = catalog::traits(os).typical_fonts;

    let mut chosen: Vec<String> = Vec::with_capacity(target);
    pool.retain(|font| {
        if UNIVERSAL_FONTS.contains(&font.as_str()) {
            chosen.push(font.clone());
            false
        } else {
            true
        }
    });

    pool.shuffle(rng);
    if let Some(pos) = pool.iter().position(|f| typical.contains(&f.as_str())) {
        chosen.push(pool.remove(pos));
    }

    let remaining = target.saturating_sub(chosen.len());
    chosen.extend(pool.into_iter().take(remaining));
    chosen.sort();
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::BuiltinCorpus;
    use std::collections::HashSet;

    fn generator() -> FingerprintGenerator {
        FingerprintGenerator::new(Arc::new(BuiltinCorpus::new()))
    }

    #[test]
    fn test_supported_matrix_validates() {
        let generator = generator();
        let validator = ConsistencyValidator::new();
        for os in OsType::ALL {
            for browser in generator.corpus().available_browsers_for_os(*os) {
                for _ in 0..5 {
                    let profile = generator
                        .generate(GenerateOptions {
                            os: Some(*os),
                            browser: Some(browser),
                            ..Default::default()
                        })
                        .unwrap();
                    let report = validator.validate(&profile);
                    assert!(report.valid, "{}/{}: {:?}", os, browser, report.messages());
                    assert_eq!(profile.os.platform, catalog::traits(*os).platform);
                    assert!(catalog::ua_matches_os(*os, &profile.user_agent));
                }
            }
        }
    }

    #[test]
    fn test_unsupported_browser_rejected() {
        let err = generator()
            .generate(GenerateOptions {
                os: Some(OsType::Windows),
                browser: Some(BrowserType::Safari),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, GeneratorError::UnsupportedBrowser { .. }));
    }

    #[test]
    fn test_fallback_on_failure() {
        let profile = generator().generate_or_default(GenerateOptions {
            account_id: Some("acct-1".to_string()),
            os: Some(OsType::Linux),
            browser: Some(BrowserType::Safari),
            ..Default::default()
        });
        assert_eq!(profile.account_id.as_deref(), Some("acct-1"));
        assert!(profile.noise_seed.is_some());
        assert!(ConsistencyValidator::new().validate(&profile).valid);
    }

    #[test]
    fn test_font_subset_rules() {
        let generator = generator();
        for os in OsType::ALL {
            for seed in 0..10u64 {
                let profile = generator
                    .generate(GenerateOptions {
                        os: Some(*os),
                        seed: Some(seed),
                        ..Default::default()
                    })
                    .unwrap();
                let fonts = &profile.fonts.list;
                assert!((MIN_FONTS..=MAX_FONTS).contains(&fonts.len()), "{}", fonts.len());
                for universal in UNIVERSAL_FONTS {
                    assert!(fonts.iter().any(|f| f == universal));
                }
                let typical = catalog::traits(*os).typical_fonts;
                assert!(fonts.iter().any(|f| typical.contains(&f.as_str())));
            }
        }
    }

    #[test]
    fn test_seed_reproduces_choices_but_not_identity() {
        let generator = generator();
        let options = GenerateOptions {
            seed: Some(1234),
            ..Default::default()
        };
        let a = generator.generate(options.clone()).unwrap();
        let b = generator.generate(options).unwrap();
        assert_eq!(a.user_agent, b.user_agent);
        assert_eq!(a.fonts, b.fonts);
        assert_eq!(a.webgl, b.webgl);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_identities_and_seeds_unique() {
        let generator = generator();
        let mut ids = HashSet::new();
        let mut seeds = HashSet::new();
        for _ in 0..50 {
            let profile = generator.generate(GenerateOptions::default()).unwrap();
            ids.insert(profile.id.clone());
            seeds.insert(profile.plain_seed().unwrap());
        }
        assert_eq!(ids.len(), 50);
        assert_eq!(seeds.len(), 50);
    }

    #[test]
    fn test_weighted_os_pick() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut windows = 0;
        for _ in 0..1000 {
            if pick_os(&mut rng) == OsType::Windows {
                windows += 1;
            }
        }
        assert!((600..=800).contains(&windows), "windows picked {} times", windows);
    }
}
