//! Deterministic seeded noise for canvas and audio readbacks.
//!
//! A [`NoiseEngine`] maps `(seed, index)` to a perturbation value through a
//! murmur-style integer mix, so the same seed always reproduces the same
//! noise while two seeds never share a pattern. The same mixing function is
//! emitted into the injected JavaScript, which keeps Rust-side and
//! page-side perturbations bit-for-bit identical.
//!
//! # Example
//!
//! ```rust
//! use ki_fingerprint::noise::{NoiseEngine, NoiseLevel, NoiseOptions};
//!
//! let mut engine = NoiseEngine::new(42, NoiseOptions::default());
//! let first = engine.next_noise();
//! engine.reset();
//! assert_eq!(first, engine.next_noise());
//! assert_eq!(engine.noise_at(7), engine.noise_at(7));
//! assert!(engine.noise_at(7).abs() <= NoiseLevel::Medium.amplitude());
//! ```

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Strength of the perturbation applied to readback data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseLevel {
    /// No perturbation at all.
    Off,
    /// At most one channel unit.
    Low,
    /// At most three channel units.
    Medium,
    /// At most six channel units.
    High,
}

impl Default for NoiseLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl NoiseLevel {
    /// Maximum absolute perturbation, expressed in 8-bit channel units.
    pub fn amplitude(self) -> f64 {
        match self {
            NoiseLevel::Off => 0.0,
            NoiseLevel::Low => 1.0,
            NoiseLevel::Medium => 3.0,
            NoiseLevel::High => 6.0,
        }
    }
}

impl std::fmt::Display for NoiseLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoiseLevel::Off => write!(f, "off"),
            NoiseLevel::Low => write!(f, "low"),
            NoiseLevel::Medium => write!(f, "medium"),
            NoiseLevel::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for NoiseLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(NoiseLevel::Off),
            "low" => Ok(NoiseLevel::Low),
            "medium" => Ok(NoiseLevel::Medium),
            "high" => Ok(NoiseLevel::High),
            other => Err(format!(
                "Unknown noise level: {}. Valid levels are: off, low, medium, high",
                other
            )),
        }
    }
}

/// Shape of the noise distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseDistribution {
    Uniform,
    /// Box-Muller transform over two hashed uniforms, clamped to the amplitude.
    Gaussian,
}

impl Default for NoiseDistribution {
    fn default() -> Self {
        Self::Uniform
    }
}

/// Level and distribution of a [`NoiseEngine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseOptions {
    #[serde(default)]
    pub level: NoiseLevel,
    #[serde(default)]
    pub distribution: NoiseDistribution,
}

/// Partial options accepted by [`NoiseEngine::with_options`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseOverrides {
    pub level: Option<NoiseLevel>,
    pub distribution: Option<NoiseDistribution>,
}

/// Murmur-style integer hash of a seed and an index.
///
/// This is the single source of randomness for every noise consumer,
/// including the JavaScript emitted for canvas and audio spoofing.
#[inline]
pub fn seeded_hash(seed: u32, index: u32) -> u32 {
    let mut h = seed ^ index;
    h = (h ^ (h >> 16)).wrapping_mul(0x45d9f3b);
    h = (h ^ (h >> 13)).wrapping_mul(0x45d9f3b);
    h ^ (h >> 16)
}

/// Maps a hash into the open interval (0, 1).
#[inline]
pub fn unit_interval(h: u32) -> f64 {
    (h as f64 + 1.0) / (u32::MAX as f64 + 2.0)
}

// Offset for the second uniform of a Box-Muller pair.
const GAUSSIAN_STREAM: u32 = 0x9e37_79b9;

// Scale from channel units to audio sample units.
const AUDIO_SCALE: f64 = 1e-7;

/// Deterministic seeded perturbation generator.
///
/// Equality compares the seed and options only; the cursor is generation
/// history and is neither compared nor serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseEngine {
    seed: u32,
    #[serde(flatten)]
    options: NoiseOptions,
    #[serde(skip)]
    cursor: u32,
}

impl PartialEq for NoiseEngine {
    fn eq(&self, other: &Self) -> bool {
        self.seed == other.seed && self.options == other.options
    }
}

impl Eq for NoiseEngine {}

impl NoiseEngine {
    /// Creates an engine with its cursor at the start of the stream.
    pub fn new(seed: u32, options: NoiseOptions) -> Self {
        Self {
            seed,
            options,
            cursor: 0,
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn options(&self) -> NoiseOptions {
        self.options
    }

    /// Current cursor position.
    pub fn position(&self) -> u32 {
        self.cursor
    }

    /// Noise value at `index`, within `[-amplitude, amplitude]`.
    ///
    /// Pure in `(seed, index, level, distribution)`; the cursor is untouched.
    pub fn noise_at(&self, index: u32) -> f64 {
        let amplitude = self.options.level.amplitude();
        if amplitude == 0.0 {
            return 0.0;
        }

        match self.options.distribution {
            NoiseDistribution::Uniform => {
                let u = unit_interval(seeded_hash(self.seed, index));
                (2.0 * u - 1.0) * amplitude
            }
            NoiseDistribution::Gaussian => {
                let u1 = unit_interval(seeded_hash(self.seed, index));
                let u2 = unit_interval(seeded_hash(self.seed, index.wrapping_add(GAUSSIAN_STREAM)));
                let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
                (z * amplitude / 3.0).clamp(-amplitude, amplitude)
            }
        }
    }

    /// Integer channel delta at `index`.
    pub fn channel_delta_at(&self, index: u32) -> i16 {
        self.noise_at(index).round() as i16
    }

    /// Noise value at the cursor, advancing it by one.
    pub fn next_noise(&mut self) -> f64 {
        let value = self.noise_at(self.cursor);
        self.cursor = self.cursor.wrapping_add(1);
        value
    }

    /// Rewinds the cursor so the next pass reproduces identical output.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Returns a new engine sharing this seed with some options replaced.
    pub fn with_options(&self, overrides: NoiseOverrides) -> Self {
        Self::new(
            self.seed,
            NoiseOptions {
                level: overrides.level.unwrap_or(self.options.level),
                distribution: overrides.distribution.unwrap_or(self.options.distribution),
            },
        )
    }

    /// Perturbs RGBA pixel data in place.
    ///
    /// Red, green and blue channels each consume one cursor step. Alpha is
    /// never modified and fully transparent pixels are left untouched (their
    /// steps are still consumed so the stream stays aligned with the pixel
    /// index). Returns the number of channels whose value changed.
    pub fn apply_to_canvas_data(&mut self, data: &mut [u8]) -> usize {
        let mut changed = 0;
        for pixel in data.chunks_exact_mut(4) {
            let transparent = pixel[3] == 0;
            for channel in pixel.iter_mut().take(3) {
                let delta = self.next_noise().round() as i16;
                if transparent || delta == 0 {
                    continue;
                }
                let value = (*channel as i16 + delta).clamp(0, 255) as u8;
                if value != *channel {
                    *channel = value;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Perturbs audio samples in place by a sub-audible amount.
    pub fn apply_to_audio_data(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let delta = self.next_noise() * AUDIO_SCALE;
            *sample = (*sample as f64 + delta) as f32;
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Restores an engine; the cursor starts at zero.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(level: NoiseLevel, distribution: NoiseDistribution) -> NoiseEngine {
        NoiseEngine::new(0xC0FF_EE00, NoiseOptions { level, distribution })
    }

    #[test]
    fn test_noise_is_pure() {
        let a = engine(NoiseLevel::High, NoiseDistribution::Uniform);
        let b = engine(NoiseLevel::High, NoiseDistribution::Uniform);
        for i in 0..256 {
            assert_eq!(a.noise_at(i), b.noise_at(i));
        }
    }

    #[test]
    fn test_amplitude_bounds() {
        for level in [NoiseLevel::Low, NoiseLevel::Medium, NoiseLevel::High] {
            for distribution in [NoiseDistribution::Uniform, NoiseDistribution::Gaussian] {
                let e = engine(level, distribution);
                for i in 0..2000 {
                    let n = e.noise_at(i);
                    assert!(n.abs() <= level.amplitude(), "{} out of range for {}", n, level);
                }
            }
        }
    }

    #[test]
    fn test_off_level_is_silent() {
        let mut e = engine(NoiseLevel::Off, NoiseDistribution::Gaussian);
        let mut data = vec![10u8, 20, 30, 255, 40, 50, 60, 255];
        let original = data.clone();
        assert_eq!(e.apply_to_canvas_data(&mut data), 0);
        assert_eq!(data, original);
    }

    #[test]
    fn test_reset_reproduces_pass() {
        let mut e = engine(NoiseLevel::Medium, NoiseDistribution::Uniform);
        let mut first = vec![128u8; 64];
        e.apply_to_canvas_data(&mut first);
        e.reset();
        let mut second = vec![128u8; 64];
        e.apply_to_canvas_data(&mut second);
        assert_eq!(first, second);
    }

    #[test]
    fn test_alpha_untouched() {
        let mut e = engine(NoiseLevel::High, NoiseDistribution::Uniform);
        let mut data = vec![100u8; 400];
        e.apply_to_canvas_data(&mut data);
        for pixel in data.chunks_exact(4) {
            assert_eq!(pixel[3], 100);
        }
    }

    #[test]
    fn test_transparent_pixels_skipped() {
        let mut e = engine(NoiseLevel::High, NoiseDistribution::Uniform);
        let mut data = vec![7u8, 8, 9, 0, 7, 8, 9, 0];
        e.apply_to_canvas_data(&mut data);
        assert_eq!(data, vec![7u8, 8, 9, 0, 7, 8, 9, 0]);
        assert_eq!(e.position(), 6);
    }

    #[test]
    fn test_with_options_shares_seed() {
        let e = engine(NoiseLevel::Low, NoiseDistribution::Uniform);
        let g = e.with_options(NoiseOverrides {
            distribution: Some(NoiseDistribution::Gaussian),
            ..Default::default()
        });
        assert_eq!(g.seed(), e.seed());
        assert_eq!(g.options().level, NoiseLevel::Low);
        assert_eq!(g.options().distribution, NoiseDistribution::Gaussian);
        assert_ne!(g, e);
    }

    #[test]
    fn test_equality_ignores_cursor() {
        let mut a = engine(NoiseLevel::Medium, NoiseDistribution::Uniform);
        let b = a.clone();
        a.next_noise();
        a.next_noise();
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_restore() {
        let mut e = engine(NoiseLevel::High, NoiseDistribution::Gaussian);
        e.next_noise();
        let json = e.to_json().unwrap();
        assert!(json.contains("\"level\":\"high\""));
        let restored = NoiseEngine::from_json(&json).unwrap();
        assert_eq!(restored, e);
        assert_eq!(restored.position(), 0);
    }

    #[test]
    fn test_audio_perturbation_is_tiny() {
        let mut e = engine(NoiseLevel::High, NoiseDistribution::Uniform);
        let mut samples = vec![0.25f32; 128];
        e.apply_to_audio_data(&mut samples);
        for s in samples {
            assert!((s - 0.25).abs() < 1e-5);
        }
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("HIGH".parse::<NoiseLevel>().unwrap(), NoiseLevel::High);
        assert!("loud".parse::<NoiseLevel>().is_err());
    }
}
