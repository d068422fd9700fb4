//! Probe sets modelled on public fingerprint test pages.

use std::fmt;
use std::str::FromStr;

use serde_json::json;
use sha2::{Digest, Sha256};

use super::probes::{leaks_address, spoofed_navigator};
use super::{Probe, ProbeCategory, ProbeOutcome, SelfTestError};
use crate::noise::{NoiseEngine, NoiseLevel, NoiseOptions};
use crate::profile::catalog::{self, gpu_vendor_known, os_from_ua};
use crate::profile::{BrowserType, FingerprintProfile, NoiseMode, OsType, OverrideMode, WebGlMode};
use crate::stealth::surfaces::client_rect_delta;
use crate::stealth::verify_native_characteristics;

/// Third-party-style probe suites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suite {
    BrowserleaksStyle,
    PixelscanStyle,
}

impl Suite {
    pub const ALL: &'static [Suite] = &[Suite::BrowserleaksStyle, Suite::PixelscanStyle];

    pub fn as_str(self) -> &'static str {
        match self {
            Suite::BrowserleaksStyle => "browserleaks-style",
            Suite::PixelscanStyle => "pixelscan-style",
        }
    }

    pub fn probes(self) -> Vec<Probe> {
        use ProbeCategory::*;
        match self {
            Suite::BrowserleaksStyle => vec![
                Probe::new("browserleaks_canvas_signature", Canvas, canvas_signature),
                Probe::new("browserleaks_webgl_vendor", Webgl, webgl_vendor_known),
                Probe::new("browserleaks_webrtc_ipv6", Webrtc, webrtc_ipv6_hidden),
                Probe::new("browserleaks_client_rects", General, client_rects_stable),
                Probe::new("browserleaks_font_count", Fonts, font_count),
            ],
            Suite::PixelscanStyle => vec![
                Probe::new("pixelscan_ua_platform", Navigator, ua_platform_agree),
                Probe::new("pixelscan_vendor_matches_browser", Navigator, vendor_matches_browser),
                Probe::new("pixelscan_device_memory_exposure", Navigator, device_memory_exposure),
                Probe::new("pixelscan_no_masking", Prototype, no_masking),
                Probe::new("pixelscan_screen_plausible", Screen, screen_plausible),
            ],
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Suite {
    type Err = SelfTestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        Suite::ALL
            .iter()
            .copied()
            .find(|suite| suite.as_str() == lowered || suite.as_str().trim_end_matches("-style") == lowered)
            .ok_or_else(|| SelfTestError::UnknownSuite(s.to_string()))
    }
}

fn signature(data: &[u8]) -> String {
    hex::encode(&Sha256::digest(data)[..8])
}

fn canvas_signature(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if profile.canvas.mode != NoiseMode::Noise || profile.canvas.noise_level == NoiseLevel::Off {
        return Ok(ProbeOutcome::skipped("canvas noise disabled"));
    }
    let Some(seed) = profile.plain_seed() else {
        return Ok(ProbeOutcome::skipped("no cleartext noise seed"));
    };
    let engine = NoiseEngine::new(
        seed,
        NoiseOptions {
            level: profile.canvas.noise_level,
            distribution: profile.canvas.noise_distribution,
        },
    );

    let clean: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8 | 0x01).collect();
    let render = || {
        let mut data = clean.clone();
        engine.clone().apply_to_canvas_data(&mut data);
        signature(&data)
    };
    let first = render();
    let second = render();
    let clean_signature = signature(&clean);
    Ok(ProbeOutcome::check(
        first == second && first != clean_signature,
        json!({ "stable": true, "differsFromClean": true }),
        json!({ "signature": first, "stable": first == second, "clean": clean_signature }),
    ))
}

fn webgl_vendor_known(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if matches!(profile.webgl.mode, WebGlMode::Real | WebGlMode::Off) {
        return Ok(ProbeOutcome::skipped(format!("webgl mode {}", profile.webgl.mode)));
    }
    let vendor = &profile.webgl.unmasked_vendor;
    Ok(ProbeOutcome::check(
        gpu_vendor_known(profile.os.r#type, vendor),
        format!("GPU vendor shipped on {}", profile.os.r#type),
        vendor.as_str(),
    ))
}

fn webrtc_ipv6_hidden(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    leaks_address(profile, "fd12:3456:789a::21")
}

fn client_rects_stable(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let rects = &profile.client_rects;
    if rects.mode != NoiseMode::Noise {
        return Ok(ProbeOutcome::skipped(format!("client rects mode {}", rects.mode)));
    }
    let Some(seed) = profile.plain_seed() else {
        return Ok(ProbeOutcome::skipped("no cleartext noise seed"));
    };
    let first = client_rect_delta(seed, 120.5, 32.25, rects.noise);
    let second = client_rect_delta(seed, 120.5, 32.25, rects.noise);
    Ok(ProbeOutcome::check(
        first == second && first.abs() <= rects.noise,
        json!({ "stable": true, "max": rects.noise }),
        json!({ "first": first, "second": second }),
    ))
}

fn font_count(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if profile.fonts.mode == OverrideMode::Real {
        return Ok(ProbeOutcome::skipped("fonts mode real"));
    }
    let count = profile.fonts.list.len();
    Ok(ProbeOutcome::check(count >= 3, ">= 3 installed fonts", count))
}

fn ua_platform_agree(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let ua_os = os_from_ua(&profile.user_agent);
    let platform_os = [OsType::Windows, OsType::Macos, OsType::Linux]
        .into_iter()
        .find(|os| catalog::traits(*os).platform == profile.os.platform);
    Ok(ProbeOutcome::check(
        ua_os.is_some() && ua_os == platform_os,
        json!(ua_os.map(|os| os.as_str())),
        json!(platform_os.map(|os| os.as_str())),
    ))
}

fn vendor_matches_browser(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    Ok(ProbeOutcome::compare(
        catalog::navigator_vendor(profile.browser.r#type),
        profile.navigator.vendor.as_str(),
    ))
}

fn device_memory_exposure(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let chromium = matches!(profile.browser.r#type, BrowserType::Chrome | BrowserType::Edge);
    let exposed = spoofed_navigator(profile).has("deviceMemory");
    Ok(ProbeOutcome::compare(chromium, exposed).with_details(format!(
        "{} {} navigator.deviceMemory",
        profile.browser.r#type,
        if chromium { "exposes" } else { "omits" }
    )))
}

fn no_masking(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let surface = spoofed_navigator(profile);
    let keys = surface.own_keys();
    let masked = keys
        .iter()
        .filter_map(|k| surface.getter(k))
        .filter(|g| !verify_native_characteristics(g).passed())
        .count();
    Ok(ProbeOutcome::check(
        masked == 0 && surface.to_string_tag() == "[object Navigator]",
        json!({ "masked": 0 }),
        json!({ "masked": masked, "inspected": keys.len() }),
    ))
}

fn screen_plausible(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let screen = &profile.hardware.screen;
    Ok(ProbeOutcome::check(
        screen.width >= 800 && screen.height >= 600,
        "at least 800x600",
        format!("{}x{}", screen.width, screen.height),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::NoiseSeed;
    use crate::selftest::{RunFilter, TestRunner};

    #[test]
    fn test_suite_names() {
        assert_eq!("pixelscan-style".parse::<Suite>().unwrap(), Suite::PixelscanStyle);
        assert_eq!("browserleaks".parse::<Suite>().unwrap(), Suite::BrowserleaksStyle);
        assert!("creepjs".parse::<Suite>().is_err());
    }

    #[test]
    fn test_suites_pass_on_seeded_profile() {
        let mut profile = FingerprintProfile::default();
        profile.noise_seed = Some(NoiseSeed::plain(31337));

        let mut runner = TestRunner::empty();
        for suite in Suite::ALL {
            assert_eq!(runner.register_suite(*suite), 5);
        }
        runner.run_all(&profile, &RunFilter::default());
        let report = runner.generate_report();
        assert_eq!(report.total, 10);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
    }

    #[test]
    fn test_firefox_must_omit_device_memory() {
        let mut profile = FingerprintProfile::default();
        profile.browser.r#type = BrowserType::Firefox;
        assert!(device_memory_exposure(&profile).unwrap().passed);
        assert!(!vendor_matches_browser(&profile).unwrap().passed);
    }
}
