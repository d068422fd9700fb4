//! Cross-field repair pass.
//!
//! [`repair`] returns a corrected copy of a profile whose cross-field
//! invariants hold. Warning-level oddities (unusual resolutions, scaling)
//! are left alone; they are reported as suggestions by the validator.

use tracing::debug;

use crate::profile::catalog;
use crate::profile::{BrowserType, FingerprintProfile, OsType, OverrideMode, WebGlMode};

/// Returns a repaired copy of `profile`; the input is not modified.
///
/// For any profile whose intrinsic fields are valid, the result validates
/// with zero errors.
pub fn repair(profile: &FingerprintProfile) -> FingerprintProfile {
    let mut p = profile.clone();
    let mut actions: Vec<&'static str> = Vec::new();
    let os = p.os.r#type;

    if p.browser.r#type == BrowserType::Safari && os != OsType::Macos {
        p.browser.r#type = BrowserType::Chrome;
        p.browser.version = catalog::default_browser_version(BrowserType::Chrome).to_string();
        actions.push("replaced Safari on a non-macOS system with Chrome");
    }
    let browser = p.browser.r#type;

    let expected_major = catalog::major_version(&p.browser.version);
    if expected_major > 0 && p.browser.major_version != expected_major {
        p.browser.major_version = expected_major;
        actions.push("synchronized browser major version");
    }

    // 1. Platform
    let platform = catalog::traits(os).platform;
    if p.os.platform != platform {
        p.os.platform = platform.to_string();
        actions.push("forced OS-canonical platform");
    }

    // 2. User-Agent
    let ua_ok = catalog::ua_matches_os(os, &p.user_agent)
        && catalog::browser_from_ua(&p.user_agent) == Some(browser);
    if !ua_ok && !p.browser.version.is_empty() {
        p.user_agent = catalog::build_user_agent(os, browser, &p.browser.version);
        actions.push("regenerated User-Agent");
    }

    // 3. Navigator
    let vendor = catalog::navigator_vendor(browser);
    if p.navigator.vendor != vendor {
        p.navigator.vendor = vendor.to_string();
        actions.push("fixed navigator.vendor");
    }
    if p.navigator.webdriver != Some(false) {
        p.navigator.webdriver = Some(false);
        actions.push("hid navigator.webdriver");
    }
    p.navigator.product_sub = catalog::product_sub(browser).to_string();
    p.navigator.app_version = catalog::app_version(browser, &p.user_agent);

    // 4. WebGL
    if matches!(p.webgl.mode, WebGlMode::Custom | WebGlMode::Noise) {
        let foreign = [&p.webgl.unmasked_vendor, &p.webgl.unmasked_renderer]
            .iter()
            .any(|text| catalog::foreign_gpu_marker(os, text).is_some());
        let unknown_vendor = !p.webgl.unmasked_vendor.is_empty()
            && !catalog::gpu_vendor_known(os, &p.webgl.unmasked_vendor);
        if foreign || unknown_vendor {
            let (gpu_vendor, gpu_renderer) = catalog::fallback_gpu(os);
            p.webgl.unmasked_vendor = gpu_vendor.to_string();
            p.webgl.unmasked_renderer = gpu_renderer.to_string();
            actions.push("replaced GPU exclusive to another OS");
        }
        if catalog::foreign_gpu_marker(os, &p.webgl.renderer).is_some() {
            let (masked_vendor, masked_renderer) = catalog::masked_webgl(browser);
            p.webgl.vendor = masked_vendor.to_string();
            p.webgl.renderer = masked_renderer.to_string();
            actions.push("reset masked WebGL renderer");
        }
    }

    // 5. Fonts
    if p.fonts.mode == OverrideMode::Custom {
        let typical = catalog::traits(os).typical_fonts;
        if !p.fonts.list.iter().any(|f| typical.contains(&f.as_str())) {
            p.fonts.list = catalog::default_fonts(os);
            actions.push("replaced font list with OS-typical fonts");
        }
    }

    // 6. Screen
    let screen = &mut p.hardware.screen;
    if screen.avail_width > screen.width {
        screen.avail_width = screen.width;
        actions.push("clamped availWidth");
    }
    if screen.avail_height > screen.height {
        screen.avail_height = screen.height;
        actions.push("clamped availHeight");
    }
    if screen.pixel_depth != screen.color_depth {
        screen.pixel_depth = screen.color_depth;
        actions.push("aligned pixelDepth with colorDepth");
    }

    if !actions.is_empty() {
        debug!(profile = %p.id, ?actions, "Repaired fingerprint profile");
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ConsistencyValidator;

    #[test]
    fn test_clean_profile_unchanged() {
        let profile = FingerprintProfile::default();
        assert_eq!(repair(&profile), profile);
    }

    #[test]
    fn test_input_not_mutated() {
        let mut profile = FingerprintProfile::default();
        profile.os.platform = "MacIntel".to_string();
        let repaired = repair(&profile);
        assert_eq!(profile.os.platform, "MacIntel");
        assert_eq!(repaired.os.platform, "Win32");
    }

    #[test]
    fn test_repairs_every_cross_field_error() {
        let mut profile = FingerprintProfile::default();
        profile.os.r#type = OsType::Linux;
        profile.browser.r#type = BrowserType::Safari;
        profile.navigator.vendor = "Apple Computer, Inc.".to_string();
        profile.navigator.webdriver = Some(true);
        profile.webgl.unmasked_renderer = "Apple M2".to_string();
        profile.hardware.screen.avail_height = 5000;
        profile.hardware.screen.pixel_depth = 32;

        let validator = ConsistencyValidator::new();
        assert!(!validator.validate(&profile).valid);

        let repaired = repair(&profile);
        let report = validator.validate(&repaired);
        assert!(report.valid, "{:?}", report.messages());
        assert_eq!(repaired.browser.r#type, BrowserType::Chrome);
        assert_eq!(repaired.os.platform, "Linux x86_64");
        assert!(repaired.user_agent.contains("Linux"));
        assert_eq!(repaired.navigator.webdriver, Some(false));
        assert!(repaired.fonts.list.iter().any(|f| f == "DejaVu Sans"));
    }

    #[test]
    fn test_resolution_warnings_left_alone() {
        let mut profile = FingerprintProfile::default();
        profile.hardware.screen.width = 3000;
        profile.hardware.screen.avail_width = 3000;
        profile.hardware.screen.height = 1000;
        profile.hardware.screen.avail_height = 960;
        let repaired = repair(&profile);
        assert_eq!(repaired.hardware.screen.width, 3000);
        let report = ConsistencyValidator::new().validate(&repaired);
        assert!(report.valid);
        assert!(report.warning_for("hardware.screen").is_some());
    }
}
