//! Built-in probes.

use anyhow::{ensure, Context};
use serde_json::{json, Value};

use super::{Probe, ProbeCategory, ProbeOutcome};
use crate::injector::Injector;
use crate::noise::{NoiseEngine, NoiseOptions};
use crate::profile::catalog::{self, browser_from_ua, foreign_gpu_marker, os_from_ua};
use crate::profile::validation::DEVICE_MEMORY_VALUES;
use crate::profile::{
    ConsistencyValidator, FingerprintProfile, NoiseMode, OsType, OverrideMode, WebGlMode, WebRtcMode,
};
use crate::stealth::surfaces::{font_available, timezone_offset_minutes, ScreenSpoof};
use crate::stealth::webgl::{WebGlSpoof, MAX_VIEWPORT_DIMS, UNMASKED_RENDERER_WEBGL, UNMASKED_VENDOR_WEBGL};
use crate::stealth::{
    create_constant_function, rewrite_sdp, verify_native_characteristics, FunctionKind,
    NativeLike, NavigatorSpoof, ObjectSurface, WrapOptions,
};

pub(super) fn builtin() -> Vec<Probe> {
    use ProbeCategory::*;
    vec![
        Probe::new("ua_matches_os", Navigator, ua_matches_os),
        Probe::new("ua_matches_browser", Navigator, ua_matches_browser),
        Probe::new("platform_matches_os", Navigator, platform_matches_os),
        Probe::new("webdriver_hidden", Navigator, webdriver_hidden),
        Probe::new("navigator_overrides", Navigator, navigator_overrides),
        Probe::new("hardware_concurrency_range", Navigator, hardware_concurrency_range),
        Probe::new("device_memory_bucket", Navigator, device_memory_bucket),
        Probe::new("languages_consistent", Navigator, languages_consistent),
        Probe::new("canvas_noise_deterministic", Canvas, canvas_noise_deterministic),
        Probe::new("canvas_noise_bounded", Canvas, canvas_noise_bounded),
        Probe::new("webgl_identity_present", Webgl, webgl_identity_present),
        Probe::new("webgl_gpu_matches_os", Webgl, webgl_gpu_matches_os),
        Probe::new("webgl_viewport_dims", Webgl, webgl_viewport_dims),
        Probe::new("audio_noise_subaudible", Audio, audio_noise_subaudible),
        Probe::new("fonts_generic_available", Fonts, fonts_generic_available),
        Probe::new("fonts_unknown_hidden", Fonts, fonts_unknown_hidden),
        Probe::new("screen_avail_within_total", Screen, screen_avail_within_total),
        Probe::new("screen_color_depth", Screen, screen_color_depth),
        Probe::new("screen_pixel_ratio", Screen, screen_pixel_ratio),
        Probe::new("timezone_offset_range", Timezone, timezone_offset_range),
        Probe::new("timezone_name_valid", Timezone, timezone_name_valid),
        Probe::new("webrtc_private_ip_hidden", Webrtc, webrtc_private_ip_hidden),
        Probe::new("navigator_to_string_tag", Prototype, navigator_to_string_tag),
        Probe::new("no_internal_references", Prototype, no_internal_references),
        Probe::new("getter_descriptors", Prototype, getter_descriptors),
        Probe::new("getters_look_native", Function, getters_look_native),
        Probe::new("constant_function_native", Function, constant_function_native),
        Probe::new("wrapped_function_native", Function, wrapped_function_native),
        Probe::new("profile_consistent", General, profile_consistent),
        Probe::new("page_script_compiles", General, page_script_compiles),
    ]
}

/// `Navigator.prototype` after the navigator overrides.
pub(super) fn spoofed_navigator(profile: &FingerprintProfile) -> ObjectSurface {
    let mut surface = ObjectSurface::new("Navigator");
    NavigatorSpoof::apply(&mut surface, profile);
    surface
}

fn ua_matches_os(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let detected = os_from_ua(&profile.user_agent).map(|os| os.as_str());
    Ok(ProbeOutcome::compare(
        profile.os.r#type.as_str(),
        json!(detected),
    ))
}

fn ua_matches_browser(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let detected = browser_from_ua(&profile.user_agent).map(|b| b.as_str());
    Ok(ProbeOutcome::compare(
        profile.browser.r#type.as_str(),
        json!(detected),
    ))
}

fn platform_matches_os(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let expected = catalog::traits(profile.os.r#type).platform;
    Ok(ProbeOutcome::compare(expected, profile.os.platform.as_str()))
}

fn webdriver_hidden(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let actual = spoofed_navigator(profile).get("webdriver");
    Ok(ProbeOutcome::check(
        actual != Some(Value::Bool(true)),
        "false or undefined",
        actual.unwrap_or(Value::Null),
    ))
}

fn navigator_overrides(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let mismatches = NavigatorSpoof::verify(&spoofed_navigator(profile), profile);
    Ok(ProbeOutcome::check(mismatches.is_empty(), json!([]), json!(mismatches)))
}

fn hardware_concurrency_range(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let cores = profile.hardware.cpu_cores;
    Ok(ProbeOutcome::check((1..=128).contains(&cores), "1..=128", cores))
}

fn device_memory_bucket(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let memory = profile.hardware.device_memory;
    Ok(ProbeOutcome::check(
        DEVICE_MEMORY_VALUES.contains(&memory),
        json!(DEVICE_MEMORY_VALUES),
        memory,
    ))
}

fn languages_consistent(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let nav = &profile.navigator;
    Ok(ProbeOutcome::compare(
        nav.language.as_str(),
        json!(nav.languages.first()),
    ))
}

fn canvas_sample() -> Vec<u8> {
    (0..64u32)
        .flat_map(|i| [(i * 4) as u8, (255 - i * 3) as u8, (i * 7 % 256) as u8, 255])
        .collect()
}

fn canvas_engine(profile: &FingerprintProfile) -> Option<NoiseEngine> {
    let seed = profile.plain_seed()?;
    Some(NoiseEngine::new(
        seed,
        NoiseOptions {
            level: profile.canvas.noise_level,
            distribution: profile.canvas.noise_distribution,
        },
    ))
}

fn canvas_noise_deterministic(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if profile.canvas.mode != NoiseMode::Noise {
        return Ok(ProbeOutcome::skipped(format!("canvas mode {}", profile.canvas.mode)));
    }
    let Some(engine) = canvas_engine(profile) else {
        return Ok(ProbeOutcome::skipped("no cleartext noise seed"));
    };

    let mut first = canvas_sample();
    let mut second = canvas_sample();
    engine.clone().apply_to_canvas_data(&mut first);
    engine.clone().apply_to_canvas_data(&mut second);
    let identical = first == second;
    Ok(ProbeOutcome::compare(true, identical).with_details("two readbacks of one canvas"))
}

fn canvas_noise_bounded(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if profile.canvas.mode != NoiseMode::Noise {
        return Ok(ProbeOutcome::skipped(format!("canvas mode {}", profile.canvas.mode)));
    }
    let Some(mut engine) = canvas_engine(profile) else {
        return Ok(ProbeOutcome::skipped("no cleartext noise seed"));
    };

    let clean = canvas_sample();
    let mut noisy = clean.clone();
    engine.apply_to_canvas_data(&mut noisy);
    let max_delta = clean
        .iter()
        .zip(&noisy)
        .map(|(a, b)| (*a as i16 - *b as i16).abs())
        .max()
        .unwrap_or(0);
    let alpha_kept = clean
        .chunks_exact(4)
        .zip(noisy.chunks_exact(4))
        .all(|(a, b)| a[3] == b[3]);
    let bound = profile.canvas.noise_level.amplitude().ceil() as i16;
    Ok(ProbeOutcome::check(
        max_delta <= bound && alpha_kept,
        json!({ "maxDelta": bound, "alphaKept": true }),
        json!({ "maxDelta": max_delta, "alphaKept": alpha_kept }),
    ))
}

fn webgl_identity_present(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if matches!(profile.webgl.mode, WebGlMode::Real | WebGlMode::Off) {
        return Ok(ProbeOutcome::skipped(format!("webgl mode {}", profile.webgl.mode)));
    }
    let vendor = WebGlSpoof::get_parameter(&profile.webgl, UNMASKED_VENDOR_WEBGL)
        .context("unmasked vendor not answered")?;
    let renderer = WebGlSpoof::get_parameter(&profile.webgl, UNMASKED_RENDERER_WEBGL)
        .context("unmasked renderer not answered")?;
    let present = |v: &Value| v.as_str().map_or(false, |s| !s.trim().is_empty());
    Ok(ProbeOutcome::check(
        present(&vendor) && present(&renderer),
        "non-empty vendor and renderer",
        json!({ "vendor": vendor, "renderer": renderer }),
    ))
}

fn webgl_gpu_matches_os(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if matches!(profile.webgl.mode, WebGlMode::Real | WebGlMode::Off) {
        return Ok(ProbeOutcome::skipped(format!("webgl mode {}", profile.webgl.mode)));
    }
    let os = profile.os.r#type;
    let text = format!("{} {}", profile.webgl.unmasked_vendor, profile.webgl.unmasked_renderer);
    let foreign = foreign_gpu_marker(os, &text);
    Ok(ProbeOutcome::check(
        foreign.is_none(),
        format!("no GPU marker foreign to {}", os),
        json!(foreign.map(|(marker, owner)| format!("{} ({})", marker, owner))),
    ))
}

fn webgl_viewport_dims(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let Some(dims) = WebGlSpoof::get_parameter(&profile.webgl, MAX_VIEWPORT_DIMS) else {
        return Ok(ProbeOutcome::skipped(format!("webgl mode {}", profile.webgl.mode)));
    };
    let values: Vec<u64> = dims
        .as_array()
        .context("MAX_VIEWPORT_DIMS is not an array")?
        .iter()
        .filter_map(Value::as_u64)
        .collect();
    Ok(ProbeOutcome::check(
        values.len() == 2 && values.iter().all(|v| *v > 0),
        "two positive dimensions",
        dims,
    ))
}

fn audio_noise_subaudible(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if profile.audio.mode != NoiseMode::Noise {
        return Ok(ProbeOutcome::skipped(format!("audio mode {}", profile.audio.mode)));
    }
    let Some(seed) = profile.plain_seed() else {
        return Ok(ProbeOutcome::skipped("no cleartext noise seed"));
    };
    let mut engine = NoiseEngine::new(
        seed,
        NoiseOptions {
            level: profile.audio.noise_level,
            distribution: profile.audio.noise_distribution,
        },
    );
    let clean: Vec<f32> = (0..256).map(|i| (i as f32 / 40.0).sin() * 0.5).collect();
    let mut noisy = clean.clone();
    engine.apply_to_audio_data(&mut noisy);
    let max_delta = clean
        .iter()
        .zip(&noisy)
        .map(|(a, b)| (a - b).abs() as f64)
        .fold(0.0, f64::max);
    Ok(ProbeOutcome::check(max_delta < 1e-5, "< 1e-5", max_delta))
}

fn fonts_generic_available(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let available = font_available(&profile.fonts.list, "16px monospace");
    Ok(ProbeOutcome::compare(true, available))
}

fn fonts_unknown_hidden(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    if profile.fonts.mode == OverrideMode::Real {
        return Ok(ProbeOutcome::skipped("fonts mode real"));
    }
    let available = font_available(&profile.fonts.list, "16px \"Zx Fingerprint Canary\"");
    Ok(ProbeOutcome::compare(false, available))
}

fn screen_avail_within_total(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let values: serde_json::Map<String, Value> = ScreenSpoof::values(profile)
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let read = |key: &str| values.get(key).and_then(Value::as_u64).unwrap_or(0);
    let ok = read("width") > 0
        && read("height") > 0
        && read("availWidth") <= read("width")
        && read("availHeight") <= read("height");
    Ok(ProbeOutcome::check(ok, "0 < avail <= total", Value::Object(values)))
}

fn screen_color_depth(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let screen = &profile.hardware.screen;
    Ok(ProbeOutcome::check(
        [24, 30, 32].contains(&screen.color_depth) && screen.pixel_depth == screen.color_depth,
        "24, 30 or 32 with pixelDepth equal",
        json!({ "colorDepth": screen.color_depth, "pixelDepth": screen.pixel_depth }),
    ))
}

fn screen_pixel_ratio(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let ratio = profile.hardware.device_pixel_ratio;
    Ok(ProbeOutcome::check(
        ratio.is_finite() && (0.5..=4.0).contains(&ratio),
        "0.5..=4",
        ratio,
    ))
}

fn timezone_offset_range(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let tz = &profile.timezone;
    if tz.mode == OverrideMode::Real {
        return Ok(ProbeOutcome::skipped("timezone mode real"));
    }
    let minutes = timezone_offset_minutes(tz.offset);
    ensure!(minutes == -tz.offset, "offset sign not inverted");
    Ok(ProbeOutcome::check(
        (-840..=720).contains(&minutes),
        "getTimezoneOffset in -840..=720",
        minutes,
    ))
}

fn timezone_name_valid(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let name = profile.timezone.name.as_str();
    let valid = name == "UTC" || (name.contains('/') && !name.contains(' '));
    Ok(ProbeOutcome::check(valid, "IANA zone name", name))
}

pub(super) fn leaks_address(profile: &FingerprintProfile, address: &str) -> anyhow::Result<ProbeOutcome> {
    let webrtc = &profile.webrtc;
    match webrtc.mode {
        WebRtcMode::Real => return Ok(ProbeOutcome::skipped("webrtc mode real")),
        WebRtcMode::Disable => return Ok(ProbeOutcome::skipped("RTCPeerConnection removed")),
        WebRtcMode::Replace => {}
    }
    if webrtc.whitelist.iter().any(|w| w == address) || webrtc.local_ip == address {
        return Ok(ProbeOutcome::skipped(format!("{} is allowed", address)));
    }

    let sdp = format!(
        "v=0\r\nc=IN IP4 {0}\r\na=candidate:842163049 1 udp 1677729535 {0} 53705 typ host generation 0\r\n",
        address
    );
    let rewritten = rewrite_sdp(&sdp, webrtc);
    Ok(ProbeOutcome::check(
        !rewritten.contains(address),
        format!("{} absent", address),
        rewritten,
    ))
}

fn webrtc_private_ip_hidden(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    leaks_address(profile, "10.13.37.21")
}

fn navigator_to_string_tag(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    Ok(ProbeOutcome::compare(
        "[object Navigator]",
        spoofed_navigator(profile).to_string_tag(),
    ))
}

fn no_internal_references(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let surface = spoofed_navigator(profile);
    let leaked: Vec<&str> = surface
        .own_keys()
        .into_iter()
        .filter(|k| k.starts_with('_') || k.to_lowercase().contains("original"))
        .collect();
    let getters_clean = surface
        .own_keys()
        .iter()
        .filter_map(|k| surface.getter(k))
        .all(|g| g.own_property_names() == ["length", "name"]);
    Ok(ProbeOutcome::check(
        leaked.is_empty() && getters_clean,
        json!({ "leaked": [], "gettersClean": true }),
        json!({ "leaked": leaked, "gettersClean": getters_clean }),
    ))
}

fn getter_descriptors(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let descriptor = spoofed_navigator(profile)
        .descriptor("userAgent")
        .context("userAgent not defined")?;
    Ok(ProbeOutcome::compare(
        json!({ "accessor": true, "enumerable": true, "configurable": true }),
        json!({
            "accessor": descriptor.accessor,
            "enumerable": descriptor.enumerable,
            "configurable": descriptor.configurable,
        }),
    ))
}

fn getters_look_native(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let surface = spoofed_navigator(profile);
    let failing: Vec<String> = surface
        .own_keys()
        .iter()
        .filter_map(|k| surface.getter(k))
        .filter(|g| !verify_native_characteristics(g).passed())
        .map(|g| g.name())
        .collect();
    Ok(ProbeOutcome::check(failing.is_empty(), json!([]), json!(failing)))
}

fn constant_function_native(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let offset = timezone_offset_minutes(profile.timezone.offset);
    let f = create_constant_function("getTimezoneOffset", json!(offset), 0);
    let check = verify_native_characteristics(&f);
    ensure!(f.call(&[]) == json!(offset), "constant function returned a different value");
    Ok(ProbeOutcome::check(
        check.passed(),
        "function getTimezoneOffset() { [native code] }",
        f.to_string(),
    ))
}

fn wrapped_function_native(_profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let original = NativeLike::native("getParameter", 1, FunctionKind::Method, |args| {
        args.first().cloned().unwrap_or(Value::Null)
    });
    let wrapped = NativeLike::wrap(original, WrapOptions::default(), |orig, args| orig.call(args));
    let check = verify_native_characteristics(&wrapped);
    Ok(ProbeOutcome::check(
        check.passed() && wrapped.length() == 1,
        "function getParameter() { [native code] }",
        wrapped.to_string(),
    ))
}

fn profile_consistent(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let report = ConsistencyValidator::new().validate(profile);
    let errors: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
    Ok(ProbeOutcome::check(report.valid, json!([]), json!(errors)))
}

fn page_script_compiles(profile: &FingerprintProfile) -> anyhow::Result<ProbeOutcome> {
    let script = Injector::create_standalone_script(&profile.to_value()?)?;
    let apple_gpu = profile.os.r#type != OsType::Macos
        && script.to_lowercase().contains("apple m");
    Ok(ProbeOutcome::check(
        !script.is_empty() && !apple_gpu,
        "script without foreign GPU strings",
        json!({ "bytes": script.len(), "appleGpu": apple_gpu }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::NoiseSeed;

    fn seeded() -> FingerprintProfile {
        let mut profile = FingerprintProfile::default();
        profile.noise_seed = Some(NoiseSeed::plain(4242));
        profile
    }

    #[test]
    fn test_seeded_profile_passes() {
        let profile = seeded();
        for probe in builtin() {
            let outcome = (probe.run)(&profile).unwrap();
            assert!(outcome.passed, "{}: {:?}", probe.name, outcome);
        }
    }

    #[test]
    fn test_wrong_platform_detected() {
        let mut profile = seeded();
        profile.os.platform = "MacIntel".into();
        assert!(!platform_matches_os(&profile).unwrap().passed);
    }

    #[test]
    fn test_webdriver_true_detected() {
        let mut profile = seeded();
        profile.navigator.webdriver = Some(true);
        assert!(!webdriver_hidden(&profile).unwrap().passed);
        profile.navigator.webdriver = None;
        assert!(webdriver_hidden(&profile).unwrap().passed);
    }

    #[test]
    fn test_apple_gpu_on_windows_detected() {
        let mut profile = seeded();
        profile.webgl.unmasked_renderer = "ANGLE (Apple, ANGLE Metal Renderer: Apple M1, Unspecified Version)".into();
        assert!(!webgl_gpu_matches_os(&profile).unwrap().passed);
        assert!(!page_script_compiles(&profile).unwrap().passed);
    }

    #[test]
    fn test_webrtc_real_mode_skipped() {
        let mut profile = seeded();
        profile.webrtc.mode = WebRtcMode::Real;
        let outcome = webrtc_private_ip_hidden(&profile).unwrap();
        assert!(outcome.passed);
        assert!(outcome.details.is_some());
    }

    #[test]
    fn test_unknown_font_hidden() {
        let mut profile = seeded();
        profile.fonts.list.push("Zx Fingerprint Canary".into());
        assert!(!fonts_unknown_hidden(&profile).unwrap().passed);
    }
}
