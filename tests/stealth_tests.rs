//! Integration tests for the stealth spoofing modules
//!
//! Tests for webdriver handling, navigator overrides, script generation per
//! context, camouflage of patched functions and seeded noise determinism.

use ki_fingerprint::noise::{NoiseEngine, NoiseLevel, NoiseOptions};
use ki_fingerprint::profile::{BrowserType, FingerprintProfile, WebRtcMode};
use ki_fingerprint::stealth::{
    builtin_modules, create_constant_function, module_names, rewrite_candidate, rewrite_sdp,
    verify_native_characteristics, NavigatorSpoof, ObjectSurface, ScriptContext, ScriptInput,
};
use serde_json::json;

fn render_all(profile: &FingerprintProfile, seed: Option<u32>, context: ScriptContext) -> String {
    let input = ScriptInput::new(profile, seed, context);
    builtin_modules()
        .iter()
        .filter(|m| m.applies_to(context))
        .map(|m| m.script(&input).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

fn spoofed(profile: &FingerprintProfile) -> ObjectSurface {
    let mut navigator = ObjectSurface::new("Navigator");
    navigator.define_getter("webdriver", json!(true));
    navigator.define_getter("userAgent", json!("HeadlessChrome/120.0.0.0"));
    NavigatorSpoof::apply(&mut navigator, profile);
    navigator
}

// ============================================================================
// Webdriver Property Tests
// ============================================================================

#[test]
fn test_webdriver_false_by_default() {
    let navigator = spoofed(&FingerprintProfile::default());
    assert_eq!(navigator.get("webdriver"), Some(json!(false)));
}

#[test]
fn test_webdriver_absent_when_unset() {
    let mut profile = FingerprintProfile::default();
    profile.navigator.webdriver = None;

    let navigator = spoofed(&profile);
    assert!(!navigator.has("webdriver"));

    let script = render_all(&profile, None, ScriptContext::Page);
    assert!(script.contains("delete navProto[\"webdriver\"]"));
}

#[test]
fn test_webdriver_never_true_in_default_scripts() {
    for context in ScriptContext::ALL {
        let script = render_all(&FingerprintProfile::default(), Some(1), *context);
        assert!(!script.contains("\"webdriver\", true"), "context {}", context);
    }
}

#[test]
fn test_automation_globals_removed_in_window_only() {
    let profile = FingerprintProfile::default();
    let page = render_all(&profile, None, ScriptContext::Page);
    assert!(page.contains("cdc_adoQpoasnfa76pfcZLmcfl_Array"));
    assert!(page.contains("domAutomationController"));

    let worker = render_all(&profile, None, ScriptContext::Worker);
    assert!(!worker.contains("domAutomationController"));
}

// ============================================================================
// Navigator Override Tests
// ============================================================================

#[test]
fn test_navigator_reads_profile_values() {
    let mut profile = FingerprintProfile::default();
    profile.hardware.cpu_cores = 16;
    profile.navigator.languages = vec!["fr-FR".into(), "fr".into()];
    profile.navigator.language = "fr-FR".into();

    let navigator = spoofed(&profile);
    assert!(NavigatorSpoof::verify(&navigator, &profile).is_empty());
    assert_eq!(navigator.get("userAgent"), Some(json!(profile.user_agent)));
    assert_eq!(navigator.get("hardwareConcurrency"), Some(json!(16)));
    assert_eq!(navigator.get("languages"), Some(json!(["fr-FR", "fr"])));
}

#[test]
fn test_device_memory_only_on_chromium() {
    let mut profile = FingerprintProfile::default();
    assert!(spoofed(&profile).has("deviceMemory"));

    profile.browser.r#type = BrowserType::Firefox;
    let mut navigator = ObjectSurface::new("Navigator");
    navigator.define_getter("deviceMemory", json!(8));
    NavigatorSpoof::apply(&mut navigator, &profile);
    assert!(!navigator.has("deviceMemory"));
}

#[test]
fn test_worker_script_limited_to_worker_navigator() {
    let profile = FingerprintProfile::default();
    let worker = render_all(&profile, None, ScriptContext::Worker);
    assert!(worker.contains("\"userAgent\""));
    assert!(worker.contains("\"hardwareConcurrency\""));
    assert!(!worker.contains("\"vendorSub\""));
    assert!(!worker.contains("\"pdfViewerEnabled\""));
}

// ============================================================================
// Camouflage Tests
// ============================================================================

#[test]
fn test_patched_getters_look_native() {
    let navigator = spoofed(&FingerprintProfile::default());
    for key in navigator.own_keys() {
        if let Some(getter) = navigator.getter(key) {
            let check = verify_native_characteristics(getter);
            assert!(check.passed(), "{}: {:?}", key, check);
        }
    }
    assert_eq!(navigator.to_string_tag(), "[object Navigator]");
}

#[test]
fn test_constant_function_stringifies_as_native() {
    let f = create_constant_function("getTimezoneOffset", json!(-60), 0);
    assert_eq!(f.to_string(), "function getTimezoneOffset() { [native code] }");
    assert_eq!(f.call(&[]), json!(-60));
    assert!(verify_native_characteristics(&f).passed());
}

#[test]
fn test_scripts_never_leak_internal_names() {
    let script = render_all(&FingerprintProfile::default(), Some(42), ScriptContext::Page);
    assert!(!script.contains("ki_fingerprint"));
    assert!(!script.contains("__fp_"));
}

// ============================================================================
// Script Generation Tests
// ============================================================================

#[test]
fn test_module_order_and_names() {
    let names = module_names();
    assert_eq!(names.first(), Some(&"navigator"));
    for expected in ["webgl", "canvas", "audio", "webrtc", "screen", "timezone", "fonts"] {
        assert!(names.contains(&expected), "missing {}", expected);
    }
}

#[test]
fn test_window_only_modules_skip_workers() {
    for module in builtin_modules() {
        if module.name() == "navigator" {
            assert!(module.applies_to(ScriptContext::Worker));
        }
        if module.name() == "fonts" {
            assert!(!module.applies_to(ScriptContext::Worker));
        }
    }
}

#[test]
fn test_noise_modules_need_seed() {
    let profile = FingerprintProfile::default();
    let input = ScriptInput::new(&profile, None, ScriptContext::Page);
    let canvas = builtin_modules()
        .into_iter()
        .find(|m| m.name() == "canvas")
        .unwrap();
    assert!(canvas.script(&input).unwrap().is_empty());

    let seeded = ScriptInput::new(&profile, Some(7), ScriptContext::Page);
    assert!(canvas.script(&seeded).unwrap().contains("const SEED = 7 >>> 0;"));
}

// ============================================================================
// Consistent Noise with Same Seed Tests
// ============================================================================

#[test]
fn test_same_seed_same_script() {
    let profile = FingerprintProfile::default();
    assert_eq!(
        render_all(&profile, Some(1234), ScriptContext::Page),
        render_all(&profile, Some(1234), ScriptContext::Page)
    );
    assert_ne!(
        render_all(&profile, Some(1234), ScriptContext::Page),
        render_all(&profile, Some(4321), ScriptContext::Page)
    );
}

#[test]
fn test_canvas_noise_deterministic_and_bounded() {
    let options = NoiseOptions {
        level: NoiseLevel::Medium,
        ..Default::default()
    };
    let clean: Vec<u8> = (0..400u32).map(|i| 64 + (i % 128) as u8).collect();

    let mut first = clean.clone();
    let mut second = clean.clone();
    NoiseEngine::new(99, options).apply_to_canvas_data(&mut first);
    NoiseEngine::new(99, options).apply_to_canvas_data(&mut second);

    assert_eq!(first, second);
    assert_ne!(first, clean);
    for (noisy, original) in first.iter().zip(&clean) {
        assert!((*noisy as i16 - *original as i16).abs() <= 3);
    }
}

// ============================================================================
// WebRTC Tests
// ============================================================================

#[test]
fn test_private_candidate_replaced() {
    let profile = FingerprintProfile::default();
    let candidate = "candidate:842163049 1 udp 1677729535 10.0.0.7 56143 typ srflx raddr 192.168.0.9 rport 56143";
    let rewritten = rewrite_candidate(candidate, &profile.webrtc).unwrap();
    assert!(!rewritten.contains("10.0.0.7"));
    assert!(!rewritten.contains("192.168.0.9"));
    assert!(rewritten.contains(&profile.webrtc.local_ip));
}

#[test]
fn test_disabled_webrtc_drops_candidates() {
    let mut profile = FingerprintProfile::default();
    profile.webrtc.mode = WebRtcMode::Disable;
    let sdp = "v=0\r\na=candidate:1 1 udp 2122260223 10.0.0.7 50000 typ host\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";
    let rewritten = rewrite_sdp(sdp, &profile.webrtc);
    assert!(!rewritten.contains("candidate"));
    assert!(rewritten.contains("m=audio"));
}
