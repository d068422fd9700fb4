//! Intrinsic field validation.
//!
//! Each rule looks at a single field in isolation (range, enum membership,
//! format). Every invalid field yields its own issue; validation never stops
//! at the first failure.

use serde::Serialize;
use serde_json::Value;
use std::net::IpAddr;

use super::consistency::ValidationIssue;
use super::{FingerprintProfile, OverrideMode, SCHEMA_VERSION};

/// Values `navigator.deviceMemory` may take.
pub const DEVICE_MEMORY_VALUES: [f64; 9] = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0];

/// Values `screen.colorDepth` may take.
pub const COLOR_DEPTHS: [u32; 6] = [8, 16, 24, 30, 32, 48];

pub const CPU_CORES_RANGE: (u32, u32) = (1, 128);
pub const TIMEZONE_OFFSET_RANGE: (i32, i32) = (-720, 840);

struct Collector {
    issues: Vec<ValidationIssue>,
}

impl Collector {
    fn check<V: Serialize>(&mut self, ok: bool, field: &str, value: V, reason: impl Into<String>) {
        if !ok {
            self.issues
                .push(ValidationIssue::new(field, reason, to_value(value)));
        }
    }

    fn check_range<V>(&mut self, field: &str, value: V, min: V, max: V)
    where
        V: PartialOrd + Serialize + std::fmt::Display + Copy,
    {
        let ok = value >= min && value <= max;
        self.check(
            ok,
            field,
            value,
            format!("must be between {} and {}", min, max),
        );
    }

    fn check_non_empty(&mut self, field: &str, value: &str) {
        self.check(!value.trim().is_empty(), field, value, "must not be empty");
    }

    fn check_ip(&mut self, field: &str, value: &str) {
        self.check(
            value.parse::<IpAddr>().is_ok(),
            field,
            value,
            "must be a valid IPv4 or IPv6 address",
        );
    }
}

fn to_value<V: Serialize>(value: V) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn finite_in(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && value >= min && value <= max
}

/// Validates every field of `profile` on its own.
pub fn validate_fields(profile: &FingerprintProfile) -> Vec<ValidationIssue> {
    let mut c = Collector { issues: Vec::new() };

    // Identity
    c.check_non_empty("id", &profile.id);
    c.check_range("version", profile.version, 1, SCHEMA_VERSION);
    c.check(profile.seed_version >= 1, "seedVersion", profile.seed_version, "must be at least 1");

    // Browser and OS
    c.check_non_empty("browser.version", &profile.browser.version);
    c.check_range("browser.majorVersion", profile.browser.major_version, 1, 999);
    c.check_non_empty("os.version", &profile.os.version);
    c.check_non_empty("os.platform", &profile.os.platform);
    c.check(
        profile.user_agent.starts_with("Mozilla/5.0 ("),
        "userAgent",
        &profile.user_agent,
        "must be a Mozilla/5.0 User-Agent string",
    );

    // Navigator
    let nav = &profile.navigator;
    c.check_non_empty("navigator.language", &nav.language);
    c.check(
        !nav.languages.is_empty() && nav.languages.iter().all(|l| !l.trim().is_empty()),
        "navigator.languages",
        &nav.languages,
        "must be a non-empty list of language tags",
    );
    c.check_non_empty("navigator.appVersion", &nav.app_version);

    // Hardware
    let hw = &profile.hardware;
    c.check_range("hardware.cpuCores", hw.cpu_cores, CPU_CORES_RANGE.0, CPU_CORES_RANGE.1);
    c.check(
        DEVICE_MEMORY_VALUES.contains(&hw.device_memory),
        "hardware.deviceMemory",
        hw.device_memory,
        "must be one of 0.25, 0.5, 1, 2, 4, 8, 16, 32, 64",
    );
    c.check_range("hardware.maxTouchPoints", hw.max_touch_points, 0, 10);
    c.check(
        finite_in(hw.device_pixel_ratio, 0.5, 5.0),
        "hardware.devicePixelRatio",
        hw.device_pixel_ratio,
        "must be between 0.5 and 5",
    );

    let screen = &hw.screen;
    c.check_range("hardware.screen.width", screen.width, 320, 7680);
    c.check_range("hardware.screen.height", screen.height, 240, 4320);
    c.check(
        screen.avail_width <= screen.width,
        "hardware.screen.availWidth",
        screen.avail_width,
        format!("must not exceed screen width {}", screen.width),
    );
    c.check(
        screen.avail_height <= screen.height,
        "hardware.screen.availHeight",
        screen.avail_height,
        format!("must not exceed screen height {}", screen.height),
    );
    c.check(
        COLOR_DEPTHS.contains(&screen.color_depth),
        "hardware.screen.colorDepth",
        screen.color_depth,
        "must be one of 8, 16, 24, 30, 32, 48",
    );
    c.check(
        screen.pixel_depth == screen.color_depth,
        "hardware.screen.pixelDepth",
        screen.pixel_depth,
        format!("must equal colorDepth {}", screen.color_depth),
    );

    // WebGL
    let webgl = &profile.webgl;
    c.check(
        webgl.max_texture_size.is_power_of_two() && (1024..=32768).contains(&webgl.max_texture_size),
        "webgl.maxTextureSize",
        webgl.max_texture_size,
        "must be a power of two between 1024 and 32768",
    );
    c.check(
        webgl.max_viewport_dims.iter().all(|d| *d > 0),
        "webgl.maxViewportDims",
        webgl.max_viewport_dims,
        "must be positive",
    );

    // Fonts, plugins, language
    if profile.fonts.mode == OverrideMode::Custom {
        c.check(
            !profile.fonts.list.is_empty(),
            "fonts.list",
            &profile.fonts.list,
            "must not be empty in custom mode",
        );
    }
    c.check(
        profile.fonts.list.iter().all(|f| !f.trim().is_empty()),
        "fonts.list",
        &profile.fonts.list,
        "must not contain empty font names",
    );
    c.check(
        profile.plugins.list.iter().all(|p| !p.name.trim().is_empty()),
        "plugins.list",
        profile.plugins.list.len(),
        "plugin names must not be empty",
    );
    c.check_non_empty("language.locale", &profile.language.locale);
    c.check_non_empty("language.acceptLanguage", &profile.language.accept_language);

    // Timezone and geolocation
    c.check_range(
        "timezone.offset",
        profile.timezone.offset,
        TIMEZONE_OFFSET_RANGE.0,
        TIMEZONE_OFFSET_RANGE.1,
    );
    if profile.timezone.mode == OverrideMode::Custom {
        c.check_non_empty("timezone.name", &profile.timezone.name);
    }
    let geo = &profile.geolocation;
    c.check(
        finite_in(geo.latitude, -90.0, 90.0),
        "geolocation.latitude",
        geo.latitude,
        "must be between -90 and 90",
    );
    c.check(
        finite_in(geo.longitude, -180.0, 180.0),
        "geolocation.longitude",
        geo.longitude,
        "must be between -180 and 180",
    );
    c.check(
        geo.accuracy.is_finite() && geo.accuracy > 0.0,
        "geolocation.accuracy",
        geo.accuracy,
        "must be greater than 0",
    );

    // WebRTC
    let rtc = &profile.webrtc;
    c.check_ip("webrtc.localIp", &rtc.local_ip);
    if rtc.public_ip != "auto" {
        c.check_ip("webrtc.publicIp", &rtc.public_ip);
    }
    for (i, addr) in rtc.whitelist.iter().enumerate() {
        c.check_ip(&format!("webrtc.whitelist[{}]", i), addr);
    }

    // Remaining surfaces
    c.check(
        finite_in(profile.client_rects.noise, 0.0, 1.0),
        "clientRects.noise",
        profile.client_rects.noise,
        "must be between 0 and 1",
    );
    let media = &profile.media_devices;
    c.check_range("mediaDevices.audioInputs", media.audio_inputs, 0, 16);
    c.check_range("mediaDevices.audioOutputs", media.audio_outputs, 0, 16);
    c.check_range("mediaDevices.videoInputs", media.video_inputs, 0, 16);

    let battery = &profile.battery;
    c.check(
        finite_in(battery.level, 0.0, 1.0),
        "battery.level",
        battery.level,
        "must be between 0 and 1",
    );
    for (field, value) in [
        ("battery.chargingTime", battery.charging_time),
        ("battery.dischargingTime", battery.discharging_time),
    ] {
        if let Some(seconds) = value {
            c.check(seconds.is_finite() && seconds >= 0.0, field, seconds, "must be non-negative");
        }
    }

    c.check(
        matches!(profile.privacy.do_not_track.as_deref(), None | Some("1") | Some("0")),
        "privacy.doNotTrack",
        &profile.privacy.do_not_track,
        "must be \"1\", \"0\" or null",
    );

    let apis = &profile.advanced_apis;
    c.check(
        apis.storage_quota > 0,
        "advancedApis.storageQuota",
        apis.storage_quota,
        "must be greater than 0",
    );
    c.check(
        apis.connection.downlink.is_finite() && apis.connection.downlink >= 0.0,
        "advancedApis.connection.downlink",
        apis.connection.downlink,
        "must be non-negative",
    );
    c.check_range("advancedApis.connection.rtt", apis.connection.rtt, 0, 3000);
    c.check(
        finite_in(apis.performance.timer_precision_ms, 0.0, 1000.0),
        "advancedApis.performance.timerPrecisionMs",
        apis.performance.timer_precision_ms,
        "must be between 0 and 1000",
    );
    c.check_range("advancedApis.historyLength", apis.history_length, 1, 50);
    c.check_non_empty("advancedApis.keyboardLayout", &apis.keyboard_layout);

    if let Some(seed) = &profile.noise_seed {
        c.check(
            seed.is_coherent(),
            "noiseSeed",
            seed.encrypted,
            "encrypted flag does not match the stored value",
        );
    }

    c.issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(issues: &[ValidationIssue]) -> Vec<&str> {
        issues.iter().map(|i| i.field.as_str()).collect()
    }

    #[test]
    fn test_default_profile_has_no_field_errors() {
        let issues = validate_fields(&FingerprintProfile::default());
        assert!(issues.is_empty(), "{:?}", issues);
    }

    #[test]
    fn test_cpu_cores_out_of_range() {
        let mut profile = FingerprintProfile::default();
        profile.hardware.cpu_cores = 200;
        let issues = validate_fields(&profile);
        assert_eq!(fields(&issues), vec!["hardware.cpuCores"]);
        assert_eq!(issues[0].value, json!(200));
    }

    #[test]
    fn test_one_issue_per_invalid_field() {
        let mut profile = FingerprintProfile::default();
        profile.hardware.cpu_cores = 0;
        profile.hardware.device_memory = 3.0;
        profile.timezone.offset = 900;
        profile.geolocation.latitude = 91.0;
        profile.battery.level = 1.5;
        profile.webrtc.local_ip = "not-an-ip".to_string();

        let issues = validate_fields(&profile);
        let found = fields(&issues);
        for field in [
            "hardware.cpuCores",
            "hardware.deviceMemory",
            "timezone.offset",
            "geolocation.latitude",
            "battery.level",
            "webrtc.localIp",
        ] {
            assert!(found.contains(&field), "missing {}", field);
        }
        assert_eq!(issues.len(), 6);
    }

    #[test]
    fn test_screen_invariants() {
        let mut profile = FingerprintProfile::default();
        profile.hardware.screen.avail_width = 2000;
        profile.hardware.screen.pixel_depth = 32;
        let found: Vec<String> = validate_fields(&profile)
            .into_iter()
            .map(|i| i.field)
            .collect();
        assert!(found.contains(&"hardware.screen.availWidth".to_string()));
        assert!(found.contains(&"hardware.screen.pixelDepth".to_string()));
    }

    #[test]
    fn test_public_ip_auto_accepted() {
        let mut profile = FingerprintProfile::default();
        profile.webrtc.public_ip = "auto".to_string();
        assert!(validate_fields(&profile).is_empty());
        profile.webrtc.public_ip = "203.0.113.9".to_string();
        assert!(validate_fields(&profile).is_empty());
        profile.webrtc.public_ip = "nope".to_string();
        assert_eq!(fields(&validate_fields(&profile)), vec!["webrtc.publicIp"]);
    }

    #[test]
    fn test_nan_rejected() {
        let mut profile = FingerprintProfile::default();
        profile.hardware.device_pixel_ratio = f64::NAN;
        assert_eq!(
            fields(&validate_fields(&profile)),
            vec!["hardware.devicePixelRatio"]
        );
    }
}
