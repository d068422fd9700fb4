//! Fingerprint profile data model.
//!
//! A [`FingerprintProfile`] carries every browser-observable attribute a
//! session presents to a page. Every dimension group is always present and
//! fully populated; missing groups in incoming JSON are filled from the
//! defaults, which describe a consistent Windows Chrome desktop.
//!
//! # Example
//!
//! ```rust
//! use ki_fingerprint::profile::{FingerprintProfile, OsType};
//!
//! let profile = FingerprintProfile::default();
//! assert_eq!(profile.os.r#type, OsType::Windows);
//!
//! let json = profile.to_json().unwrap();
//! let restored = FingerprintProfile::from_json(&json).unwrap();
//! assert_eq!(profile, restored);
//! ```

pub mod catalog;
pub mod consistency;
pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::noise::{NoiseDistribution, NoiseLevel};
use crate::seed::NoiseSeed;

pub use consistency::{
    ConsistencyValidator, IssueSeverity, SuggestedReport, Suggestion, ValidationIssue,
    ValidationReport,
};

/// Current profile schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors raised while (de)serializing profiles.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// Malformed or mistyped JSON.
    #[error("Failed to parse profile JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An enum-like string value was not recognized.
    #[error("Unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },
}

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal, default = $default:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ProfileError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lowered = s.to_lowercase();
                $(
                    if lowered == $text {
                        return Ok($name::$variant);
                    }
                )+
                Err(ProfileError::UnknownValue {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }
    };
}

string_enum!(
    /// Operating system family.
    OsType, "operating system", default = Windows {
        Windows => "windows",
        Macos => "macos",
        Linux => "linux",
    }
);

string_enum!(
    /// Browser product.
    BrowserType, "browser", default = Chrome {
        Chrome => "chrome",
        Firefox => "firefox",
        Safari => "safari",
        Edge => "edge",
    }
);

string_enum!(
    /// Canvas, audio and client-rect handling.
    NoiseMode, "noise mode", default = Noise {
        Noise => "noise",
        Real => "real",
        Off => "off",
    }
);

string_enum!(
    /// WebGL handling.
    WebGlMode, "webgl mode", default = Custom {
        Custom => "custom",
        Noise => "noise",
        Real => "real",
        Off => "off",
    }
);

string_enum!(
    /// Surfaces that are either spoofed or passed through.
    OverrideMode, "override mode", default = Custom {
        Custom => "custom",
        Real => "real",
    }
);

string_enum!(
    /// Surfaces that may additionally be blocked entirely.
    BlockableMode, "mode", default = Custom {
        Custom => "custom",
        Real => "real",
        Block => "block",
    }
);

string_enum!(
    /// Plugin list handling.
    PluginMode, "plugin mode", default = Custom {
        Custom => "custom",
        Real => "real",
        Empty => "empty",
    }
);

string_enum!(
    /// WebRTC handling.
    WebRtcMode, "webrtc mode", default = Replace {
        Replace => "replace",
        Disable => "disable",
        Real => "real",
    }
);

string_enum!(
    /// Permission query answer.
    PermissionState, "permission state", default = Prompt {
        Granted => "granted",
        Denied => "denied",
        Prompt => "prompt",
    }
);

string_enum!(
    /// `Notification.permission` value.
    NotificationPermission, "notification permission", default = Default {
        Default => "default",
        Granted => "granted",
        Denied => "denied",
    }
);

string_enum!(
    /// `navigator.connection.effectiveType` value.
    EffectiveType, "effective connection type", default = FourG {
        Slow2g => "slow-2g",
        TwoG => "2g",
        ThreeG => "3g",
        FourG => "4g",
    }
);

/// Browser product and version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserInfo {
    #[serde(rename = "type")]
    pub r#type: BrowserType,
    pub version: String,
    pub major_version: u32,
}

impl Default for BrowserInfo {
    fn default() -> Self {
        Self {
            r#type: BrowserType::Chrome,
            version: "120.0.0.0".to_string(),
            major_version: 120,
        }
    }
}

/// Operating system and its `navigator.platform` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    #[serde(rename = "type")]
    pub r#type: OsType,
    pub version: String,
    pub platform: String,
}

impl Default for OsInfo {
    fn default() -> Self {
        Self {
            r#type: OsType::Windows,
            version: "10.0".to_string(),
            platform: "Win32".to_string(),
        }
    }
}

/// Navigator properties derived from the User-Agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatorInfo {
    pub vendor: String,
    pub vendor_sub: String,
    pub product: String,
    pub product_sub: String,
    pub app_name: String,
    pub app_code_name: String,
    pub app_version: String,
    pub language: String,
    pub languages: Vec<String>,
    /// `Some(true)`, `Some(false)`, or `None` for `undefined`.
    #[serde(default)]
    pub webdriver: Option<bool>,
    pub cookie_enabled: bool,
    pub pdf_viewer_enabled: bool,
    pub on_line: bool,
}

impl Default for NavigatorInfo {
    fn default() -> Self {
        Self {
            vendor: "Google Inc.".to_string(),
            vendor_sub: String::new(),
            product: "Gecko".to_string(),
            product_sub: "20030107".to_string(),
            app_name: "Netscape".to_string(),
            app_code_name: "Mozilla".to_string(),
            app_version: "5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            language: "en-US".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            webdriver: Some(false),
            cookie_enabled: true,
            pdf_viewer_enabled: true,
            on_line: true,
        }
    }
}

/// Screen geometry as reported by `window.screen`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenInfo {
    pub width: u32,
    pub height: u32,
    pub avail_width: u32,
    pub avail_height: u32,
    pub color_depth: u32,
    pub pixel_depth: u32,
}

impl ScreenInfo {
    /// A screen with a taskbar of `reserved` pixels at the bottom.
    pub fn new(width: u32, height: u32, reserved: u32) -> Self {
        Self {
            width,
            height,
            avail_width: width,
            avail_height: height.saturating_sub(reserved),
            color_depth: 24,
            pixel_depth: 24,
        }
    }
}

impl Default for ScreenInfo {
    fn default() -> Self {
        Self::new(1920, 1080, 40)
    }
}

/// Hardware characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareInfo {
    pub cpu_cores: u32,
    pub device_memory: f64,
    pub max_touch_points: u32,
    pub screen: ScreenInfo,
    pub device_pixel_ratio: f64,
}

impl Default for HardwareInfo {
    fn default() -> Self {
        Self {
            cpu_cores: 8,
            device_memory: 8.0,
            max_touch_points: 0,
            screen: ScreenInfo::default(),
            device_pixel_ratio: 1.0,
        }
    }
}

/// Canvas or audio readback perturbation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseSurface {
    pub mode: NoiseMode,
    pub noise_level: NoiseLevel,
    pub noise_distribution: NoiseDistribution,
}

/// Shader precision triple returned by `getShaderPrecisionFormat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShaderPrecision {
    pub range_min: i32,
    pub range_max: i32,
    pub precision: i32,
}

impl Default for ShaderPrecision {
    fn default() -> Self {
        Self {
            range_min: 127,
            range_max: 127,
            precision: 23,
        }
    }
}

/// WebGL identity and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebGlInfo {
    pub mode: WebGlMode,
    pub vendor: String,
    pub renderer: String,
    pub unmasked_vendor: String,
    pub unmasked_renderer: String,
    pub version: String,
    pub shading_language_version: String,
    pub extensions: Vec<String>,
    pub max_texture_size: u32,
    pub max_viewport_dims: [u32; 2],
    pub shader_precision: ShaderPrecision,
}

impl Default for WebGlInfo {
    fn default() -> Self {
        Self {
            mode: WebGlMode::Custom,
            vendor: "WebKit".to_string(),
            renderer: "WebKit WebGL".to_string(),
            unmasked_vendor: "Google Inc. (NVIDIA)".to_string(),
            unmasked_renderer: "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)".to_string(),
            version: "WebGL 1.0 (OpenGL ES 2.0 Chromium)".to_string(),
            shading_language_version: "WebGL GLSL ES 1.0 (OpenGL ES GLSL ES 1.0 Chromium)".to_string(),
            extensions: catalog::default_webgl_extensions(),
            max_texture_size: 16384,
            max_viewport_dims: [32767, 32767],
            shader_precision: ShaderPrecision::default(),
        }
    }
}

/// Installed font list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontsInfo {
    pub mode: OverrideMode,
    pub list: Vec<String>,
}

impl Default for FontsInfo {
    fn default() -> Self {
        Self {
            mode: OverrideMode::Custom,
            list: [
                "Arial",
                "Calibri",
                "Cambria",
                "Consolas",
                "Courier New",
                "Georgia",
                "Segoe UI",
                "Tahoma",
                "Times New Roman",
                "Verdana",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// A MIME type exposed through a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MimeTypeEntry {
    #[serde(rename = "type")]
    pub r#type: String,
    pub suffixes: String,
    pub description: String,
}

/// A `navigator.plugins` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEntry {
    pub name: String,
    pub description: String,
    pub filename: String,
    pub mime_types: Vec<MimeTypeEntry>,
}

/// Plugin list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginsInfo {
    pub mode: PluginMode,
    pub list: Vec<PluginEntry>,
}

impl Default for PluginsInfo {
    fn default() -> Self {
        Self {
            mode: PluginMode::Custom,
            list: catalog::pdf_plugins(),
        }
    }
}

/// Locale and Accept-Language header value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub locale: String,
    pub accept_language: String,
}

impl Default for LanguageInfo {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            accept_language: "en-US,en;q=0.9".to_string(),
        }
    }
}

/// IANA zone name and UTC offset in minutes (east positive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimezoneInfo {
    pub mode: OverrideMode,
    pub name: String,
    pub offset: i32,
}

impl Default for TimezoneInfo {
    fn default() -> Self {
        Self {
            mode: OverrideMode::Custom,
            name: "America/New_York".to_string(),
            offset: -300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeolocationInfo {
    pub mode: BlockableMode,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

impl Default for GeolocationInfo {
    fn default() -> Self {
        Self {
            mode: BlockableMode::Custom,
            latitude: 40.7128,
            longitude: -74.006,
            accuracy: 50.0,
        }
    }
}

/// WebRTC leak protection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcInfo {
    pub mode: WebRtcMode,
    pub local_ip: String,
    /// Public address, or `"auto"` to leave public addresses untouched.
    pub public_ip: String,
    pub whitelist: Vec<String>,
    pub drop_non_relay: bool,
    pub force_relay: bool,
    pub disable_non_proxied_udp: bool,
}

impl Default for WebRtcInfo {
    fn default() -> Self {
        Self {
            mode: WebRtcMode::Replace,
            local_ip: "192.168.1.100".to_string(),
            public_ip: "auto".to_string(),
            whitelist: Vec::new(),
            drop_non_relay: false,
            force_relay: false,
            disable_non_proxied_udp: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRectsInfo {
    pub mode: NoiseMode,
    pub noise: f64,
}

impl Default for ClientRectsInfo {
    fn default() -> Self {
        Self {
            mode: NoiseMode::Noise,
            noise: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDevicesInfo {
    pub mode: BlockableMode,
    pub audio_inputs: u32,
    pub audio_outputs: u32,
    pub video_inputs: u32,
}

impl Default for MediaDevicesInfo {
    fn default() -> Self {
        Self {
            mode: BlockableMode::Custom,
            audio_inputs: 1,
            audio_outputs: 1,
            video_inputs: 1,
        }
    }
}

/// Battery status. `None` times are reported as `Infinity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryInfo {
    pub mode: BlockableMode,
    pub charging: bool,
    pub level: f64,
    #[serde(default)]
    pub charging_time: Option<f64>,
    #[serde(default)]
    pub discharging_time: Option<f64>,
}

impl Default for BatteryInfo {
    fn default() -> Self {
        Self {
            mode: BlockableMode::Custom,
            charging: true,
            level: 1.0,
            charging_time: Some(0.0),
            discharging_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorsInfo {
    pub mode: BlockableMode,
    pub accelerometer: bool,
    pub gyroscope: bool,
    pub magnetometer: bool,
}

impl Default for SensorsInfo {
    fn default() -> Self {
        Self {
            mode: BlockableMode::Block,
            accelerometer: false,
            gyroscope: false,
            magnetometer: false,
        }
    }
}

/// A `speechSynthesis.getVoices()` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechVoice {
    pub name: String,
    pub lang: String,
    pub local_service: bool,
    #[serde(rename = "default")]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechInfo {
    pub mode: BlockableMode,
    pub voices: Vec<SpeechVoice>,
}

impl Default for SpeechInfo {
    fn default() -> Self {
        Self {
            mode: BlockableMode::Custom,
            voices: catalog::speech_voices(OsType::Windows),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyInfo {
    /// `"1"`, `"0"`, or `None` for an unset header.
    #[serde(default)]
    pub do_not_track: Option<String>,
    pub global_privacy_control: bool,
}

impl Default for PrivacyInfo {
    fn default() -> Self {
        Self {
            do_not_track: None,
            global_privacy_control: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionsInfo {
    pub mode: OverrideMode,
    pub overrides: BTreeMap<String, PermissionState>,
}

impl Default for PermissionsInfo {
    fn default() -> Self {
        let mut overrides = BTreeMap::new();
        overrides.insert("notifications".to_string(), PermissionState::Prompt);
        overrides.insert("geolocation".to_string(), PermissionState::Prompt);
        overrides.insert("camera".to_string(), PermissionState::Prompt);
        overrides.insert("microphone".to_string(), PermissionState::Prompt);
        Self {
            mode: OverrideMode::Custom,
            overrides,
        }
    }
}

/// `navigator.connection` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub effective_type: EffectiveType,
    pub downlink: f64,
    pub rtt: u32,
    pub save_data: bool,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            effective_type: EffectiveType::FourG,
            downlink: 10.0,
            rtt: 50,
            save_data: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceInfo {
    pub timer_precision_ms: f64,
}

impl Default for PerformanceInfo {
    fn default() -> Self {
        Self {
            timer_precision_ms: 0.1,
        }
    }
}

/// Availability and values of the less common web APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedApis {
    pub permissions: PermissionsInfo,
    pub storage_quota: u64,
    pub connection: ConnectionInfo,
    pub keyboard_layout: String,
    pub performance: PerformanceInfo,
    pub pdf: bool,
    pub bluetooth: bool,
    pub usb: bool,
    pub gamepad: bool,
    pub history_length: u32,
    pub clipboard: bool,
    pub notification: NotificationPermission,
    pub service_worker: bool,
    pub wasm: bool,
    pub shared_array_buffer: bool,
    pub credentials: bool,
    pub payment: bool,
    pub presentation: bool,
}

impl Default for AdvancedApis {
    fn default() -> Self {
        Self {
            permissions: PermissionsInfo::default(),
            storage_quota: 299_977_904_128,
            connection: ConnectionInfo::default(),
            keyboard_layout: "en-US".to_string(),
            performance: PerformanceInfo::default(),
            pdf: true,
            bluetooth: true,
            usb: true,
            gamepad: true,
            history_length: 2,
            clipboard: true,
            notification: NotificationPermission::Default,
            service_worker: true,
            wasm: true,
            shared_array_buffer: false,
            credentials: true,
            payment: true,
            presentation: true,
        }
    }
}

/// The complete spoofed browser identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FingerprintProfile {
    pub id: String,
    pub account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,

    pub browser: BrowserInfo,
    pub os: OsInfo,
    pub user_agent: String,
    pub navigator: NavigatorInfo,
    pub hardware: HardwareInfo,
    pub canvas: NoiseSurface,
    pub audio: NoiseSurface,
    pub webgl: WebGlInfo,
    pub fonts: FontsInfo,
    pub plugins: PluginsInfo,
    pub language: LanguageInfo,
    pub timezone: TimezoneInfo,
    pub geolocation: GeolocationInfo,
    pub webrtc: WebRtcInfo,
    pub client_rects: ClientRectsInfo,
    pub media_devices: MediaDevicesInfo,
    pub battery: BatteryInfo,
    pub sensors: SensorsInfo,
    pub speech: SpeechInfo,
    pub privacy: PrivacyInfo,
    pub advanced_apis: AdvancedApis,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub noise_seed: Option<NoiseSeed>,
    pub seed_version: u32,
    pub seed_rotated_at: Option<DateTime<Utc>>,
}

impl Default for FingerprintProfile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: None,
            created_at: now,
            updated_at: now,
            version: SCHEMA_VERSION,
            browser: BrowserInfo::default(),
            os: OsInfo::default(),
            user_agent: catalog::build_user_agent(OsType::Windows, BrowserType::Chrome, "120.0.0.0"),
            navigator: NavigatorInfo::default(),
            hardware: HardwareInfo::default(),
            canvas: NoiseSurface::default(),
            audio: NoiseSurface::default(),
            webgl: WebGlInfo::default(),
            fonts: FontsInfo::default(),
            plugins: PluginsInfo::default(),
            language: LanguageInfo::default(),
            timezone: TimezoneInfo::default(),
            geolocation: GeolocationInfo::default(),
            webrtc: WebRtcInfo::default(),
            client_rects: ClientRectsInfo::default(),
            media_devices: MediaDevicesInfo::default(),
            battery: BatteryInfo::default(),
            sensors: SensorsInfo::default(),
            speech: SpeechInfo::default(),
            privacy: PrivacyInfo::default(),
            advanced_apis: AdvancedApis::default(),
            noise_seed: None,
            seed_version: 1,
            seed_rotated_at: None,
        }
    }
}

impl FingerprintProfile {
    /// Serializes to compact JSON.
    pub fn to_json(&self) -> Result<String, ProfileError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serializes to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, ProfileError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_value(&self) -> Result<Value, ProfileError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses a profile. Absent groups take their defaults; mistyped fields
    /// are rejected.
    pub fn from_json(json: &str) -> Result<Self, ProfileError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parses a profile from a JSON value. Unknown enum values such as an
    /// unrecognized `canvas.mode` fail here as [`ProfileError::Json`]; they
    /// never reach the field-level validator.
    pub fn from_value(value: Value) -> Result<Self, ProfileError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Assigns a fresh id and timestamps and binds the profile to `account_id`.
    pub fn reidentify(&mut self, account_id: Option<String>) {
        let now = Utc::now();
        self.id = Uuid::new_v4().to_string();
        self.account_id = account_id;
        self.created_at = now;
        self.updated_at = now;
    }

    /// Returns a deep copy with the account binding and seed removed.
    pub fn without_identity(&self) -> Self {
        let mut copy = self.clone();
        copy.account_id = None;
        copy.noise_seed = None;
        copy.seed_rotated_at = None;
        copy
    }

    /// The cleartext noise seed, if one is stored unencrypted.
    pub fn plain_seed(&self) -> Option<u32> {
        self.noise_seed.as_ref().and_then(|s| s.plain_value())
    }

    /// Short human-readable label such as `windows/chrome 120`.
    pub fn label(&self) -> String {
        format!(
            "{}/{} {}",
            self.os.r#type, self.browser.r#type, self.browser.major_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_shape() {
        let profile = FingerprintProfile::default();
        assert_eq!(profile.version, SCHEMA_VERSION);
        assert_eq!(profile.os.platform, "Win32");
        assert!(profile.user_agent.contains("Windows"));
        assert!(profile.account_id.is_none());
        assert!(Uuid::parse_str(&profile.id).is_ok());
    }

    #[test]
    fn test_json_uses_camel_case() {
        let value = FingerprintProfile::default().to_value().unwrap();
        assert!(value.get("userAgent").is_some());
        assert!(value["hardware"].get("cpuCores").is_some());
        assert!(value["hardware"]["screen"].get("availWidth").is_some());
        assert_eq!(value["browser"]["type"], "chrome");
        assert_eq!(value["advancedApis"]["connection"]["effectiveType"], "4g");
        assert!(value.get("noiseSeed").is_none());
    }

    #[test]
    fn test_double_round_trip() {
        let mut profile = FingerprintProfile::default();
        profile.noise_seed = Some(NoiseSeed::plain(0xDEAD_BEEF));
        profile.geolocation.latitude = 48.856_613_9;
        profile.hardware.device_pixel_ratio = 1.25;
        profile.navigator.webdriver = None;

        let once = FingerprintProfile::from_json(&profile.to_json().unwrap()).unwrap();
        let twice = FingerprintProfile::from_json(&once.to_json().unwrap()).unwrap();
        assert_eq!(profile, once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_groups_take_defaults() {
        let profile = FingerprintProfile::from_json(r#"{"userAgent":"x"}"#).unwrap();
        assert_eq!(profile.user_agent, "x");
        assert_eq!(profile.hardware.cpu_cores, 8);
    }

    #[test]
    fn test_mistyped_field_rejected() {
        let err = FingerprintProfile::from_json(r#"{"hardware":{"cpuCores":"many"}}"#);
        assert!(err.is_err());
        let err = FingerprintProfile::from_json(r#"{"os":{"type":"beos","version":"5","platform":"x"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_mode_rejected_at_parse() {
        let mut value = FingerprintProfile::default().to_value().unwrap();
        value["canvas"]["mode"] = Value::String("scramble".into());
        let err = FingerprintProfile::from_value(value).unwrap_err();
        assert!(matches!(err, ProfileError::Json(_)));
        assert!(err.to_string().contains("scramble"));
    }

    #[test]
    fn test_without_identity_is_deep_copy() {
        let mut profile = FingerprintProfile::default();
        profile.account_id = Some("acct".to_string());
        profile.noise_seed = Some(NoiseSeed::plain(1));
        let mut copy = profile.without_identity();
        copy.fonts.list.push("Impact".to_string());
        assert!(copy.account_id.is_none());
        assert!(copy.noise_seed.is_none());
        assert!(!profile.fonts.list.contains(&"Impact".to_string()));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("MacOS".parse::<OsType>().unwrap(), OsType::Macos);
        assert_eq!("slow-2g".parse::<EffectiveType>().unwrap(), EffectiveType::Slow2g);
        assert!("netscape".parse::<BrowserType>().is_err());
        assert_eq!(BrowserType::ALL.len(), 4);
    }
}
