//! Static knowledge about operating systems, browsers and their fingerprints.
//!
//! These tables drive both validation (what is plausible for an OS) and
//! generation (what to pick when synthesizing a profile).

use super::{BrowserType, MimeTypeEntry, OsType, PluginEntry, SpeechVoice};

/// Fonts present on essentially every desktop.
pub const UNIVERSAL_FONTS: [&str; 5] = [
    "Arial",
    "Times New Roman",
    "Courier New",
    "Verdana",
    "Georgia",
];

/// Traits of an operating system family that a consistent profile must share.
#[derive(Debug)]
pub struct OsTraits {
    pub os: OsType,
    /// The single valid `navigator.platform` value.
    pub platform: &'static str,
    /// User-Agent substrings, any one of which identifies the OS.
    pub ua_markers: &'static [&'static str],
    /// Lowercase GPU vendor keywords plausible on the OS.
    pub gpu_vendors: &'static [&'static str],
    /// Fonts commonly installed on the OS.
    pub typical_fonts: &'static [&'static str],
    /// Fonts that only ship with the OS.
    pub exclusive_fonts: &'static [&'static str],
    /// Browsers available for the OS.
    pub browsers: &'static [BrowserType],
    /// Usual `os.version` value.
    pub default_version: &'static str,
}

static WINDOWS: OsTraits = OsTraits {
    os: OsType::Windows,
    platform: "Win32",
    ua_markers: &["Windows"],
    gpu_vendors: &["nvidia", "amd", "ati technologies", "intel", "microsoft"],
    typical_fonts: &[
        "Calibri",
        "Cambria",
        "Candara",
        "Consolas",
        "Constantia",
        "Corbel",
        "Franklin Gothic Medium",
        "Lucida Console",
        "Microsoft Sans Serif",
        "MS Gothic",
        "Palatino Linotype",
        "Segoe Print",
        "Segoe Script",
        "Segoe UI",
        "Sylfaen",
        "Tahoma",
    ],
    exclusive_fonts: &[
        "Segoe UI",
        "Segoe Print",
        "Segoe Script",
        "Microsoft Sans Serif",
        "MS Gothic",
        "Marlett",
    ],
    browsers: &[BrowserType::Chrome, BrowserType::Firefox, BrowserType::Edge],
    default_version: "10.0",
};

static MACOS: OsTraits = OsTraits {
    os: OsType::Macos,
    platform: "MacIntel",
    ua_markers: &["Macintosh", "Mac OS X"],
    gpu_vendors: &["apple", "intel", "amd", "ati technologies"],
    typical_fonts: &[
        "American Typewriter",
        "Avenir",
        "Avenir Next",
        "Futura",
        "Geneva",
        "Gill Sans",
        "Helvetica",
        "Helvetica Neue",
        "Lucida Grande",
        "Menlo",
        "Monaco",
        "Optima",
        "SF Pro",
        "Skia",
    ],
    exclusive_fonts: &[
        "Helvetica Neue",
        "Lucida Grande",
        "Menlo",
        "SF Pro",
        "Apple Color Emoji",
        "Geneva",
        "Monaco",
    ],
    browsers: &[BrowserType::Chrome, BrowserType::Safari, BrowserType::Firefox],
    default_version: "10.15.7",
};

static LINUX: OsTraits = OsTraits {
    os: OsType::Linux,
    platform: "Linux x86_64",
    ua_markers: &["Linux", "X11"],
    gpu_vendors: &["nvidia", "amd", "ati technologies", "intel", "mesa", "x.org"],
    typical_fonts: &[
        "Cantarell",
        "DejaVu Sans",
        "DejaVu Sans Mono",
        "DejaVu Serif",
        "FreeMono",
        "FreeSans",
        "Liberation Mono",
        "Liberation Sans",
        "Liberation Serif",
        "Noto Sans",
        "Noto Serif",
        "Ubuntu",
        "Ubuntu Mono",
    ],
    exclusive_fonts: &[
        "DejaVu Sans",
        "DejaVu Serif",
        "DejaVu Sans Mono",
        "Liberation Sans",
        "Liberation Serif",
        "Ubuntu",
        "Cantarell",
        "Noto Color Emoji",
    ],
    browsers: &[BrowserType::Chrome, BrowserType::Firefox],
    default_version: "6.5",
};

/// Returns the traits table for `os`.
pub fn traits(os: OsType) -> &'static OsTraits {
    match os {
        OsType::Windows => &WINDOWS,
        OsType::Macos => &MACOS,
        OsType::Linux => &LINUX,
    }
}

/// Lowercase GPU substrings that only occur on one OS.
pub const EXCLUSIVE_GPU_MARKERS: [(&str, OsType); 6] = [
    ("apple m", OsType::Macos),
    ("apple gpu", OsType::Macos),
    ("direct3d", OsType::Windows),
    ("d3d11", OsType::Windows),
    ("d3d9", OsType::Windows),
    ("mesa", OsType::Linux),
];

/// First exclusive GPU marker in `text` that belongs to an OS other than `os`.
pub fn foreign_gpu_marker(os: OsType, text: &str) -> Option<(&'static str, OsType)> {
    let lowered = text.to_lowercase();
    EXCLUSIVE_GPU_MARKERS
        .iter()
        .find(|(marker, owner)| *owner != os && lowered.contains(marker))
        .copied()
}

/// True when `vendor` names a GPU vendor known on `os`.
pub fn gpu_vendor_known(os: OsType, vendor: &str) -> bool {
    let lowered = vendor.to_lowercase();
    traits(os).gpu_vendors.iter().any(|v| lowered.contains(v))
}

/// True when the User-Agent carries one of the OS's markers.
pub fn ua_matches_os(os: OsType, user_agent: &str) -> bool {
    traits(os).ua_markers.iter().any(|m| user_agent.contains(m))
}

/// Browser family a User-Agent string advertises, if recognizable.
pub fn browser_from_ua(user_agent: &str) -> Option<BrowserType> {
    if user_agent.contains("Edg/") {
        Some(BrowserType::Edge)
    } else if user_agent.contains("Firefox/") {
        Some(BrowserType::Firefox)
    } else if user_agent.contains("Chrome/") {
        Some(BrowserType::Chrome)
    } else if user_agent.contains("Version/") && user_agent.contains("Safari/") {
        Some(BrowserType::Safari)
    } else {
        None
    }
}

/// OS whose markers appear in the User-Agent, if recognizable.
pub fn os_from_ua(user_agent: &str) -> Option<OsType> {
    [OsType::Windows, OsType::Macos, OsType::Linux]
        .into_iter()
        .find(|os| ua_matches_os(*os, user_agent))
}

/// Expected `navigator.vendor` for a browser.
pub fn navigator_vendor(browser: BrowserType) -> &'static str {
    match browser {
        BrowserType::Chrome | BrowserType::Edge => "Google Inc.",
        BrowserType::Safari => "Apple Computer, Inc.",
        BrowserType::Firefox => "",
    }
}

/// Expected `navigator.productSub` for a browser engine.
pub fn product_sub(browser: BrowserType) -> &'static str {
    match browser {
        BrowserType::Firefox => "20100101",
        _ => "20030107",
    }
}

/// `navigator.appVersion`: the User-Agent without its `Mozilla/` prefix.
///
/// Firefox reports only the platform token.
pub fn app_version(browser: BrowserType, user_agent: &str) -> String {
    let trimmed = user_agent.strip_prefix("Mozilla/").unwrap_or(user_agent);
    if browser == BrowserType::Firefox {
        if let (Some(start), Some(end)) = (trimmed.find('('), trimmed.find(')')) {
            if start < end {
                let platform = trimmed[start + 1..end]
                    .split("; rv:")
                    .next()
                    .unwrap_or_default();
                return format!("5.0 ({})", platform);
            }
        }
    }
    trimmed.to_string()
}

/// Major version from a dotted version string.
pub fn major_version(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(0)
}

/// Builds a User-Agent for the OS and browser at `version`.
pub fn build_user_agent(os: OsType, browser: BrowserType, version: &str) -> String {
    let major = major_version(version);
    let gecko_token = match os {
        OsType::Windows => "Windows NT 10.0; Win64; x64",
        OsType::Macos => "Macintosh; Intel Mac OS X 10.15",
        OsType::Linux => "X11; Linux x86_64",
    };
    let webkit_token = match os {
        OsType::Windows => "Windows NT 10.0; Win64; x64",
        OsType::Macos => "Macintosh; Intel Mac OS X 10_15_7",
        OsType::Linux => "X11; Linux x86_64",
    };

    match browser {
        BrowserType::Chrome => format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36",
            webkit_token, version
        ),
        BrowserType::Edge => format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{} Safari/537.36 Edg/{}",
            webkit_token, version, version
        ),
        BrowserType::Firefox => format!(
            "Mozilla/5.0 ({}; rv:{}.0) Gecko/20100101 Firefox/{}.0",
            gecko_token, major, major
        ),
        BrowserType::Safari => format!(
            "Mozilla/5.0 ({}) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/{} Safari/605.1.15",
            webkit_token, version
        ),
    }
}

/// A browser version plausible for the browser family.
pub fn default_browser_version(browser: BrowserType) -> &'static str {
    match browser {
        BrowserType::Chrome | BrowserType::Edge => "120.0.0.0",
        BrowserType::Firefox => "121.0",
        BrowserType::Safari => "17.2",
    }
}

/// Common desktop resolutions for an OS with their device pixel ratios.
///
/// Values are CSS pixels, as `window.screen` reports them.
pub fn resolutions(os: OsType) -> &'static [(u32, u32, f64)] {
    match os {
        OsType::Windows => &[
            (1920, 1080, 1.0),
            (1366, 768, 1.0),
            (1536, 864, 1.25),
            (1440, 900, 1.0),
            (1600, 900, 1.0),
            (2560, 1440, 1.0),
            (1280, 720, 1.5),
        ],
        OsType::Macos => &[
            (1440, 900, 2.0),
            (1512, 982, 2.0),
            (1728, 1117, 2.0),
            (1680, 1050, 2.0),
            (2560, 1440, 2.0),
        ],
        OsType::Linux => &[
            (1920, 1080, 1.0),
            (1366, 768, 1.0),
            (2560, 1440, 1.0),
            (1600, 900, 1.0),
        ],
    }
}

/// Pixels reserved by the OS shell (taskbar, menu bar) at the screen edge.
pub fn reserved_screen_height(os: OsType) -> u32 {
    match os {
        OsType::Windows => 40,
        OsType::Macos => 25,
        OsType::Linux => 27,
    }
}

/// A timezone with a representative city location.
#[derive(Debug, Clone, Copy)]
pub struct TimezoneEntry {
    pub name: &'static str,
    /// Offset from UTC in minutes, east positive (winter time).
    pub offset: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub locale: &'static str,
}

pub const TIMEZONES: [TimezoneEntry; 12] = [
    TimezoneEntry { name: "America/New_York", offset: -300, latitude: 40.7128, longitude: -74.006, locale: "en-US" },
    TimezoneEntry { name: "America/Chicago", offset: -360, latitude: 41.8781, longitude: -87.6298, locale: "en-US" },
    TimezoneEntry { name: "America/Denver", offset: -420, latitude: 39.7392, longitude: -104.9903, locale: "en-US" },
    TimezoneEntry { name: "America/Los_Angeles", offset: -480, latitude: 34.0522, longitude: -118.2437, locale: "en-US" },
    TimezoneEntry { name: "Europe/London", offset: 0, latitude: 51.5074, longitude: -0.1278, locale: "en-GB" },
    TimezoneEntry { name: "Europe/Berlin", offset: 60, latitude: 52.52, longitude: 13.405, locale: "de-DE" },
    TimezoneEntry { name: "Europe/Paris", offset: 60, latitude: 48.8566, longitude: 2.3522, locale: "fr-FR" },
    TimezoneEntry { name: "Europe/Madrid", offset: 60, latitude: 40.4168, longitude: -3.7038, locale: "es-ES" },
    TimezoneEntry { name: "Asia/Tokyo", offset: 540, latitude: 35.6762, longitude: 139.6503, locale: "ja-JP" },
    TimezoneEntry { name: "Asia/Kolkata", offset: 330, latitude: 19.076, longitude: 72.8777, locale: "en-IN" },
    TimezoneEntry { name: "Australia/Sydney", offset: 600, latitude: -33.8688, longitude: 151.2093, locale: "en-AU" },
    TimezoneEntry { name: "America/Sao_Paulo", offset: -180, latitude: -23.5505, longitude: -46.6333, locale: "pt-BR" },
];

/// `navigator.languages` for a primary locale.
pub fn languages_for_locale(locale: &str) -> Vec<String> {
    let base = locale.split('-').next().unwrap_or(locale);
    let mut languages = vec![locale.to_string()];
    if base != locale {
        languages.push(base.to_string());
    }
    if base != "en" {
        languages.push("en-US".to_string());
        languages.push("en".to_string());
    }
    languages
}

/// Accept-Language header with decreasing quality values.
pub fn accept_language(languages: &[String]) -> String {
    languages
        .iter()
        .enumerate()
        .map(|(i, lang)| {
            if i == 0 {
                lang.clone()
            } else {
                format!("{};q={:.1}", lang, (10 - i.min(9)) as f64 / 10.0)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// A known-good GPU pairing for `os`, used when a profile's GPU must be replaced.
pub fn fallback_gpu(os: OsType) -> (&'static str, &'static str) {
    match os {
        OsType::Windows => (
            "Google Inc. (Intel)",
            "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)",
        ),
        OsType::Macos => (
            "Google Inc. (Apple)",
            "ANGLE (Apple, ANGLE Metal Renderer: Apple M1, Unspecified Version)",
        ),
        OsType::Linux => (
            "Google Inc. (Intel)",
            "ANGLE (Intel, Mesa Intel(R) UHD Graphics 620 (KBL GT2), OpenGL 4.6)",
        ),
    }
}

/// Masked WebGL vendor and renderer a browser reports.
pub fn masked_webgl(browser: BrowserType) -> (&'static str, &'static str) {
    match browser {
        BrowserType::Firefox => ("Mozilla", "Mozilla"),
        _ => ("WebKit", "WebKit WebGL"),
    }
}

/// WebGL version and shading language strings a browser reports.
pub fn webgl_versions(browser: BrowserType) -> (&'static str, &'static str) {
    match browser {
        BrowserType::Chrome | BrowserType::Edge => (
            "WebGL 1.0 (OpenGL ES 2.0 Chromium)",
            "WebGL GLSL ES 1.0 (OpenGL ES GLSL ES 1.0 Chromium)",
        ),
        BrowserType::Firefox => ("WebGL 1.0", "WebGL GLSL ES 1.0"),
        BrowserType::Safari => (
            "WebGL 1.0 (OpenGL ES 2.0 Metal - 89.3)",
            "WebGL GLSL ES 1.0 (1.0)",
        ),
    }
}

/// A font list guaranteed to look native on `os`.
pub fn default_fonts(os: OsType) -> Vec<String> {
    let mut fonts: Vec<String> = UNIVERSAL_FONTS
        .iter()
        .chain(traits(os).typical_fonts.iter().take(6))
        .map(|s| s.to_string())
        .collect();
    fonts.sort();
    fonts
}

/// Extensions a desktop Chromium exposes through `getSupportedExtensions`.
pub fn default_webgl_extensions() -> Vec<String> {
    [
        "ANGLE_instanced_arrays",
        "EXT_blend_minmax",
        "EXT_color_buffer_half_float",
        "EXT_float_blend",
        "EXT_frag_depth",
        "EXT_shader_texture_lod",
        "EXT_texture_filter_anisotropic",
        "EXT_sRGB",
        "OES_element_index_uint",
        "OES_standard_derivatives",
        "OES_texture_float",
        "OES_texture_float_linear",
        "OES_texture_half_float",
        "OES_vertex_array_object",
        "WEBGL_color_buffer_float",
        "WEBGL_compressed_texture_s3tc",
        "WEBGL_debug_renderer_info",
        "WEBGL_debug_shaders",
        "WEBGL_depth_texture",
        "WEBGL_draw_buffers",
        "WEBGL_lose_context",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// The five PDF viewer plugins modern browsers expose.
pub fn pdf_plugins() -> Vec<PluginEntry> {
    [
        "PDF Viewer",
        "Chrome PDF Viewer",
        "Chromium PDF Viewer",
        "Microsoft Edge PDF Viewer",
        "WebKit built-in PDF",
    ]
    .iter()
    .map(|name| PluginEntry {
        name: name.to_string(),
        description: "Portable Document Format".to_string(),
        filename: "internal-pdf-viewer".to_string(),
        mime_types: vec![
            MimeTypeEntry {
                r#type: "application/pdf".to_string(),
                suffixes: "pdf".to_string(),
                description: "Portable Document Format".to_string(),
            },
            MimeTypeEntry {
                r#type: "text/pdf".to_string(),
                suffixes: "pdf".to_string(),
                description: "Portable Document Format".to_string(),
            },
        ],
    })
    .collect()
}

/// Speech synthesis voices shipped with the OS.
pub fn speech_voices(os: OsType) -> Vec<SpeechVoice> {
    let voices: &[(&str, &str)] = match os {
        OsType::Windows => &[
            ("Microsoft David - English (United States)", "en-US"),
            ("Microsoft Mark - English (United States)", "en-US"),
            ("Microsoft Zira - English (United States)", "en-US"),
        ],
        OsType::Macos => &[
            ("Samantha", "en-US"),
            ("Alex", "en-US"),
            ("Daniel", "en-GB"),
        ],
        OsType::Linux => &[("English (America)", "en-US")],
    };
    voices
        .iter()
        .enumerate()
        .map(|(i, (name, lang))| SpeechVoice {
            name: name.to_string(),
            lang: lang.to_string(),
            local_service: true,
            is_default: i == 0,
        })
        .collect()
}
