//! Smaller spoofed surfaces.
//!
//! Each module here owns one profile group. Surfaces that browsers expose
//! only on `window` stay window-only; timing, permissions, connection and
//! storage also run inside workers so both realms agree.

use serde_json::{json, Value};

use super::js::{js_literal, js_number, js_string};
use super::{ScriptContext, ScriptInput, ScriptResult, SpoofModule};
use crate::noise::{seeded_hash, unit_interval};
use crate::profile::{
    BlockableMode, BrowserType, FingerprintProfile, NoiseMode, OverrideMode, PermissionState,
    PluginMode,
};

/// Every surface module, in injection order.
pub fn modules() -> Vec<Box<dyn SpoofModule>> {
    vec![
        Box::new(ScreenSpoof),
        Box::new(TimezoneSpoof),
        Box::new(FontsSpoof),
        Box::new(PluginsSpoof),
        Box::new(GeolocationSpoof),
        Box::new(BatterySpoof),
        Box::new(MediaDevicesSpoof),
        Box::new(ClientRectsSpoof),
        Box::new(SpeechSpoof),
        Box::new(SensorsSpoof),
        Box::new(PermissionsSpoof),
        Box::new(ConnectionSpoof),
        Box::new(StorageSpoof),
        Box::new(PerformanceSpoof),
        Box::new(HistorySpoof),
        Box::new(HardwareApisSpoof),
    ]
}

/// `camo.defineGetter` lines for every `(prop, value)` pair on `target`.
fn getters(target: &str, values: &[(&str, Value)]) -> ScriptResult {
    let mut out = String::new();
    for (prop, value) in values {
        out.push_str(&format!(
            "camo.defineGetter({}, {}, {});\n",
            target,
            js_string(prop),
            js_literal(value)?
        ));
    }
    Ok(out)
}

const NAV_PROTO: &str = "const navProto = (typeof Navigator !== 'undefined') ? Navigator.prototype\n    : (typeof WorkerNavigator !== 'undefined' ? WorkerNavigator.prototype : null);\n";

/// Screen dimensions and `devicePixelRatio`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScreenSpoof;

impl ScreenSpoof {
    pub fn values(profile: &FingerprintProfile) -> Vec<(&'static str, Value)> {
        let screen = &profile.hardware.screen;
        vec![
            ("width", json!(screen.width)),
            ("height", json!(screen.height)),
            ("availWidth", json!(screen.avail_width)),
            ("availHeight", json!(screen.avail_height)),
            ("availLeft", json!(0)),
            ("availTop", json!(0)),
            ("colorDepth", json!(screen.color_depth)),
            ("pixelDepth", json!(screen.pixel_depth)),
        ]
    }
}

impl SpoofModule for ScreenSpoof {
    fn name(&self) -> &'static str {
        "screen"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let hw = &input.profile.hardware;
        let mut out = String::from("const screenProto = typeof Screen !== 'undefined' ? Screen.prototype : null;\n");
        out.push_str(&getters("screenProto", &Self::values(input.profile))?);
        out.push_str(&getters(
            "window",
            &[
                ("devicePixelRatio", json!(hw.device_pixel_ratio)),
                ("outerWidth", json!(hw.screen.avail_width)),
                ("outerHeight", json!(hw.screen.avail_height)),
            ],
        )?);
        Ok(out)
    }
}

/// `Date.prototype.getTimezoneOffset` value for the profile's fixed offset.
///
/// The profile stores minutes east of UTC; the DOM reports minutes west.
pub fn timezone_offset_minutes(offset_east: i32) -> i32 {
    -offset_east
}

/// Time zone name and offset.
///
/// With an IANA name the page-side offset is computed per date through
/// `Intl`, so daylight saving transitions stay correct; the profile's fixed
/// offset is the fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimezoneSpoof;

impl SpoofModule for TimezoneSpoof {
    fn name(&self) -> &'static str {
        "timezone"
    }

    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::ALL
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let tz = &input.profile.timezone;
        if tz.mode == OverrideMode::Real {
            return Ok(String::new());
        }
        Ok(format!(
            "const TZ_NAME = {};\nconst TZ_FALLBACK = {};\n{}",
            js_string(&tz.name),
            timezone_offset_minutes(tz.offset),
            TIMEZONE_JS
        ))
    }
}

const TIMEZONE_JS: &str = r#"
const NativeDateTimeFormat = Intl.DateTimeFormat;
let zoneFormat = null;
try {
    zoneFormat = new NativeDateTimeFormat('en-US', {
        timeZone: TZ_NAME, hourCycle: 'h23',
        year: 'numeric', month: 'numeric', day: 'numeric', hour: 'numeric', minute: 'numeric', second: 'numeric'
    });
} catch (e) {}
const offsetFor = function(date) {
    const time = date.getTime();
    if (!zoneFormat || isNaN(time)) return TZ_FALLBACK;
    const parts = {};
    zoneFormat.formatToParts(date).forEach(function(p) { parts[p.type] = p.value; });
    const asUtc = Date.UTC(+parts.year, +parts.month - 1, +parts.day, +parts.hour, +parts.minute, +parts.second);
    return Math.round((Math.floor(time / 1000) * 1000 - asUtc) / 60000);
};
camo.patchMethod(Date.prototype, 'getTimezoneOffset', function() {
    return offsetFor(this);
});
const DateTimeFormat = camo.proxyConstructor(NativeDateTimeFormat, {
    construct: function(target, args, newTarget) {
        const options = Object.assign({}, args[1] || {});
        if (options.timeZone === undefined) options.timeZone = TZ_NAME;
        return Reflect.construct(target, [args[0], options], newTarget);
    },
    apply: function(target, thisArg, args) {
        const options = Object.assign({}, args[1] || {});
        if (options.timeZone === undefined) options.timeZone = TZ_NAME;
        return Reflect.apply(target, thisArg, [args[0], options]);
    }
});
Object.defineProperty(Intl, 'DateTimeFormat', { value: DateTimeFormat, writable: true, enumerable: false, configurable: true });
camo.patchMethod(NativeDateTimeFormat.prototype, 'resolvedOptions', function(original, args) {
    const options = Reflect.apply(original, this, args);
    if (!options.timeZone || options.timeZone === 'UTC' && TZ_NAME !== 'UTC') options.timeZone = TZ_NAME;
    return options;
});
"#;

const GENERIC_FAMILIES: [&str; 10] = [
    "serif",
    "sans-serif",
    "monospace",
    "cursive",
    "fantasy",
    "system-ui",
    "ui-serif",
    "ui-sans-serif",
    "ui-monospace",
    "math",
];

/// Whether `document.fonts.check(font)` reports `font` as available.
///
/// `font` is a CSS font shorthand (`"12px Arial, sans-serif"`); the query
/// succeeds when any listed family is installed or generic.
pub fn font_available(installed: &[String], font: &str) -> bool {
    let families = match font.find(|c: char| c.is_ascii_digit()) {
        Some(start) => match font[start..].find(' ') {
            Some(space) => &font[start + space + 1..],
            None => return false,
        },
        None => font,
    };
    families
        .split(',')
        .map(|f| f.trim().trim_matches(|c| c == '"' || c == '\'').to_lowercase())
        .filter(|f| !f.is_empty())
        .any(|family| {
            GENERIC_FAMILIES.contains(&family.as_str())
                || installed.iter().any(|i| i.to_lowercase() == family)
        })
}

/// Installed font list as seen through `document.fonts.check`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FontsSpoof;

impl SpoofModule for FontsSpoof {
    fn name(&self) -> &'static str {
        "fonts"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let fonts = &input.profile.fonts;
        if fonts.mode == OverrideMode::Real {
            return Ok(String::new());
        }
        let lowered: Vec<String> = fonts.list.iter().map(|f| f.to_lowercase()).collect();
        Ok(format!(
            "const FONTS = {};\nconst GENERIC = {};\n{}",
            js_literal(&lowered)?,
            js_literal(&GENERIC_FAMILIES)?,
            FONTS_JS
        ))
    }
}

const FONTS_JS: &str = r#"
const familiesOf = function(font) {
    const m = /\d[^\s]*\s+(?:\/\s*\S+\s+)?(.*)$/.exec(String(font));
    const list = m ? m[1] : String(font);
    return list.split(',').map(function(f) { return f.trim().replace(/^["']|["']$/g, '').toLowerCase(); })
        .filter(function(f) { return f.length > 0; });
};
if (typeof FontFaceSet !== 'undefined') {
    camo.patchMethod(FontFaceSet.prototype, 'check', function(original, args) {
        return familiesOf(args[0]).some(function(f) {
            return GENERIC.indexOf(f) !== -1 || FONTS.indexOf(f) !== -1;
        });
    });
}
"#;

/// `navigator.plugins` and `navigator.mimeTypes`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginsSpoof;

impl SpoofModule for PluginsSpoof {
    fn name(&self) -> &'static str {
        "plugins"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let plugins = &input.profile.plugins;
        let list = match plugins.mode {
            PluginMode::Real => return Ok(String::new()),
            PluginMode::Empty => Vec::new(),
            PluginMode::Custom => plugins.list.clone(),
        };
        Ok(format!("const pluginData = {};\n{}", js_literal(&list)?, PLUGINS_JS))
    }
}

const PLUGINS_JS: &str = r#"
const makeArray = function(proto, items, key) {
    const array = Object.create(proto);
    items.forEach(function(item, i) {
        Object.defineProperty(array, i, { value: item, enumerable: true });
    });
    items.forEach(function(item) {
        if (!(item[key] in array)) Object.defineProperty(array, item[key], { value: item, enumerable: false });
    });
    return { array: array, items: items };
};
const mimeTypes = [];
const plugins = pluginData.map(function(p) {
    const plugin = Object.create(Plugin.prototype);
    const types = p.mimeTypes.map(function(m) {
        const mime = Object.create(MimeType.prototype);
        camo.defineGetter(mime, 'type', m.type);
        camo.defineGetter(mime, 'suffixes', m.suffixes);
        camo.defineGetter(mime, 'description', m.description);
        camo.defineGetter(mime, 'enabledPlugin', plugin);
        mimeTypes.push(mime);
        return mime;
    });
    camo.defineGetter(plugin, 'name', p.name);
    camo.defineGetter(plugin, 'description', p.description);
    camo.defineGetter(plugin, 'filename', p.filename);
    camo.defineGetter(plugin, 'length', types.length);
    types.forEach(function(mime, i) { Object.defineProperty(plugin, i, { value: mime, enumerable: true }); });
    return plugin;
});
const pluginArray = makeArray(PluginArray.prototype, plugins, 'name').array;
const mimeArray = makeArray(MimeTypeArray.prototype, mimeTypes, 'type').array;
[[PluginArray.prototype, plugins, 'name'], [MimeTypeArray.prototype, mimeTypes, 'type']].forEach(function(entry) {
    const proto = entry[0], items = entry[1], key = entry[2];
    camo.defineGetter(proto, 'length', function() { return items.length; }, { enumerable: true });
    camo.patchMethod(proto, 'item', function(original, args) { return items[args[0] >>> 0] || null; });
    camo.patchMethod(proto, 'namedItem', function(original, args) {
        return items.find(function(item) { return item[key] === args[0]; }) || null;
    });
});
camo.patchMethod(PluginArray.prototype, 'refresh', function() {});
camo.defineGetter(Navigator.prototype, 'plugins', pluginArray);
camo.defineGetter(Navigator.prototype, 'mimeTypes', mimeArray);
"#;

/// `navigator.geolocation`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeolocationSpoof;

impl SpoofModule for GeolocationSpoof {
    fn name(&self) -> &'static str {
        "geolocation"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let geo = &input.profile.geolocation;
        let position = match geo.mode {
            BlockableMode::Real => return Ok(String::new()),
            BlockableMode::Block => Value::Null,
            BlockableMode::Custom => json!({
                "latitude": geo.latitude,
                "longitude": geo.longitude,
                "accuracy": geo.accuracy,
            }),
        };
        Ok(format!("const POSITION = {};\n{}", js_literal(&position)?, GEOLOCATION_JS))
    }
}

const GEOLOCATION_JS: &str = r#"
if (typeof Geolocation !== 'undefined') {
    let watchId = 0;
    const deliver = function(success, failure) {
        setTimeout(function() {
            if (POSITION === null) {
                if (typeof failure === 'function') {
                    failure({ code: 1, message: 'User denied Geolocation', PERMISSION_DENIED: 1, POSITION_UNAVAILABLE: 2, TIMEOUT: 3 });
                }
                return;
            }
            const coords = {
                latitude: POSITION.latitude, longitude: POSITION.longitude, accuracy: POSITION.accuracy,
                altitude: null, altitudeAccuracy: null, heading: null, speed: null
            };
            if (typeof success === 'function') success({ coords: coords, timestamp: Date.now() });
        }, 0);
    };
    camo.patchMethod(Geolocation.prototype, 'getCurrentPosition', function(original, args) {
        deliver(args[0], args[1]);
    });
    camo.patchMethod(Geolocation.prototype, 'watchPosition', function(original, args) {
        deliver(args[0], args[1]);
        return ++watchId;
    });
    camo.patchMethod(Geolocation.prototype, 'clearWatch', function() {});
}
"#;

fn js_optional_time(value: Option<f64>) -> String {
    js_number(value.unwrap_or(f64::INFINITY))
}

/// Battery Status API.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatterySpoof;

impl SpoofModule for BatterySpoof {
    fn name(&self) -> &'static str {
        "battery"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let battery = &input.profile.battery;
        match battery.mode {
            BlockableMode::Real => Ok(String::new()),
            BlockableMode::Block => Ok(
                "if (typeof Navigator !== 'undefined') { try { delete Navigator.prototype.getBattery; } catch (e) {} }\n"
                    .to_string(),
            ),
            BlockableMode::Custom => Ok(format!(
                "const BATTERY = {{ charging: {}, level: {}, chargingTime: {}, dischargingTime: {} }};\n{}",
                battery.charging,
                js_number(battery.level),
                js_optional_time(battery.charging_time),
                js_optional_time(battery.discharging_time),
                BATTERY_JS
            )),
        }
    }
}

const BATTERY_JS: &str = r#"
if (typeof Navigator !== 'undefined' && typeof BatteryManager !== 'undefined' && Navigator.prototype.getBattery) {
    const manager = Object.create(BatteryManager.prototype);
    Object.keys(BATTERY).forEach(function(key) { camo.defineGetter(manager, key, BATTERY[key]); });
    camo.patchMethod(Navigator.prototype, 'getBattery', function() {
        return Promise.resolve(manager);
    });
}
"#;

/// `navigator.mediaDevices.enumerateDevices`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaDevicesSpoof;

impl SpoofModule for MediaDevicesSpoof {
    fn name(&self) -> &'static str {
        "media_devices"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let media = &input.profile.media_devices;
        let counts = match media.mode {
            BlockableMode::Real => return Ok(String::new()),
            BlockableMode::Block => [0, 0, 0],
            BlockableMode::Custom => [media.audio_inputs, media.audio_outputs, media.video_inputs],
        };
        Ok(format!(
            "const DEVICE_COUNTS = {{ audioinput: {}, audiooutput: {}, videoinput: {} }};\n{}",
            counts[0], counts[1], counts[2], MEDIA_DEVICES_JS
        ))
    }
}

// Before a permission grant browsers report empty labels and device ids.
const MEDIA_DEVICES_JS: &str = r#"
if (typeof MediaDevices !== 'undefined') {
    const devices = [];
    ['audioinput', 'videoinput', 'audiooutput'].forEach(function(kind) {
        for (let i = 0; i < DEVICE_COUNTS[kind]; i++) {
            const proto = kind === 'audioinput' && typeof InputDeviceInfo !== 'undefined' ? InputDeviceInfo.prototype
                : kind === 'videoinput' && typeof InputDeviceInfo !== 'undefined' ? InputDeviceInfo.prototype
                : MediaDeviceInfo.prototype;
            const device = Object.create(proto);
            camo.defineGetter(device, 'deviceId', '');
            camo.defineGetter(device, 'kind', kind);
            camo.defineGetter(device, 'label', '');
            camo.defineGetter(device, 'groupId', '');
            devices.push(device);
        }
    });
    camo.patchMethod(MediaDevices.prototype, 'enumerateDevices', function() {
        return Promise.resolve(devices.slice());
    });
}
"#;

/// Deterministic client-rect offset for an element of the given size.
///
/// Keyed on the rounded size so that repeated reads of one element agree.
pub fn client_rect_delta(seed: u32, width: f64, height: f64, amount: f64) -> f64 {
    let w = (width.abs() * 100.0).round() as u32;
    let h = (height.abs() * 100.0).round() as u32;
    let index = w.wrapping_mul(31) ^ h;
    (2.0 * unit_interval(seeded_hash(seed ^ CLIENT_RECT_STREAM, index)) - 1.0) * amount
}

const CLIENT_RECT_STREAM: u32 = 0x7f4a_7c15;

/// `getBoundingClientRect` and `getClientRects` noise.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientRectsSpoof;

impl SpoofModule for ClientRectsSpoof {
    fn name(&self) -> &'static str {
        "client_rects"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let rects = &input.profile.client_rects;
        let seed = match (rects.mode, input.noise_seed) {
            (NoiseMode::Noise, Some(seed)) if rects.noise > 0.0 => seed,
            _ => return Ok(String::new()),
        };
        Ok(format!(
            "const RECT_SEED = {} >>> 0;\nconst RECT_NOISE = {};\n{}",
            seed ^ CLIENT_RECT_STREAM,
            js_number(rects.noise),
            CLIENT_RECTS_JS
        ))
    }
}

const CLIENT_RECTS_JS: &str = r#"
const rectHash = function(i) {
    let h = (RECT_SEED ^ i) >>> 0;
    h = Math.imul(h ^ (h >>> 16), 0x45d9f3b) >>> 0;
    h = Math.imul(h ^ (h >>> 13), 0x45d9f3b) >>> 0;
    return (h ^ (h >>> 16)) >>> 0;
};
const rectDelta = function(width, height) {
    const w = Math.round(Math.abs(width) * 100) >>> 0;
    const h = Math.round(Math.abs(height) * 100) >>> 0;
    const index = (Math.imul(w, 31) ^ h) >>> 0;
    return (2 * ((rectHash(index) + 1) / 4294967297) - 1) * RECT_NOISE;
};
const shift = function(rect) {
    if (!rect || (rect.width === 0 && rect.height === 0)) return rect;
    const d = rectDelta(rect.width, rect.height);
    return new DOMRect(rect.x + d, rect.y + d, rect.width + d, rect.height + d);
};
[typeof Element !== 'undefined' ? Element.prototype : null, typeof Range !== 'undefined' ? Range.prototype : null]
.forEach(function(proto) {
    camo.patchMethod(proto, 'getBoundingClientRect', function(original, args) {
        return shift(Reflect.apply(original, this, args));
    });
    camo.patchMethod(proto, 'getClientRects', function(original, args) {
        const list = Reflect.apply(original, this, args);
        const shifted = Array.prototype.map.call(list, shift);
        const result = Object.create(Object.getPrototypeOf(list));
        shifted.forEach(function(rect, i) { Object.defineProperty(result, i, { value: rect, enumerable: true }); });
        Object.defineProperty(result, 'length', { value: shifted.length });
        result.item = function(i) { return shifted[i] || null; };
        result[Symbol.iterator] = function() { return shifted[Symbol.iterator](); };
        return result;
    });
});
"#;

/// `speechSynthesis.getVoices`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeechSpoof;

impl SpoofModule for SpeechSpoof {
    fn name(&self) -> &'static str {
        "speech"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let speech = &input.profile.speech;
        let voices: Vec<Value> = match speech.mode {
            BlockableMode::Real => return Ok(String::new()),
            BlockableMode::Block => Vec::new(),
            BlockableMode::Custom => speech
                .voices
                .iter()
                .map(|v| {
                    json!({
                        "voiceURI": v.name,
                        "name": v.name,
                        "lang": v.lang,
                        "localService": v.local_service,
                        "default": v.is_default,
                    })
                })
                .collect(),
        };
        Ok(format!("const VOICES = {};\n{}", js_literal(&voices)?, SPEECH_JS))
    }
}

const SPEECH_JS: &str = r#"
if (typeof SpeechSynthesis !== 'undefined') {
    const voiceProto = typeof SpeechSynthesisVoice !== 'undefined' ? SpeechSynthesisVoice.prototype : Object.prototype;
    const voices = VOICES.map(function(v) {
        const voice = Object.create(voiceProto);
        Object.keys(v).forEach(function(key) { camo.defineGetter(voice, key, v[key]); });
        return voice;
    });
    camo.patchMethod(SpeechSynthesis.prototype, 'getVoices', function() {
        return voices.slice();
    });
}
"#;

/// Generic Sensor API and device motion events.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorsSpoof;

impl SensorsSpoof {
    /// Globals removed for the profile.
    pub fn removed(profile: &FingerprintProfile) -> Vec<&'static str> {
        let sensors = &profile.sensors;
        match sensors.mode {
            BlockableMode::Real => Vec::new(),
            BlockableMode::Block => vec![
                "Accelerometer",
                "LinearAccelerationSensor",
                "GravitySensor",
                "Gyroscope",
                "Magnetometer",
                "AbsoluteOrientationSensor",
                "RelativeOrientationSensor",
                "DeviceMotionEvent",
                "DeviceOrientationEvent",
            ],
            BlockableMode::Custom => {
                let mut removed = Vec::new();
                if !sensors.accelerometer {
                    removed.extend(["Accelerometer", "LinearAccelerationSensor", "GravitySensor"]);
                }
                if !sensors.gyroscope {
                    removed.push("Gyroscope");
                }
                if !sensors.magnetometer {
                    removed.push("Magnetometer");
                }
                removed
            }
        }
    }
}

impl SpoofModule for SensorsSpoof {
    fn name(&self) -> &'static str {
        "sensors"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let removed = Self::removed(input.profile);
        if removed.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(
            "{}.forEach(function(name) {{ try {{ delete window[name]; }} catch (e) {{}} }});\n",
            js_literal(&removed)?
        ))
    }
}

/// `navigator.permissions.query` and `Notification.permission`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionsSpoof;

impl PermissionsSpoof {
    /// Answer for a permission query, or `None` to ask the browser.
    pub fn state(profile: &FingerprintProfile, name: &str) -> Option<PermissionState> {
        let apis = &profile.advanced_apis;
        if apis.permissions.mode == OverrideMode::Real {
            return None;
        }
        if let Some(state) = apis.permissions.overrides.get(name) {
            return Some(*state);
        }
        (name == "notifications").then(|| match apis.notification {
            crate::profile::NotificationPermission::Default => PermissionState::Prompt,
            crate::profile::NotificationPermission::Granted => PermissionState::Granted,
            crate::profile::NotificationPermission::Denied => PermissionState::Denied,
        })
    }
}

impl SpoofModule for PermissionsSpoof {
    fn name(&self) -> &'static str {
        "permissions"
    }

    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::ALL
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let apis = &input.profile.advanced_apis;
        if apis.permissions.mode == OverrideMode::Real {
            return Ok(String::new());
        }
        let mut states = apis.permissions.overrides.clone();
        if let Some(state) = Self::state(input.profile, "notifications") {
            states.insert("notifications".to_string(), state);
        }
        Ok(format!(
            "const PERMISSIONS = {};\nconst NOTIFICATION = {};\n{}",
            js_literal(&states)?,
            js_string(apis.notification.as_str()),
            PERMISSIONS_JS
        ))
    }
}

const PERMISSIONS_JS: &str = r#"
if (typeof Permissions !== 'undefined') {
    camo.patchMethod(Permissions.prototype, 'query', function(original, args) {
        const descriptor = args[0];
        const name = descriptor && descriptor.name;
        if (!Object.prototype.hasOwnProperty.call(PERMISSIONS, name)) return Reflect.apply(original, this, args);
        return Reflect.apply(original, this, args).then(function(status) {
            camo.defineGetter(status, 'state', PERMISSIONS[name]);
            return status;
        }, function() {
            const status = Object.create(typeof PermissionStatus !== 'undefined' ? PermissionStatus.prototype : Object.prototype);
            camo.defineGetter(status, 'state', PERMISSIONS[name]);
            camo.defineGetter(status, 'name', name);
            return status;
        });
    });
}
if (typeof Notification !== 'undefined') {
    camo.defineGetter(Notification, 'permission', NOTIFICATION);
}
"#;

/// `navigator.connection` (Network Information API).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionSpoof;

impl SpoofModule for ConnectionSpoof {
    fn name(&self) -> &'static str {
        "connection"
    }

    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::ALL
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let profile = input.profile;
        let mut out = String::from(NAV_PROTO);
        if !matches!(profile.browser.r#type, BrowserType::Chrome | BrowserType::Edge) {
            out.push_str("try { delete navProto.connection; } catch (e) {}\n");
            return Ok(out);
        }
        let conn = &profile.advanced_apis.connection;
        out.push_str(
            "const netProto = typeof NetworkInformation !== 'undefined' ? NetworkInformation.prototype : null;\n",
        );
        out.push_str(&getters(
            "netProto",
            &[
                ("effectiveType", json!(conn.effective_type.as_str())),
                ("downlink", json!(conn.downlink)),
                ("rtt", json!(conn.rtt)),
                ("saveData", json!(conn.save_data)),
            ],
        )?);
        Ok(out)
    }
}

/// `navigator.storage.estimate` quota.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageSpoof;

impl SpoofModule for StorageSpoof {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::ALL
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        Ok(format!(
            "const QUOTA = {};\n{}",
            input.profile.advanced_apis.storage_quota, STORAGE_JS
        ))
    }
}

const STORAGE_JS: &str = r#"
if (typeof StorageManager !== 'undefined') {
    camo.patchMethod(StorageManager.prototype, 'estimate', function(original, args) {
        return Reflect.apply(original, this, args).then(function(estimate) {
            const result = Object.assign({}, estimate);
            result.quota = QUOTA;
            if (result.usage > QUOTA) result.usage = 0;
            return result;
        });
    });
}
"#;

/// `performance.now` resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceSpoof;

impl PerformanceSpoof {
    /// `performance.now()` as reported for a raw timestamp.
    pub fn quantize(now_ms: f64, precision_ms: f64) -> f64 {
        if precision_ms <= 0.0 {
            return now_ms;
        }
        (now_ms / precision_ms).floor() * precision_ms
    }
}

impl SpoofModule for PerformanceSpoof {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::ALL
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let precision = input.profile.advanced_apis.performance.timer_precision_ms;
        if precision <= 0.0 {
            return Ok(String::new());
        }
        Ok(format!(
            "const PRECISION_MS = {};\nif (typeof Performance !== 'undefined') {{\n    camo.patchMethod(Performance.prototype, 'now', function(original, args) {{\n        const t = Reflect.apply(original, this, args);\n        return Math.floor(t / PRECISION_MS) * PRECISION_MS;\n    }});\n}}\n",
            js_number(precision)
        ))
    }
}

/// `history.length`, never lower than the configured value.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistorySpoof;

impl SpoofModule for HistorySpoof {
    fn name(&self) -> &'static str {
        "history"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        Ok(format!(
            "const HISTORY_LENGTH = {};\nif (typeof History !== 'undefined') {{\n    const lengthDesc = Object.getOwnPropertyDescriptor(History.prototype, 'length');\n    if (lengthDesc && lengthDesc.get) {{\n        camo.defineGetter(History.prototype, 'length', function() {{\n            return Math.max(Reflect.apply(lengthDesc.get, this, []), HISTORY_LENGTH);\n        }});\n    }}\n}}\n",
            input.profile.advanced_apis.history_length
        ))
    }
}

/// Availability toggles for hardware and platform APIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareApisSpoof;

impl HardwareApisSpoof {
    /// `(holder, property)` pairs deleted for the profile.
    pub fn removed(profile: &FingerprintProfile) -> Vec<(&'static str, &'static str)> {
        let apis = &profile.advanced_apis;
        let toggles = [
            (apis.bluetooth, "navigator", "bluetooth"),
            (apis.usb, "navigator", "usb"),
            (apis.gamepad, "navigator", "getGamepads"),
            (apis.clipboard, "navigator", "clipboard"),
            (apis.service_worker, "navigator", "serviceWorker"),
            (apis.credentials, "navigator", "credentials"),
            (apis.presentation, "navigator", "presentation"),
            (apis.payment, "window", "PaymentRequest"),
            (apis.wasm, "window", "WebAssembly"),
            (apis.shared_array_buffer, "window", "SharedArrayBuffer"),
        ];
        toggles
            .iter()
            .filter(|(enabled, ..)| !enabled)
            .map(|(_, holder, prop)| (*holder, *prop))
            .collect()
    }
}

impl SpoofModule for HardwareApisSpoof {
    fn name(&self) -> &'static str {
        "hardware_apis"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let mut out = String::from(NAV_PROTO);
        for (holder, prop) in Self::removed(input.profile) {
            let target = if holder == "navigator" { "navProto" } else { "window" };
            out.push_str(&format!(
                "try {{ delete {0}[{1}]; }} catch (e) {{}}\n",
                target,
                js_string(prop)
            ));
        }
        out.push_str(&getters(
            "navProto",
            &[("globalPrivacyControl", json!(input.profile.privacy.global_privacy_control))],
        )?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn render(module: &dyn SpoofModule, profile: &FingerprintProfile) -> String {
        module
            .script(&ScriptInput::new(profile, Some(11), ScriptContext::Page))
            .unwrap()
    }

    #[test]
    fn test_surface_names_unique() {
        let names: Vec<_> = modules().iter().map(|m| m.name()).collect();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.contains(&"screen"));
    }

    #[test]
    fn test_screen_values() {
        let mut profile = FingerprintProfile::default();
        profile.hardware.screen.width = 2560;
        profile.hardware.device_pixel_ratio = 1.25;
        let values = ScreenSpoof::values(&profile);
        assert!(values.contains(&("width", json!(2560))));
        let js = render(&ScreenSpoof, &profile);
        assert!(js.contains("\"devicePixelRatio\", 1.25"));
        assert!(!ScreenSpoof.applies_to(ScriptContext::Worker));
    }

    #[test]
    fn test_timezone_offset_sign() {
        assert_eq!(timezone_offset_minutes(-300), 300);
        assert_eq!(timezone_offset_minutes(60), -60);
        let profile = FingerprintProfile::default();
        let js = render(&TimezoneSpoof, &profile);
        assert!(js.contains("const TZ_NAME = \"America/New_York\";"));
        assert!(js.contains("const TZ_FALLBACK = 300;"));
    }

    #[test]
    fn test_font_available() {
        let installed = vec!["Arial".to_string(), "Segoe UI".to_string()];
        assert!(font_available(&installed, "12px Arial"));
        assert!(font_available(&installed, "bold 16px \"Segoe UI\", Missing"));
        assert!(font_available(&installed, "12px serif"));
        assert!(!font_available(&installed, "12px Helvetica Neue"));
        assert!(!font_available(&installed, "12px"));
    }

    #[test]
    fn test_plugins_modes() {
        let mut profile = FingerprintProfile::default();
        assert!(render(&PluginsSpoof, &profile).contains("PDF Viewer"));
        profile.plugins.mode = PluginMode::Empty;
        assert!(render(&PluginsSpoof, &profile).starts_with("const pluginData = [];"));
        profile.plugins.mode = PluginMode::Real;
        assert!(render(&PluginsSpoof, &profile).is_empty());
    }

    #[test]
    fn test_battery_infinity() {
        let profile = FingerprintProfile::default();
        let js = render(&BatterySpoof, &profile);
        assert!(js.contains("dischargingTime: Infinity"));
        assert!(js.contains("chargingTime: 0"));
    }

    #[test]
    fn test_client_rect_delta() {
        let a = client_rect_delta(7, 120.5, 30.0, 0.1);
        assert_eq!(a, client_rect_delta(7, 120.5, 30.0, 0.1));
        assert!(a.abs() <= 0.1);
        assert_ne!(a, client_rect_delta(8, 120.5, 30.0, 0.1));

        let mut profile = FingerprintProfile::default();
        assert!(render(&ClientRectsSpoof, &profile).contains("getBoundingClientRect"));
        profile.client_rects.mode = NoiseMode::Real;
        assert!(render(&ClientRectsSpoof, &profile).is_empty());
    }

    #[test]
    fn test_sensors_removed() {
        let mut profile = FingerprintProfile::default();
        assert!(SensorsSpoof::removed(&profile).contains(&"DeviceMotionEvent"));
        profile.sensors.mode = BlockableMode::Custom;
        profile.sensors.gyroscope = true;
        let removed = SensorsSpoof::removed(&profile);
        assert!(removed.contains(&"Accelerometer"));
        assert!(!removed.contains(&"Gyroscope"));
    }

    #[test]
    fn test_permission_state() {
        let mut profile = FingerprintProfile::default();
        profile.advanced_apis.permissions.overrides.remove("notifications");
        profile.advanced_apis.notification = crate::profile::NotificationPermission::Denied;
        assert_eq!(
            PermissionsSpoof::state(&profile, "notifications"),
            Some(PermissionState::Denied)
        );
        assert_eq!(
            PermissionsSpoof::state(&profile, "camera"),
            Some(PermissionState::Prompt)
        );
        assert_eq!(PermissionsSpoof::state(&profile, "midi"), None);
    }

    #[test]
    fn test_connection_only_chromium() {
        let mut profile = FingerprintProfile::default();
        assert!(render(&ConnectionSpoof, &profile).contains("\"effectiveType\", \"4g\""));
        profile.browser.r#type = BrowserType::Firefox;
        assert!(render(&ConnectionSpoof, &profile).contains("delete navProto.connection"));
    }

    #[test]
    fn test_performance_quantize() {
        assert_eq!(PerformanceSpoof::quantize(12.3456, 0.1), (123.456f64).floor() * 0.1);
        assert_eq!(PerformanceSpoof::quantize(5.0, 0.0), 5.0);
    }

    #[test]
    fn test_hardware_toggles() {
        let mut profile = FingerprintProfile::default();
        assert!(HardwareApisSpoof::removed(&profile).contains(&("window", "SharedArrayBuffer")));
        profile.advanced_apis.bluetooth = false;
        let js = render(&HardwareApisSpoof, &profile);
        assert!(js.contains("delete navProto[\"bluetooth\"]"));
        assert!(js.contains("globalPrivacyControl"));
    }
}
