//! Navigator property overrides.
//!
//! Every value comes from the profile, including `webdriver`, which is a
//! tri-state: `false`, `true`, or absent (`undefined`, as in browsers that
//! predate the property).
//!
//! # Example
//!
//! ```rust
//! use ki_fingerprint::profile::FingerprintProfile;
//! use ki_fingerprint::stealth::{NavigatorSpoof, ObjectSurface};
//!
//! let profile = FingerprintProfile::default();
//! let mut navigator = ObjectSurface::new("Navigator");
//! NavigatorSpoof::apply(&mut navigator, &profile);
//! assert!(NavigatorSpoof::verify(&navigator, &profile).is_empty());
//! ```

use serde_json::{json, Value};

use super::camouflage::ObjectSurface;
use super::js::{js_literal, js_string};
use super::{ScriptContext, ScriptInput, ScriptResult, SpoofModule};
use crate::profile::{BrowserType, FingerprintProfile};

/// Properties `WorkerNavigator` exposes.
const WORKER_PROPERTIES: [&str; 11] = [
    "userAgent",
    "appVersion",
    "appName",
    "appCodeName",
    "platform",
    "product",
    "language",
    "languages",
    "hardwareConcurrency",
    "deviceMemory",
    "onLine",
];

/// Globals left behind by common automation drivers.
const AUTOMATION_GLOBALS: [&str; 14] = [
    "cdc_adoQpoasnfa76pfcZLmcfl_Array",
    "cdc_adoQpoasnfa76pfcZLmcfl_Promise",
    "cdc_adoQpoasnfa76pfcZLmcfl_Symbol",
    "_selenium",
    "callSelenium",
    "_Selenium_IDE_Recorder",
    "__webdriver_script_fn",
    "__driver_evaluate",
    "__webdriver_evaluate",
    "__selenium_evaluate",
    "__fxdriver_evaluate",
    "callPhantom",
    "_phantom",
    "domAutomationController",
];

/// Navigator spoof module.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavigatorSpoof;

impl NavigatorSpoof {
    /// Every overridden property with the value it must read as.
    ///
    /// `None` means the property is removed and reads as `undefined`.
    pub fn values(profile: &FingerprintProfile) -> Vec<(&'static str, Option<Value>)> {
        let nav = &profile.navigator;
        let hw = &profile.hardware;
        let chromium = matches!(profile.browser.r#type, BrowserType::Chrome | BrowserType::Edge);

        vec![
            ("userAgent", Some(json!(profile.user_agent))),
            ("appVersion", Some(json!(nav.app_version))),
            ("platform", Some(json!(profile.os.platform))),
            ("vendor", Some(json!(nav.vendor))),
            ("vendorSub", Some(json!(nav.vendor_sub))),
            ("product", Some(json!(nav.product))),
            ("productSub", Some(json!(nav.product_sub))),
            ("appName", Some(json!(nav.app_name))),
            ("appCodeName", Some(json!(nav.app_code_name))),
            ("language", Some(json!(nav.language))),
            ("languages", Some(json!(nav.languages))),
            ("hardwareConcurrency", Some(json!(hw.cpu_cores))),
            ("deviceMemory", chromium.then(|| json!(hw.device_memory))),
            ("maxTouchPoints", Some(json!(hw.max_touch_points))),
            ("webdriver", nav.webdriver.map(Value::Bool)),
            ("cookieEnabled", Some(json!(nav.cookie_enabled))),
            ("onLine", Some(json!(nav.on_line))),
            ("doNotTrack", Some(json!(profile.privacy.do_not_track))),
            ("pdfViewerEnabled", Some(json!(nav.pdf_viewer_enabled))),
        ]
    }

    /// Applies the overrides to a `Navigator.prototype` model.
    pub fn apply(surface: &mut ObjectSurface, profile: &FingerprintProfile) {
        for (prop, value) in Self::values(profile) {
            match value {
                Some(value) => surface.define_getter(prop, value),
                None => {
                    surface.remove(prop);
                }
            }
        }
    }

    /// Lists every property whose observed value differs from the profile.
    pub fn verify(surface: &ObjectSurface, profile: &FingerprintProfile) -> Vec<String> {
        Self::values(profile)
            .into_iter()
            .filter_map(|(prop, expected)| {
                let actual = surface.get(prop);
                (actual != expected).then(|| {
                    format!(
                        "navigator.{}: expected {}, got {}",
                        prop,
                        render(&expected),
                        render(&actual)
                    )
                })
            })
            .collect()
    }
}

fn render(value: &Option<Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "undefined".to_string(),
    }
}

impl SpoofModule for NavigatorSpoof {
    fn name(&self) -> &'static str {
        "navigator"
    }

    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::ALL
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let worker = input.context.is_worker();
        let mut out = String::from(
            "const navProto = (typeof Navigator !== 'undefined') ? Navigator.prototype\n    : (typeof WorkerNavigator !== 'undefined' ? WorkerNavigator.prototype : null);\n",
        );

        for (prop, value) in Self::values(input.profile) {
            if worker && !WORKER_PROPERTIES.contains(&prop) {
                continue;
            }
            match value {
                Some(Value::Array(items)) => {
                    out.push_str(&format!(
                        "camo.defineGetter(navProto, {}, Object.freeze({}));\n",
                        js_string(prop),
                        js_literal(&items)?
                    ));
                }
                Some(value) => {
                    out.push_str(&format!(
                        "camo.defineGetter(navProto, {}, {});\n",
                        js_string(prop),
                        js_literal(&value)?
                    ));
                }
                None => {
                    out.push_str(&format!(
                        "try {{ delete navProto[{0}]; delete navigator[{0}]; }} catch (e) {{}}\n",
                        js_string(prop)
                    ));
                }
            }
        }

        if !worker {
            out.push_str(&format!(
                "{}.forEach(function(key) {{ try {{ delete window[key]; }} catch (e) {{}} }});\n",
                js_literal(&AUTOMATION_GLOBALS)?
            ));
            out.push_str(
                "Object.keys(document).filter(function(key) { return /^\\$?cdc_/.test(key); }).forEach(function(key) { try { delete document[key]; } catch (e) {} });\n",
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_surface() {
        let mut profile = FingerprintProfile::default();
        profile.navigator.languages = vec!["de-DE".into(), "de".into()];
        profile.navigator.language = "de-DE".into();
        profile.hardware.cpu_cores = 12;
        profile.privacy.do_not_track = Some("1".into());

        let mut surface = ObjectSurface::new("Navigator");
        NavigatorSpoof::apply(&mut surface, &profile);
        assert!(NavigatorSpoof::verify(&surface, &profile).is_empty());
        assert_eq!(surface.get("hardwareConcurrency"), Some(json!(12)));
        assert_eq!(surface.get("languages"), Some(json!(["de-DE", "de"])));
        assert_eq!(surface.get("doNotTrack"), Some(json!("1")));
        assert_eq!(
            surface.getter("platform").unwrap().to_string(),
            "function get platform() { [native code] }"
        );
    }

    #[test]
    fn test_webdriver_tristate() {
        let mut profile = FingerprintProfile::default();
        let mut surface = ObjectSurface::new("Navigator");
        surface.define_getter("webdriver", json!(true));

        NavigatorSpoof::apply(&mut surface, &profile);
        assert_eq!(surface.get("webdriver"), Some(json!(false)));

        profile.navigator.webdriver = None;
        NavigatorSpoof::apply(&mut surface, &profile);
        assert_eq!(surface.get("webdriver"), None);
        assert!(!surface.has("webdriver"));
        assert!(NavigatorSpoof::verify(&surface, &profile).is_empty());
    }

    #[test]
    fn test_verify_reports_mismatch() {
        let profile = FingerprintProfile::default();
        let mut surface = ObjectSurface::new("Navigator");
        NavigatorSpoof::apply(&mut surface, &profile);
        surface.define_getter("platform", json!("MacIntel"));
        let mismatches = NavigatorSpoof::verify(&surface, &profile);
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].starts_with("navigator.platform"));
    }

    #[test]
    fn test_firefox_has_no_device_memory() {
        let mut profile = FingerprintProfile::default();
        profile.browser.r#type = BrowserType::Firefox;
        let values = NavigatorSpoof::values(&profile);
        let memory = values.iter().find(|(p, _)| *p == "deviceMemory").unwrap();
        assert!(memory.1.is_none());
    }

    #[test]
    fn test_script_contents() {
        let profile = FingerprintProfile::default();
        let page = NavigatorSpoof
            .script(&ScriptInput::new(&profile, None, ScriptContext::Page))
            .unwrap();
        assert!(page.contains("camo.defineGetter(navProto, \"webdriver\", false)"));
        assert!(page.contains("Object.freeze([\"en-US\",\"en\"])"));
        assert!(page.contains("cdc_"));

        let worker = NavigatorSpoof
            .script(&ScriptInput::new(&profile, None, ScriptContext::Worker))
            .unwrap();
        assert!(worker.contains("\"userAgent\""));
        assert!(!worker.contains("\"webdriver\""));
        assert!(!worker.contains("document"));
    }
}
