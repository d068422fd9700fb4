//! Stealth spoof modules.
//!
//! Each [`SpoofModule`] turns one slice of a [`FingerprintProfile`] into
//! JavaScript that patches the matching browser surface. Every generated
//! script runs after the [`camouflage::RUNTIME`] prelude, so patched
//! functions and getters stringify as native code.
//!
//! # Modules
//!
//! - `camouflage` - native-looking functions, Rust model and JS runtime
//! - `navigator` - navigator properties and automation signal removal
//! - `webgl` - WebGL parameters, extensions and read-back noise
//! - `webrtc` - SDP and ICE candidate rewriting
//! - `canvas` - seeded canvas and audio noise
//! - `surfaces` - screen, timezone, fonts, plugins and the remaining APIs
//!
//! # Example
//!
//! ```rust
//! use ki_fingerprint::profile::FingerprintProfile;
//! use ki_fingerprint::stealth::{builtin_modules, ScriptContext, ScriptInput};
//!
//! let profile = FingerprintProfile::default();
//! let input = ScriptInput::new(&profile, Some(7), ScriptContext::Page);
//! for module in builtin_modules() {
//!     let js = module.script(&input).unwrap();
//!     assert!(!js.contains("webdriver = true"));
//! }
//! ```

pub mod camouflage;
pub mod canvas;
pub mod js;
pub mod navigator;
pub mod surfaces;
pub mod webgl;
pub mod webrtc;

pub use camouflage::{
    create_constant_function, verify_native_characteristics, FunctionKind, NativeCheck,
    NativeLike, ObjectSurface, PropertyDescriptor, WrapOptions,
};
pub use navigator::NavigatorSpoof;
pub use webrtc::{rewrite_candidate, rewrite_sdp};

use serde::{Deserialize, Serialize};

use crate::profile::FingerprintProfile;

/// Execution context a script is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptContext {
    Page,
    Preload,
    Iframe,
    Worker,
}

impl ScriptContext {
    pub const ALL: &'static [ScriptContext] = &[
        ScriptContext::Page,
        ScriptContext::Preload,
        ScriptContext::Iframe,
        ScriptContext::Worker,
    ];

    /// Window-like contexts with a DOM.
    pub const WINDOW: &'static [ScriptContext] = &[
        ScriptContext::Page,
        ScriptContext::Preload,
        ScriptContext::Iframe,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptContext::Page => "page",
            ScriptContext::Preload => "preload",
            ScriptContext::Iframe => "iframe",
            ScriptContext::Worker => "worker",
        }
    }

    pub fn is_worker(self) -> bool {
        self == ScriptContext::Worker
    }
}

impl std::fmt::Display for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a module needs to render its script.
#[derive(Debug, Clone, Copy)]
pub struct ScriptInput<'a> {
    pub profile: &'a FingerprintProfile,
    /// Cleartext noise seed; noise modules emit nothing without one.
    pub noise_seed: Option<u32>,
    pub context: ScriptContext,
}

impl<'a> ScriptInput<'a> {
    pub fn new(profile: &'a FingerprintProfile, noise_seed: Option<u32>, context: ScriptContext) -> Self {
        Self {
            profile,
            noise_seed,
            context,
        }
    }
}

/// Result of rendering a module; literals are serialized with serde_json.
pub type ScriptResult = Result<String, serde_json::Error>;

/// One spoofed browser surface.
pub trait SpoofModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Contexts the module applies to.
    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::WINDOW
    }

    /// JavaScript for `input`, or an empty string when the profile leaves
    /// the surface untouched.
    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult;

    fn applies_to(&self, context: ScriptContext) -> bool {
        self.contexts().contains(&context)
    }
}

/// Every built-in module, in injection order.
///
/// Navigator runs first so later modules and page scripts never observe the
/// real identity.
pub fn builtin_modules() -> Vec<Box<dyn SpoofModule>> {
    let mut modules: Vec<Box<dyn SpoofModule>> = vec![
        Box::new(NavigatorSpoof),
        Box::new(webgl::WebGlSpoof),
        Box::new(canvas::CanvasSpoof),
        Box::new(canvas::AudioSpoof),
        Box::new(webrtc::WebRtcSpoof),
    ];
    modules.extend(surfaces::modules());
    modules
}

/// Names of every built-in module.
pub fn module_names() -> Vec<&'static str> {
    builtin_modules().iter().map(|m| m.name()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_module_names_unique() {
        let names = module_names();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert_eq!(names[0], "navigator");
    }

    #[test]
    fn test_every_module_renders_default_profile() {
        let profile = FingerprintProfile::default();
        for context in ScriptContext::ALL {
            let input = ScriptInput::new(&profile, Some(1), *context);
            for module in builtin_modules() {
                if module.applies_to(*context) {
                    module.script(&input).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_worker_modules() {
        let worker: Vec<_> = builtin_modules()
            .into_iter()
            .filter(|m| m.applies_to(ScriptContext::Worker))
            .map(|m| m.name())
            .collect();
        assert!(worker.contains(&"navigator"));
        assert!(worker.contains(&"canvas"));
        assert!(!worker.contains(&"screen"));
    }
}
