//! Script compilation.
//!
//! An [`Injector`] turns one profile into the four payloads a host runs:
//! page, preload, iframe and worker. Every payload is a standalone
//! strict-mode IIFE: the camouflage runtime first, then each applicable
//! spoof module in its own `try` block so one failing surface never stops
//! the rest.
//!
//! Scripts are memoized per `(context, options)`. The cache lock is only
//! held to look up or store a finished script, never while compiling.
//!
//! # Example
//!
//! ```rust
//! use ki_fingerprint::injector::{Injector, InjectorOptions};
//! use ki_fingerprint::profile::FingerprintProfile;
//!
//! let profile = FingerprintProfile::default().to_value().unwrap();
//! let injector = Injector::new(&profile, InjectorOptions::default()).unwrap();
//! let page = injector.injection_script().unwrap();
//! assert!(page.starts_with("(function() {"));
//! assert!(injector.generation_time().is_some());
//! ```

pub mod worker;

pub use worker::{
    InterceptionStatus, InterceptorState, SlotStatus, SpawnedWorker, WorkerConstructor,
    WorkerInterceptor, WorkerOptions, WorkerScope, WorkerTarget, WorkerType,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::profile::{
    ConsistencyValidator, FingerprintProfile, NoiseMode, ValidationIssue, ValidationReport,
    WebGlMode,
};
use crate::seed::SeedManager;
use crate::stealth::camouflage::RUNTIME;
use crate::stealth::js::{iife, js_literal, js_string, minify};
use crate::stealth::{builtin_modules, module_names, ScriptContext, ScriptInput, SpoofModule};

/// Default cold-generation ceiling.
pub const DEFAULT_PERFORMANCE_BUDGET: Duration = Duration::from_millis(50);

/// Errors raised while building an injector or its scripts.
#[derive(Debug, Error)]
pub enum InjectorError {
    /// The profile is not an object or does not describe a profile.
    #[error("Invalid injector profile: {0}")]
    Construction(String),

    /// A profile value could not be rendered as a JS literal.
    #[error("Failed to serialize script data: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Compilation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InjectorOptions {
    pub minify: bool,
    pub include_worker_interceptor: bool,
    pub include_iframe_protection: bool,
    #[serde(with = "budget_ms")]
    pub performance_budget: Duration,
}

impl Default for InjectorOptions {
    fn default() -> Self {
        Self {
            minify: false,
            include_worker_interceptor: true,
            include_iframe_protection: true,
            performance_budget: DEFAULT_PERFORMANCE_BUDGET,
        }
    }
}

mod budget_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IframeOptions {
    /// Skip frames whose parent is on another origin.
    pub same_origin_only: bool,
}

impl Default for IframeOptions {
    fn default() -> Self {
        Self {
            same_origin_only: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerScriptOptions {
    pub worker_type: WorkerType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKey {
    Page,
    Preload,
    Iframe(IframeOptions),
    Worker(WorkerScriptOptions),
}

/// Compiles a profile into per-context scripts.
pub struct Injector {
    raw: Value,
    profile: FingerprintProfile,
    options: InjectorOptions,
    modules: Vec<Box<dyn SpoofModule>>,
    validator: ConsistencyValidator,
    seeds: Option<Arc<SeedManager>>,
    noise_seed: Option<u32>,
    seed_problem: Option<String>,
    cache: Mutex<HashMap<CacheKey, Arc<str>>>,
    generation_time: Mutex<Option<Duration>>,
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("profile", &self.profile.id)
            .field("options", &self.options)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

fn parse_profile(profile_json: &Value) -> Result<FingerprintProfile, InjectorError> {
    if !profile_json.is_object() {
        return Err(InjectorError::Construction(format!(
            "expected a profile object, got {}",
            kind_of(profile_json)
        )));
    }
    FingerprintProfile::from_value(profile_json.clone())
        .map_err(|e| InjectorError::Construction(e.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Recursively merges `patch` into `target`. Objects merge key by key;
/// every other value replaces what was there.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

impl Injector {
    /// Parses `profile_json` and prepares an empty cache.
    pub fn new(profile_json: &Value, options: InjectorOptions) -> Result<Self, InjectorError> {
        let profile = parse_profile(profile_json)?;
        let mut injector = Self {
            raw: profile_json.clone(),
            profile,
            options,
            modules: builtin_modules(),
            validator: ConsistencyValidator::new(),
            seeds: None,
            noise_seed: None,
            seed_problem: None,
            cache: Mutex::new(HashMap::new()),
            generation_time: Mutex::new(None),
        };
        injector.resolve_seed();
        Ok(injector)
    }

    /// Opens encrypted seeds with `seeds`.
    pub fn with_seed_manager(mut self, seeds: Arc<SeedManager>) -> Self {
        self.seeds = Some(seeds);
        self.resolve_seed();
        self
    }

    pub fn with_validator(mut self, validator: ConsistencyValidator) -> Self {
        self.validator = validator;
        self
    }

    fn resolve_seed(&mut self) {
        self.seed_problem = None;
        self.noise_seed = match (&self.profile.noise_seed, &self.seeds) {
            (None, _) => None,
            (Some(seed), _) if seed.plain_value().is_some() => seed.plain_value(),
            (Some(_), None) => {
                self.seed_problem = Some("encrypted seed but no seed manager".to_string());
                None
            }
            (Some(_), Some(seeds)) => match seeds.open_profile_seed(&self.profile) {
                Ok(seed) => seed,
                Err(e) => {
                    warn!(profile = %self.profile.id, error = %e, "Cannot open noise seed");
                    self.seed_problem = Some(e.to_string());
                    None
                }
            },
        };
    }

    pub fn profile(&self) -> &FingerprintProfile {
        &self.profile
    }

    pub fn options(&self) -> &InjectorOptions {
        &self.options
    }

    /// Cleartext seed the noise modules use, if any.
    pub fn noise_seed(&self) -> Option<u32> {
        self.noise_seed
    }

    /// Duration of the last cold generation; `None` before the first.
    pub fn generation_time(&self) -> Option<Duration> {
        *self.generation_time.lock()
    }

    /// Page (main world) script.
    pub fn injection_script(&self) -> Result<String, InjectorError> {
        self.cached(CacheKey::Page)
    }

    /// Script for the preload stage, before any page script runs.
    pub fn preload_script(&self) -> Result<String, InjectorError> {
        self.cached(CacheKey::Preload)
    }

    pub fn iframe_script(&self, options: IframeOptions) -> Result<String, InjectorError> {
        self.cached(CacheKey::Iframe(options))
    }

    pub fn worker_script(&self, options: WorkerScriptOptions) -> Result<String, InjectorError> {
        self.cached(CacheKey::Worker(options))
    }

    /// Drops every memoized script.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Number of memoized scripts.
    pub fn cached_scripts(&self) -> usize {
        self.cache.lock().len()
    }

    /// Deep-merges `partial` into the profile and invalidates the cache.
    ///
    /// On failure the previous profile stays in effect.
    pub fn update_config(&mut self, partial: &Value) -> Result<(), InjectorError> {
        if !partial.is_object() {
            return Err(InjectorError::Construction(format!(
                "expected a partial profile object, got {}",
                kind_of(partial)
            )));
        }
        let mut merged = self.raw.clone();
        deep_merge(&mut merged, partial);
        let profile = parse_profile(&merged)?;
        self.raw = merged;
        self.profile = profile;
        self.resolve_seed();
        self.clear_cache();
        debug!(profile = %self.profile.id, "Injector configuration updated");
        Ok(())
    }

    fn cached(&self, key: CacheKey) -> Result<String, InjectorError> {
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(hit.to_string());
        }

        let started = Instant::now();
        let script = self.compile(key)?;
        let elapsed = started.elapsed();
        *self.generation_time.lock() = Some(elapsed);
        if elapsed > self.options.performance_budget {
            warn!(
                context = ?key,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.options.performance_budget.as_millis() as u64,
                "Script generation exceeded performance budget"
            );
        }

        let script: Arc<str> = Arc::from(script);
        self.cache.lock().insert(key, Arc::clone(&script));
        Ok(script.to_string())
    }

    fn compile(&self, key: CacheKey) -> Result<String, InjectorError> {
        let context = match key {
            CacheKey::Page => ScriptContext::Page,
            CacheKey::Preload => ScriptContext::Preload,
            CacheKey::Iframe(_) => ScriptContext::Iframe,
            CacheKey::Worker(_) => ScriptContext::Worker,
        };

        let mut body = String::new();
        if let CacheKey::Iframe(options) = key {
            if options.same_origin_only {
                body.push_str("try { void window.parent.document; } catch (e) { return; }\n");
            }
        }
        body.push_str(&self.modules_body(context)?);

        // Every window realm can construct workers, frames included.
        if !context.is_worker() && self.options.include_worker_interceptor {
            let bootstrap = self.compile(CacheKey::Worker(WorkerScriptOptions::default()))?;
            let interceptor = WorkerInterceptor::with_bootstrap(bootstrap);
            body.push_str(&guarded("worker_interceptor", &interceptor.script()?));
        }
        if matches!(key, CacheKey::Page | CacheKey::Preload) && self.options.include_iframe_protection {
            let frame = self.compile(CacheKey::Iframe(IframeOptions::default()))?;
            body.push_str(&guarded(
                "iframe_protection",
                &format!("const IFRAME_SCRIPT = {};\n{}", js_literal(&frame)?, IFRAME_PROTECTION_JS),
            ));
        }

        let script = iife(&body);
        Ok(if self.options.minify { minify(&script) } else { script })
    }

    fn modules_body(&self, context: ScriptContext) -> Result<String, InjectorError> {
        let input = ScriptInput::new(&self.profile, self.noise_seed, context);
        let global = if context.is_worker() { "self" } else { "window" };

        let mut body = format!(
            "const GUARD = Symbol.for('__fp_applied');\nif ({0}[GUARD]) return;\nObject.defineProperty({0}, GUARD, {{ value: true }});\nconst PROFILE = Object.freeze({1});\nconst CONTEXT = {2};\n",
            global,
            js_literal(&self.profile.without_identity())?,
            js_string(context.as_str())
        );
        body.push_str(RUNTIME);
        for module in self.modules.iter().filter(|m| m.applies_to(context)) {
            let js = module.script(&input)?;
            if !js.is_empty() {
                body.push_str(&guarded(module.name(), &js));
            }
        }
        Ok(body)
    }

    /// Consistency validation plus injector concerns.
    pub fn validate(&self) -> ValidationReport {
        let mut report = self.validator.validate(&self.profile);
        let webgl = &self.profile.webgl;

        if webgl.mode == WebGlMode::Custom {
            for (field, value) in [
                ("webgl.vendor", &webgl.vendor),
                ("webgl.renderer", &webgl.renderer),
                ("webgl.unmaskedVendor", &webgl.unmasked_vendor),
                ("webgl.unmaskedRenderer", &webgl.unmasked_renderer),
            ] {
                if value.trim().is_empty() {
                    report.errors.push(ValidationIssue::new(
                        field,
                        "custom WebGL mode requires a value",
                        json!(value),
                    ));
                }
            }
        }

        let noisy = self.profile.canvas.mode == NoiseMode::Noise
            || self.profile.audio.mode == NoiseMode::Noise
            || self.profile.client_rects.mode == NoiseMode::Noise
            || webgl.mode == WebGlMode::Noise;
        if noisy && self.noise_seed.is_none() {
            let reason = match &self.seed_problem {
                Some(problem) => format!("noise mode enabled but the seed cannot be opened: {}", problem),
                None => "noise mode enabled without a noise seed; noise is skipped".to_string(),
            };
            report
                .warnings
                .push(ValidationIssue::new("noiseSeed", reason, Value::Null));
        }

        report.valid = report.errors.is_empty();
        report
    }

    /// Names of the compiled-in spoof modules.
    pub fn available_modules() -> Vec<&'static str> {
        module_names()
    }

    pub fn has_module(name: &str) -> bool {
        module_names().contains(&name)
    }

    /// One self-contained page script for `profile_json` with default options.
    pub fn create_standalone_script(profile_json: &Value) -> Result<String, InjectorError> {
        Injector::new(profile_json, InjectorOptions::default())?.injection_script()
    }
}

fn guarded(name: &str, js: &str) -> String {
    format!("// {}\ntry {{\n{}}} catch (e) {{}}\n", name, js)
}

const IFRAME_PROTECTION_JS: &str = r#"
if (typeof HTMLIFrameElement !== 'undefined') {
    const seen = new WeakSet();
    const apply = function(win) {
        if (!win || seen.has(win)) return;
        seen.add(win);
        try { win.eval(IFRAME_SCRIPT); } catch (e) {}
    };
    const frameProto = HTMLIFrameElement.prototype;
    const windowDesc = Object.getOwnPropertyDescriptor(frameProto, 'contentWindow');
    const documentDesc = Object.getOwnPropertyDescriptor(frameProto, 'contentDocument');
    if (windowDesc && windowDesc.get) {
        camo.defineGetter(frameProto, 'contentWindow', function() {
            const win = Reflect.apply(windowDesc.get, this, []);
            apply(win);
            return win;
        }, { enumerable: windowDesc.enumerable });
    }
    if (documentDesc && documentDesc.get && windowDesc && windowDesc.get) {
        camo.defineGetter(frameProto, 'contentDocument', function() {
            apply(Reflect.apply(windowDesc.get, this, []));
            return Reflect.apply(documentDesc.get, this, []);
        }, { enumerable: documentDesc.enumerable });
    }
}
"#;
