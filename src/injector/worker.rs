//! Worker interception.
//!
//! Scripts running in dedicated and shared workers read their own
//! `navigator`, so a page-only spoof leaks the real identity through any
//! worker. Same-origin worker URLs are swapped for an object URL minted in
//! the creator's origin whose script installs the spoof and then loads the
//! original script. Service worker registrations are left alone: their
//! scripts must be served over HTTP(S), so they cannot be wrapped.
//!
//! The Rust model keeps all mutable state explicit: a [`WorkerScope`] holds
//! the constructor slots and an [`InterceptorState`] remembers the
//! originals, so applying and reverting is one `&mut` critical section.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::InjectorError;
use crate::profile::FingerprintProfile;
use crate::stealth::camouflage::RUNTIME;
use crate::stealth::js::{iife, js_literal, js_string};
use crate::stealth::{NavigatorSpoof, ScriptContext, ScriptInput, SpoofModule};

/// Kind of worker a constructor creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    #[default]
    Dedicated,
    Shared,
    Service,
}

impl WorkerType {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerType::Dedicated => "dedicated",
            WorkerType::Shared => "shared",
            WorkerType::Service => "service",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options passed to a worker constructor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    /// `{ type: "module" }`
    pub module: bool,
}

/// A worker as created by a constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedWorker {
    pub kind: WorkerType,
    pub url: String,
    pub module: bool,
    /// Contents of the object URL when the worker was wrapped.
    pub source: Option<String>,
}

/// Where an intercepted constructor sends a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerTarget {
    /// The caller's URL, untouched.
    PassThrough(String),
    /// A `blob:` URL in the creator's origin serving `source`.
    ObjectUrl { url: String, source: String },
}

impl WorkerTarget {
    pub fn url(&self) -> &str {
        match self {
            WorkerTarget::PassThrough(url) => url,
            WorkerTarget::ObjectUrl { url, .. } => url,
        }
    }
}

type SpawnFn = Arc<dyn Fn(&str, &WorkerOptions) -> SpawnedWorker + Send + Sync>;

/// A `Worker`, `SharedWorker` or `ServiceWorkerContainer.register` slot.
///
/// Equality is identity: two values are equal only when they are the same
/// constructor, which is what restoring an original means.
#[derive(Clone)]
pub struct WorkerConstructor {
    kind: WorkerType,
    intercepted: bool,
    spawn: SpawnFn,
}

impl WorkerConstructor {
    /// The browser's own constructor, creating workers for URLs verbatim.
    pub fn native(kind: WorkerType) -> Self {
        Self {
            kind,
            intercepted: false,
            spawn: Arc::new(move |url, options| SpawnedWorker {
                kind,
                url: url.to_string(),
                module: options.module,
                source: None,
            }),
        }
    }

    pub fn kind(&self) -> WorkerType {
        self.kind
    }

    pub fn is_intercepted(&self) -> bool {
        self.intercepted
    }

    pub fn spawn(&self, url: &str, options: &WorkerOptions) -> SpawnedWorker {
        (self.spawn)(url, options)
    }
}

impl PartialEq for WorkerConstructor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.spawn, &other.spawn)
    }
}

impl fmt::Debug for WorkerConstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConstructor")
            .field("kind", &self.kind)
            .field("intercepted", &self.intercepted)
            .finish()
    }
}

/// Global scope of one realm, reduced to what interception touches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerScope {
    /// `location.href` of the realm, if it has one.
    pub location: Option<String>,
    pub worker: Option<WorkerConstructor>,
    pub shared_worker: Option<WorkerConstructor>,
    pub service_worker_register: Option<WorkerConstructor>,
}

impl WorkerScope {
    /// A window realm at `location` with all three native constructors.
    pub fn browser(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            worker: Some(WorkerConstructor::native(WorkerType::Dedicated)),
            shared_worker: Some(WorkerConstructor::native(WorkerType::Shared)),
            service_worker_register: Some(WorkerConstructor::native(WorkerType::Service)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Originals {
    worker: Option<WorkerConstructor>,
    shared_worker: Option<WorkerConstructor>,
}

/// Interception bookkeeping owned by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterceptorState {
    originals: Option<Originals>,
    initialized: bool,
}

/// State of one constructor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SlotStatus {
    Intercepted,
    Native,
    Absent,
}

impl SlotStatus {
    fn of(slot: &Option<WorkerConstructor>) -> Self {
        match slot {
            Some(c) if c.intercepted => SlotStatus::Intercepted,
            Some(_) => SlotStatus::Native,
            None => SlotStatus::Absent,
        }
    }
}

/// Per-slot interception status.
///
/// `service_worker` is reported for visibility only. Registrations are
/// never intercepted, so it reads `Native` whenever the container exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptionStatus {
    pub initialized: bool,
    pub worker: SlotStatus,
    pub shared_worker: SlotStatus,
    pub service_worker: SlotStatus,
}

impl InterceptionStatus {
    /// Every present dedicated and shared worker constructor is intercepted.
    pub fn is_complete(&self) -> bool {
        self.initialized
            && self.worker != SlotStatus::Native
            && self.shared_worker != SlotStatus::Native
    }

    /// Whether workers of `kind` spawned from this realm see the spoof.
    pub fn covers(&self, kind: WorkerType) -> bool {
        match kind {
            WorkerType::Dedicated => self.worker == SlotStatus::Intercepted,
            WorkerType::Shared => self.shared_worker == SlotStatus::Intercepted,
            WorkerType::Service => self.service_worker == SlotStatus::Intercepted,
        }
    }
}

/// Installs and removes worker interception.
#[derive(Debug, Clone)]
pub struct WorkerInterceptor {
    bootstrap: Arc<str>,
}

impl WorkerInterceptor {
    /// Builds an interceptor whose bootstrap spoofs `navigator` inside the
    /// worker. Fails unless `profile_json` is a profile object.
    pub fn new(profile_json: &Value) -> Result<Self, InjectorError> {
        if !profile_json.is_object() {
            return Err(InjectorError::Construction(
                "worker interceptor requires a profile object".to_string(),
            ));
        }
        let profile = FingerprintProfile::from_value(profile_json.clone())
            .map_err(|e| InjectorError::Construction(e.to_string()))?;
        let input = ScriptInput::new(&profile, None, ScriptContext::Worker);
        let body = format!(
            "const PROFILE = {};\n{}try {{\n{}}} catch (e) {{}}\n",
            js_literal(&profile.without_identity())?,
            RUNTIME,
            NavigatorSpoof.script(&input)?
        );
        Ok(Self::with_bootstrap(iife(&body)))
    }

    /// Uses `bootstrap` verbatim as the worker prelude.
    pub fn with_bootstrap(bootstrap: impl Into<String>) -> Self {
        let bootstrap: String = bootstrap.into();
        Self {
            bootstrap: Arc::from(bootstrap),
        }
    }

    pub fn bootstrap(&self) -> &str {
        &self.bootstrap
    }

    /// Where the intercepted constructor sends `url`.
    ///
    /// Cross-origin, unresolvable and service worker URLs pass through
    /// unchanged.
    pub fn resolve_target(
        &self,
        url: &str,
        location: Option<&str>,
        kind: WorkerType,
        options: &WorkerOptions,
    ) -> WorkerTarget {
        let pass = || WorkerTarget::PassThrough(url.to_string());
        if kind == WorkerType::Service {
            return pass();
        }
        let Some(base) = location.and_then(|l| Url::parse(l).ok()) else {
            return pass();
        };
        let resolved = match base.join(url) {
            Ok(resolved) => resolved,
            Err(_) => return pass(),
        };
        let origin = base.origin();
        if resolved.origin() != origin || !origin.is_tuple() {
            return pass();
        }

        let loader = if options.module {
            format!("import {};\n", js_string(resolved.as_str()))
        } else {
            format!("importScripts({});\n", js_string(resolved.as_str()))
        };
        WorkerTarget::ObjectUrl {
            url: format!("blob:{}/{}", origin.ascii_serialization(), Uuid::new_v4()),
            source: format!("{}{}", self.bootstrap, loader),
        }
    }

    fn intercept(&self, original: &WorkerConstructor, location: Option<String>) -> WorkerConstructor {
        let interceptor = self.clone();
        let inner = original.clone();
        let kind = original.kind;
        WorkerConstructor {
            kind,
            intercepted: true,
            spawn: Arc::new(move |url, options| {
                match interceptor.resolve_target(url, location.as_deref(), kind, options) {
                    WorkerTarget::PassThrough(url) => inner.spawn(&url, options),
                    WorkerTarget::ObjectUrl { url, source } => SpawnedWorker {
                        source: Some(source),
                        ..inner.spawn(&url, options)
                    },
                }
            }),
        }
    }

    /// Replaces the present `Worker` and `SharedWorker` constructors with
    /// intercepting ones.
    ///
    /// Returns `false` without touching `scope` when already initialized.
    pub fn initialize(&self, scope: &mut WorkerScope, state: &mut InterceptorState) -> bool {
        if state.initialized {
            debug!("Worker interception already installed");
            return false;
        }
        let originals = Originals {
            worker: scope.worker.clone(),
            shared_worker: scope.shared_worker.clone(),
        };
        let location = scope.location.clone();
        for slot in [&mut scope.worker, &mut scope.shared_worker] {
            if let Some(intercepted) = slot.as_ref().map(|o| self.intercept(o, location.clone())) {
                *slot = Some(intercepted);
            }
        }
        state.originals = Some(originals);
        state.initialized = true;
        info!("Worker interception installed");
        true
    }

    /// Restores the exact original constructors.
    pub fn reset(&self, scope: &mut WorkerScope, state: &mut InterceptorState) -> bool {
        if !state.initialized {
            return false;
        }
        if let Some(originals) = state.originals.take() {
            scope.worker = originals.worker;
            scope.shared_worker = originals.shared_worker;
        }
        state.initialized = false;
        info!("Worker interception removed");
        true
    }

    pub fn is_initialized(&self, state: &InterceptorState) -> bool {
        state.initialized
    }

    /// Which slots currently hold intercepting constructors.
    pub fn verify(&self, scope: &WorkerScope, state: &InterceptorState) -> InterceptionStatus {
        InterceptionStatus {
            initialized: state.initialized,
            worker: SlotStatus::of(&scope.worker),
            shared_worker: SlotStatus::of(&scope.shared_worker),
            service_worker: SlotStatus::of(&scope.service_worker_register),
        }
    }

    /// JavaScript that installs the same interception in a window realm.
    pub fn script(&self) -> Result<String, InjectorError> {
        Ok(format!(
            "const WORKER_BOOTSTRAP = {};\n{}",
            js_literal(&*self.bootstrap)?,
            WORKER_INTERCEPT_JS
        ))
    }
}

const WORKER_INTERCEPT_JS: &str = r#"
const nativeCreateObjectURL = typeof URL === 'function' ? URL.createObjectURL : undefined;
const NativeBlob = typeof Blob === 'function' ? Blob : undefined;
const toObjectUrl = function(url, options) {
    if (typeof nativeCreateObjectURL !== 'function' || !NativeBlob) return url;
    const origin = typeof self.origin === 'string' ? self.origin : location.origin;
    let resolved;
    try {
        resolved = new URL(String(url), document.baseURI || location.href);
    } catch (e) {
        return url;
    }
    if (resolved.origin !== origin || resolved.origin === 'null') return url;
    const module = !!(options && typeof options === 'object' && options.type === 'module');
    const loader = module ? 'import ' + JSON.stringify(resolved.href) + ';\n'
        : 'importScripts(' + JSON.stringify(resolved.href) + ');\n';
    try {
        const blob = new NativeBlob([WORKER_BOOTSTRAP + loader], { type: 'application/javascript' });
        return Reflect.apply(nativeCreateObjectURL, URL, [blob]);
    } catch (e) {
        return url;
    }
};
['Worker', 'SharedWorker'].forEach(function(name) {
    const Native = window[name];
    if (typeof Native !== 'function') return;
    const Wrapped = camo.proxyConstructor(Native, {
        construct: function(target, args, newTarget) {
            const rest = Array.prototype.slice.call(args, 1);
            return Reflect.construct(target, [toObjectUrl(args[0], args[1])].concat(rest), newTarget);
        }
    });
    Object.defineProperty(window, name, { value: Wrapped, writable: true, enumerable: false, configurable: true });
});
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn interceptor() -> WorkerInterceptor {
        let profile = FingerprintProfile::default().to_value().unwrap();
        WorkerInterceptor::new(&profile).unwrap()
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(matches!(
            WorkerInterceptor::new(&Value::String("x".into())),
            Err(InjectorError::Construction(_))
        ));
    }

    #[test]
    fn test_initialize_is_idempotent_and_reset_restores() {
        let interceptor = interceptor();
        let mut scope = WorkerScope::browser("https://example.com/app/");
        let pristine = scope.clone();
        let mut state = InterceptorState::default();

        assert!(interceptor.initialize(&mut scope, &mut state));
        assert!(interceptor.is_initialized(&state));
        let patched = scope.clone();
        assert!(!interceptor.initialize(&mut scope, &mut state));
        assert_eq!(scope, patched);
        assert!(interceptor.verify(&scope, &state).is_complete());

        assert!(interceptor.reset(&mut scope, &mut state));
        assert_eq!(scope, pristine);
        assert!(!interceptor.is_initialized(&state));
        assert_eq!(interceptor.verify(&scope, &state).worker, SlotStatus::Native);
        assert!(!interceptor.reset(&mut scope, &mut state));
    }

    #[test]
    fn test_service_worker_not_reported_as_covered() {
        let interceptor = interceptor();
        let mut scope = WorkerScope::browser("https://example.com/");
        let native_register = scope.service_worker_register.clone();
        let mut state = InterceptorState::default();
        interceptor.initialize(&mut scope, &mut state);

        assert_eq!(scope.service_worker_register, native_register);
        let status = interceptor.verify(&scope, &state);
        assert_eq!(status.service_worker, SlotStatus::Native);
        assert!(!status.covers(WorkerType::Service));
        assert!(status.covers(WorkerType::Dedicated));
        assert!(status.covers(WorkerType::Shared));
        assert!(!interceptor.script().unwrap().contains("ServiceWorkerContainer"));

        let mut bare = WorkerScope {
            shared_worker: None,
            ..WorkerScope::browser("https://example.com/")
        };
        let mut state = InterceptorState::default();
        interceptor.initialize(&mut bare, &mut state);
        let status = interceptor.verify(&bare, &state);
        assert_eq!(status.shared_worker, SlotStatus::Absent);
        assert!(status.is_complete());
    }

    #[test]
    fn test_same_origin_wrapped_in_object_url() {
        let interceptor = interceptor();
        let mut scope = WorkerScope::browser("https://example.com/app/index.html");
        let mut state = InterceptorState::default();
        interceptor.initialize(&mut scope, &mut state);

        let worker = scope.worker.as_ref().unwrap();
        let spawned = worker.spawn("worker.js", &WorkerOptions::default());
        assert!(spawned.url.starts_with("blob:https://example.com/"));
        let id = spawned.url.trim_start_matches("blob:https://example.com/");
        assert!(Uuid::parse_str(id).is_ok());
        let script = spawned.source.unwrap();
        assert!(script.starts_with(interceptor.bootstrap()));
        assert!(script.ends_with("importScripts(\"https://example.com/app/worker.js\");\n"));

        let module = worker.spawn("/m.js", &WorkerOptions { module: true });
        assert!(module.source.unwrap().ends_with("import \"https://example.com/m.js\";\n"));
        assert!(module.module);

        let again = worker.spawn("worker.js", &WorkerOptions::default());
        assert_ne!(again.url, spawned.url);
    }

    #[test]
    fn test_pass_through_cases() {
        let interceptor = interceptor();
        let mut scope = WorkerScope::browser("https://example.com/");
        let mut state = InterceptorState::default();
        interceptor.initialize(&mut scope, &mut state);
        let options = WorkerOptions::default();

        let worker = scope.worker.clone().unwrap();
        let foreign = worker.spawn("https://cdn.other.net/w.js", &options);
        assert_eq!(foreign.url, "https://cdn.other.net/w.js");
        assert!(foreign.source.is_none());

        let service = scope.service_worker_register.clone().unwrap();
        assert_eq!(service.spawn("/sw.js", &options).url, "/sw.js");
        assert_eq!(
            interceptor.resolve_target("/sw.js", Some("https://example.com/"), WorkerType::Service, &options),
            WorkerTarget::PassThrough("/sw.js".into())
        );

        let detached = interceptor.resolve_target("w.js", None, WorkerType::Dedicated, &options);
        assert_eq!(detached.url(), "w.js");
        let malformed =
            interceptor.resolve_target("http://[::1", Some("https://example.com/"), WorkerType::Shared, &options);
        assert_eq!(malformed, WorkerTarget::PassThrough("http://[::1".into()));
        let opaque = interceptor.resolve_target("w.js", Some("file:///tmp/page.html"), WorkerType::Dedicated, &options);
        assert_eq!(opaque.url(), "w.js");
    }

    #[test]
    fn test_bootstrap_spoofs_navigator() {
        let interceptor = interceptor();
        assert!(interceptor.bootstrap().contains("const camo"));
        assert!(interceptor.bootstrap().contains("WorkerNavigator"));
        let js = interceptor.script().unwrap();
        assert!(js.contains("SharedWorker"));
        assert!(js.contains("createObjectURL"));
        assert!(!js.contains("data:application/javascript"));
    }
}
