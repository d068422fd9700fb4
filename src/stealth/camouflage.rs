//! Native-looking function camouflage.
//!
//! Fingerprinting scripts detect patched APIs by stringifying functions,
//! reading their `name`/`length` descriptors and listing own properties. The
//! types here model those observable characteristics in Rust, and
//! [`RUNTIME`] is the JavaScript implementation of the same contract that
//! every generated script starts with.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How a function is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Method,
    Getter,
    Setter,
}

/// Property descriptor as returned by `Object.getOwnPropertyDescriptor`.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub value: Option<Value>,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
    /// True for accessor properties.
    pub accessor: bool,
}

impl PropertyDescriptor {
    /// The descriptor native functions carry for `name` and `length`.
    fn function_meta(value: Value) -> Self {
        Self {
            value: Some(value),
            writable: false,
            enumerable: false,
            configurable: true,
            accessor: false,
        }
    }
}

type Invoke = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A function indistinguishable from a built-in by introspection.
///
/// Instances only come from [`NativeLike::native`], [`NativeLike::wrap`],
/// [`create_constant_function`] and [`NativeLike::getter`]. A wrapped
/// original is captured by the implementation closure and cannot be reached
/// through the wrapper.
#[derive(Clone)]
pub struct NativeLike {
    name: String,
    length: u32,
    kind: FunctionKind,
    invoke: Invoke,
}

impl fmt::Debug for NativeLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeLike")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Overrides for [`NativeLike::wrap`]; unset fields come from the original.
#[derive(Debug, Clone, Default)]
pub struct WrapOptions {
    pub name: Option<String>,
    pub length: Option<u32>,
    pub kind: Option<FunctionKind>,
}

impl NativeLike {
    /// Models a genuine built-in function.
    pub fn native<F>(name: impl Into<String>, length: u32, kind: FunctionKind, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            length,
            kind,
            invoke: Arc::new(f),
        }
    }

    /// Replaces `original` with `implementation`, keeping its identity.
    ///
    /// The implementation receives the original and the call arguments.
    pub fn wrap<F>(original: NativeLike, options: WrapOptions, implementation: F) -> Self
    where
        F: Fn(&NativeLike, &[Value]) -> Value + Send + Sync + 'static,
    {
        let name = options.name.unwrap_or_else(|| original.name.clone());
        let length = options.length.unwrap_or(original.length);
        let kind = options.kind.unwrap_or(original.kind);
        let captured = original;
        Self {
            name,
            length,
            kind,
            invoke: Arc::new(move |args| implementation(&captured, args)),
        }
    }

    /// An accessor getter for `prop` returning `value`.
    pub fn getter(prop: impl Into<String>, value: Value) -> Self {
        Self::native(prop, 0, FunctionKind::Getter, move |_| value.clone())
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.invoke)(args)
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Value of the `name` property: getters read `get prop`.
    pub fn name(&self) -> String {
        match self.kind {
            FunctionKind::Method => self.name.clone(),
            FunctionKind::Getter => format!("get {}", self.name),
            FunctionKind::Setter => format!("set {}", self.name),
        }
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Own property keys, in definition order.
    pub fn own_property_names(&self) -> Vec<&'static str> {
        vec!["length", "name"]
    }

    /// Method-shorthand and accessor functions have no `prototype`.
    pub fn has_prototype(&self) -> bool {
        false
    }

    pub fn descriptor(&self, prop: &str) -> Option<PropertyDescriptor> {
        match prop {
            "name" => Some(PropertyDescriptor::function_meta(Value::String(self.name()))),
            "length" => Some(PropertyDescriptor::function_meta(Value::from(self.length))),
            _ => None,
        }
    }
}

/// `Function.prototype.toString` output.
impl fmt::Display for NativeLike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}() {{ [native code] }}", self.name())
    }
}

/// A method named `name` that always returns `value`.
pub fn create_constant_function(name: impl Into<String>, value: Value, length: u32) -> NativeLike {
    NativeLike::native(name, length, FunctionKind::Method, move |_| value.clone())
}

/// Result of [`verify_native_characteristics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCheck {
    pub to_string_native: bool,
    pub name_descriptor_ok: bool,
    pub length_descriptor_ok: bool,
    pub own_properties_ok: bool,
    pub no_prototype: bool,
}

impl NativeCheck {
    pub fn passed(&self) -> bool {
        self.to_string_native
            && self.name_descriptor_ok
            && self.length_descriptor_ok
            && self.own_properties_ok
            && self.no_prototype
    }
}

/// Runs the checks a detection script would run against `f`.
pub fn verify_native_characteristics(f: &NativeLike) -> NativeCheck {
    let expected = format!("function {}() {{ [native code] }}", f.name());
    let meta_ok = |prop: &str, value: Value| {
        f.descriptor(prop)
            .map(|d| d == PropertyDescriptor::function_meta(value))
            .unwrap_or(false)
    };

    NativeCheck {
        to_string_native: f.to_string() == expected,
        name_descriptor_ok: meta_ok("name", Value::String(f.name())),
        length_descriptor_ok: meta_ok("length", Value::from(f.length())),
        own_properties_ok: f.own_property_names() == ["length", "name"],
        no_prototype: !f.has_prototype(),
    }
}

/// A property slot on an [`ObjectSurface`].
#[derive(Debug, Clone)]
pub enum PropertySlot {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        getter: NativeLike,
        enumerable: bool,
        configurable: bool,
    },
}

/// A JavaScript prototype object such as `Navigator.prototype`.
#[derive(Debug, Clone, Default)]
pub struct ObjectSurface {
    tag: String,
    properties: BTreeMap<String, PropertySlot>,
}

impl ObjectSurface {
    /// `tag` is the interface name reported by `Object.prototype.toString`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            properties: BTreeMap::new(),
        }
    }

    /// `[object Tag]`
    pub fn to_string_tag(&self) -> String {
        format!("[object {}]", self.tag)
    }

    /// Defines an enumerable, configurable accessor, as WebIDL attributes are.
    pub fn define_getter(&mut self, prop: &str, value: Value) {
        self.properties.insert(
            prop.to_string(),
            PropertySlot::Accessor {
                getter: NativeLike::getter(prop, value),
                enumerable: true,
                configurable: true,
            },
        );
    }

    pub fn define_value(&mut self, prop: &str, value: Value) {
        self.properties.insert(
            prop.to_string(),
            PropertySlot::Data {
                value,
                writable: true,
                enumerable: true,
                configurable: true,
            },
        );
    }

    pub fn remove(&mut self, prop: &str) -> bool {
        self.properties.remove(prop).is_some()
    }

    /// Reads a property, invoking its getter.
    ///
    /// Absent properties read as `None`, which scripts observe as `undefined`.
    pub fn get(&self, prop: &str) -> Option<Value> {
        self.properties.get(prop).map(|slot| match slot {
            PropertySlot::Data { value, .. } => value.clone(),
            PropertySlot::Accessor { getter, .. } => getter.call(&[]),
        })
    }

    pub fn getter(&self, prop: &str) -> Option<&NativeLike> {
        match self.properties.get(prop) {
            Some(PropertySlot::Accessor { getter, .. }) => Some(getter),
            _ => None,
        }
    }

    pub fn descriptor(&self, prop: &str) -> Option<PropertyDescriptor> {
        self.properties.get(prop).map(|slot| match slot {
            PropertySlot::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => PropertyDescriptor {
                value: Some(value.clone()),
                writable: *writable,
                enumerable: *enumerable,
                configurable: *configurable,
                accessor: false,
            },
            PropertySlot::Accessor {
                enumerable,
                configurable,
                ..
            } => PropertyDescriptor {
                value: None,
                writable: false,
                enumerable: *enumerable,
                configurable: *configurable,
                accessor: true,
            },
        })
    }

    pub fn own_keys(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    pub fn has(&self, prop: &str) -> bool {
        self.properties.contains_key(prop)
    }
}

/// JavaScript camouflage runtime.
///
/// Defines a block-scoped `camo` object. Patched functions are recorded in a
/// `WeakMap` consulted by a replacement `Function.prototype.toString`, which
/// itself stringifies as native. Installing the runtime again in the same
/// realm chains onto the previous `toString`, so earlier registrations keep
/// resolving.
pub const RUNTIME: &str = r#"
const camo = (function() {
    const registry = new WeakMap();
    const nativeToString = Function.prototype.toString;
    const defineProperty = Object.defineProperty;

    const label = function(name, kind) {
        if (kind === 'getter') return 'get ' + name;
        if (kind === 'setter') return 'set ' + name;
        return name;
    };

    const mark = function(fn, name, length, kind) {
        const shown = label(name, kind);
        defineProperty(fn, 'name', { value: shown, writable: false, enumerable: false, configurable: true });
        defineProperty(fn, 'length', { value: length, writable: false, enumerable: false, configurable: true });
        registry.set(fn, 'function ' + shown + '() { [native code] }');
        return fn;
    };

    const toString = {
        toString() {
            if (registry.has(this)) return registry.get(this);
            return Reflect.apply(nativeToString, this, arguments);
        }
    }.toString;
    mark(toString, 'toString', 0, 'method');

    const wrap = function(original, impl, options) {
        const opts = options || {};
        const name = opts.name !== undefined ? opts.name : original.name;
        const length = opts.length !== undefined ? opts.length : original.length;
        const kind = opts.kind || 'method';
        const holder = {
            fn(...args) { return Reflect.apply(impl, this, [original, args]); }
        };
        return mark(holder.fn, name, length, kind);
    };

    const createConstantFunction = function(name, value, length) {
        const holder = { fn() { return value; } };
        return mark(holder.fn, name, length || 0, 'method');
    };

    const defineGetter = function(target, prop, read, options) {
        if (!target) return false;
        const opts = options || {};
        const holder = typeof read === 'function'
            ? { get fn() { return read.call(this); } }
            : { get fn() { return read; } };
        const getter = Object.getOwnPropertyDescriptor(holder, 'fn').get;
        mark(getter, prop, 0, 'getter');
        try {
            defineProperty(target, prop, {
                get: getter,
                set: undefined,
                enumerable: opts.enumerable !== undefined ? opts.enumerable : true,
                configurable: true
            });
            return true;
        } catch (e) {
            return false;
        }
    };

    const patchMethod = function(target, prop, impl, options) {
        if (!target || typeof target[prop] !== 'function') return false;
        const original = target[prop];
        const replacement = wrap(original, impl, options);
        try {
            defineProperty(target, prop, { value: replacement, writable: true, enumerable: true, configurable: true });
            return true;
        } catch (e) {
            return false;
        }
    };

    const proxyConstructor = function(original, traps) {
        const proxy = new Proxy(original, traps);
        registry.set(proxy, 'function ' + original.name + '() { [native code] }');
        return proxy;
    };

    const verifyNativeCharacteristics = function(fn) {
        const str = Reflect.apply(toString, fn, []);
        const nameDesc = Object.getOwnPropertyDescriptor(fn, 'name');
        const lengthDesc = Object.getOwnPropertyDescriptor(fn, 'length');
        const keys = Reflect.ownKeys(fn).map(String).sort();
        const result = {
            toString: /^function [^(]*\(\) \{ \[native code\] \}$/.test(str),
            name: !!nameDesc && nameDesc.writable === false && nameDesc.enumerable === false && nameDesc.configurable === true,
            length: !!lengthDesc && lengthDesc.writable === false && lengthDesc.enumerable === false && lengthDesc.configurable === true,
            ownKeys: keys.length === 2 && keys[0] === 'length' && keys[1] === 'name',
            prototype: !Object.prototype.hasOwnProperty.call(fn, 'prototype')
        };
        result.ok = result.toString && result.name && result.length && result.ownKeys && result.prototype;
        return result;
    };

    defineProperty(Function.prototype, 'toString', { value: toString, writable: true, enumerable: false, configurable: true });

    return {
        mark: mark,
        wrap: wrap,
        createConstantFunction: createConstantFunction,
        defineGetter: defineGetter,
        patchMethod: patchMethod,
        proxyConstructor: proxyConstructor,
        verifyNativeCharacteristics: verifyNativeCharacteristics
    };
})();
"#;
