//! WebGL fingerprint spoofing.
//!
//! The GPU renderer string is among the most identifying values a page can
//! read, so `getParameter`, the debug renderer extension and the extension
//! list all answer from the profile. Both `WebGLRenderingContext` and
//! `WebGL2RenderingContext` are patched.
//!
//! | mode     | behaviour                                              |
//! |----------|--------------------------------------------------------|
//! | `custom` | identity strings and limits from the profile           |
//! | `noise`  | as `custom`, plus seeded noise on `readPixels`         |
//! | `real`   | untouched                                              |
//! | `off`    | `getContext` returns `null` for every WebGL context id |

use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::canvas::{noise_function, PIXEL_NOISE_JS};
use super::js::js_literal;
use super::{ScriptContext, ScriptInput, ScriptResult, SpoofModule};
use crate::noise::{NoiseLevel, NoiseOptions};
use crate::profile::{WebGlInfo, WebGlMode};

/// `gl.VENDOR`
pub const VENDOR: u32 = 7936;
/// `gl.RENDERER`
pub const RENDERER: u32 = 7937;
/// `gl.VERSION`
pub const VERSION: u32 = 7938;
/// `gl.SHADING_LANGUAGE_VERSION`
pub const SHADING_LANGUAGE_VERSION: u32 = 35724;
/// `gl.MAX_TEXTURE_SIZE`
pub const MAX_TEXTURE_SIZE: u32 = 3379;
/// `gl.MAX_VIEWPORT_DIMS`
pub const MAX_VIEWPORT_DIMS: u32 = 3386;
/// `UNMASKED_VENDOR_WEBGL` from `WEBGL_debug_renderer_info`.
pub const UNMASKED_VENDOR_WEBGL: u32 = 37445;
/// `UNMASKED_RENDERER_WEBGL` from `WEBGL_debug_renderer_info`.
pub const UNMASKED_RENDERER_WEBGL: u32 = 37446;

/// Precision types answered from the profile's float precision triple.
const MEDIUM_FLOAT: u32 = 36337;
const HIGH_FLOAT: u32 = 36338;

/// WebGL spoof module.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebGlSpoof;

impl WebGlSpoof {
    /// `getParameter` answers keyed by GL enum.
    ///
    /// `MAX_VIEWPORT_DIMS` is a two-element array; the page receives it as an
    /// `Int32Array`.
    pub fn parameters(webgl: &WebGlInfo) -> BTreeMap<u32, Value> {
        let mut params = BTreeMap::new();
        params.insert(VENDOR, json!(webgl.vendor));
        params.insert(RENDERER, json!(webgl.renderer));
        params.insert(VERSION, json!(webgl.version));
        params.insert(SHADING_LANGUAGE_VERSION, json!(webgl.shading_language_version));
        params.insert(MAX_TEXTURE_SIZE, json!(webgl.max_texture_size));
        params.insert(MAX_VIEWPORT_DIMS, json!(webgl.max_viewport_dims));
        params.insert(UNMASKED_VENDOR_WEBGL, json!(webgl.unmasked_vendor));
        params.insert(UNMASKED_RENDERER_WEBGL, json!(webgl.unmasked_renderer));
        params
    }

    /// What `getParameter(pname)` returns, or `None` when the real value is
    /// passed through.
    pub fn get_parameter(webgl: &WebGlInfo, pname: u32) -> Option<Value> {
        match webgl.mode {
            WebGlMode::Custom | WebGlMode::Noise => Self::parameters(webgl).remove(&pname),
            WebGlMode::Real | WebGlMode::Off => None,
        }
    }
}

impl SpoofModule for WebGlSpoof {
    fn name(&self) -> &'static str {
        "webgl"
    }

    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::ALL
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let webgl = &input.profile.webgl;
        match webgl.mode {
            WebGlMode::Real => return Ok(String::new()),
            WebGlMode::Off => return Ok(WEBGL_BLOCK_JS.to_string()),
            WebGlMode::Custom | WebGlMode::Noise => {}
        }

        let params: BTreeMap<String, Value> = Self::parameters(webgl)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let mut out = format!(
            "const PARAMS = {};\nconst EXTENSIONS = Object.freeze({});\nconst PRECISION = {};\nconst FLOAT_TYPES = [{}, {}];\n",
            js_literal(&params)?,
            js_literal(&webgl.extensions)?,
            js_literal(&webgl.shader_precision)?,
            MEDIUM_FLOAT,
            HIGH_FLOAT,
        );
        out.push_str(WEBGL_PARAMS_JS);

        if webgl.mode == WebGlMode::Noise {
            if let Some(seed) = input.noise_seed {
                let options = NoiseOptions {
                    level: NoiseLevel::Low,
                    distribution: input.profile.canvas.noise_distribution,
                };
                out.push_str(&noise_function("noiseAt", seed ^ 0x3c3c_3c3c, options));
                out.push_str(PIXEL_NOISE_JS);
                out.push_str(WEBGL_READ_PIXELS_JS);
            }
        }
        Ok(out)
    }
}

const WEBGL_PARAMS_JS: &str = r#"
const debugInfo = Object.freeze({ UNMASKED_VENDOR_WEBGL: 37445, UNMASKED_RENDERER_WEBGL: 37446 });
const patchContext = function(proto) {
    if (!proto) return;
    camo.patchMethod(proto, 'getParameter', function(original, args) {
        const key = String(args[0]);
        if (Object.prototype.hasOwnProperty.call(PARAMS, key)) {
            const value = PARAMS[key];
            return args[0] === 3386 ? new Int32Array(value) : value;
        }
        return Reflect.apply(original, this, args);
    });
    camo.patchMethod(proto, 'getSupportedExtensions', function() {
        return EXTENSIONS.slice();
    });
    camo.patchMethod(proto, 'getExtension', function(original, args) {
        const name = args[0];
        if (EXTENSIONS.indexOf(name) === -1) return null;
        if (name === 'WEBGL_debug_renderer_info') return debugInfo;
        return Reflect.apply(original, this, args);
    });
    camo.patchMethod(proto, 'getShaderPrecisionFormat', function(original, args) {
        const format = Reflect.apply(original, this, args);
        const type = args[1];
        if (!format || FLOAT_TYPES.indexOf(type) === -1) return format;
        const proto = Object.getPrototypeOf(format);
        return Object.create(proto, {
            rangeMin: { get: function() { return PRECISION.rangeMin; } },
            rangeMax: { get: function() { return PRECISION.rangeMax; } },
            precision: { get: function() { return PRECISION.precision; } }
        });
    });
};
patchContext(typeof WebGLRenderingContext !== 'undefined' ? WebGLRenderingContext.prototype : null);
patchContext(typeof WebGL2RenderingContext !== 'undefined' ? WebGL2RenderingContext.prototype : null);
"#;

const WEBGL_READ_PIXELS_JS: &str = r#"
[typeof WebGLRenderingContext !== 'undefined' ? WebGLRenderingContext.prototype : null,
 typeof WebGL2RenderingContext !== 'undefined' ? WebGL2RenderingContext.prototype : null]
.forEach(function(proto) {
    camo.patchMethod(proto, 'readPixels', function(original, args) {
        const result = Reflect.apply(original, this, args);
        const pixels = args[6];
        if (pixels && pixels.BYTES_PER_ELEMENT === 1) applyPixelNoise(pixels);
        return result;
    });
});
"#;

const WEBGL_BLOCK_JS: &str = r#"
const blocked = ['webgl', 'webgl2', 'experimental-webgl', 'experimental-webgl2'];
[typeof HTMLCanvasElement !== 'undefined' ? HTMLCanvasElement.prototype : null,
 typeof OffscreenCanvas !== 'undefined' ? OffscreenCanvas.prototype : null]
.forEach(function(proto) {
    camo.patchMethod(proto, 'getContext', function(original, args) {
        if (blocked.indexOf(String(args[0]).toLowerCase()) !== -1) return null;
        return Reflect.apply(original, this, args);
    });
});
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FingerprintProfile;

    #[test]
    fn test_parameters_follow_profile() {
        let mut webgl = WebGlInfo::default();
        webgl.unmasked_renderer = "ANGLE (Intel, Intel(R) UHD Graphics 630 Direct3D11 vs_5_0 ps_5_0, D3D11)".into();
        assert_eq!(
            WebGlSpoof::get_parameter(&webgl, UNMASKED_RENDERER_WEBGL),
            Some(json!(webgl.unmasked_renderer))
        );
        assert_eq!(
            WebGlSpoof::get_parameter(&webgl, MAX_VIEWPORT_DIMS),
            Some(json!([32767, 32767]))
        );
        assert_eq!(WebGlSpoof::get_parameter(&webgl, 1234), None);

        webgl.mode = WebGlMode::Real;
        assert_eq!(WebGlSpoof::get_parameter(&webgl, VENDOR), None);
    }

    #[test]
    fn test_script_modes() {
        let mut profile = FingerprintProfile::default();
        let render = |p: &FingerprintProfile| {
            WebGlSpoof
                .script(&ScriptInput::new(p, Some(5), ScriptContext::Page))
                .unwrap()
        };

        let custom = render(&profile);
        assert!(custom.contains("\"37446\""));
        assert!(custom.contains("WEBGL_debug_renderer_info"));
        assert!(!custom.contains("readPixels"));

        profile.webgl.mode = WebGlMode::Noise;
        assert!(render(&profile).contains("readPixels"));

        profile.webgl.mode = WebGlMode::Real;
        assert!(render(&profile).is_empty());

        profile.webgl.mode = WebGlMode::Off;
        assert!(render(&profile).contains("experimental-webgl"));
    }
}
