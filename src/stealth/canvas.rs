//! Canvas and audio noise.
//!
//! The emitted noise function mirrors [`NoiseEngine::noise_at`] bit for bit
//! (same hash, same interval mapping, same Box-Muller stream), so a pixel
//! buffer perturbed in the page matches one perturbed by the Rust engine.
//! Reads are idempotent: exporting the same canvas twice yields the same
//! bytes.
//!
//! [`NoiseEngine::noise_at`]: crate::noise::NoiseEngine::noise_at

use super::js::js_number;
use super::{ScriptContext, ScriptInput, ScriptResult, SpoofModule};
use crate::noise::{NoiseDistribution, NoiseOptions};
use crate::profile::{NoiseMode, NoiseSurface};

/// JS definition of `const <name> = function(index) -> number`.
pub fn noise_function(name: &str, seed: u32, options: NoiseOptions) -> String {
    format!(
        r#"const {name} = (function() {{
    const SEED = {seed} >>> 0;
    const AMP = {amp};
    const GAUSSIAN = {gaussian};
    const hash = function(s, i) {{
        let h = (s ^ i) >>> 0;
        h = Math.imul(h ^ (h >>> 16), 0x45d9f3b) >>> 0;
        h = Math.imul(h ^ (h >>> 13), 0x45d9f3b) >>> 0;
        return (h ^ (h >>> 16)) >>> 0;
    }};
    const unit = function(h) {{ return (h + 1) / 4294967297; }};
    return function(index) {{
        if (AMP === 0) return 0;
        const i = index >>> 0;
        if (!GAUSSIAN) return (2 * unit(hash(SEED, i)) - 1) * AMP;
        const u1 = unit(hash(SEED, i));
        const u2 = unit(hash(SEED, (i + 0x9e3779b9) >>> 0));
        const z = Math.sqrt(-2 * Math.log(u1)) * Math.cos(2 * Math.PI * u2);
        return Math.max(-AMP, Math.min(AMP, z * AMP / 3));
    }};
}})();
const roundHalfAway = function(x) {{ return x < 0 ? -Math.round(-x) : Math.round(x); }};
"#,
        name = name,
        seed = seed,
        amp = js_number(options.level.amplitude()),
        gaussian = options.distribution == NoiseDistribution::Gaussian,
    )
}

/// JS helper `applyPixelNoise(data)` perturbing RGBA bytes in place, the
/// same way the Rust engine does from a fresh cursor.
pub const PIXEL_NOISE_JS: &str = r#"
const applyPixelNoise = function(data) {
    for (let p = 0, step = 0; p + 3 < data.length; p += 4) {
        const transparent = data[p + 3] === 0;
        for (let c = 0; c < 3; c++, step++) {
            const delta = roundHalfAway(noiseAt(step));
            if (transparent || delta === 0) continue;
            data[p + c] = Math.max(0, Math.min(255, data[p + c] + delta));
        }
    }
    return data;
};
"#;

fn noise_options(surface: &NoiseSurface) -> NoiseOptions {
    NoiseOptions {
        level: surface.noise_level,
        distribution: surface.noise_distribution,
    }
}

/// Canvas 2D read-back spoofing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanvasSpoof;

impl SpoofModule for CanvasSpoof {
    fn name(&self) -> &'static str {
        "canvas"
    }

    fn contexts(&self) -> &'static [ScriptContext] {
        ScriptContext::ALL
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let canvas = &input.profile.canvas;
        match canvas.mode {
            NoiseMode::Real => Ok(String::new()),
            NoiseMode::Off => Ok(CANVAS_BLOCK_JS.to_string()),
            NoiseMode::Noise => match input.noise_seed {
                Some(seed) => {
                    let mut out = noise_function("noiseAt", seed, noise_options(canvas));
                    out.push_str(PIXEL_NOISE_JS);
                    out.push_str(CANVAS_NOISE_JS);
                    Ok(out)
                }
                None => Ok(String::new()),
            },
        }
    }
}

const CANVAS_NOISE_JS: &str = r#"
const ctx2d = typeof CanvasRenderingContext2D !== 'undefined' ? CanvasRenderingContext2D.prototype : null;
const offCtx2d = typeof OffscreenCanvasRenderingContext2D !== 'undefined' ? OffscreenCanvasRenderingContext2D.prototype : null;
const nativeGetImageData = ctx2d ? ctx2d.getImageData : (offCtx2d ? offCtx2d.getImageData : null);

[ctx2d, offCtx2d].forEach(function(proto) {
    camo.patchMethod(proto, 'getImageData', function(original, args) {
        const image = Reflect.apply(original, this, args);
        applyPixelNoise(image.data);
        return image;
    });
});

const noisyCopy = function(source) {
    const w = source.width, h = source.height;
    if (!w || !h || !nativeGetImageData) return null;
    const copy = typeof OffscreenCanvas !== 'undefined' ? new OffscreenCanvas(w, h) : document.createElement('canvas');
    copy.width = w;
    copy.height = h;
    const ctx = copy.getContext('2d');
    if (!ctx) return null;
    ctx.drawImage(source, 0, 0);
    const image = Reflect.apply(nativeGetImageData, ctx, [0, 0, w, h]);
    applyPixelNoise(image.data);
    ctx.putImageData(image, 0, 0);
    return copy;
};

if (typeof HTMLCanvasElement !== 'undefined') {
    const canvasProto = HTMLCanvasElement.prototype;
    const nativeToDataURL = canvasProto.toDataURL;
    const nativeToBlob = canvasProto.toBlob;
    camo.patchMethod(canvasProto, 'toDataURL', function(original, args) {
        try {
            const copy = noisyCopy(this);
            if (copy && copy.toDataURL) return Reflect.apply(nativeToDataURL, copy, args);
        } catch (e) {}
        return Reflect.apply(original, this, args);
    });
    camo.patchMethod(canvasProto, 'toBlob', function(original, args) {
        try {
            const copy = noisyCopy(this);
            if (copy && copy.toBlob) return Reflect.apply(nativeToBlob, copy, args);
        } catch (e) {}
        return Reflect.apply(original, this, args);
    });
}

if (typeof OffscreenCanvas !== 'undefined' && OffscreenCanvas.prototype.convertToBlob) {
    camo.patchMethod(OffscreenCanvas.prototype, 'convertToBlob', function(original, args) {
        try {
            const copy = noisyCopy(this);
            if (copy) return Reflect.apply(original, copy, args);
        } catch (e) {}
        return Reflect.apply(original, this, args);
    });
}
"#;

const CANVAS_BLOCK_JS: &str = r#"
[typeof CanvasRenderingContext2D !== 'undefined' ? CanvasRenderingContext2D.prototype : null,
 typeof OffscreenCanvasRenderingContext2D !== 'undefined' ? OffscreenCanvasRenderingContext2D.prototype : null]
.forEach(function(proto) {
    camo.patchMethod(proto, 'getImageData', function(original, args) {
        const image = Reflect.apply(original, this, args);
        image.data.fill(0);
        return image;
    });
});
if (typeof HTMLCanvasElement !== 'undefined') {
    camo.patchMethod(HTMLCanvasElement.prototype, 'toDataURL', function() { return 'data:,'; });
    camo.patchMethod(HTMLCanvasElement.prototype, 'toBlob', function(original, args) {
        const callback = args[0];
        if (typeof callback === 'function') setTimeout(function() { callback(null); }, 0);
    });
}
"#;

/// Audio buffer and analyser spoofing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioSpoof;

impl SpoofModule for AudioSpoof {
    fn name(&self) -> &'static str {
        "audio"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let audio = &input.profile.audio;
        match audio.mode {
            NoiseMode::Real => Ok(String::new()),
            NoiseMode::Off => Ok(AUDIO_BLOCK_JS.to_string()),
            NoiseMode::Noise => match input.noise_seed {
                Some(seed) => {
                    // A distinct stream so audio and canvas noise are uncorrelated.
                    let mut out = noise_function("noiseAt", seed ^ 0x5a5a_5a5a, noise_options(audio));
                    out.push_str(AUDIO_NOISE_JS);
                    Ok(out)
                }
                None => Ok(String::new()),
            },
        }
    }
}

const AUDIO_NOISE_JS: &str = r#"
const SCALE = 1e-7;
if (typeof AudioBuffer !== 'undefined') {
    const touched = new WeakMap();
    const bufferProto = AudioBuffer.prototype;
    camo.patchMethod(bufferProto, 'getChannelData', function(original, args) {
        const data = Reflect.apply(original, this, args);
        const channel = args[0] | 0;
        let channels = touched.get(this);
        if (!channels) {
            channels = new Set();
            touched.set(this, channels);
        }
        if (!channels.has(channel)) {
            channels.add(channel);
            for (let i = 0; i < data.length; i++) data[i] += noiseAt(i) * SCALE;
        }
        return data;
    });
    camo.patchMethod(bufferProto, 'copyFromChannel', function(original, args) {
        this.getChannelData(args[1] | 0);
        return Reflect.apply(original, this, args);
    });
}
if (typeof AnalyserNode !== 'undefined') {
    camo.patchMethod(AnalyserNode.prototype, 'getFloatFrequencyData', function(original, args) {
        const result = Reflect.apply(original, this, args);
        const array = args[0];
        if (array) {
            for (let i = 0; i < array.length; i++) array[i] += noiseAt(i) * SCALE;
        }
        return result;
    });
}
"#;

const AUDIO_BLOCK_JS: &str = r#"
if (typeof AudioBuffer !== 'undefined') {
    camo.patchMethod(AudioBuffer.prototype, 'getChannelData', function(original, args) {
        const data = Reflect.apply(original, this, args);
        return new Float32Array(data.length);
    });
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::NoiseLevel;
    use crate::profile::FingerprintProfile;

    #[test]
    fn test_noise_function_constants() {
        let js = noise_function(
            "noiseAt",
            42,
            NoiseOptions {
                level: NoiseLevel::High,
                distribution: NoiseDistribution::Gaussian,
            },
        );
        assert!(js.contains("const SEED = 42 >>> 0;"));
        assert!(js.contains("const AMP = 6;"));
        assert!(js.contains("const GAUSSIAN = true;"));
        assert!(js.contains("0x45d9f3b"));
        assert!(js.contains("0x9e3779b9"));
    }

    #[test]
    fn test_canvas_modes() {
        let mut profile = FingerprintProfile::default();
        let page = |p: &FingerprintProfile, seed| {
            CanvasSpoof
                .script(&ScriptInput::new(p, seed, ScriptContext::Page))
                .unwrap()
        };

        assert!(page(&profile, Some(3)).contains("applyPixelNoise"));
        assert!(page(&profile, None).is_empty());

        profile.canvas.mode = NoiseMode::Real;
        assert!(page(&profile, Some(3)).is_empty());

        profile.canvas.mode = NoiseMode::Off;
        assert!(page(&profile, Some(3)).contains("data:,"));
    }

    #[test]
    fn test_audio_script() {
        let profile = FingerprintProfile::default();
        let js = AudioSpoof
            .script(&ScriptInput::new(&profile, Some(9), ScriptContext::Page))
            .unwrap();
        assert!(js.contains("getChannelData"));
        assert!(js.contains("1e-7"));
        assert!(!AudioSpoof.applies_to(ScriptContext::Worker));
    }
}
