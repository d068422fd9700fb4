//! WebRTC leak protection.
//!
//! ICE candidates and SDP connection lines carry local interface and public
//! addresses. In `replace` mode private addresses become the profile's
//! `localIp` and public ones its `publicIp` (unless that is `"auto"`).
//! Whitelisted addresses and mDNS host names (`*.local`) are left alone.
//!
//! The Rust rewriters and the emitted JS implement the same rules.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::js::js_literal;
use super::{ScriptInput, ScriptResult, SpoofModule};
use crate::profile::{WebRtcInfo, WebRtcMode};

static CANDIDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(a=)?candidate:(\S+) (\d+) (\S+) (\d+) (\S+) (\d+) typ (\S+)(.*)$")
        .expect("candidate pattern")
});

static RADDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"( raddr )(\S+)").expect("raddr pattern"));

static CONNECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^c=IN (IP4|IP6) (\S+)$").expect("connection pattern"));

/// Chromium IP handling policy matching `disableNonProxiedUdp`.
///
/// This is a launch-time switch (`--force-webrtc-ip-handling-policy`); page
/// scripts cannot change how the browser gathers candidates.
pub fn ip_handling_policy(info: &WebRtcInfo) -> Option<&'static str> {
    match info.mode {
        WebRtcMode::Real => None,
        WebRtcMode::Disable => Some("disable_non_proxied_udp"),
        WebRtcMode::Replace => info
            .disable_non_proxied_udp
            .then_some("disable_non_proxied_udp"),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        // 100.64.0.0/10, carrier-grade NAT
        || (a == 100 && (64..128).contains(&b))
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or_else(|| is_private_v6(v6), is_private_v4),
    }
}

/// Replacement for one address, or `None` to keep it.
fn replace_address(address: &str, info: &WebRtcInfo) -> Option<String> {
    if info.whitelist.iter().any(|w| w == address) {
        return None;
    }
    let ip: IpAddr = address.parse().ok()?;
    if ip.is_unspecified() {
        return None;
    }
    if is_private(ip) {
        Some(info.local_ip.clone())
    } else if info.public_ip != "auto" && !info.public_ip.is_empty() {
        Some(info.public_ip.clone())
    } else {
        None
    }
}

/// Rewrites one ICE candidate line.
///
/// Accepts both the bare `candidate:` form and the SDP attribute form
/// `a=candidate:`. Returns `None` when the candidate must be dropped.
/// Lines that do not parse as candidates are returned unchanged.
pub fn rewrite_candidate(candidate: &str, info: &WebRtcInfo) -> Option<String> {
    match info.mode {
        WebRtcMode::Real => return Some(candidate.to_string()),
        WebRtcMode::Disable => return None,
        WebRtcMode::Replace => {}
    }

    let caps = match CANDIDATE_RE.captures(candidate) {
        Some(caps) => caps,
        None => return Some(candidate.to_string()),
    };
    let kind = &caps[8];
    if info.drop_non_relay && kind != "relay" {
        return None;
    }

    let address = &caps[6];
    let address = replace_address(address, info).unwrap_or_else(|| address.to_string());
    let rest = RADDR_RE.replace(&caps[9], |r: &regex::Captures<'_>| {
        let raddr = &r[2];
        format!(
            "{}{}",
            &r[1],
            replace_address(raddr, info).unwrap_or_else(|| raddr.to_string())
        )
    });

    Some(format!(
        "{}candidate:{} {} {} {} {} {} typ {}{}",
        caps.get(1).map_or("", |m| m.as_str()),
        &caps[2],
        &caps[3],
        &caps[4],
        &caps[5],
        address,
        &caps[7],
        kind,
        rest
    ))
}

/// Rewrites every candidate and connection line of an SDP blob.
///
/// Dropped candidates are removed; the original line terminator (`\r\n` or
/// `\n`) is preserved.
pub fn rewrite_sdp(sdp: &str, info: &WebRtcInfo) -> String {
    if info.mode == WebRtcMode::Real {
        return sdp.to_string();
    }
    let eol = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing = sdp.ends_with(eol);

    let mut lines = Vec::new();
    for line in sdp.split(eol).filter(|l| !l.is_empty()) {
        if line.starts_with("a=candidate:") {
            if let Some(rewritten) = rewrite_candidate(line, info) {
                lines.push(rewritten);
            }
        } else if let Some(caps) = CONNECTION_RE.captures(line) {
            let address = &caps[2];
            match replace_address(address, info).filter(|_| info.mode == WebRtcMode::Replace) {
                Some(replacement) => lines.push(format!("c=IN {} {}", &caps[1], replacement)),
                None => lines.push(line.to_string()),
            }
        } else {
            lines.push(line.to_string());
        }
    }

    let mut out = lines.join(eol);
    if trailing {
        out.push_str(eol);
    }
    out
}

/// WebRTC spoof module.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebRtcSpoof;

impl SpoofModule for WebRtcSpoof {
    fn name(&self) -> &'static str {
        "webrtc"
    }

    fn script(&self, input: &ScriptInput<'_>) -> ScriptResult {
        let info = &input.profile.webrtc;
        match info.mode {
            WebRtcMode::Real => Ok(String::new()),
            WebRtcMode::Disable => Ok(WEBRTC_DISABLE_JS.to_string()),
            WebRtcMode::Replace => {
                let config = json!({
                    "localIp": info.local_ip,
                    "publicIp": info.public_ip,
                    "whitelist": info.whitelist,
                    "dropNonRelay": info.drop_non_relay,
                    "forceRelay": info.force_relay,
                });
                Ok(format!(
                    "const RTC = {};\n{}",
                    js_literal(&config)?,
                    WEBRTC_REPLACE_JS
                ))
            }
        }
    }
}

const WEBRTC_DISABLE_JS: &str = r#"
['RTCPeerConnection', 'webkitRTCPeerConnection', 'mozRTCPeerConnection', 'RTCDataChannel', 'RTCSessionDescription', 'RTCIceCandidate']
.forEach(function(name) { try { delete window[name]; } catch (e) {} });
"#;

const WEBRTC_REPLACE_JS: &str = r#"
const privateV4 = function(ip) {
    const p = ip.split('.').map(Number);
    if (p.length !== 4 || p.some(function(n) { return !(n >= 0 && n <= 255); })) return null;
    return p[0] === 10 || p[0] === 127 || (p[0] === 172 && p[1] >= 16 && p[1] <= 31)
        || (p[0] === 192 && p[1] === 168) || (p[0] === 169 && p[1] === 254)
        || (p[0] === 100 && p[1] >= 64 && p[1] <= 127) || p.every(function(n) { return n === 0; });
};
const privateV6 = function(ip) {
    if (ip.indexOf(':') === -1) return null;
    const lower = ip.toLowerCase();
    if (lower.indexOf('::ffff:') === 0) return privateV4(lower.slice(7));
    if (lower === '::1' || lower === '::') return true;
    return /^f[cd]/.test(lower) || /^fe[89ab]/.test(lower);
};
const replaceAddress = function(address) {
    if (RTC.whitelist.indexOf(address) !== -1) return address;
    if (address === '0.0.0.0' || address === '::') return address;
    let priv = privateV4(address);
    if (priv === null) priv = privateV6(address);
    if (priv === null) return address;
    if (priv) return RTC.localIp;
    return RTC.publicIp && RTC.publicIp !== 'auto' ? RTC.publicIp : address;
};
const CANDIDATE = /^(a=)?candidate:(\S+) (\d+) (\S+) (\d+) (\S+) (\d+) typ (\S+)(.*)$/;
const rewriteCandidate = function(line) {
    const m = CANDIDATE.exec(line);
    if (!m) return line;
    if (RTC.dropNonRelay && m[8] !== 'relay') return null;
    const rest = m[9].replace(/( raddr )(\S+)/, function(_, head, raddr) { return head + replaceAddress(raddr); });
    return (m[1] || '') + 'candidate:' + m[2] + ' ' + m[3] + ' ' + m[4] + ' ' + m[5] + ' '
        + replaceAddress(m[6]) + ' ' + m[7] + ' typ ' + m[8] + rest;
};
const rewriteSdp = function(sdp) {
    if (typeof sdp !== 'string') return sdp;
    const eol = sdp.indexOf('\r\n') !== -1 ? '\r\n' : '\n';
    const out = [];
    sdp.split(eol).forEach(function(line) {
        if (!line) return;
        if (line.indexOf('a=candidate:') === 0) {
            const rewritten = rewriteCandidate(line);
            if (rewritten !== null) out.push(rewritten);
            return;
        }
        const c = /^c=IN (IP4|IP6) (\S+)$/.exec(line);
        out.push(c ? 'c=IN ' + c[1] + ' ' + replaceAddress(c[2]) : line);
    });
    return out.join(eol) + (sdp.slice(-eol.length) === eol ? eol : '');
};
const rewriteDescription = function(desc) {
    if (!desc || typeof desc.sdp !== 'string') return desc;
    return new RTCSessionDescription({ type: desc.type, sdp: rewriteSdp(desc.sdp) });
};

const NativePeer = window.RTCPeerConnection || window.webkitRTCPeerConnection;
if (NativePeer) {
    const peerProto = NativePeer.prototype;
    ['createOffer', 'createAnswer'].forEach(function(method) {
        camo.patchMethod(peerProto, method, function(original, args) {
            const result = Reflect.apply(original, this, args);
            if (result && typeof result.then === 'function') return result.then(rewriteDescription);
            return result;
        });
    });
    camo.patchMethod(peerProto, 'setLocalDescription', function(original, args) {
        const rest = Array.prototype.slice.call(args, 1);
        return Reflect.apply(original, this, args.length ? [rewriteDescription(args[0])].concat(rest) : args);
    });
    const localDesc = Object.getOwnPropertyDescriptor(peerProto, 'localDescription');
    if (localDesc && localDesc.get) {
        camo.defineGetter(peerProto, 'localDescription', function() {
            return rewriteDescription(Reflect.apply(localDesc.get, this, []));
        }, { enumerable: localDesc.enumerable });
    }

    const candidateDesc = typeof RTCIceCandidate !== 'undefined'
        ? Object.getOwnPropertyDescriptor(RTCIceCandidate.prototype, 'candidate') : null;
    const nativeCandidate = function(c) {
        return candidateDesc && candidateDesc.get ? Reflect.apply(candidateDesc.get, c, []) : c.candidate;
    };
    if (candidateDesc && candidateDesc.get) {
        camo.defineGetter(RTCIceCandidate.prototype, 'candidate', function() {
            const raw = Reflect.apply(candidateDesc.get, this, []);
            const rewritten = raw ? rewriteCandidate(raw) : raw;
            return rewritten === null ? '' : rewritten;
        }, { enumerable: candidateDesc.enumerable });
        const addressDesc = Object.getOwnPropertyDescriptor(RTCIceCandidate.prototype, 'address');
        if (addressDesc && addressDesc.get) {
            camo.defineGetter(RTCIceCandidate.prototype, 'address', function() {
                const raw = Reflect.apply(addressDesc.get, this, []);
                return raw ? replaceAddress(raw) : raw;
            }, { enumerable: addressDesc.enumerable });
        }
    }
    const dropped = function(event) {
        return !!(event && event.candidate && nativeCandidate(event.candidate)
            && rewriteCandidate(nativeCandidate(event.candidate)) === null);
    };
    const listeners = new WeakMap();
    camo.patchMethod(peerProto, 'addEventListener', function(original, args) {
        const type = args[0], listener = args[1];
        if (type !== 'icecandidate' || typeof listener !== 'function') return Reflect.apply(original, this, args);
        let filtered = listeners.get(listener);
        if (!filtered) {
            filtered = function(event) { if (!dropped(event)) return listener.call(this, event); };
            listeners.set(listener, filtered);
        }
        return Reflect.apply(original, this, [type, filtered].concat(args.slice(2)));
    });
    camo.patchMethod(peerProto, 'removeEventListener', function(original, args) {
        const listener = args[1];
        const filtered = typeof listener === 'function' ? listeners.get(listener) : null;
        return Reflect.apply(original, this, filtered ? [args[0], filtered].concat(args.slice(2)) : args);
    });
    const handlerDesc = Object.getOwnPropertyDescriptor(peerProto, 'onicecandidate');
    if (handlerDesc && handlerDesc.set) {
        const handlers = new WeakMap();
        const getter = camo.wrap(handlerDesc.get, function(original) {
            return handlers.has(this) ? handlers.get(this) : Reflect.apply(original, this, []);
        }, { kind: 'getter', name: 'onicecandidate' });
        const setter = camo.wrap(handlerDesc.set, function(original, args) {
            const handler = args[0];
            handlers.set(this, handler);
            const filtered = typeof handler === 'function'
                ? function(event) { if (!dropped(event)) return handler.call(this, event); }
                : handler;
            return Reflect.apply(original, this, [filtered]);
        }, { kind: 'setter', name: 'onicecandidate' });
        Object.defineProperty(peerProto, 'onicecandidate', {
            get: getter, set: setter, enumerable: handlerDesc.enumerable, configurable: true
        });
    }

    const Peer = camo.proxyConstructor(NativePeer, {
        construct: function(target, args, newTarget) {
            const config = Object.assign({}, args[0] || {});
            if (RTC.forceRelay) config.iceTransportPolicy = 'relay';
            return Reflect.construct(target, [config].concat(Array.prototype.slice.call(args, 1)), newTarget);
        }
    });
    ['RTCPeerConnection', 'webkitRTCPeerConnection'].forEach(function(name) {
        if (window[name]) {
            Object.defineProperty(window, name, { value: Peer, writable: true, enumerable: false, configurable: true });
        }
    });
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::FingerprintProfile;
    use crate::stealth::ScriptContext;

    const HOST: &str = "candidate:1 1 udp 2122260223 192.168.0.12 54321 typ host generation 0";
    const SRFLX: &str =
        "candidate:2 1 udp 1686052607 203.0.113.7 61000 typ srflx raddr 10.0.0.4 rport 54321 generation 0";
    const RELAY: &str =
        "candidate:3 1 udp 41885439 198.51.100.9 3478 typ relay raddr 203.0.113.7 rport 61000";

    fn info() -> WebRtcInfo {
        WebRtcInfo {
            local_ip: "10.1.1.1".into(),
            public_ip: "198.51.100.200".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_private_host_replaced() {
        assert_eq!(
            rewrite_candidate(HOST, &info()).unwrap(),
            "candidate:1 1 udp 2122260223 10.1.1.1 54321 typ host generation 0"
        );
    }

    #[test]
    fn test_srflx_public_and_raddr() {
        assert_eq!(
            rewrite_candidate(SRFLX, &info()).unwrap(),
            "candidate:2 1 udp 1686052607 198.51.100.200 61000 typ srflx raddr 10.1.1.1 rport 54321 generation 0"
        );
    }

    #[test]
    fn test_auto_public_passes_through() {
        let mut info = info();
        info.public_ip = "auto".into();
        let out = rewrite_candidate(SRFLX, &info).unwrap();
        assert!(out.contains(" 203.0.113.7 61000 "));
        assert!(out.contains("raddr 10.1.1.1"));
    }

    #[test]
    fn test_whitelist_untouched() {
        let mut info = info();
        info.whitelist = vec!["192.168.0.12".into()];
        assert_eq!(rewrite_candidate(HOST, &info).unwrap(), HOST);
    }

    #[test]
    fn test_drop_non_relay() {
        let mut info = info();
        info.drop_non_relay = true;
        assert!(rewrite_candidate(HOST, &info).is_none());
        assert!(rewrite_candidate(SRFLX, &info).is_none());
        assert!(rewrite_candidate(RELAY, &info).is_some());
    }

    #[test]
    fn test_mdns_and_modes() {
        let mdns = "candidate:4 1 udp 2122260223 3f1c0a4e-1b2c-4d5e-8f90-123456789abc.local 54321 typ host";
        assert_eq!(rewrite_candidate(mdns, &info()).unwrap(), mdns);

        let mut info = info();
        info.mode = WebRtcMode::Real;
        assert_eq!(rewrite_candidate(HOST, &info).unwrap(), HOST);
        info.mode = WebRtcMode::Disable;
        assert!(rewrite_candidate(HOST, &info).is_none());
    }

    #[test]
    fn test_rewrite_sdp() {
        let sdp = format!(
            "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\nc=IN IP4 192.168.0.12\r\na={}\r\na={}\r\n",
            HOST, SRFLX
        );
        let mut info = info();
        info.drop_non_relay = false;
        let out = rewrite_sdp(&sdp, &info);
        assert!(out.ends_with("\r\n"));
        assert!(out.contains("c=IN IP4 10.1.1.1\r\n"));
        assert!(out.contains("a=candidate:1 1 udp 2122260223 10.1.1.1 54321 typ host"));
        assert!(!out.contains("192.168.0.12"));
        assert!(out.contains("o=- 46117 2 IN IP4 127.0.0.1"));

        info.drop_non_relay = true;
        let dropped = rewrite_sdp(&sdp, &info);
        assert!(!dropped.contains("a=candidate"));
        assert!(dropped.starts_with("v=0\r\n"));
    }

    #[test]
    fn test_policy_and_script() {
        let mut profile = FingerprintProfile::default();
        assert_eq!(ip_handling_policy(&profile.webrtc), Some("disable_non_proxied_udp"));
        let js = WebRtcSpoof
            .script(&ScriptInput::new(&profile, None, ScriptContext::Page))
            .unwrap();
        assert!(js.contains("iceTransportPolicy"));
        assert!(js.contains("\"publicIp\":\"auto\""));

        profile.webrtc.mode = WebRtcMode::Disable;
        let js = WebRtcSpoof
            .script(&ScriptInput::new(&profile, None, ScriptContext::Page))
            .unwrap();
        assert!(js.contains("delete window[name]"));
    }
}
