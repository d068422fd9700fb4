//! Helpers for emitting JavaScript text.

use serde::Serialize;

/// Escapes a string for use inside a double- or single-quoted JS literal.
pub fn escape_js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            '<' => out.push_str("\\x3c"),
            c => out.push(c),
        }
    }
    out
}

/// Quoted JS string literal.
pub fn js_string(s: &str) -> String {
    format!("\"{}\"", escape_js_string(s))
}

/// Serializes a value as a JS expression.
///
/// JSON is valid JavaScript once the line separators and `<` are escaped,
/// which keeps the literal safe inside an inline `<script>` element.
pub fn js_literal<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(json
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
        .replace('<', "\\u003c"))
}

/// Renders an `Option<bool>` the way the property reads in a browser:
/// `None` becomes `undefined`.
pub fn js_tristate(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "true",
        Some(false) => "false",
        None => "undefined",
    }
}

/// Renders a float so that integral values stay integral (`8` not `8.0`).
pub fn js_number(value: f64) -> String {
    if value.is_finite() {
        if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{}", value)
        }
    } else if value.is_nan() {
        "NaN".to_string()
    } else if value > 0.0 {
        "Infinity".to_string()
    } else {
        "-Infinity".to_string()
    }
}

/// Wraps a body in a strict-mode IIFE.
pub fn iife(body: &str) -> String {
    format!("(function() {{\n'use strict';\n{}\n}})();\n", body)
}

/// Strips comment-only lines, indentation and blank lines.
///
/// Trailing `//` comments inside code lines are left alone since they may sit
/// inside string or regex literals.
pub fn minify(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        if trimmed.starts_with("/*") && trimmed.ends_with("*/") {
            continue;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape_js_string(r#"a"b'c\d"#), r#"a\"b\'c\\d"#);
        assert_eq!(escape_js_string("x\ny"), "x\\ny");
        assert_eq!(escape_js_string("</script>"), "\\x3c/script>");
    }

    #[test]
    fn test_literal_escapes_script_end() {
        let literal = js_literal(&vec!["</script>"]).unwrap();
        assert!(!literal.contains("</"));
        assert!(literal.starts_with('['));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(js_number(8.0), "8");
        assert_eq!(js_number(0.25), "0.25");
        assert_eq!(js_number(f64::INFINITY), "Infinity");
        assert_eq!(js_tristate(None), "undefined");
    }

    #[test]
    fn test_minify() {
        let script = "  // comment\n\n    const a = 1; // keep\n  /* block */\n}\n";
        assert_eq!(minify(script), "const a = 1; // keep\n}\n");
    }
}
