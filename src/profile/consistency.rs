//! Cross-field consistency validation.
//!
//! Runs the intrinsic field rules first, then checks that fields which must
//! agree with each other actually do (OS, platform, User-Agent, GPU, fonts,
//! screen). Only factually incompatible combinations are errors; merely
//! unusual ones are warnings with a suggested fix.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::debug;

use super::catalog::{self, UNIVERSAL_FONTS};
use super::validation::validate_fields;
use super::{BrowserType, FingerprintProfile, OsType, OverrideMode, WebGlMode};

/// A field-tagged validation finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub reason: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, reason: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
            value,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " (suggestion: {})", suggestion)?;
        }
        Ok(())
    }
}

/// Outcome of validating a profile. Never an error type; callers render it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_issues(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// First error tagged with `field`.
    pub fn error_for(&self, field: &str) -> Option<&ValidationIssue> {
        self.errors.iter().find(|e| e.field == field)
    }

    /// First warning tagged with `field`.
    pub fn warning_for(&self, field: &str) -> Option<&ValidationIssue> {
        self.warnings.iter().find(|w| w.field == field)
    }

    /// Every error and warning rendered as `field: reason`.
    pub fn messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .map(ToString::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// One suggested fix per field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub field: String,
    pub severity: IssueSeverity,
    pub suggestion: String,
}

/// Report plus deduplicated suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedReport {
    #[serde(flatten)]
    pub report: ValidationReport,
    pub suggestions: Vec<Suggestion>,
}

/// Validates profiles field by field and across fields.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyValidator {
    strict: bool,
}

impl ConsistencyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict mode additionally warns about fonts exclusive to another OS.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Runs intrinsic then cross-field validation, accumulating every issue.
    pub fn validate(&self, profile: &FingerprintProfile) -> ValidationReport {
        let errors = validate_fields(profile);
        let mut cross = CrossChecks::default();

        cross.platform_and_user_agent(profile);
        cross.browser_identity(profile);
        cross.webgl(profile);
        cross.fonts(profile, self.strict);
        cross.screen(profile);
        cross.navigator(profile);

        let mut all_errors = errors;
        all_errors.extend(cross.errors);

        let report = ValidationReport::from_issues(all_errors, cross.warnings);
        debug!(
            profile = %profile.id,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Validated fingerprint profile"
        );
        report
    }

    /// Validates and collects one suggestion per field, errors first.
    pub fn validate_with_suggestions(&self, profile: &FingerprintProfile) -> SuggestedReport {
        let report = self.validate(profile);
        let mut seen = HashSet::new();
        let mut suggestions = Vec::new();

        let tagged = report
            .errors
            .iter()
            .map(|i| (i, IssueSeverity::Error))
            .chain(report.warnings.iter().map(|i| (i, IssueSeverity::Warning)));

        for (issue, severity) in tagged {
            if let Some(ref suggestion) = issue.suggestion {
                if seen.insert(issue.field.clone()) {
                    suggestions.push(Suggestion {
                        field: issue.field.clone(),
                        severity,
                        suggestion: suggestion.clone(),
                    });
                }
            }
        }

        SuggestedReport { report, suggestions }
    }
}

#[derive(Default)]
struct CrossChecks {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl CrossChecks {
    fn platform_and_user_agent(&mut self, p: &FingerprintProfile) {
        let os = p.os.r#type;
        let traits = catalog::traits(os);

        if p.os.platform != traits.platform {
            self.errors.push(
                ValidationIssue::new(
                    "os.platform",
                    format!("platform does not match operating system {}", os),
                    json!(p.os.platform),
                )
                .with_suggestion(format!("set platform to \"{}\"", traits.platform)),
            );
        }

        if !catalog::ua_matches_os(os, &p.user_agent) {
            self.errors.push(
                ValidationIssue::new(
                    "userAgent",
                    format!(
                        "User-Agent does not identify operating system {} (expected one of {:?})",
                        os, traits.ua_markers
                    ),
                    json!(p.user_agent),
                )
                .with_suggestion(format!(
                    "use {}",
                    catalog::build_user_agent(os, p.browser.r#type, &p.browser.version)
                )),
            );
        }
    }

    fn browser_identity(&mut self, p: &FingerprintProfile) {
        let browser = p.browser.r#type;

        match catalog::browser_from_ua(&p.user_agent) {
            Some(advertised) if advertised != browser => self.errors.push(
                ValidationIssue::new(
                    "userAgent",
                    format!("User-Agent advertises {} but browser type is {}", advertised, browser),
                    json!(p.user_agent),
                )
                .with_suggestion(format!(
                    "use {}",
                    catalog::build_user_agent(p.os.r#type, browser, &p.browser.version)
                )),
            ),
            None => self.warnings.push(
                ValidationIssue::new(
                    "userAgent",
                    "User-Agent does not identify a known browser",
                    json!(p.user_agent),
                )
                .with_suggestion(format!(
                    "use {}",
                    catalog::build_user_agent(p.os.r#type, browser, &p.browser.version)
                )),
            ),
            _ => {}
        }

        if browser == BrowserType::Safari && p.os.r#type != OsType::Macos {
            self.errors.push(
                ValidationIssue::new(
                    "browser.type",
                    format!("Safari is only available on macOS, not {}", p.os.r#type),
                    json!(browser),
                )
                .with_suggestion("use chrome or firefox, or switch the OS to macos"),
            );
        }

        let expected_vendor = catalog::navigator_vendor(browser);
        if p.navigator.vendor != expected_vendor {
            self.warnings.push(
                ValidationIssue::new(
                    "navigator.vendor",
                    format!("{} reports a different navigator.vendor", browser),
                    json!(p.navigator.vendor),
                )
                .with_suggestion(format!("set vendor to \"{}\"", expected_vendor)),
            );
        }

        if catalog::major_version(&p.browser.version) != p.browser.major_version {
            self.warnings.push(
                ValidationIssue::new(
                    "browser.majorVersion",
                    "major version does not match the full version",
                    json!(p.browser.major_version),
                )
                .with_suggestion(format!(
                    "set majorVersion to {}",
                    catalog::major_version(&p.browser.version)
                )),
            );
        }
    }

    fn webgl(&mut self, p: &FingerprintProfile) {
        if !matches!(p.webgl.mode, WebGlMode::Custom | WebGlMode::Noise) {
            return;
        }
        let os = p.os.r#type;

        for (field, text) in [
            ("webgl.unmaskedRenderer", &p.webgl.unmasked_renderer),
            ("webgl.renderer", &p.webgl.renderer),
            ("webgl.unmaskedVendor", &p.webgl.unmasked_vendor),
        ] {
            if let Some((marker, owner)) = catalog::foreign_gpu_marker(os, text) {
                self.errors.push(
                    ValidationIssue::new(
                        field,
                        format!("\"{}\" GPUs only exist on {}, not {}", marker, owner, os),
                        json!(text),
                    )
                    .with_suggestion(format!("pick a GPU configuration available on {}", os)),
                );
            }
        }

        let vendor = &p.webgl.unmasked_vendor;
        if !vendor.is_empty() && !catalog::gpu_vendor_known(os, vendor) {
            self.errors.push(
                ValidationIssue::new(
                    "webgl.unmaskedVendor",
                    format!("GPU vendor is not available on {}", os),
                    json!(vendor),
                )
                .with_suggestion(format!(
                    "use a vendor from {:?}",
                    catalog::traits(os).gpu_vendors
                )),
            );
        }
    }

    fn fonts(&mut self, p: &FingerprintProfile, strict: bool) {
        if p.fonts.mode != OverrideMode::Custom || p.fonts.list.is_empty() {
            return;
        }
        let os = p.os.r#type;
        let traits = catalog::traits(os);

        let has_typical = p
            .fonts
            .list
            .iter()
            .any(|f| traits.typical_fonts.contains(&f.as_str()));
        if !has_typical {
            self.warnings.push(
                ValidationIssue::new(
                    "fonts.list",
                    format!("no font typical for {} is present", os),
                    json!(p.fonts.list.len()),
                )
                .with_suggestion(format!(
                    "include fonts such as {}",
                    traits.typical_fonts[..3].join(", ")
                )),
            );
        }

        if strict {
            for other in OsType::ALL.iter().filter(|o| **o != os) {
                for font in catalog::traits(*other).exclusive_fonts {
                    if p.fonts.list.iter().any(|f| f == font) {
                        self.warnings.push(
                            ValidationIssue::new(
                                "fonts.list",
                                format!("font \"{}\" only ships with {}", font, other),
                                json!(font),
                            )
                            .with_suggestion(format!("remove \"{}\"", font)),
                        );
                    }
                }
            }
        }

        let missing_universal: Vec<&str> = UNIVERSAL_FONTS
            .iter()
            .copied()
            .filter(|u| !p.fonts.list.iter().any(|f| f == u))
            .collect();
        if missing_universal.len() == UNIVERSAL_FONTS.len() {
            self.warnings.push(
                ValidationIssue::new(
                    "fonts.list",
                    "none of the universal fonts is present",
                    json!(p.fonts.list.len()),
                )
                .with_suggestion(format!("include {}", UNIVERSAL_FONTS.join(", "))),
            );
        }
    }

    fn screen(&mut self, p: &FingerprintProfile) {
        let screen = &p.hardware.screen;
        let dpr = p.hardware.device_pixel_ratio;
        if screen.height == 0 {
            return;
        }

        let ratio = screen.width as f64 / screen.height as f64;
        if !(1.2..=2.5).contains(&ratio) {
            self.warnings.push(
                ValidationIssue::new(
                    "hardware.screen",
                    format!("unusual aspect ratio {:.2}", ratio),
                    json!([screen.width, screen.height]),
                )
                .with_suggestion("use a common desktop resolution such as 1920x1080"),
            );
        }

        if p.os.r#type == OsType::Macos && dpr < 2.0 {
            self.warnings.push(
                ValidationIssue::new(
                    "hardware.devicePixelRatio",
                    "macOS devices almost always have a Retina display",
                    json!(dpr),
                )
                .with_suggestion("set devicePixelRatio to 2"),
            );
        } else if screen.width >= 3840 && dpr < 1.5 {
            self.warnings.push(
                ValidationIssue::new(
                    "hardware.devicePixelRatio",
                    "4K resolutions are normally scaled",
                    json!(dpr),
                )
                .with_suggestion("set devicePixelRatio to 1.5 or higher"),
            );
        }
    }

    fn navigator(&mut self, p: &FingerprintProfile) {
        let nav = &p.navigator;

        if let Some(first) = nav.languages.first() {
            if *first != nav.language {
                self.warnings.push(
                    ValidationIssue::new(
                        "navigator.language",
                        "language differs from the first entry of languages",
                        json!(nav.language),
                    )
                    .with_suggestion(format!("set language to \"{}\"", first)),
                );
            }
        }

        if nav.webdriver == Some(true) {
            self.warnings.push(
                ValidationIssue::new(
                    "navigator.webdriver",
                    "webdriver flag exposes automation",
                    json!(true),
                )
                .with_suggestion("set webdriver to false"),
            );
        }

        if p.language.locale != nav.language {
            self.warnings.push(
                ValidationIssue::new(
                    "language.locale",
                    "locale differs from navigator.language",
                    json!(p.language.locale),
                )
                .with_suggestion(format!("set locale to \"{}\"", nav.language)),
            );
        }
    }
}
