//! End-to-end tests through the public API
//!
//! Tests for the generate -> validate -> inject -> self-test flow, template
//! persistence across service restarts and worker interception.

use ki_fingerprint::config::FingerprintSettings;
use ki_fingerprint::generator::GenerateOptions;
use ki_fingerprint::injector::{
    IframeOptions, SlotStatus, WorkerInterceptor, WorkerOptions, WorkerScope, WorkerScriptOptions,
    WorkerType,
};
use ki_fingerprint::profile::{BrowserType, FingerprintProfile, OsType};
use ki_fingerprint::seed::NoiseSeed;
use ki_fingerprint::selftest::{ProbeCategory, RunFilter, Suite, TestRunner};
use ki_fingerprint::service::FingerprintService;
use ki_fingerprint::template::{CreateTemplate, ExportOptions, ImportOptions};
use tempfile::TempDir;

const SECRET: &str = "correct horse battery staple";

fn settings(dir: &TempDir) -> FingerprintSettings {
    FingerprintSettings::default()
        .with_template_dir(dir.path())
        .with_seed_secret(SECRET)
}

async fn service(dir: &TempDir) -> FingerprintService {
    let service = FingerprintService::from_settings(&settings(dir)).unwrap();
    service.initialize().await.unwrap();
    service
}

/// The account's profile with its sealed seed opened, as probes need it.
fn opened(service: &FingerprintService, account: &str) -> FingerprintProfile {
    let mut profile = service.profile_for(account).unwrap();
    let seed = service.seeds().open_profile_seed(&profile).unwrap().unwrap();
    profile.noise_seed = Some(NoiseSeed::plain(seed));
    profile
}

// ============================================================================
// Generate -> Validate -> Inject -> Self-Test
// ============================================================================

#[tokio::test]
async fn test_windows_chrome_flow() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir).await;

    let profile = service.generate_for_account(
        "acct-flow",
        GenerateOptions {
            os: Some(OsType::Windows),
            browser: Some(BrowserType::Chrome),
            ..Default::default()
        },
    );
    assert_eq!(profile.os.r#type, OsType::Windows);
    assert_eq!(profile.browser.r#type, BrowserType::Chrome);

    let report = service.validator().validate(&profile);
    assert!(report.errors.is_empty(), "{:?}", report.messages());

    let injector = service.injector_for("acct-flow", None).unwrap();
    let page = injector.injection_script().unwrap();
    assert!(!page.to_lowercase().contains("apple m"));
    assert!(page.contains(&profile.webgl.unmasked_renderer));
    assert!(!page.contains("acct-flow"));

    let mut runner = TestRunner::new();
    runner.run_all(&opened(&service, "acct-flow"), &RunFilter::default());
    let report = runner.generate_report();
    assert_eq!(
        report.pass_rate_for(&[ProbeCategory::Navigator, ProbeCategory::Webgl, ProbeCategory::Screen]),
        100.0,
        "{:?}",
        report.failures
    );
}

#[tokio::test]
async fn test_every_supported_pair_passes_self_test() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir).await;
    let pairs = [
        (OsType::Windows, BrowserType::Chrome),
        (OsType::Windows, BrowserType::Edge),
        (OsType::Windows, BrowserType::Firefox),
        (OsType::Macos, BrowserType::Safari),
        (OsType::Macos, BrowserType::Chrome),
        (OsType::Linux, BrowserType::Chrome),
        (OsType::Linux, BrowserType::Firefox),
    ];

    for (i, (os, browser)) in pairs.into_iter().enumerate() {
        let account = format!("acct-{}", i);
        service.generate_for_account(
            &account,
            GenerateOptions {
                os: Some(os),
                browser: Some(browser),
                seed: Some(i as u64),
                ..Default::default()
            },
        );

        let mut runner = TestRunner::new();
        for suite in Suite::ALL {
            runner.register_suite(*suite);
        }
        runner.run_all(&opened(&service, &account), &RunFilter::default());
        let report = runner.generate_report();
        assert!(report.failures.is_empty(), "{} {}: {:?}", os, browser, report.failures);
    }
}

#[tokio::test]
async fn test_scripts_per_context() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir).await;
    service.generate_for_account("acct-ctx", GenerateOptions::default());
    let injector = service.injector_for("acct-ctx", None).unwrap();

    let page = injector.injection_script().unwrap();
    let iframe = injector.iframe_script(IframeOptions::default()).unwrap();
    let worker = injector
        .worker_script(WorkerScriptOptions {
            worker_type: WorkerType::Dedicated,
        })
        .unwrap();

    assert!(page.contains("const WORKER_BOOTSTRAP"));
    assert!(iframe.contains("const WORKER_BOOTSTRAP"));
    assert!(iframe.contains("window.parent.document"));
    assert!(!worker.contains("const IFRAME_SCRIPT"));
    assert!(worker.contains("if (self[GUARD]) return;"));
    assert_eq!(injector.cached_scripts(), 3);
}

// ============================================================================
// Template Persistence
// ============================================================================

#[tokio::test]
async fn test_templates_survive_restart() {
    let dir = TempDir::new().unwrap();
    let template_id = {
        let first = service(&dir).await;
        let profile = first.generate_for_account("acct-a", GenerateOptions::default());
        first
            .templates()
            .create_template(CreateTemplate::new("Office desktop", profile).with_tags(["office"]))
            .await
            .unwrap()
            .id
    };

    std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let second = service(&dir).await;
    assert_eq!(second.templates().len(), 1);
    let template = second.templates().get_template(&template_id).unwrap();
    assert_eq!(template.tags, vec!["office".to_string()]);
    assert!(template.config.account_id.is_none());

    let applied = second.apply_template(&template_id, "acct-b").unwrap();
    assert_eq!(applied.account_id.as_deref(), Some("acct-b"));
    assert!(applied.noise_seed.as_ref().map_or(false, |s| s.encrypted));
    assert!(second.seeds().open_profile_seed(&applied).unwrap().is_some());
}

#[tokio::test]
async fn test_export_import_between_services() {
    let source_dir = TempDir::new().unwrap();
    let target_dir = TempDir::new().unwrap();
    let source = service(&source_dir).await;
    let target = service(&target_dir).await;

    let template = source
        .templates()
        .create_template(CreateTemplate::new("Laptop", FingerprintProfile::default()))
        .await
        .unwrap();
    let document = source
        .templates()
        .export_template(&template.id, ExportOptions { include_noise_seed: false })
        .unwrap();
    assert!(document["config"].get("noiseSeed").is_none());

    let imported = target
        .templates()
        .import_template(
            &document.to_string(),
            ImportOptions {
                generate_new_id: false,
                new_name: Some("Laptop copy".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(imported.id, template.id);
    assert_eq!(imported.name, "Laptop copy");
    assert!(target_dir.path().join(format!("{}.json", imported.id)).exists());
}

// ============================================================================
// Worker Interception
// ============================================================================

#[test]
fn test_worker_interception_lifecycle() {
    let profile = FingerprintProfile::default().to_value().unwrap();
    let interceptor = WorkerInterceptor::new(&profile).unwrap();
    let pristine = WorkerScope::browser("https://app.example/page");
    let mut scope = pristine.clone();
    let mut state = Default::default();

    assert!(interceptor.initialize(&mut scope, &mut state));
    assert!(!interceptor.initialize(&mut scope, &mut state));
    assert!(interceptor.verify(&scope, &state).is_complete());

    let status = interceptor.verify(&scope, &state);
    assert_eq!(status.service_worker, SlotStatus::Native);
    assert!(!status.covers(WorkerType::Service));

    let spawned = scope
        .worker
        .as_ref()
        .unwrap()
        .spawn("/js/worker.js", &WorkerOptions::default());
    assert!(spawned.url.starts_with("blob:https://app.example/"));
    let source = spawned.source.unwrap();
    assert!(source.starts_with(interceptor.bootstrap()));
    assert!(source.ends_with("importScripts(\"https://app.example/js/worker.js\");\n"));

    let foreign = scope
        .worker
        .as_ref()
        .unwrap()
        .spawn("https://cdn.other/worker.js", &WorkerOptions::default());
    assert_eq!(foreign.url, "https://cdn.other/worker.js");

    let service_worker = scope
        .service_worker_register
        .as_ref()
        .unwrap()
        .spawn("/sw.js", &WorkerOptions::default());
    assert_eq!(service_worker.url, "/sw.js");

    assert!(interceptor.reset(&mut scope, &mut state));
    assert_eq!(scope, pristine);
    assert!(!interceptor.is_initialized(&state));
}
