//! KI-Fingerprint - Main Entry Point
//!
//! Command-line front end for profile generation, validation, script
//! injection, self-tests and template management.

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ki_fingerprint::{
    config::{CliArgs, FingerprintSettings},
    generator::{repair, GenerateOptions},
    injector::{IframeOptions, Injector, WorkerScriptOptions, WorkerType},
    profile::{FingerprintProfile, SuggestedReport},
    seed::NoiseSeed,
    selftest::{ProbeCategory, RunFilter, Suite, TestReport, TestRunner},
    service::FingerprintService,
    template::{CreateTemplate, ExportOptions, ImportOptions},
    NAME, VERSION,
};

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const BLUE: &str = "\x1b[34m";
}

/// Print the banner with version and ASCII art
fn print_banner() {
    println!(
        r#"
{cyan}{bold}  _  ___       _____ _                                  _       _
 | |/ (_)     |  ___(_)_ __   __ _  ___ _ __ _ __  _ __(_)_ __ | |_
 | ' /| |_____| |_  | | '_ \ / _` |/ _ \ '__| '_ \| '__| | '_ \| __|
 | . \| |_____|  _| | | | | | (_| |  __/ |  | |_) | |  | | | | | |_
 |_|\_\_|     |_|   |_|_| |_|\__, |\___|_|  | .__/|_|  |_|_| |_|\__|
                             |___/          |_|
{reset}
{dim}  Consistent Browser Fingerprints per Account{reset}
{dim}  Version: {version}{reset}
"#,
        cyan = colors::CYAN,
        bold = colors::BOLD,
        reset = colors::RESET,
        dim = colors::DIM,
        version = VERSION
    );
}

fn enabled(flag: bool) -> String {
    if flag {
        format!("{green}enabled{reset}", green = colors::GREEN, reset = colors::RESET)
    } else {
        format!("{yellow}disabled{reset}", yellow = colors::YELLOW, reset = colors::RESET)
    }
}

/// Print configuration summary
fn print_config_summary(settings: &FingerprintSettings, service: &FingerprintService) {
    println!(
        "{bold}{blue}Configuration:{reset}",
        bold = colors::BOLD,
        blue = colors::BLUE,
        reset = colors::RESET
    );
    println!(
        "  {dim}Templates:{reset}          {} ({} loaded)",
        settings.template_dir.display(),
        service.templates().len(),
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!(
        "  {dim}Default target:{reset}     {} / {}",
        settings
            .default_os
            .map_or_else(|| "weighted".to_string(), |os| os.to_string()),
        settings
            .default_browser
            .map_or_else(|| "weighted".to_string(), |b| b.to_string()),
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!(
        "  {dim}Noise level:{reset}        {}",
        settings.default_noise_level,
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!(
        "  {dim}Strict validation:{reset}  {}",
        enabled(settings.strict_validation),
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!(
        "  {dim}Worker interceptor:{reset} {}",
        enabled(settings.include_worker_interceptor),
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!(
        "  {dim}Iframe protection:{reset}  {}",
        enabled(settings.include_iframe_protection),
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!(
        "  {dim}Script budget:{reset}      {}ms",
        settings.performance_budget_ms,
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!(
        "  {dim}Seed secret:{reset}        {}",
        if settings.seed_secret.is_some() {
            format!("{green}configured{reset}", green = colors::GREEN, reset = colors::RESET)
        } else {
            format!("{yellow}ephemeral{reset}", yellow = colors::YELLOW, reset = colors::RESET)
        },
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!(
        "  {dim}Spoof modules:{reset}      {}",
        Injector::available_modules().join(", "),
        dim = colors::DIM,
        reset = colors::RESET
    );

    let stats = service.generator().corpus().stats();
    println!(
        "  {dim}Corpus:{reset}             {} entries, {} GPU configs",
        stats.total_entries,
        stats.gpu_configs,
        dim = colors::DIM,
        reset = colors::RESET
    );
    println!();
}

fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("FILE")
        .help("Write to FILE instead of stdout")
        .value_parser(clap::value_parser!(PathBuf))
}

fn file_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .value_name("FILE")
        .help(help)
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .help("Print the result as JSON")
        .action(ArgAction::SetTrue)
}

/// Build the CLI command parser
fn build_cli() -> Command {
    Command::new(NAME)
        .version(VERSION)
        .author("KI-Browser Team")
        .about("Consistent, camouflaged browser fingerprints per account")
        .long_about(
            "KI-Fingerprint generates and injects spoofed browser fingerprints:\n\
             - Corpus-backed profile generation\n\
             - Cross-surface consistency validation\n\
             - Page, iframe and worker injection scripts\n\
             - Sealed noise seeds and reusable templates",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file (TOML or JSON)")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("template-dir")
                .long("template-dir")
                .value_name("DIR")
                .help("Directory holding template documents")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Treat foreign OS fonts as errors")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("noise-level")
                .long("noise-level")
                .value_name("LEVEL")
                .help("Canvas and audio noise level of generated profiles")
                .global(true)
                .value_parser(["off", "low", "medium", "high"]),
        )
        .arg(
            Arg::new("budget")
                .long("budget")
                .value_name("MS")
                .help("Script generation budget in milliseconds")
                .global(true)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress output except errors")
                .global(true)
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
        .subcommand(Command::new("info").about("Show the resolved configuration"))
        .subcommand(
            Command::new("generate")
                .about("Generate fingerprint profiles")
                .arg(
                    Arg::new("os")
                        .long("os")
                        .value_name("OS")
                        .help("Target operating system")
                        .value_parser(["windows", "macos", "linux"]),
                )
                .arg(
                    Arg::new("browser")
                        .long("browser")
                        .value_name("BROWSER")
                        .help("Target browser")
                        .value_parser(["chrome", "firefox", "safari", "edge"]),
                )
                .arg(
                    Arg::new("account")
                        .long("account")
                        .value_name("ID")
                        .help("Account the profile belongs to"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_name("N")
                        .help("Make every choice except identity and noise seed reproducible")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("count")
                        .short('n')
                        .long("count")
                        .value_name("COUNT")
                        .help("Number of profiles")
                        .default_value("1")
                        .value_parser(clap::value_parser!(u64).range(1..=1000)),
                )
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Check a profile for consistency")
                .arg(file_arg("file", "Profile JSON file"))
                .arg(
                    Arg::new("repair")
                        .long("repair")
                        .help("Print a repaired copy of the profile")
                        .action(ArgAction::SetTrue),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("inject")
                .about("Compile the injection script for a profile")
                .arg(file_arg("file", "Profile JSON file"))
                .arg(
                    Arg::new("context")
                        .long("context")
                        .value_name("CONTEXT")
                        .help("Execution context to compile for")
                        .default_value("page")
                        .value_parser(["page", "preload", "iframe", "worker"]),
                )
                .arg(
                    Arg::new("worker-type")
                        .long("worker-type")
                        .value_name("TYPE")
                        .help("Worker flavour for --context worker")
                        .default_value("dedicated")
                        .value_parser(["dedicated", "shared", "service"]),
                )
                .arg(
                    Arg::new("cross-origin")
                        .long("cross-origin")
                        .help("Also apply inside frames whose parent is on another origin")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("minify")
                        .long("minify")
                        .help("Strip comments and indentation")
                        .action(ArgAction::SetTrue),
                )
                .arg(output_arg()),
        )
        .subcommand(
            Command::new("selftest")
                .about("Run detection probes against a profile")
                .arg(
                    Arg::new("file")
                        .value_name("FILE")
                        .help("Profile JSON file; a fresh profile is generated when omitted")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("suite")
                        .long("suite")
                        .value_name("SUITE")
                        .help("Add a third-party-style probe suite")
                        .action(ArgAction::Append)
                        .value_parser(["browserleaks-style", "pixelscan-style"]),
                )
                .arg(
                    Arg::new("category")
                        .long("category")
                        .value_name("CATEGORY")
                        .help("Only run probes of CATEGORY")
                        .action(ArgAction::Append),
                )
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("template")
                .about("Manage fingerprint templates")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List stored templates").arg(json_arg()))
                .subcommand(
                    Command::new("create")
                        .about("Create a template from a profile")
                        .arg(file_arg("file", "Profile JSON file"))
                        .arg(
                            Arg::new("name")
                                .long("name")
                                .value_name("NAME")
                                .required(true)
                                .help("Template name"),
                        )
                        .arg(
                            Arg::new("description")
                                .long("description")
                                .value_name("TEXT")
                                .help("Template description"),
                        )
                        .arg(
                            Arg::new("tag")
                                .long("tag")
                                .value_name("TAG")
                                .help("Tag the template (repeatable)")
                                .action(ArgAction::Append),
                        ),
                )
                .subcommand(
                    Command::new("export")
                        .about("Export a template document")
                        .arg(Arg::new("id").value_name("ID").required(true))
                        .arg(
                            Arg::new("no-seed")
                                .long("no-seed")
                                .help("Leave the noise seed out of the export")
                                .action(ArgAction::SetTrue),
                        )
                        .arg(output_arg()),
                )
                .subcommand(
                    Command::new("import")
                        .about("Import an exported template document")
                        .arg(file_arg("file", "Exported template JSON file"))
                        .arg(
                            Arg::new("keep-id")
                                .long("keep-id")
                                .help("Keep the document's id instead of assigning a new one")
                                .action(ArgAction::SetTrue),
                        )
                        .arg(
                            Arg::new("name")
                                .long("name")
                                .value_name("NAME")
                                .help("Rename the imported template"),
                        ),
                )
                .subcommand(
                    Command::new("delete")
                        .about("Delete a template")
                        .arg(Arg::new("id").value_name("ID").required(true)),
                )
                .subcommand(
                    Command::new("apply")
                        .about("Derive an account profile from a template")
                        .arg(Arg::new("id").value_name("ID").required(true))
                        .arg(
                            Arg::new("account")
                                .long("account")
                                .value_name("ID")
                                .required(true)
                                .help("Account the profile belongs to"),
                        )
                        .arg(output_arg()),
                ),
        )
}

/// Parse CLI arguments into CliArgs struct
fn parse_cli_args(matches: &ArgMatches) -> CliArgs {
    let mut args = CliArgs::default();

    args.config_file = matches.get_one::<PathBuf>("config").cloned();
    args.template_dir = matches.get_one::<PathBuf>("template-dir").cloned();
    args.performance_budget_ms = matches.get_one::<u64>("budget").copied();
    args.noise_level = matches
        .get_one::<String>("noise-level")
        .and_then(|level| level.parse().ok());

    if matches.get_flag("strict") {
        args.strict_validation = Some(true);
    }

    if let Some(("generate", sub)) = matches.subcommand() {
        args.default_os = sub.get_one::<String>("os").and_then(|os| os.parse().ok());
        args.default_browser = sub
            .get_one::<String>("browser")
            .and_then(|browser| browser.parse().ok());
    }
    if let Some(("inject", sub)) = matches.subcommand() {
        if sub.get_flag("minify") {
            args.minify = Some(true);
        }
    }

    args
}

/// Initialize the tracing/logging subsystem
fn init_tracing(verbosity: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn write_output(path: Option<&PathBuf>, contents: &str) -> Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, contents)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = contents.len(), "Wrote output");
        }
        None => println!("{}", contents),
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn read_profile(path: &Path) -> Result<FingerprintProfile> {
    FingerprintProfile::from_value(read_json(path)?)
        .with_context(|| format!("{} is not a fingerprint profile", path.display()))
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .with_context(|| format!("Missing argument: {}", name))
}

fn required_path<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a PathBuf> {
    matches
        .get_one::<PathBuf>(name)
        .with_context(|| format!("Missing argument: {}", name))
}

fn cmd_generate(
    service: &FingerprintService,
    settings: &FingerprintSettings,
    matches: &ArgMatches,
) -> Result<()> {
    let options = GenerateOptions {
        account_id: matches.get_one::<String>("account").cloned(),
        os: settings.default_os,
        browser: settings.default_browser,
        seed: matches.get_one::<u64>("seed").copied(),
    };
    let count = matches.get_one::<u64>("count").copied().unwrap_or(1) as usize;

    let mut profiles = service
        .generator()
        .generate_batch(count, &options)
        .context("Failed to generate profile")?;

    // Sealing with an ephemeral key would make the seed unrecoverable.
    if settings.seed_secret.is_some() {
        for profile in &mut profiles {
            service.seeds().seal_profile_seed(profile)?;
        }
    } else {
        warn!("No seed secret configured; noise seeds are written in clear");
    }

    let json = match profiles.as_slice() {
        [profile] => profile.to_json_pretty()?,
        many => serde_json::to_string_pretty(many)?,
    };
    write_output(matches.get_one::<PathBuf>("output"), &json)
}

fn print_validation(suggested: &SuggestedReport) {
    let report = &suggested.report;
    for issue in &report.errors {
        println!(
            "{red}error{reset}   {bold}{}{reset}: {}",
            issue.field,
            issue.reason,
            red = colors::RED,
            bold = colors::BOLD,
            reset = colors::RESET
        );
    }
    for issue in &report.warnings {
        println!(
            "{yellow}warning{reset} {bold}{}{reset}: {}",
            issue.field,
            issue.reason,
            yellow = colors::YELLOW,
            bold = colors::BOLD,
            reset = colors::RESET
        );
    }
    for suggestion in &suggested.suggestions {
        println!(
            "  {dim}-> {}: {}{reset}",
            suggestion.field,
            suggestion.suggestion,
            dim = colors::DIM,
            reset = colors::RESET
        );
    }
    if report.valid {
        println!(
            "{green}{bold}valid{reset} ({} warning(s))",
            report.warnings.len(),
            green = colors::GREEN,
            bold = colors::BOLD,
            reset = colors::RESET
        );
    }
}

fn cmd_validate(service: &FingerprintService, matches: &ArgMatches) -> Result<()> {
    let path = required_path(matches, "file")?;
    let profile = read_profile(path)?;

    if matches.get_flag("repair") {
        let repaired = repair(&profile);
        let report = service.validator().validate(&repaired);
        println!("{}", repaired.to_json_pretty()?);
        if !report.valid {
            bail!(
                "{} still has {} error(s) after repair",
                path.display(),
                report.errors.len()
            );
        }
        return Ok(());
    }

    let suggested = service.validator().validate_with_suggestions(&profile);
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&suggested)?);
    } else {
        print_validation(&suggested);
    }

    if !suggested.report.valid {
        bail!(
            "{} failed validation with {} error(s)",
            path.display(),
            suggested.report.errors.len()
        );
    }
    Ok(())
}

fn worker_type(name: &str) -> WorkerType {
    match name {
        "shared" => WorkerType::Shared,
        "service" => WorkerType::Service,
        _ => WorkerType::Dedicated,
    }
}

fn cmd_inject(
    service: &FingerprintService,
    settings: &FingerprintSettings,
    matches: &ArgMatches,
) -> Result<()> {
    let path = required_path(matches, "file")?;
    let profile_json = read_json(path)?;

    let injector = Injector::new(&profile_json, settings.injector_options())
        .with_context(|| format!("Cannot build injector for {}", path.display()))?
        .with_seed_manager(Arc::clone(service.seeds()))
        .with_validator(service.validator().clone());

    let report = injector.validate();
    for warning in &report.warnings {
        warn!(field = %warning.field, "{}", warning.reason);
    }
    if !report.valid {
        bail!("Profile is invalid: {}", report.messages().join("; "));
    }

    let context = matches
        .get_one::<String>("context")
        .map(String::as_str)
        .unwrap_or("page");
    let script = match context {
        "preload" => injector.preload_script()?,
        "iframe" => injector.iframe_script(IframeOptions {
            same_origin_only: !matches.get_flag("cross-origin"),
        })?,
        "worker" => injector.worker_script(WorkerScriptOptions {
            worker_type: worker_type(required(matches, "worker-type")?),
        })?,
        _ => injector.injection_script()?,
    };

    if let Some(elapsed) = injector.generation_time() {
        info!(context, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "Compiled script");
    }
    write_output(matches.get_one::<PathBuf>("output"), &script)
}

fn print_report(report: &TestReport) {
    println!(
        "{bold}{blue}Self-test:{reset} {}/{} passed ({:.1}%) in {:.1}ms",
        report.passed,
        report.total,
        report.pass_rate,
        report.duration_ms,
        bold = colors::BOLD,
        blue = colors::BLUE,
        reset = colors::RESET
    );
    for (category, summary) in &report.categories {
        let color = if summary.failed == 0 { colors::GREEN } else { colors::RED };
        println!(
            "  {dim}{:<12}{reset} {color}{}/{}{reset}",
            category.as_str(),
            summary.passed,
            summary.total,
            dim = colors::DIM,
            color = color,
            reset = colors::RESET
        );
    }
    for failure in &report.failures {
        println!(
            "  {red}FAIL{reset} {bold}{}{reset}: expected {}, got {}",
            failure.name,
            failure.expected,
            failure.actual,
            red = colors::RED,
            bold = colors::BOLD,
            reset = colors::RESET
        );
        if let Some(ref error) = failure.error {
            println!("       {dim}{}{reset}", error, dim = colors::DIM, reset = colors::RESET);
        }
    }
}

fn cmd_selftest(service: &FingerprintService, matches: &ArgMatches) -> Result<()> {
    let mut profile = match matches.get_one::<PathBuf>("file") {
        Some(path) => read_profile(path)?,
        None => service.generator().generate_or_default(GenerateOptions::default()),
    };
    // Noise probes need the cleartext seed.
    if profile.plain_seed().is_none() {
        match service.seeds().open_profile_seed(&profile) {
            Ok(Some(seed)) => profile.noise_seed = Some(NoiseSeed::plain(seed)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Cannot open noise seed; noise probes will be skipped"),
        }
    }

    let mut runner = TestRunner::new();
    if let Some(suites) = matches.get_many::<String>("suite") {
        for suite in suites {
            runner.register_suite(suite.parse::<Suite>()?);
        }
    }

    let filter = match matches.get_many::<String>("category") {
        Some(categories) => RunFilter::categories(
            categories
                .map(|c| c.parse::<ProbeCategory>())
                .collect::<Result<Vec<_>, _>>()?,
        ),
        None => RunFilter::default(),
    };

    runner.run_all(&profile, &filter);
    let report = runner.generate_report();
    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.failed > 0 {
        bail!("{} probe(s) failed", report.failed);
    }
    Ok(())
}

async fn cmd_template(service: &FingerprintService, matches: &ArgMatches) -> Result<()> {
    let templates = service.templates();
    match matches.subcommand() {
        Some(("list", sub)) => {
            let list = templates.list_templates();
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&list)?);
                return Ok(());
            }
            if list.is_empty() {
                println!("{dim}No templates{reset}", dim = colors::DIM, reset = colors::RESET);
            }
            for template in list {
                println!(
                    "{cyan}{}{reset}  {bold}{}{reset}  {dim}{} v{}{reset}  {}",
                    template.id,
                    template.name,
                    template.config.label(),
                    template.version,
                    template.tags.join(", "),
                    cyan = colors::CYAN,
                    bold = colors::BOLD,
                    dim = colors::DIM,
                    reset = colors::RESET
                );
            }
        }
        Some(("create", sub)) => {
            let profile = read_profile(required_path(sub, "file")?)?;
            let mut input = CreateTemplate::new(required(sub, "name")?.clone(), profile);
            if let Some(description) = sub.get_one::<String>("description") {
                input = input.with_description(description.clone());
            }
            if let Some(tags) = sub.get_many::<String>("tag") {
                input = input.with_tags(tags.cloned());
            }
            let template = templates.create_template(input).await?;
            println!("{}", template.id);
        }
        Some(("export", sub)) => {
            let document = templates.export_template(
                required(sub, "id")?,
                ExportOptions {
                    include_noise_seed: !sub.get_flag("no-seed"),
                },
            )?;
            write_output(
                sub.get_one::<PathBuf>("output"),
                &serde_json::to_string_pretty(&document)?,
            )?;
        }
        Some(("import", sub)) => {
            let path = required_path(sub, "file")?;
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let template = templates
                .import_template(
                    &json,
                    ImportOptions {
                        generate_new_id: !sub.get_flag("keep-id"),
                        new_name: sub.get_one::<String>("name").cloned(),
                    },
                )
                .await?;
            println!("{}", template.id);
        }
        Some(("delete", sub)) => {
            templates.delete_template(required(sub, "id")?).await?;
        }
        Some(("apply", sub)) => {
            let profile = service.apply_template(required(sub, "id")?, required(sub, "account")?)?;
            write_output(sub.get_one::<PathBuf>("output"), &profile.to_json_pretty()?)?;
        }
        _ => bail!("Unknown template command"),
    }
    Ok(())
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let matches = build_cli().get_matches();

    // Get verbosity settings before loading config
    let verbosity = matches.get_count("verbose");
    let quiet = matches.get_flag("quiet");

    init_tracing(verbosity, quiet);

    // Load configuration with full precedence chain
    let settings = parse_cli_args(&matches)
        .load_settings()
        .context("Failed to load configuration")?;

    let service =
        FingerprintService::from_settings(&settings).context("Failed to create fingerprint service")?;
    service
        .initialize()
        .await
        .context("Failed to initialize fingerprint service")?;

    match matches.subcommand() {
        Some(("info", _)) => {
            if !quiet {
                print_banner();
            }
            print_config_summary(&settings, &service);
            Ok(())
        }
        Some(("generate", sub)) => cmd_generate(&service, &settings, sub),
        Some(("validate", sub)) => cmd_validate(&service, sub),
        Some(("inject", sub)) => cmd_inject(&service, &settings, sub),
        Some(("selftest", sub)) => cmd_selftest(&service, sub),
        Some(("template", sub)) => cmd_template(&service, sub).await,
        _ => bail!("Unknown command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ki_fingerprint::{noise::NoiseLevel, profile::OsType};

    #[test]
    fn test_cli_requires_subcommand() {
        let cmd = build_cli();
        assert!(cmd.clone().try_get_matches_from(["ki-fingerprint"]).is_err());
        assert!(cmd.try_get_matches_from(["ki-fingerprint", "info"]).is_ok());
    }

    #[test]
    fn test_cli_generate_parsing() {
        let matches = build_cli()
            .try_get_matches_from([
                "ki-fingerprint",
                "generate",
                "--os",
                "linux",
                "--browser",
                "firefox",
                "--seed",
                "42",
                "-n",
                "3",
            ])
            .unwrap();

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "generate");
        assert_eq!(sub.get_one::<u64>("seed"), Some(&42));
        assert_eq!(sub.get_one::<u64>("count"), Some(&3));
    }

    #[test]
    fn test_cli_rejects_unknown_values() {
        let cmd = build_cli();
        assert!(cmd
            .clone()
            .try_get_matches_from(["ki-fingerprint", "generate", "--os", "beos"])
            .is_err());
        assert!(cmd
            .clone()
            .try_get_matches_from(["ki-fingerprint", "generate", "-n", "0"])
            .is_err());
        assert!(cmd
            .try_get_matches_from(["ki-fingerprint", "inject", "p.json", "--context", "tab"])
            .is_err());
    }

    #[test]
    fn test_cli_conflicts() {
        let result = build_cli().try_get_matches_from(["ki-fingerprint", "-v", "-q", "info"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_cli_args() {
        let matches = build_cli()
            .try_get_matches_from([
                "ki-fingerprint",
                "--template-dir",
                "/tmp/templates",
                "--noise-level",
                "high",
                "--strict",
                "generate",
                "--os",
                "macos",
            ])
            .unwrap();

        let args = parse_cli_args(&matches);

        assert_eq!(args.template_dir, Some(PathBuf::from("/tmp/templates")));
        assert_eq!(args.noise_level, Some(NoiseLevel::High));
        assert_eq!(args.strict_validation, Some(true));
        assert_eq!(args.default_os, Some(OsType::Macos));
        assert_eq!(args.minify, None);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["ki-fingerprint", "inject", "p.json", "--minify", "-vv"])
            .unwrap();
        assert_eq!(matches.get_count("verbose"), 2);

        let args = parse_cli_args(&matches);
        assert_eq!(args.minify, Some(true));
    }

    #[test]
    fn test_template_subcommands() {
        let matches = build_cli()
            .try_get_matches_from([
                "ki-fingerprint",
                "template",
                "create",
                "profile.json",
                "--name",
                "Office",
                "--tag",
                "a",
                "--tag",
                "b",
            ])
            .unwrap();
        let (_, template) = matches.subcommand().unwrap();
        let (name, create) = template.subcommand().unwrap();
        assert_eq!(name, "create");
        let tags: Vec<&String> = create.get_many::<String>("tag").unwrap().collect();
        assert_eq!(tags, ["a", "b"]);

        assert!(build_cli()
            .try_get_matches_from(["ki-fingerprint", "template", "apply", "id-1"])
            .is_err());
    }

    #[test]
    fn test_worker_type_names() {
        assert_eq!(worker_type("shared"), WorkerType::Shared);
        assert_eq!(worker_type("service"), WorkerType::Service);
        assert_eq!(worker_type("dedicated"), WorkerType::Dedicated);
    }
}
