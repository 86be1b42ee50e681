use asset_sync_core::config::{OutputFormat, ResizePolicy, TargetSize};
use clap::Parser;
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

use sync_assets::cli::Cli;
use sync_assets::load_config::{load_config, FileConfig, RunSettings, DEFAULT_MANIFEST};

const ENV_KEYS: &[&str] = &[
    "SYNC_ASSETS_MANIFEST",
    "SYNC_ASSETS_OUT",
    "SYNC_ASSETS_CONCURRENCY",
    "SYNC_ASSETS_SIZE",
    "SYNC_ASSETS_FORMAT",
    "SYNC_ASSETS_TIMEOUT",
    "SYNC_ASSETS_RETRIES",
    "SYNC_ASSETS_RESIZE",
    "SYNC_ASSETS_NO_TRANSPARENCY",
    "SYNC_ASSETS_RUN_TIMEOUT",
    "SYNC_ASSETS_REPORT",
    "SYNC_ASSETS_CONFIG",
    "SYNC_ASSETS_ALLOW_HTTP",
];

fn clear_env() {
    for key in ENV_KEYS {
        env::remove_var(key);
    }
}

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

/// A full config file is parsed into typed values.
#[test]
#[serial]
fn test_load_config_all_keys() {
    let file = config_file(
        r#"
manifest: docs/logos.yaml
out: docs/assets/logos
concurrency: 4
sizes: [32x32, 64x64]
format: webp
timeout: 10s
retries: 1
resize: fill
preserve_transparency: false
run_timeout: 2m
report: build/sync-report.json
allow_http: true
"#,
    );

    let config = load_config(file.path()).expect("Config should load");
    assert_eq!(config.manifest, Some(PathBuf::from("docs/logos.yaml")));
    assert_eq!(config.out, Some(PathBuf::from("docs/assets/logos")));
    assert_eq!(config.concurrency, Some(4));
    assert_eq!(
        config.sizes,
        vec![TargetSize::new(32, 32), TargetSize::new(64, 64)]
    );
    assert_eq!(config.format, Some(OutputFormat::Webp));
    assert_eq!(config.timeout, Some(Duration::from_secs(10)));
    assert_eq!(config.retries, Some(1));
    assert_eq!(config.resize, Some(ResizePolicy::Fill));
    assert_eq!(config.preserve_transparency, Some(false));
    assert_eq!(config.run_timeout, Some(Duration::from_secs(120)));
    assert_eq!(config.allow_http, Some(true));
}

#[test]
#[serial]
fn test_load_config_empty_file_is_all_defaults() {
    let file = config_file("");
    assert_eq!(load_config(file.path()).unwrap(), FileConfig::default());
}

#[test]
#[serial]
fn test_load_config_errors_for_invalid_file() {
    let file = config_file("not-yaml: [:::");
    let err = load_config(file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

#[test]
#[serial]
fn test_load_config_rejects_unknown_keys_and_bad_values() {
    for yaml in ["destinaton: typo\n", "sizes: [32]\n", "timeout: soon\n"] {
        let file = config_file(yaml);
        assert!(load_config(file.path()).is_err(), "should reject: {yaml}");
    }
}

#[test]
#[serial]
fn test_defaults_without_config_file() {
    clear_env();
    let cli = Cli::try_parse_from(["sync-assets", "--out", "assets"]).unwrap();
    let settings = RunSettings::resolve(&cli, FileConfig::default()).unwrap();

    assert_eq!(settings.manifest, PathBuf::from(DEFAULT_MANIFEST));
    assert_eq!(settings.sync.destination, PathBuf::from("assets"));
    assert_eq!(settings.sync.concurrency, 8);
    assert_eq!(settings.sync.options.sizes, vec![TargetSize::new(64, 64)]);
    assert_eq!(settings.sync.options.format, OutputFormat::Png);
    assert!(settings.sync.options.preserve_transparency);
    assert_eq!(settings.sync.options.resize, ResizePolicy::Fit);
    assert_eq!(settings.sync.retry.max_retries, 3);
    assert_eq!(settings.request_timeout, Duration::from_secs(30));
    assert_eq!(settings.sync.run_timeout, None);
    assert!(!settings.sync.allow_http);
    assert_eq!(settings.report, None);
}

#[test]
#[serial]
fn test_flags_override_config_file() {
    clear_env();
    let file = config_file(
        r#"
out: from-file
concurrency: 4
sizes: [16x16]
format: webp
retries: 5
"#,
    );
    let cli = Cli::try_parse_from([
        "sync-assets",
        "--out",
        "from-flag",
        "--size",
        "32x32",
        "--size",
        "32x32",
        "--size",
        "64x64",
        "--timeout",
        "500ms",
        "--no-transparency",
    ])
    .unwrap();
    let settings = RunSettings::resolve(&cli, load_config(file.path()).unwrap()).unwrap();

    assert_eq!(settings.sync.destination, PathBuf::from("from-flag"));
    assert_eq!(settings.sync.concurrency, 4, "file value kept when no flag");
    assert_eq!(
        settings.sync.options.sizes,
        vec![TargetSize::new(32, 32), TargetSize::new(64, 64)],
        "repeated sizes collapse"
    );
    assert_eq!(settings.sync.options.format, OutputFormat::Webp);
    assert!(!settings.sync.options.preserve_transparency);
    assert_eq!(settings.sync.retry.max_retries, 5);
    assert_eq!(settings.request_timeout, Duration::from_millis(500));
}

#[test]
#[serial]
fn test_environment_fallbacks() {
    clear_env();
    env::set_var("SYNC_ASSETS_OUT", "env-assets");
    env::set_var("SYNC_ASSETS_CONCURRENCY", "2");
    env::set_var("SYNC_ASSETS_SIZE", "24x24,48x48");
    env::set_var("SYNC_ASSETS_FORMAT", "jpg");

    let cli = Cli::try_parse_from(["sync-assets"]).unwrap();
    let settings = RunSettings::resolve(&cli, FileConfig::default()).unwrap();
    clear_env();

    assert_eq!(settings.sync.destination, PathBuf::from("env-assets"));
    assert_eq!(settings.sync.concurrency, 2);
    assert_eq!(
        settings.sync.options.sizes,
        vec![TargetSize::new(24, 24), TargetSize::new(48, 48)]
    );
    assert_eq!(settings.sync.options.format, OutputFormat::Jpeg);
}

#[test]
#[serial]
fn test_zero_concurrency_and_missing_out_are_rejected() {
    clear_env();
    let cli = Cli::try_parse_from(["sync-assets", "--out", "assets", "--concurrency", "0"]).unwrap();
    assert!(RunSettings::resolve(&cli, FileConfig::default()).is_err());

    let cli = Cli::try_parse_from(["sync-assets"]).unwrap();
    let err = RunSettings::resolve(&cli, FileConfig::default()).unwrap_err();
    assert!(err.to_string().contains("--out"));
}
