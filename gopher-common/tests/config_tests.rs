//! Configuration resolution tests
//!
//! These touch process environment variables, so they run serially.

use gopher_common::config::{
    load_config_file, resolve_burrow_config, write_toml_config, BurrowConfig, TrustMode, CONFIG_ENV_VAR,
    CONFIG_REQUIRED_ENV_VAR,
};
use gopher_common::Error;
use serial_test::serial;
use std::env;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, port: u16) -> std::path::PathBuf {
    let mut config = BurrowConfig::default();
    config.server.port = port;
    let path = dir.path().join(name);
    write_toml_config(&config, &path).unwrap();
    path
}

fn clear_env() {
    env::remove_var(CONFIG_ENV_VAR);
    env::remove_var(CONFIG_REQUIRED_ENV_VAR);
}

#[test]
#[serial]
fn test_cli_path_wins_over_environment() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let from_cli = write_config(&dir, "cli.toml", 4100);
    let from_env = write_config(&dir, "env.toml", 4200);
    env::set_var(CONFIG_ENV_VAR, &from_env);

    let (config, source) = resolve_burrow_config(Some(&from_cli)).unwrap();
    assert_eq!(config.server.port, 4100);
    assert_eq!(source, Some(from_cli));

    let (config, source) = resolve_burrow_config(None).unwrap();
    assert_eq!(config.server.port, 4200);
    assert_eq!(source, Some(from_env));
    clear_env();
}

#[test]
#[serial]
fn test_explicit_missing_file_is_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    env::set_var(CONFIG_ENV_VAR, dir.path().join("absent.toml"));

    let err = resolve_burrow_config(None).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    clear_env();
}

#[test]
#[serial]
fn test_invalid_file_is_rejected() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[gatherer]\nwait_for_ok_retries = 0\n").unwrap();

    assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    assert!(resolve_burrow_config(Some(&path)).is_err());
}

#[test]
#[serial]
fn test_written_file_round_trips() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let mut config = BurrowConfig::default();
    config.ingest.trust_mode = TrustMode::Trusted;
    config.retention.missing_purge_after_days = Some(90);
    let path = dir.path().join("nested").join("burrow.toml");

    write_toml_config(&config, &path).unwrap();
    assert_eq!(load_config_file(&path).unwrap(), config);
}
