use alerts::config::{ConfigError, ConfigLoader};
use alerts::models::Role;
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("ALERTS_"))
        .collect();
    for key in keys {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

fn loader_for(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(dir.path().to_path_buf())
}

#[test]
fn loads_defaults_with_only_an_ingest_token() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("ALERTS_INGEST_TOKEN", "ingest-secret");
    }

    let cfg = loader_for(&dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.ingest_tokens, vec!["ingest-secret".to_string()]);
    assert!(cfg.viewer_tokens.is_empty());
    assert_eq!(cfg.severity.low, 0.5);
    assert_eq!(cfg.dispatch.send_timeout_ms, 250);
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    write_env_file(
        &dir,
        ".env",
        "ALERTS_PROFILE=staging\nALERTS_LOG_LEVEL=warn\nALERTS_INGEST_TOKENS=a,b\n",
    );
    write_env_file(&dir, ".env.local", "ALERTS_API_BIND_ADDR=127.0.0.1:9000\n");
    write_env_file(&dir, ".env.staging", "ALERTS_LOG_LEVEL=debug\n");
    write_env_file(
        &dir,
        ".env.staging.local",
        "ALERTS_DISPATCH_SEND_TIMEOUT_MS=500\nIGNORED_KEY=1\n",
    );

    let cfg = loader_for(&dir).load().expect("layered config loads");

    assert_eq!(cfg.profile, "staging");
    assert_eq!(cfg.api_bind_addr, "127.0.0.1:9000");
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.ingest_tokens, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(cfg.dispatch.send_timeout_ms, 500);
    clear_env();
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "ALERTS_LOG_LEVEL=warn\nALERTS_INGEST_TOKEN=from-file\n",
    );
    unsafe {
        env::set_var("ALERTS_LOG_LEVEL", "trace");
    }

    let cfg = loader_for(&dir).load().unwrap();

    assert_eq!(cfg.log_level, "trace");
    assert_eq!(cfg.ingest_tokens, vec!["from-file".to_string()]);
    clear_env();
}

#[test]
fn viewer_tokens_are_parsed_per_entry() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    let tenant = uuid::Uuid::new_v4();
    write_env_file(
        &dir,
        ".env",
        &format!(
            "ALERTS_INGEST_TOKEN=i\nALERTS_VIEWER_TOKENS=t1|root|admin, t2|bob|analyst|{tenant}, t3|carol|client|{tenant}|acct-9\n"
        ),
    );

    let cfg = loader_for(&dir).load().unwrap();

    assert_eq!(cfg.viewer_tokens.len(), 3);
    assert_eq!(cfg.viewer_tokens[0].role, Role::Admin);
    assert_eq!(cfg.viewer_tokens[1].tenant_scope, Some(tenant));
    assert_eq!(cfg.viewer_tokens[2].owner_id.as_deref(), Some("acct-9"));
    clear_env();
}

#[test]
fn malformed_viewer_token_is_rejected_without_echoing_the_secret() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "ALERTS_INGEST_TOKEN=i\nALERTS_VIEWER_TOKENS=supersecret|bob|analyst|not-a-uuid\n",
    );

    let err = loader_for(&dir).load().unwrap_err();

    assert!(matches!(err, ConfigError::InvalidViewerToken { .. }));
    assert!(!err.to_string().contains("supersecret"));
    clear_env();
}

#[test]
fn unordered_severity_thresholds_fail_to_load() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "ALERTS_INGEST_TOKEN=i\nALERTS_SEVERITY_MEDIUM=0.9\nALERTS_SEVERITY_HIGH=0.8\n",
    );

    let err = loader_for(&dir).load().unwrap_err();

    assert!(matches!(err, ConfigError::InvalidSeverityThresholds { .. }));
    clear_env();
}

#[test]
fn missing_ingest_tokens_only_allowed_in_test_profile() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();

    let err = loader_for(&dir).load().unwrap_err();
    assert!(matches!(err, ConfigError::MissingIngestTokens));

    unsafe {
        env::set_var("ALERTS_PROFILE", "test");
    }
    let cfg = loader_for(&dir).load().unwrap();
    assert_eq!(cfg.profile, "test");
    assert!(cfg.ingest_tokens.is_empty());
    clear_env();
}

#[test]
fn non_numeric_values_name_the_offending_key() {
    let _guard = env_guard();
    clear_env();
    let dir = TempDir::new().unwrap();
    write_env_file(
        &dir,
        ".env",
        "ALERTS_INGEST_TOKEN=i\nALERTS_STORE_TIMEOUT_MS=soon\n",
    );

    let err = loader_for(&dir).load().unwrap_err();

    match err {
        ConfigError::InvalidValue { key, value } => {
            assert_eq!(key, "ALERTS_STORE_TIMEOUT_MS");
            assert_eq!(value, "soon");
        }
        other => panic!("unexpected error {other:?}"),
    }
    clear_env();
}
