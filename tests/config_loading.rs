use crewtrace_core::config::AppConfig;
use crewtrace_core::CrewError;
use crewtrace_test_utils::temp_toml;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[tracing]
enabled = true
capture_artifacts = false

[events]
capacity = 256

[recording]
dir = "/tmp/crewtrace-recordings"
auto_save = true
pretty = false

[recording.labels]
team = "research"
env = "ci"

[log]
filter = "crewtrace=debug,warn"
"#;

    let tmp = temp_toml(toml_content);

    let config = AppConfig::load(tmp.path()).expect("Failed to load config");

    assert!(config.tracing.enabled);
    assert!(!config.tracing.capture_artifacts);
    assert_eq!(config.events.capacity, 256);
    assert!(config.recording.auto_save);
    assert!(!config.recording.pretty);
    assert_eq!(config.recording.labels["team"], "research");
    assert_eq!(
        config.recording_dir(),
        std::path::PathBuf::from("/tmp/crewtrace-recordings")
    );
    assert_eq!(config.log.filter, "crewtrace=debug,warn");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = temp_toml("[events]\ncapacity = 64\n");

    let config = AppConfig::load(tmp.path()).unwrap();
    assert_eq!(config.events.capacity, 64);
    assert!(config.tracing.enabled);
    assert!(config.tracing.capture_artifacts);
    assert!(!config.recording.auto_save);
    assert!(config.recording.labels.is_empty());
}

#[test]
fn test_env_vars_expanded_in_file() {
    std::env::set_var("CREWTRACE_TEST_RECORDING_DIR", "/var/tmp/runs");
    let tmp = temp_toml("[recording]\ndir = \"${CREWTRACE_TEST_RECORDING_DIR}\"\n");

    let config = AppConfig::load(tmp.path()).unwrap();
    assert_eq!(config.recording.dir, "/var/tmp/runs");
}

#[test]
fn test_missing_file_is_config_not_found() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/crewtrace.toml")).unwrap_err();
    assert!(matches!(err, CrewError::ConfigNotFound(_)));

    let config = AppConfig::load_or_default(std::path::Path::new("/nonexistent/crewtrace.toml")).unwrap();
    assert_eq!(config.events.capacity, 1024);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let tmp = temp_toml("[events]\ncapacity = \"lots\"\n");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, CrewError::Config(_)));
}
