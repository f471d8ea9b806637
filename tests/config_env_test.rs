use std::env;
use std::fs;

use tempfile::TempDir;
use ybook::Settings;

// Each test sets its own variables; the process environment is shared.

#[test]
fn test_env_override_nested_keys() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("yb.toml");
    fs::write(&path, "[server]\nport = 8000\n").unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("YB_SERVER__PORT", "9999");
        env::set_var("YB_SEARCH__DEFAULT_LIMIT", "42");
    }

    let settings = Settings::load_from(&path).unwrap();

    unsafe {
        env::remove_var("YB_SERVER__PORT");
        env::remove_var("YB_SEARCH__DEFAULT_LIMIT");
    }

    assert_eq!(settings.server.port, 9999, "env beats the file");
    assert_eq!(settings.search.default_limit, 42);
}

#[test]
fn test_env_without_config_file() {
    unsafe {
        env::set_var("YB_SNAPSHOT__ENABLED", "true");
    }

    let settings = Settings::from_env().unwrap();

    unsafe {
        env::remove_var("YB_SNAPSHOT__ENABLED");
    }

    assert!(settings.snapshot.enabled);
}
