use std::process::Command;
use tempfile::TempDir;

#[test]
fn test_new_command() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();

    let output = Command::new(env!("CARGO_BIN_EXE_yb"))
        .arg("new")
        .current_dir(temp_path)
        .output()
        .expect("Failed to run new command");
    assert!(output.status.success());

    let content = std::fs::read_to_string(temp_path.join("yb.toml")).unwrap();
    assert!(content.contains("[server]"));
    assert!(content.contains("[rate_limit]"));
    assert!(temp_path.join("blog/intro.md").exists());

    // A second run refuses to overwrite
    let output = Command::new(env!("CARGO_BIN_EXE_yb"))
        .arg("new")
        .current_dir(temp_path)
        .output()
        .expect("Failed to run new command");
    assert!(!output.status.success());
}

#[test]
fn test_config_command() {
    let temp_dir = TempDir::new().unwrap();
    let temp_path = temp_dir.path();
    std::fs::write(
        temp_path.join("site.toml"),
        "[server]\nport = 9123\n\n[rate_limit]\nper_minute = 77\n",
    )
    .unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_yb"))
        .args(["config", "--config", "site.toml"])
        .current_dir(temp_path)
        .output()
        .expect("Failed to run config command");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("port = 9123"));
    assert!(stdout.contains("per_minute = 77"));
}
