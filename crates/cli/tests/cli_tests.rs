//! CLI integration tests

use std::process::Command;

fn topoctl(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_topoctl"))
        .args(args)
        .env_remove("TOPOCTL_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = topoctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("adaptive coordination controller"),
        "Should show app description"
    );
    for command in [
        "status",
        "switches",
        "performance",
        "agents",
        "breakers",
        "recommend",
        "submit",
        "dispatch",
        "config",
    ] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = topoctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("topoctl"), "Should show binary name");
}

#[test]
fn test_submit_help() {
    let output = topoctl(&["submit", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Submit help should succeed");
    assert!(stdout.contains("--expected-results"));
    assert!(stdout.contains("--strong-consistency"));
    assert!(stdout.contains("--sequential"));
}

#[test]
fn test_performance_help() {
    let output = topoctl(&["performance", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Performance help should succeed");
    assert!(stdout.contains("--limit"));
    assert!(stdout.contains("--window"));
}

#[test]
fn test_invalid_format_is_rejected() {
    let output = topoctl(&["--format", "yaml", "status"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("yaml"));
}

#[test]
fn test_unreachable_daemon_exits_with_error() {
    // Port 9 (discard) is not expected to serve HTTP
    let output = topoctl(&["--api-url", "http://127.0.0.1:9", "status"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}
