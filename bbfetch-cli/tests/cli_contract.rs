//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("bbfetch");
    cmd.env_remove("BBFETCH_OUTPUT_DIR")
        .env_remove("BBFETCH_PORT")
        .env_remove("BBFETCH_CONFIG")
        .env_remove("BBFETCH_NON_INTERACTIVE")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    for flag in ["--help", "-h"] {
        cli_cmd()
            .arg(flag)
            .assert()
            .success()
            .stdout(predicate::str::contains("bbfetch"))
            .stdout(predicate::str::contains("fetch"))
            .stderr(predicate::str::is_empty());
    }
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    for flag in ["--version", "-V"] {
        cli_cmd()
            .arg(flag)
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")))
            .stderr(predicate::str::is_empty());
    }
}

#[test]
fn list_ports_json_is_an_envelope() {
    let output = cli_cmd()
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    // Hosts without a usable serial stack fail, but never with half-written JSON
    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        let parsed: serde_json::Value =
            serde_json::from_str(&stdout).expect("stdout should be JSON");
        assert_eq!(parsed["ok"], true);
        assert!(parsed["data"]["ports"].is_array());
        assert!(parsed["data"]["volumes"].is_array());
    } else {
        assert!(stdout.is_empty());
    }
}

#[test]
fn info_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let missing = dir.path().join("ttyNOPE");

    cli_cmd()
        .args(["info", "--json", "--port"])
        .arg(missing.as_os_str())
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn completions_write_script_to_stdout() {
    cli_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .code(0)
        .stdout(predicate::str::contains("bbfetch"));
}

// ============================================================================
// Exit codes: 0 success, 1 failure, 2 usage, 130 cancelled
// ============================================================================

#[test]
fn exit_code_two_for_missing_subcommand() {
    cli_cmd().assert().failure().code(2);
}

#[test]
fn exit_code_two_for_unknown_command() {
    cli_cmd()
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized"));
}

#[test]
fn exit_code_two_for_invalid_timeout() {
    cli_cmd()
        .args(["fetch", "--timeout", "soon"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_completions_without_shell() {
    cli_cmd()
        .arg("completions")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("specify a shell"));
}

#[test]
fn non_interactive_fetch_requires_yes() {
    let dir = tempdir().expect("tempdir should be created");

    cli_cmd()
        .current_dir(dir.path())
        .args(["--non-interactive", "fetch", "--output-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--yes"));

    // Nothing was copied or created
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn non_interactive_env_var_is_honored() {
    let dir = tempdir().expect("tempdir should be created");

    cli_cmd()
        .current_dir(dir.path())
        .env("BBFETCH_NON_INTERACTIVE", "true")
        .env("BBFETCH_OUTPUT_DIR", dir.path())
        .arg("fetch")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn invalid_config_file_is_a_warning() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("broken.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    cli_cmd()
        .arg("--config")
        .arg(&config)
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Failed to parse config file"));
}
