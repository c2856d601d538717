//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("greflash")
}

/// Write a well-formed firmware file: platform byte, 24-bit BE size, payload.
fn write_firmware(path: &std::path::Path, platform: u8, payload: &[u8]) {
    let mut data = vec![platform];
    data.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
    data.extend_from_slice(payload);
    fs::write(path, data).expect("write firmware file");
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("greflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("greflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn list_ports_json_returns_valid_json() {
    // In environments without serial ports this still exercises the JSON path
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&stdout) {
        assert!(parsed.is_array(), "list-ports --json should be an array");
    }
}

#[test]
fn info_prints_platform_and_packet_count() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir.path().join("ws1080.bin");
    write_firmware(&firmware, 0xE6, &[0u8; 120]);

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg(&firmware)
        .assert()
        .success()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("WS1080"))
        .stderr(predicate::str::contains("120"));
}

#[test]
fn info_json_reports_firmware_fields() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir.path().join("ws1080.bin");
    write_firmware(&firmware, 0xE6, &[0u8; 120]);

    let mut cmd = cli_cmd();
    let output = cmd
        .arg("info")
        .arg("--json")
        .arg(&firmware)
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");

    assert_eq!(parsed["platform"], "WS1080");
    assert_eq!(parsed["platform_code"], "0xE6");
    assert_eq!(parsed["size"], 120);
    assert_eq!(parsed["data_packets"], 3);
}

#[test]
fn info_rejects_malformed_firmware() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir.path().join("truncated.bin");
    // Header declares 100 bytes but the file carries 3
    fs::write(&firmware, [0xE6, 0x00, 0x00, 0x64, 0x01, 0x02, 0x03]).expect("write file");

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg(&firmware)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn info_json_error_keeps_stdout_clean() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("not_exists.bin");

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg("--json")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

// ============================================================================
// Exit Code Tests - Following CLI Standards Contract
// ============================================================================

/// Exit code 0: successful operations
#[test]
fn exit_code_zero_on_success() {
    let mut cmd = cli_cmd();
    cmd.arg("--help").assert().success().code(0);

    let mut cmd = cli_cmd();
    cmd.arg("--version").assert().success().code(0);

    // completions bash exits 0 (doesn't require hardware)
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"]).assert().success().code(0);
}

/// Exit code 2: usage error (unknown command, invalid arguments)
#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz").assert().failure().code(2);
}

#[test]
fn exit_code_two_for_missing_upload_operand() {
    let mut cmd = cli_cmd();
    cmd.arg("upload")
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("FIRMWARE").or(predicate::str::contains("firmware")));
}

/// Exit code 1: generic error fallback
#[test]
fn exit_code_one_for_unexpected_error() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("does_not_exist.bin");

    let mut cmd = cli_cmd();
    cmd.arg("info").arg(nonexistent.as_os_str()).assert().failure().code(1);
}

#[test]
fn upload_with_invalid_port_fails_without_hardware() {
    let dir = tempdir().expect("tempdir should be created");
    let firmware = dir.path().join("ws1080.bin");
    write_firmware(&firmware, 0xE6, &[0u8; 10]);

    let mut cmd = cli_cmd();
    let output = cmd
        .arg("--quiet")
        .arg("--port")
        .arg("INVALID_PORT_NAME_XYZ")
        .arg("upload")
        .arg(&firmware)
        .output()
        .expect("command should execute");

    assert!(
        !output.status.success(),
        "upload to a nonexistent port should not succeed"
    );
}

// ============================================================================
// Configuration Handling
// ============================================================================

#[test]
fn invalid_config_warns_but_continues() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("greflash.toml");
    fs::write(&config, "invalid toml [[[").expect("write invalid config");

    let mut cmd = cli_cmd();
    let output = cmd
        .arg("--config")
        .arg(&config)
        .arg("list-ports")
        .output()
        .expect("command should execute");

    assert!(
        output.status.success(),
        "command should succeed despite config warning"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

// ============================================================================
// stdout/stderr Separation Tests
// ============================================================================

#[test]
fn upload_errors_write_to_stderr_only() {
    let dir = tempdir().expect("tempdir should be created");
    let nonexistent = dir.path().join("missing.bin");

    let mut cmd = cli_cmd();
    cmd.arg("upload")
        .arg(nonexistent.as_os_str())
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_empty().not());
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("_greflash()"));
}

#[test]
fn json_output_is_valid_json_without_extra_lines() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(&stdout);
    if let Ok(val) = parsed {
        assert!(val.is_array(), "list-ports --json should return an array");
    }
}

// ============================================================================
// -- Option Terminator Tests
// ============================================================================

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    let dir = tempdir().expect("tempdir should be created");
    let test_file = dir.path().join("test.bin");

    let mut cmd = cli_cmd();
    cmd.arg("info")
        .arg("--")
        .arg(test_file)
        .assert()
        .failure(); // File doesn't exist, but parses correctly
}

// ============================================================================
// TTY Detection Tests (colors/animations disabled on non-TTY)
// ============================================================================

#[test]
fn colors_disabled_when_not_tty() {
    let mut cmd = cli_cmd();
    let output = cmd.arg("--help").assert().success().get_output().clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "Colors should be disabled in non-TTY mode"
    );
}

// ============================================================================
// Environment Variable Tests
// ============================================================================

#[test]
fn port_environment_variable_is_recognized() {
    // GREFLASH_PORT feeds the global --port flag; --version avoids hardware
    let mut cmd = cli_cmd();
    cmd.env("GREFLASH_PORT", "/dev/ttyUSB0")
        .arg("--version")
        .assert()
        .success();
}
