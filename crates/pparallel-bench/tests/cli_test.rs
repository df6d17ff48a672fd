use assert_cmd::Command;

fn bench() -> Command {
    let mut cmd = Command::cargo_bin("pparallel-bench").unwrap();
    cmd.env_remove("DATABASE_URL")
        .env_remove("RUST_LOG")
        .args(["--log.format", "plain"]);
    cmd
}

#[test]
fn non_positive_header_line_count_exits_with_failure() {
    let output = bench()
        .args(["--header-line-count", "0", "--file", "Cargo.toml"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("execution failed"), "stderr: {stderr}");
}

#[test]
fn unreadable_input_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.csv");

    let output = bench().arg("--file").arg(&missing).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn invalid_connection_string_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("queries.csv");
    std::fs::write(&input, "host_1\n").unwrap();

    let output = bench()
        .args(["--connection", "host='unterminated"])
        .arg("--file")
        .arg(&input)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn version_is_printed() {
    let output = bench().arg("--version").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("pparallel-bench "), "stdout: {stdout}");
}
