//! Integration tests for the `podcov init` and `podcov percent` commands,
//! run against the built binary.

use std::io::Write;
use std::process::{Command, Output, Stdio};

fn podcov(args: &[&str], config_home: &std::path::Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_podcov"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run podcov")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_writes_config_and_refuses_overwrite() {
    let home = tempfile::TempDir::new().unwrap();

    let first = podcov(
        &[
            "init",
            "--replicas",
            "3",
            "--entry-url",
            "http://svc.internal:8080",
            "--cover-dir",
            "/var/cover",
        ],
        home.path(),
    );
    assert!(first.status.success(), "init failed: {first:?}");

    let path = home.path().join("podcov").join("config.toml");
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("replicas = 3"), "got:\n{contents}");
    assert!(contents.contains("http://svc.internal:8080"));
    assert!(contents.contains("/var/cover"));

    let second = podcov(&["init"], home.path());
    assert!(!second.status.success());
    assert!(String::from_utf8_lossy(&second.stderr).contains("already exists"));

    let forced = podcov(&["init", "--force"], home.path());
    assert!(forced.status.success());
    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.contains("replicas = 1"), "got:\n{contents}");
}

#[test]
fn percent_reads_report_file() {
    let home = tempfile::TempDir::new().unwrap();
    let report = home.path().join("report.txt");
    std::fs::write(
        &report,
        "\tex/a\tex/b\tcoverage: 100.0% of statements\n\tex/c\t\tcoverage: 50.0% of statements\n",
    )
    .unwrap();

    let output = podcov(&["percent", report.to_str().unwrap()], home.path());
    assert!(output.status.success(), "percent failed: {output:?}");
    assert!(
        stdout(&output).starts_with("Total Average Coverage: 50.00%\n"),
        "got: {}",
        stdout(&output)
    );
}

#[test]
fn percent_reads_stdin() {
    let home = tempfile::TempDir::new().unwrap();
    let mut child = Command::new(env!("CARGO_BIN_EXE_podcov"))
        .args(["percent", "-"])
        .env("XDG_CONFIG_HOME", home.path())
        .env("RUST_LOG", "off")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to run podcov");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"\tex/a\t\tcoverage: 25.0% of statements\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    assert!(stdout(&output).starts_with("Total Average Coverage: 25.00%\n"));
}

#[test]
fn percent_rejects_unparseable_report() {
    let home = tempfile::TempDir::new().unwrap();
    let report = home.path().join("report.txt");
    std::fs::write(&report, "\tex/a\t\tcoverage: [no statements]\n").unwrap();

    let output = podcov(&["percent", report.to_str().unwrap()], home.path());
    assert!(!output.status.success());
}
