use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const MATRIX: &str = r#"[
    { "platform": "Android", "deviceName": "Pixel 6", "platformVersion": "13",
      "app": { "appId": "io.appium.android.apis" } },
    { "platform": "iOS", "deviceName": "iPhone 15", "platformVersion": "17.0",
      "app": { "appId": "com.example.app" } }
]"#;

const PLAN: &str = r#"{
    "name": "views",
    "selectors": {
        "android": { "views": "//android.widget.TextView[@text=\"Views\"]" },
        "ios": { "views": "//XCUIElementTypeCell[@name=\"Views\"]" }
    },
    "steps": [
        { "name": "navigate", "action": "click", "selector": "views" },
        { "action": "tap", "selector": "~ok" },
        { "action": "assert_text", "selector": "~title", "expected": "Views" }
    ]
}"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        Self { dir }
    }

    fn file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn mobitest(&self) -> Command {
        let mut cmd = Command::cargo_bin("mobitest").unwrap();
        cmd.arg("--config").arg(self.path("config.json"));
        cmd
    }
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_help_exits_zero() {
    Command::cargo_bin("mobitest")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mobitest"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_validate_reports_devices_and_ports() {
    let fx = Fixture::new();
    let matrix = fx.file("devices.json", MATRIX);
    let plan = fx.file("plan.json", PLAN);

    fx.mobitest()
        .args(["validate", "--matrix", arg(&matrix), "--plan", arg(&plan)])
        .assert()
        .success()
        .stdout(predicate::str::contains("plan 'views': 3 steps, 2 devices"))
        .stdout(predicate::str::contains("Pixel 6 (Android 13) (port 8200)"))
        .stdout(predicate::str::contains("iPhone 15 (iOS 17.0) (port 8100)"));
}

#[test]
fn test_validate_json_output() {
    let fx = Fixture::new();
    let matrix = fx.file("devices.json", MATRIX);
    let plan = fx.file("plan.json", PLAN);

    let assert = fx
        .mobitest()
        .args(["--format", "json", "validate", "-m", arg(&matrix), "-p", arg(&plan)])
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(report["valid"], true);
    assert_eq!(report["steps"], 3);
    assert_eq!(report["devices"].as_array().unwrap().len(), 2);
}

#[test]
fn test_validate_flags_wrong_platform_selector() {
    let fx = Fixture::new();
    let matrix = fx.file("devices.json", MATRIX);
    let plan = fx.file(
        "plan.json",
        r#"{ "name": "android only", "steps": [
            { "action": "click", "selector": "uiautomator:new UiSelector().text(\"OK\")" }
        ] }"#,
    );

    fx.mobitest()
        .args(["validate", "-m", arg(&matrix), "-p", arg(&plan)])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("problem: iPhone 15"))
        .stdout(predicate::str::contains("problem: Pixel 6").not());
}

#[test]
fn test_validate_missing_file() {
    let fx = Fixture::new();
    let plan = fx.file("plan.json", PLAN);

    fx.mobitest()
        .args(["validate", "-m", "does-not-exist.json", "-p", arg(&plan)])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does-not-exist.json"));
}

#[test]
fn test_validate_bad_json() {
    let fx = Fixture::new();
    let matrix = fx.file("devices.json", MATRIX);
    let plan = fx.file("plan.json", "{ \"name\": ");

    fx.mobitest()
        .args(["validate", "-m", arg(&matrix), "-p", arg(&plan)])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("JSON error"));
}

#[test]
fn test_validate_empty_matrix() {
    let fx = Fixture::new();
    let matrix = fx.file("devices.json", r#"{ "capabilities": [] }"#);
    let plan = fx.file("plan.json", PLAN);

    fx.mobitest()
        .args(["validate", "-m", arg(&matrix), "-p", arg(&plan)])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("contains no capability sets"));
}

#[test]
fn test_run_against_unreachable_endpoint_reports_errors() {
    let fx = Fixture::new();
    let matrix = fx.file("devices.json", MATRIX);
    let plan = fx.file("plan.json", PLAN);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let assert = fx
        .mobitest()
        .args([
            "--format",
            "json",
            "run",
            "-m",
            arg(&matrix),
            "-p",
            arg(&plan),
            "--endpoint",
            &format!("127.0.0.1:{port}"),
            "--artifacts",
            arg(&fx.path("artifacts")),
        ])
        .assert()
        .code(1);

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["summary"]["total"], 2);
    assert_eq!(report["summary"]["errored"], 2);

    let sessions = report["sessions"].as_array().unwrap();
    assert_eq!(sessions[0]["device"], "Pixel 6 (Android 13)");
    assert_eq!(sessions[1]["device"], "iPhone 15 (iOS 17.0)");
    for session in sessions {
        assert_eq!(session["outcome"], "Error");
        assert!(session["steps"].as_array().unwrap().is_empty());
    }
}

#[test]
fn test_run_rejects_bad_endpoint() {
    let fx = Fixture::new();
    let matrix = fx.file("devices.json", MATRIX);
    let plan = fx.file("plan.json", PLAN);

    fx.mobitest()
        .args(["run", "-m", arg(&matrix), "-p", arg(&plan), "--endpoint", "localhost"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("has no port"));
}

#[test]
fn test_unknown_subcommand() {
    Command::cargo_bin("mobitest")
        .unwrap()
        .arg("totally-fake-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
