#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::{tempdir, TempDir};

use stagehand::config::{self, ConfigFormat};
use stagehand::{compile, Backend};

const WITH_ROLE: &str = r#"
stackPrefix: MyApp
packageNamespace: "@acme"
engine: bash
iamRoleArns:
  default: "arn:aws:iam::123456789012:role/deploy"
stages:
  - name: dev
    env: { account: "123456789012", region: eu-central-1 }
"#;

const FAILING_POST_DIFF: &str = r#"
stackPrefix: MyApp
packageNamespace: "@acme"
engine: bash
roleFallback: ambient
stages:
  - name: dev
    env: { account: "123456789012", region: eu-central-1 }
    postDiffSteps:
      - type: command
        commands: ["false", "echo AFTER_FAILURE"]
"#;

fn stub(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// Project directory holding the compiled `pipeline.sh` and a `bin/` of
/// stand-ins for the tools it calls. `aws` always fails.
fn project(content: &str) -> TempDir {
    let config = config::from_str(content, ConfigFormat::Yaml).unwrap();
    let compiled = compile(&config).unwrap();
    assert_eq!(compiled.backend, Backend::Bash);

    let dir = tempdir().unwrap();
    let script = compiled
        .files()
        .unwrap()
        .into_iter()
        .find(|f| f.path == "pipeline.sh")
        .unwrap();
    std::fs::write(dir.path().join("pipeline.sh"), script.content).unwrap();

    let bin = dir.path().join("bin");
    std::fs::create_dir(&bin).unwrap();
    stub(&bin, "aws", "echo AWS_FAILED >&2\nexit 1");
    stub(&bin, "npx", "echo \"RAN npx $*\"");
    stub(&bin, "npm", "echo \"RAN npm $*\"");
    stub(&bin, "node", "echo 1.0.0");
    dir
}

fn run(dir: &TempDir, args: &[&str]) -> Output {
    let path = format!(
        "{}:{}",
        dir.path().join("bin").display(),
        std::env::var("PATH").unwrap_or_default()
    );
    Command::new("bash")
        .arg("pipeline.sh")
        .args(args)
        .current_dir(dir.path())
        .env("PATH", path)
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn failed_role_assumption_stops_named_task() {
    let dir = project(WITH_ROLE);
    let output = run(&dir, &["deploy-dev"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("AWS_FAILED"));
    let out = stdout(&output);
    assert!(!out.contains("RAN npx"), "ran after failed assume-role:\n{}", out);
}

#[test]
fn failed_role_assumption_stops_main_sequence() {
    let dir = project(WITH_ROLE);
    let output = run(&dir, &[]);

    assert!(!output.status.success());
    let out = stdout(&output);
    assert!(!out.contains("deploy MyApp-dev"), "deployed anyway:\n{}", out);
    assert!(!out.contains("cdk-assets"), "published anyway:\n{}", out);
}

#[test]
fn failing_step_stops_task_run_by_name() {
    let dir = project(FAILING_POST_DIFF);
    let output = run(&dir, &["deploy-dev"]);

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("diff MyApp-dev"));
    assert!(!out.contains("AFTER_FAILURE"), "{}", out);
    assert!(!out.contains("deploy MyApp-dev"), "{}", out);
}

#[test]
fn failing_step_stops_main_sequence() {
    let dir = project(FAILING_POST_DIFF);
    let output = run(&dir, &[]);

    assert_eq!(output.status.code(), Some(1));
    let out = stdout(&output);
    assert!(out.contains("RAN npx cdk synth"));
    assert!(!out.contains("AFTER_FAILURE"), "{}", out);
    assert!(!out.contains("deploy MyApp-dev"), "{}", out);
}

#[test]
fn unknown_task_is_an_error() {
    let dir = project(FAILING_POST_DIFF);
    let output = run(&dir, &["deploy-nowhere"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown task: deploy-nowhere"));
}
