use pretty_assertions::assert_eq;

use stagehand::config::{self, ConfigFormat};
use stagehand::engine::workflow::JobStep;
use stagehand::engine::{EngineOutput, NodeKind, ASSET_UPLOAD_NODE, SYNTH_NODE};
use stagehand::permissions::{AccessLevel, CONTENTS, PACKAGES};
use stagehand::{compile, Backend, CompiledPipeline};

fn compile_yaml(content: &str) -> CompiledPipeline {
    let config = config::from_str(content, ConfigFormat::Yaml).unwrap();
    compile(&config).unwrap()
}

const DEV_PROD: &str = r#"
stackPrefix: MyApp
packageNamespace: "@acme"
engine: codecatalyst
iamRoleArns:
  default: "arn:aws:iam::123456789012:role/deploy"
stages:
  - name: dev
    env: { account: "111111111111", region: eu-central-1 }
  - name: prod
    env: { account: "222222222222", region: eu-central-1 }
    manualApproval: true
"#;

fn multi_stage(engine: Backend) -> String {
    format!(
        r#"
stackPrefix: MyApp
packageNamespace: "@acme"
engine: {}
iamRoleArns:
  default: "arn:aws:iam::123456789012:role/deploy"
stages:
  - name: dev
    env: {{ account: "111111111111", region: eu-central-1 }}
  - name: staging
    env: {{ account: "222222222222", region: eu-central-1 }}
    manualApproval: true
  - name: prod
    env: {{ account: "333333333333", region: eu-west-1 }}
independentStages:
  - name: qa
    env: {{ account: "444444444444", region: eu-central-1 }}
  - name: sandbox
    env: {{ account: "555555555555", region: us-east-1 }}
    deployOnPush: true
"#,
        engine
    )
}

#[test]
fn dev_prod_on_codecatalyst() {
    let compiled = compile_yaml(DEV_PROD);
    let graph = &compiled.graph;

    assert!(graph.needs(SYNTH_NODE).is_empty());
    assert_eq!(graph.needs(ASSET_UPLOAD_NODE), [SYNTH_NODE.to_string()]);
    assert_eq!(graph.needs("deploy-dev"), [ASSET_UPLOAD_NODE.to_string()]);
    assert_eq!(graph.needs("approve-prod"), ["deploy-dev".to_string()]);
    assert_eq!(graph.needs("deploy-prod"), ["approve-prod".to_string()]);
    assert!(graph.node("approve-prod").unwrap().manual);

    let workflows = match &compiled.output {
        EngineOutput::CodeCatalyst(w) => w,
        other => panic!("unexpected output {:?}", other),
    };
    let names: Vec<_> = workflows.keys().cloned().collect();
    assert_eq!(names, vec!["deploy", "release-prod"]);

    let main = &workflows["deploy"];
    assert!(main.jobs["synth"].needs.is_empty());
    assert!(main.jobs["assetUpload"].needs_job("synth"));
    assert!(main.jobs["deploy-dev"].needs_job("assetUpload"));
    assert!(!main.jobs.contains_key("deploy-prod"));

    let release = &workflows["release-prod"];
    assert!(release.on.is_manual());
    let deploy_prod = &release.jobs["deploy-prod"];
    assert!(deploy_prod
        .scripts()
        .any(|run| run.contains("npm install --no-save @acme/my-app-cdk-assembly@\"$VERSION\"")));
    assert_eq!(deploy_prod.env["VERSION"], "${Inputs.version}");

    let asset_upload = &main.jobs["assetUpload"];
    assert_eq!(asset_upload.permissions.level(CONTENTS), AccessLevel::Write);
    assert_eq!(asset_upload.permissions.level(PACKAGES), AccessLevel::Write);
    assert!(asset_upload
        .scripts()
        .any(|run| run.contains("npx projen bump")));
}

#[test]
fn ordering_holds_on_every_backend() {
    for backend in Backend::ALL {
        let compiled = compile_yaml(&multi_stage(backend));
        let graph = &compiled.graph;
        assert_eq!(compiled.backend, backend);

        assert_eq!(graph.needs(ASSET_UPLOAD_NODE), [SYNTH_NODE.to_string()], "{}", backend);
        assert_eq!(graph.needs("deploy-dev"), [ASSET_UPLOAD_NODE.to_string()], "{}", backend);

        // Approval gate sits between dev and staging.
        assert_eq!(graph.needs("approve-staging"), ["deploy-dev".to_string()], "{}", backend);
        assert_eq!(graph.needs("deploy-staging"), ["approve-staging".to_string()], "{}", backend);

        // prod follows staging directly.
        assert!(
            graph.needs("deploy-prod").contains(&"deploy-staging".to_string()),
            "{}",
            backend
        );

        for independent in ["deploy-qa", "deploy-sandbox"] {
            let node = graph.node(independent).unwrap();
            assert_eq!(node.kind, NodeKind::IndependentDeployment, "{}", backend);
            assert_eq!(node.needs, vec![ASSET_UPLOAD_NODE.to_string()], "{}", backend);
        }
        assert!(graph.node("deploy-qa").unwrap().manual, "{}", backend);
        assert!(!graph.node("deploy-sandbox").unwrap().manual, "{}", backend);
    }
}

#[test]
fn asset_upload_reads_contents_without_approval() {
    let content = DEV_PROD
        .replace("engine: codecatalyst", "engine: github")
        .replace("    manualApproval: true\n", "");
    let compiled = compile_yaml(&content);
    let workflows = match &compiled.output {
        EngineOutput::Github(w) => w,
        other => panic!("unexpected output {:?}", other),
    };
    assert_eq!(workflows.len(), 1);
    let job = &workflows["deploy"].jobs["assetUpload"];
    assert_eq!(job.permissions.level(CONTENTS), AccessLevel::Read);
    assert_eq!(job.permissions.level(PACKAGES), AccessLevel::None);
    assert!(workflows["deploy"].jobs["deploy-prod"].needs_job("deploy-dev"));
}

#[test]
fn recompiling_is_byte_identical() {
    for backend in Backend::ALL {
        let content = multi_stage(backend);
        let first = compile_yaml(&content).files().unwrap();
        let second = compile_yaml(&content).files().unwrap();
        assert_eq!(first, second, "{}", backend);
    }
}

#[test]
fn json_and_yaml_configs_compile_alike() {
    let yaml = config::from_str(DEV_PROD, ConfigFormat::Yaml).unwrap();
    let json = config::from_str(
        r#"{
  "stackPrefix": "MyApp",
  "packageNamespace": "@acme",
  "engine": "codecatalyst",
  "iamRoleArns": { "default": "arn:aws:iam::123456789012:role/deploy" },
  "stages": [
    { "name": "dev", "env": { "account": "111111111111", "region": "eu-central-1" } },
    { "name": "prod", "env": { "account": "222222222222", "region": "eu-central-1" }, "manualApproval": true }
  ]
}"#,
        ConfigFormat::Json,
    )
    .unwrap();

    let from_yaml = compile(&yaml).unwrap().files().unwrap();
    let from_json = compile(&json).unwrap().files().unwrap();
    assert_eq!(from_yaml, from_json);
}

#[test]
fn github_workflow_yaml_parses_back() {
    let compiled = compile_yaml(&multi_stage(Backend::Github));
    let files = compiled.files().unwrap();
    let deploy = files
        .iter()
        .find(|f| f.path == ".github/workflows/deploy.yml")
        .unwrap();
    assert!(deploy.content.starts_with("# Generated by stagehand"));

    let doc: serde_yml::Value = serde_yml::from_str(&deploy.content).unwrap();
    assert_eq!(doc["on"]["push"]["branches"][0].as_str(), Some("main"));
    assert_eq!(
        doc["jobs"]["synth"]["permissions"]["id-token"].as_str(),
        Some("write")
    );

    let release = files
        .iter()
        .find(|f| f.path == ".github/workflows/release-staging.yml")
        .unwrap();
    let doc: serde_yml::Value = serde_yml::from_str(&release.content).unwrap();
    assert_eq!(
        doc["on"]["workflow_dispatch"]["inputs"]["version"]["required"].as_bool(),
        Some(true)
    );
}

#[test]
fn gitlab_file_keeps_section_order() {
    let compiled = compile_yaml(&multi_stage(Backend::Gitlab));
    let files = compiled.files().unwrap();
    let ci = &files[0];
    assert_eq!(ci.path, ".gitlab-ci.yml");

    let stages = ci.content.find("stages:").unwrap();
    let base = ci.content.find(".aws_base").unwrap();
    let synth = ci.content.find("\nsynth:").unwrap();
    assert!(stages < base && base < synth);
}

#[test]
fn bash_script_is_executable() {
    let compiled = compile_yaml(&multi_stage(Backend::Bash));
    let files = compiled.files().unwrap();
    let script = files.iter().find(|f| f.path == "pipeline.sh").unwrap();
    assert!(script.executable);
    assert!(script.content.contains("task_approve_staging || exit 1"));
    assert!(files.iter().all(|f| f.path == "pipeline.sh" || !f.executable));
}

#[test]
fn missing_role_fails_compilation() {
    let content = DEV_PROD.replace(
        "iamRoleArns:\n  default: \"arn:aws:iam::123456789012:role/deploy\"\n",
        "",
    );
    let config = config::from_str(&content, ConfigFormat::Yaml).unwrap();
    let err = compile(&config).unwrap_err();
    assert_eq!(err.code, stagehand::ErrorCode::ConfigRoleUnresolved);
}

#[test]
fn upload_artifact_on_gitlab_is_rejected() {
    let content = multi_stage(Backend::Gitlab).replace(
        "    deployOnPush: true\n",
        "    deployOnPush: true\n    postDeploySteps:\n      - type: uploadArtifact\n        name: report\n        path: report.json\n",
    );
    let config = config::from_str(&content, ConfigFormat::Yaml).unwrap();
    let err = compile(&config).unwrap_err();
    assert_eq!(err.code, stagehand::ErrorCode::StepUnsupportedBackend);
    assert_eq!(err.details["backend"], "gitlab");
}

fn per_stage_publishing(engine: Backend) -> String {
    format!(
        r#"
stackPrefix: MyApp
packageNamespace: "@acme"
engine: {}
iamRoleArns:
  default: "arn:aws:iam::123456789012:role/deploy"
  assetPublishingPerStage:
    dev: "arn:aws:iam::111111111111:role/assets-dev"
    prod: "arn:aws:iam::222222222222:role/assets-prod"
stages:
  - name: dev
    env: {{ account: "111111111111", region: eu-central-1 }}
  - name: prod
    env: {{ account: "222222222222", region: eu-west-1 }}
"#,
        engine
    )
}

/// Asset upload job of any backend flattened to lines; role actions become
/// `--role-arn <arn>` so every backend reads alike.
fn asset_upload_lines(compiled: &CompiledPipeline) -> Vec<String> {
    match &compiled.output {
        EngineOutput::Github(workflows) | EngineOutput::CodeCatalyst(workflows) => workflows
            ["deploy"]
            .jobs["assetUpload"]
            .steps
            .iter()
            .flat_map(|step| match step {
                JobStep::Uses { with, .. } => with
                    .get("role-to-assume")
                    .map(|role| vec![format!("--role-arn {}", role)])
                    .unwrap_or_default(),
                JobStep::Run { run, .. } => run.lines().map(str::to_string).collect(),
            })
            .collect(),
        EngineOutput::Gitlab(ci) => ci.job("publish_assets").unwrap().script.clone(),
        EngineOutput::Bash(script) => script.task("publish-assets").unwrap().commands.clone(),
    }
}

#[test]
fn per_stage_asset_roles_publish_each_manifest() {
    for backend in Backend::ALL {
        let compiled = compile_yaml(&per_stage_publishing(backend));
        let lines = asset_upload_lines(&compiled);
        let position = |needle: &str| {
            lines
                .iter()
                .position(|l| l.contains(needle))
                .unwrap_or_else(|| panic!("{}: no line with {:?} in {:#?}", backend, needle, lines))
        };

        let dev_role = position("--role-arn arn:aws:iam::111111111111:role/assets-dev");
        let dev_publish = position("npx cdk-assets --path cdk.out/MyApp-dev.assets.json --verbose publish");
        let prod_role = position("--role-arn arn:aws:iam::222222222222:role/assets-prod");
        let prod_publish = position("npx cdk-assets --path cdk.out/MyApp-prod.assets.json --verbose publish");
        assert!(
            dev_role < dev_publish && dev_publish < prod_role && prod_role < prod_publish,
            "{}",
            backend
        );

        // The pipeline-wide publish over the whole assembly is replaced.
        assert!(
            lines.iter().all(|l| !l.contains("--path cdk.out --verbose")),
            "{}",
            backend
        );
        assert!(
            lines.iter().all(|l| !l.contains("role/deploy ")),
            "{}",
            backend
        );
    }
}

#[test]
fn stage_names_with_spaces_yield_flat_file_names() {
    let content = DEV_PROD
        .replace("engine: codecatalyst", "engine: github")
        .replace("    manualApproval: true\n", "")
        .replace("name: dev", "name: dev 2");
    let compiled = compile_yaml(&content);
    let workflows = match &compiled.output {
        EngineOutput::Github(w) => w,
        other => panic!("unexpected output {:?}", other),
    };
    let job = &workflows["deploy"].jobs["deploy-dev-2"];
    let upload = job
        .steps
        .iter()
        .find_map(|s| match s {
            JobStep::Uses { uses, with, .. } if uses == "actions/upload-artifact@v4" => Some(with),
            _ => None,
        })
        .unwrap();
    assert_eq!(upload["name"], "dev-2-outputs");
    assert_eq!(upload["path"], "cdk-outputs-dev-2.json");
    assert!(job.scripts().any(|s| s.contains(" deploy MyApp-dev-2")));
}

#[test]
fn slash_in_stage_name_is_rejected() {
    let content = DEV_PROD.replace("name: dev", "name: feature/foo");
    let err = config::from_str(&content, ConfigFormat::Yaml).unwrap_err();
    assert_eq!(err.code, stagehand::ErrorCode::ConfigInvalidValue);
    assert_eq!(err.details["key"], "stages[0].name");
}
