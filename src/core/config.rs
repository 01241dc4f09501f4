//! Pipeline configuration: file loading, defaults and validation.
//!
//! The configuration file is YAML, JSON or TOML (picked by extension) with
//! camelCase keys. [`RawPipelineConfig`] mirrors the file;
//! [`PipelineConfig`] is the validated, immutable form the compiler uses.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::Backend;
use crate::error::{Error, Result};
use crate::local_files::{self, FileSystem};
use crate::roles::{IamRoleConfig, RoleFallback};
use crate::slugify;
use crate::stage::{
    FeatureStageConfig, PersonalStageConfig, StageConfig, StageSet, FEATURE_STAGE, PERSONAL_STAGE,
};
use crate::utils::validation;

// ============================================================================
// Raw configuration (file shape)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPipelineConfig {
    pub stack_prefix: String,
    pub package_namespace: String,
    #[serde(default = "default_branch_name")]
    pub branch_name: String,
    #[serde(default = "default_cdk_out")]
    pub cdk_out: String,
    #[serde(default)]
    pub deploy_sub_stacks: bool,

    /// Explicit engine name; see [`select_backend`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default)]
    pub role_fallback: RoleFallback,

    #[serde(default = "default_install_command")]
    pub install_command: String,
    #[serde(default = "default_synth_command")]
    pub synth_command: String,
    #[serde(default = "default_bump_command")]
    pub bump_command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_package: Option<String>,

    #[serde(default)]
    pub pre_install_commands: Vec<String>,
    #[serde(default)]
    pub pre_synth_commands: Vec<String>,
    #[serde(default)]
    pub post_synth_commands: Vec<String>,

    #[serde(default)]
    pub iam_role_arns: IamRoleConfig,

    #[serde(default)]
    pub stages: Vec<StageConfig>,
    #[serde(default)]
    pub independent_stages: Vec<StageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_stage: Option<PersonalStageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_stages: Option<FeatureStageConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GithubOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codecatalyst: Option<CodeCatalystOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<GitlabOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bash: Option<BashOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubOptions {
    #[serde(default = "default_github_runner_tags")]
    pub runner_tags: Vec<String>,
    /// Scope deployment jobs to a GitHub environment named after the stage.
    #[serde(default)]
    pub use_environments: bool,
    #[serde(default = "default_node_version")]
    pub node_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeCatalystOptions {
    #[serde(default = "default_codecatalyst_runner_tags")]
    pub runner_tags: Vec<String>,
    #[serde(default)]
    pub use_environments: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitlabOptions {
    #[serde(default)]
    pub runner_tags: Vec<String>,
    #[serde(default = "default_gitlab_image")]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BashOptions {
    /// Emit `set -euo pipefail` at the top of the script.
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for GithubOptions {
    fn default() -> Self {
        Self {
            runner_tags: default_github_runner_tags(),
            use_environments: false,
            node_version: default_node_version(),
        }
    }
}

impl Default for CodeCatalystOptions {
    fn default() -> Self {
        Self {
            runner_tags: default_codecatalyst_runner_tags(),
            use_environments: false,
        }
    }
}

impl Default for GitlabOptions {
    fn default() -> Self {
        Self {
            runner_tags: Vec::new(),
            image: default_gitlab_image(),
        }
    }
}

impl Default for BashOptions {
    fn default() -> Self {
        Self {
            strict: default_true(),
        }
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_branch_name() -> String {
    "main".to_string()
}

fn default_cdk_out() -> String {
    "cdk.out".to_string()
}

fn default_install_command() -> String {
    "npm ci".to_string()
}

fn default_synth_command() -> String {
    "npx cdk synth".to_string()
}

fn default_bump_command() -> String {
    "npx projen bump".to_string()
}

fn default_github_runner_tags() -> Vec<String> {
    vec!["ubuntu-latest".to_string()]
}

fn default_codecatalyst_runner_tags() -> Vec<String> {
    vec!["Linux.x86-64.Large".to_string()]
}

fn default_node_version() -> String {
    "20".to_string()
}

fn default_gitlab_image() -> String {
    "jsii/superchain:1-bookworm-slim-node20".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Validated configuration
// ============================================================================

/// Options of the selected engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum EngineOptions {
    Github(GithubOptions),
    Codecatalyst(CodeCatalystOptions),
    Gitlab(GitlabOptions),
    Bash(BashOptions),
}

impl EngineOptions {
    pub fn backend(&self) -> Backend {
        match self {
            EngineOptions::Github(_) => Backend::Github,
            EngineOptions::Codecatalyst(_) => Backend::CodeCatalyst,
            EngineOptions::Gitlab(_) => Backend::Gitlab,
            EngineOptions::Bash(_) => Backend::Bash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub stack_prefix: String,
    pub package_namespace: String,
    pub branch_name: String,
    pub cdk_out: String,
    pub deploy_sub_stacks: bool,
    pub role_fallback: RoleFallback,
    pub install_command: String,
    pub synth_command: String,
    pub bump_command: String,
    pub assembly_package: String,
    pub pre_install_commands: Vec<String>,
    pub pre_synth_commands: Vec<String>,
    pub post_synth_commands: Vec<String>,
    pub iam_role_arns: IamRoleConfig,
    pub stages: StageSet,
    pub personal_stage: Option<PersonalStageConfig>,
    pub feature_stages: Option<FeatureStageConfig>,
    pub engine: EngineOptions,
}

impl PipelineConfig {
    pub fn from_raw(raw: RawPipelineConfig) -> Result<Self> {
        let stack_prefix = validation::require_non_empty(
            &raw.stack_prefix,
            "stackPrefix",
            "stackPrefix cannot be empty",
        )?
        .to_string();

        let package_namespace = validation::require_non_empty(
            &raw.package_namespace,
            "packageNamespace",
            "packageNamespace cannot be empty",
        )?
        .to_string();
        if !package_namespace.starts_with('@') || package_namespace.contains('/') {
            return Err(Error::config_invalid_value(
                "packageNamespace",
                Some(package_namespace),
                "packageNamespace must be an npm scope such as '@acme'",
            ));
        }

        validation::require_non_empty(&raw.branch_name, "branchName", "branchName cannot be empty")?;
        validation::require_non_empty(&raw.cdk_out, "cdkOut", "cdkOut cannot be empty")?;

        let engine = select_backend(&raw)?;
        match &engine {
            EngineOptions::Github(o) => {
                validation::require_non_empty_vec(
                    &o.runner_tags,
                    "github.runnerTags",
                    "github.runnerTags needs at least one runner label",
                )?;
            }
            EngineOptions::Codecatalyst(o) => {
                validation::require_non_empty_vec(
                    &o.runner_tags,
                    "codecatalyst.runnerTags",
                    "codecatalyst.runnerTags needs at least one compute type",
                )?;
            }
            EngineOptions::Gitlab(_) | EngineOptions::Bash(_) => {}
        }

        let mut reserved = Vec::new();
        if raw.personal_stage.is_some() {
            reserved.push(PERSONAL_STAGE);
        }
        if raw.feature_stages.is_some() {
            reserved.push(FEATURE_STAGE);
        }
        let stages = StageSet::build(raw.stages, raw.independent_stages, &reserved)?;

        if let Some(personal) = &raw.personal_stage {
            personal.validate("personalStage")?;
        }
        if let Some(feature) = &raw.feature_stages {
            feature.validate("featureStages")?;
        }

        for (field, name) in raw.iam_role_arns.referenced_stages() {
            if stages.get(name).is_none() {
                return Err(Error::config_invalid_value(
                    format!("iamRoleArns.{}.{}", field, name),
                    Some(name.clone()),
                    "Role override references an unknown stage",
                ));
            }
        }

        let assembly_package = raw.assembly_package.unwrap_or_else(|| {
            format!(
                "{}/{}-cdk-assembly",
                package_namespace,
                slugify::package_slug(&stack_prefix)
            )
        });

        Ok(Self {
            stack_prefix,
            package_namespace,
            branch_name: raw.branch_name,
            cdk_out: raw.cdk_out.trim_end_matches('/').to_string(),
            deploy_sub_stacks: raw.deploy_sub_stacks,
            role_fallback: raw.role_fallback,
            install_command: raw.install_command,
            synth_command: raw.synth_command,
            bump_command: raw.bump_command,
            assembly_package,
            pre_install_commands: raw.pre_install_commands,
            pre_synth_commands: raw.pre_synth_commands,
            post_synth_commands: raw.post_synth_commands,
            iam_role_arns: raw.iam_role_arns,
            stages,
            personal_stage: raw.personal_stage,
            feature_stages: raw.feature_stages,
            engine,
        })
    }

    pub fn backend(&self) -> Backend {
        self.engine.backend()
    }

    /// CDK construct id of a stage stack.
    pub fn stack_id(&self, stage: &str) -> String {
        format!("{}-{}", self.stack_prefix, slugify::file_slug(stage))
    }
}

/// Pick exactly one engine.
///
/// An explicit `engine` wins, but an options block for another engine next to
/// it is ambiguous. Without `engine`, the single options block present picks
/// the engine; none means GitHub.
pub fn select_backend(raw: &RawPipelineConfig) -> Result<EngineOptions> {
    let mut present: Vec<EngineOptions> = Vec::new();
    if let Some(o) = &raw.github {
        present.push(EngineOptions::Github(o.clone()));
    }
    if let Some(o) = &raw.codecatalyst {
        present.push(EngineOptions::Codecatalyst(o.clone()));
    }
    if let Some(o) = &raw.gitlab {
        present.push(EngineOptions::Gitlab(o.clone()));
    }
    if let Some(o) = &raw.bash {
        present.push(EngineOptions::Bash(o.clone()));
    }

    let names = |opts: &[EngineOptions]| -> Vec<String> {
        opts.iter().map(|o| o.backend().as_str().to_string()).collect()
    };

    match &raw.engine {
        Some(requested) => {
            let backend = Backend::parse(requested)?;
            let (matching, others): (Vec<_>, Vec<_>) =
                present.into_iter().partition(|o| o.backend() == backend);
            if !others.is_empty() {
                let mut candidates = vec![backend.as_str().to_string()];
                candidates.extend(names(&others));
                return Err(Error::engine_ambiguous(Some(requested.clone()), candidates));
            }
            Ok(matching
                .into_iter()
                .next()
                .unwrap_or_else(|| backend.default_options()))
        }
        None => match present.len() {
            0 => Ok(Backend::Github.default_options()),
            1 => Ok(present.remove(0)),
            _ => Err(Error::engine_ambiguous(None, names(&present))),
        },
    }
}

// ============================================================================
// Loading
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Format by file extension; anything unknown is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

pub fn parse_raw(content: &str, format: ConfigFormat, origin: &str) -> Result<RawPipelineConfig> {
    match format {
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| Error::config_invalid_json(origin, e))
        }
        ConfigFormat::Yaml => {
            serde_yml::from_str(content).map_err(|e| Error::config_invalid_yaml(origin, e))
        }
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| Error::config_invalid_toml(origin, e))
        }
    }
}

pub fn from_str(content: &str, format: ConfigFormat) -> Result<PipelineConfig> {
    PipelineConfig::from_raw(parse_raw(content, format, "<inline>")?)
}

pub fn load(path: &Path) -> Result<PipelineConfig> {
    load_with(&local_files::local(), path)
}

pub fn load_with(fs: &dyn FileSystem, path: &Path) -> Result<PipelineConfig> {
    let content = fs.read(path)?;
    let raw = parse_raw(
        &content,
        ConfigFormat::from_path(path),
        &path.display().to_string(),
    )?;
    log::debug!(
        "Loaded pipeline config {} ({} stages, {} independent)",
        path.display(),
        raw.stages.len(),
        raw.independent_stages.len()
    );
    PipelineConfig::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const BASE: &str = r#"
stackPrefix: MyApp
packageNamespace: "@acme"
iamRoleArns:
  default: arn:aws:iam::123456789012:role/deploy
stages:
  - name: dev
    env: { account: "123456789012", region: eu-central-1 }
"#;

    #[test]
    fn yaml_defaults_apply() {
        let config = from_str(BASE, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.branch_name, "main");
        assert_eq!(config.cdk_out, "cdk.out");
        assert_eq!(config.install_command, "npm ci");
        assert_eq!(config.assembly_package, "@acme/my-app-cdk-assembly");
        assert_eq!(config.role_fallback, RoleFallback::Require);
        assert_eq!(config.backend(), Backend::Github);
        assert_eq!(config.stack_id("dev"), "MyApp-dev");
    }

    #[test]
    fn json_config_parses() {
        let json = r#"{
            "stackPrefix": "MyApp",
            "packageNamespace": "@acme",
            "engine": "gitlab",
            "stages": [{"name": "dev", "env": {"account": "123456789012", "region": "us-east-1"}}]
        }"#;
        let config = from_str(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.backend(), Backend::Gitlab);
    }

    #[test]
    fn toml_config_parses() {
        let content = r#"
stackPrefix = "MyApp"
packageNamespace = "@acme"
engine = "bash"
roleFallback = "ambient"

[[stages]]
name = "dev"
env = { account = "123456789012", region = "us-east-1" }
"#;
        let config = from_str(content, ConfigFormat::Toml).unwrap();
        assert_eq!(config.backend(), Backend::Bash);
        assert_eq!(config.role_fallback, RoleFallback::Ambient);
    }

    #[test]
    fn configs_with_local_stacks_compare_by_value() {
        let content = format!(
            "{}personalStage:\n  env: {{ account: \"123456789012\", region: eu-west-1 }}\nfeatureStages:\n  env: {{ account: \"123456789012\", region: eu-west-1 }}\n",
            BASE
        );
        let first = from_str(&content, ConfigFormat::Yaml).unwrap();
        let second = from_str(&content, ConfigFormat::Yaml).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.personal_stage.as_ref().map(|p| p.user_variable.as_str()),
            Some("USER")
        );

        let renamed = content.replacen("featureStages:\n", "featureStages:\n  branchVariable: GIT_BRANCH\n", 1);
        assert_ne!(first, from_str(&renamed, ConfigFormat::Yaml).unwrap());
    }

    #[test]
    fn single_options_block_selects_engine() {
        let content = format!("{}\ncodecatalyst:\n  runnerTags: [Linux.Arm64.Large]\n", BASE);
        let config = from_str(&content, ConfigFormat::Yaml).unwrap();
        match config.engine {
            EngineOptions::Codecatalyst(o) => assert_eq!(o.runner_tags, vec!["Linux.Arm64.Large"]),
            other => panic!("unexpected engine {:?}", other),
        }
    }

    #[test]
    fn two_options_blocks_are_ambiguous() {
        let content = format!("{}\ngithub: {{}}\ngitlab: {{}}\n", BASE);
        let err = from_str(&content, ConfigFormat::Yaml).unwrap_err();
        assert_eq!(err.code, ErrorCode::EngineAmbiguous);
    }

    #[test]
    fn explicit_engine_with_foreign_block_is_ambiguous() {
        let content = format!("{}\nengine: bash\ngitlab: {{}}\n", BASE);
        let err = from_str(&content, ConfigFormat::Yaml).unwrap_err();
        assert_eq!(err.code, ErrorCode::EngineAmbiguous);
    }

    #[test]
    fn unknown_engine_is_unsupported() {
        let content = format!("{}\nengine: jenkins\n", BASE);
        let err = from_str(&content, ConfigFormat::Yaml).unwrap_err();
        assert_eq!(err.code, ErrorCode::EngineUnsupported);
    }

    #[test]
    fn role_override_for_unknown_stage_fails() {
        let content = BASE.replace(
            "  default: arn:aws:iam::123456789012:role/deploy",
            "  deployment:\n    staging: arn:aws:iam::123456789012:role/x",
        );
        let err = from_str(&content, ConfigFormat::Yaml).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
        assert_eq!(err.details["key"], "iamRoleArns.deployment.staging");
    }

    #[test]
    fn namespace_must_be_scope() {
        let content = BASE.replace("\"@acme\"", "acme");
        assert!(from_str(&content, ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn invalid_yaml_reports_origin() {
        let err = parse_raw("stages: [", ConfigFormat::Yaml, "pipeline.yml").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidYaml);
        assert_eq!(err.details["path"], "pipeline.yml");
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, BASE).unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.stages.ordered[0].name, "dev");
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
    }
}
