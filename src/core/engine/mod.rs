//! CI engines.
//!
//! One engine per [`Backend`]. The orchestrator drives an engine through
//! [`PipelineEngine`] and collects its native documents as an
//! [`EngineOutput`] plus the logical [`DependencyGraph`] it realized.
//!
//! - `workflow` - job/workflow document model (GitHub, CodeCatalyst)
//! - `dialect` - workflow engine shared by GitHub and CodeCatalyst
//! - `github`, `codecatalyst`, `gitlab`, `bash` - the backends

pub mod bash;
pub mod codecatalyst;
pub mod dialect;
pub mod github;
pub mod gitlab;
pub mod workflow;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::{
    BashOptions, CodeCatalystOptions, EngineOptions, GithubOptions, GitlabOptions, PipelineConfig,
};
use crate::error::{Error, Result};
use crate::render::CommandRenderer;
use crate::roles::RolePurpose;
use crate::slugify::{package_slug, sanitize_stage_name};
use crate::stage::Stage;
use crate::step::Step;

const FALLBACK_REGION: &str = "us-east-1";

pub const GENERATED_HEADER: &str = "Generated by stagehand. Do not edit by hand.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Github,
    CodeCatalyst,
    Gitlab,
    Bash,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::Github,
        Backend::CodeCatalyst,
        Backend::Gitlab,
        Backend::Bash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Github => "github",
            Backend::CodeCatalyst => "codecatalyst",
            Backend::Gitlab => "gitlab",
            Backend::Bash => "bash",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        let wanted = name.trim().to_ascii_lowercase();
        Backend::ALL
            .into_iter()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| Error::engine_unsupported(name))
    }

    pub fn default_options(&self) -> EngineOptions {
        match self {
            Backend::Github => EngineOptions::Github(GithubOptions::default()),
            Backend::CodeCatalyst => EngineOptions::Codecatalyst(CodeCatalystOptions::default()),
            Backend::Gitlab => EngineOptions::Gitlab(GitlabOptions::default()),
            Backend::Bash => EngineOptions::Bash(BashOptions::default()),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Engine contract
// ============================================================================

pub trait PipelineEngine {
    fn backend(&self) -> Backend;

    /// Check out and install, optionally assume the synth role, run the
    /// synth `commands` and publish the `cloud-assembly` artifact.
    fn create_synth(&mut self, commands: &[String]) -> Result<()>;

    /// Publish assets after synth; with versioned artifacts also bump and
    /// publish the assembly package.
    fn create_asset_upload(&mut self, commands: &[String]) -> Result<()>;

    /// Deploy an ordered stage after its predecessor (or its approval gate).
    fn create_deployment(&mut self, stage: &Stage) -> Result<()>;

    /// Deploy a stage outside the ordered sequence.
    fn create_independent_deployment(&mut self, stage: &Stage) -> Result<()>;

    fn finish(self: Box<Self>) -> Result<EngineResult>;
}

/// Instantiate the engine selected by the configuration.
pub fn create(config: &PipelineConfig) -> Box<dyn PipelineEngine + '_> {
    match &config.engine {
        EngineOptions::Github(options) => Box::new(github::engine(config, options)),
        EngineOptions::Codecatalyst(options) => Box::new(codecatalyst::engine(config, options)),
        EngineOptions::Gitlab(options) => Box::new(gitlab::GitlabEngine::new(config, options)),
        EngineOptions::Bash(options) => Box::new(bash::BashEngine::new(config, options)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub output: EngineOutput,
    pub graph: DependencyGraph,
}

/// Native documents produced by an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    Github(BTreeMap<String, workflow::Workflow>),
    CodeCatalyst(BTreeMap<String, workflow::Workflow>),
    Gitlab(gitlab::GitlabCi),
    Bash(bash::BashScript),
}

impl EngineOutput {
    pub fn backend(&self) -> Backend {
        match self {
            EngineOutput::Github(_) => Backend::Github,
            EngineOutput::CodeCatalyst(_) => Backend::CodeCatalyst,
            EngineOutput::Gitlab(_) => Backend::Gitlab,
            EngineOutput::Bash(_) => Backend::Bash,
        }
    }

    pub fn files(&self) -> Result<Vec<GeneratedFile>> {
        match self {
            EngineOutput::Github(workflows) => workflow_files(".github/workflows", "yml", workflows),
            EngineOutput::CodeCatalyst(workflows) => {
                workflow_files(".codecatalyst/workflows", "yaml", workflows)
            }
            EngineOutput::Gitlab(ci) => Ok(vec![GeneratedFile::new(
                gitlab::FILE_NAME,
                with_yaml_header(&to_yaml(ci, gitlab::FILE_NAME)?),
            )]),
            EngineOutput::Bash(script) => Ok(vec![GeneratedFile {
                executable: true,
                ..GeneratedFile::new(bash::FILE_NAME, script.render())
            }]),
        }
    }
}

fn workflow_files(
    dir: &str,
    extension: &str,
    workflows: &BTreeMap<String, workflow::Workflow>,
) -> Result<Vec<GeneratedFile>> {
    workflows
        .iter()
        .map(|(name, wf)| {
            let path = format!("{}/{}.{}", dir, name, extension);
            let yaml = to_yaml(wf, &path)?;
            Ok(GeneratedFile::new(path, with_yaml_header(&yaml)))
        })
        .collect()
}

pub(crate) fn to_yaml<T: Serialize>(value: &T, context: &str) -> Result<String> {
    serde_yml::to_string(value)
        .map_err(|e| Error::internal_yaml(e.to_string(), Some(format!("serialize {}", context))))
}

fn with_yaml_header(yaml: &str) -> String {
    format!("# {}\n{}", GENERATED_HEADER, yaml)
}

/// A file to hand to the host project, relative to its root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    pub executable: bool,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            executable: false,
        }
    }

    /// Hex SHA-256 of the content.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.content.as_bytes());
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

// ============================================================================
// Logical dependency graph
// ============================================================================

pub const SYNTH_NODE: &str = "synth";
pub const ASSET_UPLOAD_NODE: &str = "assetUpload";

pub fn approval_node(stage: &str) -> String {
    format!("approve-{}", stage)
}

pub fn deployment_node(stage: &str) -> String {
    format!("deploy-{}", stage)
}

/// Job or workflow id for a stage, e.g. `deploy-dev-2` for `dev 2`.
pub fn job_id(prefix: &str, stage: &str) -> String {
    format!("{}-{}", prefix, package_slug(stage))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    Synth,
    AssetUpload,
    Approval,
    Deployment,
    IndependentDeployment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Where the node is realized, e.g. `deploy/deploy-dev` or `approve-prod`.
    pub job: String,
    /// Logical dependencies. A workflow backend may realize them inside
    /// the node's own workflow, see [`dialect`].
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    pub manual: bool,
}

/// Nodes in the order engines created them, each with its direct
/// dependencies. Insertion order is a topological order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
}

impl DependencyGraph {
    pub fn add(
        &mut self,
        id: impl Into<String>,
        kind: NodeKind,
        job: impl Into<String>,
        needs: Vec<String>,
        manual: bool,
    ) -> Result<()> {
        let id = id.into();
        if self.node(&id).is_some() {
            return Err(Error::internal_unexpected(format!(
                "Graph node '{}' added twice",
                id
            )));
        }
        if let Some(missing) = needs.iter().find(|n| self.node(n).is_none()) {
            return Err(Error::internal_unexpected(format!(
                "Graph node '{}' depends on unknown node '{}'",
                id, missing
            )));
        }
        self.nodes.push(GraphNode {
            id,
            kind,
            job: job.into(),
            needs,
            manual,
        });
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn needs(&self, id: &str) -> &[String] {
        self.node(id).map(|n| n.needs.as_slice()).unwrap_or(&[])
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ============================================================================
// Helpers shared by the engines
// ============================================================================

/// Region used for pipeline-wide roles: the first stage's region.
pub(crate) fn primary_region(config: &PipelineConfig) -> &str {
    config
        .stages
        .all()
        .next()
        .map(|s| s.env.region.as_str())
        .unwrap_or(FALLBACK_REGION)
}

fn session_name(purpose: RolePurpose<'_>) -> String {
    let prefix = match purpose {
        RolePurpose::Synth => "synth",
        RolePurpose::AssetPublishing | RolePurpose::AssetPublishingForStage(_) => "assets",
        RolePurpose::Deployment(_) => "deploy",
        RolePurpose::Diff(_) => "diff",
    };
    match purpose.stage() {
        Some(stage) => format!("stagehand-{}-{}", prefix, sanitize_stage_name(stage)),
        None => format!("stagehand-{}", prefix),
    }
}

/// Assume-role step for `purpose`, or `None` when it runs with ambient
/// credentials.
pub(crate) fn assume_role(
    config: &PipelineConfig,
    purpose: RolePurpose<'_>,
    region: &str,
) -> Result<Option<Step>> {
    let role = config.iam_role_arns.resolve(purpose, config.role_fallback)?;
    Ok(role.map(|role_arn| Step::AssumeRole {
        role_arn,
        session_name: Some(session_name(purpose)),
        region: Some(region.to_string()),
    }))
}

/// Asset publishing steps: one assume+publish pair per stage when per-stage
/// roles are configured, otherwise the pipeline-wide role and `commands`.
pub(crate) fn asset_publish_steps(config: &PipelineConfig, commands: &[String]) -> Result<Vec<Step>> {
    let renderer = CommandRenderer::new(config);
    let mut steps = Vec::new();

    if config.iam_role_arns.has_per_stage_publishing() {
        for stage in config.stages.all() {
            let purpose = RolePurpose::AssetPublishingForStage(&stage.name);
            steps.extend(assume_role(config, purpose, &stage.env.region)?);
            steps.push(Step::command(renderer.asset_upload(Some(&stage.name))));
        }
    } else {
        steps.extend(assume_role(
            config,
            RolePurpose::AssetPublishing,
            primary_region(config),
        )?);
        steps.push(Step::command(commands.iter().cloned()));
    }

    Ok(steps)
}

/// Diff and deploy phases of one stage.
pub(crate) struct StageSteps {
    pub diff: Vec<Step>,
    pub deploy: Vec<Step>,
    same_role: bool,
}

impl StageSteps {
    pub fn build(config: &PipelineConfig, stage: &Stage) -> Result<Self> {
        let renderer = CommandRenderer::new(config);
        let region = stage.env.region.as_str();

        let diff_role = assume_role(config, RolePurpose::Diff(&stage.name), region)?;
        let deploy_role = assume_role(config, RolePurpose::Deployment(&stage.name), region)?;
        let same_role = role_arn(&diff_role) == role_arn(&deploy_role);

        let mut diff: Vec<Step> = diff_role.into_iter().collect();
        diff.push(Step::command(renderer.diff(&stage.name)));
        diff.extend(stage.post_diff_steps.iter().cloned());

        let mut deploy: Vec<Step> = deploy_role.into_iter().collect();
        deploy.push(Step::command(renderer.deploy(&stage.name)));
        deploy.extend(stage.post_deploy_steps.iter().cloned());

        Ok(Self {
            diff,
            deploy,
            same_role,
        })
    }

    /// Both phases in one job; the deploy role is only re-assumed when it
    /// differs from the diff role.
    pub fn inline(self) -> Vec<Step> {
        let mut steps = self.diff;
        let mut deploy = self.deploy.into_iter().peekable();
        if self.same_role && matches!(deploy.peek(), Some(Step::AssumeRole { .. })) {
            deploy.next();
        }
        steps.extend(deploy);
        steps
    }
}

fn role_arn(step: &Option<Step>) -> Option<&str> {
    match step {
        Some(Step::AssumeRole { role_arn, .. }) => Some(role_arn),
        _ => None,
    }
}
