//! GitLab CI: a single `.gitlab-ci.yml` of stages, hidden templates and jobs.
//!
//! Approval gates are `approve-<stage>` jobs with `when: manual`; the gated
//! `deploy-<stage>` job needs them. Every ordered stage also gets a
//! `diff-<stage>` job.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

use super::{
    approval_node, asset_publish_steps, assume_role, deployment_node, job_id, primary_region, Backend,
    DependencyGraph, EngineOutput, EngineResult, NodeKind, PipelineEngine, StageSteps,
    ASSET_UPLOAD_NODE, SYNTH_NODE,
};
use crate::config::{GitlabOptions, PipelineConfig};
use crate::error::{Error, Result};
use crate::render::{CommandRenderer, VERSION_VARIABLE};
use crate::roles::RolePurpose;
use crate::stage::Stage;
use crate::step::{render_script, Step};
use crate::utils::shell::quote_arg;

pub const FILE_NAME: &str = ".gitlab-ci.yml";

pub const AWS_BASE: &str = ".aws_base";
pub const ARTIFACTS_CDK: &str = ".artifacts_cdk";
pub const ARTIFACTS_CDKDEPLOY: &str = ".artifacts_cdkdeploy";

pub const SYNTH_JOB: &str = "synth";
pub const PUBLISH_ASSETS_JOB: &str = "publish_assets";

const STAGE_SYNTH: &str = "synth";
const STAGE_PUBLISH: &str = "publish_assets";
const STAGE_DIFF: &str = "diff";
const STAGE_APPROVE: &str = "approve";
const STAGE_DEPLOY: &str = "deploy";

/// Dotenv report carrying the published assembly version to gated jobs.
pub const VERSION_DOTENV: &str = "assembly.env";

const ID_TOKEN_VARIABLE: &str = "AWS_TOKEN";
const ID_TOKEN_AUDIENCE: &str = "https://sts.amazonaws.com";

/// The whole `.gitlab-ci.yml`. Templates come before jobs, each in
/// creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GitlabCi {
    pub stages: Vec<String>,
    pub templates: Vec<(String, GitlabJob)>,
    pub jobs: Vec<(String, GitlabJob)>,
}

impl GitlabCi {
    pub fn job(&self, name: &str) -> Option<&GitlabJob> {
        self.templates
            .iter()
            .chain(self.jobs.iter())
            .find(|(n, _)| n == name)
            .map(|(_, job)| job)
    }
}

impl Serialize for GitlabCi {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1 + self.templates.len() + self.jobs.len()))?;
        map.serialize_entry("stages", &self.stages)?;
        for (name, job) in self.templates.iter().chain(self.jobs.iter()) {
            map.serialize_entry(name, job)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct GitlabJob {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<Need>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_failure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub id_tokens: BTreeMap<String, IdToken>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub before_script: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub script: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Artifacts>,
}

impl GitlabJob {
    pub fn needs_job(&self, name: &str) -> bool {
        self.needs.iter().any(|n| n.job == name)
    }

    pub fn is_manual(&self) -> bool {
        self.when.as_deref() == Some("manual")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Need {
    pub job: String,
    pub artifacts: bool,
}

impl Need {
    fn job(name: &str) -> Self {
        Self {
            job: name.to_string(),
            artifacts: false,
        }
    }

    fn with_artifacts(name: &str) -> Self {
        Self {
            job: name.to_string(),
            artifacts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IdToken {
    pub aud: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Artifacts {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reports: Option<Reports>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Reports {
    pub dotenv: String,
}

pub struct GitlabEngine<'a> {
    config: &'a PipelineConfig,
    options: GitlabOptions,
    renderer: CommandRenderer<'a>,
    jobs: Vec<(String, GitlabJob)>,
    graph: DependencyGraph,
    /// Previous ordered deployment: (graph node, job name).
    previous: Option<(String, String)>,
}

impl<'a> GitlabEngine<'a> {
    pub fn new(config: &'a PipelineConfig, options: &GitlabOptions) -> Self {
        Self {
            config,
            options: options.clone(),
            renderer: CommandRenderer::new(config),
            jobs: Vec::new(),
            graph: DependencyGraph::default(),
            previous: None,
        }
    }

    fn templates(&self) -> Vec<(String, GitlabJob)> {
        let aws_base = GitlabJob {
            image: Some(self.options.image.clone()),
            tags: self.options.runner_tags.clone(),
            id_tokens: BTreeMap::from([(
                ID_TOKEN_VARIABLE.to_string(),
                IdToken {
                    aud: ID_TOKEN_AUDIENCE.to_string(),
                },
            )]),
            before_script: self.renderer.install(),
            ..GitlabJob::default()
        };
        let artifacts_cdk = GitlabJob {
            artifacts: Some(Artifacts {
                paths: vec![format!("{}/", self.config.cdk_out)],
                ..Artifacts::default()
            }),
            ..GitlabJob::default()
        };
        let artifacts_cdkdeploy = GitlabJob {
            artifacts: Some(Artifacts {
                paths: vec!["cdk-outputs-*.json".to_string()],
                ..Artifacts::default()
            }),
            ..GitlabJob::default()
        };

        vec![
            (AWS_BASE.to_string(), aws_base),
            (ARTIFACTS_CDK.to_string(), artifacts_cdk),
            (ARTIFACTS_CDKDEPLOY.to_string(), artifacts_cdkdeploy),
        ]
    }

    fn stages(&self) -> Vec<String> {
        let mut stages = vec![STAGE_SYNTH, STAGE_PUBLISH];
        if !self.config.stages.ordered.is_empty() {
            stages.push(STAGE_DIFF);
        }
        if self.config.stages.needs_versioned_artifacts() {
            stages.push(STAGE_APPROVE);
        }
        if self.config.stages.all().next().is_some() {
            stages.push(STAGE_DEPLOY);
        }
        stages.into_iter().map(str::to_string).collect()
    }

    fn push_job(&mut self, name: String, job: GitlabJob) -> Result<()> {
        if self.jobs.iter().any(|(n, _)| *n == name) {
            return Err(Error::internal_unexpected(format!(
                "GitLab job '{}' defined twice",
                name
            )));
        }
        self.jobs.push((name, job));
        Ok(())
    }

    fn script(&self, steps: &[Step]) -> Result<Vec<String>> {
        Ok(render_script(steps, Backend::Gitlab)?.steps)
    }

    fn aws_job(
        &self,
        stage: &str,
        extra_extends: &[&str],
        needs: Vec<Need>,
        script: Vec<String>,
    ) -> GitlabJob {
        let mut extends = vec![AWS_BASE.to_string()];
        extends.extend(extra_extends.iter().map(|e| e.to_string()));
        GitlabJob {
            extends,
            stage: Some(stage.to_string()),
            needs,
            script,
            ..GitlabJob::default()
        }
    }

    fn diff_job(&mut self, stage: &Stage) -> Result<()> {
        let steps = StageSteps::build(self.config, stage)?;
        let script = self.script(&steps.diff)?;
        let job = self.aws_job(
            STAGE_DIFF,
            &[],
            vec![Need::with_artifacts(SYNTH_JOB), Need::job(PUBLISH_ASSETS_JOB)],
            script,
        );
        self.push_job(job_id("diff", &stage.name), job)
    }
}

impl PipelineEngine for GitlabEngine<'_> {
    fn backend(&self) -> Backend {
        Backend::Gitlab
    }

    fn create_synth(&mut self, commands: &[String]) -> Result<()> {
        let mut steps: Vec<Step> = assume_role(
            self.config,
            RolePurpose::Synth,
            primary_region(self.config),
        )?
        .into_iter()
        .collect();
        steps.push(Step::command(commands.iter().cloned()));

        let script = self.script(&steps)?;
        let job = self.aws_job(STAGE_SYNTH, &[ARTIFACTS_CDK], Vec::new(), script);
        self.push_job(SYNTH_JOB.to_string(), job)?;
        self.graph
            .add(SYNTH_NODE, NodeKind::Synth, SYNTH_JOB, Vec::new(), false)
    }

    fn create_asset_upload(&mut self, commands: &[String]) -> Result<()> {
        let mut steps = asset_publish_steps(self.config, commands)?;
        if self.config.stages.needs_versioned_artifacts() {
            steps.push(Step::RegistryLogin {
                write: true,
                scope: Some(self.config.package_namespace.clone()),
            });
            steps.push(Step::command(self.renderer.assembly_upload()));
            steps.push(Step::command([format!(
                "echo \"{}=$ASSEMBLY_VERSION\" > {}",
                VERSION_VARIABLE, VERSION_DOTENV
            )]));
        }

        let script = self.script(&steps)?;
        let mut job = self.aws_job(
            STAGE_PUBLISH,
            &[],
            vec![Need::with_artifacts(SYNTH_JOB)],
            script,
        );
        if self.config.stages.needs_versioned_artifacts() {
            job.artifacts = Some(Artifacts {
                reports: Some(Reports {
                    dotenv: VERSION_DOTENV.to_string(),
                }),
                ..Artifacts::default()
            });
        }
        self.push_job(PUBLISH_ASSETS_JOB.to_string(), job)?;
        self.graph.add(
            ASSET_UPLOAD_NODE,
            NodeKind::AssetUpload,
            PUBLISH_ASSETS_JOB,
            vec![SYNTH_NODE.to_string()],
            false,
        )
    }

    fn create_deployment(&mut self, stage: &Stage) -> Result<()> {
        self.diff_job(stage)?;

        let node = deployment_node(&stage.name);
        let name = job_id("deploy", &stage.name);
        let diff_name = job_id("diff", &stage.name);

        let (predecessor_node, predecessor_job) = match &self.previous {
            Some((node, job)) => (node.clone(), job.clone()),
            None => (ASSET_UPLOAD_NODE.to_string(), PUBLISH_ASSETS_JOB.to_string()),
        };

        let mut needs = vec![
            Need::with_artifacts(SYNTH_JOB),
            // Gated jobs read the pinned version from the dotenv report.
            if stage.manual_approval {
                Need::with_artifacts(PUBLISH_ASSETS_JOB)
            } else {
                Need::job(PUBLISH_ASSETS_JOB)
            },
            Need::job(&diff_name),
        ];
        let node_needs;

        if stage.manual_approval {
            let gate = approval_node(&stage.name);
            let gate_name = job_id("approve", &stage.name);
            let approve = GitlabJob {
                stage: Some(STAGE_APPROVE.to_string()),
                image: Some(self.options.image.clone()),
                tags: self.options.runner_tags.clone(),
                needs: vec![Need::job(&predecessor_job)],
                when: Some("manual".to_string()),
                allow_failure: Some(false),
                script: vec![format!(
                    "echo {}",
                    quote_arg(&format!("Deployment to {} approved", stage.name))
                )],
                ..GitlabJob::default()
            };
            self.push_job(gate_name.clone(), approve)?;
            self.graph.add(
                &gate,
                NodeKind::Approval,
                gate_name.clone(),
                vec![predecessor_node],
                true,
            )?;
            needs.push(Need::job(&gate_name));
            node_needs = vec![gate];
        } else {
            if predecessor_job != PUBLISH_ASSETS_JOB {
                needs.push(Need::job(&predecessor_job));
            }
            node_needs = match &self.previous {
                Some((prev, _)) => vec![ASSET_UPLOAD_NODE.to_string(), prev.clone()],
                None => vec![ASSET_UPLOAD_NODE.to_string()],
            };
        }

        let mut deploy = Vec::new();
        if stage.manual_approval {
            deploy.push(Step::RegistryLogin {
                write: false,
                scope: Some(self.config.package_namespace.clone()),
            });
            deploy.push(Step::command(
                self.renderer
                    .versioned_install(&format!("${}", VERSION_VARIABLE)),
            ));
        }
        deploy.extend(StageSteps::build(self.config, stage)?.deploy);
        let script = self.script(&deploy)?;
        let mut job = self.aws_job(STAGE_DEPLOY, &[ARTIFACTS_CDKDEPLOY], needs, script);
        job.environment = Some(stage.name.clone());
        self.push_job(name.clone(), job)?;
        self.graph
            .add(&node, NodeKind::Deployment, name.clone(), node_needs, false)?;

        self.previous = Some((node, name));
        Ok(())
    }

    fn create_independent_deployment(&mut self, stage: &Stage) -> Result<()> {
        let name = job_id("deploy", &stage.name);
        let steps = StageSteps::build(self.config, stage)?.inline();
        let script = self.script(&steps)?;

        let mut job = self.aws_job(
            STAGE_DEPLOY,
            &[ARTIFACTS_CDKDEPLOY],
            vec![Need::with_artifacts(SYNTH_JOB), Need::job(PUBLISH_ASSETS_JOB)],
            script,
        );
        job.environment = Some(stage.name.clone());
        if !stage.deploy_on_push {
            job.when = Some("manual".to_string());
        }
        let manual = job.is_manual();

        self.push_job(name.clone(), job)?;
        self.graph.add(
            deployment_node(&stage.name),
            NodeKind::IndependentDeployment,
            name,
            vec![ASSET_UPLOAD_NODE.to_string()],
            manual,
        )
    }

    fn finish(self: Box<Self>) -> Result<EngineResult> {
        let this = *self;
        let ci = GitlabCi {
            stages: this.stages(),
            templates: this.templates(),
            jobs: this.jobs,
        };
        Ok(EngineResult {
            output: EngineOutput::Gitlab(ci),
            graph: this.graph,
        })
    }
}
