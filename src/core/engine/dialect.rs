//! Workflow engine shared by the GitHub and CodeCatalyst backends.
//!
//! The main workflow (`deploy`) holds synth, asset upload and the ordered
//! stages up to the first approval stage. Each approval stage opens a
//! manually dispatched `release-<stage>` workflow taking the assembly
//! `version` as input; later ordered stages chain inside it. Independent
//! stages get their own `deploy-<stage>` workflow.
//!
//! An independent workflow does not wait for the main workflow. It
//! synthesizes and publishes its own stage's assets in place, so its
//! `assetUpload` dependency in the [`DependencyGraph`] is realized inside
//! the workflow rather than by the main `assetUpload` job.

use std::collections::BTreeMap;

use super::workflow::{Job, JobStep, Triggers, Workflow};
use super::{
    approval_node, asset_publish_steps, assume_role, deployment_node, job_id, primary_region, Backend,
    DependencyGraph, EngineOutput, EngineResult, NodeKind, PipelineEngine, StageSteps,
    ASSET_UPLOAD_NODE, SYNTH_NODE,
};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::permissions::{AccessLevel, Permissions, CONTENTS, PACKAGES};
use crate::render::{CommandRenderer, VERSION_VARIABLE};
use crate::roles::RolePurpose;
use crate::slugify::file_slug;
use crate::stage::Stage;
use crate::step::{render_workflow, Step, StepConfig};

pub const MAIN_WORKFLOW: &str = "deploy";
pub const ASSEMBLY_ARTIFACT: &str = "cloud-assembly";
pub const SYNTH_JOB: &str = "synth";
pub const ASSET_UPLOAD_JOB: &str = "assetUpload";
pub const VERSION_INPUT: &str = "version";

/// Backend-specific pieces of a workflow engine.
pub trait Dialect {
    const BACKEND: Backend;

    fn runs_on(&self) -> Vec<String>;

    /// Steps every job starts with (checkout, toolchain).
    fn setup_steps(&self) -> Vec<JobStep>;

    /// Expression yielding the dispatched `version` input.
    fn version_input(&self) -> String;

    /// Deployment environment of a stage job, if the dialect scopes jobs.
    fn environment(&self, stage: &Stage) -> Option<String>;

    fn wrap(workflows: BTreeMap<String, Workflow>) -> EngineOutput;
}

/// How a job obtains the cloud assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblySource {
    /// Download the artifact published by synth in the same run.
    Artifact,
    /// Install the published assembly package at the dispatched version.
    Package,
    /// Synthesize in place.
    Synth,
}

pub struct WorkflowEngine<'a, D: Dialect> {
    config: &'a PipelineConfig,
    renderer: CommandRenderer<'a>,
    dialect: D,
    workflows: BTreeMap<String, Workflow>,
    graph: DependencyGraph,
    /// Workflow ordered stages currently append to.
    current: String,
    /// Previous ordered deployment: (graph node, workflow, job id).
    previous: Option<(String, String, String)>,
}

impl<'a, D: Dialect> WorkflowEngine<'a, D> {
    pub fn new(config: &'a PipelineConfig, dialect: D) -> Self {
        let mut workflows = BTreeMap::new();
        workflows.insert(
            MAIN_WORKFLOW.to_string(),
            Workflow::new(MAIN_WORKFLOW, Triggers::push(&config.branch_name)),
        );

        Self {
            config,
            renderer: CommandRenderer::new(config),
            dialect,
            workflows,
            graph: DependencyGraph::default(),
            current: MAIN_WORKFLOW.to_string(),
            previous: None,
        }
    }

    fn job(
        &self,
        name: String,
        needs: Vec<String>,
        environment: Option<String>,
        rendered: StepConfig<JobStep>,
    ) -> Job {
        let mut steps = self.dialect.setup_steps();
        steps.extend(rendered.steps);

        let mut permissions = Permissions::new().with(CONTENTS, AccessLevel::Read);
        permissions.extend(&rendered.permissions);

        let mut needs = needs;
        for need in rendered.needs {
            if !needs.contains(&need) {
                needs.push(need);
            }
        }

        Job {
            name,
            runs_on: self.dialect.runs_on(),
            needs,
            environment,
            env: rendered.env,
            permissions,
            steps,
        }
    }

    fn insert_job(&mut self, workflow: &str, id: String, job: Job) -> Result<()> {
        let wf = self.workflows.get_mut(workflow).ok_or_else(|| {
            Error::internal_unexpected(format!("Workflow '{}' does not exist", workflow))
        })?;
        if wf.jobs.insert(id.clone(), job).is_some() {
            return Err(Error::internal_unexpected(format!(
                "Job '{}' defined twice in workflow '{}'",
                id, workflow
            )));
        }
        Ok(())
    }

    fn assembly_steps(&self, source: AssemblySource) -> Vec<Step> {
        match source {
            AssemblySource::Artifact => vec![
                Step::DownloadArtifact {
                    name: ASSEMBLY_ARTIFACT.to_string(),
                    path: self.config.cdk_out.clone(),
                },
                Step::command(self.renderer.install()),
            ],
            AssemblySource::Package => vec![
                Step::command(self.renderer.install()),
                Step::RegistryLogin {
                    write: false,
                    scope: Some(self.config.package_namespace.clone()),
                },
                Step::command(
                    self.renderer
                        .versioned_install(&format!("${}", VERSION_VARIABLE)),
                ),
            ],
            AssemblySource::Synth => {
                let mut commands = self.renderer.install();
                commands.extend(self.renderer.synth());
                vec![Step::command(commands)]
            }
        }
    }

    /// Deployment job for `stage`: obtain the assembly, diff, deploy and
    /// upload the outputs file.
    fn deployment_job(
        &self,
        stage: &Stage,
        needs: Vec<String>,
        source: AssemblySource,
    ) -> Result<Job> {
        let mut steps = self.assembly_steps(source);
        if source == AssemblySource::Synth {
            let purpose = RolePurpose::AssetPublishingForStage(&stage.name);
            steps.extend(assume_role(self.config, purpose, &stage.env.region)?);
            steps.push(Step::command(self.renderer.asset_upload(Some(&stage.name))));
        }
        steps.extend(StageSteps::build(self.config, stage)?.inline());
        steps.push(Step::UploadArtifact {
            name: format!("{}-outputs", file_slug(&stage.name)),
            path: CommandRenderer::outputs_file(&stage.name),
        });

        let mut rendered = render_workflow(&steps, D::BACKEND)?;
        if source == AssemblySource::Package {
            rendered
                .env
                .insert(VERSION_VARIABLE.to_string(), self.dialect.version_input());
        }

        Ok(self.job(
            format!("Deploy {}", stage.name),
            needs,
            self.dialect.environment(stage),
            rendered,
        ))
    }
}

impl<D: Dialect> PipelineEngine for WorkflowEngine<'_, D> {
    fn backend(&self) -> Backend {
        D::BACKEND
    }

    fn create_synth(&mut self, commands: &[String]) -> Result<()> {
        let mut steps: Vec<Step> = assume_role(
            self.config,
            RolePurpose::Synth,
            primary_region(self.config),
        )?
        .into_iter()
        .collect();
        steps.push(Step::command(
            self.renderer.install().into_iter().chain(commands.iter().cloned()),
        ));
        steps.push(Step::UploadArtifact {
            name: ASSEMBLY_ARTIFACT.to_string(),
            path: self.config.cdk_out.clone(),
        });

        let rendered = render_workflow(&steps, D::BACKEND)?;
        let job = self.job("Synth".to_string(), Vec::new(), None, rendered);
        self.insert_job(MAIN_WORKFLOW, SYNTH_JOB.to_string(), job)?;
        self.graph.add(
            SYNTH_NODE,
            NodeKind::Synth,
            format!("{}/{}", MAIN_WORKFLOW, SYNTH_JOB),
            Vec::new(),
            false,
        )
    }

    fn create_asset_upload(&mut self, commands: &[String]) -> Result<()> {
        let mut steps = self.assembly_steps(AssemblySource::Artifact);
        steps.extend(asset_publish_steps(self.config, commands)?);

        let versioned = self.config.stages.needs_versioned_artifacts();
        if versioned {
            steps.push(Step::RegistryLogin {
                write: true,
                scope: Some(self.config.package_namespace.clone()),
            });
            steps.push(Step::command(self.renderer.assembly_upload()));
        }

        let mut rendered = render_workflow(&steps, D::BACKEND)?;
        let level = if versioned {
            AccessLevel::Write
        } else {
            AccessLevel::Read
        };
        rendered.permissions.request(CONTENTS, level);
        if versioned {
            rendered.permissions.request(PACKAGES, AccessLevel::Write);
        }

        let job = self.job(
            "Publish assets".to_string(),
            vec![SYNTH_JOB.to_string()],
            None,
            rendered,
        );
        self.insert_job(MAIN_WORKFLOW, ASSET_UPLOAD_JOB.to_string(), job)?;
        self.graph.add(
            ASSET_UPLOAD_NODE,
            NodeKind::AssetUpload,
            format!("{}/{}", MAIN_WORKFLOW, ASSET_UPLOAD_JOB),
            vec![SYNTH_NODE.to_string()],
            false,
        )
    }

    fn create_deployment(&mut self, stage: &Stage) -> Result<()> {
        let node = deployment_node(&stage.name);
        let id = job_id("deploy", &stage.name);

        if stage.manual_approval {
            let workflow = job_id("release", &stage.name);
            let gate = approval_node(&stage.name);
            let gate_needs = match &self.previous {
                Some((prev, _, _)) => vec![prev.clone()],
                None => vec![ASSET_UPLOAD_NODE.to_string()],
            };
            self.graph
                .add(&gate, NodeKind::Approval, workflow.clone(), gate_needs, true)?;

            self.workflows.insert(
                workflow.clone(),
                Workflow::new(
                    workflow.clone(),
                    Triggers::manual_with_input(
                        VERSION_INPUT,
                        "Version of the cloud assembly package to deploy",
                    ),
                ),
            );
            let job = self.deployment_job(stage, Vec::new(), AssemblySource::Package)?;
            self.insert_job(&workflow, id.clone(), job)?;
            self.graph.add(
                &node,
                NodeKind::Deployment,
                format!("{}/{}", workflow, id),
                vec![gate],
                false,
            )?;

            log::debug!("Stage '{}' deploys through workflow {}", stage.name, workflow);
            self.current = workflow.clone();
            self.previous = Some((node, workflow, id));
            return Ok(());
        }

        let workflow = self.current.clone();
        let in_main = workflow == MAIN_WORKFLOW;

        let mut node_needs = vec![ASSET_UPLOAD_NODE.to_string()];
        let mut job_needs = Vec::new();
        if in_main {
            job_needs.push(ASSET_UPLOAD_JOB.to_string());
        }
        if let Some((prev_node, prev_workflow, prev_job)) = &self.previous {
            node_needs.push(prev_node.clone());
            if *prev_workflow == workflow {
                job_needs.push(prev_job.clone());
            }
        }

        let source = if in_main {
            AssemblySource::Artifact
        } else {
            AssemblySource::Package
        };
        let job = self.deployment_job(stage, job_needs, source)?;
        self.insert_job(&workflow, id.clone(), job)?;
        self.graph.add(
            &node,
            NodeKind::Deployment,
            format!("{}/{}", workflow, id),
            node_needs,
            false,
        )?;

        self.previous = Some((node, workflow, id));
        Ok(())
    }

    fn create_independent_deployment(&mut self, stage: &Stage) -> Result<()> {
        let workflow = job_id("deploy", &stage.name);
        let id = workflow.clone();
        let triggers = if stage.deploy_on_push {
            Triggers::push(&self.config.branch_name)
        } else {
            Triggers::manual()
        };
        let manual = triggers.is_manual();

        self.workflows
            .insert(workflow.clone(), Workflow::new(workflow.clone(), triggers));
        let job = self.deployment_job(stage, Vec::new(), AssemblySource::Synth)?;
        self.insert_job(&workflow, id.clone(), job)?;
        self.graph.add(
            deployment_node(&stage.name),
            NodeKind::IndependentDeployment,
            format!("{}/{}", workflow, id),
            vec![ASSET_UPLOAD_NODE.to_string()],
            manual,
        )
    }

    fn finish(self: Box<Self>) -> Result<EngineResult> {
        let this = *self;
        Ok(EngineResult {
            output: D::wrap(this.workflows),
            graph: this.graph,
        })
    }
}
