//! Shell script backend: `pipeline.sh` with one function per task.
//!
//! There is no job graph at run time. Running the script without arguments
//! executes the main sequence in order; named arguments run single tasks.
//! Every task body runs in a subshell so exported credentials never leak
//! into the next task.

use super::{
    approval_node, asset_publish_steps, assume_role, deployment_node, job_id, primary_region, Backend,
    DependencyGraph, EngineOutput, EngineResult, NodeKind, PipelineEngine, StageSteps,
    ASSET_UPLOAD_NODE, GENERATED_HEADER, SYNTH_NODE,
};
use crate::config::{BashOptions, PipelineConfig};
use crate::error::{Error, Result};
use crate::render::{CommandRenderer, PROJECT_VERSION, VERSION_VARIABLE};
use crate::roles::RolePurpose;
use crate::stage::Stage;
use crate::step::{render_script, Step};
use crate::utils::shell::quote_arg;

pub const FILE_NAME: &str = "pipeline.sh";

pub const SYNTH_TASK: &str = "synth";
pub const PUBLISH_ASSETS_TASK: &str = "publish-assets";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BashTask {
    pub name: String,
    pub commands: Vec<String>,
    /// Interactive confirmation; a refusal aborts the run.
    pub gate: bool,
}

impl BashTask {
    pub fn function_name(&self) -> String {
        let body: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("task_{}", body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BashScript {
    pub strict: bool,
    pub tasks: Vec<BashTask>,
    /// Task names run when the script gets no arguments.
    pub main: Vec<String>,
}

impl BashScript {
    pub fn task(&self, name: &str) -> Option<&BashTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Invocation of a task function. Under `set -e` the call must stay
    /// bare: bash ignores errexit inside anything on the left of `||`.
    /// Without it the exit status is checked explicitly.
    fn call(&self, task: &BashTask) -> String {
        if self.strict {
            task.function_name()
        } else {
            format!("{} || exit $?", task.function_name())
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#!/usr/bin/env bash\n");
        out.push_str(&format!("# {}\n", GENERATED_HEADER));
        if self.strict {
            out.push_str("set -euo pipefail\n");
        }
        out.push('\n');

        for task in &self.tasks {
            out.push_str(&format!("{}() (\n", task.function_name()));
            if task.commands.is_empty() {
                out.push_str("  :\n");
            }
            for command in &task.commands {
                for line in command.lines() {
                    out.push_str(&format!("  {}\n", line));
                }
            }
            out.push_str(")\n\n");
        }

        out.push_str("run_main() {\n");
        for name in &self.main {
            if let Some(task) = self.task(name) {
                out.push_str(&format!("  {}\n", self.call(task)));
            }
        }
        if self.main.is_empty() {
            out.push_str("  :\n");
        }
        out.push_str("}\n\n");

        out.push_str("if [ \"$#\" -eq 0 ]; then\n  run_main\n  exit 0\nfi\n\n");
        out.push_str("for task in \"$@\"; do\n  case \"$task\" in\n");
        for task in &self.tasks {
            out.push_str(&format!(
                "    {}) {} ;;\n",
                quote_arg(&task.name),
                self.call(task)
            ));
        }
        out.push_str("    *) echo \"Unknown task: $task\" >&2; exit 1 ;;\n");
        out.push_str("  esac\ndone\n");
        out
    }
}

pub struct BashEngine<'a> {
    config: &'a PipelineConfig,
    options: BashOptions,
    renderer: CommandRenderer<'a>,
    tasks: Vec<BashTask>,
    main: Vec<String>,
    graph: DependencyGraph,
    previous: Option<String>,
}

impl<'a> BashEngine<'a> {
    pub fn new(config: &'a PipelineConfig, options: &BashOptions) -> Self {
        Self {
            config,
            options: options.clone(),
            renderer: CommandRenderer::new(config),
            tasks: Vec::new(),
            main: Vec::new(),
            graph: DependencyGraph::default(),
            previous: None,
        }
    }

    fn push_task(&mut self, name: String, steps: &[Step], in_main: bool) -> Result<()> {
        let commands = render_script(steps, Backend::Bash)?.steps;
        self.push_commands(name, commands, false, in_main)
    }

    fn push_commands(
        &mut self,
        name: String,
        commands: Vec<String>,
        gate: bool,
        in_main: bool,
    ) -> Result<()> {
        if self.tasks.iter().any(|t| t.name == name) {
            return Err(Error::internal_unexpected(format!(
                "Task '{}' defined twice",
                name
            )));
        }
        if in_main {
            self.main.push(name.clone());
        }
        self.tasks.push(BashTask {
            name,
            commands,
            gate,
        });
        Ok(())
    }
}

impl PipelineEngine for BashEngine<'_> {
    fn backend(&self) -> Backend {
        Backend::Bash
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

        self.push_task(SYNTH_TASK.to_string(), &steps, true)?;
        self.graph
            .add(SYNTH_NODE, NodeKind::Synth, SYNTH_TASK, Vec::new(), false)
    }

    fn create_asset_upload(&mut self, commands: &[String]) -> Result<()> {
        let mut steps = asset_publish_steps(self.config, commands)?;
        if self.config.stages.needs_versioned_artifacts() {
            steps.push(Step::command(self.renderer.assembly_upload()));
        }

        self.push_task(PUBLISH_ASSETS_TASK.to_string(), &steps, true)?;
        self.graph.add(
            ASSET_UPLOAD_NODE,
            NodeKind::AssetUpload,
            PUBLISH_ASSETS_TASK,
            vec![SYNTH_NODE.to_string()],
            false,
        )
    }

    fn create_deployment(&mut self, stage: &Stage) -> Result<()> {
        let node = deployment_node(&stage.name);
        let name = job_id("deploy", &stage.name);
        let predecessor = self
            .previous
            .clone()
            .unwrap_or_else(|| ASSET_UPLOAD_NODE.to_string());

        let node_needs = if stage.manual_approval {
            let gate = approval_node(&stage.name);
            let gate_name = job_id("approve", &stage.name);
            let prompt = quote_arg(&format!("Deploy to {}? [y/N] ", stage.name));
            let refusal = quote_arg(&format!("Deployment to {} was not approved", stage.name));
            let commands = vec![
                format!("read -r -p {} answer", prompt),
                format!(
                    "if [ \"$answer\" != \"y\" ] && [ \"$answer\" != \"Y\" ]; then echo {} >&2; exit 1; fi",
                    refusal
                ),
            ];
            self.push_commands(gate_name.clone(), commands, true, true)?;
            self.graph
                .add(&gate, NodeKind::Approval, gate_name, vec![predecessor], true)?;
            vec![gate]
        } else if self.previous.is_some() {
            vec![ASSET_UPLOAD_NODE.to_string(), predecessor]
        } else {
            vec![ASSET_UPLOAD_NODE.to_string()]
        };

        let mut steps = Vec::new();
        if stage.manual_approval {
            // `VERSION` from the environment wins; otherwise the version the
            // last `publish-assets` bumped to.
            let mut commands = vec![format!(
                "{var}=\"${{{var}:-{version}}}\"",
                var = VERSION_VARIABLE,
                version = PROJECT_VERSION
            )];
            commands.extend(
                self.renderer
                    .versioned_install(&format!("${}", VERSION_VARIABLE)),
            );
            steps.push(Step::command(commands));
        }
        steps.extend(StageSteps::build(self.config, stage)?.inline());
        self.push_task(name.clone(), &steps, true)?;
        self.graph
            .add(&node, NodeKind::Deployment, name, node_needs, false)?;

        self.previous = Some(node);
        Ok(())
    }

    fn create_independent_deployment(&mut self, stage: &Stage) -> Result<()> {
        let name = job_id("deploy", &stage.name);
        let steps = StageSteps::build(self.config, stage)?.inline();
        self.push_task(name.clone(), &steps, stage.deploy_on_push)?;
        self.graph.add(
            deployment_node(&stage.name),
            NodeKind::IndependentDeployment,
            name,
            vec![ASSET_UPLOAD_NODE.to_string()],
            !stage.deploy_on_push,
        )
    }

    fn finish(self: Box<Self>) -> Result<EngineResult> {
        let this = *self;
        Ok(EngineResult {
            output: EngineOutput::Bash(BashScript {
                strict: this.options.strict,
                tasks: this.tasks,
                main: this.main,
            }),
            graph: this.graph,
        })
    }
}
