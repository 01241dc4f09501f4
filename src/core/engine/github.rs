//! GitHub Actions: one workflow per trigger under `.github/workflows`.

use std::collections::BTreeMap;

use super::dialect::{Dialect, WorkflowEngine, VERSION_INPUT};
use super::workflow::{JobStep, Workflow};
use super::{Backend, EngineOutput};
use crate::config::{GithubOptions, PipelineConfig};
use crate::stage::Stage;

pub struct Github {
    options: GithubOptions,
}

pub type GithubEngine<'a> = WorkflowEngine<'a, Github>;

pub fn engine<'a>(config: &'a PipelineConfig, options: &GithubOptions) -> GithubEngine<'a> {
    WorkflowEngine::new(
        config,
        Github {
            options: options.clone(),
        },
    )
}

impl Dialect for Github {
    const BACKEND: Backend = Backend::Github;

    fn runs_on(&self) -> Vec<String> {
        self.options.runner_tags.clone()
    }

    fn setup_steps(&self) -> Vec<JobStep> {
        vec![
            JobStep::uses("Checkout", "actions/checkout@v4", &[]),
            JobStep::uses(
                "Setup Node.js",
                "actions/setup-node@v4",
                &[("node-version", self.options.node_version.as_str())],
            ),
        ]
    }

    fn version_input(&self) -> String {
        format!("${{{{ github.event.inputs.{} }}}}", VERSION_INPUT)
    }

    fn environment(&self, stage: &Stage) -> Option<String> {
        self.options.use_environments.then(|| stage.name.clone())
    }

    fn wrap(workflows: BTreeMap<String, Workflow>) -> EngineOutput {
        EngineOutput::Github(workflows)
    }
}
