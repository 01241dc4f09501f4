//! CodeCatalyst: named jobs in `.codecatalyst/workflows`, roles assumed with
//! `aws sts` since there is no OIDC permission block.

use std::collections::BTreeMap;

use super::dialect::{Dialect, WorkflowEngine, VERSION_INPUT};
use super::workflow::{JobStep, Workflow};
use super::{Backend, EngineOutput};
use crate::config::{CodeCatalystOptions, PipelineConfig};
use crate::stage::Stage;

pub struct CodeCatalyst {
    options: CodeCatalystOptions,
}

pub type CodeCatalystEngine<'a> = WorkflowEngine<'a, CodeCatalyst>;

pub fn engine<'a>(
    config: &'a PipelineConfig,
    options: &CodeCatalystOptions,
) -> CodeCatalystEngine<'a> {
    WorkflowEngine::new(
        config,
        CodeCatalyst {
            options: options.clone(),
        },
    )
}

impl Dialect for CodeCatalyst {
    const BACKEND: Backend = Backend::CodeCatalyst;

    fn runs_on(&self) -> Vec<String> {
        self.options.runner_tags.clone()
    }

    fn setup_steps(&self) -> Vec<JobStep> {
        vec![JobStep::uses("Checkout", "actions/checkout@v4", &[])]
    }

    fn version_input(&self) -> String {
        format!("${{Inputs.{}}}", VERSION_INPUT)
    }

    fn environment(&self, stage: &Stage) -> Option<String> {
        self.options.use_environments.then(|| stage.name.clone())
    }

    fn wrap(workflows: BTreeMap<String, Workflow>) -> EngineOutput {
        EngineOutput::CodeCatalyst(workflows)
    }
}
