//! Job/workflow document model shared by the GitHub and CodeCatalyst engines.
//!
//! Maps are `BTreeMap`s so serialization order never depends on insertion
//! or hashing.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::permissions::Permissions;

/// One workflow file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    pub name: String,
    pub on: Triggers,
    pub jobs: BTreeMap<String, Job>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, on: Triggers) -> Self {
        Self {
            name: name.into(),
            on,
            jobs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Triggers {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<PushTrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_dispatch: Option<WorkflowDispatch>,
}

impl Triggers {
    pub fn push(branch: &str) -> Self {
        Self {
            push: Some(PushTrigger {
                branches: vec![branch.to_string()],
            }),
            workflow_dispatch: None,
        }
    }

    pub fn manual() -> Self {
        Self {
            push: None,
            workflow_dispatch: Some(WorkflowDispatch::default()),
        }
    }

    /// Manual dispatch with a required string input.
    pub fn manual_with_input(input: &str, description: &str) -> Self {
        let mut dispatch = WorkflowDispatch::default();
        dispatch.inputs.insert(
            input.to_string(),
            WorkflowInput {
                description: description.to_string(),
                required: true,
                input_type: "string".to_string(),
            },
        );
        Self {
            push: None,
            workflow_dispatch: Some(dispatch),
        }
    }

    pub fn is_manual(&self) -> bool {
        self.push.is_none() && self.workflow_dispatch.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushTrigger {
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowDispatch {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, WorkflowInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowInput {
    pub description: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub input_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub name: String,
    #[serde(rename = "runs-on")]
    pub runs_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Permissions::is_empty")]
    pub permissions: Permissions,
    pub steps: Vec<JobStep>,
}

impl Job {
    pub fn needs_job(&self, id: &str) -> bool {
        self.needs.iter().any(|n| n == id)
    }

    /// Every `run` script of the job, in order.
    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match s {
            JobStep::Run { run, .. } => Some(run.as_str()),
            JobStep::Uses { .. } => None,
        })
    }
}

/// A job step either uses an action or runs a script.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobStep {
    Uses {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        uses: String,
        #[serde(rename = "with", skip_serializing_if = "BTreeMap::is_empty")]
        with: BTreeMap<String, String>,
    },
    Run {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        run: String,
    },
}

impl JobStep {
    pub fn uses(name: &str, action: &str, with: &[(&str, &str)]) -> Self {
        JobStep::Uses {
            name: Some(name.to_string()),
            uses: action.to_string(),
            with: with
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Multi-line script step; `None` for an empty command list.
    pub fn run<S: AsRef<str>>(name: Option<&str>, commands: &[S]) -> Option<Self> {
        if commands.is_empty() {
            return None;
        }
        Some(JobStep::Run {
            name: name.map(str::to_string),
            run: commands
                .iter()
                .map(|c| c.as_ref())
                .collect::<Vec<_>>()
                .join("\n"),
        })
    }

    pub fn action(&self) -> Option<&str> {
        match self {
            JobStep::Uses { uses, .. } => Some(uses),
            JobStep::Run { .. } => None,
        }
    }
}
