//! Deployment stages and their validation.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::slugify::{sanitize_stage_name, validate_stage_name};
use crate::step::Step;

pub const PERSONAL_STAGE: &str = "personal";
pub const FEATURE_STAGE: &str = "feature";

/// Cloud deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub account: String,
    pub region: String,
}

impl Environment {
    pub(crate) fn validate(&self, field: &str) -> Result<()> {
        static ACCOUNT: OnceLock<Regex> = OnceLock::new();
        static REGION: OnceLock<Regex> = OnceLock::new();

        let account = ACCOUNT.get_or_init(|| Regex::new(r"^\d{12}$").expect("valid regex"));
        let region =
            REGION.get_or_init(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$").expect("valid regex"));

        if !account.is_match(&self.account) {
            return Err(Error::config_invalid_value(
                format!("{}.account", field),
                Some(self.account.clone()),
                "Account must be a 12 digit account id",
            ));
        }
        if !region.is_match(&self.region) {
            return Err(Error::config_invalid_value(
                format!("{}.region", field),
                Some(self.region.clone()),
                "Region must look like 'eu-central-1'",
            ));
        }
        Ok(())
    }
}

/// A stage as declared in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub name: String,
    pub env: Environment,
    #[serde(default)]
    pub manual_approval: bool,
    #[serde(default)]
    pub watchable: bool,
    #[serde(default)]
    pub deploy_on_push: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_diff_steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_deploy_steps: Vec<Step>,
}

/// One deployment target of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub name: String,
    pub env: Environment,
    pub manual_approval: bool,
    pub watchable: bool,
    pub independent: bool,
    pub deploy_on_push: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_diff_steps: Vec<Step>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub post_deploy_steps: Vec<Step>,
}

impl Stage {
    fn from_config(config: StageConfig, independent: bool) -> Self {
        Self {
            name: config.name.trim().to_string(),
            env: config.env,
            manual_approval: config.manual_approval,
            watchable: config.watchable,
            independent,
            deploy_on_push: config.deploy_on_push,
            post_diff_steps: config.post_diff_steps,
            post_deploy_steps: config.post_deploy_steps,
        }
    }

    /// Identifier fragment for generated code, e.g. `Dev2` for `dev 2`.
    pub fn identifier(&self) -> String {
        sanitize_stage_name(&self.name)
    }
}

/// Options for the per-developer stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalStageConfig {
    pub env: Environment,
    #[serde(default)]
    pub watchable: bool,
    /// Variable naming the developer; its value suffixes the stack name.
    #[serde(default = "default_user_variable")]
    pub user_variable: String,
}

impl PersonalStageConfig {
    pub(crate) fn validate(&self, field: &str) -> Result<()> {
        self.env.validate(&format!("{}.env", field))?;
        validate_variable_name(&self.user_variable, &format!("{}.userVariable", field))
    }
}

/// Options for per-branch feature stacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStageConfig {
    pub env: Environment,
    /// Variable holding the branch name; its value suffixes the stack name.
    #[serde(default = "default_branch_variable")]
    pub branch_variable: String,
}

impl FeatureStageConfig {
    pub(crate) fn validate(&self, field: &str) -> Result<()> {
        self.env.validate(&format!("{}.env", field))?;
        validate_variable_name(&self.branch_variable, &format!("{}.branchVariable", field))
    }
}

/// Environment variable names are interpolated into generated shell and
/// TypeScript, so only portable identifiers are accepted.
fn validate_variable_name(name: &str, field: &str) -> Result<()> {
    static VARIABLE: OnceLock<Regex> = OnceLock::new();
    let pattern =
        VARIABLE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(Error::config_invalid_value(
            field,
            Some(name.to_string()),
            "Variable name must be a shell identifier such as 'USER'",
        ))
    }
}

fn default_user_variable() -> String {
    "USER".to_string()
}

fn default_branch_variable() -> String {
    "BRANCH".to_string()
}

/// Validated stage collections.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSet {
    /// Main pipeline, deployed strictly in order.
    pub ordered: Vec<Stage>,
    /// Stages deployed in parallel, depending only on asset upload.
    pub independent: Vec<Stage>,
}

impl StageSet {
    pub fn build(
        stages: Vec<StageConfig>,
        independent: Vec<StageConfig>,
        reserved: &[&str],
    ) -> Result<Self> {
        let ordered: Vec<Stage> = stages
            .into_iter()
            .map(|s| Stage::from_config(s, false))
            .collect();
        let independent: Vec<Stage> = independent
            .into_iter()
            .map(|s| Stage::from_config(s, true))
            .collect();

        let set = Self {
            ordered,
            independent,
        };
        set.validate(reserved)?;
        Ok(set)
    }

    fn validate(&self, reserved: &[&str]) -> Result<()> {
        // name -> kind of the stage that claimed it; identifier -> name
        let mut names: BTreeMap<&str, &'static str> = BTreeMap::new();
        let mut identifiers: BTreeMap<String, &str> = BTreeMap::new();

        for (field, stage) in self.labelled() {
            let kind = if stage.independent {
                "independent stage"
            } else {
                "stage"
            };

            validate_stage_name(&stage.name, &format!("{}.name", field))?;
            stage.env.validate(&format!("{}.env", field))?;

            if let Some(taken) = reserved
                .iter()
                .find(|r| **r == stage.name || sanitize_stage_name(r) == stage.identifier())
            {
                return Err(Error::config_id_collision(
                    stage.name.clone(),
                    kind,
                    format!("the {} stack", taken),
                ));
            }

            if let Some(existing) = names.insert(&stage.name, kind) {
                return Err(Error::config_id_collision(
                    stage.name.clone(),
                    kind,
                    format!("another {}", existing),
                ));
            }

            if let Some(existing) = identifiers.insert(stage.identifier(), &stage.name) {
                return Err(Error::config_id_collision(
                    stage.name.clone(),
                    kind,
                    format!("stage '{}' (same identifier {})", existing, stage.identifier()),
                ));
            }

            if stage.manual_approval && stage.independent {
                return Err(Error::config_invalid_value(
                    format!("{}.manualApproval", field),
                    Some("true".to_string()),
                    "Independent stages cannot require manual approval",
                ));
            }
        }

        Ok(())
    }

    fn labelled(&self) -> impl Iterator<Item = (String, &Stage)> {
        let ordered = self
            .ordered
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("stages[{}]", i), s));
        let independent = self
            .independent
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("independentStages[{}]", i), s));
        ordered.chain(independent)
    }

    pub fn all(&self) -> impl Iterator<Item = &Stage> {
        self.ordered.iter().chain(self.independent.iter())
    }

    pub fn get(&self, name: &str) -> Option<&Stage> {
        self.all().find(|s| s.name == name)
    }

    /// Approval-gated stages must redeploy a pinned, previously built assembly.
    pub fn needs_versioned_artifacts(&self) -> bool {
        self.ordered.iter().any(|s| s.manual_approval)
    }
}
