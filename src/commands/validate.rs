use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use stagehand::Backend;

use super::CmdResult;

#[derive(Args)]
pub struct ValidateArgs {
    /// Pipeline configuration file (YAML, JSON or TOML)
    pub config: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOutput {
    pub command: &'static str,
    pub valid: bool,
    pub backend: Backend,
    pub stages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub independent_stages: Vec<String>,
    pub versioned_artifacts: bool,
    pub assembly_package: String,
}

/// Load and validate only; no engine runs.
pub fn run(args: ValidateArgs) -> CmdResult<ValidateOutput> {
    let config = super::load_config(&args.config)?;

    Ok((
        ValidateOutput {
            command: "validate",
            valid: true,
            backend: config.backend(),
            stages: config.stages.ordered.iter().map(|s| s.name.clone()).collect(),
            independent_stages: config
                .stages
                .independent
                .iter()
                .map(|s| s.name.clone())
                .collect(),
            versioned_artifacts: config.stages.needs_versioned_artifacts(),
            assembly_package: config.assembly_package.clone(),
        },
        0,
    ))
}
