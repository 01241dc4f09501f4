use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use stagehand::log_status;
use stagehand::pipeline::{self, PipelinePlan};

use super::CmdResult;

#[derive(Args)]
pub struct PlanArgs {
    /// Pipeline configuration file (YAML, JSON or TOML)
    pub config: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub command: &'static str,
    #[serde(flatten)]
    pub plan: PipelinePlan,
}

pub fn run(args: PlanArgs) -> CmdResult<PlanOutput> {
    let config = super::load_config(&args.config)?;
    let plan = pipeline::compile(&config)?.plan();
    log_status!("plan", "{} nodes for {}", plan.nodes.len(), plan.backend);

    Ok((
        PlanOutput {
            command: "plan",
            plan,
        },
        0,
    ))
}
