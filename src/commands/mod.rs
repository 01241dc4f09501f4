use std::path::{Path, PathBuf};

use stagehand::config::{self, PipelineConfig};

pub type CmdResult<T> = stagehand::Result<(T, i32)>;

pub mod compile;
pub mod plan;
pub mod validate;

/// Expand a leading `~` in a path argument.
pub(crate) fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).to_string())
}

/// Load and validate the pipeline configuration named on the command line.
pub(crate) fn load_config(path: &Path) -> stagehand::Result<PipelineConfig> {
    config::load(&expand_path(path))
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args))
    };
}

pub(crate) fn run_json(command: crate::Commands) -> (stagehand::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Compile(args) => dispatch!(args, compile),
        crate::Commands::Plan(args) => dispatch!(args, plan),
        crate::Commands::Validate(args) => dispatch!(args, validate),
    }
}
