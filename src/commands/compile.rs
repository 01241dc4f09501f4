use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use stagehand::local_files;
use stagehand::log_status;
use stagehand::pipeline;
use stagehand::Backend;

use super::CmdResult;

#[derive(Args)]
pub struct CompileArgs {
    /// Pipeline configuration file (YAML, JSON or TOML)
    pub config: PathBuf,

    /// Directory the generated files are written to
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Compile and report without writing any file
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub path: String,
    pub bytes: usize,
    pub sha256: String,
    pub executable: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutput {
    pub command: &'static str,
    pub backend: Backend,
    pub dry_run: bool,
    pub out_dir: String,
    pub files: Vec<FileSummary>,
    pub tasks: usize,
}

pub fn run(args: CompileArgs) -> CmdResult<CompileOutput> {
    let config = super::load_config(&args.config)?;
    let compiled = pipeline::compile(&config)?;
    let files = compiled.files()?;
    let out_dir = super::expand_path(&args.out_dir);

    if args.dry_run {
        log_status!("compile", "Dry run: {} files not written", files.len());
    } else {
        pipeline::write_files(&local_files::local(), &out_dir, &files)?;
    }

    let summaries = files
        .iter()
        .map(|f| FileSummary {
            path: f.path.clone(),
            bytes: f.content.len(),
            sha256: f.digest(),
            executable: f.executable,
        })
        .collect();

    Ok((
        CompileOutput {
            command: "compile",
            backend: compiled.backend,
            dry_run: args.dry_run,
            out_dir: out_dir.display().to_string(),
            files: summaries,
            tasks: compiled.tasks.len(),
        },
        0,
    ))
}
