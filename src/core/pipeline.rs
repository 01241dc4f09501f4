//! Pipeline orchestration: drive one engine over the validated stages, then
//! emit the task definitions and the application entry point.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::app;
use crate::config::PipelineConfig;
use crate::engine::{self, Backend, DependencyGraph, EngineOutput, GeneratedFile};
use crate::error::{Error, Result};
use crate::local_files::FileSystem;
use crate::render::CommandRenderer;
use crate::tasks::{self, TaskDefinition};

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPipeline {
    pub backend: Backend,
    pub output: EngineOutput,
    pub graph: DependencyGraph,
    pub tasks: Vec<TaskDefinition>,
    pub app: String,
}

impl CompiledPipeline {
    /// Every generated file in a stable order: engine files, `tasks.json`,
    /// then the entry point.
    pub fn files(&self) -> Result<Vec<GeneratedFile>> {
        let mut files = self.output.files()?;
        files.push(GeneratedFile::new(tasks::FILE_NAME, tasks::to_json(&self.tasks)?));
        files.push(GeneratedFile::new(app::FILE_PATH, self.app.clone()));
        Ok(files)
    }

    pub fn plan(&self) -> PipelinePlan {
        PipelinePlan {
            backend: self.backend,
            nodes: self.graph.nodes().to_vec(),
        }
    }
}

/// Job graph summary printed by `plan`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelinePlan {
    pub backend: Backend,
    pub nodes: Vec<engine::GraphNode>,
}

pub fn compile(config: &PipelineConfig) -> Result<CompiledPipeline> {
    let renderer = CommandRenderer::new(config);
    let mut engine = engine::create(config);
    let backend = engine.backend();
    log::debug!("Compiling {} stages for {}", config.stages.all().count(), backend);

    engine.create_synth(&renderer.synth())?;
    engine.create_asset_upload(&renderer.asset_upload(None))?;

    for stage in &config.stages.ordered {
        log::debug!("Adding ordered stage {}", stage.name);
        engine.create_deployment(stage)?;
    }
    for stage in &config.stages.independent {
        log::debug!("Adding independent stage {}", stage.name);
        engine.create_independent_deployment(stage)?;
    }

    let result = engine.finish()?;
    let tasks = tasks::build(config);
    let app = app::render(config)?;

    log::info!(
        "Compiled {} pipeline: {} graph nodes, {} tasks",
        backend,
        result.graph.len(),
        tasks.len()
    );

    Ok(CompiledPipeline {
        backend,
        output: result.output,
        graph: result.graph,
        tasks,
        app,
    })
}

/// Write `files` below `root`. Nothing is written unless every path is
/// relative and stays inside `root`.
pub fn write_files(fs: &dyn FileSystem, root: &Path, files: &[GeneratedFile]) -> Result<Vec<PathBuf>> {
    for file in files {
        let relative = Path::new(&file.path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(Error::validation_invalid_argument(
                "path",
                format!("Generated path '{}' escapes the output directory", file.path),
                None,
                None,
            ));
        }
    }

    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let path = root.join(&file.path);
        fs.write(&path, &file.content)?;
        if file.executable {
            fs.set_executable(&path)?;
        }
        log_status!("compile", "Wrote {}", file.path);
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ConfigFormat};
    use crate::engine::NodeKind;
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"
stackPrefix: MyApp
packageNamespace: "@acme"
engine: gitlab
iamRoleArns:
  default: "arn:aws:iam::123456789012:role/deploy"
stages:
  - name: dev
    env: { account: "123456789012", region: eu-central-1 }
  - name: prod
    env: { account: "123456789012", region: eu-central-1 }
    manualApproval: true
"#;

    #[test]
    fn compile_lists_engine_files_then_tasks_and_app() {
        let config = config::from_str(CONFIG, ConfigFormat::Yaml).unwrap();
        let compiled = compile(&config).unwrap();
        let paths: Vec<_> = compiled
            .files()
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec![".gitlab-ci.yml", "tasks.json", "src/app.ts"]);
    }

    #[test]
    fn plan_reports_graph_in_creation_order() {
        let config = config::from_str(CONFIG, ConfigFormat::Yaml).unwrap();
        let plan = compile(&config).unwrap().plan();
        let kinds: Vec<_> = plan.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Synth,
                NodeKind::AssetUpload,
                NodeKind::Deployment,
                NodeKind::Approval,
                NodeKind::Deployment,
            ]
        );
        assert!(plan.nodes[3].manual);
    }

    #[test]
    fn write_files_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            GeneratedFile::new("ok.txt", "fine"),
            GeneratedFile::new("../evil.txt", "nope"),
        ];
        let err = write_files(&crate::local_files::local(), dir.path(), &files).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ValidationInvalidArgument);
        assert!(!dir.path().join("ok.txt").exists());
    }
}
