//! Task definitions handed to the host task runner (`tasks.json`).

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::render::{CommandRenderer, StackTarget};
use crate::stage::{FEATURE_STAGE, PERSONAL_STAGE};

pub const FILE_NAME: &str = "tasks.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStep {
    Exec(String),
    /// Run another task by name.
    Spawn(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub name: String,
    pub description: String,
    pub steps: Vec<TaskStep>,
}

impl TaskDefinition {
    fn exec(name: impl Into<String>, description: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps: commands.into_iter().map(TaskStep::Exec).collect(),
        }
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match s {
            TaskStep::Exec(c) => Some(c.as_str()),
            TaskStep::Spawn(_) => None,
        })
    }
}

#[derive(Serialize)]
struct TaskFile<'a> {
    tasks: &'a [TaskDefinition],
}

/// All tasks, in a fixed order: stages, personal, feature, release.
pub fn build(config: &PipelineConfig) -> Vec<TaskDefinition> {
    let r = CommandRenderer::new(config);
    let mut tasks = Vec::new();

    for stage in config.stages.all() {
        let name = &stage.name;
        tasks.push(TaskDefinition::exec(
            format!("deploy:{}", name),
            format!("Deploy stage {}", name),
            r.deploy(name),
        ));
        tasks.push(TaskDefinition::exec(
            format!("diff:{}", name),
            format!("Diff stage {}", name),
            r.diff(name),
        ));
        if stage.watchable {
            tasks.push(TaskDefinition::exec(
                format!("watch:{}", name),
                format!("Watch stage {}", name),
                r.watch(name),
            ));
        }
    }

    if let Some(personal) = &config.personal_stage {
        let target = StackTarget::Scoped {
            stage: PERSONAL_STAGE,
            variable: &personal.user_variable,
        };
        tasks.extend(local_stack_tasks(&r, target, "personal stack", true));
    }
    if let Some(feature) = &config.feature_stages {
        let target = StackTarget::Scoped {
            stage: FEATURE_STAGE,
            variable: &feature.branch_variable,
        };
        tasks.extend(local_stack_tasks(&r, target, "feature stack", false));
    }

    tasks.push(TaskDefinition::exec(
        "bump",
        "Bump the cloud assembly version",
        vec![config.bump_command.clone()],
    ));
    tasks.push(TaskDefinition::exec(
        "publish:assets",
        "Publish all CDK assets",
        r.asset_upload(None),
    ));
    for stage in &config.stages.ordered {
        tasks.push(TaskDefinition::exec(
            format!("publish:assets:{}", stage.name),
            format!("Publish CDK assets of stage {}", stage.name),
            r.asset_upload(Some(&stage.name)),
        ));
    }
    tasks.push(TaskDefinition::exec(
        "release:push-assembly",
        "Publish the cloud assembly package",
        r.assembly_publish(),
    ));

    tasks
}

fn local_stack_tasks(
    r: &CommandRenderer<'_>,
    target: StackTarget<'_>,
    label: &str,
    watch: bool,
) -> Vec<TaskDefinition> {
    let stage = target.stage();
    let mut tasks = vec![
        TaskDefinition {
            name: format!("deploy:{}", stage),
            description: format!("Deploy the {}", label),
            steps: vec![TaskStep::Spawn(SYNTH_TASK.to_string())]
                .into_iter()
                .chain(r.deploy(target).into_iter().map(TaskStep::Exec))
                .collect(),
        },
        TaskDefinition::exec(format!("diff:{}", stage), format!("Diff the {}", label), r.diff(target)),
        TaskDefinition::exec(
            format!("destroy:{}", stage),
            format!("Destroy the {}", label),
            r.destroy(target),
        ),
    ];
    if watch {
        tasks.push(TaskDefinition::exec(
            format!("watch:{}", stage),
            format!("Watch the {}", label),
            r.watch(target),
        ));
    }
    tasks
}

/// Host task that synthesizes the app; local stacks deploy a fresh assembly.
const SYNTH_TASK: &str = "synth:silent";

pub fn to_json(tasks: &[TaskDefinition]) -> Result<String> {
    let mut json = serde_json::to_string_pretty(&TaskFile { tasks })
        .map_err(|e| Error::internal_json(e.to_string(), Some(format!("serialize {}", FILE_NAME))))?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, ConfigFormat};
    use pretty_assertions::assert_eq;

    fn config(extra: &str) -> PipelineConfig {
        let content = format!(
            r#"
stackPrefix: MyApp
packageNamespace: "@acme"
engine: gitlab
roleFallback: ambient
stages:
  - name: dev
    env: {{ account: "123456789012", region: eu-central-1 }}
    watchable: true
  - name: prod
    env: {{ account: "123456789012", region: eu-central-1 }}
    manualApproval: true
independentStages:
  - name: qa
    env: {{ account: "123456789012", region: eu-central-1 }}
{}"#,
            extra
        );
        config::from_str(&content, ConfigFormat::Yaml).unwrap()
    }

    fn names(tasks: &[TaskDefinition]) -> Vec<&str> {
        tasks.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn stage_and_release_tasks() {
        let tasks = build(&config(""));
        assert_eq!(
            names(&tasks),
            vec![
                "deploy:dev",
                "diff:dev",
                "watch:dev",
                "deploy:prod",
                "diff:prod",
                "deploy:qa",
                "diff:qa",
                "bump",
                "publish:assets",
                "publish:assets:dev",
                "publish:assets:prod",
                "release:push-assembly",
            ]
        );
        let watch = tasks.iter().find(|t| t.name == "watch:dev").unwrap();
        assert_eq!(
            watch.commands().collect::<Vec<_>>(),
            vec!["npx cdk deploy --watch --hotswap MyApp-dev"]
        );
    }

    #[test]
    fn personal_and_feature_tasks() {
        let tasks = build(&config(
            r#"personalStage:
  env: { account: "123456789012", region: eu-west-1 }
  userVariable: DEV_USER
featureStages:
  env: { account: "123456789012", region: eu-west-1 }
"#,
        ));
        let names = names(&tasks);
        for expected in [
            "deploy:personal",
            "diff:personal",
            "destroy:personal",
            "watch:personal",
            "deploy:feature",
            "diff:feature",
            "destroy:feature",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
        assert!(!names.contains(&"watch:feature"));

        let destroy = tasks.iter().find(|t| t.name == "destroy:feature").unwrap();
        assert_eq!(
            destroy.steps,
            vec![TaskStep::Exec(
                "npx cdk destroy \"MyApp-feature-$(printf '%s' \"${BRANCH:-}\" | tr -cs 'A-Za-z0-9' '-')\""
                    .to_string()
            )]
        );
        let deploy = tasks.iter().find(|t| t.name == "deploy:personal").unwrap();
        assert_eq!(deploy.steps[0], TaskStep::Spawn("synth:silent".to_string()));
        assert!(deploy
            .commands()
            .all(|c| c.contains("\"MyApp-personal-$(printf '%s' \"${DEV_USER:-}\"")));
        let diff = tasks.iter().find(|t| t.name == "diff:personal").unwrap();
        assert!(diff.commands().all(|c| c.contains("${DEV_USER:-}")));
    }

    #[test]
    fn json_uses_exec_and_spawn_keys() {
        let tasks = build(&config(""));
        let json: serde_json::Value = serde_json::from_str(&to_json(&tasks).unwrap()).unwrap();
        assert_eq!(json["tasks"][0]["name"], "deploy:dev");
        assert!(json["tasks"][0]["steps"][0]["exec"]
            .as_str()
            .unwrap()
            .contains("--outputs-file cdk-outputs-dev.json"));
    }
}
