//! Backend-agnostic pipeline steps.
//!
//! A [`Step`] is plain data. Each backend renders it fresh into a
//! [`StepConfig`]: the commands or actions to run, upstream step names it
//! depends on, the job permissions it needs and job-level environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::workflow::JobStep;
use crate::engine::Backend;
use crate::error::{Error, Result};
use crate::permissions::{AccessLevel, Permissions, RawPermissions, ID_TOKEN, PACKAGES};
use crate::utils::shell::quote_arg;

const DEFAULT_SESSION_NAME: &str = "stagehand";
const DEFAULT_REGION: &str = "us-east-1";
/// Shell variable holding the raw STS response.
const CREDENTIALS_VARIABLE: &str = "STAGEHAND_CREDENTIALS";

const CREDENTIALS_ACTION: &str = "aws-actions/configure-aws-credentials@v4";
const UPLOAD_ACTION: &str = "actions/upload-artifact@v4";
const DOWNLOAD_ACTION: &str = "actions/download-artifact@v4";

const GITHUB_NPM_REGISTRY: &str = "npm.pkg.github.com";
const GITLAB_NPM_REGISTRY: &str = "${CI_SERVER_HOST}/api/v4/projects/${CI_PROJECT_ID}/packages/npm/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Step {
    #[serde(rename_all = "camelCase")]
    AssumeRole {
        role_arn: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
    Command {
        commands: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        permissions: RawPermissions,
    },
    UploadArtifact {
        name: String,
        path: String,
    },
    DownloadArtifact {
        name: String,
        path: String,
    },
    RegistryLogin {
        #[serde(default)]
        write: bool,
        /// npm scope routed to the registry, e.g. `@acme`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
}

/// Rendered form of one or more steps for a single backend.
#[derive(Debug, Clone, PartialEq)]
pub struct StepConfig<T> {
    pub steps: Vec<T>,
    pub needs: Vec<String>,
    pub permissions: Permissions,
    pub env: BTreeMap<String, String>,
}

impl<T> Default for StepConfig<T> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            needs: Vec::new(),
            permissions: Permissions::new(),
            env: BTreeMap::new(),
        }
    }
}

impl<T> StepConfig<T> {
    fn of(steps: Vec<T>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    fn with_permission(mut self, scope: &str, level: AccessLevel) -> Self {
        self.permissions.request(scope, level);
        self
    }

    fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Append `other` after `self`, merging permissions and env.
    pub fn extend(&mut self, other: StepConfig<T>) {
        self.steps.extend(other.steps);
        for need in other.needs {
            if !self.needs.contains(&need) {
                self.needs.push(need);
            }
        }
        self.permissions.extend(&other.permissions);
        self.env.extend(other.env);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderedStep {
    Workflow(StepConfig<JobStep>),
    Script(StepConfig<String>),
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::AssumeRole { .. } => "assumeRole",
            Step::Command { .. } => "command",
            Step::UploadArtifact { .. } => "uploadArtifact",
            Step::DownloadArtifact { .. } => "downloadArtifact",
            Step::RegistryLogin { .. } => "registryLogin",
        }
    }

    pub fn command<S: Into<String>>(commands: impl IntoIterator<Item = S>) -> Self {
        Step::Command {
            commands: commands.into_iter().map(Into::into).collect(),
            permissions: RawPermissions::new(),
        }
    }

    pub fn render(&self, backend: Backend) -> Result<RenderedStep> {
        match backend {
            Backend::Github => self.to_github().map(RenderedStep::Workflow),
            Backend::CodeCatalyst => self.to_codecatalyst().map(RenderedStep::Workflow),
            Backend::Gitlab => self.to_gitlab().map(RenderedStep::Script),
            Backend::Bash => self.to_bash().map(RenderedStep::Script),
        }
    }

    pub fn to_github(&self) -> Result<StepConfig<JobStep>> {
        match self {
            Step::AssumeRole {
                role_arn,
                session_name,
                region,
            } => Ok(StepConfig::of(vec![JobStep::uses(
                "AWS Credentials",
                CREDENTIALS_ACTION,
                &[
                    ("role-to-assume", role_arn.as_str()),
                    (
                        "role-session-name",
                        session_name.as_deref().unwrap_or(DEFAULT_SESSION_NAME),
                    ),
                    ("aws-region", region.as_deref().unwrap_or(DEFAULT_REGION)),
                ],
            )])
            .with_permission(ID_TOKEN, AccessLevel::Write)),
            Step::RegistryLogin { write, scope } => Ok(StepConfig::of(
                JobStep::run(
                    Some("Authenticate npm registry"),
                    &npm_login(GITHUB_NPM_REGISTRY, "${NODE_AUTH_TOKEN}", scope.as_deref()),
                )
                .into_iter()
                .collect(),
            )
            .with_permission(PACKAGES, registry_level(*write))
            .with_env("NODE_AUTH_TOKEN", "${{ secrets.GITHUB_TOKEN }}")),
            _ => self.to_workflow_common(),
        }
    }

    pub fn to_codecatalyst(&self) -> Result<StepConfig<JobStep>> {
        match self {
            Step::AssumeRole {
                role_arn,
                session_name,
                region,
            } => Ok(StepConfig::of(
                JobStep::run(
                    Some("Assume role"),
                    &sts_assume_role(role_arn, session_name.as_deref(), region.as_deref(), None),
                )
                .into_iter()
                .collect(),
            )),
            Step::RegistryLogin { write, scope } => Ok(StepConfig::of(
                JobStep::run(
                    Some("Authenticate npm registry"),
                    &npm_login(GITHUB_NPM_REGISTRY, "${NODE_AUTH_TOKEN}", scope.as_deref()),
                )
                .into_iter()
                .collect(),
            )
            .with_permission(PACKAGES, registry_level(*write))
            .with_env("NODE_AUTH_TOKEN", "${Secrets.NPM_TOKEN}")),
            _ => self.to_workflow_common(),
        }
    }

    /// Variants rendered the same way by both workflow backends.
    fn to_workflow_common(&self) -> Result<StepConfig<JobStep>> {
        match self {
            Step::Command {
                commands,
                permissions,
            } => Ok(StepConfig {
                permissions: Permissions::from_raw(permissions)?,
                ..StepConfig::of(JobStep::run(None, commands).into_iter().collect())
            }),
            Step::UploadArtifact { name, path } => Ok(StepConfig::of(vec![JobStep::uses(
                &format!("Upload {}", name),
                UPLOAD_ACTION,
                &[("name", name.as_str()), ("path", path.as_str())],
            )])),
            Step::DownloadArtifact { name, path } => Ok(StepConfig::of(vec![JobStep::uses(
                &format!("Download {}", name),
                DOWNLOAD_ACTION,
                &[("name", name.as_str()), ("path", path.as_str())],
            )])),
            Step::AssumeRole { .. } | Step::RegistryLogin { .. } => Err(
                Error::internal_unexpected(format!("{} has backend-specific rendering", self.kind())),
            ),
        }
    }

    pub fn to_gitlab(&self) -> Result<StepConfig<String>> {
        match self {
            Step::AssumeRole {
                role_arn,
                session_name,
                region,
            } => Ok(StepConfig::of(sts_assume_role(
                role_arn,
                session_name.as_deref(),
                region.as_deref(),
                Some("${AWS_TOKEN}"),
            ))),
            Step::Command {
                commands,
                permissions,
            } => Ok(StepConfig {
                permissions: Permissions::from_raw(permissions)?,
                ..StepConfig::of(commands.clone())
            }),
            Step::UploadArtifact { .. } => {
                Err(Error::step_unsupported_backend(self.kind(), Backend::Gitlab))
            }
            // Artifacts reach GitLab jobs through `needs`; nothing to run.
            Step::DownloadArtifact { .. } => Ok(StepConfig::default()),
            Step::RegistryLogin { scope, .. } => Ok(StepConfig::of(npm_login(
                GITLAB_NPM_REGISTRY,
                "${CI_JOB_TOKEN}",
                scope.as_deref(),
            ))),
        }
    }

    pub fn to_bash(&self) -> Result<StepConfig<String>> {
        match self {
            Step::AssumeRole {
                role_arn,
                session_name,
                region,
            } => Ok(StepConfig::of(sts_assume_role(
                role_arn,
                session_name.as_deref(),
                region.as_deref(),
                None,
            ))),
            Step::Command {
                commands,
                permissions,
            } => Ok(StepConfig {
                permissions: Permissions::from_raw(permissions)?,
                ..StepConfig::of(commands.clone())
            }),
            Step::UploadArtifact { .. } | Step::RegistryLogin { .. } => {
                Err(Error::step_unsupported_backend(self.kind(), Backend::Bash))
            }
            // The script runs in one working directory; files are already there.
            Step::DownloadArtifact { .. } => Ok(StepConfig::default()),
        }
    }
}

/// Render `steps` in order for a workflow backend.
pub fn render_workflow(steps: &[Step], backend: Backend) -> Result<StepConfig<JobStep>> {
    let mut out = StepConfig::default();
    for step in steps {
        match step.render(backend)? {
            RenderedStep::Workflow(config) => out.extend(config),
            RenderedStep::Script(_) => {
                return Err(Error::internal_unexpected(format!(
                    "{} is not a workflow backend",
                    backend.as_str()
                )))
            }
        }
    }
    Ok(out)
}

/// Render `steps` in order for a script backend.
pub fn render_script(steps: &[Step], backend: Backend) -> Result<StepConfig<String>> {
    let mut out = StepConfig::default();
    for step in steps {
        match step.render(backend)? {
            RenderedStep::Script(config) => out.extend(config),
            RenderedStep::Workflow(_) => {
                return Err(Error::internal_unexpected(format!(
                    "{} is not a script backend",
                    backend.as_str()
                )))
            }
        }
    }
    Ok(out)
}

fn registry_level(write: bool) -> AccessLevel {
    if write {
        AccessLevel::Write
    } else {
        AccessLevel::Read
    }
}

fn npm_login(registry: &str, token_ref: &str, scope: Option<&str>) -> Vec<String> {
    let mut commands = Vec::new();
    if let Some(scope) = scope {
        commands.push(format!(
            "npm config set {} \"https://{}\"",
            quote_arg(&format!("{}:registry", scope)),
            registry
        ));
    }
    commands.push(format!(
        "npm config set -- \"//{}:_authToken\" \"{}\"",
        registry.trim_end_matches('/').to_string() + "/",
        token_ref
    ));
    commands
}

/// Shell commands exporting temporary credentials for `role_arn`.
///
/// With a web identity token reference the role is assumed through OIDC,
/// otherwise with whatever base credentials the runner has. The STS call
/// runs in a plain assignment so its failure ends the job.
fn sts_assume_role(
    role_arn: &str,
    session_name: Option<&str>,
    region: Option<&str>,
    web_identity_token: Option<&str>,
) -> Vec<String> {
    let session = session_name.unwrap_or(DEFAULT_SESSION_NAME);
    let assume = match web_identity_token {
        Some(token) => format!(
            "aws sts assume-role-with-web-identity --role-arn {} --role-session-name {} --web-identity-token \"{}\"",
            quote_arg(role_arn),
            quote_arg(session),
            token
        ),
        None => format!(
            "aws sts assume-role --role-arn {} --role-session-name {}",
            quote_arg(role_arn),
            quote_arg(session)
        ),
    };

    let mut commands = vec![
        "unset AWS_ACCESS_KEY_ID AWS_SECRET_ACCESS_KEY AWS_SESSION_TOKEN".to_string(),
        format!(
            "{}=\"$({} --query \"Credentials.[AccessKeyId,SecretAccessKey,SessionToken]\" --output text)\" || exit 1",
            CREDENTIALS_VARIABLE, assume
        ),
    ];
    for (field, name) in [
        (1, "AWS_ACCESS_KEY_ID"),
        (2, "AWS_SECRET_ACCESS_KEY"),
        (3, "AWS_SESSION_TOKEN"),
    ] {
        commands.push(format!(
            "export {}=\"$(printf '%s' \"${}\" | cut -f{})\"",
            name, CREDENTIALS_VARIABLE, field
        ));
    }
    commands.push(format!(
        "export AWS_REGION={}",
        quote_arg(region.unwrap_or(DEFAULT_REGION))
    ));
    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn assume() -> Step {
        Step::AssumeRole {
            role_arn: "arn:aws:iam::123456789012:role/deploy".to_string(),
            session_name: None,
            region: Some("eu-central-1".to_string()),
        }
    }

    #[test]
    fn parses_tagged_steps() {
        let steps: Vec<Step> = serde_yml::from_str(
            r#"
- type: assumeRole
  roleArn: arn:aws:iam::123456789012:role/x
- type: command
  commands: [echo hi]
  permissions: { contents: write }
- type: registryLogin
"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].kind(), "assumeRole");
        assert_eq!(
            steps[2],
            Step::RegistryLogin {
                write: false,
                scope: None
            }
        );
    }

    #[test]
    fn github_assume_role_requests_id_token() {
        let config = assume().to_github().unwrap();
        assert_eq!(config.permissions.level(ID_TOKEN), AccessLevel::Write);
        assert_eq!(config.steps[0].action(), Some(CREDENTIALS_ACTION));
        assert!(config.needs.is_empty());
    }

    #[test]
    fn codecatalyst_assume_role_uses_sts_without_oidc() {
        let config = assume().to_codecatalyst().unwrap();
        assert!(config.permissions.is_empty());
        match &config.steps[0] {
            JobStep::Run { run, .. } => {
                assert!(run.contains("aws sts assume-role --role-arn"));
                assert!(run.contains("export AWS_REGION=eu-central-1"));
            }
            other => panic!("expected run step, got {:?}", other),
        }
    }

    #[test]
    fn gitlab_assume_role_uses_web_identity() {
        let config = assume().to_gitlab().unwrap();
        assert!(config.steps[1].contains("assume-role-with-web-identity"));
        assert!(config.steps[1].contains("\"${AWS_TOKEN}\""));
    }

    #[test]
    fn sts_failure_is_not_swallowed() {
        let commands = assume().to_bash().unwrap().steps;
        // The STS call sits in a bare assignment whose status is checked.
        assert!(commands[1].starts_with("STAGEHAND_CREDENTIALS=\"$(aws sts assume-role "));
        assert!(commands[1].ends_with("--output text)\" || exit 1"));
        assert!(commands.iter().all(|c| !c.starts_with("export $(")));
        assert_eq!(
            commands[2],
            "export AWS_ACCESS_KEY_ID=\"$(printf '%s' \"$STAGEHAND_CREDENTIALS\" | cut -f1)\""
        );
        assert_eq!(commands[5], "export AWS_REGION=eu-central-1");
    }

    #[test]
    fn command_permissions_are_parsed() {
        let step = Step::Command {
            commands: vec!["echo hi".to_string()],
            permissions: RawPermissions::from([("contents".to_string(), "write".to_string())]),
        };
        let config = step.to_github().unwrap();
        assert_eq!(config.permissions.level("contents"), AccessLevel::Write);

        let bad = Step::Command {
            commands: vec![],
            permissions: RawPermissions::from([("contents".to_string(), "all".to_string())]),
        };
        let err = bad.to_bash().unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionInvalidLevel);
    }

    #[test]
    fn upload_artifact_is_unsupported_on_script_backends() {
        let step = Step::UploadArtifact {
            name: "cloud-assembly".to_string(),
            path: "cdk.out".to_string(),
        };
        for backend in [Backend::Gitlab, Backend::Bash] {
            let err = step.render(backend).unwrap_err();
            assert_eq!(err.code, ErrorCode::StepUnsupportedBackend);
            assert_eq!(err.details["backend"], backend.as_str());
        }
        assert!(step.render(Backend::Github).is_ok());
    }

    #[test]
    fn download_artifact_is_noop_on_script_backends() {
        let step = Step::DownloadArtifact {
            name: "cloud-assembly".to_string(),
            path: "cdk.out".to_string(),
        };
        assert_eq!(step.to_gitlab().unwrap(), StepConfig::default());
        assert_eq!(step.to_bash().unwrap(), StepConfig::default());
    }

    #[test]
    fn registry_login_levels() {
        let read = Step::RegistryLogin {
            write: false,
            scope: Some("@acme".to_string()),
        };
        let write = Step::RegistryLogin {
            write: true,
            scope: None,
        };
        assert_eq!(
            read.to_github().unwrap().permissions.level(PACKAGES),
            AccessLevel::Read
        );
        assert_eq!(
            write.to_codecatalyst().unwrap().permissions.level(PACKAGES),
            AccessLevel::Write
        );
        assert_eq!(
            read.to_github().unwrap().env["NODE_AUTH_TOKEN"],
            "${{ secrets.GITHUB_TOKEN }}"
        );
        assert_eq!(
            read.to_bash().unwrap_err().code,
            ErrorCode::StepUnsupportedBackend
        );
    }

    #[test]
    fn render_workflow_merges_in_order() {
        let steps = vec![
            assume(),
            Step::command(["npx cdk deploy"]),
            Step::RegistryLogin {
                write: true,
                scope: None,
            },
        ];
        let config = render_workflow(&steps, Backend::Github).unwrap();
        assert_eq!(config.steps.len(), 3);
        assert_eq!(config.permissions.level(ID_TOKEN), AccessLevel::Write);
        assert_eq!(config.permissions.level(PACKAGES), AccessLevel::Write);
        assert!(render_workflow(&steps, Backend::Gitlab).is_err());
    }
}
