//! Shell command lists shared by every engine and the generated tasks.

use crate::config::PipelineConfig;
use crate::slugify::file_slug;
use crate::utils::shell::{quote_arg, quote_args};

/// Environment variable holding the assembly version inside generated jobs.
pub const VERSION_VARIABLE: &str = "VERSION";

/// Shell expression yielding the project's current version.
pub const PROJECT_VERSION: &str = "$(node -p \"require('./package.json').version\")";

/// Stack addressed by a deploy, diff, destroy or watch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackTarget<'s> {
    /// A stage stack, `<prefix>-<stage>`.
    Stage(&'s str),
    /// `<prefix>-<stage>-<suffix>`, the suffix being the value of `variable`
    /// at run time with every run of characters outside `[A-Za-z0-9]`
    /// replaced by `-`.
    Scoped { stage: &'s str, variable: &'s str },
}

impl<'s> StackTarget<'s> {
    pub fn stage(&self) -> &'s str {
        match self {
            StackTarget::Stage(stage) | StackTarget::Scoped { stage, .. } => stage,
        }
    }
}

impl<'s> From<&'s str> for StackTarget<'s> {
    fn from(stage: &'s str) -> Self {
        StackTarget::Stage(stage)
    }
}

impl<'s> From<&'s String> for StackTarget<'s> {
    fn from(stage: &'s String) -> Self {
        StackTarget::Stage(stage)
    }
}

/// Shell expression for the suffix of a scoped stack. Must match
/// `stackSuffix` in the generated entry point.
pub fn scoped_suffix(variable: &str) -> String {
    format!(
        "$(printf '%s' \"${{{}:-}}\" | tr -cs 'A-Za-z0-9' '-')",
        variable
    )
}

fn escape_double_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub struct CommandRenderer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> CommandRenderer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn install(&self) -> Vec<String> {
        let mut commands = self.config.pre_install_commands.clone();
        commands.push(self.config.install_command.clone());
        commands
    }

    pub fn synth(&self) -> Vec<String> {
        let mut commands = self.config.pre_synth_commands.clone();
        commands.push(self.config.synth_command.clone());
        commands.extend(self.config.post_synth_commands.iter().cloned());
        commands
    }

    /// Publish assets of the whole assembly, or of one stage's manifest.
    pub fn asset_upload(&self, stage: Option<&str>) -> Vec<String> {
        let path = match stage {
            Some(stage) => format!(
                "{}/{}.assets.json",
                self.config.cdk_out,
                self.config.stack_id(stage)
            ),
            None => self.config.cdk_out.clone(),
        };
        vec![format!(
            "npx cdk-assets --path {} --verbose publish",
            quote_arg(&path)
        )]
    }

    pub fn stack_patterns(&self, stage: &str) -> Vec<String> {
        let stack = self.config.stack_id(stage);
        if self.config.deploy_sub_stacks {
            vec![stack.clone(), format!("{}/*", stack)]
        } else {
            vec![stack]
        }
    }

    pub fn outputs_file(stage: &str) -> String {
        format!("cdk-outputs-{}.json", file_slug(stage))
    }

    /// Quoted stack patterns of `target`.
    fn stack_args(&self, target: StackTarget<'_>) -> String {
        match target {
            StackTarget::Stage(stage) => quote_args(&self.stack_patterns(stage)),
            StackTarget::Scoped { stage, variable } => {
                let stack = format!(
                    "{}-{}",
                    escape_double_quoted(&self.config.stack_id(stage)),
                    scoped_suffix(variable)
                );
                let mut patterns = vec![format!("\"{}\"", stack)];
                if self.config.deploy_sub_stacks {
                    patterns.push(format!("\"{}/*\"", stack));
                }
                patterns.join(" ")
            }
        }
    }

    pub fn deploy<'s>(&self, target: impl Into<StackTarget<'s>>) -> Vec<String> {
        let target = target.into();
        vec![format!(
            "npx cdk --app {} --outputs-file {} --progress events --require-approval never deploy {}",
            quote_arg(&self.config.cdk_out),
            quote_arg(&Self::outputs_file(target.stage())),
            self.stack_args(target)
        )]
    }

    pub fn diff<'s>(&self, target: impl Into<StackTarget<'s>>) -> Vec<String> {
        vec![format!(
            "npx cdk --app {} diff {}",
            quote_arg(&self.config.cdk_out),
            self.stack_args(target.into())
        )]
    }

    pub fn destroy<'s>(&self, target: impl Into<StackTarget<'s>>) -> Vec<String> {
        vec![format!("npx cdk destroy {}", self.stack_args(target.into()))]
    }

    pub fn watch<'s>(&self, target: impl Into<StackTarget<'s>>) -> Vec<String> {
        vec![format!(
            "npx cdk deploy --watch --hotswap {}",
            self.stack_args(target.into())
        )]
    }

    /// Bump the version, then publish the cloud assembly as a package.
    pub fn assembly_upload(&self) -> Vec<String> {
        let mut commands = vec![self.config.bump_command.clone()];
        commands.extend(self.assembly_publish());
        commands
    }

    /// Stamp the cloud assembly with the package name and current version and
    /// publish it.
    pub fn assembly_publish(&self) -> Vec<String> {
        let cdk_out = quote_arg(&self.config.cdk_out);
        vec![
            format!("export ASSEMBLY_VERSION=\"{}\"", PROJECT_VERSION),
            format!("echo '{{}}' > {}/package.json", cdk_out),
            format!(
                "(cd {} && npm pkg set {} version=\"$ASSEMBLY_VERSION\" && npm publish)",
                cdk_out,
                quote_arg(&format!("name={}", self.config.assembly_package))
            ),
        ]
    }

    /// Install the published assembly at `version_ref` and move it to the
    /// cloud assembly path.
    ///
    /// `version_ref` is a shell expression, e.g. `$VERSION`, and is only
    /// double-quoted.
    pub fn versioned_install(&self, version_ref: &str) -> Vec<String> {
        let package = &self.config.assembly_package;
        let cdk_out = quote_arg(&self.config.cdk_out);
        vec![
            format!(
                "npm install --no-save {}@\"{}\"",
                quote_arg(package),
                version_ref
            ),
            format!("rm -rf {}", cdk_out),
            format!(
                "mv {} {}",
                quote_arg(&format!("./node_modules/{}", package)),
                cdk_out
            ),
        ]
    }
}
