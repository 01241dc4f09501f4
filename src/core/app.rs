//! TypeScript entry point (`src/app.ts`) instantiating every stage stack.
//!
//! Stage stacks are created through user-provided callbacks, one per stage.
//! The personal and feature stacks only exist when their environment
//! variable is set at synth time, and are named after its value so every
//! developer and branch gets a stack of its own.

use std::fmt::Write as _;

use crate::config::PipelineConfig;
use crate::engine::GENERATED_HEADER;
use crate::error::{Error, Result};
use crate::slugify::sanitize_stage_name;
use crate::stage::{Environment, FEATURE_STAGE, PERSONAL_STAGE};

pub const FILE_PATH: &str = "src/app.ts";

/// JSON string literal, valid TypeScript.
fn literal(value: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::internal_json(e.to_string(), Some(format!("render {}", FILE_PATH))))
}

fn provider(stage: &str) -> String {
    format!("provide{}Stack", sanitize_stage_name(stage))
}

/// `stack_name` is a TypeScript expression.
fn stack_props(stage: &str, env: &Environment, stack_name: &str) -> Result<String> {
    Ok(format!(
        "{{ env: {{ account: {}, region: {} }}, stackName: {}, stageName: {} }}",
        literal(&env.account)?,
        literal(&env.region)?,
        stack_name,
        literal(stage)?
    ))
}

/// Stack named `<prefix>-<stage>-<suffix>` when `variable` is set.
fn scoped_stack(
    out: &mut String,
    config: &PipelineConfig,
    stage: &str,
    env: &Environment,
    binding: &str,
    variable: &str,
) -> Result<()> {
    let stack_id = format!("{}StackId", binding);
    out.push('\n');
    let _ = writeln!(out, "    const {} = process.env[{}];", binding, literal(variable)?);
    let _ = writeln!(out, "    if ({}) {{", binding);
    let _ = writeln!(
        out,
        "      const {} = {} + stackSuffix({});",
        stack_id,
        literal(&format!("{}-", config.stack_id(stage)))?,
        binding
    );
    let _ = writeln!(
        out,
        "      props.{}(this, {}, {});",
        provider(stage),
        stack_id,
        stack_props(stage, env, &stack_id)?
    );
    out.push_str("    }\n");
    Ok(())
}

pub fn render(config: &PipelineConfig) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "// {}", GENERATED_HEADER);
    out.push_str("import { App, AppProps, Stack, StackProps } from 'aws-cdk-lib';\n\n");

    out.push_str("export interface PipelineAppStackProps extends StackProps {\n");
    out.push_str("  readonly stageName: string;\n");
    out.push_str("}\n\n");

    out.push_str("export type StackProvider = (app: App, stackId: string, props: PipelineAppStackProps) => Stack;\n\n");

    out.push_str("export interface PipelineAppProps extends AppProps {\n");
    for stage in config.stages.all() {
        let _ = writeln!(out, "  readonly {}: StackProvider;", provider(&stage.name));
    }
    if config.personal_stage.is_some() {
        let _ = writeln!(out, "  readonly {}: StackProvider;", provider(PERSONAL_STAGE));
    }
    if config.feature_stages.is_some() {
        let _ = writeln!(out, "  readonly {}: StackProvider;", provider(FEATURE_STAGE));
    }
    out.push_str("}\n\n");

    if config.personal_stage.is_some() || config.feature_stages.is_some() {
        out.push_str("function stackSuffix(value: string): string {\n");
        out.push_str("  return value.replace(/[^A-Za-z0-9]+/g, '-');\n");
        out.push_str("}\n\n");
    }

    out.push_str("export class PipelineApp extends App {\n");
    out.push_str("  constructor(props: PipelineAppProps) {\n");
    out.push_str("    super(props);\n");

    if let Some(personal) = &config.personal_stage {
        scoped_stack(
            &mut out,
            config,
            PERSONAL_STAGE,
            &personal.env,
            "user",
            &personal.user_variable,
        )?;
    }
    if let Some(feature) = &config.feature_stages {
        scoped_stack(
            &mut out,
            config,
            FEATURE_STAGE,
            &feature.env,
            "branch",
            &feature.branch_variable,
        )?;
    }

    if config.stages.all().next().is_some() {
        out.push('\n');
    }
    for stage in config.stages.all() {
        let stack_id = literal(&config.stack_id(&stage.name))?;
        let _ = writeln!(
            out,
            "    props.{}(this, {}, {});",
            provider(&stage.name),
            stack_id,
            stack_props(&stage.name, &stage.env, &stack_id)?
        );
    }

    out.push_str("  }\n}\n");
    Ok(out)
}
