use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{compile, plan, validate};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version = VERSION)]
#[command(about = "Compile a declarative stage list into CI/CD pipeline definitions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the pipeline files for the configured engine
    Compile(compile::CompileArgs),
    /// Show the job graph without writing files
    Plan(plan::PlanArgs),
    /// Check a pipeline configuration
    Validate(validate::ValidateArgs),
}

fn main() -> std::process::ExitCode {
    // stdout carries the JSON envelope; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let (json_result, exit_code) = commands::run_json(cli.command);

    if let Err(err) = output::print_json_result(json_result) {
        log::error!("{}", err);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
