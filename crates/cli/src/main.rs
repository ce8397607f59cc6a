//! visreg CLI - Main Entry Point
//!
//! Manages the baseline corpus, runs comparison sessions and inspects
//! their history.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{artifacts, baseline, report, run, threshold, Context};

/// visreg - visual regression baselines and comparisons
#[derive(Parser)]
#[command(name = "visreg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "VISREG_CONFIG", default_value_os_t = visreg_common::default_config_path(), global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Baseline(baseline::BaselineCommands),

    /// Capture every page in scope and compare it against its baseline
    Run(run::RunArgs),

    /// Render a stored session as html, json or a text summary
    Report(report::ReportArgs),

    /// List recent sessions
    History(report::HistoryArgs),

    /// Inspect and tune per-page thresholds
    #[command(subcommand)]
    Threshold(threshold::ThresholdCommands),

    /// Manage per-session screenshots and diffs
    #[command(subcommand)]
    Artifacts(artifacts::ArtifactsCommands),

    /// Show version information
    Version,
}

async fn dispatch(command: Commands, ctx: &Context) -> anyhow::Result<bool> {
    match command {
        Commands::Baseline(cmd) => baseline::execute(cmd, ctx).await,
        Commands::Run(args) => run::execute(args, ctx).await,
        Commands::Report(args) => report::execute_report(args, ctx).await,
        Commands::History(args) => report::execute_history(args, ctx).await,
        Commands::Threshold(cmd) => threshold::execute(cmd, ctx).await,
        Commands::Artifacts(cmd) => artifacts::execute(cmd, ctx).await,
        Commands::Version => {
            println!("visreg v{}", visreg_common::VERSION);
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // clap exits with status 2 on invalid arguments
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match Context::load(cli.config, cli.format) {
        Ok(ctx) => dispatch(cli.command, &ctx).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use visreg_common::{PageType, Viewport};

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate_with_modules() {
        let cli = Cli::try_parse_from([
            "visreg",
            "generate",
            "--modules",
            "login,orders",
            "--viewport",
            "mobile",
        ])
        .unwrap();
        match cli.command {
            Commands::Baseline(baseline::BaselineCommands::Generate { modules, viewport }) => {
                assert_eq!(modules, vec![PageType::Login, PageType::Orders]);
                assert_eq!(viewport, Some(Viewport::Mobile));
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_unknown_module_is_rejected() {
        assert!(Cli::try_parse_from(["visreg", "generate", "--modules", "checkout"]).is_err());
        assert!(Cli::try_parse_from(["visreg", "run", "--viewport", "watch"]).is_err());
    }

    #[test]
    fn test_parse_report_kind_and_global_format() {
        let cli = Cli::try_parse_from(["visreg", "report", "abc", "--as", "html", "--format", "json"]).unwrap();
        assert_eq!(cli.format, output::OutputFormat::Json);
        match cli.command {
            Commands::Report(args) => {
                assert_eq!(args.session, "abc");
                assert_eq!(args.kind, visreg_engine::ReportFormat::Html);
            }
            _ => panic!("expected report"),
        }
    }

    #[test]
    fn test_clean_requires_numeric_keep() {
        assert!(Cli::try_parse_from(["visreg", "clean", "--keep", "many"]).is_err());
        let cli = Cli::try_parse_from(["visreg", "clean"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Baseline(baseline::BaselineCommands::Clean { keep: 5 })
        ));
    }
}
