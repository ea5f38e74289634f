//! Command-line interface for the loadtrace harness.
//!
//! # Architecture
//!
//! The CLI is built using `clap` and follows a subcommand pattern:
//! - `dispatch` - Enumerate inputs and submit task envelopes
//! - `schedule` - Run the central FIFO scheduler
//! - `work` - Run the per-node worker runtime
//! - `wrap` - Instrument one child invocation
//! - `sample` - Run the per-PID sampler
//! - `normalize` - Emit the normalized CTS bundle for a run
//! - `export` - Emit the simulator bundle from CTS bundles
//! - `filter` - Keep the earliest-N tasks of an exported bundle
//! - `config` - Configuration management and inspection
//! - `generate-completion` - Shell completion script generation
//!
//! # Examples
//!
//! ```bash
//! # Submit every input through the central pending queue
//! loadtrace dispatch --inputs inputs --outputs outputs --policy pending
//!
//! # Run the scheduler with the instance-count weigher
//! loadtrace schedule --weigher instances --weigher-order min
//!
//! # Run a 4-slot worker with exclusive CPU binding
//! loadtrace work --node cloud0 --parallel 4 --cpu-binding exclusive
//! ```

mod config_args;
mod dispatch_args;
mod export_args;
mod filter_args;
mod generate_completion_args;
mod normalize_args;
mod sample_args;
mod schedule_args;
pub mod ui;
mod work_args;
mod wrap_args;

use clap::{Parser, Subcommand};
pub use config_args::{ConfigAction, ConfigArgs};
pub use dispatch_args::DispatchArgs;
pub use export_args::ExportArgs;
pub use filter_args::FilterArgs;
pub use generate_completion_args::GenerateCompletionArgs;
pub use normalize_args::NormalizeArgs;
pub use sample_args::SampleArgs;
pub use schedule_args::ScheduleArgs;
pub use ui::{print_error, print_success, print_warning};
pub use work_args::WorkArgs;
pub use wrap_args::WrapArgs;

/// Main CLI application structure defining the top-level interface.
#[derive(Parser, Debug)]
#[command(name = "loadtrace")]
#[command(about = "Distributed workload scheduling and tracing harness")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for the loadtrace CLI.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enumerate inputs and submit task envelopes to the broker
    Dispatch(DispatchArgs),

    /// Run the central FIFO scheduler
    Schedule(ScheduleArgs),

    /// Run the per-node worker runtime
    Work(WorkArgs),

    /// Instrument a single child invocation and record its span
    Wrap(WrapArgs),

    /// Run the per-PID sampler and write the node descriptor
    Sample(SampleArgs),

    /// Emit the normalized CTS bundle for a run directory
    Normalize(NormalizeArgs),

    /// Emit the simulator bundle from one or more CTS bundles
    Export(ExportArgs),

    /// Keep only the earliest-N tasks of an exported bundle
    Filter(FilterArgs),

    /// Manage and inspect application configuration
    Config(ConfigArgs),

    /// Generate shell completion scripts
    GenerateCompletion(GenerateCompletionArgs),
}

/// Executes the loadtrace CLI with parsed arguments.
///
/// This is the main entry point for CLI execution, routing parsed
/// command-line arguments to their respective command handlers. Errors
/// propagate to `main` for exit-code handling.
pub async fn run() -> crate::Result<()> {
    let config_service = std::sync::Arc::new(crate::config::ProductionConfigService::new()?);
    run_with_config(config_service.as_ref()).await
}

/// Run the CLI with a provided configuration service.
///
/// Enables dependency injection of configuration services for testing
/// and embedding.
pub async fn run_with_config(config_service: &dyn crate::config::ConfigService) -> crate::Result<()> {
    let cli = Cli::parse();
    crate::commands::dispatcher::dispatch_command_with_ref(cli.command, config_service).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_schedule_flags() {
        let cli = Cli::try_parse_from([
            "loadtrace",
            "schedule",
            "--weigher",
            "instances",
            "--weigher-order",
            "max",
            "--scan-slots",
            "8",
        ])
        .unwrap();
        match cli.command {
            Commands::Schedule(args) => {
                assert_eq!(args.weigher.as_deref(), Some("instances"));
                assert_eq!(args.weigher_order.as_deref(), Some("max"));
                assert_eq!(args.scan_slots, Some(8));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_wrap_trailing_args() {
        let cli = Cli::try_parse_from([
            "loadtrace", "wrap", "--", "ffmpeg", "-i", "a.mp4", "out.mp4",
        ])
        .unwrap();
        match cli.command {
            Commands::Wrap(args) => {
                assert_eq!(args.command[0], "ffmpeg");
                assert_eq!(args.command.len(), 4);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
