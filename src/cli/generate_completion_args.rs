// src/cli/generate_completion_args.rs
use clap::Args;
use clap_complete::Shell;

/// Shell completion generation parameters.
#[derive(Args, Debug)]
pub struct GenerateCompletionArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}
