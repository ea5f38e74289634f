use crate::{Result, cli::Commands, config::ConfigService};
use std::sync::Arc;

/// Central command dispatcher to avoid code duplication.
///
/// Both the CLI path and the library API route through the same match,
/// so argument validation and configuration injection behave
/// identically everywhere.
///
/// # Examples
///
/// ```rust
/// use loadtrace::commands::dispatcher::dispatch_command;
/// use loadtrace::cli::{Commands, ConfigArgs, ConfigAction};
/// use loadtrace::config::TestConfigService;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let config_service = Arc::new(TestConfigService::with_defaults());
/// let args = ConfigArgs {
///     action: ConfigAction::Get { key: "broker.url".to_string() },
/// };
/// dispatch_command(Commands::Config(args), config_service).await?;
/// # Ok::<(), loadtrace::error::LoadtraceError>(())
/// # });
/// ```
pub async fn dispatch_command(
    command: Commands,
    config_service: Arc<dyn ConfigService>,
) -> Result<()> {
    dispatch_command_with_ref(command, config_service.as_ref()).await
}

/// Dispatch a command with a borrowed config service reference.
pub async fn dispatch_command_with_ref(
    command: Commands,
    config_service: &dyn ConfigService,
) -> Result<()> {
    match command {
        Commands::Dispatch(args) => {
            crate::commands::dispatch_command::execute(args, config_service).await
        }
        Commands::Schedule(args) => {
            crate::commands::schedule_command::execute(args, config_service).await
        }
        Commands::Work(args) => crate::commands::work_command::execute(args, config_service).await,
        Commands::Wrap(args) => crate::commands::wrap_command::execute(args, config_service).await,
        Commands::Sample(args) => {
            crate::commands::sample_command::execute(args, config_service).await
        }
        Commands::Normalize(args) => {
            crate::commands::normalize_command::execute(args, config_service).await
        }
        Commands::Export(args) => {
            crate::commands::export_command::execute(args, config_service).await
        }
        Commands::Filter(args) => {
            crate::commands::filter_command::execute(args, config_service).await
        }
        Commands::Config(args) => {
            crate::commands::config_command::execute(args, config_service).await
        }
        Commands::GenerateCompletion(args) => {
            let mut cmd = <crate::cli::Cli as clap::CommandFactory>::command();
            let cmd_name = cmd.get_name().to_string();
            let mut stdout = std::io::stdout();
            clap_complete::generate(args.shell, &mut cmd, cmd_name, &mut stdout);
            Ok(())
        }
    }
}
