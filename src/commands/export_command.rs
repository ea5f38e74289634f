//! `export` command: emit the simulator bundle.

use std::str::FromStr;

use crate::Result;
use crate::cli::{ExportArgs, ui};
use crate::config::ConfigService;
use crate::core::export::{TaskIdMode, export_bundle};

/// Execute the export command.
pub async fn execute(args: ExportArgs, _config_service: &dyn ConfigService) -> Result<()> {
    let mode = TaskIdMode::from_str(&args.task_id)?;
    let summary = export_bundle(&args.input, &args.output, mode)?;
    ui::print_success(&format!(
        "exported {} nodes, {} tasks, {} fragments -> {}",
        summary.nodes,
        summary.tasks,
        summary.fragments,
        args.output.display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestConfigService;

    #[tokio::test]
    async fn test_bad_task_id_mode_is_config_error() {
        let service = TestConfigService::with_defaults();
        let args = ExportArgs {
            input: "in".into(),
            output: "out".into(),
            task_id: "random".to_string(),
        };
        let err = execute(args, &service).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
