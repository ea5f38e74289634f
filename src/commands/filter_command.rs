//! `filter` command: keep the earliest-N tasks of an exported bundle.

use crate::Result;
use crate::cli::{FilterArgs, ui};
use crate::config::ConfigService;
use crate::core::export::filter_topn;

/// Execute the filter command.
pub async fn execute(args: FilterArgs, _config_service: &dyn ConfigService) -> Result<()> {
    let summary = filter_topn(&args.input, &args.output, args.topn)?;
    ui::print_success(&format!(
        "filtered tasks: {} kept out of {}; fragments: {} out of {}",
        summary.kept_tasks, summary.total_tasks, summary.kept_fragments, summary.total_fragments
    ));
    Ok(())
}
