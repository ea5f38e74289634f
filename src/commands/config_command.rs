//! `config` command: inspect and modify configuration.

use crate::Result;
use crate::cli::{ConfigAction, ConfigArgs, ui};
use crate::config::ConfigService;
use crate::error::LoadtraceError;

/// Execute the config command.
pub async fn execute(args: ConfigArgs, config_service: &dyn ConfigService) -> Result<()> {
    match args.action {
        ConfigAction::Set { key, value } => {
            config_service.set_config_value(&key, &value)?;
            ui::print_success(&format!("{key} = {value}"));
        }
        ConfigAction::Get { key } => {
            println!("{}", config_service.get_config_value(&key)?);
        }
        ConfigAction::List => {
            let config = config_service.get_config()?;
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| LoadtraceError::config(e.to_string()))?;
            print!("{rendered}");
        }
        ConfigAction::Path => {
            println!("{}", config_service.get_config_file_path()?.display());
        }
    }
    Ok(())
}
