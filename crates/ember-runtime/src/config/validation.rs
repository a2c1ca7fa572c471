//! Configuration validation.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, EmberConfig, LogOutput};

/// Validates the entire configuration.
pub fn validate_config(config: &EmberConfig) -> ConfigResult<()> {
    if config.dispatch.worker_threads == 0 {
        return Err(ConfigError::validation(
            "dispatch.worker_threads must be greater than 0",
        ));
    }

    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    let mut seen = HashSet::new();
    for bot in &config.bots {
        validate_bot_config(bot)?;
        if !seen.insert(bot.nick.as_str()) {
            return Err(ConfigError::DuplicateBot(bot.nick.clone()));
        }
    }

    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    if bot.nick.trim().is_empty() {
        return Err(ConfigError::missing_field("bots.nick"));
    }
    if bot.nick.contains(['/', '\\']) {
        return Err(ConfigError::validation(format!(
            "Bot nick '{}' cannot contain path separators",
            bot.nick
        )));
    }
    if bot.command_token.is_empty() {
        return Err(ConfigError::validation(format!(
            "Bot '{}' has an empty command token",
            bot.nick
        )));
    }
    Ok(())
}
