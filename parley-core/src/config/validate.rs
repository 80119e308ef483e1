//! Configuration validation rules.

use super::schema::Config;

/// Validate configuration and return aggregated validation errors.
///
/// The API key is not checked here; commands that never reach the network
/// must still work without one.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.gemini.api_base.trim().is_empty() {
        errors.push("gemini.api_base must not be empty".to_string());
    }

    if config.generation.max_output_tokens == 0 {
        errors.push("generation.max_output_tokens must be > 0".to_string());
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        errors.push("generation.temperature must be in [0.0, 2.0]".to_string());
    }
    if !(0.0..=1.0).contains(&config.generation.top_p) {
        errors.push("generation.top_p must be in [0.0, 1.0]".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push("storage.database_path must not be empty".to_string());
    }

    if config.chat.exit_token.trim().is_empty() {
        errors.push("chat.exit_token must not be empty".to_string());
    }
    if config.chat.system_prompt.trim().is_empty() {
        errors.push("chat.system_prompt must not be empty".to_string());
    }
    if config.chat.acknowledgement.trim().is_empty() {
        errors.push("chat.acknowledgement must not be empty".to_string());
    }

    if !matches!(
        config.logging.format.to_lowercase().as_str(),
        "text" | "json"
    ) {
        errors.push(format!(
            "logging.format must be text or json, got {}",
            config.logging.format
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}
