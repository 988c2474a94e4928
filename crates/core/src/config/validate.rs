use super::{types::Config, AuthMethod, ConfigError};

/// Validate cross-field rules serde cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().is_none_or(str::is_empty)
    {
        return Err(invalid("auth.api_key must be set when method = \"api_key\""));
    }

    config
        .cycle_settings()
        .validate()
        .map_err(|e| invalid(&format!("orchestrator: {}", e)))?;

    if config.orchestrator.subscriber_buffer == 0 {
        return Err(invalid("orchestrator.subscriber_buffer must be greater than 0"));
    }

    let sim = &config.simulation;
    if !(0.0..=1.0).contains(&sim.success_rate) {
        return Err(invalid("simulation.success_rate must be between 0 and 1"));
    }
    if sim.action_min_ms > sim.action_max_ms {
        return Err(invalid("simulation.action_min_ms must not exceed action_max_ms"));
    }
    if sim.teardown_min_ms > sim.teardown_max_ms {
        return Err(invalid(
            "simulation.teardown_min_ms must not exceed teardown_max_ms",
        ));
    }

    Ok(())
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}
