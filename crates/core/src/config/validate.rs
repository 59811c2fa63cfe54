use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Worker count and broadcaster capacity are positive
/// - Pipeline names are unique, stage names are unique per pipeline
/// - Stage weights are within 1..=100 and commands are not empty
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.queue.workers == 0 {
        return Err(ConfigError::ValidationError(
            "queue.workers must be at least 1".to_string(),
        ));
    }

    if config.broadcaster.channel_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "broadcaster.channel_capacity must be at least 1".to_string(),
        ));
    }

    if config.retry.backoff_multiplier < 1.0 || config.retry.resource_exhausted_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "retry multipliers must be at least 1.0".to_string(),
        ));
    }

    let mut pipelines = HashSet::new();
    for pipeline in &config.pipelines {
        if pipeline.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "pipeline name cannot be empty".to_string(),
            ));
        }
        if !pipelines.insert(pipeline.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate pipeline '{}'",
                pipeline.name
            )));
        }
        if pipeline.stages.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "pipeline '{}' has no stages",
                pipeline.name
            )));
        }

        let mut stages = HashSet::new();
        for stage in &pipeline.stages {
            if !stages.insert(stage.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate stage '{}' in pipeline '{}'",
                    stage.name, pipeline.name
                )));
            }
            if !(1..=100).contains(&stage.weight) {
                return Err(ConfigError::ValidationError(format!(
                    "stage '{}' in pipeline '{}': weight must be between 1 and 100",
                    stage.name, pipeline.name
                )));
            }
            if stage.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "stage '{}' in pipeline '{}': command cannot be empty",
                    stage.name, pipeline.name
                )));
            }
        }
    }

    Ok(())
}
