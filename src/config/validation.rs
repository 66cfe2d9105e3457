use crate::{config::models::EngineConfig, core::model::Fqdn};

/// Validation result type alias
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Engine configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire configuration, reporting every problem at once.
    pub fn validate(config: &EngineConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Some(primary) = &config.primary_hostname {
            match Fqdn::new(primary) {
                Ok(fqdn) if fqdn.is_wildcard() => errors.push(ConfigError::InvalidField {
                    field: "primary_hostname".to_string(),
                    message: "the primary host cannot be a wildcard name".to_string(),
                }),
                Ok(_) => {}
                Err(e) => errors.push(ConfigError::InvalidField {
                    field: "primary_hostname".to_string(),
                    message: e.reason,
                }),
            }
        }

        for service in &config.installed_services {
            if service.trim().is_empty() || service.contains(char::is_whitespace) {
                errors.push(ConfigError::InvalidField {
                    field: "installed_services".to_string(),
                    message: format!("'{service}' is not a valid service name"),
                });
            }
        }

        if config.store.path.as_os_str().is_empty() {
            errors.push(ConfigError::MissingField {
                field: "store.path".to_string(),
            });
        }

        let serving = &config.serving;
        if serving.config_dir.as_os_str().is_empty() {
            errors.push(ConfigError::MissingField {
                field: "serving.config_dir".to_string(),
            });
        }
        if serving.reload_command.first().is_none_or(|p| p.trim().is_empty()) {
            errors.push(ConfigError::MissingField {
                field: "serving.reload_command".to_string(),
            });
        }
        for (field, value, parsed) in [
            ("serving.apply_timeout", &serving.apply_timeout, serving.apply_timeout()),
            ("serving.reload_timeout", &serving.reload_timeout, serving.reload_timeout()),
        ] {
            match parsed {
                Ok(duration) if duration.is_zero() => errors.push(ConfigError::InvalidField {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                }),
                Ok(_) => {}
                Err(e) => errors.push(ConfigError::InvalidField {
                    field: field.to_string(),
                    message: format!("'{value}' is not a duration: {e}"),
                }),
            }
        }
        if serving.listen_port == 0 {
            errors.push(ConfigError::InvalidField {
                field: "serving.listen_port".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Format multiple errors into a single message
    fn format_multiple_errors(errors: Vec<ConfigError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_defaults() {
        assert!(ConfigValidator::validate(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn validate_rejects_bad_primary_hostname() {
        let mut config = EngineConfig::default();
        config.primary_hostname = Some("localhost".to_string());
        assert!(ConfigValidator::validate(&config).is_err());

        config.primary_hostname = Some("*.example.com".to_string());
        assert!(ConfigValidator::validate(&config).is_err());

        config.primary_hostname = Some("Example.com".to_string());
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut config = EngineConfig::default();
        config.serving.reload_command.clear();
        config.serving.apply_timeout = "soon".to_string();
        config.serving.reload_timeout = "0s".to_string();
        config.serving.listen_port = 0;

        let Err(ConfigError::ValidationFailed { message }) = ConfigValidator::validate(&config)
        else {
            panic!("expected validation failure");
        };
        assert!(message.starts_with("Found 4 validation errors"));
        assert!(message.contains("serving.reload_command"));
        assert!(message.contains("serving.apply_timeout"));
        assert!(message.contains("serving.reload_timeout"));
        assert!(message.contains("serving.listen_port"));
    }
}
