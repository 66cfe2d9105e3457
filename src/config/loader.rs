use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::EngineConfig;

/// Environment variable prefix for overrides, e.g. `VHOSTD_STORE__PATH`.
pub const ENV_PREFIX: &str = "VHOSTD";

/// Load configuration from a file using the config crate, then apply
/// environment overrides. Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<EngineConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<EngineConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(environment())
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let engine_config: EngineConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(engine_config)
}

/// Defaults plus environment overrides, for running without a file.
pub fn load_default_config() -> Result<EngineConfig> {
    Config::builder()
        .add_source(environment())
        .build()
        .wrap_err("Failed to read environment overrides")?
        .try_deserialize()
        .wrap_err("Failed to deserialize environment overrides")
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("installed_services")
        .with_list_parse_key("serving.reload_command")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use std::{io::Write, path::PathBuf};

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
primary_hostname = "example.com"
installed_services = ["php-webserver"]

[store]
path = "/tmp/vhostd-test.json"

[serving]
config_dir = "/tmp/vhostd-sites"
reload_command = ["systemctl", "reload", "nginx"]
listen_port = 8080
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.primary_hostname.as_deref(), Some("example.com"));
        assert_eq!(config.installed_services, vec!["php-webserver".to_string()]);
        assert_eq!(config.store.path, PathBuf::from("/tmp/vhostd-test.json"));
        assert_eq!(config.serving.reload_command.len(), 3);
        assert_eq!(config.serving.listen_port, 8080);
        // Unset keys keep their defaults
        assert_eq!(config.serving.apply_timeout, "10s");
        assert!(!config.logging.json);
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "serving": {
    "config_dir": "/srv/nginx",
    "reload_timeout": "1m"
  },
  "logging": { "level": "debug", "json": true }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.serving.config_dir, PathBuf::from("/srv/nginx"));
        assert_eq!(
            config.serving.reload_timeout().unwrap(),
            std::time::Duration::from_secs(60)
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        assert!(load_config("/nonexistent/vhostd.toml").await.is_err());
    }
}
